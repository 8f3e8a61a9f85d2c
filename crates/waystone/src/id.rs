//! Identifiers for runs and registered functions.
//!
//! Function identifiers follow the format `kind//<source-path>//<nesting-path>`,
//! where the nesting path is the `/`-joined chain of enclosing named
//! declarations:
//!
//! ```text
//! workflow//orders.js//checkout
//! step//orders.js//checkout/chargeCard
//! step//orders.js//createSteps/_anonymousStep0
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use nonempty::NonEmpty;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Queue name prefix for workflow turn messages.
pub const WORKFLOW_QUEUE_PREFIX: &str = "__wkf_workflow_";

/// Queue name prefix for step job messages.
pub const STEP_QUEUE_PREFIX: &str = "__wkf_step_";

const SEPARATOR: &str = "//";

/// Unique identifier for a workflow run.
///
/// Generated by [`RunId::generate`] when a run is started.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Create a run id from an existing string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, time-ordered run id.
    pub fn generate() -> Self {
        Self(format!("wrun_{}", Uuid::now_v7().simple()))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The two kinds of durable functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionKind {
    /// A `"use step"` function: retryable unit of side-effecting work.
    Step,
    /// A `"use workflow"` function: deterministic orchestrator.
    Workflow,
}

impl FunctionKind {
    /// The identifier prefix for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionKind::Step => "step",
            FunctionKind::Workflow => "workflow",
        }
    }

    /// The queue name prefix messages for this kind are routed under.
    pub fn queue_prefix(&self) -> &'static str {
        match self {
            FunctionKind::Step => STEP_QUEUE_PREFIX,
            FunctionKind::Workflow => WORKFLOW_QUEUE_PREFIX,
        }
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identifier of a step or workflow function.
///
/// Identity is derived purely from the function's lexical position, so it is
/// stable across builds as long as the source structure is unchanged.
#[derive(Clone)]
pub struct FunctionId {
    kind: FunctionKind,
    source: String,
    path: NonEmpty<String>,
    rendered: String,
}

impl FunctionId {
    /// Build an identifier from its parts.
    ///
    /// The source path must be non-empty and must not contain `//`; path
    /// segments must be non-empty and must not contain `/`.
    pub fn new(
        kind: FunctionKind,
        source: impl Into<String>,
        path: NonEmpty<String>,
    ) -> Result<Self> {
        let source = source.into();
        let rendered = format!(
            "{kind}{SEPARATOR}{source}{SEPARATOR}{}",
            join(&path, "/")
        );
        if source.is_empty() || source.contains(SEPARATOR) {
            return Err(Error::InvalidIdentifier(rendered));
        }
        if path.iter().any(|segment| segment.is_empty() || segment.contains('/')) {
            return Err(Error::InvalidIdentifier(rendered));
        }
        Ok(Self {
            kind,
            source,
            path,
            rendered,
        })
    }

    /// Step identifier for a `/`-separated nesting path.
    pub fn step(source: impl Into<String>, nesting_path: &str) -> Result<Self> {
        Self::with_path(FunctionKind::Step, source.into(), nesting_path)
    }

    /// Workflow identifier for a `/`-separated nesting path.
    pub fn workflow(source: impl Into<String>, nesting_path: &str) -> Result<Self> {
        Self::with_path(FunctionKind::Workflow, source.into(), nesting_path)
    }

    fn with_path(kind: FunctionKind, source: String, nesting_path: &str) -> Result<Self> {
        let segments: Vec<String> = nesting_path.split('/').map(str::to_string).collect();
        let path = NonEmpty::from_vec(segments).ok_or_else(|| {
            Error::InvalidIdentifier(format!("{kind}{SEPARATOR}{source}{SEPARATOR}"))
        })?;
        Self::new(kind, source, path)
    }

    /// Whether this is a step or a workflow.
    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    /// The module path the function was declared in.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The chain of enclosing declaration names, outermost first.
    pub fn path(&self) -> &NonEmpty<String> {
        &self.path
    }

    /// The innermost name.
    pub fn name(&self) -> &str {
        self.path.last()
    }

    /// The nesting path joined with `/`.
    pub fn nesting_path(&self) -> String {
        join(&self.path, "/")
    }

    /// The module-level binding name used when the function is hoisted.
    ///
    /// Joins the nesting path with `$`: `checkout/chargeCard` becomes
    /// `checkout$chargeCard`.
    pub fn hoisted_name(&self) -> String {
        join(&self.path, "$")
    }

    /// Queue the function's messages are routed through.
    pub fn queue_name(&self) -> String {
        format!("{}{}", self.kind.queue_prefix(), self.rendered)
    }

    /// The rendered `kind//source//path` form.
    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

fn join(path: &NonEmpty<String>, separator: &str) -> String {
    path.iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(separator)
}

impl FromStr for FunctionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidIdentifier(s.to_string());
        let (kind, rest) = s.split_once(SEPARATOR).ok_or_else(invalid)?;
        let kind = match kind {
            "step" => FunctionKind::Step,
            "workflow" => FunctionKind::Workflow,
            _ => return Err(invalid()),
        };
        let (source, path) = rest.split_once(SEPARATOR).ok_or_else(invalid)?;
        Self::with_path(kind, source.to_string(), path).map_err(|_| invalid())
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

impl fmt::Debug for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FunctionId").field(&self.rendered).finish()
    }
}

impl PartialEq for FunctionId {
    fn eq(&self, other: &Self) -> bool {
        self.rendered == other.rendered
    }
}

impl Eq for FunctionId {}

impl Hash for FunctionId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rendered.hash(state);
    }
}

impl PartialOrd for FunctionId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FunctionId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rendered.cmp(&other.rendered)
    }
}

impl Serialize for FunctionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.rendered)
    }
}

impl<'de> Deserialize<'de> for FunctionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
