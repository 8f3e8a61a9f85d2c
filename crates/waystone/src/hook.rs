//! Hooks: durable wait-points resumed by external events.
//!
//! A workflow creates a hook with [`WorkflowContext::create_hook`] and
//! iterates its events as a [`Stream`]. Outside the workflow,
//! [`WorkflowService::resume_hook`](crate::WorkflowService::resume_hook)
//! validates a payload against the hook's schema, records it in the run log
//! and wakes the run. Because received events live in the log, iteration is
//! replay-stable: every turn yields the same events in the same order.
//!
//! [`WorkflowContext::create_hook`]: crate::WorkflowContext::create_hook

use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::Stream;
use jsonschema::{Draft, JSONSchema};
use schemars::JsonSchema;
use schemars::generate::SchemaSettings;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::event::HookEventRecord;
use crate::workflow::{Command, Turn, lock_turn};

/// Schema and payload type of a hook.
///
/// # Example
///
/// ```
/// use schemars::JsonSchema;
/// use serde::Deserialize;
/// use waystone::HookDefinition;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct Approval {
///     approved: bool,
///     reviewer: String,
/// }
///
/// let approvals = HookDefinition::<Approval>::from_type().unwrap();
/// assert!(approvals.validate(&serde_json::json!({ "approved": true, "reviewer": "ada" })).is_ok());
/// assert!(approvals.validate(&serde_json::json!({ "approved": "yes" })).is_err());
/// ```
#[derive(Debug)]
pub struct HookDefinition<T> {
    schema: Value,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for HookDefinition<T> {
    fn clone(&self) -> Self {
        Self {
            schema: self.schema.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: JsonSchema> HookDefinition<T> {
    /// Derive the schema from `T`'s [`JsonSchema`] implementation.
    pub fn from_type() -> Result<Self> {
        let schema = SchemaSettings::draft07()
            .into_generator()
            .into_root_schema_for::<T>();
        Self::with_schema(serde_json::to_value(schema)?)
    }
}

impl<T> HookDefinition<T> {
    /// Use an explicit JSON schema (draft 7).
    pub fn with_schema(schema: Value) -> Result<Self> {
        compile(&schema)?;
        Ok(Self {
            schema,
            _marker: PhantomData,
        })
    }

    /// Accept any payload.
    pub fn any() -> Self {
        Self {
            schema: Value::Bool(true),
            _marker: PhantomData,
        }
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Check a payload against the schema.
    pub fn validate(&self, payload: &Value) -> std::result::Result<(), Vec<String>> {
        validate_payload(&self.schema, payload)
    }
}

fn compile(schema: &Value) -> Result<JSONSchema> {
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(schema)
        .map_err(|e| Error::InvalidSchema(e.to_string()))
}

/// Validate a payload, returning one message per violation.
pub(crate) fn validate_payload(schema: &Value, payload: &Value) -> std::result::Result<(), Vec<String>> {
    let compiled = compile(schema).map_err(|e| vec![e.to_string()])?;
    compiled.validate(payload).map_err(|errors| {
        errors
            .map(|error| {
                let path = error.instance_path.to_string();
                if path.is_empty() {
                    error.to_string()
                } else {
                    format!("{path}: {error}")
                }
            })
            .collect()
    })
}

/// Options for [`WorkflowContext::create_hook`](crate::WorkflowContext::create_hook).
#[derive(Debug, Clone, Default)]
pub struct HookOptions {
    /// Token external callers resume the hook with.
    ///
    /// Defaults to `hook_<run_id>_<seq>`, which is deterministic across replays.
    pub token: Option<String>,
    /// Free-form metadata recorded with the hook.
    pub metadata: Value,
}

impl HookOptions {
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            metadata: Value::Null,
        }
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A payload delivered to a hook through
/// [`WorkflowService::resume_hook`](crate::WorkflowService::resume_hook).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookDelivery {
    pub payload: Value,
    /// A terminal event ends the hook's event sequence.
    #[serde(default)]
    pub terminal: bool,
}

impl HookDelivery {
    pub fn event(payload: Value) -> Self {
        Self {
            payload,
            terminal: false,
        }
    }

    /// The last event the hook will yield.
    pub fn terminal(payload: Value) -> Self {
        Self {
            payload,
            terminal: true,
        }
    }
}

/// Receipt for a recorded hook event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookReceipt {
    pub run_id: crate::RunId,
    /// Position of the event in the hook's sequence (0-indexed).
    pub index: usize,
}

/// A validated event yielded by a [`Hook`].
#[derive(Debug, Clone, PartialEq)]
pub struct HookEvent<T> {
    pub value: T,
    pub terminal: bool,
}

/// Handle to a hook inside a workflow body.
///
/// Yields recorded events in arrival order and suspends the workflow when it
/// has consumed all of them. The stream ends after a terminal event.
///
/// ```ignore
/// use futures::TryStreamExt;
///
/// let mut approvals = ctx.create_hook(&definition, HookOptions::token("order-42"))?;
/// while let Some(event) = approvals.try_next().await? {
///     if event.value.approved {
///         break;
///     }
/// }
/// ```
pub struct Hook<T> {
    token: String,
    events: Vec<HookEventRecord>,
    cursor: usize,
    finished: bool,
    disposed: bool,
    turn: Arc<Mutex<Turn>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Hook<T> {
    pub(crate) fn new(
        token: String,
        events: Vec<HookEventRecord>,
        disposed: bool,
        turn: Arc<Mutex<Turn>>,
    ) -> Self {
        Self {
            token,
            events,
            cursor: 0,
            finished: false,
            disposed,
            turn,
            _marker: PhantomData,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Release the token. Later resumes fail with
    /// [`Error::HookNotFound`](crate::Error::HookNotFound).
    pub fn dispose(self) {
        if !self.disposed {
            lock_turn(&self.turn).commands.push(Command::DisposeHook {
                token: self.token.clone(),
            });
        }
    }
}

impl<T: DeserializeOwned> Stream for Hook<T> {
    type Item = Result<HookEvent<T>>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        let Some(record) = this.events.get(this.cursor) else {
            // Nothing recorded yet: the run suspends here until resumed.
            return Poll::Pending;
        };
        this.cursor += 1;
        this.finished = record.terminal;
        let terminal = record.terminal;
        let item = serde_json::from_value(record.payload.clone())
            .map(|value| HookEvent { value, terminal })
            .map_err(Error::from);
        Poll::Ready(Some(item))
    }
}

impl<T> std::fmt::Debug for Hook<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("token", &self.token)
            .field("cursor", &self.cursor)
            .field("recorded", &self.events.len())
            .finish_non_exhaustive()
    }
}
