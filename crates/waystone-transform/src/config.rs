//! Transform configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which bundle the module is being compiled for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// The step bundle: step bodies are kept and registered, workflows
    /// become guards that refuse direct calls.
    #[default]
    Step,
    /// The workflow bundle: workflows are kept, steps become proxies that
    /// suspend the workflow.
    Workflow,
    /// Application code: workflows become guards, steps are untouched.
    Client,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Step => "step",
            Mode::Workflow => "workflow",
            Mode::Client => "client",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "step" => Ok(Mode::Step),
            "workflow" => Ok(Mode::Workflow),
            "client" => Ok(Mode::Client),
            other => Err(format!(
                "unknown mode `{other}` (expected step, workflow or client)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransformConfig {
    pub mode: Mode,
    /// Module path embedded in every identifier, usually relative to the
    /// project root.
    pub source_path: String,
    /// Module the step bundle imports its registration helpers from.
    pub runtime_module: String,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Step,
            source_path: "input.js".to_string(),
            runtime_module: "waystone/runtime".to_string(),
        }
    }
}

impl TransformConfig {
    pub fn new(mode: Mode, source_path: impl Into<String>) -> Self {
        Self {
            mode,
            source_path: source_path.into(),
            ..Self::default()
        }
    }
}
