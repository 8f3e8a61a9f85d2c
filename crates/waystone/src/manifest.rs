//! Registration metadata emitted by the directive transform.
//!
//! A transformed module starts with a `/**__internal_workflows{...}*/`
//! comment holding its [`Manifest`]. Tooling reads the manifest without
//! re-running the transform; the runtime can check it against its registry
//! with [`WorkflowBuilder::verify_manifest`](crate::WorkflowBuilder::verify_manifest).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Opening marker of the metadata comment.
pub const MANIFEST_MARKER: &str = "/**__internal_workflows";

/// Workflows and steps discovered in one or more modules, keyed by nesting path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub workflows: BTreeMap<String, ManifestWorkflow>,
    #[serde(default)]
    pub steps: BTreeMap<String, ManifestStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestWorkflow {
    pub workflow_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestStep {
    pub step_id: String,
    /// Names the step captures from enclosing function scopes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub closure_vars: Vec<String>,
}

impl Manifest {
    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty() && self.steps.is_empty()
    }

    /// Every workflow and step identifier in the manifest.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.workflows
            .values()
            .map(|w| w.workflow_id.as_str())
            .chain(self.steps.values().map(|s| s.step_id.as_str()))
    }

    /// Render the metadata comment.
    pub fn to_comment(&self) -> Result<String> {
        Ok(format!("{MANIFEST_MARKER}{}*/", serde_json::to_string(self)?))
    }

    /// Read the metadata comment from transformed code.
    ///
    /// Returns `Ok(None)` when the code carries no metadata comment.
    pub fn extract(code: &str) -> Result<Option<Self>> {
        let Some(start) = code.find(MANIFEST_MARKER) else {
            return Ok(None);
        };
        let body = &code[start + MANIFEST_MARKER.len()..];
        let end = body
            .find("*/")
            .ok_or_else(|| Error::fatal("unterminated manifest comment"))?;
        Ok(Some(serde_json::from_str(&body[..end])?))
    }

    /// Merge the manifest of another module.
    ///
    /// Entries are keyed by nesting path, which is only unique within a
    /// module, so merged keys are prefixed with the identifier's source path.
    pub fn merge(&mut self, other: Manifest) {
        for (name, workflow) in other.workflows {
            let key = qualified_key(&workflow.workflow_id, &name);
            self.workflows.insert(key, workflow);
        }
        for (name, step) in other.steps {
            let key = qualified_key(&step.step_id, &name);
            self.steps.insert(key, step);
        }
    }
}

fn qualified_key(id: &str, name: &str) -> String {
    match id.split("//").nth(1) {
        Some(source) => format!("{source}//{name}"),
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample() -> Manifest {
        let mut manifest = Manifest::default();
        manifest.workflows.insert(
            "checkout".into(),
            ManifestWorkflow {
                workflow_id: "workflow//orders.js//checkout".into(),
            },
        );
        manifest.steps.insert(
            "checkout/chargeCard".into(),
            ManifestStep {
                step_id: "step//orders.js//checkout/chargeCard".into(),
                closure_vars: vec!["count".into()],
            },
        );
        manifest
    }

    #[test]
    fn comment_is_extracted_from_code() {
        let code = format!("{}\nexport async function checkout() {{}}\n", sample().to_comment().unwrap());

        assert!(code.starts_with(
            r#"/**__internal_workflows{"workflows":{"checkout":{"workflowId":"workflow//orders.js//checkout"}}"#
        ));
        assert_eq!(Manifest::extract(&code).unwrap(), Some(sample()));
        assert_eq!(Manifest::extract("const x = 1;").unwrap(), None);
    }

    #[test]
    fn merged_keys_are_qualified_by_source() {
        let mut merged = Manifest::default();
        merged.merge(sample());

        assert!(merged.workflows.contains_key("orders.js//checkout"));
        assert!(merged.steps.contains_key("orders.js//checkout/chargeCard"));
        assert_eq!(merged.ids().count(), 2);
    }
}
