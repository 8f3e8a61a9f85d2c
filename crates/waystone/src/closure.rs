//! Captured closure variables carried alongside a step call.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::{Error, Result};

/// Values of the free variables a step reads from its enclosing function.
///
/// A nested step cannot see its lexical environment once it is invoked
/// through the queue, so the workflow serializes the captured values at call
/// time and the step resolves them explicitly through
/// [`StepContext::closure_vars`](crate::StepContext::closure_vars).
///
/// # Example
///
/// ```
/// use waystone::ClosureVars;
///
/// let vars = ClosureVars::new().with("count", &3).unwrap();
/// let count: i64 = vars.get("count").unwrap();
/// assert_eq!(count, 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClosureVars(BTreeMap<String, Value>);

impl ClosureVars {
    /// An empty capture set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a captured value, consuming and returning the set.
    pub fn with<T: Serialize + ?Sized>(mut self, name: impl Into<String>, value: &T) -> Result<Self> {
        self.insert(name, value)?;
        Ok(self)
    }

    /// Add or replace a captured value.
    pub fn insert<T: Serialize + ?Sized>(&mut self, name: impl Into<String>, value: &T) -> Result<()> {
        self.0.insert(name.into(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Resolve a captured value by name.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self
            .0
            .get(name)
            .ok_or_else(|| Error::MissingClosureVar(name.to_string()))?;
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Raw JSON for a captured value.
    pub fn get_value(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Captured names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Value)> for ClosureVars {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
