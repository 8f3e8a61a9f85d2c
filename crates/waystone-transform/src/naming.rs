//! Nesting paths for directive functions.
//!
//! A path is the chain of enclosing binding names, outermost first. The
//! walker pushes a segment when it enters a named construct; a directive
//! function takes the current path (plus an `_anonymousStepN` segment when
//! nothing names it). Paths are unique within a module and their hoisted
//! forms never collide with top-level bindings.

use std::collections::{HashMap, HashSet};

use nonempty::NonEmpty;
use waystone::FunctionKind;

use crate::lexer::{is_id_continue, is_id_start};
use crate::parser::is_reserved_word;

/// Name given to an anonymous default export.
pub const DEFAULT_EXPORT: &str = "__default";

#[derive(Debug)]
pub struct Namer {
    path: Vec<String>,
    assigned: HashSet<String>,
    hoisted: HashSet<String>,
    anonymous: HashMap<(FunctionKind, String), usize>,
    top_level: HashSet<String>,
}

impl Namer {
    pub fn new(top_level: HashSet<String>) -> Self {
        Self {
            path: Vec::new(),
            assigned: HashSet::new(),
            hoisted: HashSet::new(),
            anonymous: HashMap::new(),
            top_level,
        }
    }

    pub fn push(&mut self, segment: &str) {
        self.path.push(segment_name(segment));
    }

    pub fn pop(&mut self) {
        self.path.pop();
    }

    pub fn current(&self) -> &[String] {
        &self.path
    }

    /// The current path, extended by `segment` when given.
    pub fn child(&self, segment: Option<&str>) -> Vec<String> {
        let mut path = self.path.clone();
        path.extend(segment.map(segment_name));
        path
    }

    /// The next free `_anonymousStepN` / `_anonymousWorkflowN` under the
    /// current path, counted in source order.
    pub fn anonymous_segment(&mut self, kind: FunctionKind) -> String {
        let prefix = match kind {
            FunctionKind::Step => "_anonymousStep",
            FunctionKind::Workflow => "_anonymousWorkflow",
        };
        let parent = self.path.join("/");
        let counter = self.anonymous.entry((kind, parent.clone())).or_insert(0);
        loop {
            let segment = format!("{prefix}{counter}");
            *counter += 1;
            let key = if parent.is_empty() {
                segment.clone()
            } else {
                format!("{parent}/{segment}")
            };
            if !self.assigned.contains(&key) {
                return segment;
            }
        }
    }

    /// Binding name for an anonymous default export.
    pub fn default_export_name(&self) -> String {
        let mut name = DEFAULT_EXPORT.to_string();
        let mut n = 0;
        while self.top_level.contains(&name)
            || self.hoisted.contains(&name)
            || self.assigned.contains(&name)
        {
            n += 1;
            name = format!("{DEFAULT_EXPORT}${n}");
        }
        name
    }

    /// Claim a path for a directive function, suffixing the last segment
    /// with `$1`, `$2`, … until both the path and its hoisted name are free.
    ///
    /// `own_binding` marks a module-level function whose single-segment
    /// path is its own top-level binding; every other hoisted name must also
    /// stay clear of the module's top-level bindings.
    pub fn assign(&mut self, segments: Vec<String>, own_binding: bool) -> Option<NonEmpty<String>> {
        let mut path = NonEmpty::from_vec(segments)?;
        let base = path.last().clone();
        let mut n = 0;
        loop {
            let key = join(&path, "/");
            let hoisted = hoisted_name(&path);
            let clashes = self.assigned.contains(&key)
                || self.hoisted.contains(&hoisted)
                || (!own_binding && self.top_level.contains(&hoisted));
            if !clashes {
                self.assigned.insert(key);
                self.hoisted.insert(hoisted);
                return Some(path);
            }
            n += 1;
            *path.last_mut() = format!("{base}${n}");
        }
    }
}

/// A path segment: non-empty and free of `/`.
fn segment_name(name: &str) -> String {
    if name.is_empty() {
        return "_".to_string();
    }
    name.replace('/', "_")
}

fn join(path: &NonEmpty<String>, separator: &str) -> String {
    path.iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(separator)
}

/// The module-level function name for a path: segments joined with `$`,
/// with characters that cannot appear in an identifier replaced by `_`.
pub fn hoisted_name(path: &NonEmpty<String>) -> String {
    let joined = join(path, "$");
    let mut name: String = joined
        .chars()
        .map(|c| if is_id_continue(c) { c } else { '_' })
        .collect();
    let starts_ok = name.chars().next().is_some_and(is_id_start);
    if !starts_ok || is_reserved_word(&name) {
        name.insert(0, '_');
    }
    name
}
