//! Source splicing.

use crate::span::Span;

/// Replace `span` with `text`. An empty span is an insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub span: Span,
    pub text: String,
}

impl Edit {
    pub fn replace(span: Span, text: impl Into<String>) -> Self {
        Self {
            span,
            text: text.into(),
        }
    }

    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self::replace(Span::new(at, at), text)
    }

    pub fn delete(span: Span) -> Self {
        Self::replace(span, String::new())
    }
}

/// Apply edits to `src`.
///
/// Edits at the same offset keep the order they were given in. An edit that
/// starts inside a region already replaced is dropped.
pub fn apply(src: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by_key(|edit| (edit.span.start, edit.span.end));
    let mut out = String::with_capacity(src.len());
    let mut cursor = 0;
    for edit in edits {
        if edit.span.start < cursor {
            continue;
        }
        out.push_str(&src[cursor..edit.span.start]);
        out.push_str(&edit.text);
        cursor = edit.span.end;
    }
    out.push_str(&src[cursor..]);
    out
}

/// Source text with the given spans cut out, relative to `outer`.
pub fn text_without(src: &str, outer: Span, holes: &[Span]) -> String {
    let mut out = String::new();
    let mut cursor = outer.start;
    for hole in holes {
        if hole.start < cursor || hole.end > outer.end {
            continue;
        }
        out.push_str(&src[cursor..hole.start]);
        cursor = hole.end;
    }
    out.push_str(&src[cursor..outer.end]);
    out
}
