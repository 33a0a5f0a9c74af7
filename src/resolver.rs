//! Inline cross-vertex reference resolution.
//!
//! Raw parameter values may embed references of the form
//! `@<vertex-slug>.<output-name>[.<path-segment>...]`, pointing at the output
//! of an upstream vertex and optionally walking into nested list/map
//! structure. `@@` escapes a literal `@` and never starts a reference.
//!
//! Parsing is a tagged-variant scan: a string becomes a sequence of
//! [`Segment::Literal`] and [`Segment::Reference`] parts, never ad hoc
//! string interpolation. Resolution substitutes the referenced value's native
//! type when a raw value is exactly one reference, and stringifies +
//! concatenates when a reference is embedded in surrounding literal text.
//!
//! Scanning recurses into nested lists and maps, so a reference buried inside
//! `{"items": ["@a.result"]}` resolves like a top-level one.
//!
//! # Examples
//!
//! ```rust
//! use flowgraph::resolver::{parse_str, render, Segment};
//!
//! let segments = parse_str("value: @source.result.x, escaped: @@not_a_ref");
//! assert_eq!(segments.len(), 3);
//! assert!(matches!(segments[1], Segment::Reference(_)));
//! // Rendering re-escapes literals, so parse/render round-trip.
//! assert_eq!(parse_str(&render(&segments)), segments);
//! ```

use miette::Diagnostic;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// One step of a reference path: a map key or a list index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "{key}"),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

/// A parsed reference to an upstream vertex output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reference {
    pub vertex: String,
    pub output: String,
    pub path: Vec<PathSegment>,
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}.{}", self.vertex, self.output)?;
        for segment in &self.path {
            write!(f, ".{segment}")?;
        }
        Ok(())
    }
}

/// One part of a scanned string value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    /// Literal text with escapes already unapplied (`@@` became `@`).
    Literal(String),
    Reference(Reference),
}

/// A raw parameter value after reference scanning.
///
/// Lists and maps recurse; non-string scalars pass through untouched.
#[derive(Clone, Debug, PartialEq)]
pub enum Parsed {
    Text(Vec<Segment>),
    List(Vec<Parsed>),
    Map(Vec<(String, Parsed)>),
    Literal(Value),
}

impl Parsed {
    /// Whether any reference exists anywhere in this parse.
    #[must_use]
    pub fn has_references(&self) -> bool {
        match self {
            Self::Text(segments) => segments
                .iter()
                .any(|s| matches!(s, Segment::Reference(_))),
            Self::List(items) => items.iter().any(Parsed::has_references),
            Self::Map(entries) => entries.iter().any(|(_, v)| v.has_references()),
            Self::Literal(_) => false,
        }
    }
}

/// Source of already-built upstream outputs, supplied by the scheduler.
///
/// Resolution runs inside spawned build tasks, so implementations must be
/// shareable across threads.
pub trait ReferenceSource: Send + Sync {
    /// The named output of `vertex`, available only once that vertex is Built.
    fn built_output(&self, vertex: &str, output: &str) -> Result<Value, ReferenceError>;
}

/// Errors raised while resolving a reference.
///
/// A `NotBuilt` error is an ordering-invariant violation: in a validated
/// graph the scheduler never resolves a vertex before its dependency sources
/// are Built, so hitting it means the graph is missing an edge (the reference
/// names a vertex nothing depends on) or the raw value names an unknown
/// vertex. Path errors indicate malformed raw_params. Either way the error is
/// captured on the offending vertex's build result, never swallowed.
#[derive(Debug, Error, Diagnostic)]
pub enum ReferenceError {
    #[error("referenced vertex `{vertex}` has not been built")]
    #[diagnostic(
        code(flowgraph::resolver::not_built),
        help(
            "A reference is only resolvable once its source vertex is Built. \
             Check that an edge connects the referenced vertex to this one \
             and that the vertex id is spelled correctly."
        )
    )]
    NotBuilt { vertex: String },

    #[error("vertex `{vertex}` has no output named `{output}`")]
    #[diagnostic(code(flowgraph::resolver::unknown_output))]
    UnknownOutput { vertex: String, output: String },

    #[error("missing key `{key}` while resolving `{reference}`")]
    #[diagnostic(code(flowgraph::resolver::missing_key))]
    MissingKey { reference: String, key: String },

    #[error("index {index} out of range (length {len}) while resolving `{reference}`")]
    #[diagnostic(code(flowgraph::resolver::index_out_of_range))]
    IndexOutOfRange {
        reference: String,
        index: usize,
        len: usize,
    },

    #[error("cannot traverse into non-collection value at `{segment}` while resolving `{reference}`")]
    #[diagnostic(code(flowgraph::resolver::not_traversable))]
    NotTraversable { reference: String, segment: String },
}

fn is_slug_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Scan one string into literal and reference segments.
///
/// A lone or malformed `@` (no `slug.output` after it) stays literal text, so
/// values like email addresses pass through unharmed.
#[must_use]
pub fn parse_str(raw: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let chars: Vec<char> = raw.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '@' {
            literal.push(chars[i]);
            i += 1;
            continue;
        }
        // Escape: `@@` is a literal `@`.
        if chars.get(i + 1) == Some(&'@') {
            literal.push('@');
            i += 2;
            continue;
        }
        match scan_reference(&chars, i + 1) {
            Some((reference, next)) => {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Reference(reference));
                i = next;
            }
            None => {
                literal.push('@');
                i += 1;
            }
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

/// Attempt to read `slug.output[.segment...]` starting at `start` (just past
/// the `@`). Returns the reference and the index one past its last character.
fn scan_reference(chars: &[char], start: usize) -> Option<(Reference, usize)> {
    let mut i = start;
    while i < chars.len() && is_slug_char(chars[i]) {
        i += 1;
    }
    if i == start || chars.get(i) != Some(&'.') {
        return None;
    }
    let vertex: String = chars[start..i].iter().collect();

    let output_start = i + 1;
    let mut j = output_start;
    while j < chars.len() && is_ident_char(chars[j]) {
        j += 1;
    }
    if j == output_start {
        return None;
    }
    let output: String = chars[output_start..j].iter().collect();

    let mut path = Vec::new();
    loop {
        if chars.get(j) != Some(&'.') {
            break;
        }
        let seg_start = j + 1;
        let mut k = seg_start;
        while k < chars.len() && is_ident_char(chars[k]) {
            k += 1;
        }
        if k == seg_start {
            break;
        }
        let raw: String = chars[seg_start..k].iter().collect();
        let segment = if raw.chars().all(|c| c.is_ascii_digit()) {
            match raw.parse::<usize>() {
                Ok(index) => PathSegment::Index(index),
                Err(_) => PathSegment::Key(raw),
            }
        } else {
            PathSegment::Key(raw)
        };
        path.push(segment);
        j = k;
    }

    Some((
        Reference {
            vertex,
            output,
            path,
        },
        j,
    ))
}

/// Render segments back into raw wire form, re-applying the `@@` escape.
///
/// `parse_str(&render(&segments)) == segments` for any parse output.
#[must_use]
pub fn render(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Literal(text) => {
                for c in text.chars() {
                    if c == '@' {
                        out.push_str("@@");
                    } else {
                        out.push(c);
                    }
                }
            }
            Segment::Reference(reference) => {
                out.push_str(&reference.to_string());
            }
        }
    }
    out
}

/// Scan a raw parameter value, recursing into lists and maps.
#[must_use]
pub fn parse(raw: &Value) -> Parsed {
    match raw {
        Value::String(text) => Parsed::Text(parse_str(text)),
        Value::Array(items) => Parsed::List(items.iter().map(parse).collect()),
        Value::Object(entries) => Parsed::Map(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), parse(value)))
                .collect(),
        ),
        other => Parsed::Literal(other.clone()),
    }
}

/// Resolve a parsed value against already-built upstream outputs.
///
/// Pure given a complete context: no caching happens here beyond vertex-level
/// build caching.
pub fn resolve(parsed: &Parsed, ctx: &dyn ReferenceSource) -> Result<Value, ReferenceError> {
    match parsed {
        Parsed::Literal(value) => Ok(value.clone()),
        Parsed::List(items) => Ok(Value::Array(
            items
                .iter()
                .map(|item| resolve(item, ctx))
                .collect::<Result<Vec<_>, _>>()?,
        )),
        Parsed::Map(entries) => {
            let mut object = serde_json::Map::new();
            for (key, value) in entries {
                object.insert(key.clone(), resolve(value, ctx)?);
            }
            Ok(Value::Object(object))
        }
        Parsed::Text(segments) => resolve_segments(segments, ctx),
    }
}

fn resolve_segments(
    segments: &[Segment],
    ctx: &dyn ReferenceSource,
) -> Result<Value, ReferenceError> {
    // Exactly one reference with no surrounding text: typed substitution.
    if let [Segment::Reference(reference)] = segments {
        return resolve_reference(reference, ctx);
    }
    // Otherwise: stringify and concatenate.
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Reference(reference) => {
                out.push_str(&stringify(&resolve_reference(reference, ctx)?));
            }
        }
    }
    Ok(Value::String(out))
}

fn resolve_reference(
    reference: &Reference,
    ctx: &dyn ReferenceSource,
) -> Result<Value, ReferenceError> {
    let value = ctx.built_output(&reference.vertex, &reference.output)?;
    walk_path(value, reference)
}

fn walk_path(mut value: Value, reference: &Reference) -> Result<Value, ReferenceError> {
    for segment in &reference.path {
        value = match (value, segment) {
            (Value::Object(mut object), PathSegment::Key(key)) => object
                .remove(key)
                .ok_or_else(|| ReferenceError::MissingKey {
                    reference: reference.to_string(),
                    key: key.clone(),
                })?,
            (Value::Object(mut object), PathSegment::Index(index)) => {
                // Integer segments address maps by their stringified key.
                let key = index.to_string();
                object
                    .remove(&key)
                    .ok_or_else(|| ReferenceError::MissingKey {
                        reference: reference.to_string(),
                        key,
                    })?
            }
            (Value::Array(mut items), PathSegment::Index(index)) => {
                let len = items.len();
                if *index >= len {
                    return Err(ReferenceError::IndexOutOfRange {
                        reference: reference.to_string(),
                        index: *index,
                        len,
                    });
                }
                items.swap_remove(*index)
            }
            (Value::Array(_), PathSegment::Key(key)) => {
                return Err(ReferenceError::NotTraversable {
                    reference: reference.to_string(),
                    segment: key.clone(),
                });
            }
            (_, segment) => {
                return Err(ReferenceError::NotTraversable {
                    reference: reference.to_string(),
                    segment: segment.to_string(),
                });
            }
        };
    }
    Ok(value)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
