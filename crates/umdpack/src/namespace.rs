//! Global namespace paths and their installation.
//!
//! The artifact installs the entry module's export at a dotted path such as
//! `d3.layout.cloud`. [`install_at_path`] is the host-independent model of
//! that walk and [`render_installer`] emits the same walk as JavaScript, so
//! both share one definition of which containers get created.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

use crate::error::BuildError;

/// ECMAScript `IdentifierName`: Unicode `ID_Start`/`ID_Continue` plus `$`, `_`, ZWNJ and ZWJ
static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\p{ID_Start}$_][\p{ID_Continue}$\x{200C}\x{200D}]*$")
        .expect("identifier pattern is valid")
});

/// A validated, non-empty sequence of JavaScript identifier segments
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespacePath {
    segments: Vec<String>,
}

impl NamespacePath {
    pub fn parse(path: &str) -> Result<Self, BuildError> {
        let invalid = |reason: String| BuildError::InvalidNamespace {
            path: path.to_owned(),
            reason,
        };

        if path.trim().is_empty() {
            return Err(invalid("namespace cannot be empty".to_owned()));
        }

        let mut segments = Vec::new();
        for (index, segment) in path.split('.').enumerate() {
            if segment.is_empty() {
                return Err(invalid(format!("segment {} is empty", index + 1)));
            }
            if !IDENTIFIER.is_match(segment) {
                return Err(invalid(format!(
                    "segment '{}' is not a valid identifier",
                    segment
                )));
            }
            segments.push(segment.to_owned());
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The property that receives the exported value
    pub fn leaf(&self) -> &str {
        // parse() never produces an empty path
        self.segments.last().map_or("", String::as_str)
    }

    /// The containers that must exist before the leaf is assigned
    pub fn parents(&self) -> &[String] {
        &self.segments[..self.segments.len().saturating_sub(1)]
    }
}

impl FromStr for NamespacePath {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for NamespacePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// Properties of a host object, in insertion order
pub type HostObject = IndexMap<String, HostValue>;

/// Minimal model of the values found on a host's global object
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Object(HostObject),
    /// Functions carry their own properties, like any JavaScript object
    Function(HostObject),
}

impl HostValue {
    pub fn object() -> Self {
        Self::Object(HostObject::new())
    }

    /// JavaScript truthiness; objects and functions are always truthy
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::Object(_) | Self::Function(_) => true,
        }
    }

    fn properties_mut(&mut self) -> Option<&mut HostObject> {
        match self {
            Self::Object(props) | Self::Function(props) => Some(props),
            _ => None,
        }
    }

    fn properties(&self) -> Option<&HostObject> {
        match self {
            Self::Object(props) | Self::Function(props) => Some(props),
            _ => None,
        }
    }
}

/// Reasons the model refuses an installation the host would silently lose
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstallError {
    #[error("namespace segment '{segment}' holds a primitive value and cannot carry properties")]
    PrimitiveSegment { segment: String },
}

/// Assign `value` at `path` below `root`.
///
/// Missing or falsy intermediate segments become plain empty containers.
/// Existing objects and functions are reused, so their other properties
/// survive. The leaf is overwritten unconditionally: last writer wins.
pub fn install_at_path(
    root: &mut HostObject,
    path: &NamespacePath,
    value: HostValue,
) -> Result<(), InstallError> {
    let mut current = root;
    for segment in path.parents() {
        let slot = current
            .entry(segment.clone())
            .or_insert(HostValue::Undefined);
        if !slot.is_truthy() {
            *slot = HostValue::object();
        }
        current = slot
            .properties_mut()
            .ok_or_else(|| InstallError::PrimitiveSegment {
                segment: segment.clone(),
            })?;
    }

    current.insert(path.leaf().to_owned(), value);
    Ok(())
}

/// Read the value at `path`, if every segment exists
pub fn lookup<'a>(root: &'a HostObject, path: &NamespacePath) -> Option<&'a HostValue> {
    let mut current = root;
    for segment in path.parents() {
        current = current.get(segment)?.properties()?;
    }
    current.get(path.leaf())
}

/// Render the JavaScript statements that perform [`install_at_path`] on the
/// object named `host`, assigning the result of `value_expr` to the leaf.
pub fn render_installer(path: &NamespacePath, host: &str, value_expr: &str) -> String {
    let mut out = format!("var ns = {};\n", host);
    for segment in path.parents() {
        let key = quote(segment);
        out.push_str(&format!("ns = ns[{key}] || (ns[{key}] = {{}});\n"));
    }
    out.push_str(&format!("ns[{}] = {};\n", quote(path.leaf()), value_expr));
    out
}

fn quote(segment: &str) -> String {
    // identifiers are ASCII-only, so a JSON string is a valid JS string literal
    serde_json::to_string(segment).unwrap_or_else(|_| format!("\"{}\"", segment))
}
