//! Runtime values.
//!
//! Records and closures live in the pass's [`Environment`](crate::env::Environment)
//! arena; values refer to them by index, which keeps `RuntimeValue` `Copy`.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct RecordId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct ClosureId(pub(crate) usize);

/// A value produced during evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RuntimeValue {
    Number(i64),
    Boolean(bool),
    Record(RecordId),
    Closure(ClosureId),
    /// A block that declared names but produced nothing.
    Undefined,
}

impl RuntimeValue {
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::Boolean(_) => "boolean",
            Self::Record(_) => "record",
            Self::Closure(_) => "function",
            Self::Undefined => "undefined",
        }
    }
}

/// The result recorded at a trace node.
///
/// Records are summarized by their field names: a record's fields may not
/// have been forced when the node completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum TraceValue {
    Number(i64),
    Boolean(bool),
    Record(Vec<String>),
    Function(Option<String>),
    Undefined,
}

impl fmt::Display for TraceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Record(fields) => write!(f, "{{{}}}", fields.join(", ")),
            Self::Function(Some(name)) => write!(f, "<fn {name}>"),
            Self::Function(None) => write!(f, "<fn>"),
            Self::Undefined => write!(f, "undefined"),
        }
    }
}
