//! Program construction errors.

use crate::InputKind;
use thiserror::Error;

/// Errors raised while assembling a resolved program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// The same question was declared with two different kinds.
    #[error("question '{question}' declared as {first} and as {second}")]
    ConflictingPlaceholder {
        question: String,
        first: InputKind,
        second: InputKind,
    },

    /// A record literal names the same field twice.
    #[error("duplicate field '{0}' in record literal")]
    DuplicateField(String),

    /// A function literal names the same parameter twice.
    #[error("duplicate parameter '{0}' in function literal")]
    DuplicateParam(String),
}
