//! Shared types for Verdict.
//!
//! This crate defines the resolved expression tree handed to the evaluator,
//! user-input placeholders, the host-facing value model, and a builder for
//! constructing resolved programs without a front end.

mod error;
mod value;
pub mod ast;
pub mod builder;

pub use error::BuildError;
pub use value::{InputKind, Value};

/// Result type used by the program builder.
pub type Result<T> = std::result::Result<T, BuildError>;
