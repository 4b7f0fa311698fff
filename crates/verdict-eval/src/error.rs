//! Runtime error types for the Verdict evaluator.

use crate::trace::TraceKind;
use thiserror::Error;
use verdict_types::InputKind;

/// Evaluation error. Every variant is fatal to the current pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// Operand kinds wrong for an operator, predicate or access.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// A slot with no binding in any enclosing frame.
    #[error("unbound name: {0}")]
    UnboundName(String),

    /// Attribute access on a record without that field.
    #[error("record has no field '{0}'")]
    MissingField(String),

    /// Call on something that is not a closure.
    #[error("cannot call {0}")]
    NotCallable(&'static str),

    #[error("{callee} expects {expected} argument(s), got {found}")]
    ArityMismatch {
        callee: String,
        expected: usize,
        found: usize,
    },

    #[error("division by zero")]
    DivisionByZero,

    /// Integer overflow in arithmetic.
    #[error("arithmetic overflow in '{0}'")]
    Overflow(&'static str),

    #[error("block has no statements")]
    EmptyBlock,

    #[error("program has no statements")]
    EmptyProgram,

    /// A delayed expression (or record) needed its own value to finish.
    #[error("cyclic evaluation of '{0}'")]
    CyclicEvaluation(String),

    /// An answer whose kind differs from the question's declared kind.
    #[error("question '{question}' expects a {expected}, got {found}")]
    InputKindMismatch {
        question: String,
        expected: InputKind,
        found: &'static str,
    },

    /// A question the program never asks.
    #[error("unknown question '{0}'")]
    UnknownQuestion(String),

    /// Handlers are required and none is registered for the question.
    #[error("no input handler registered for question '{0}'")]
    NoHandler(String),

    /// The question already has an answer; invalidate it first.
    #[error("question '{0}' is already answered")]
    AlreadyAnswered(String),

    /// The continuation belongs to an earlier pass or was invalidated.
    #[error("stale continuation for question '{0}'")]
    StaleContinuation(String),

    /// The continuation was already used to answer its question.
    #[error("continuation for question '{0}' was already resumed")]
    ContinuationConsumed(String),

    /// Step limit reached.
    #[error("gas exhausted")]
    GasExhausted,

    #[error("malformed trace: {0}")]
    MalformedTrace(#[from] TraceError),
}

/// Trace decoding failures. These mean the evaluator recorded an
/// inconsistent token stream and are never expected in a correct build.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceError {
    #[error("node is missing its {0}")]
    MissingAttribute(&'static str),

    #[error("expected {expected}, found {found}")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
    },

    #[error("{0:?} node is missing a child")]
    MissingChild(TraceKind),

    #[error("token stream ends inside a node")]
    UnterminatedNode,

    #[error("{0} node(s) left beside the root")]
    TrailingNodes(usize),
}

/// Result alias for evaluator operations.
pub type EvalResult<T> = Result<T, EvalError>;
