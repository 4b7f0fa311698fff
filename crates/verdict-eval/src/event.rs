//! Events exchanged with the host.

use crate::trace::Trace;
use verdict_types::ast::Placeholder;
use verdict_types::{InputKind, Value};

/// Handle to a pass parked on one question.
///
/// Passing it back to [`EvaluatorContext::resume`](crate::EvaluatorContext::resume)
/// with an answer continues the pass where it stopped. A continuation can be
/// used once, and only while its pass is current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation {
    pub(crate) question: String,
    pub(crate) kind: InputKind,
    pub(crate) generation: u64,
    pub(crate) ticket: u64,
}

impl Continuation {
    pub fn question(&self) -> &str {
        &self.question
    }

    /// The kind of answer the question accepts.
    pub fn kind(&self) -> InputKind {
        self.kind
    }
}

/// Sent to the handler registered for a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// Evaluation needs an answer and is parked until it gets one.
    Request(Continuation),
    /// The host confirmed the current answer.
    Validate,
    /// The answer was withdrawn; anything derived from it is void.
    Invalidate,
}

/// Sent to the finish handler at the end of each pass or suspension.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    /// The program produced a value.
    Result { value: Value, trace: Trace },
    /// Evaluation is blocked; these placeholders still have no answer.
    Waiting(Vec<Placeholder>),
}

/// Where the context stands after the last operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// No pass has run, or the last one was invalidated or failed.
    Idle,
    /// A pass is parked on `question`.
    Waiting { question: String },
    Complete(Value),
    /// The program ran to the end without producing a value.
    Undefined,
}

impl Status {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }

    /// The question a parked pass is waiting on.
    pub fn waiting_on(&self) -> Option<&str> {
        match self {
            Self::Waiting { question } => Some(question),
            _ => None,
        }
    }
}
