//! Resumable evaluator for Verdict rule programs.
//!
//! Programs are resolved expression trees built with
//! [`verdict_types::builder`]. Evaluation runs on an explicit state machine
//! instead of the host call stack, so it can stop at a question the host has
//! not answered yet and continue from the same point once it has. Answers
//! are cached per question, every pass records a derivation trace, and
//! answers can be withdrawn with [`EvaluatorContext::invalidate`].
//!
//! ```
//! use verdict_eval::{EvaluatorContext, Status};
//! use verdict_types::ast::BinOp;
//! use verdict_types::builder::{self as b, ProgramBuilder};
//! use verdict_types::{InputKind, Value};
//!
//! let mut pb = ProgramBuilder::new();
//! let age = pb.input("age", InputKind::Number, "How old are you?").unwrap();
//! let program = pb.finish(vec![b::expr(b::binary(BinOp::GreaterEq, age, b::number(18)))]);
//!
//! let mut ctx = EvaluatorContext::new(program);
//! assert_eq!(ctx.evaluate().unwrap().waiting_on(), Some("age"));
//! let status = ctx.provide("age", Value::Number(21)).unwrap();
//! assert_eq!(status, Status::Complete(Value::Boolean(true)));
//! ```

mod config;
mod context;
mod env;
mod error;
mod event;
mod machine;
mod operators;
mod trace;
mod value;

pub use config::EvaluatorConfig;
pub use context::{EvaluatorContext, FiniHandler, InputHandler, UndefinedHandler};
pub use env::GlobalFrame;
pub use error::{EvalError, EvalResult, TraceError};
pub use event::{Continuation, InputEvent, OutputEvent, Status};
pub use trace::{FieldTrace, NodeId, Trace, TraceKind, TraceNode};
pub use value::TraceValue;
