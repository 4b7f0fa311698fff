//! The host-facing evaluator.
//!
//! [`EvaluatorContext`] owns a program, the answers given so far and at most
//! one parked pass. Each call to [`evaluate`](EvaluatorContext::evaluate)
//! starts a fresh pass that reads cached answers and parks on the first
//! question it cannot answer; [`resume`](EvaluatorContext::resume) continues
//! that pass from where it stopped.

use crate::config::EvaluatorConfig;
use crate::env::{Environment, GlobalFrame};
use crate::error::{EvalError, EvalResult};
use crate::event::{Continuation, InputEvent, OutputEvent, Status};
use crate::machine::{Machine, Run};
use crate::value::RuntimeValue;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;
use verdict_types::ast::{Placeholder, Program};
use verdict_types::{InputKind, Value};

/// Handler for one question's input events.
pub type InputHandler = Box<dyn FnMut(InputEvent, GlobalFrame<'_>)>;

/// Handler for pass outcomes.
pub type FiniHandler = Box<dyn FnMut(OutputEvent, GlobalFrame<'_>)>;

/// Handler for passes that end without a value.
pub type UndefinedHandler = Box<dyn FnMut()>;

/// A pass parked on a question, with the token that may resume it.
struct Pending {
    machine: Machine,
    continuation: Continuation,
}

pub struct EvaluatorContext {
    program: Program,
    config: EvaluatorConfig,
    placeholders: Vec<Rc<Placeholder>>,
    answers: HashMap<String, Value>,
    pending: Option<Pending>,
    handlers: HashMap<String, InputHandler>,
    fini: Option<FiniHandler>,
    undefined: Option<UndefinedHandler>,
    /// Environment of the last finished pass, kept for inspection.
    last_env: Option<Environment>,
    /// Bumped whenever parked passes are discarded.
    generation: u64,
    next_ticket: u64,
    status: Status,
}

impl EvaluatorContext {
    pub fn new(program: Program) -> Self {
        Self::with_config(program, EvaluatorConfig::default())
    }

    pub fn with_config(program: Program, config: EvaluatorConfig) -> Self {
        let placeholders = program.placeholders();
        Self {
            program,
            config,
            placeholders,
            answers: HashMap::new(),
            pending: None,
            handlers: HashMap::new(),
            fini: None,
            undefined: None,
            last_env: None,
            generation: 0,
            next_ticket: 0,
            status: Status::Idle,
        }
    }

    // ══════════════════════════════════════════════════════════════════════
    // Registration
    // ══════════════════════════════════════════════════════════════════════

    /// Register the handler for `question`, replacing any earlier one.
    pub fn register_input_callback<F>(&mut self, question: &str, handler: F) -> EvalResult<()>
    where
        F: FnMut(InputEvent, GlobalFrame<'_>) + 'static,
    {
        self.placeholder(question)?;
        self.handlers.insert(question.to_string(), Box::new(handler));
        Ok(())
    }

    pub fn on_fini<F>(&mut self, handler: F)
    where
        F: FnMut(OutputEvent, GlobalFrame<'_>) + 'static,
    {
        self.fini = Some(Box::new(handler));
    }

    pub fn on_undefined<F>(&mut self, handler: F)
    where
        F: FnMut() + 'static,
    {
        self.undefined = Some(Box::new(handler));
    }

    // ══════════════════════════════════════════════════════════════════════
    // Driving
    // ══════════════════════════════════════════════════════════════════════

    /// Start a new pass over the program.
    ///
    /// Any parked pass is dropped and its continuation goes stale. Answered
    /// questions are read from the cache without another request.
    pub fn evaluate(&mut self) -> EvalResult<Status> {
        self.discard_pending();
        debug!(
            generation = self.generation,
            answered = self.answers.len(),
            "starting evaluation pass"
        );
        match Machine::new(&self.program, &self.config) {
            Ok(machine) => self.drive(machine),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Answer the question `continuation` is parked on and continue the pass.
    ///
    /// A kind mismatch is reported without consuming the continuation.
    pub fn resume(&mut self, continuation: &Continuation, value: Value) -> EvalResult<Status> {
        let question = continuation.question.clone();
        if continuation.generation != self.generation {
            return Err(EvalError::StaleContinuation(question));
        }
        let Some(pending) = &self.pending else {
            return Err(EvalError::ContinuationConsumed(question));
        };
        if pending.continuation.ticket != continuation.ticket {
            // Same pass, but an earlier parking point.
            return Err(EvalError::ContinuationConsumed(question));
        }
        check_kind(&question, continuation.kind, &value)?;

        let Some(Pending { mut machine, .. }) = self.pending.take() else {
            return Err(EvalError::ContinuationConsumed(question));
        };
        debug!(question = %question, answer = %value, "resuming");
        machine.answer(&value);
        self.answers.insert(question, value);
        self.drive(machine)
    }

    /// Answer `question` without holding its continuation.
    ///
    /// If the parked pass is waiting on `question` this resumes it.
    /// Otherwise the answer is cached for later passes and the status is
    /// unchanged.
    pub fn provide(&mut self, question: &str, value: Value) -> EvalResult<Status> {
        if let Some(pending) = &self.pending {
            if pending.continuation.question == question {
                let continuation = pending.continuation.clone();
                return self.resume(&continuation, value);
            }
        }
        let kind = self.placeholder(question)?.kind;
        if self.answers.contains_key(question) {
            return Err(EvalError::AlreadyAnswered(question.to_string()));
        }
        check_kind(question, kind, &value)?;
        debug!(question, answer = %value, "answer cached ahead of request");
        self.answers.insert(question.to_string(), value);
        Ok(self.status.clone())
    }

    /// Confirm the answer to `question`. Only the handler is told.
    pub fn validate(&mut self, question: &str) -> EvalResult<()> {
        self.placeholder(question)?;
        debug!(question, "validated");
        self.notify(question, InputEvent::Validate);
        Ok(())
    }

    /// Withdraw the answer to `question`.
    ///
    /// Every parked pass and memoized value is dropped, since any of them
    /// may depend on the answer. The next [`evaluate`](Self::evaluate)
    /// requests the question again if the program still needs it.
    pub fn invalidate(&mut self, question: &str) -> EvalResult<()> {
        self.placeholder(question)?;
        let previous = self.answers.remove(question);
        debug!(question, had_answer = previous.is_some(), "invalidated");
        self.discard_pending();
        self.last_env = None;
        self.status = Status::Idle;
        self.notify(question, InputEvent::Invalidate);
        Ok(())
    }

    fn drive(&mut self, mut machine: Machine) -> EvalResult<Status> {
        let run = match machine.run(&self.answers) {
            Ok(run) => run,
            Err(err) => return Err(self.fail(err)),
        };
        match run {
            Run::Done(RuntimeValue::Undefined) => {
                debug!(steps = machine.steps(), "pass finished without a value");
                self.last_env = Some(machine.into_env());
                self.status = Status::Undefined;
                if let Some(handler) = self.undefined.as_mut() {
                    handler();
                }
            }
            Run::Done(result) => {
                let value = machine.export(result);
                let trace = match machine.trace() {
                    Ok(trace) => trace,
                    Err(err) => return Err(self.fail(err)),
                };
                debug!(steps = machine.steps(), %value, "pass complete");
                if let Some(fini) = self.fini.as_mut() {
                    fini(
                        OutputEvent::Result {
                            value: value.clone(),
                            trace,
                        },
                        machine.global_frame(),
                    );
                }
                self.last_env = Some(machine.into_env());
                self.status = Status::Complete(value);
            }
            Run::Suspended(placeholder) => self.park(machine, &placeholder)?,
        }
        Ok(self.status.clone())
    }

    fn park(&mut self, machine: Machine, placeholder: &Placeholder) -> EvalResult<()> {
        let question = placeholder.question.clone();
        self.next_ticket += 1;
        let continuation = Continuation {
            question: question.clone(),
            kind: placeholder.kind,
            generation: self.generation,
            ticket: self.next_ticket,
        };
        debug!(question = %question, steps = machine.steps(), "suspended on input");

        match self.handlers.get_mut(&question) {
            Some(handler) => handler(InputEvent::Request(continuation.clone()), machine.global_frame()),
            None if self.config.require_handlers => {
                return Err(self.fail(EvalError::NoHandler(question)));
            }
            None => {}
        }

        let waiting: Vec<Placeholder> = self.unresolved().into_iter().cloned().collect();
        let pending = self.pending.insert(Pending {
            machine,
            continuation,
        });
        if let Some(fini) = self.fini.as_mut() {
            fini(OutputEvent::Waiting(waiting), pending.machine.global_frame());
        }
        self.status = Status::Waiting { question };
        Ok(())
    }

    fn discard_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!(question = %pending.continuation.question, "dropping parked pass");
        }
        self.generation += 1;
    }

    fn fail(&mut self, err: EvalError) -> EvalError {
        debug!(error = %err, "evaluation failed");
        self.status = Status::Idle;
        err
    }

    fn notify(&mut self, question: &str, event: InputEvent) {
        let frame = current_frame(&self.pending, &self.last_env);
        if let Some(handler) = self.handlers.get_mut(question) {
            handler(event, frame);
        }
    }

    fn placeholder(&self, question: &str) -> EvalResult<&Placeholder> {
        self.placeholders
            .iter()
            .find(|p| p.question == question)
            .map(|p| p.as_ref())
            .ok_or_else(|| EvalError::UnknownQuestion(question.to_string()))
    }

    // ══════════════════════════════════════════════════════════════════════
    // Introspection
    // ══════════════════════════════════════════════════════════════════════

    /// Every placeholder in the program, in tree order.
    pub fn placeholders(&self) -> Vec<&Placeholder> {
        self.placeholders.iter().map(|p| p.as_ref()).collect()
    }

    /// Placeholders with no cached answer.
    pub fn unresolved(&self) -> Vec<&Placeholder> {
        self.placeholders
            .iter()
            .filter(|p| !self.answers.contains_key(&p.question))
            .map(|p| p.as_ref())
            .collect()
    }

    pub fn answer(&self, question: &str) -> Option<&Value> {
        self.answers.get(question)
    }

    /// The continuation of the parked pass, if any.
    pub fn pending(&self) -> Option<&Continuation> {
        self.pending.as_ref().map(|p| &p.continuation)
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Global bindings of the parked pass, or of the last finished one.
    pub fn global_frame(&self) -> GlobalFrame<'_> {
        current_frame(&self.pending, &self.last_env)
    }
}

fn current_frame<'a>(pending: &'a Option<Pending>, last_env: &'a Option<Environment>) -> GlobalFrame<'a> {
    match (pending, last_env) {
        (Some(pending), _) => GlobalFrame::new(pending.machine.env()),
        (None, Some(env)) => GlobalFrame::new(env),
        (None, None) => GlobalFrame::empty(),
    }
}

fn check_kind(question: &str, expected: InputKind, value: &Value) -> EvalResult<()> {
    if value.input_kind() == Some(expected) {
        Ok(())
    } else {
        Err(EvalError::InputKindMismatch {
            question: question.to_string(),
            expected,
            found: value.type_name(),
        })
    }
}
