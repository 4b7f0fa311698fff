//! The resumable evaluation machine.
//!
//! Evaluation does not recurse on the host stack. The machine holds a
//! [`Control`] (an expression to evaluate, or a value to hand back) and a
//! stack of [`Kont`] frames, each recording what remains to be done with the
//! value of the subexpression currently being evaluated. Reaching an
//! unanswered placeholder simply stops the loop: the stack already is the
//! rest of the computation, so the machine can be parked and resumed later
//! with the answer, without re-evaluating anything that already finished.

use crate::config::EvaluatorConfig;
use crate::env::{Binding, Environment, FrameId, GlobalFrame, ThunkId, ThunkState};
use crate::error::{EvalError, EvalResult};
use crate::operators;
use crate::trace::{Tape, Trace};
use crate::value::{RecordId, RuntimeValue, TraceValue};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::trace;
use verdict_types::ast::*;
use verdict_types::Value;

#[derive(Debug)]
enum Control {
    Eval { expr: ExprRef, frame: FrameId },
    Return(RuntimeValue),
}

/// Pending work, innermost on top of the stack.
#[derive(Debug)]
enum Kont {
    BinaryRhs {
        op: BinOp,
        rhs: ExprRef,
        frame: FrameId,
    },
    BinaryApply {
        op: BinOp,
        lhs: RuntimeValue,
    },
    UnaryApply {
        op: UnaryOp,
    },
    LogicalRhs {
        op: LogicalOp,
        rhs: ExprRef,
        frame: FrameId,
    },
    LogicalApply {
        op: LogicalOp,
    },
    ConditionalBranch {
        consequent: ExprRef,
        alternate: ExprRef,
        frame: FrameId,
    },
    ConditionalDone {
        consequent: bool,
    },
    AttributeLookup {
        field: String,
    },
    AttributeDone {
        field: String,
    },
    NameDone {
        name: String,
    },
    /// Memoize a delayed expression.
    ThunkDone {
        thunk: ThunkId,
    },
    BlockDone,
    CallCallee {
        args: Vec<ExprRef>,
        frame: FrameId,
    },
    CallDone,
    /// Force every field of a record result, depth-first.
    ForceValue,
    RecordFields {
        record: RecordId,
        next: usize,
    },
}

/// Result of asking for a delayed expression.
enum Forcing {
    /// Already forced; nothing was pushed.
    Ready(RuntimeValue),
    /// First force; the continuation is on the stack.
    Started(Control),
}

enum Step {
    Next(Control),
    Suspend(Rc<Placeholder>),
}

/// Outcome of running the machine until it can go no further.
#[derive(Debug)]
pub(crate) enum Run {
    Done(RuntimeValue),
    Suspended(Rc<Placeholder>),
}

/// One evaluation pass over a program.
#[derive(Debug)]
pub(crate) struct Machine {
    env: Environment,
    stack: Vec<Kont>,
    control: Option<Control>,
    tape: Tape,
    awaiting: Option<Rc<Placeholder>>,
    /// Records whose fields are being forced for the final result.
    open_records: Vec<RecordId>,
    steps: u64,
    gas_limit: u64,
}

impl Machine {
    /// Set up a pass: the root block binds its declarations straight into
    /// the global frame.
    pub(crate) fn new(program: &Program, config: &EvaluatorConfig) -> EvalResult<Self> {
        if program.body.stmts.is_empty() {
            return Err(EvalError::EmptyProgram);
        }
        let mut machine = Self {
            env: Environment::new(),
            stack: vec![Kont::ForceValue],
            control: None,
            tape: Tape::new(config.capture_trace),
            awaiting: None,
            open_records: Vec::new(),
            steps: 0,
            gas_limit: config.gas_limit,
        };
        let global = machine.env.global();
        machine.control = Some(machine.enter_block(&program.body, global)?);
        Ok(machine)
    }

    /// Run until the program reduces to a value or needs an answer that is
    /// not in `answers`.
    pub(crate) fn run(&mut self, answers: &HashMap<String, Value>) -> EvalResult<Run> {
        loop {
            let Some(control) = self.control.take() else {
                return match &self.awaiting {
                    Some(placeholder) => Ok(Run::Suspended(Rc::clone(placeholder))),
                    None => unreachable!("machine stepped after completion"),
                };
            };
            self.steps += 1;
            if self.steps > self.gas_limit {
                return Err(EvalError::GasExhausted);
            }
            trace!(
                step = self.steps,
                depth = self.stack.len(),
                returning = matches!(control, Control::Return(_)),
                "machine step"
            );
            let step = match control {
                Control::Eval { expr, frame } => self.eval(expr, frame, answers)?,
                Control::Return(value) => match self.stack.pop() {
                    Some(kont) => Step::Next(self.apply(kont, value)?),
                    None => return Ok(Run::Done(value)),
                },
            };
            match step {
                Step::Next(next) => self.control = Some(next),
                Step::Suspend(placeholder) => {
                    trace!(question = %placeholder.question, depth = self.stack.len(), "parking machine");
                    self.awaiting = Some(Rc::clone(&placeholder));
                    return Ok(Run::Suspended(placeholder));
                }
            }
        }
    }

    /// Continue from the parked placeholder with its answer. The caller has
    /// already checked the answer's kind.
    pub(crate) fn answer(&mut self, value: &Value) {
        let Some(placeholder) = self.awaiting.take() else {
            return;
        };
        let answer = match value {
            Value::Number(n) => RuntimeValue::Number(*n),
            Value::Boolean(b) => RuntimeValue::Boolean(*b),
            _ => unreachable!("answers are primitive"),
        };
        self.tape.input(&placeholder.question, self.env.snapshot(answer));
        self.control = Some(Control::Return(answer));
    }

    pub(crate) fn steps(&self) -> u64 {
        self.steps
    }

    pub(crate) fn export(&self, value: RuntimeValue) -> Value {
        self.env.export(value)
    }

    pub(crate) fn trace(&self) -> EvalResult<Trace> {
        Ok(self.tape.decode()?)
    }

    pub(crate) fn global_frame(&self) -> GlobalFrame<'_> {
        GlobalFrame::new(&self.env)
    }

    pub(crate) fn env(&self) -> &Environment {
        &self.env
    }

    pub(crate) fn into_env(self) -> Environment {
        self.env
    }

    // ══════════════════════════════════════════════════════════════════════
    // Expressions
    // ══════════════════════════════════════════════════════════════════════

    fn eval(
        &mut self,
        expr: ExprRef,
        frame: FrameId,
        answers: &HashMap<String, Value>,
    ) -> EvalResult<Step> {
        let next = match expr.as_ref() {
            Expr::Literal(literal) => return self.eval_literal(literal, frame, answers),
            Expr::Name(slot) => match self.env.lookup(frame, slot) {
                None => return Err(EvalError::UnboundName(slot.name.clone())),
                Some(Binding::Value(value)) => {
                    self.tape.name(&slot.name, false, self.env.snapshot(value));
                    Control::Return(value)
                }
                Some(Binding::Delayed(thunk)) => {
                    let then = Kont::NameDone {
                        name: slot.name.clone(),
                    };
                    match self.force(thunk, then)? {
                        Forcing::Ready(value) => {
                            self.tape.name(&slot.name, false, self.env.snapshot(value));
                            Control::Return(value)
                        }
                        Forcing::Started(control) => control,
                    }
                }
            },
            Expr::Binary { op, lhs, rhs } => {
                self.stack.push(Kont::BinaryRhs {
                    op: *op,
                    rhs: Rc::clone(rhs),
                    frame,
                });
                Control::Eval {
                    expr: Rc::clone(lhs),
                    frame,
                }
            }
            Expr::Unary { op, operand } => {
                self.stack.push(Kont::UnaryApply { op: *op });
                Control::Eval {
                    expr: Rc::clone(operand),
                    frame,
                }
            }
            Expr::Logical { op, lhs, rhs } => {
                self.stack.push(Kont::LogicalRhs {
                    op: *op,
                    rhs: Rc::clone(rhs),
                    frame,
                });
                Control::Eval {
                    expr: Rc::clone(lhs),
                    frame,
                }
            }
            Expr::Conditional {
                predicate,
                consequent,
                alternate,
            } => {
                self.stack.push(Kont::ConditionalBranch {
                    consequent: Rc::clone(consequent),
                    alternate: Rc::clone(alternate),
                    frame,
                });
                Control::Eval {
                    expr: Rc::clone(predicate),
                    frame,
                }
            }
            Expr::Attribute { base, field } => {
                self.stack.push(Kont::AttributeLookup {
                    field: field.clone(),
                });
                Control::Eval {
                    expr: Rc::clone(base),
                    frame,
                }
            }
            Expr::Block(block) => {
                let inner = self.env.push_frame(frame);
                self.enter_block(block, inner)?
            }
            Expr::Call { callee, args } => {
                self.stack.push(Kont::CallCallee {
                    args: args.clone(),
                    frame,
                });
                Control::Eval {
                    expr: Rc::clone(callee),
                    frame,
                }
            }
        };
        Ok(Step::Next(next))
    }

    fn eval_literal(
        &mut self,
        literal: &Literal,
        frame: FrameId,
        answers: &HashMap<String, Value>,
    ) -> EvalResult<Step> {
        let value = match literal {
            Literal::Number(n) => RuntimeValue::Number(*n),
            Literal::Boolean(b) => RuntimeValue::Boolean(*b),
            Literal::Input(placeholder) => {
                let answer = match answers.get(&placeholder.question) {
                    Some(Value::Number(n)) => RuntimeValue::Number(*n),
                    Some(Value::Boolean(b)) => RuntimeValue::Boolean(*b),
                    _ => return Ok(Step::Suspend(Rc::clone(placeholder))),
                };
                self.tape
                    .input(&placeholder.question, self.env.snapshot(answer));
                return Ok(Step::Next(Control::Return(answer)));
            }
            Literal::Record(record) => {
                // Fields share one frame so they can read each other.
                let inner = self.env.push_frame(frame);
                let mut fields = Vec::with_capacity(record.fields.len());
                for field in &record.fields {
                    let thunk = self.env.delay(&field.name, Rc::clone(&field.value), inner);
                    self.env.declare(inner, &field.slot, Binding::Delayed(thunk));
                    fields.push((field.name.clone(), thunk));
                }
                RuntimeValue::Record(self.env.alloc_record(fields))
            }
            Literal::Function(function) => {
                RuntimeValue::Closure(self.env.alloc_closure(Rc::clone(function), frame))
            }
        };
        self.tape.literal(self.env.snapshot(value));
        Ok(Step::Next(Control::Return(value)))
    }

    /// Bind a block's declarations in `frame` and evaluate its last
    /// expression statement there.
    fn enter_block(&mut self, block: &Block, frame: FrameId) -> EvalResult<Control> {
        if block.stmts.is_empty() {
            return Err(EvalError::EmptyBlock);
        }
        let mut body = None;
        for stmt in &block.stmts {
            match stmt {
                Stmt::Declare { slot, value } => {
                    let binding = match value.as_ref() {
                        // Closures capture the frame they are bound in, so
                        // they can call themselves.
                        Expr::Literal(Literal::Function(function)) => Binding::Value(
                            RuntimeValue::Closure(self.env.alloc_closure(Rc::clone(function), frame)),
                        ),
                        _ => Binding::Delayed(self.env.delay(&slot.name, Rc::clone(value), frame)),
                    };
                    self.env.declare(frame, slot, binding);
                }
                Stmt::Expr(expr) => body = Some(expr),
            }
        }
        match body {
            Some(expr) => {
                self.stack.push(Kont::BlockDone);
                Ok(Control::Eval {
                    expr: Rc::clone(expr),
                    frame,
                })
            }
            None => {
                self.tape.block(false, TraceValue::Undefined);
                Ok(Control::Return(RuntimeValue::Undefined))
            }
        }
    }

    /// Ask for the value of a delayed expression. On first force `then`
    /// runs after the value is memoized; otherwise the caller handles the
    /// ready value itself and `then` is dropped.
    fn force(&mut self, id: ThunkId, then: Kont) -> EvalResult<Forcing> {
        let state = self.env.thunk(id).state.clone();
        match state {
            ThunkState::Forced { value } => Ok(Forcing::Ready(value)),
            ThunkState::Forcing => Err(EvalError::CyclicEvaluation(self.env.thunk(id).label.clone())),
            ThunkState::Unforced => {
                let thunk = self.env.thunk_mut(id);
                thunk.state = ThunkState::Forcing;
                let control = Control::Eval {
                    expr: Rc::clone(&thunk.expr),
                    frame: thunk.frame,
                };
                self.stack.push(then);
                self.stack.push(Kont::ThunkDone { thunk: id });
                Ok(Forcing::Started(control))
            }
        }
    }

    // ══════════════════════════════════════════════════════════════════════
    // Continuations
    // ══════════════════════════════════════════════════════════════════════

    fn apply(&mut self, kont: Kont, value: RuntimeValue) -> EvalResult<Control> {
        let next = match kont {
            Kont::BinaryRhs { op, rhs, frame } => {
                self.stack.push(Kont::BinaryApply { op, lhs: value });
                Control::Eval { expr: rhs, frame }
            }
            Kont::BinaryApply { op, lhs } => {
                let result = operators::binary(op, lhs, value)?;
                self.tape.binary(op, self.env.snapshot(result));
                Control::Return(result)
            }
            Kont::UnaryApply { op } => {
                let result = operators::unary(op, value)?;
                self.tape.unary(op, self.env.snapshot(result));
                Control::Return(result)
            }
            Kont::LogicalRhs { op, rhs, frame } => {
                let lhs = operators::expect_bool(value, &format!("'{op}'"))?;
                let decided = match op {
                    LogicalOp::And => !lhs,
                    LogicalOp::Or => lhs,
                };
                if decided {
                    self.tape.logical(op, false, TraceValue::Boolean(lhs));
                    Control::Return(value)
                } else {
                    self.stack.push(Kont::LogicalApply { op });
                    Control::Eval { expr: rhs, frame }
                }
            }
            Kont::LogicalApply { op } => {
                let rhs = operators::expect_bool(value, &format!("'{op}'"))?;
                self.tape.logical(op, true, TraceValue::Boolean(rhs));
                Control::Return(value)
            }
            Kont::ConditionalBranch {
                consequent,
                alternate,
                frame,
            } => {
                let taken = operators::expect_bool(value, "conditional predicate")?;
                self.stack.push(Kont::ConditionalDone { consequent: taken });
                let expr = if taken { consequent } else { alternate };
                Control::Eval { expr, frame }
            }
            Kont::ConditionalDone { consequent } => {
                self.tape.conditional(consequent, self.env.snapshot(value));
                Control::Return(value)
            }
            Kont::AttributeLookup { field } => {
                let RuntimeValue::Record(record) = value else {
                    return Err(EvalError::TypeMismatch(format!(
                        "cannot access field '{field}' on {}",
                        value.type_name()
                    )));
                };
                let thunk = self
                    .env
                    .record(record)
                    .field(&field)
                    .ok_or_else(|| EvalError::MissingField(field.clone()))?;
                match self.force(thunk, Kont::AttributeDone { field: field.clone() })? {
                    Forcing::Ready(value) => {
                        self.tape.attribute(&field, false, self.env.snapshot(value));
                        Control::Return(value)
                    }
                    Forcing::Started(control) => control,
                }
            }
            Kont::AttributeDone { field } => {
                self.tape.attribute(&field, true, self.env.snapshot(value));
                Control::Return(value)
            }
            Kont::NameDone { name } => {
                self.tape.name(&name, true, self.env.snapshot(value));
                Control::Return(value)
            }
            Kont::ThunkDone { thunk } => {
                self.env.thunk_mut(thunk).state = ThunkState::Forced { value };
                Control::Return(value)
            }
            Kont::BlockDone => {
                self.tape.block(true, self.env.snapshot(value));
                Control::Return(value)
            }
            Kont::CallCallee { args, frame } => self.enter_call(value, args, frame)?,
            Kont::CallDone => {
                self.tape.call(self.env.snapshot(value));
                Control::Return(value)
            }
            Kont::ForceValue => match value {
                RuntimeValue::Record(record) => self.force_fields(record, 0)?,
                _ => Control::Return(value),
            },
            Kont::RecordFields { record, next } => self.force_fields(record, next + 1)?,
        };
        Ok(next)
    }

    /// Arguments are bound lazily: each parameter gets a delayed expression
    /// over the caller's frame, inside a frame nested in the closure's.
    fn enter_call(&mut self, callee: RuntimeValue, args: Vec<ExprRef>, caller: FrameId) -> EvalResult<Control> {
        let RuntimeValue::Closure(id) = callee else {
            return Err(EvalError::NotCallable(callee.type_name()));
        };
        let closure = self.env.closure(id);
        let function = Rc::clone(&closure.function);
        let captured = closure.frame;
        if function.params.len() != args.len() {
            return Err(EvalError::ArityMismatch {
                callee: closure.display_name(),
                expected: function.params.len(),
                found: args.len(),
            });
        }
        let inner = self.env.push_frame(captured);
        for (param, arg) in function.params.iter().zip(args) {
            let thunk = self.env.delay(&param.name, arg, caller);
            self.env.declare(inner, param, Binding::Delayed(thunk));
        }
        self.stack.push(Kont::CallDone);
        Ok(Control::Eval {
            expr: Rc::clone(&function.body),
            frame: inner,
        })
    }

    /// Force field `next` of a record result, or close the record node once
    /// every field is done.
    ///
    /// A record result that contains itself has no finite value, so reaching
    /// a record that is still open fails with the field that led back to it.
    fn force_fields(&mut self, record: RecordId, next: usize) -> EvalResult<Control> {
        if next == 0 {
            if self.open_records.contains(&record) {
                let field = match self.stack.last() {
                    Some(Kont::RecordFields { record: parent, next }) => {
                        self.env.record(*parent).fields.get(*next).map(|(name, _)| name.clone())
                    }
                    _ => None,
                };
                let field = field.unwrap_or_else(|| "record".to_string());
                return Err(EvalError::CyclicEvaluation(field));
            }
            self.open_records.push(record);
        }
        match self.env.record(record).fields.get(next) {
            Some((name, thunk)) => {
                let (name, thunk) = (name.clone(), *thunk);
                self.stack.push(Kont::RecordFields { record, next });
                match self.force(thunk, Kont::ForceValue)? {
                    Forcing::Ready(value) => {
                        self.stack.push(Kont::ForceValue);
                        self.tape.name(&name, false, self.env.snapshot(value));
                        Ok(Control::Return(value))
                    }
                    Forcing::Started(control) => Ok(control),
                }
            }
            None => {
                self.open_records.pop();
                let value = RuntimeValue::Record(record);
                let names = self.env.record(record).field_names();
                self.tape.record(&names, self.env.snapshot(value));
                Ok(Control::Return(value))
            }
        }
    }
}
