//! Host protocol: requests, suspension and resumption, answer caching,
//! validation and invalidation, and the finish events.

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;
use verdict_eval::{
    Continuation, EvalError, EvaluatorContext, InputEvent, NodeId, OutputEvent, Status, Trace, TraceKind,
};
use verdict_types::ast::{BinOp, ExprRef, Program};
use verdict_types::builder::{self as b, ProgramBuilder};
use verdict_types::{InputKind, Value};

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

type Log<T> = Rc<RefCell<Vec<T>>>;

/// A context with a recording handler on every question and on finish.
struct Host {
    ctx: EvaluatorContext,
    inputs: Log<(String, InputEvent)>,
    outputs: Log<OutputEvent>,
    /// Values of `watch` in the global frame, seen at each request.
    watched: Log<Option<Value>>,
}

impl Host {
    fn new(program: Program) -> Self {
        Self::watching(program, "")
    }

    fn watching(program: Program, watch: &str) -> Self {
        init_logging();
        let inputs: Log<(String, InputEvent)> = Rc::default();
        let outputs: Log<OutputEvent> = Rc::default();
        let watched: Log<Option<Value>> = Rc::default();
        let mut ctx = EvaluatorContext::new(program);

        let questions: Vec<String> = ctx.placeholders().iter().map(|p| p.question.clone()).collect();
        for question in questions {
            let log = Rc::clone(&inputs);
            let seen = Rc::clone(&watched);
            let watch = watch.to_string();
            let name = question.clone();
            ctx.register_input_callback(&question, move |event, frame| {
                if matches!(event, InputEvent::Request(_)) && !watch.is_empty() {
                    seen.borrow_mut().push(frame.get(&watch));
                }
                log.borrow_mut().push((name.clone(), event));
            })
            .unwrap();
        }
        let log = Rc::clone(&outputs);
        ctx.on_fini(move |event, _| log.borrow_mut().push(event));

        Self {
            ctx,
            inputs,
            outputs,
            watched,
        }
    }

    /// Questions requested so far, in order.
    fn requests(&self) -> Vec<String> {
        self.inputs
            .borrow()
            .iter()
            .filter(|(_, event)| matches!(event, InputEvent::Request(_)))
            .map(|(question, _)| question.clone())
            .collect()
    }

    /// The most recent continuation handed to a handler.
    fn last_request(&self) -> Continuation {
        self.inputs
            .borrow()
            .iter()
            .rev()
            .find_map(|(_, event)| match event {
                InputEvent::Request(continuation) => Some(continuation.clone()),
                _ => None,
            })
            .expect("no request raised")
    }

    fn last_trace(&self) -> Trace {
        self.outputs
            .borrow()
            .iter()
            .rev()
            .find_map(|event| match event {
                OutputEvent::Result { trace, .. } => Some(trace.clone()),
                OutputEvent::Waiting(_) => None,
            })
            .expect("no result delivered")
    }
}

fn sum_of_inputs() -> Program {
    let mut pb = ProgramBuilder::new();
    let a = pb.input("a", InputKind::Number, "First number?").unwrap();
    let c = pb.input("b", InputKind::Number, "Second number?").unwrap();
    pb.finish(vec![b::expr(b::binary(BinOp::Add, a, c))])
}

fn num(n: i64) -> Value {
    Value::Number(n)
}

/// Node kinds of a trace, with answered inputs counted as literals.
fn shape(trace: &Trace, id: NodeId) -> String {
    let node = trace.node(id);
    let kind = match node.kind() {
        TraceKind::Input => TraceKind::Literal,
        kind => kind,
    };
    let children: Vec<String> = node.children().into_iter().map(|child| shape(trace, child)).collect();
    format!("{kind:?}[{}]", children.join(","))
}

fn root_shape(trace: &Trace) -> String {
    trace.root_id().map(|id| shape(trace, id)).unwrap_or_default()
}

// ══════════════════════════════════════════════════════════════════════════════
// Suspension and resumption
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_suspends_on_first_unanswered_input() {
    let mut host = Host::new(sum_of_inputs());
    let status = host.ctx.evaluate().unwrap();
    assert_eq!(status, Status::Waiting { question: "a".into() });
    assert_eq!(host.requests(), vec!["a"]);
    assert_eq!(host.ctx.pending().map(|c| c.question()), Some("a"));
}

#[test]
fn test_resume_continues_to_result() {
    let mut host = Host::new(sum_of_inputs());
    host.ctx.evaluate().unwrap();

    let first = host.last_request();
    assert_eq!(first.kind(), InputKind::Number);
    let status = host.ctx.resume(&first, num(2)).unwrap();
    assert_eq!(status.waiting_on(), Some("b"));

    let second = host.last_request();
    let status = host.ctx.resume(&second, num(7)).unwrap();
    assert_eq!(status, Status::Complete(num(9)));
    assert_eq!(host.requests(), vec!["a", "b"]);
    assert_eq!(host.last_trace().to_string(), "{ ([a: 2] + [b: 7] => 9) }");
    assert_eq!(host.last_trace().inputs(), vec!["a", "b"]);
}

#[test]
fn test_waiting_event_lists_unresolved() {
    let mut host = Host::new(sum_of_inputs());
    host.ctx.evaluate().unwrap();
    host.ctx.provide("a", num(1)).unwrap();

    let outputs = host.outputs.borrow();
    let waiting: Vec<Vec<String>> = outputs
        .iter()
        .filter_map(|event| match event {
            OutputEvent::Waiting(placeholders) => {
                Some(placeholders.iter().map(|p| p.question.clone()).collect())
            }
            OutputEvent::Result { .. } => None,
        })
        .collect();
    assert_eq!(waiting, vec![vec!["a".to_string(), "b".to_string()], vec!["b".to_string()]]);
}

#[test]
fn test_handler_sees_forced_globals() {
    let mut pb = ProgramBuilder::new();
    let x = pb.slot("x");
    let y = pb.slot("y");
    let q = pb.input("q", InputKind::Number, "").unwrap();
    let program = pb.finish(vec![
        b::declare(&x, b::binary(BinOp::Mul, b::number(5), b::number(2))),
        b::declare(&y, b::binary(BinOp::Add, b::name(&x), q)),
        b::expr(b::name(&y)),
    ]);

    let mut host = Host::watching(program, "x");
    host.ctx.evaluate().unwrap();
    assert_eq!(*host.watched.borrow(), vec![Some(num(10))]);
    assert_eq!(host.ctx.global_frame().get("y"), None);

    host.ctx.provide("q", num(1)).unwrap();
    assert_eq!(host.ctx.global_frame().get("y"), Some(num(11)));
}

#[test]
fn test_resumed_pass_does_not_redo_finished_work() {
    let calls = Rc::new(RefCell::new(0));
    let mut pb = ProgramBuilder::new();
    let q = pb.input("q", InputKind::Boolean, "").unwrap();
    let r = pb.input("r", InputKind::Boolean, "").unwrap();
    let program = pb.finish(vec![b::expr(b::and(q, r))]);

    let mut ctx = EvaluatorContext::new(program);
    let counter = Rc::clone(&calls);
    ctx.register_input_callback("q", move |_, _| *counter.borrow_mut() += 1)
        .unwrap();
    ctx.evaluate().unwrap();
    ctx.provide("q", Value::Boolean(true)).unwrap();
    let status = ctx.provide("r", Value::Boolean(true)).unwrap();

    assert_eq!(status, Status::Complete(Value::Boolean(true)));
    assert_eq!(*calls.borrow(), 1);
}

// ══════════════════════════════════════════════════════════════════════════════
// Caching
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_repeated_question_asked_once() {
    let mut pb = ProgramBuilder::new();
    let q1 = pb.input("q", InputKind::Number, "").unwrap();
    let q2 = pb.input("q", InputKind::Number, "").unwrap();
    let program = pb.finish(vec![b::expr(b::binary(BinOp::Mul, q1, q2))]);

    let mut host = Host::new(program);
    host.ctx.evaluate().unwrap();
    let status = host.ctx.provide("q", num(4)).unwrap();
    assert_eq!(status, Status::Complete(num(16)));
    assert_eq!(host.requests(), vec!["q"]);
}

#[test]
fn test_reevaluate_uses_cache() {
    let mut host = Host::new(sum_of_inputs());
    host.ctx.evaluate().unwrap();
    host.ctx.provide("a", num(1)).unwrap();
    host.ctx.provide("b", num(2)).unwrap();

    let status = host.ctx.evaluate().unwrap();
    assert_eq!(status, Status::Complete(num(3)));
    assert_eq!(host.requests(), vec!["a", "b"]);
}

#[test]
fn test_answers_given_ahead_are_not_requested() {
    let mut host = Host::new(sum_of_inputs());
    host.ctx.provide("b", num(5)).unwrap();
    host.ctx.evaluate().unwrap();
    let status = host.ctx.provide("a", num(1)).unwrap();
    assert_eq!(status, Status::Complete(num(6)));
    assert_eq!(host.requests(), vec!["a"]);
}

#[test]
fn test_short_circuit_never_requests() {
    let mut pb = ProgramBuilder::new();
    let q = pb.input("q", InputKind::Boolean, "").unwrap();
    let program = pb.finish(vec![b::expr(b::or(
        b::and(b::boolean(false), q),
        b::binary(BinOp::Eq, b::number(1), b::number(1)),
    ))]);

    let mut host = Host::new(program);
    assert_eq!(host.ctx.evaluate().unwrap(), Status::Complete(Value::Boolean(true)));
    assert!(host.requests().is_empty());
    assert_eq!(host.last_trace().inputs(), Vec::<&str>::new());
}

#[test]
fn test_untaken_branch_never_requests() {
    let mut pb = ProgramBuilder::new();
    let flag = pb.input("flag", InputKind::Boolean, "").unwrap();
    let then_q = pb.input("then", InputKind::Number, "").unwrap();
    let else_q = pb.input("else", InputKind::Number, "").unwrap();
    let program = pb.finish(vec![b::expr(b::conditional(flag, then_q, else_q))]);

    let mut host = Host::new(program);
    host.ctx.evaluate().unwrap();
    host.ctx.provide("flag", Value::Boolean(false)).unwrap();
    let status = host.ctx.provide("else", num(3)).unwrap();
    assert_eq!(status, Status::Complete(num(3)));
    assert_eq!(host.requests(), vec!["flag", "else"]);
    assert_eq!(
        host.ctx.unresolved().iter().map(|p| p.question.as_str()).collect::<Vec<_>>(),
        vec!["then"]
    );
}

// ══════════════════════════════════════════════════════════════════════════════
// Continuation misuse
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_resume_twice_is_rejected() {
    let mut host = Host::new(sum_of_inputs());
    host.ctx.evaluate().unwrap();
    let first = host.last_request();
    host.ctx.resume(&first, num(1)).unwrap();
    assert_eq!(
        host.ctx.resume(&first, num(1)),
        Err(EvalError::ContinuationConsumed("a".into()))
    );
    assert_eq!(host.ctx.answer("a"), Some(&num(1)));
}

#[test]
fn test_continuation_from_earlier_pass_is_stale() {
    let mut host = Host::new(sum_of_inputs());
    host.ctx.evaluate().unwrap();
    let old = host.last_request();
    host.ctx.evaluate().unwrap();
    assert_eq!(
        host.ctx.resume(&old, num(1)),
        Err(EvalError::StaleContinuation("a".into()))
    );
    let fresh = host.last_request();
    assert_eq!(host.ctx.resume(&fresh, num(1)).unwrap().waiting_on(), Some("b"));
}

#[test]
fn test_kind_mismatch_keeps_pass_parked() {
    let mut host = Host::new(sum_of_inputs());
    host.ctx.evaluate().unwrap();
    let continuation = host.last_request();
    assert_eq!(
        host.ctx.resume(&continuation, Value::Boolean(true)),
        Err(EvalError::InputKindMismatch {
            question: "a".into(),
            expected: InputKind::Number,
            found: "boolean",
        })
    );
    assert!(host.ctx.answer("a").is_none());
    assert_eq!(host.ctx.resume(&continuation, num(3)).unwrap().waiting_on(), Some("b"));
}

#[test]
fn test_unknown_question() {
    let mut host = Host::new(sum_of_inputs());
    assert_eq!(
        host.ctx.provide("zzz", num(1)),
        Err(EvalError::UnknownQuestion("zzz".into()))
    );
    assert_eq!(host.ctx.invalidate("zzz"), Err(EvalError::UnknownQuestion("zzz".into())));
}

// ══════════════════════════════════════════════════════════════════════════════
// Validation and invalidation
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_invalidation_re_suspends() {
    let mut host = Host::new(sum_of_inputs());
    host.ctx.evaluate().unwrap();
    host.ctx.provide("a", num(1)).unwrap();
    host.ctx.provide("b", num(2)).unwrap();
    assert!(host.ctx.status().is_complete());

    host.ctx.invalidate("b").unwrap();
    assert_eq!(host.ctx.status(), &Status::Idle);
    assert_eq!(host.ctx.answer("b"), None);
    assert_eq!(host.ctx.global_frame().names(), Vec::<&str>::new());

    let status = host.ctx.evaluate().unwrap();
    assert_eq!(status.waiting_on(), Some("b"));
    assert_eq!(host.requests(), vec!["a", "b", "b"]);

    let status = host.ctx.provide("b", num(10)).unwrap();
    assert_eq!(status, Status::Complete(num(11)));
}

#[test]
fn test_invalidation_stales_parked_pass() {
    let mut host = Host::new(sum_of_inputs());
    host.ctx.evaluate().unwrap();
    host.ctx.provide("a", num(1)).unwrap();
    let waiting_on_b = host.last_request();

    host.ctx.invalidate("a").unwrap();
    assert!(host.ctx.pending().is_none());
    assert_eq!(
        host.ctx.resume(&waiting_on_b, num(2)),
        Err(EvalError::StaleContinuation("b".into()))
    );
}

#[test]
fn test_invalidation_forgets_memoized_values() {
    let mut pb = ProgramBuilder::new();
    let doubled = pb.slot("doubled");
    let q = pb.input("q", InputKind::Number, "").unwrap();
    let program = pb.finish(vec![
        b::declare(&doubled, b::binary(BinOp::Mul, q, b::number(2))),
        b::expr(b::binary(BinOp::Add, b::name(&doubled), b::name(&doubled))),
    ]);

    let mut host = Host::new(program);
    host.ctx.evaluate().unwrap();
    assert_eq!(host.ctx.provide("q", num(1)).unwrap(), Status::Complete(num(4)));

    host.ctx.invalidate("q").unwrap();
    host.ctx.evaluate().unwrap();
    assert_eq!(host.ctx.provide("q", num(5)).unwrap(), Status::Complete(num(20)));
}

#[test]
fn test_validate_and_invalidate_notify_handler() {
    let mut host = Host::new(sum_of_inputs());
    host.ctx.provide("a", num(1)).unwrap();
    host.ctx.validate("a").unwrap();
    host.ctx.invalidate("a").unwrap();

    let events: Vec<InputEvent> = host.inputs.borrow().iter().map(|(_, e)| e.clone()).collect();
    assert_eq!(events, vec![InputEvent::Validate, InputEvent::Invalidate]);
}

// ══════════════════════════════════════════════════════════════════════════════
// Suspend/resume equivalence
// ══════════════════════════════════════════════════════════════════════════════

fn literal_sum(a: i64, c: i64) -> Program {
    Program::new(vec![b::expr(b::binary(BinOp::Add, b::number(a), b::number(c)))])
}

fn mixed(pb: &mut ProgramBuilder, a: i64) -> ExprRef {
    let c = pb.input("b", InputKind::Number, "").unwrap();
    b::binary(BinOp::Add, b::number(a), c)
}

proptest! {
    #[test]
    fn prop_resumed_equals_direct(a in -1_000i64..1_000, c in -1_000i64..1_000) {
        let mut pb = ProgramBuilder::new();
        let expr = mixed(&mut pb, a);
        let mut host = Host::new(pb.finish(vec![b::expr(expr)]));
        let parked = host.ctx.evaluate().unwrap();
        prop_assert_eq!(parked.waiting_on(), Some("b"));
        let continuation = host.last_request();
        let resumed = host.ctx.resume(&continuation, num(c)).unwrap();

        let mut direct = Host::new(literal_sum(a, c));
        let expected = direct.ctx.evaluate().unwrap();
        prop_assert_eq!(resumed, expected);

        let resumed_trace = host.last_trace();
        let direct_trace = direct.last_trace();
        let resumed_shape = root_shape(&resumed_trace);
        let direct_shape = root_shape(&direct_trace);
        prop_assert_eq!(resumed_shape, direct_shape);
        let resumed_value = resumed_trace.root().map(|node| node.value());
        let direct_value = direct_trace.root().map(|node| node.value());
        prop_assert!(resumed_value.is_some());
        prop_assert_eq!(resumed_value, direct_value);
    }

    #[test]
    fn prop_answer_order_does_not_matter(a in -1_000i64..1_000, c in -1_000i64..1_000) {
        let mut early = Host::new(sum_of_inputs());
        early.ctx.provide("b", num(c)).unwrap();
        early.ctx.provide("a", num(a)).unwrap();
        let ahead = early.ctx.evaluate().unwrap();

        let mut late = Host::new(sum_of_inputs());
        late.ctx.evaluate().unwrap();
        late.ctx.provide("a", num(a)).unwrap();
        let resumed = late.ctx.provide("b", num(c)).unwrap();

        prop_assert_eq!(&ahead, &Status::Complete(num(a + c)));
        prop_assert_eq!(ahead, resumed);
        prop_assert_eq!(early.last_trace(), late.last_trace());
    }
}
