//! Lexical environment for one evaluation pass.
//!
//! Frames, delayed expressions, records and closures are allocated in one
//! arena owned by the pass. Closures and records refer back to the frames
//! they capture by index, so recursive bindings need no reference cycles
//! and everything is released when the pass is dropped.

use crate::value::{ClosureId, RecordId, RuntimeValue, TraceValue};
use std::collections::BTreeMap;
use std::rc::Rc;
use verdict_types::ast::{ExprRef, FunctionLit, Slot, SlotId};
use verdict_types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ThunkId(usize);

/// What a slot is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Binding {
    Value(RuntimeValue),
    Delayed(ThunkId),
}

#[derive(Debug)]
struct Entry {
    name: String,
    binding: Binding,
}

/// A single scope level.
#[derive(Debug)]
struct Frame {
    parent: Option<FrameId>,
    bindings: BTreeMap<SlotId, Entry>,
}

#[derive(Debug, Clone)]
pub(crate) enum ThunkState {
    Unforced,
    /// Being forced right now; reaching it again is a cycle.
    Forcing,
    /// Forced once; later readers see only the value.
    Forced { value: RuntimeValue },
}

/// An unevaluated expression and the frame it closes over.
#[derive(Debug)]
pub(crate) struct Thunk {
    pub(crate) label: String,
    pub(crate) expr: ExprRef,
    pub(crate) frame: FrameId,
    pub(crate) state: ThunkState,
}

#[derive(Debug)]
pub(crate) struct RecordValue {
    pub(crate) fields: Vec<(String, ThunkId)>,
}

impl RecordValue {
    pub(crate) fn field(&self, name: &str) -> Option<ThunkId> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, thunk)| *thunk)
    }

    pub(crate) fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|(name, _)| name.clone()).collect()
    }
}

#[derive(Debug)]
pub(crate) struct Closure {
    pub(crate) function: Rc<FunctionLit>,
    pub(crate) frame: FrameId,
}

impl Closure {
    pub(crate) fn display_name(&self) -> String {
        self.function
            .name
            .clone()
            .unwrap_or_else(|| "anonymous function".to_string())
    }
}

/// Arena of frames and heap objects for one pass.
///
/// Frame 0 is the global frame; it is the only one shown to the host.
#[derive(Debug)]
pub(crate) struct Environment {
    frames: Vec<Frame>,
    thunks: Vec<Thunk>,
    records: Vec<RecordValue>,
    closures: Vec<Closure>,
}

impl Environment {
    /// Create an environment holding only the global frame.
    pub(crate) fn new() -> Self {
        Self {
            frames: vec![Frame {
                parent: None,
                bindings: BTreeMap::new(),
            }],
            thunks: Vec::new(),
            records: Vec::new(),
            closures: Vec::new(),
        }
    }

    pub(crate) fn global(&self) -> FrameId {
        FrameId(0)
    }

    /// Create a frame nested in `parent`.
    pub(crate) fn push_frame(&mut self, parent: FrameId) -> FrameId {
        let id = FrameId(self.frames.len());
        self.frames.push(Frame {
            parent: Some(parent),
            bindings: BTreeMap::new(),
        });
        id
    }

    /// Bind a slot in `frame`, replacing any earlier binding of that slot.
    pub(crate) fn declare(&mut self, frame: FrameId, slot: &Slot, binding: Binding) {
        self.frames[frame.0].bindings.insert(
            slot.id,
            Entry {
                name: slot.name.clone(),
                binding,
            },
        );
    }

    /// Look a slot up, searching from `frame` outward.
    pub(crate) fn lookup(&self, frame: FrameId, slot: &Slot) -> Option<Binding> {
        let mut current = Some(frame);
        while let Some(id) = current {
            let frame = &self.frames[id.0];
            if let Some(entry) = frame.bindings.get(&slot.id) {
                return Some(entry.binding);
            }
            current = frame.parent;
        }
        None
    }

    pub(crate) fn delay(&mut self, label: &str, expr: ExprRef, frame: FrameId) -> ThunkId {
        let id = ThunkId(self.thunks.len());
        self.thunks.push(Thunk {
            label: label.to_string(),
            expr,
            frame,
            state: ThunkState::Unforced,
        });
        id
    }

    pub(crate) fn thunk(&self, id: ThunkId) -> &Thunk {
        &self.thunks[id.0]
    }

    pub(crate) fn thunk_mut(&mut self, id: ThunkId) -> &mut Thunk {
        &mut self.thunks[id.0]
    }

    pub(crate) fn alloc_record(&mut self, fields: Vec<(String, ThunkId)>) -> RecordId {
        let id = RecordId(self.records.len());
        self.records.push(RecordValue { fields });
        id
    }

    pub(crate) fn record(&self, id: RecordId) -> &RecordValue {
        &self.records[id.0]
    }

    pub(crate) fn alloc_closure(&mut self, function: Rc<FunctionLit>, frame: FrameId) -> ClosureId {
        let id = ClosureId(self.closures.len());
        self.closures.push(Closure { function, frame });
        id
    }

    pub(crate) fn closure(&self, id: ClosureId) -> &Closure {
        &self.closures[id.0]
    }

    /// The value a thunk was forced to, if it has been.
    pub(crate) fn forced(&self, id: ThunkId) -> Option<RuntimeValue> {
        match &self.thunk(id).state {
            ThunkState::Forced { value } => Some(*value),
            ThunkState::Unforced | ThunkState::Forcing => None,
        }
    }

    /// Summary of a value for a trace node.
    pub(crate) fn snapshot(&self, value: RuntimeValue) -> TraceValue {
        match value {
            RuntimeValue::Number(n) => TraceValue::Number(n),
            RuntimeValue::Boolean(b) => TraceValue::Boolean(b),
            RuntimeValue::Record(id) => TraceValue::Record(self.record(id).field_names()),
            RuntimeValue::Closure(id) => TraceValue::Function(self.closure(id).function.name.clone()),
            RuntimeValue::Undefined => TraceValue::Undefined,
        }
    }

    /// Convert a runtime value to its host-facing form.
    ///
    /// Record fields that were never forced are left out, as are fields
    /// leading back to a record already being exported.
    pub(crate) fn export(&self, value: RuntimeValue) -> Value {
        self.export_inner(value, &mut Vec::new())
    }

    fn export_inner(&self, value: RuntimeValue, open: &mut Vec<RecordId>) -> Value {
        match value {
            RuntimeValue::Number(n) => Value::Number(n),
            RuntimeValue::Boolean(b) => Value::Boolean(b),
            RuntimeValue::Closure(id) => Value::Function(self.closure(id).function.name.clone()),
            RuntimeValue::Undefined => Value::Undefined,
            RuntimeValue::Record(id) => {
                open.push(id);
                let mut fields = BTreeMap::new();
                for (name, thunk) in &self.record(id).fields {
                    let Some(field) = self.forced(*thunk) else {
                        continue;
                    };
                    if matches!(field, RuntimeValue::Record(inner) if open.contains(&inner)) {
                        continue;
                    }
                    fields.insert(name.clone(), self.export_inner(field, open));
                }
                open.pop();
                Value::Record(fields)
            }
        }
    }

    /// A global binding by name: its value when materialized or forced.
    fn global_value(&self, name: &str) -> Option<RuntimeValue> {
        let entry = self.frames[0]
            .bindings
            .values()
            .rev()
            .find(|entry| entry.name == name)?;
        match entry.binding {
            Binding::Value(value) => Some(value),
            Binding::Delayed(thunk) => self.forced(thunk),
        }
    }
}

/// Read-only view of the global frame handed to host callbacks.
#[derive(Debug, Clone, Copy)]
pub struct GlobalFrame<'a> {
    env: Option<&'a Environment>,
}

impl<'a> GlobalFrame<'a> {
    pub(crate) fn new(env: &'a Environment) -> Self {
        Self { env: Some(env) }
    }

    /// A view with no bindings, used before any pass has run.
    pub(crate) fn empty() -> Self {
        Self { env: None }
    }

    /// The value of a global binding, if it is already known.
    ///
    /// Bindings whose delayed expression has not been forced yet read as
    /// `None`; reading never triggers evaluation.
    pub fn get(&self, name: &str) -> Option<Value> {
        let env = self.env?;
        env.global_value(name).map(|value| env.export(value))
    }

    /// Names bound in the global frame, in slot order.
    pub fn names(&self) -> Vec<&'a str> {
        match self.env {
            Some(env) => env.frames[0]
                .bindings
                .values()
                .map(|entry| entry.name.as_str())
                .collect(),
            None => Vec::new(),
        }
    }
}
