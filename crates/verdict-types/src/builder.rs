//! Constructors for resolved programs.
//!
//! The evaluator consumes trees that have already been through name
//! resolution. Hosts without a front end (and the test suites) assemble
//! those trees here: [`ProgramBuilder`] hands out unique slots and shares
//! placeholders by question, the free functions build the remaining nodes.
//!
//! ```
//! use verdict_types::builder::{self as b, ProgramBuilder};
//! use verdict_types::ast::BinOp;
//! use verdict_types::InputKind;
//!
//! let mut pb = ProgramBuilder::new();
//! let age = pb.slot("age");
//! let asked = pb.input("age?", InputKind::Number, "How old are you?").unwrap();
//! let program = pb.finish(vec![
//!     b::declare(&age, asked),
//!     b::expr(b::binary(BinOp::GreaterEq, b::name(&age), b::number(18))),
//! ]);
//! assert_eq!(program.placeholders().len(), 1);
//! ```

use crate::ast::*;
use crate::{BuildError, InputKind, Result};
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

/// Allocates slots and placeholders for one program.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    next_slot: u32,
    placeholders: BTreeMap<String, Rc<Placeholder>>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh slot. Two calls with the same name give distinct slots.
    pub fn slot(&mut self, name: &str) -> Slot {
        let slot = Slot::new(self.next_slot, name);
        self.next_slot += 1;
        slot
    }

    /// A placeholder literal. Repeating a question reuses its placeholder.
    pub fn input(&mut self, question: &str, kind: InputKind, prompt: &str) -> Result<ExprRef> {
        if let Some(existing) = self.placeholders.get(question) {
            if existing.kind != kind {
                return Err(BuildError::ConflictingPlaceholder {
                    question: question.to_string(),
                    first: existing.kind,
                    second: kind,
                });
            }
            return Ok(Rc::new(Expr::Literal(Literal::Input(Rc::clone(existing)))));
        }
        let placeholder = Rc::new(Placeholder {
            question: question.to_string(),
            kind,
            prompt: prompt.to_string(),
        });
        self.placeholders
            .insert(question.to_string(), Rc::clone(&placeholder));
        Ok(Rc::new(Expr::Literal(Literal::Input(placeholder))))
    }

    /// A record literal. Field names come from the slots, so a field's
    /// expression may refer to its siblings through those same slots.
    pub fn record(&mut self, fields: Vec<(Slot, ExprRef)>) -> Result<ExprRef> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(fields.len());
        for (slot, value) in fields {
            if !seen.insert(slot.name.clone()) {
                return Err(BuildError::DuplicateField(slot.name));
            }
            out.push(RecordField {
                name: slot.name.clone(),
                slot,
                value,
            });
        }
        Ok(Rc::new(Expr::Literal(Literal::Record(Rc::new(RecordLit {
            fields: out,
        })))))
    }

    /// A function literal.
    pub fn function(&mut self, name: Option<&str>, params: Vec<Slot>, body: ExprRef) -> Result<ExprRef> {
        let mut seen = HashSet::new();
        for param in &params {
            if !seen.insert(param.name.as_str()) {
                return Err(BuildError::DuplicateParam(param.name.clone()));
            }
        }
        Ok(Rc::new(Expr::Literal(Literal::Function(Rc::new(
            FunctionLit {
                name: name.map(str::to_string),
                params,
                body,
            },
        )))))
    }

    pub fn finish(self, stmts: Vec<Stmt>) -> Program {
        Program::new(stmts)
    }
}

pub fn number(n: i64) -> ExprRef {
    Rc::new(Expr::Literal(Literal::Number(n)))
}

pub fn boolean(b: bool) -> ExprRef {
    Rc::new(Expr::Literal(Literal::Boolean(b)))
}

pub fn name(slot: &Slot) -> ExprRef {
    Rc::new(Expr::Name(slot.clone()))
}

pub fn binary(op: BinOp, lhs: ExprRef, rhs: ExprRef) -> ExprRef {
    Rc::new(Expr::Binary { op, lhs, rhs })
}

pub fn unary(op: UnaryOp, operand: ExprRef) -> ExprRef {
    Rc::new(Expr::Unary { op, operand })
}

pub fn and(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
    Rc::new(Expr::Logical {
        op: LogicalOp::And,
        lhs,
        rhs,
    })
}

pub fn or(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
    Rc::new(Expr::Logical {
        op: LogicalOp::Or,
        lhs,
        rhs,
    })
}

pub fn conditional(predicate: ExprRef, consequent: ExprRef, alternate: ExprRef) -> ExprRef {
    Rc::new(Expr::Conditional {
        predicate,
        consequent,
        alternate,
    })
}

pub fn attribute(base: ExprRef, field: &str) -> ExprRef {
    Rc::new(Expr::Attribute {
        base,
        field: field.to_string(),
    })
}

pub fn call(callee: ExprRef, args: Vec<ExprRef>) -> ExprRef {
    Rc::new(Expr::Call { callee, args })
}

pub fn block(stmts: Vec<Stmt>) -> ExprRef {
    Rc::new(Expr::Block(Rc::new(Block { stmts })))
}

pub fn declare(slot: &Slot, value: ExprRef) -> Stmt {
    Stmt::Declare {
        slot: slot.clone(),
        value,
    }
}

pub fn expr(value: ExprRef) -> Stmt {
    Stmt::Expr(value)
}
