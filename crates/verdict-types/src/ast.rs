//! Resolved expression tree for Verdict programs.
//!
//! Trees reaching the evaluator have already been through name resolution:
//! every variable reference is a [`Slot`], never a bare identifier.
//! Subtrees are reference-counted ([`ExprRef`]) so a suspended evaluation
//! can keep hold of the nodes it still has to visit.

use crate::InputKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

/// Shared pointer to an expression node.
pub type ExprRef = Rc<Expr>;

// ══════════════════════════════════════════════════════════════════════════════
// Top Level
// ══════════════════════════════════════════════════════════════════════════════

/// A complete resolved program. Declarations in the root block live in the
/// global frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Block,
}

impl Program {
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Self {
            body: Block { stmts },
        }
    }

    /// Every distinct placeholder in the program, in tree order.
    ///
    /// Placeholders are identified by question; the first occurrence wins.
    pub fn placeholders(&self) -> Vec<Rc<Placeholder>> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        collect_block(&self.body, &mut seen, &mut found);
        found
    }
}

fn collect_block(block: &Block, seen: &mut HashSet<String>, out: &mut Vec<Rc<Placeholder>>) {
    for stmt in &block.stmts {
        match stmt {
            Stmt::Declare { value, .. } => collect_expr(value, seen, out),
            Stmt::Expr(expr) => collect_expr(expr, seen, out),
        }
    }
}

fn collect_expr(expr: &Expr, seen: &mut HashSet<String>, out: &mut Vec<Rc<Placeholder>>) {
    match expr {
        Expr::Literal(Literal::Input(p)) => {
            if seen.insert(p.question.clone()) {
                out.push(Rc::clone(p));
            }
        }
        Expr::Literal(Literal::Record(record)) => {
            for field in &record.fields {
                collect_expr(&field.value, seen, out);
            }
        }
        Expr::Literal(Literal::Function(function)) => collect_expr(&function.body, seen, out),
        Expr::Literal(Literal::Number(_) | Literal::Boolean(_)) | Expr::Name(_) => {}
        Expr::Binary { lhs, rhs, .. } | Expr::Logical { lhs, rhs, .. } => {
            collect_expr(lhs, seen, out);
            collect_expr(rhs, seen, out);
        }
        Expr::Unary { operand, .. } => collect_expr(operand, seen, out),
        Expr::Conditional {
            predicate,
            consequent,
            alternate,
        } => {
            collect_expr(predicate, seen, out);
            collect_expr(consequent, seen, out);
            collect_expr(alternate, seen, out);
        }
        Expr::Attribute { base, .. } => collect_expr(base, seen, out),
        Expr::Block(block) => collect_block(block, seen, out),
        Expr::Call { callee, args } => {
            collect_expr(callee, seen, out);
            for arg in args {
                collect_expr(arg, seen, out);
            }
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Slots
// ══════════════════════════════════════════════════════════════════════════════

/// Unique identifier assigned to a declaration by name resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotId(pub u32);

/// A resolved variable slot. The name is kept for diagnostics and for the
/// host's view of the global frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Slot {
    pub id: SlotId,
    pub name: String,
}

impl Slot {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id: SlotId(id),
            name: name.into(),
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Literals
// ══════════════════════════════════════════════════════════════════════════════

/// A named, typed hole filled by the host at runtime.
///
/// Identity is the question string: two placeholders with the same question
/// share one answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placeholder {
    pub question: String,
    pub kind: InputKind,
    pub prompt: String,
}

/// Literal forms.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(i64),
    Boolean(bool),
    Input(Rc<Placeholder>),
    Record(Rc<RecordLit>),
    Function(Rc<FunctionLit>),
}

/// `{ a: expr, b: expr }`
///
/// Each field owns a slot so sibling fields can refer to one another.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordLit {
    pub fields: Vec<RecordField>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordField {
    pub name: String,
    pub slot: Slot,
    pub value: ExprRef,
}

/// `fn name(params) body`
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionLit {
    pub name: Option<String>,
    pub params: Vec<Slot>,
    pub body: ExprRef,
}

// ══════════════════════════════════════════════════════════════════════════════
// Expressions
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// A reference to a resolved slot.
    Name(Slot),
    /// Arithmetic and comparison; both operands are always evaluated.
    Binary {
        op: BinOp,
        lhs: ExprRef,
        rhs: ExprRef,
    },
    Unary {
        op: UnaryOp,
        operand: ExprRef,
    },
    /// `&&` / `||`, short-circuiting.
    Logical {
        op: LogicalOp,
        lhs: ExprRef,
        rhs: ExprRef,
    },
    /// `predicate ? consequent : alternate`
    Conditional {
        predicate: ExprRef,
        consequent: ExprRef,
        alternate: ExprRef,
    },
    /// `base.field`
    Attribute { base: ExprRef, field: String },
    Block(Rc<Block>),
    Call { callee: ExprRef, args: Vec<ExprRef> },
}

/// `{ statements... }`
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `name = expr`
    Declare { slot: Slot, value: ExprRef },
    /// A bare expression; the last one gives the block its value.
    Expr(ExprRef),
}

// ── Operators ─────────────────────────────────────────────────────────────────

/// Arithmetic and comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    /// Floor division.
    Div,
    /// Floor modulo; the result takes the sign of the divisor.
    Mod,
    Eq,
    NotEq,
    Less,
    Greater,
    LessEq,
    GreaterEq,
}

impl BinOp {
    /// Returns the operator symbol for traces and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::NotEq => "!=",
            BinOp::Less => "<",
            BinOp::Greater => ">",
            BinOp::LessEq => "<=",
            BinOp::GreaterEq => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `!x`
    Not,
}

impl UnaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOp {
    And,
    Or,
}

impl LogicalOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalOp::And => "&&",
            LogicalOp::Or => "||",
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
