//! Derivation traces.
//!
//! While evaluating, the machine appends [`Token`]s to a [`Tape`] in
//! post-order: a node's children first, then its attributes, its result and
//! finally a marker naming the node kind. [`Tape::decode`] walks the tape
//! once from the front, keeping finished subtrees on a work stack until
//! their parent's marker claims them. Only work that actually happened is
//! on the tape, so untaken branches and short-circuited operands have no
//! nodes.
//!
//! The decoded [`Trace`] is a flat arena: nodes refer to their children by
//! [`NodeId`], and rendering walks it with an explicit stack. Traces of
//! deep recursions therefore never recurse on the host stack.

use crate::error::TraceError;
use crate::value::TraceValue;
use serde::Serialize;
use std::fmt;
use verdict_types::ast::{BinOp, LogicalOp, UnaryOp};

/// Node kinds, as written in markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    Literal,
    Input,
    Name,
    Binary,
    Unary,
    Logical,
    Conditional,
    Attribute,
    Block,
    Call,
    /// Top-level forcing of a record result's fields.
    Record,
}

/// One entry of the flat trace encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Marker(TraceKind),
    Result(TraceValue),
    Binary(BinOp),
    Unary(UnaryOp),
    Logical(LogicalOp),
    /// A name, field or question.
    Label(String),
    Flag(bool),
    Count(usize),
}

/// Flat, post-order trace encoding.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Tape {
    tokens: Vec<Token>,
    enabled: bool,
}

impl Tape {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            tokens: Vec::new(),
            enabled,
        }
    }

    #[cfg(test)]
    fn from_tokens(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            enabled: true,
        }
    }

    fn push(&mut self, token: Token) {
        if self.enabled {
            self.tokens.push(token);
        }
    }

    fn close(&mut self, value: TraceValue, kind: TraceKind) {
        self.push(Token::Result(value));
        self.push(Token::Marker(kind));
    }

    // ── Emitters, one per node kind ─────────────────────────────────────────

    pub(crate) fn literal(&mut self, value: TraceValue) {
        self.close(value, TraceKind::Literal);
    }

    pub(crate) fn input(&mut self, question: &str, value: TraceValue) {
        self.push(Token::Label(question.to_string()));
        self.close(value, TraceKind::Input);
    }

    /// `derived` is set when the name's derivation precedes it on the tape.
    pub(crate) fn name(&mut self, name: &str, derived: bool, value: TraceValue) {
        self.push(Token::Label(name.to_string()));
        self.push(Token::Flag(derived));
        self.close(value, TraceKind::Name);
    }

    pub(crate) fn binary(&mut self, op: BinOp, value: TraceValue) {
        self.push(Token::Binary(op));
        self.close(value, TraceKind::Binary);
    }

    pub(crate) fn unary(&mut self, op: UnaryOp, value: TraceValue) {
        self.push(Token::Unary(op));
        self.close(value, TraceKind::Unary);
    }

    pub(crate) fn logical(&mut self, op: LogicalOp, evaluated_rhs: bool, value: TraceValue) {
        self.push(Token::Logical(op));
        self.push(Token::Flag(evaluated_rhs));
        self.close(value, TraceKind::Logical);
    }

    pub(crate) fn conditional(&mut self, consequent: bool, value: TraceValue) {
        self.push(Token::Flag(consequent));
        self.close(value, TraceKind::Conditional);
    }

    pub(crate) fn attribute(&mut self, field: &str, derived: bool, value: TraceValue) {
        self.push(Token::Label(field.to_string()));
        self.push(Token::Flag(derived));
        self.close(value, TraceKind::Attribute);
    }

    pub(crate) fn block(&mut self, has_body: bool, value: TraceValue) {
        self.push(Token::Flag(has_body));
        self.close(value, TraceKind::Block);
    }

    pub(crate) fn call(&mut self, value: TraceValue) {
        self.close(value, TraceKind::Call);
    }

    pub(crate) fn record(&mut self, fields: &[String], value: TraceValue) {
        for field in fields {
            self.push(Token::Label(field.clone()));
        }
        self.push(Token::Count(fields.len()));
        self.close(value, TraceKind::Record);
    }

    /// Rebuild the trace. An empty tape decodes to an empty trace.
    pub(crate) fn decode(&self) -> Result<Trace, TraceError> {
        let mut nodes = Vec::new();
        let mut finished: Vec<NodeId> = Vec::new();
        let mut start = 0;
        for (i, token) in self.tokens.iter().enumerate() {
            let Token::Marker(kind) = token else {
                continue;
            };
            let mut attrs = Attrs {
                tokens: &self.tokens[start..i],
                pos: 0,
            };
            start = i + 1;
            let node = build(*kind, &mut attrs, &mut finished)?;
            attrs.finish()?;
            finished.push(NodeId(nodes.len()));
            nodes.push(node);
        }
        if start != self.tokens.len() {
            return Err(TraceError::UnterminatedNode);
        }
        match finished.as_slice() {
            [] => Ok(Trace { root: None, nodes }),
            [root] => Ok(Trace {
                root: Some(*root),
                nodes,
            }),
            [_, rest @ ..] => Err(TraceError::TrailingNodes(rest.len())),
        }
    }
}

/// Attribute tokens of one node, between the previous marker and its own.
struct Attrs<'a> {
    tokens: &'a [Token],
    pos: usize,
}

fn unexpected(expected: &'static str, found: &Token) -> TraceError {
    TraceError::UnexpectedToken {
        expected,
        found: format!("{found:?}"),
    }
}

impl<'a> Attrs<'a> {
    fn next(&mut self, expected: &'static str) -> Result<&'a Token, TraceError> {
        let token = self
            .tokens
            .get(self.pos)
            .ok_or(TraceError::MissingAttribute(expected))?;
        self.pos += 1;
        Ok(token)
    }

    fn result(&mut self) -> Result<TraceValue, TraceError> {
        match self.next("result")? {
            Token::Result(value) => Ok(value.clone()),
            other => Err(unexpected("result", other)),
        }
    }

    fn label(&mut self) -> Result<String, TraceError> {
        match self.next("label")? {
            Token::Label(label) => Ok(label.clone()),
            other => Err(unexpected("label", other)),
        }
    }

    /// Leading labels, however many there are.
    fn labels(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(Token::Label(label)) = self.tokens.get(self.pos) {
            out.push(label.clone());
            self.pos += 1;
        }
        out
    }

    fn flag(&mut self) -> Result<bool, TraceError> {
        match self.next("flag")? {
            Token::Flag(flag) => Ok(*flag),
            other => Err(unexpected("flag", other)),
        }
    }

    fn count(&mut self) -> Result<usize, TraceError> {
        match self.next("count")? {
            Token::Count(count) => Ok(*count),
            other => Err(unexpected("count", other)),
        }
    }

    fn finish(self) -> Result<(), TraceError> {
        match self.tokens.get(self.pos) {
            None => Ok(()),
            Some(other) => Err(unexpected("marker", other)),
        }
    }
}

/// Build one node from its attributes, taking its children off `finished`.
fn build(kind: TraceKind, attrs: &mut Attrs<'_>, finished: &mut Vec<NodeId>) -> Result<TraceNode, TraceError> {
    let mut child = || finished.pop().ok_or(TraceError::MissingChild(kind));
    let node = match kind {
        TraceKind::Literal => TraceNode::Literal {
            value: attrs.result()?,
        },
        TraceKind::Input => TraceNode::Input {
            question: attrs.label()?,
            value: attrs.result()?,
        },
        TraceKind::Name => {
            let name = attrs.label()?;
            let derived = attrs.flag()?;
            let value = attrs.result()?;
            let derivation = if derived { Some(child()?) } else { None };
            TraceNode::Name {
                name,
                derivation,
                value,
            }
        }
        TraceKind::Binary => {
            let op = match attrs.next("binary operator")? {
                Token::Binary(op) => *op,
                other => return Err(unexpected("binary operator", other)),
            };
            let value = attrs.result()?;
            let rhs = child()?;
            let lhs = child()?;
            TraceNode::Binary { op, lhs, rhs, value }
        }
        TraceKind::Unary => {
            let op = match attrs.next("unary operator")? {
                Token::Unary(op) => *op,
                other => return Err(unexpected("unary operator", other)),
            };
            let value = attrs.result()?;
            let operand = child()?;
            TraceNode::Unary { op, operand, value }
        }
        TraceKind::Logical => {
            let op = match attrs.next("logical operator")? {
                Token::Logical(op) => *op,
                other => return Err(unexpected("logical operator", other)),
            };
            let evaluated_rhs = attrs.flag()?;
            let value = attrs.result()?;
            let rhs = if evaluated_rhs { Some(child()?) } else { None };
            let lhs = child()?;
            TraceNode::Logical { op, lhs, rhs, value }
        }
        TraceKind::Conditional => {
            let consequent = attrs.flag()?;
            let value = attrs.result()?;
            let branch = child()?;
            let predicate = child()?;
            TraceNode::Conditional {
                predicate,
                consequent,
                branch,
                value,
            }
        }
        TraceKind::Attribute => {
            let field = attrs.label()?;
            let derived = attrs.flag()?;
            let value = attrs.result()?;
            let derivation = if derived { Some(child()?) } else { None };
            let base = child()?;
            TraceNode::Attribute {
                base,
                field,
                derivation,
                value,
            }
        }
        TraceKind::Block => {
            let has_body = attrs.flag()?;
            let value = attrs.result()?;
            let body = if has_body { Some(child()?) } else { None };
            TraceNode::Block { body, value }
        }
        TraceKind::Call => {
            let value = attrs.result()?;
            let body = child()?;
            let callee = child()?;
            TraceNode::Call {
                callee,
                body,
                value,
            }
        }
        TraceKind::Record => {
            let names = attrs.labels();
            let count = attrs.count()?;
            if count != names.len() {
                return Err(TraceError::UnexpectedToken {
                    expected: "one label per field",
                    found: format!("{} label(s) for {count} field(s)", names.len()),
                });
            }
            let value = attrs.result()?;
            let mut fields = Vec::with_capacity(count);
            for name in names.into_iter().rev() {
                fields.push(FieldTrace { name, trace: child()? });
            }
            fields.reverse();
            let source = child()?;
            TraceNode::Record {
                source,
                fields,
                value,
            }
        }
    };
    Ok(node)
}

// ══════════════════════════════════════════════════════════════════════════════
// Decoded trace
// ══════════════════════════════════════════════════════════════════════════════

/// Index of a node within its [`Trace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct NodeId(usize);

/// A decoded derivation.
///
/// Nodes are stored in evaluation order, so every child precedes its
/// parent and the root comes last.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace {
    /// `None` when tracing was disabled.
    root: Option<NodeId>,
    nodes: Vec<TraceNode>,
}

impl Trace {
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn root_id(&self) -> Option<NodeId> {
        self.root
    }

    pub fn root(&self) -> Option<&TraceNode> {
        self.root.map(|id| self.node(id))
    }

    pub fn node(&self, id: NodeId) -> &TraceNode {
        &self.nodes[id.0]
    }

    /// Questions consulted by the derivation, in evaluation order.
    pub fn inputs(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for node in &self.nodes {
            if let TraceNode::Input { question, .. } = node {
                if !out.contains(&question.as_str()) {
                    out.push(question);
                }
            }
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// The pieces `id` renders to, in reading order.
    fn pieces(&self, id: NodeId) -> Vec<Piece> {
        use Piece::{Node, Text};
        match self.node(id) {
            TraceNode::Literal { value } => vec![Text(value.to_string())],
            TraceNode::Input { question, value } => vec![Text(format!("[{question}: {value}]"))],
            TraceNode::Name {
                name,
                derivation: None,
                value: TraceValue::Function(_),
            } => vec![Text(name.clone())],
            TraceNode::Name {
                name,
                derivation: None,
                value,
            } => vec![Text(format!("{name}={value}"))],
            TraceNode::Name {
                name,
                derivation: Some(derivation),
                ..
            } => vec![Text(format!("{name}:")), Node(*derivation)],
            TraceNode::Binary { op, lhs, rhs, value } => vec![
                Text("(".into()),
                Node(*lhs),
                Text(format!(" {op} ")),
                Node(*rhs),
                Text(format!(" => {value})")),
            ],
            TraceNode::Unary { op, operand, value } => {
                vec![Text(format!("({op}")), Node(*operand), Text(format!(" => {value})"))]
            }
            TraceNode::Logical {
                op,
                lhs,
                rhs: Some(rhs),
                value,
            } => vec![
                Text("(".into()),
                Node(*lhs),
                Text(format!(" {op} ")),
                Node(*rhs),
                Text(format!(" => {value})")),
            ],
            TraceNode::Logical {
                op,
                lhs,
                rhs: None,
                value,
            } => vec![Text("(".into()), Node(*lhs), Text(format!(" {op} _ => {value})"))],
            TraceNode::Conditional {
                predicate,
                consequent,
                branch,
                value,
            } => {
                let arm = if *consequent { "then" } else { "else" };
                vec![
                    Text("(if ".into()),
                    Node(*predicate),
                    Text(format!(" {arm} ")),
                    Node(*branch),
                    Text(format!(" => {value})")),
                ]
            }
            TraceNode::Attribute {
                base,
                field,
                derivation: Some(derivation),
                ..
            } => vec![Node(*base), Text(format!(".{field}:")), Node(*derivation)],
            TraceNode::Attribute {
                base,
                field,
                derivation: None,
                value,
            } => vec![Node(*base), Text(format!(".{field}={value}"))],
            TraceNode::Block { body: Some(body), .. } => {
                vec![Text("{ ".into()), Node(*body), Text(" }".into())]
            }
            TraceNode::Block { body: None, .. } => vec![Text("{ }".into())],
            TraceNode::Call { callee, body, .. } => {
                vec![Node(*callee), Text("(".into()), Node(*body), Text(")".into())]
            }
            TraceNode::Record { source, fields, .. } => {
                let mut out = vec![Node(*source), Text(" {".into())];
                for (i, field) in fields.iter().enumerate() {
                    let sep = if i > 0 { ", " } else { "" };
                    out.push(Text(format!("{sep}{}: ", field.name)));
                    out.push(Node(field.trace));
                }
                out.push(Text("}".into()));
                out
            }
        }
    }
}

enum Piece {
    Node(NodeId),
    Text(String),
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut work: Vec<Piece> = self.root.map(Piece::Node).into_iter().collect();
        while let Some(piece) = work.pop() {
            match piece {
                Piece::Text(text) => f.write_str(&text)?,
                Piece::Node(id) => work.extend(self.pieces(id).into_iter().rev()),
            }
        }
        Ok(())
    }
}

/// A forced field of a record result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldTrace {
    pub name: String,
    pub trace: NodeId,
}

/// One evaluation step and the steps it depended on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum TraceNode {
    Literal {
        value: TraceValue,
    },
    Input {
        question: String,
        value: TraceValue,
    },
    /// A name reference. `derivation` is present the first time a delayed
    /// binding is forced; later reads see the materialized value.
    Name {
        name: String,
        derivation: Option<NodeId>,
        value: TraceValue,
    },
    Binary {
        op: BinOp,
        lhs: NodeId,
        rhs: NodeId,
        value: TraceValue,
    },
    Unary {
        op: UnaryOp,
        operand: NodeId,
        value: TraceValue,
    },
    /// `rhs` is `None` when the left operand decided the result.
    Logical {
        op: LogicalOp,
        lhs: NodeId,
        rhs: Option<NodeId>,
        value: TraceValue,
    },
    /// `consequent` tells which branch `branch` is.
    Conditional {
        predicate: NodeId,
        consequent: bool,
        branch: NodeId,
        value: TraceValue,
    },
    /// Like [`TraceNode::Name`], `derivation` is present only when the field
    /// was forced here.
    Attribute {
        base: NodeId,
        field: String,
        derivation: Option<NodeId>,
        value: TraceValue,
    },
    Block {
        body: Option<NodeId>,
        value: TraceValue,
    },
    Call {
        callee: NodeId,
        body: NodeId,
        value: TraceValue,
    },
    Record {
        source: NodeId,
        fields: Vec<FieldTrace>,
        value: TraceValue,
    },
}

impl TraceNode {
    pub fn kind(&self) -> TraceKind {
        match self {
            Self::Literal { .. } => TraceKind::Literal,
            Self::Input { .. } => TraceKind::Input,
            Self::Name { .. } => TraceKind::Name,
            Self::Binary { .. } => TraceKind::Binary,
            Self::Unary { .. } => TraceKind::Unary,
            Self::Logical { .. } => TraceKind::Logical,
            Self::Conditional { .. } => TraceKind::Conditional,
            Self::Attribute { .. } => TraceKind::Attribute,
            Self::Block { .. } => TraceKind::Block,
            Self::Call { .. } => TraceKind::Call,
            Self::Record { .. } => TraceKind::Record,
        }
    }

    /// The result at this node.
    pub fn value(&self) -> &TraceValue {
        match self {
            Self::Literal { value }
            | Self::Input { value, .. }
            | Self::Name { value, .. }
            | Self::Binary { value, .. }
            | Self::Unary { value, .. }
            | Self::Logical { value, .. }
            | Self::Conditional { value, .. }
            | Self::Attribute { value, .. }
            | Self::Block { value, .. }
            | Self::Call { value, .. }
            | Self::Record { value, .. } => value,
        }
    }

    /// Direct sub-derivations, in evaluation order.
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            Self::Literal { .. } | Self::Input { .. } => Vec::new(),
            Self::Name { derivation, .. } => derivation.iter().copied().collect(),
            Self::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            Self::Unary { operand, .. } => vec![*operand],
            Self::Logical { lhs, rhs, .. } => {
                let mut out = vec![*lhs];
                out.extend(*rhs);
                out
            }
            Self::Conditional {
                predicate, branch, ..
            } => vec![*predicate, *branch],
            Self::Attribute {
                base, derivation, ..
            } => {
                let mut out = vec![*base];
                out.extend(*derivation);
                out
            }
            Self::Block { body, .. } => body.iter().copied().collect(),
            Self::Call { callee, body, .. } => vec![*callee, *body],
            Self::Record { source, fields, .. } => {
                let mut out = vec![*source];
                out.extend(fields.iter().map(|f| f.trace));
                out
            }
        }
    }
}
