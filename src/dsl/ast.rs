//! AST types for the filter DSL.
//!
//! Nodes live in a flat arena owned by [`Expr`] and refer to their children
//! by [`NodeId`]. Children are always pushed before their parent, so every
//! child index is lower than the index of the node holding it.

use std::collections::BTreeSet;
use std::fmt;

use regex::Regex;
use time::{Duration, OffsetDateTime};

use super::token::{Token, TokenKind};

/// Index of a node in the arena of an [`Expr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Logical connective of a binary node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And, // &&
    Or,  // ||
}

impl fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalOp::And => write!(f, "&&"),
            LogicalOp::Or => write!(f, "||"),
        }
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,           // ==
    EqFold,       // ==*
    Ne,           // !=
    NeFold,       // !=*
    Lt,           // <
    Le,           // <=
    Gt,           // >
    Ge,           // >=
    Match,        // =~
    MatchFold,    // =~*
    NotMatch,     // !~
    NotMatchFold, // !~*
}

impl CompareOp {
    pub fn from_token(kind: TokenKind) -> Option<Self> {
        let op = match kind {
            TokenKind::Eq => CompareOp::Eq,
            TokenKind::EqI => CompareOp::EqFold,
            TokenKind::Ne => CompareOp::Ne,
            TokenKind::NeI => CompareOp::NeFold,
            TokenKind::Lt => CompareOp::Lt,
            TokenKind::Le => CompareOp::Le,
            TokenKind::Gt => CompareOp::Gt,
            TokenKind::Ge => CompareOp::Ge,
            TokenKind::Match => CompareOp::Match,
            TokenKind::MatchI => CompareOp::MatchFold,
            TokenKind::NMatch => CompareOp::NotMatch,
            TokenKind::NMatchI => CompareOp::NotMatchFold,
            _ => return None,
        };
        Some(op)
    }

    pub fn is_regex(self) -> bool {
        matches!(
            self,
            CompareOp::Match | CompareOp::MatchFold | CompareOp::NotMatch | CompareOp::NotMatchFold
        )
    }

    /// Apply one of the six ordering/equality operators.
    ///
    /// Returns `None` for the string-only operators.
    pub fn apply<T: PartialOrd>(self, left: &T, right: &T) -> Option<bool> {
        Some(match self {
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
            _ => return None,
        })
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "==",
            CompareOp::EqFold => "==*",
            CompareOp::Ne => "!=",
            CompareOp::NeFold => "!=*",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Match => "=~",
            CompareOp::MatchFold => "=~*",
            CompareOp::NotMatch => "!~",
            CompareOp::NotMatchFold => "!~*",
        };
        f.write_str(s)
    }
}

/// Leaf node: `field op literal`.
///
/// The `number`, `duration` and `time` slots hold the literal converted at
/// parse time when that conversion succeeded.
#[derive(Debug, Clone)]
pub struct Comparison {
    pub field: Token,
    pub op: CompareOp,
    pub op_token: Token,
    pub value: Token,
    /// Literal text with quotes stripped and escapes decoded.
    pub literal: String,
    pub regex: Option<Regex>,
    pub number: Option<f64>,
    pub duration: Option<Duration>,
    pub time: Option<OffsetDateTime>,
}

impl Comparison {
    pub fn field_name(&self) -> &str {
        &self.field.text
    }
}

#[derive(Debug, Clone)]
pub enum Node {
    Binary {
        op: LogicalOp,
        left: NodeId,
        right: NodeId,
    },
    Not {
        operand: NodeId,
    },
    Comparison(Comparison),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Binary,
    Not,
    Comparison,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Binary => write!(f, "binary node"),
            NodeKind::Not => write!(f, "not node"),
            NodeKind::Comparison => write!(f, "comparison node"),
        }
    }
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Binary { .. } => NodeKind::Binary,
            Node::Not { .. } => NodeKind::Not,
            Node::Comparison(_) => NodeKind::Comparison,
        }
    }
}

/// A compiled filter expression.
///
/// Immutable once built; evaluation only reads it, so one `Expr` can be
/// shared between threads and evaluated concurrently.
#[derive(Debug, Clone)]
pub struct Expr {
    pub(crate) nodes: Vec<Node>,
    pub(crate) root: NodeId,
    pub(crate) identifiers: BTreeSet<String>,
}

impl Expr {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Distinct field names referenced by the expression, sorted.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.identifiers.iter().map(String::as_str)
    }
}

/// Canonical, fully parenthesised rendering, e.g. `((A > 1) && !(B == "x"))`.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        enum Piece {
            Node(NodeId),
            Op(LogicalOp),
            Close,
        }

        let mut pending = vec![Piece::Node(self.root)];
        while let Some(piece) = pending.pop() {
            match piece {
                Piece::Node(id) => match self.node(id) {
                    Node::Binary { op, left, right } => {
                        f.write_str("(")?;
                        pending.extend([Piece::Close, Piece::Node(*right), Piece::Op(*op)]);
                        pending.push(Piece::Node(*left));
                    }
                    Node::Not { operand } => {
                        f.write_str("!")?;
                        pending.push(Piece::Node(*operand));
                    }
                    Node::Comparison(cmp) => {
                        write!(f, "({} {} {})", cmp.field.text, cmp.op, cmp.value.text)?;
                    }
                },
                Piece::Op(op) => write!(f, " {op} ")?,
                Piece::Close => f.write_str(")")?,
            }
        }
        Ok(())
    }
}
