//! The scheduler seam.
//!
//! The pipeline hands a [`UnionSet`](crate::sets::UnionSet) to a
//! [`Scheduler`] and gets back a scheduled AST in the scheduler's own
//! vocabulary: loops with an init/condition pair, guards, blocks, and leaf
//! `User` calls whose arguments spell out the full coordinate vector
//! `[date, c0, c1, ..., tag]`. The reverse translator turns that AST back
//! into surface instructions and rejects the expression kinds the target
//! language cannot say ([`SchedOp::Cond`], [`SchedOp::Select`],
//! [`SchedOp::Member`], [`SchedOp::Access`], [`SchedOp::AddressOf`]).
//!
//! [`LexScheduler`](crate::codegen::LexScheduler) is the built-in
//! implementation; a full polyhedral library would plug in behind the same
//! trait.

use crate::error::ScheduleError;
use crate::sets::UnionSet;

/// Operators a scheduler may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedOp {
    And,
    AndThen,
    Or,
    OrElse,
    Max,
    Min,
    /// Unary arithmetic negation.
    Minus,
    Add,
    Sub,
    Mul,
    /// Exact division.
    Div,
    /// Division rounded toward negative infinity.
    FdivQ,
    /// Division of a nonnegative dividend.
    PdivQ,
    /// Remainder of a nonnegative dividend.
    PdivR,
    /// Ternary conditional.
    Cond,
    /// Ternary conditional without shortcut evaluation.
    Select,
    Eq,
    Le,
    Lt,
    Ge,
    Gt,
    /// Function call; first argument is the callee.
    Call,
    /// Array subscript.
    Access,
    /// Struct member access.
    Member,
    /// Address-of.
    AddressOf,
}

/// Expressions of the scheduled AST.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedExpr {
    Id(String),
    Int(i64),
    Op(SchedOp, Vec<SchedExpr>),
}

impl SchedExpr {
    pub fn id(name: impl Into<String>) -> SchedExpr {
        SchedExpr::Id(name.into())
    }

    pub fn int(value: i64) -> SchedExpr {
        SchedExpr::Int(value)
    }

    pub fn binary(op: SchedOp, left: SchedExpr, right: SchedExpr) -> SchedExpr {
        SchedExpr::Op(op, vec![left, right])
    }
}

/// Nodes of the scheduled AST.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedNode {
    /// `for iterator from init while cond, step 1`.
    For {
        iterator: String,
        init: SchedExpr,
        cond: SchedExpr,
        body: Box<SchedNode>,
    },
    /// Guarded subtree.
    If {
        cond: SchedExpr,
        then_branch: Box<SchedNode>,
        else_branch: Option<Box<SchedNode>>,
    },
    /// Sequence of nodes.
    Block(Vec<SchedNode>),
    /// Leaf call: `Op(Call, [callee, date, c0, ..., tag])`.
    User(SchedExpr),
}

/// A polyhedral scheduler: consumes the union of instance sets, produces a
/// scheduled AST. The caller makes no assumption about how independent
/// instances are ordered.
pub trait Scheduler {
    fn schedule(&self, union: &UnionSet) -> Result<SchedNode, ScheduleError>;
}
