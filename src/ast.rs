//! Abstract syntax tree for the task language.
//!
//! A program is a list of instructions. Task calls, counted loops with
//! inclusive bounds, conditionals, and four block kinds; `advance` is the
//! clock barrier the compiler exists to remove. Each instruction owns its
//! payload and carries an [`Annotation`] that the annotator fills in before
//! the instance sets are built.

use crate::expr::Expr;

/// Scheduling annotation attached to every instruction.
///
/// All fields are `None` until the annotator runs. `level` is the lexical
/// coordinate path (`0,f,0,i,2,d` for a call), `boundaries` the accumulated
/// loop-bound conjunction (empty string at top level), `date` the symbolic
/// position along the clock of the enclosing scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotation {
    pub level: Option<String>,
    pub boundaries: Option<String>,
    pub date: Option<Expr>,
}

/// The instruction variants of the surface language.
#[derive(Debug, Clone, PartialEq)]
pub enum InstructionKind {
    /// Named task call with argument expressions.
    Call { name: String, args: Vec<Expr> },

    /// Counted loop. Both bounds are inclusive and must not depend on the
    /// iterator itself.
    For {
        identifier: String,
        lower: Expr,
        upper: Expr,
        body: Vec<Instruction>,
    },

    /// Conditional with optional else branch.
    If {
        condition: Expr,
        then_body: Vec<Instruction>,
        else_body: Option<Vec<Instruction>>,
    },

    /// Clock barrier.
    Advance,

    /// Wait for all tasks spawned in the body.
    Finish(Vec<Instruction>),

    /// Spawn the body as a task.
    Async(Vec<Instruction>),

    /// `finish` registered on a clock; opens a clock scope.
    ClockedFinish(Vec<Instruction>),

    /// `async` registered on the enclosing clock.
    ClockedAsync(Vec<Instruction>),
}

/// An instruction plus its scheduling annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub kind: InstructionKind,
    pub annotation: Annotation,
}

impl Instruction {
    fn new(kind: InstructionKind) -> Instruction {
        Instruction {
            kind,
            annotation: Annotation::default(),
        }
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Instruction {
        Instruction::new(InstructionKind::Call {
            name: name.into(),
            args,
        })
    }

    pub fn for_loop(
        identifier: impl Into<String>,
        lower: Expr,
        upper: Expr,
        body: Vec<Instruction>,
    ) -> Instruction {
        Instruction::new(InstructionKind::For {
            identifier: identifier.into(),
            lower,
            upper,
            body,
        })
    }

    pub fn if_then(condition: Expr, then_body: Vec<Instruction>) -> Instruction {
        Instruction::new(InstructionKind::If {
            condition,
            then_body,
            else_body: None,
        })
    }

    pub fn if_then_else(
        condition: Expr,
        then_body: Vec<Instruction>,
        else_body: Vec<Instruction>,
    ) -> Instruction {
        Instruction::new(InstructionKind::If {
            condition,
            then_body,
            else_body: Some(else_body),
        })
    }

    pub fn advance() -> Instruction {
        Instruction::new(InstructionKind::Advance)
    }

    pub fn finish(body: Vec<Instruction>) -> Instruction {
        Instruction::new(InstructionKind::Finish(body))
    }

    pub fn async_block(body: Vec<Instruction>) -> Instruction {
        Instruction::new(InstructionKind::Async(body))
    }

    pub fn clocked_finish(body: Vec<Instruction>) -> Instruction {
        Instruction::new(InstructionKind::ClockedFinish(body))
    }

    pub fn clocked_async(body: Vec<Instruction>) -> Instruction {
        Instruction::new(InstructionKind::ClockedAsync(body))
    }

    /// The name of a call or the iterator of a loop; `None` for every other
    /// kind.
    pub fn identifier(&self) -> Option<&str> {
        match &self.kind {
            InstructionKind::Call { name, .. } => Some(name),
            InstructionKind::For { identifier, .. } => Some(identifier),
            _ => None,
        }
    }

    /// The loop body, the then-body of a conditional, or the block body;
    /// `None` for calls and `advance`.
    pub fn body(&self) -> Option<&[Instruction]> {
        match &self.kind {
            InstructionKind::For { body, .. } => Some(body),
            InstructionKind::If { then_body, .. } => Some(then_body),
            InstructionKind::Finish(body)
            | InstructionKind::Async(body)
            | InstructionKind::ClockedFinish(body)
            | InstructionKind::ClockedAsync(body) => Some(body),
            _ => None,
        }
    }

    /// Mutable variant of [`Instruction::body`].
    pub fn body_mut(&mut self) -> Option<&mut Vec<Instruction>> {
        match &mut self.kind {
            InstructionKind::For { body, .. } => Some(body),
            InstructionKind::If { then_body, .. } => Some(then_body),
            InstructionKind::Finish(body)
            | InstructionKind::Async(body)
            | InstructionKind::ClockedFinish(body)
            | InstructionKind::ClockedAsync(body) => Some(body),
            _ => None,
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self.kind, InstructionKind::Call { .. })
    }

    pub fn is_advance(&self) -> bool {
        matches!(self.kind, InstructionKind::Advance)
    }
}
