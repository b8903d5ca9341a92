//! Scheduled AST back into surface instructions.
//!
//! Identifiers and integers pass through; every division flavor collapses
//! to plain integer division; unary minus becomes arithmetic negation.
//! Ternary, member, and addressing expressions have no counterpart in the
//! target language and are rejected. Loop conditions translate to the
//! inclusive upper bound of a `for`: `i < E` becomes `E - 1`, `i <= E`
//! passes through, anything else is malformed scheduler output.

use crate::ast::Instruction;
use crate::error::ReverseError;
use crate::expr::Expr;
use crate::schedule::{SchedExpr, SchedNode, SchedOp};

/// Translate a scheduled AST into an instruction list.
pub fn sched_to_program(node: &SchedNode) -> Result<Vec<Instruction>, ReverseError> {
    match node {
        SchedNode::For {
            iterator,
            init,
            cond,
            body,
        } => {
            let lower = expr(init)?;
            let upper = upper_bound(cond)?;
            let body = sched_to_program(body)?;
            Ok(vec![Instruction::for_loop(
                iterator.clone(),
                lower,
                upper,
                body,
            )])
        }
        SchedNode::If {
            cond,
            then_branch,
            else_branch,
        } => {
            let condition = expr(cond)?;
            let then_body = sched_to_program(then_branch)?;
            let instruction = match else_branch {
                Some(else_branch) => Instruction::if_then_else(
                    condition,
                    then_body,
                    sched_to_program(else_branch)?,
                ),
                None => Instruction::if_then(condition, then_body),
            };
            Ok(vec![instruction])
        }
        SchedNode::Block(children) => {
            let mut list = Vec::new();
            for child in children {
                list.extend(sched_to_program(child)?);
            }
            Ok(list)
        }
        SchedNode::User(call) => {
            let SchedExpr::Op(SchedOp::Call, parts) = call else {
                return Err(ReverseError::MalformedCall(format!("{call:?}")));
            };
            let Some((callee, coords)) = parts.split_first() else {
                return Err(ReverseError::MalformedCall("empty call".into()));
            };
            let SchedExpr::Id(name) = callee else {
                return Err(ReverseError::MalformedCall(format!("{callee:?}")));
            };
            let mut args = Vec::with_capacity(coords.len());
            for coord in coords {
                args.push(expr(coord)?);
            }
            Ok(vec![Instruction::call(name.clone(), args)])
        }
    }
}

/// Inclusive upper bound from a loop condition.
fn upper_bound(cond: &SchedExpr) -> Result<Expr, ReverseError> {
    match cond {
        SchedExpr::Op(SchedOp::Le, parts) if parts.len() == 2 => expr(&parts[1]),
        SchedExpr::Op(SchedOp::Lt, parts) if parts.len() == 2 => {
            Ok(expr(&parts[1])?.sub(Expr::number(1)))
        }
        other => Err(ReverseError::MalformedLoopCondition(format!("{other:?}"))),
    }
}

/// Translate one scheduled expression.
pub fn expr(e: &SchedExpr) -> Result<Expr, ReverseError> {
    match e {
        SchedExpr::Id(name) => Ok(Expr::ident(name.clone())),
        SchedExpr::Int(value) => Ok(Expr::number(*value)),
        SchedExpr::Op(op, args) => {
            let binary = |op: fn(Expr, Expr) -> Expr| -> Result<Expr, ReverseError> {
                if args.len() != 2 {
                    return Err(ReverseError::MalformedCall(format!("{e:?}")));
                }
                Ok(op(expr(&args[0])?, expr(&args[1])?))
            };
            match op {
                SchedOp::Add => binary(Expr::add),
                SchedOp::Sub => binary(Expr::sub),
                SchedOp::Mul => binary(Expr::mul),
                SchedOp::Div | SchedOp::FdivQ | SchedOp::PdivQ | SchedOp::PdivR => {
                    binary(Expr::div)
                }
                SchedOp::Min => binary(Expr::min),
                SchedOp::Max => binary(Expr::max),
                SchedOp::And | SchedOp::AndThen => binary(Expr::and),
                SchedOp::Or | SchedOp::OrElse => binary(Expr::or),
                SchedOp::Lt => binary(Expr::lt),
                SchedOp::Le => binary(Expr::le),
                SchedOp::Gt => binary(Expr::gt),
                SchedOp::Ge => binary(Expr::ge),
                SchedOp::Eq => binary(Expr::equal),
                SchedOp::Minus => {
                    if args.len() != 1 {
                        return Err(ReverseError::MalformedCall(format!("{e:?}")));
                    }
                    Ok(expr(&args[0])?.neg())
                }
                SchedOp::Cond
                | SchedOp::Select
                | SchedOp::Member
                | SchedOp::Access
                | SchedOp::AddressOf
                | SchedOp::Call => Err(ReverseError::UnsupportedExpression(format!("{e:?}"))),
            }
        }
    }
}
