//! Reference scheduler: lexicographic enumeration of instance sets.
//!
//! Instances are ordered by their shifted tuples, date first, which is
//! exactly the order the coordinate shift was designed to induce. Two
//! schedule shapes are produced:
//!
//! - **phase mode**, when no date depends on an iterator: instances are
//!   grouped by date into phases and emitted phase by phase, rebuilding
//!   each instance's loop nest (adjacent instances with identical nests
//!   share one);
//! - **date-loop mode**, when dates move with an iterator: one loop over a
//!   fresh `c0` spans the union of date ranges, each instance guarded to
//!   its own range with its iterator rewritten to `c0 - offset`.
//!
//! Dates affine in more than one iterator, or with a scaled iterator
//! (nested clocked loops), are beyond this generator and fail with a
//! scheduler error; a full polyhedral library behind the
//! [`Scheduler`] trait is the lift for those programs.

use crate::error::ScheduleError;
use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::schedule::{SchedExpr, SchedNode, SchedOp, Scheduler};
use crate::sets::{Bound, Dim, InstanceSet, UnionSet};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// The built-in scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexScheduler;

impl Scheduler for LexScheduler {
    fn schedule(&self, union: &UnionSet) -> Result<SchedNode, ScheduleError> {
        if union.sets.is_empty() {
            return Ok(SchedNode::Block(Vec::new()));
        }

        let mut insts = Vec::with_capacity(union.sets.len());
        for (index, set) in union.sets.iter().enumerate() {
            insts.push(Inst::analyze(index, set)?);
        }

        if insts.iter().all(|inst| inst.driver.is_none()) {
            debug!("schedule: phase mode");
            phase_mode(insts)
        } else {
            debug!("schedule: date-loop mode");
            date_loop_mode(insts)
        }
    }
}

/// An affine form over iterators and parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct Affine {
    terms: BTreeMap<String, i64>,
    constant: i64,
}

impl Affine {
    fn of(expr: &Expr) -> Option<Affine> {
        match expr {
            Expr::Number(n) => Some(Affine {
                terms: BTreeMap::new(),
                constant: *n,
            }),
            Expr::Ident(name) => {
                let mut terms = BTreeMap::new();
                terms.insert(name.clone(), 1);
                Some(Affine { terms, constant: 0 })
            }
            Expr::Unary(UnaryOp::Neg, operand) => Some(Affine::of(operand)?.scale(-1)),
            Expr::Binary(BinaryOp::Add, left, right) => {
                Some(Affine::of(left)?.combine(&Affine::of(right)?, 1))
            }
            Expr::Binary(BinaryOp::Sub, left, right) => {
                Some(Affine::of(left)?.combine(&Affine::of(right)?, -1))
            }
            Expr::Binary(BinaryOp::Mul, left, right) => {
                let left = Affine::of(left)?;
                let right = Affine::of(right)?;
                if left.terms.is_empty() {
                    Some(right.scale(left.constant))
                } else if right.terms.is_empty() {
                    Some(left.scale(right.constant))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn combine(mut self, other: &Affine, sign: i64) -> Affine {
        for (name, coeff) in &other.terms {
            *self.terms.entry(name.clone()).or_insert(0) += sign * coeff;
        }
        self.terms.retain(|_, coeff| *coeff != 0);
        self.constant += sign * other.constant;
        self
    }

    fn scale(mut self, factor: i64) -> Affine {
        if factor == 0 {
            return Affine::default();
        }
        for coeff in self.terms.values_mut() {
            *coeff *= factor;
        }
        self.constant *= factor;
        self
    }

    fn without(&self, name: &str) -> Affine {
        let mut copy = self.clone();
        copy.terms.remove(name);
        copy
    }

    fn to_expr(&self) -> Expr {
        let mut acc: Option<Expr> = None;
        for (name, coeff) in &self.terms {
            let term = Expr::ident(name.clone()).mul(Expr::number(*coeff));
            acc = Some(match acc {
                None => term,
                Some(acc) => acc.add(term),
            });
        }
        match acc {
            None => Expr::number(self.constant),
            Some(acc) => acc.add(Expr::number(self.constant)),
        }
    }

    /// Definite ordering: only when the difference is constant.
    fn try_cmp(&self, other: &Affine) -> Option<Ordering> {
        let diff = self.clone().combine(other, -1);
        if diff.terms.is_empty() {
            Some(diff.constant.cmp(&0))
        } else {
            None
        }
    }

    /// Total but arbitrary ordering for instances whose dates differ by a
    /// parametric amount; deterministic so output is reproducible.
    fn cmp_total(&self, other: &Affine) -> Ordering {
        match self.try_cmp(other) {
            Some(ordering) => ordering,
            None => self
                .terms
                .cmp(&other.terms)
                .then(self.constant.cmp(&other.constant)),
        }
    }
}

/// One instance set, analyzed for scheduling.
struct Inst<'a> {
    index: usize,
    set: &'a InstanceSet,
    date: Affine,
    /// The bound of the iterator driving the date, if the date moves.
    driver: Option<&'a Bound>,
    /// Date minus the driver term.
    offset: Affine,
}

impl<'a> Inst<'a> {
    fn analyze(index: usize, set: &'a InstanceSet) -> Result<Inst<'a>, ScheduleError> {
        let date = Affine::of(&set.date)
            .ok_or_else(|| ScheduleError::NonAffineDate(set.date.to_string()))?;

        let mut driver = None;
        for bound in &set.bounds {
            match date.terms.get(&bound.iterator) {
                None => {}
                Some(1) if driver.is_none() => driver = Some(bound),
                Some(_) => {
                    return Err(ScheduleError::UnsupportedDate(set.date.to_string()));
                }
            }
        }

        let offset = match driver {
            Some(bound) => date.without(&bound.iterator),
            None => date.clone(),
        };

        Ok(Inst {
            index,
            set,
            date,
            driver,
            offset,
        })
    }

    fn synthetic_name(&self) -> String {
        format!("stmt{}", self.index)
    }
}

fn rank(dim: &Dim) -> u8 {
    match dim {
        Dim::Date => 0,
        Dim::Const(_) => 1,
        Dim::Marker(_) => 2,
        Dim::Iter(_) => 3,
        Dim::Tag(_) => 4,
    }
}

fn cmp_dim(a: &Dim, b: &Dim) -> Ordering {
    match (a, b) {
        (Dim::Date, Dim::Date) => Ordering::Equal,
        (Dim::Const(x), Dim::Const(y)) => x.cmp(y),
        (Dim::Marker(x), Dim::Marker(y)) => x.cmp(y),
        (Dim::Iter(x), Dim::Iter(y)) => x.cmp(y),
        (Dim::Tag(x), Dim::Tag(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn cmp_tuple(a: &[Dim], b: &[Dim]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match cmp_dim(x, y) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

/// Translate an expression into the scheduler vocabulary.
fn sched_of(expr: &Expr) -> Result<SchedExpr, ScheduleError> {
    match expr {
        Expr::Number(n) => Ok(SchedExpr::Int(*n)),
        Expr::Ident(name) => Ok(SchedExpr::id(name.clone())),
        Expr::Unary(UnaryOp::Neg, operand) => {
            Ok(SchedExpr::Op(SchedOp::Minus, vec![sched_of(operand)?]))
        }
        Expr::Binary(op, left, right) => {
            let op = match op {
                BinaryOp::Add => SchedOp::Add,
                BinaryOp::Sub => SchedOp::Sub,
                BinaryOp::Mul => SchedOp::Mul,
                BinaryOp::Div => SchedOp::Div,
                BinaryOp::Min => SchedOp::Min,
                BinaryOp::Max => SchedOp::Max,
                BinaryOp::And => SchedOp::And,
                BinaryOp::Or => SchedOp::Or,
                BinaryOp::Lt => SchedOp::Lt,
                BinaryOp::Le => SchedOp::Le,
                BinaryOp::Gt => SchedOp::Gt,
                BinaryOp::Ge => SchedOp::Ge,
                BinaryOp::Eq => SchedOp::Eq,
                BinaryOp::Ne => {
                    return Err(ScheduleError::UnsupportedExpression(expr.to_string()))
                }
            };
            Ok(SchedExpr::binary(op, sched_of(left)?, sched_of(right)?))
        }
        _ => Err(ScheduleError::UnsupportedExpression(expr.to_string())),
    }
}

/// The full coordinate vector of one instance as call arguments.
fn user_node(
    inst: &Inst<'_>,
    date_arg: &Expr,
    subst: &HashMap<String, Expr>,
) -> Result<SchedNode, ScheduleError> {
    let mut args = vec![SchedExpr::id(inst.synthetic_name())];
    for dim in &inst.set.dims {
        args.push(match dim {
            Dim::Date => sched_of(date_arg)?,
            Dim::Const(n) => SchedExpr::Int(*n),
            Dim::Marker(name) => SchedExpr::id(name.clone()),
            Dim::Iter(name) => {
                let value = subst
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| Expr::ident(name.clone()));
                sched_of(&value)?
            }
            Dim::Tag(t) => SchedExpr::Int(*t),
        });
    }
    Ok(SchedNode::User(SchedExpr::Op(SchedOp::Call, args)))
}

/// Wrap `inner` in the loop nest described by `bounds` (outermost first),
/// renaming iterators through `subst`.
fn wrap_in_loops(
    bounds: &[&Bound],
    subst: &HashMap<String, Expr>,
    inner: SchedNode,
) -> Result<SchedNode, ScheduleError> {
    let mut node = inner;
    for bound in bounds.iter().rev() {
        let iterator = match subst.get(&bound.iterator) {
            Some(Expr::Ident(fresh)) => fresh.clone(),
            _ => bound.iterator.clone(),
        };
        let lower = bound.lower.clone().substitute(subst);
        let upper = bound.upper.clone().substitute(subst);
        node = SchedNode::For {
            iterator: iterator.clone(),
            init: sched_of(&lower)?,
            cond: SchedExpr::binary(SchedOp::Le, SchedExpr::id(iterator), sched_of(&upper)?),
            body: Box::new(node),
        };
    }
    Ok(node)
}

/// All dates fixed: emit phase by phase.
fn phase_mode(mut insts: Vec<Inst<'_>>) -> Result<SchedNode, ScheduleError> {
    insts.sort_by(|a, b| {
        a.date
            .cmp_total(&b.date)
            .then_with(|| cmp_tuple(&a.set.dims, &b.set.dims))
    });

    let mut nodes = Vec::new();
    let mut rest = insts.as_slice();
    while let Some(first) = rest.first() {
        // One phase: the run of equal dates.
        let phase_len = rest
            .iter()
            .take_while(|inst| inst.date == first.date)
            .count();
        let (phase, tail) = rest.split_at(phase_len);
        rest = tail;

        // Adjacent instances with identical loop nests share one nest.
        let mut phase_rest = phase;
        while let Some(leader) = phase_rest.first() {
            let group_len = phase_rest
                .iter()
                .take_while(|inst| inst.set.bounds == leader.set.bounds)
                .count();
            let (group, group_tail) = phase_rest.split_at(group_len);
            phase_rest = group_tail;

            let mut subst = HashMap::new();
            for (depth, bound) in leader.set.bounds.iter().enumerate() {
                subst.insert(bound.iterator.clone(), Expr::ident(format!("c{depth}")));
            }

            let mut users = Vec::new();
            for inst in group {
                users.push(user_node(inst, &inst.set.date, &subst)?);
            }
            let inner = match users.len() {
                1 => users.swap_remove(0),
                _ => SchedNode::Block(users),
            };

            let bounds: Vec<&Bound> = leader.set.bounds.iter().collect();
            nodes.push(wrap_in_loops(&bounds, &subst, inner)?);
        }
    }

    Ok(SchedNode::Block(nodes))
}

/// A bound candidate that remembers whether it is affine, so exact
/// min/max selection is possible when differences are constant.
#[derive(Debug, Clone)]
struct Extent {
    expr: Expr,
    affine: Option<Affine>,
}

impl Extent {
    fn of(expr: Expr) -> Extent {
        let affine = Affine::of(&expr);
        let expr = match &affine {
            // Normalize through the affine form so equal extents are
            // structurally equal and guard elision can see it.
            Some(affine) => affine.to_expr(),
            None => expr,
        };
        Extent { expr, affine }
    }

    fn min(self, other: Extent) -> Extent {
        match (&self.affine, &other.affine) {
            (Some(a), Some(b)) => match a.try_cmp(b) {
                Some(Ordering::Greater) => other,
                Some(_) => self,
                None => Extent {
                    expr: self.expr.min(other.expr),
                    affine: None,
                },
            },
            _ => Extent {
                expr: self.expr.min(other.expr),
                affine: None,
            },
        }
    }

    fn max(self, other: Extent) -> Extent {
        match (&self.affine, &other.affine) {
            (Some(a), Some(b)) => match a.try_cmp(b) {
                Some(Ordering::Less) => other,
                Some(_) => self,
                None => Extent {
                    expr: self.expr.max(other.expr),
                    affine: None,
                },
            },
            _ => Extent {
                expr: self.expr.max(other.expr),
                affine: None,
            },
        }
    }
}

/// Dates move with iterators: one loop over the scheduled date `c0`.
fn date_loop_mode(mut insts: Vec<Inst<'_>>) -> Result<SchedNode, ScheduleError> {
    insts.sort_by(|a, b| cmp_tuple(&a.set.dims, &b.set.dims).then(a.index.cmp(&b.index)));

    // Each instance's date range, as [lower + offset, upper + offset].
    let mut ranges = Vec::with_capacity(insts.len());
    for inst in &insts {
        let offset = inst.offset.to_expr();
        let (low, high) = match inst.driver {
            Some(bound) => (
                Extent::of(bound.lower.clone().add(offset.clone())),
                Extent::of(bound.upper.clone().add(offset)),
            ),
            None => (Extent::of(offset.clone()), Extent::of(offset)),
        };
        ranges.push((low, high));
    }

    let Some(global_low) = ranges.iter().map(|(low, _)| low.clone()).reduce(Extent::min) else {
        return Ok(SchedNode::Block(Vec::new()));
    };
    let Some(global_high) = ranges
        .iter()
        .map(|(_, high)| high.clone())
        .reduce(Extent::max)
    else {
        return Ok(SchedNode::Block(Vec::new()));
    };

    let mut items = Vec::with_capacity(insts.len());
    for (inst, (low, high)) in insts.iter().zip(&ranges) {
        let mut subst = HashMap::new();
        let mut inner_bounds = Vec::new();
        if let Some(driver) = inst.driver {
            subst.insert(
                driver.iterator.clone(),
                Expr::ident("c0").sub(inst.offset.to_expr()),
            );
        }
        let mut depth = 1;
        for bound in &inst.set.bounds {
            if inst
                .driver
                .is_some_and(|driver| driver.iterator == bound.iterator)
            {
                continue;
            }
            subst.insert(bound.iterator.clone(), Expr::ident(format!("c{depth}")));
            depth += 1;
            inner_bounds.push(bound);
        }

        let user = user_node(inst, &Expr::ident("c0"), &subst)?;
        let nest = wrap_in_loops(&inner_bounds, &subst, user)?;

        // Guard to the instance's own date range; bounds shared with the
        // loop are elided.
        let mut guards = Vec::new();
        match inst.driver {
            Some(_) => {
                if low.expr != global_low.expr {
                    guards.push(SchedExpr::binary(
                        SchedOp::Ge,
                        SchedExpr::id("c0"),
                        sched_of(&low.expr)?,
                    ));
                }
                if high.expr != global_high.expr {
                    guards.push(SchedExpr::binary(
                        SchedOp::Le,
                        SchedExpr::id("c0"),
                        sched_of(&high.expr)?,
                    ));
                }
            }
            None => {
                guards.push(SchedExpr::binary(
                    SchedOp::Eq,
                    SchedExpr::id("c0"),
                    sched_of(&low.expr)?,
                ));
            }
        }

        let item = match guards.into_iter().reduce(|a, b| {
            SchedExpr::binary(SchedOp::And, a, b)
        }) {
            Some(cond) => SchedNode::If {
                cond,
                then_branch: Box::new(nest),
                else_branch: None,
            },
            None => nest,
        };
        items.push(item);
    }

    let body = match items.len() {
        1 => items.swap_remove(0),
        _ => SchedNode::Block(items),
    };

    Ok(SchedNode::Block(vec![SchedNode::For {
        iterator: "c0".into(),
        init: sched_of(&global_low.expr)?,
        cond: SchedExpr::binary(
            SchedOp::Le,
            SchedExpr::id("c0"),
            sched_of(&global_high.expr)?,
        ),
        body: Box::new(body),
    }]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::annotate;
    use crate::parser::parse_program;
    use crate::sets::{program_to_union, StringTable};

    fn scheduled(source: &str, params: &[&str]) -> Result<SchedNode, ScheduleError> {
        let mut program = parse_program(source).expect("test program should parse");
        annotate(&mut program);
        let params: Vec<String> = params.iter().map(|p| p.to_string()).collect();
        let mut table = StringTable::new();
        let union = program_to_union(&program, &params, &mut table).expect("sets should build");
        LexScheduler.schedule(&union)
    }

    fn call_name(node: &SchedNode) -> &str {
        let SchedNode::User(SchedExpr::Op(SchedOp::Call, args)) = node else {
            panic!("expected a user node, got {node:?}");
        };
        let SchedExpr::Id(name) = &args[0] else {
            panic!("expected a callee id");
        };
        name
    }

    #[test]
    fn constant_dates_become_phases() {
        let node = scheduled("clocked finish { S(); advance; T(); advance; U(); }", &[])
            .expect("schedulable");
        let SchedNode::Block(phases) = node else {
            panic!("expected a block");
        };
        assert_eq!(phases.len(), 3);
        assert_eq!(call_name(&phases[0]), "stmt0");
        assert_eq!(call_name(&phases[1]), "stmt1");
        assert_eq!(call_name(&phases[2]), "stmt2");

        // Date argument is the first coordinate.
        let SchedNode::User(SchedExpr::Op(_, args)) = &phases[1] else {
            unreachable!();
        };
        assert_eq!(args[1], SchedExpr::Int(1));
    }

    #[test]
    fn shared_loop_nest_in_one_phase() {
        let node = scheduled("finish { for i in (0..N) { S(i); T(i); } }", &["N"])
            .expect("schedulable");
        let SchedNode::Block(nodes) = node else {
            panic!("expected a block");
        };
        assert_eq!(nodes.len(), 1, "both calls share one loop");
        let SchedNode::For { iterator, body, .. } = &nodes[0] else {
            panic!("expected a loop, got {:?}", nodes[0]);
        };
        assert_eq!(iterator, "c0");
        let SchedNode::Block(users) = body.as_ref() else {
            panic!("expected a block body");
        };
        assert_eq!(users.len(), 2);
    }

    #[test]
    fn moving_dates_become_a_date_loop() {
        let node = scheduled(
            "clocked finish { for i in (0..N) { S(i); advance; T(i); } }",
            &["N"],
        )
        .expect("schedulable");

        let SchedNode::Block(top) = node else {
            panic!("expected a block");
        };
        let SchedNode::For {
            iterator,
            init,
            cond,
            body,
        } = &top[0]
        else {
            panic!("expected the date loop, got {:?}", top[0]);
        };
        assert_eq!(iterator, "c0");
        assert_eq!(*init, SchedExpr::Int(0));
        // c0 <= N + 1
        let SchedExpr::Op(SchedOp::Le, parts) = cond else {
            panic!("expected a <= condition");
        };
        let SchedExpr::Op(SchedOp::Add, upper) = &parts[1] else {
            panic!("expected N + 1 as upper bound, got {:?}", parts[1]);
        };
        assert_eq!(upper[0], SchedExpr::id("N"));
        assert_eq!(upper[1], SchedExpr::Int(1));

        // Two guarded instances: S guarded above, T guarded below.
        let SchedNode::Block(items) = body.as_ref() else {
            panic!("expected a block body");
        };
        assert_eq!(items.len(), 2);
        let SchedNode::If { cond: s_guard, .. } = &items[0] else {
            panic!("expected S to be guarded");
        };
        assert!(matches!(s_guard, SchedExpr::Op(SchedOp::Le, _)));
        let SchedNode::If { cond: t_guard, .. } = &items[1] else {
            panic!("expected T to be guarded");
        };
        assert!(matches!(t_guard, SchedExpr::Op(SchedOp::Ge, _)));
    }

    #[test]
    fn full_range_instance_is_unguarded() {
        let node = scheduled("clocked finish { for i in (0..1) { S(i); advance; } }", &[])
            .expect("schedulable");
        let SchedNode::Block(top) = node else {
            panic!("expected a block");
        };
        let SchedNode::For { body, .. } = &top[0] else {
            panic!("expected the date loop");
        };
        // Only S, spanning the whole range: no guard at all.
        assert_eq!(call_name(body.as_ref()), "stmt0");
    }

    #[test]
    fn scaled_iterator_dates_are_rejected() {
        let err = scheduled(
            "clocked finish { for i in (0..N) { advance; advance; S(i); } }",
            &["N"],
        )
        .unwrap_err();
        assert!(matches!(err, ScheduleError::UnsupportedDate(_)));
    }

    #[test]
    fn non_affine_dates_are_rejected() {
        let err = scheduled(
            "clocked finish { for i in (0..min(N, M)) { advance; } S(); }",
            &["N", "M"],
        )
        .unwrap_err();
        assert!(matches!(err, ScheduleError::NonAffineDate(_)));
    }

    #[test]
    fn empty_union_schedules_to_nothing() {
        let node = LexScheduler.schedule(&UnionSet::default()).unwrap();
        assert_eq!(node, SchedNode::Block(Vec::new()));
    }
}
