//! Decorates the tree with levels, boundaries, and dates.
//!
//! Two walks. The first assigns every instruction its *level* (the lexical
//! coordinate path from the root) and its *boundaries* (the accumulated loop
//! constraints as a Presburger conjunction). The second computes *dates*:
//! for every list, each element's date is the number of `advance`s the scope
//! has issued before the element runs, as a symbolic expression over the
//! enclosing iterators.
//!
//! Level paths: children of a list are numbered `0, 1, 2, ...` (`advance`
//! does not consume a number). A `for` extends the path with its iterator
//! name, `finish` with `f`, `async` with `a`, the branches of a
//! conditional with `t` and `e`, a call with the date marker `d`. Every
//! structural step contributes a position and a symbol, which is what
//! keeps coordinates and symbols strictly alternating in the instance
//! tuples. Conditions themselves are *not* folded into boundaries; the
//! guard is lost to the scheduler, which is a known limitation.
//!
//! Dates: for a list under iterator `i`, each element starts at
//! `i * A(list)` where `A` counts advances per iteration, plus the inherited
//! base date, plus a running total of the advances issued by earlier
//! siblings. A loop sibling contributes `(upper - lower + 1) * A(body)` to
//! the running total, matching its advance count over all iterations.

use crate::ast::{Instruction, InstructionKind};
use crate::expr::Expr;

/// Annotate a whole program in place: levels and boundaries first, then
/// dates.
pub fn annotate(program: &mut [Instruction]) {
    decorate(program, None, "");
    compute_dates(program, None, None);
}

/// Number of `advance`s one pass over `list` issues, as a symbolic
/// expression. Advances inside conditionals or nested blocks belong to
/// their own scopes and are not counted here.
pub fn count_advances(list: &[Instruction]) -> Expr {
    let mut count = Expr::number(0);
    for instruction in list {
        match &instruction.kind {
            InstructionKind::Advance => {
                count = count.add(Expr::number(1));
            }
            InstructionKind::For {
                lower, upper, body, ..
            } => {
                let iterations = upper.clone().sub(lower.clone()).add(Expr::number(1));
                count = count.add(iterations.mul(count_advances(body)));
            }
            _ => {}
        }
    }
    count
}

fn decorate(list: &mut [Instruction], prefix: Option<&str>, boundaries: &str) {
    let mut position = 0usize;
    for instruction in list.iter_mut() {
        let current = match prefix {
            None => position.to_string(),
            Some(prefix) => format!("{prefix},{position}"),
        };
        instruction.annotation.boundaries = Some(boundaries.to_string());

        match &mut instruction.kind {
            InstructionKind::Call { .. } => {
                instruction.annotation.level = Some(format!("{current},d"));
            }
            InstructionKind::For {
                identifier,
                lower,
                upper,
                body,
            } => {
                let child_prefix = format!("{current},{identifier}");
                let constraint = format!("{lower} <= {identifier} <= {upper}");
                let child_boundaries = if boundaries.is_empty() {
                    constraint
                } else {
                    format!("{boundaries} and {constraint}")
                };
                decorate(body, Some(&child_prefix), &child_boundaries);
                instruction.annotation.level = Some(current.clone());
            }
            InstructionKind::If {
                then_body,
                else_body,
                ..
            } => {
                decorate(then_body, Some(&format!("{current},t")), boundaries);
                if let Some(else_body) = else_body {
                    decorate(else_body, Some(&format!("{current},e")), boundaries);
                }
                instruction.annotation.level = Some(current.clone());
            }
            InstructionKind::Advance => {
                instruction.annotation.level = Some(current.clone());
            }
            InstructionKind::Finish(body) | InstructionKind::ClockedFinish(body) => {
                decorate(body, Some(&format!("{current},f")), boundaries);
                instruction.annotation.level = Some(current.clone());
            }
            InstructionKind::Async(body) | InstructionKind::ClockedAsync(body) => {
                decorate(body, Some(&format!("{current},a")), boundaries);
                instruction.annotation.level = Some(current.clone());
            }
        }

        if !instruction.is_advance() {
            position += 1;
        }
    }
}

fn compute_dates(list: &mut [Instruction], base: Option<&Expr>, iterator: Option<&str>) {
    let advance_count = count_advances(list);

    // Start every element at `iterator * A(list)` plus the inherited base.
    for instruction in list.iter_mut() {
        let mut date = match iterator {
            None => Expr::number(0),
            Some(name) => Expr::ident(name).mul(advance_count.clone()),
        };
        if let Some(base) = base {
            date = date.add(base.clone());
        }
        instruction.annotation.date = Some(date);
    }

    // Add the advances issued by earlier siblings.
    let mut advances = Expr::number(0);
    for instruction in list.iter_mut() {
        if let Some(date) = instruction.annotation.date.take() {
            instruction.annotation.date = Some(date.add(advances.clone()));
        }
        match &instruction.kind {
            InstructionKind::Advance => {
                advances = advances.add(Expr::number(1));
            }
            InstructionKind::For {
                lower, upper, body, ..
            } => {
                let iterations = upper.clone().sub(lower.clone()).add(Expr::number(1));
                advances = advances.add(iterations.mul(count_advances(body)));
            }
            _ => {}
        }
    }

    // Recurse with the child's inherited date.
    for instruction in list.iter_mut() {
        let date = match instruction.annotation.date.clone() {
            Some(date) => date,
            None => continue,
        };
        match &mut instruction.kind {
            InstructionKind::For {
                identifier,
                lower,
                body,
                ..
            } => {
                // The body restarts the iterator at its lower bound.
                let child_base = date.sub(lower.clone());
                compute_dates(body, Some(&child_base), Some(identifier.as_str()));
            }
            InstructionKind::If {
                then_body,
                else_body,
                ..
            } => {
                compute_dates(then_body, Some(&date), iterator);
                if let Some(else_body) = else_body {
                    compute_dates(else_body, Some(&date), iterator);
                }
            }
            InstructionKind::Finish(body)
            | InstructionKind::Async(body)
            | InstructionKind::ClockedFinish(body)
            | InstructionKind::ClockedAsync(body) => {
                compute_dates(body, Some(&date), None);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;
    use std::collections::HashMap;

    fn annotated(source: &str) -> Vec<Instruction> {
        let mut program = parse_program(source).expect("test program should parse");
        annotate(&mut program);
        program
    }

    /// Collect `(name, annotation)` for every call in the tree.
    fn calls(list: &[Instruction]) -> Vec<&Instruction> {
        let mut found = Vec::new();
        for instruction in list {
            if instruction.is_call() {
                found.push(instruction);
            }
            match &instruction.kind {
                InstructionKind::If {
                    then_body,
                    else_body,
                    ..
                } => {
                    found.extend(calls(then_body));
                    if let Some(else_body) = else_body {
                        found.extend(calls(else_body));
                    }
                }
                _ => {
                    if let Some(body) = instruction.body() {
                        found.extend(calls(body));
                    }
                }
            }
        }
        found
    }

    #[test]
    fn level_paths_follow_the_walk() {
        let program = annotated("clocked finish { for i in (0..N) { S(i); advance; T(i); } }");
        let calls = calls(&program);
        assert_eq!(calls[0].annotation.level.as_deref(), Some("0,f,0,i,0,d"));
        assert_eq!(calls[1].annotation.level.as_deref(), Some("0,f,0,i,1,d"));
    }

    #[test]
    fn advance_does_not_take_a_position() {
        let program = annotated("clocked finish { S(); advance; T(); }");
        let calls = calls(&program);
        assert_eq!(calls[0].annotation.level.as_deref(), Some("0,f,0,d"));
        assert_eq!(calls[1].annotation.level.as_deref(), Some("0,f,1,d"));
    }

    #[test]
    fn branch_levels_carry_their_side() {
        let program = annotated("if (N > 0) { S(); } else { T(); U(); }");
        let calls = calls(&program);
        assert_eq!(calls[0].annotation.level.as_deref(), Some("0,t,0,d"));
        assert_eq!(calls[1].annotation.level.as_deref(), Some("0,e,0,d"));
        assert_eq!(calls[2].annotation.level.as_deref(), Some("0,e,1,d"));
    }

    #[test]
    fn boundaries_accumulate_across_loops() {
        let program = annotated("for i in (0..N) { for j in (1..i) { S(i, j); } }");
        let calls = calls(&program);
        assert_eq!(
            calls[0].annotation.boundaries.as_deref(),
            Some("0 <= i <= N and 1 <= j <= i")
        );
    }

    #[test]
    fn every_call_is_fully_annotated() {
        let program =
            annotated("clocked finish { if (N > 0) { S(); } else { T(); } for i in (0..N) U(i); }");
        for call in calls(&program) {
            assert!(call.annotation.level.is_some());
            assert!(call.annotation.boundaries.is_some());
            assert!(call.annotation.date.is_some());
        }
    }

    #[test]
    fn dates_inside_a_clocked_loop() {
        let program = annotated("clocked finish { for i in (0..N) { S(i); advance; T(i); } }");
        let calls = calls(&program);
        assert_eq!(calls[0].annotation.date.as_ref().unwrap().to_string(), "i");
        assert_eq!(
            calls[1].annotation.date.as_ref().unwrap().to_string(),
            "(i + 1)"
        );
    }

    #[test]
    fn dates_count_earlier_siblings() {
        let program = annotated("clocked finish { S(); advance; T(); advance; U(); }");
        let dates: Vec<String> = calls(&program)
            .iter()
            .map(|c| c.annotation.date.as_ref().unwrap().to_string())
            .collect();
        assert_eq!(dates, ["0", "1", "2"]);
    }

    #[test]
    fn same_call_twice_gets_distinct_dates() {
        let program = annotated("clocked finish { S(); advance; S(); }");
        let dates: Vec<String> = calls(&program)
            .iter()
            .map(|c| c.annotation.date.as_ref().unwrap().to_string())
            .collect();
        assert_eq!(dates, ["0", "1"]);
    }

    #[test]
    fn loop_sibling_contributes_all_its_iterations() {
        // The statement after the loop runs after upper-lower+1 advances.
        let program = annotated("clocked finish { for i in (0..4) { advance; } S(); }");
        let calls = calls(&program);
        assert_eq!(calls[0].annotation.date.as_ref().unwrap().to_string(), "5");
    }

    #[test]
    fn advance_count_matches_execution() {
        let program = parse_program("for i in (2..5) { advance; advance; }").unwrap();
        assert_eq!(count_advances(&program), Expr::number(8));

        let program = parse_program("advance; for i in (0..N) { advance; }").unwrap();
        // 1 + (N - 0 + 1) * 1, with the constants merged by folding.
        assert_eq!(count_advances(&program).to_string(), "(N + 2)");
    }

    #[test]
    fn dates_are_distinct_within_a_clock_scope() {
        let program = annotated("clocked finish { for i in (0..3) { S(i); advance; T(i); } }");
        let calls = calls(&program);
        for i in 0..=3 {
            let env: HashMap<String, i64> = [("i".to_string(), i)].into();
            let mut seen = Vec::new();
            for call in &calls {
                let date = call.annotation.date.as_ref().unwrap().eval(&env).unwrap();
                assert!(
                    !seen.contains(&date),
                    "date {date} assigned twice at i = {i}"
                );
                seen.push(date);
            }
        }
    }

    #[test]
    fn blocks_reset_the_iterator() {
        // The async body is not multiplied by the loop iterator again; it
        // inherits the block's date.
        let program = annotated("clocked finish { for i in (0..N) { async { S(i); } advance; } }");
        let calls = calls(&program);
        assert_eq!(calls[0].annotation.date.as_ref().unwrap().to_string(), "i");
    }
}
