//! Recovery of `finish`/`async` structure from coordinate trails.
//!
//! After reverse translation every call looks like
//! `stmt3(c0, 0, f, 0, c0, 1, 2)`: the scheduled date, then the lexical
//! path interleaved with wrapper markers, then the name tag. Two passes
//! turn that back into a surface program.
//!
//! The wrapping pass walks each call's marker slots (even argument indices
//! from 2 on, while at least three arguments remain) with a cursor that
//! starts at the root list. An `f` or `a` marker wraps the cursor's direct
//! child containing the call in a fresh `finish`/`async` — unless that
//! child already is one (shared scheduler structure), or the preceding
//! sibling is a wrapper created for the same coordinate prefix, in which
//! case the child moves into it. The merge is what lets sibling calls that
//! shared a wrapper in the original program share one again; without it a
//! clock-free program would come back over-sequentialized. Non-marker
//! slots just descend a structural level.
//!
//! The cleaning pass then drops the odd-indexed tree positions, drops every
//! marker that follows another argument (the date in front means no marker
//! can lead), drops the date, and finally redeems the trailing tag against
//! the string table to restore the call's original name. What survives are
//! exactly the loop-iterator coordinates. Branch markers (`t`, `e`) clean
//! away like wrapper markers; only `f` and `a` ever wrap.

use crate::ast::{Annotation, Instruction, InstructionKind};
use crate::error::{Error, RecoverError};
use crate::expr::Expr;
use crate::sets::StringTable;

/// Rebuild wrappers, then clean arguments and restore names.
pub fn recover(program: &mut Vec<Instruction>, table: &StringTable) -> Result<(), Error> {
    wrap_calls(program)?;
    clean_calls(program, table)
}

/// Which sublist of an instruction a path descends into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    Body,
    Then,
    Else,
}

/// One step of a path: a child index and the branch taken through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Step {
    index: usize,
    branch: Branch,
}

fn step(index: usize, branch: Branch) -> Step {
    Step { index, branch }
}

/// Path from `list` to the call named `name`, ending at the call itself.
fn find_path(list: &[Instruction], name: &str) -> Option<Vec<Step>> {
    for (index, instruction) in list.iter().enumerate() {
        match &instruction.kind {
            InstructionKind::Call { name: called, .. } if called == name => {
                return Some(vec![step(index, Branch::Body)]);
            }
            InstructionKind::If {
                then_body,
                else_body,
                ..
            } => {
                if let Some(rest) = find_path(then_body, name) {
                    let mut path = vec![step(index, Branch::Then)];
                    path.extend(rest);
                    return Some(path);
                }
                if let Some(else_body) = else_body {
                    if let Some(rest) = find_path(else_body, name) {
                        let mut path = vec![step(index, Branch::Else)];
                        path.extend(rest);
                        return Some(path);
                    }
                }
            }
            _ => {
                if let Some(body) = instruction.body() {
                    if let Some(rest) = find_path(body, name) {
                        let mut path = vec![step(index, Branch::Body)];
                        path.extend(rest);
                        return Some(path);
                    }
                }
            }
        }
    }
    None
}

/// The list reached by descending through every step.
fn navigate<'a>(
    mut list: &'a mut Vec<Instruction>,
    steps: &[Step],
) -> Option<&'a mut Vec<Instruction>> {
    for step in steps {
        let instruction = list.get_mut(step.index)?;
        list = match step.branch {
            Branch::Then => match &mut instruction.kind {
                InstructionKind::If { then_body, .. } => then_body,
                _ => return None,
            },
            Branch::Else => match &mut instruction.kind {
                InstructionKind::If {
                    else_body: Some(else_body),
                    ..
                } => else_body,
                _ => return None,
            },
            Branch::Body => instruction.body_mut()?,
        };
    }
    Some(list)
}

/// Calls in document order, with their argument vectors.
fn collect_calls(list: &[Instruction], found: &mut Vec<(String, Vec<Expr>)>) {
    for instruction in list {
        match &instruction.kind {
            InstructionKind::Call { name, args } => {
                found.push((name.clone(), args.clone()));
            }
            InstructionKind::If {
                then_body,
                else_body,
                ..
            } => {
                collect_calls(then_body, found);
                if let Some(else_body) = else_body {
                    collect_calls(else_body, found);
                }
            }
            _ => {
                if let Some(body) = instruction.body() {
                    collect_calls(body, found);
                }
            }
        }
    }
}

/// Path symbols with no surface counterpart: wrapper markers and the
/// branch markers of a conditional.
fn is_marker(expr: &Expr) -> bool {
    matches!(expr, Expr::Ident(id) if id == "f" || id == "a" || id == "t" || id == "e")
}

fn wrapper_matches(instruction: &Instruction, finish: bool) -> bool {
    match &instruction.kind {
        InstructionKind::Finish(_) => finish,
        InstructionKind::Async(_) => !finish,
        _ => false,
    }
}

/// The coordinate prefix a wrapper was created for, used to merge siblings.
fn prefix_key(args: &[Expr]) -> String {
    args.iter()
        .map(|arg| arg.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn wrap_calls(program: &mut Vec<Instruction>) -> Result<(), Error> {
    let mut calls = Vec::new();
    collect_calls(program, &mut calls);

    for (name, args) in calls {
        let mut depth = 0usize;
        let mut slot = 2usize;

        // A slot is live while at least three arguments remain at it.
        while args.len() >= slot + 3 {
            let path = find_path(program, &name)
                .ok_or_else(|| Error::Shape(format!("call `{name}` vanished during recovery")))?;
            if depth + 1 > path.len() {
                break;
            }
            let strictly_inside = path.len() > depth + 1;

            match &args[slot] {
                Expr::Ident(id) if id == "f" || id == "a" => {
                    let finish = id == "f";
                    let key = prefix_key(&args[..slot]);
                    let child_index = path[depth].index;
                    let list = navigate(program, &path[..depth]).ok_or_else(|| {
                        Error::Shape(format!("recovery cursor for `{name}` left the tree"))
                    })?;

                    if strictly_inside && wrapper_matches(&list[child_index], finish) {
                        // The scheduler kept this structure shared; reuse it.
                        depth += 1;
                    } else if child_index > 0
                        && wrapper_matches(&list[child_index - 1], finish)
                        && list[child_index - 1].annotation.level.as_deref() == Some(key.as_str())
                    {
                        // The preceding sibling wrapper came from the same
                        // coordinate prefix: this call belongs inside it.
                        let child = list.remove(child_index);
                        let previous = &mut list[child_index - 1];
                        if let Some(body) = previous.body_mut() {
                            body.push(child);
                        }
                        depth += 1;
                    } else {
                        let child = list.remove(child_index);
                        let mut wrapper = if finish {
                            Instruction::finish(vec![child])
                        } else {
                            Instruction::async_block(vec![child])
                        };
                        wrapper.annotation.level = Some(key);
                        list.insert(child_index, wrapper);
                        depth += 1;
                    }
                }
                _ => {
                    // Iterator or literal: one structural level down.
                    if strictly_inside {
                        depth += 1;
                    }
                }
            }

            slot += 2;
        }
    }

    Ok(())
}

fn clean_calls(list: &mut Vec<Instruction>, table: &StringTable) -> Result<(), Error> {
    for instruction in list.iter_mut() {
        // Wrap keys and stale scheduling annotations have no business in
        // the output tree.
        instruction.annotation = Annotation::default();

        match &mut instruction.kind {
            InstructionKind::Call { name, args } => {
                clean_one(name, args, table)?;
            }
            InstructionKind::If {
                then_body,
                else_body,
                ..
            } => {
                clean_calls(then_body, table)?;
                if let Some(else_body) = else_body {
                    clean_calls(else_body, table)?;
                }
            }
            _ => {
                if let Some(body) = instruction.body_mut() {
                    clean_calls(body, table)?;
                }
            }
        }
    }
    Ok(())
}

fn clean_one(name: &mut String, args: &mut Vec<Expr>, table: &StringTable) -> Result<(), Error> {
    // Tree positions sit at the odd indices.
    let kept: Vec<Expr> = std::mem::take(args)
        .into_iter()
        .enumerate()
        .filter_map(|(i, arg)| (i % 2 == 0).then_some(arg))
        .collect();

    // Markers always follow something (the date leads), so dropping every
    // marker after the head removes them all.
    let mut cleaned: Vec<Expr> = Vec::with_capacity(kept.len());
    for (i, arg) in kept.into_iter().enumerate() {
        if i > 0 && is_marker(&arg) {
            continue;
        }
        cleaned.push(arg);
    }

    if cleaned.is_empty() {
        return Err(RecoverError::MissingTag(name.clone()).into());
    }
    // The scheduled date.
    cleaned.remove(0);

    let tag = match cleaned.last() {
        Some(Expr::Number(tag)) => *tag,
        _ => return Err(RecoverError::MissingTag(name.clone()).into()),
    };
    cleaned.pop();

    let original = usize::try_from(tag)
        .ok()
        .and_then(|index| table.get(index))
        .ok_or(RecoverError::UnknownTag(tag))?;

    *name = original.to_string();
    *args = cleaned;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_of(names: &[&str]) -> StringTable {
        let mut table = StringTable::new();
        for name in names {
            table.intern(name);
        }
        table
    }

    fn synthetic(name: &str, coords: &[Expr]) -> Instruction {
        Instruction::call(name, coords.to_vec())
    }

    fn n(v: i64) -> Expr {
        Expr::number(v)
    }

    fn id(name: &str) -> Expr {
        Expr::ident(name)
    }

    #[test]
    fn distinct_prefixes_get_distinct_wrappers() {
        // Two phases of a clocked finish: dates 0 and 1.
        let mut program = vec![
            synthetic("stmt0", &[n(0), n(0), id("f"), n(0), n(0)]),
            synthetic("stmt1", &[n(1), n(0), id("f"), n(1), n(1)]),
        ];
        let table = table_of(&["S", "T"]);
        recover(&mut program, &table).unwrap();

        assert_eq!(program.len(), 2);
        for (instruction, expected) in program.iter().zip(["S", "T"]) {
            let InstructionKind::Finish(body) = &instruction.kind else {
                panic!("expected a finish wrapper, got {:?}", instruction.kind);
            };
            assert_eq!(body.len(), 1);
            assert_eq!(body[0].identifier(), Some(expected));
            let InstructionKind::Call { args, .. } = &body[0].kind else {
                panic!("expected a call");
            };
            assert!(args.is_empty());
        }
    }

    #[test]
    fn same_prefix_siblings_share_a_wrapper() {
        // finish { async S(); async T(); } — both at date 0, wrapper trail
        // f then a, differing only below the async.
        let mut program = vec![
            synthetic("stmt0", &[n(0), n(0), id("f"), n(0), id("a"), n(0), n(0)]),
            synthetic("stmt1", &[n(0), n(0), id("f"), n(1), id("a"), n(0), n(1)]),
        ];
        let table = table_of(&["S", "T"]);
        recover(&mut program, &table).unwrap();

        assert_eq!(program.len(), 1, "both calls share the finish");
        let InstructionKind::Finish(body) = &program[0].kind else {
            panic!("expected a finish, got {:?}", program[0].kind);
        };
        assert_eq!(body.len(), 2);
        for (instruction, expected) in body.iter().zip(["S", "T"]) {
            let InstructionKind::Async(inner) = &instruction.kind else {
                panic!("expected an async, got {:?}", instruction.kind);
            };
            assert_eq!(inner[0].identifier(), Some(expected));
        }
    }

    #[test]
    fn loops_are_wrapped_whole() {
        // finish around a loop: the wrapper goes outside the for.
        let mut program = vec![Instruction::for_loop(
            "c0",
            n(0),
            n(1),
            vec![synthetic(
                "stmt0",
                &[id("c0"), n(0), id("f"), n(0), id("c0"), n(0), n(0)],
            )],
        )];
        let table = table_of(&["S"]);
        recover(&mut program, &table).unwrap();

        let InstructionKind::Finish(body) = &program[0].kind else {
            panic!("expected finish outside the loop, got {:?}", program[0].kind);
        };
        let InstructionKind::For { body: loop_body, .. } = &body[0].kind else {
            panic!("expected the loop inside");
        };
        let InstructionKind::Call { name, args } = &loop_body[0].kind else {
            panic!("expected the call inside the loop");
        };
        assert_eq!(name, "S");
        assert_eq!(args, &[id("c0")]);
    }

    #[test]
    fn second_call_reuses_shared_structure() {
        // Both calls live under one loop; the second finds the finish
        // already wrapping it and only descends.
        let mut program = vec![Instruction::for_loop(
            "c0",
            n(0),
            n(3),
            vec![
                synthetic("stmt0", &[id("c0"), n(0), id("f"), n(0), id("c0"), n(0), n(0)]),
                synthetic("stmt1", &[id("c0"), n(0), id("f"), n(0), id("c0"), n(1), n(1)]),
            ],
        )];
        let table = table_of(&["S", "T"]);
        recover(&mut program, &table).unwrap();

        assert_eq!(program.len(), 1);
        let InstructionKind::Finish(body) = &program[0].kind else {
            panic!("expected one finish, got {:?}", program[0].kind);
        };
        let InstructionKind::For { body: loop_body, .. } = &body[0].kind else {
            panic!("expected the loop");
        };
        assert_eq!(loop_body.len(), 2);
        assert_eq!(loop_body[0].identifier(), Some("S"));
        assert_eq!(loop_body[1].identifier(), Some("T"));
    }

    #[test]
    fn cleaning_strips_positions_markers_and_date() {
        let mut args = vec![id("c0"), n(0), id("f"), n(0), id("c0"), n(1), n(1)];
        let mut name = "stmt7".to_string();
        let table = table_of(&["S", "T"]);
        clean_one(&mut name, &mut args, &table).unwrap();
        assert_eq!(name, "T");
        assert_eq!(args, vec![id("c0")]);
    }

    #[test]
    fn missing_tag_is_fatal() {
        let table = table_of(&["S"]);
        let mut name = "stmt0".to_string();
        // Trailing coordinate is an identifier, not a tag.
        let mut args = vec![n(0), n(0), id("x")];
        let result = clean_one(&mut name, &mut args, &table);
        assert!(matches!(
            result,
            Err(Error::Recover(RecoverError::MissingTag(_)))
        ));
    }

    #[test]
    fn out_of_range_tag_is_fatal() {
        let table = table_of(&["S"]);
        let mut name = "stmt0".to_string();
        let mut args = vec![n(0), n(0), n(9)];
        let result = clean_one(&mut name, &mut args, &table);
        assert!(matches!(
            result,
            Err(Error::Recover(RecoverError::UnknownTag(9)))
        ));
    }
}
