//! Instance sets: one parametric integer set per task call.
//!
//! Each annotated call is rendered as Presburger text,
//!
//! ```text
//! [N] -> { [0,f,0,i,0,d] : 0 <= i <= N and d = i }
//! ```
//!
//! then parsed right back. The round trip through text is deliberate: the
//! annotator accumulates boundaries as strings, and parsing its own output
//! is what keeps the textual and structured views honest with each other. A
//! call whose set text does not parse is skipped with a warning and the
//! pipeline continues; a call missing its annotations is a hard error.
//!
//! After parsing, the tuple is shifted: the date dimension moves to the
//! front (making it the primary sort key for the scheduler) and an integer
//! tag identifying the call name is appended. Names live in an append-only
//! [`StringTable`] keyed by first occurrence, so the same name always maps
//! to the same tag.

use crate::ast::{Instruction, InstructionKind};
use crate::error::{Error, ParseError};
use crate::expr::{BinaryOp, Expr};
use crate::parser::{tokenize, Parser, TokenKind};
use std::fmt;
use tracing::{debug, warn};

/// Append-only name table. Indexes are stable: the first occurrence of a
/// name fixes its slot forever.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringTable {
    entries: Vec<String>,
}

impl StringTable {
    pub fn new() -> StringTable {
        StringTable::default()
    }

    /// Index of `name`, appending it first if unseen.
    pub fn intern(&mut self, name: &str) -> usize {
        match self.index_of(name) {
            Some(index) => index,
            None => {
                self.entries.push(name.to_string());
                self.entries.len() - 1
            }
        }
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry == name)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One dimension of a shifted instance tuple.
#[derive(Debug, Clone, PartialEq)]
pub enum Dim {
    /// The scheduled date, always first.
    Date,
    /// A fixed tree position.
    Const(i64),
    /// A wrapper marker (`f`, `a`) or other free symbol.
    Marker(String),
    /// A loop iterator, constrained by a [`Bound`].
    Iter(String),
    /// The call-name tag, always last.
    Tag(i64),
}

/// Inclusive iterator range from an enclosing loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Bound {
    pub iterator: String,
    pub lower: Expr,
    pub upper: Expr,
}

/// The instance set of a single call, already shifted. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceSet {
    /// String-table index of the call name.
    pub tag: usize,
    /// Date first, tree coordinates in the middle, tag last.
    pub dims: Vec<Dim>,
    /// Iterator ranges, outermost loop first.
    pub bounds: Vec<Bound>,
    /// The date as a function of iterators and parameters.
    pub date: Expr,
    /// Pre-shift Presburger rendering this set was parsed from.
    pub text: String,
}

/// Union of all instance sets plus the free parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UnionSet {
    pub params: Vec<String>,
    pub sets: Vec<InstanceSet>,
}

impl fmt::Display for InstanceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match dim {
                Dim::Date => write!(f, "d")?,
                Dim::Const(n) => write!(f, "{n}")?,
                Dim::Marker(name) | Dim::Iter(name) => write!(f, "{name}")?,
                Dim::Tag(t) => write!(f, "{t}")?,
            }
        }
        write!(f, "] : ")?;
        for bound in &self.bounds {
            write!(f, "{} <= {} <= {} and ", bound.lower, bound.iterator, bound.upper)?;
        }
        write!(f, "d = {}", self.date)
    }
}

impl fmt::Display for UnionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.params.is_empty() {
            writeln!(f, "[{}] ->", self.params.join(", "))?;
        }
        for set in &self.sets {
            writeln!(f, "  {{ {set} }}")?;
        }
        Ok(())
    }
}

/// Build the union of instance sets for an annotated program.
pub fn program_to_union(
    program: &[Instruction],
    params: &[String],
    table: &mut StringTable,
) -> Result<UnionSet, Error> {
    let mut sets = Vec::new();
    collect(program, params, table, &mut sets)?;
    debug!(sets = sets.len(), "instance sets built");
    Ok(UnionSet {
        params: params.to_vec(),
        sets,
    })
}

fn collect(
    list: &[Instruction],
    params: &[String],
    table: &mut StringTable,
    sets: &mut Vec<InstanceSet>,
) -> Result<(), Error> {
    for instruction in list {
        match &instruction.kind {
            InstructionKind::Call { name, .. } => {
                if let Some(set) = call_to_set(instruction, name, params, table)? {
                    sets.push(set);
                }
            }
            InstructionKind::If {
                then_body,
                else_body,
                ..
            } => {
                collect(then_body, params, table, sets)?;
                if let Some(else_body) = else_body {
                    collect(else_body, params, table, sets)?;
                }
            }
            InstructionKind::Advance => {}
            _ => {
                if let Some(body) = instruction.body() {
                    collect(body, params, table, sets)?;
                }
            }
        }
    }
    Ok(())
}

fn call_to_set(
    instruction: &Instruction,
    name: &str,
    params: &[String],
    table: &mut StringTable,
) -> Result<Option<InstanceSet>, Error> {
    let annotation = &instruction.annotation;
    let (level, boundaries, date) = match (
        &annotation.level,
        &annotation.boundaries,
        &annotation.date,
    ) {
        (Some(level), Some(boundaries), Some(date)) => (level, boundaries, date),
        _ => {
            return Err(Error::Shape(format!(
                "call `{name}` reached the set builder unannotated"
            )))
        }
    };

    let text = render_set(params, level, boundaries, date);
    let parsed = match parse_set(&text) {
        Ok(parsed) => parsed,
        Err(error) => {
            warn!(call = name, set = %text, %error, "instance set rejected, call skipped");
            return Ok(None);
        }
    };

    match shift(parsed, name, table) {
        Some(mut set) => {
            set.text = text;
            Ok(Some(set))
        }
        None => {
            warn!(call = name, set = %text, "instance set has no date tuple, call skipped");
            Ok(None)
        }
    }
}

/// Pre-shift Presburger rendering of one call.
fn render_set(params: &[String], level: &str, boundaries: &str, date: &Expr) -> String {
    let constraint = if boundaries.is_empty() {
        format!("d = {date}")
    } else {
        format!("{boundaries} and d = {date}")
    };
    if params.is_empty() {
        format!("{{ [{level}] : {constraint} }}")
    } else {
        format!("[{}] -> {{ [{level}] : {constraint} }}", params.join(", "))
    }
}

/// Move the trailing date variable to the front and append the name tag.
fn shift(parsed: ParsedSet, name: &str, table: &mut StringTable) -> Option<InstanceSet> {
    let (last, front) = parsed.tuple.split_last()?;
    if !matches!(last, TupleEntry::Ident(id) if id == "d") {
        return None;
    }
    let date = parsed.atoms.iter().find_map(|atom| match atom {
        Atom::Equal { var, value } if var == "d" => Some(value.clone()),
        _ => None,
    })?;

    let bounds: Vec<Bound> = parsed
        .atoms
        .iter()
        .filter_map(|atom| match atom {
            Atom::Chain { lower, var, upper } => Some(Bound {
                iterator: var.clone(),
                lower: lower.clone(),
                upper: upper.clone(),
            }),
            _ => None,
        })
        .collect();

    let tag = table.intern(name);
    let mut dims = Vec::with_capacity(front.len() + 2);
    dims.push(Dim::Date);
    for entry in front {
        dims.push(match entry {
            TupleEntry::Number(n) => Dim::Const(*n),
            TupleEntry::Ident(id) => {
                if bounds.iter().any(|bound| &bound.iterator == id) {
                    Dim::Iter(id.clone())
                } else {
                    Dim::Marker(id.clone())
                }
            }
        });
    }
    dims.push(Dim::Tag(tag as i64));

    Some(InstanceSet {
        tag,
        dims,
        bounds,
        date,
        text: String::new(),
    })
}

/// A parsed, unshifted set string.
#[derive(Debug, Clone, PartialEq)]
struct ParsedSet {
    params: Vec<String>,
    tuple: Vec<TupleEntry>,
    atoms: Vec<Atom>,
}

#[derive(Debug, Clone, PartialEq)]
enum TupleEntry {
    Number(i64),
    Ident(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Atom {
    /// `lower <= var <= upper`
    Chain {
        lower: Expr,
        var: String,
        upper: Expr,
    },
    /// `var = value`
    Equal { var: String, value: Expr },
}

/// Parse `[params] -> { [tuple] : atom and atom and ... }`. The parameter
/// prefix is optional.
fn parse_set(text: &str) -> Result<ParsedSet, ParseError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser::new(&tokens);

    let mut params = Vec::new();
    if parser.eat(&TokenKind::LBracket) {
        if !parser.eat(&TokenKind::RBracket) {
            loop {
                params.push(parser.expect_ident("parameter name")?);
                if !parser.eat(&TokenKind::Comma) {
                    break;
                }
            }
            parser.expect(&TokenKind::RBracket)?;
        }
        parser.expect(&TokenKind::Arrow)?;
    }

    parser.expect(&TokenKind::LBrace)?;
    parser.expect(&TokenKind::LBracket)?;
    let mut tuple = Vec::new();
    loop {
        let entry = parser.expression()?;
        tuple.push(match entry {
            Expr::Number(n) => TupleEntry::Number(n),
            Expr::Ident(name) => TupleEntry::Ident(name),
            other => {
                return Err(parser.error(format!("tuple entry `{other}` is neither a position nor a symbol")))
            }
        });
        if !parser.eat(&TokenKind::Comma) {
            break;
        }
    }
    parser.expect(&TokenKind::RBracket)?;
    parser.expect(&TokenKind::Colon)?;

    let mut atoms = vec![atom(&mut parser)?];
    while parser.eat_keyword("and") {
        atoms.push(atom(&mut parser)?);
    }
    parser.expect(&TokenKind::RBrace)?;
    if !parser.at_end() {
        return Err(parser.error("trailing input after set"));
    }

    Ok(ParsedSet {
        params,
        tuple,
        atoms,
    })
}

fn atom(parser: &mut Parser<'_>) -> Result<Atom, ParseError> {
    let first = parser.expression()?;
    if parser.eat(&TokenKind::Assign) {
        let Expr::Ident(var) = first else {
            return Err(parser.error(format!("`{first}` cannot be constrained by `=`")));
        };
        let value = parser.expression()?;
        Ok(Atom::Equal { var, value })
    } else if parser.eat(&TokenKind::Le) {
        let Expr::Binary(BinaryOp::Le, lower, var) = first else {
            return Err(parser.error(format!("`{first}` is not the start of a bound chain")));
        };
        let Expr::Ident(var) = *var else {
            return Err(parser.error("bound chains must constrain an identifier"));
        };
        let upper = parser.expression()?;
        Ok(Atom::Chain {
            lower: *lower,
            var,
            upper,
        })
    } else {
        Err(parser.error("constraint is neither a bound chain nor an equality"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::annotate;
    use crate::parser::parse_program;

    fn union_of(source: &str, params: &[&str]) -> (UnionSet, StringTable) {
        let mut program = parse_program(source).expect("test program should parse");
        annotate(&mut program);
        let params: Vec<String> = params.iter().map(|p| p.to_string()).collect();
        let mut table = StringTable::new();
        let union = program_to_union(&program, &params, &mut table).expect("sets should build");
        (union, table)
    }

    #[test]
    fn tuple_shape_of_a_nested_call() {
        let (union, _) =
            union_of("clocked finish { for i in (0..N) { S(i); advance; T(i); } }", &["N"]);
        assert_eq!(union.sets.len(), 2);

        let s = &union.sets[0];
        // level 0,f,0,i,0,d plus the appended tag.
        assert_eq!(s.dims.len(), 7);
        assert_eq!(s.dims[0], Dim::Date);
        assert_eq!(s.dims[1], Dim::Const(0));
        assert_eq!(s.dims[2], Dim::Marker("f".into()));
        assert_eq!(s.dims[4], Dim::Iter("i".into()));
        assert_eq!(*s.dims.last().unwrap(), Dim::Tag(0));
        assert_eq!(s.bounds.len(), 1);
        assert_eq!(s.bounds[0].iterator, "i");
        assert_eq!(s.date.to_string(), "i");

        let t = &union.sets[1];
        assert_eq!(*t.dims.last().unwrap(), Dim::Tag(1));
        assert_eq!(t.date.to_string(), "(i + 1)");
    }

    #[test]
    fn string_table_is_append_only_and_stable() {
        let (union, table) =
            union_of("clocked finish { S(); advance; T(); advance; S(); }", &[]);
        let tags: Vec<usize> = union.sets.iter().map(|s| s.tag).collect();
        assert_eq!(tags, [0, 1, 0]);
        assert_eq!(table.get(0), Some("S"));
        assert_eq!(table.get(1), Some("T"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn calls_in_both_branches_are_collected() {
        let (union, table) = union_of("if (N > 0) { S(); } else { T(); }", &["N"]);
        assert_eq!(union.sets.len(), 2);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn unparsable_set_is_skipped_not_fatal() {
        let mut program = parse_program("finish { S(); T(); }").unwrap();
        annotate(&mut program);
        // Corrupt one call's boundary text.
        let body = program[0].body_mut().unwrap();
        body[0].annotation.boundaries = Some("((".into());

        let mut table = StringTable::new();
        let union = program_to_union(&program, &[], &mut table).expect("pipeline continues");
        assert_eq!(union.sets.len(), 1);
        assert_eq!(table.get(union.sets[0].tag), Some("T"));
    }

    #[test]
    fn unannotated_call_is_a_shape_error() {
        let program = parse_program("finish { S(); }").unwrap();
        let mut table = StringTable::new();
        let result = program_to_union(&program, &[], &mut table);
        assert!(matches!(result, Err(Error::Shape(_))));
    }

    #[test]
    fn set_text_round_trips() {
        let text = "[N] -> { [0,f,0,i,0,d] : 0 <= i <= N and d = (i + 1) }";
        let parsed = parse_set(text).expect("set should parse");
        assert_eq!(parsed.params, ["N"]);
        assert_eq!(parsed.tuple.len(), 6);
        assert_eq!(parsed.atoms.len(), 2);

        let no_params = "{ [0,d] : d = 0 }";
        let parsed = parse_set(no_params).expect("set should parse");
        assert!(parsed.params.is_empty());
        assert_eq!(parsed.tuple.len(), 2);
    }
}
