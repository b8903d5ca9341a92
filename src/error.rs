//! Error taxonomy for the pipeline.
//!
//! Four failure classes reach the user: parse errors in the input program,
//! shape errors (a pass reached a node missing its annotations), scheduler
//! errors (the built-in scheduler cannot express the schedule, or its output
//! is malformed), and I/O errors around the input and output files. Each
//! maps to its own exit code in the binary. Set-string parse failures are
//! deliberately *not* here: they are per-call skippable warnings.

use thiserror::Error;

/// Input program could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, message: impl Into<String>) -> ParseError {
        ParseError {
            line,
            message: message.into(),
        }
    }
}

/// The built-in scheduler cannot produce a schedule for the instance sets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// A date expression is not affine in iterators and parameters.
    #[error("date expression `{0}` is not affine")]
    NonAffineDate(String),

    /// A date uses several iterators or a scaled iterator; out of reach for
    /// the reference scheduler.
    #[error("date expression `{0}` is beyond the reference scheduler (single iterator, coefficient 1)")]
    UnsupportedDate(String),

    /// An expression kind with no scheduler-side counterpart.
    #[error("expression `{0}` cannot be emitted into a schedule")]
    UnsupportedExpression(String),
}

/// The scheduler handed back an AST the reverse translator rejects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReverseError {
    /// Ternary, member or addressing expressions are not part of the target
    /// language.
    #[error("scheduled expression kind not translatable: {0}")]
    UnsupportedExpression(String),

    /// A loop condition that is not a `<` or `<=` comparison.
    #[error("malformed scheduled loop condition: {0}")]
    MalformedLoopCondition(String),

    /// A leaf node whose expression is not a plain call.
    #[error("malformed scheduled call: {0}")]
    MalformedCall(String),
}

/// Recovery could not restore a call from its coordinate trail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecoverError {
    /// The cleaned argument list does not end in an integer tag.
    #[error("call `{0}` carries no name tag")]
    MissingTag(String),

    /// The tag does not index the string table.
    #[error("name tag {0} is outside the string table")]
    UnknownTag(i64),
}

/// Top-level pipeline error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// An annotator invariant was violated: a pass reached a node that is
    /// not in the state it requires.
    #[error("malformed tree: {0}")]
    Shape(String),

    #[error("scheduler: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("scheduler output: {0}")]
    Reverse(#[from] ReverseError),

    #[error("recovery: {0}")]
    Recover(#[from] RecoverError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
