//! The pipeline: annotate, build sets, schedule, translate back, recover.
//!
//! Every stage consumes its input and produces an owned tree; nothing is
//! shared across stages and nothing survives an error. `transform` works on
//! parsed programs, `compile_source` on text, `compile_file` on paths (the
//! binary's entry point).

use crate::annotate::annotate;
use crate::ast::Instruction;
use crate::error::Error;
use crate::parser::parse_program;
use crate::pretty::{program_to_string, Style};
use crate::recover::recover;
use crate::reverse::sched_to_program;
use crate::schedule::Scheduler;
use crate::sets::{program_to_union, StringTable};
use std::fs;
use std::path::Path;
use tracing::{debug, trace};

/// Run the clock-elimination pipeline over a parsed program.
pub fn transform(
    mut program: Vec<Instruction>,
    params: &[String],
    scheduler: &dyn Scheduler,
) -> Result<Vec<Instruction>, Error> {
    annotate(&mut program);
    debug!("program annotated");

    let mut table = StringTable::new();
    let union = program_to_union(&program, params, &mut table)?;
    trace!(union = %union, "instance sets");

    let scheduled = scheduler.schedule(&union)?;
    debug!("schedule computed");

    let mut output = sched_to_program(&scheduled)?;
    recover(&mut output, &table)?;
    debug!("structure recovered");

    Ok(output)
}

/// Parse, transform, and render a program in one go.
pub fn compile_source(
    source: &str,
    params: &[String],
    scheduler: &dyn Scheduler,
    style: &Style,
) -> Result<String, Error> {
    let program = parse_program(source)?;
    let output = transform(program, params, scheduler)?;
    Ok(program_to_string(&output, style))
}

/// Compile `input` and write the result to `output`, or to stdout when no
/// output path is given.
pub fn compile_file(
    input: &Path,
    output: Option<&Path>,
    params: &[String],
    scheduler: &dyn Scheduler,
    style: &Style,
) -> Result<(), Error> {
    let source = fs::read_to_string(input)?;
    let text = compile_source(&source, params, scheduler, style)?;
    match output {
        Some(path) => fs::write(path, text)?,
        None => print!("{text}"),
    }
    Ok(())
}
