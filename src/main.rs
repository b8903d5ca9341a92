use clap::Parser;
use noclock::pretty::{IndentStyle, Style};
use noclock::{compile_file, Error, LexScheduler};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

// sysexits-style codes: input data, internal failure, I/O.
const EX_DATAERR: u8 = 65;
const EX_SOFTWARE: u8 = 70;
const EX_IOERR: u8 = 74;

/// Remove clock synchronization from a parallel task program.
#[derive(Debug, Parser)]
#[command(name = "noclock", version, about)]
struct Cli {
    /// Input program.
    input: PathBuf,

    /// Output file; stdout when absent.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Free program parameter (repeatable), e.g. -p N -p M.
    #[arg(short = 'p', long = "parameter", value_name = "NAME")]
    parameters: Vec<String>,

    /// Colorize the output.
    #[arg(long)]
    color: bool,

    /// Indent with tabs instead of four spaces.
    #[arg(long)]
    tabs: bool,

    /// Log the pipeline stages to stderr.
    #[arg(short, long)]
    verbose: bool,

    /// Log everything, instance sets included.
    #[arg(long)]
    debug: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.debug {
        "noclock=trace"
    } else if cli.verbose {
        "noclock=debug"
    } else {
        "noclock=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let style = Style {
        color: cli.color,
        indent: if cli.tabs {
            IndentStyle::Tabs
        } else {
            IndentStyle::Spaces
        },
    };

    match compile_file(
        &cli.input,
        cli.output.as_deref(),
        &cli.parameters,
        &LexScheduler,
        &style,
    ) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("noclock: {error}");
            ExitCode::from(match error {
                Error::Parse(_) => EX_DATAERR,
                Error::Io(_) => EX_IOERR,
                _ => EX_SOFTWARE,
            })
        }
    }
}
