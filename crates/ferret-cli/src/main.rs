//! `snapshot-tool`: generate and execute bytecode snapshots
//!
//! Exit codes: 0 on success, 23 when the input file is unreadable, 1 for
//! anything else (bad arguments, compile failure, bad magic or version,
//! i/o failure).

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use ferret_snapshot::SNAPSHOT_FILENAME;
use ferret_vm_core::Context;
use tracing_subscriber::filter::EnvFilter;

const EXIT_FAILURE: u8 = 1;
const EXIT_UNREADABLE_INPUT: u8 = 23;

#[derive(Parser)]
#[command(
    name = "snapshot-tool",
    version,
    about = "Generate and execute Ferret bytecode snapshots"
)]
struct Cli {
    /// Parse and compile a script, then write snapshot.bin into the current
    /// directory
    #[arg(long, value_name = "FILE", conflicts_with = "execute")]
    generate: Option<PathBuf>,

    /// Load a snapshot artifact and run it to completion
    #[arg(long, value_name = "FILE")]
    execute: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    if let Some(path) = cli.generate.as_deref() {
        generate(path)
    } else if let Some(path) = cli.execute.as_deref() {
        execute(path)
    } else {
        eprintln!("Usage: snapshot-tool <--generate | --execute> <filename>");
        ExitCode::from(EXIT_FAILURE)
    }
}

fn generate(path: &Path) -> ExitCode {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(_) => {
            eprintln!("Cannot open file.");
            return ExitCode::from(EXIT_UNREADABLE_INPUT);
        }
    };
    let filename = path.display().to_string();
    let mut ctx = Context::new();
    match ferret_snapshot::generate_to_file(
        &mut ctx,
        &filename,
        &source,
        Path::new(SNAPSHOT_FILENAME),
    ) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{error}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn execute(path: &Path) -> ExitCode {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(_) => {
            eprintln!("Cannot open file.");
            return ExitCode::from(EXIT_UNREADABLE_INPUT);
        }
    };
    let mut ctx = Context::new();
    match ferret_snapshot::execute(&mut ctx, &bytes) {
        Ok(_) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{error}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
