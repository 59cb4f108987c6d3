#![allow(dead_code)]
#[macro_use]
mod errors;
mod command;
mod session;
mod shell;
mod storage;
use clap::Parser;
use errors::Error;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `program <db-file>` (spec.md §6): a single positional argument
/// naming the table file to open (created if it doesn't exist yet).
/// Left optional here, not `required`, so a missing argument can be
/// reported with spec.md's exact wording instead of clap's generic
/// "required argument" message.
#[derive(Parser)]
#[command(name = "myjql", version = VERSION, about = "A tiny B+tree-backed key/value table.")]
struct Cli {
    /// Path to the database file.
    db_file: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    let Some(db_file) = cli.db_file else {
        println!("Must supply a database filename.");
        std::process::exit(1);
    };

    let log_path = format!("{}.log", db_file.display());
    let file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(&log_path)
        .expect("Failed to open log file");

    tracing_subscriber::fmt()
        .with_writer(file)
        .with_ansi(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut session = match session::Session::open(&db_file) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let result = shell::run(&mut session);
    if let Err(e) = session.close() {
        eprintln!("{}", e);
    }

    match result {
        Ok(()) => (),
        Err(Error::Io(ref e)) if e.kind() == io::ErrorKind::Interrupted => (),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
