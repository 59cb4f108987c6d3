//! The line-oriented shell: reads one command per line, dispatches
//! meta-commands (`.exit`, `.constants`) directly and everything else
//! through `command::parse`/`command::execute` (spec.md §6).
//!
//! Input is read off a background thread and handed to the main loop
//! over a channel rather than blocking `main` directly on
//! `Stdin::read_line`. That is what lets a `SIGINT` — observed here as
//! an `AtomicBool` flipped by a `ctrlc` handler, since Rust gives no
//! portable way to interrupt a blocked read — actually end the loop:
//! the main thread is never stuck in the syscall, only in a bounded
//! `recv_timeout`, so it notices the flag within one tick (spec.md §5:
//! "SIGINT causes immediate, clean shutdown"). The reader thread itself
//! is the teacher's `repl/console.rs` input loop with the raw-mode,
//! crossterm-event keystroke handling stripped out (spec.md §6, §8: a
//! piped, scripted stdin has no raw-mode semantics to drive).
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossterm::style::Stylize;
use tracing::{debug, info, warn};

use crate::command;
use crate::errors::Error;
use crate::session::Session;

const PROMPT: &str = "myjql> ";
const MAX_INPUT_LEN: usize = 31;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

enum Line {
    Text(String),
    Eof,
}

fn spawn_reader() -> mpsc::Receiver<Line> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(text) => {
                    if tx.send(Line::Text(text)).is_err() {
                        return;
                    }
                }
                Err(_) => break,
            }
        }
        let _ = tx.send(Line::Eof);
    });
    rx
}

/// Runs the shell loop to completion. Returns `Ok(())` on a clean exit
/// (`.exit`, EOF, or SIGINT); a fatal storage/IO error is returned so
/// `main` can report it and exit non-zero after the session is closed.
pub fn run(session: &mut Session) -> Result<(), Error> {
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = interrupted.clone();
        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
            warn!("failed to install SIGINT handler: {}", e);
        }
    }

    let rx = spawn_reader();
    print_prompt();

    loop {
        if interrupted.load(Ordering::SeqCst) {
            info!("received SIGINT, shutting down");
            return Ok(());
        }

        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(Line::Text(line)) => {
                handle_line(session, &line);
                if line.trim() == ".exit" {
                    return Ok(());
                }
                print_prompt();
            }
            Ok(Line::Eof) => {
                println!("bye~");
                return Ok(());
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }
    }
}

fn print_prompt() {
    print!("{}", PROMPT.cyan());
    let _ = io::stdout().flush();
}

fn handle_line(session: &mut Session, line: &str) {
    if line.len() > MAX_INPUT_LEN {
        println!("Input is too long.");
        return;
    }

    let trimmed = line.trim();
    if trimmed.starts_with('.') {
        handle_meta(trimmed);
        return;
    }

    match command::parse(trimmed) {
        Ok(statement) => match command::execute(&mut session.table, statement) {
            Ok(()) => {
                println!();
                println!("Executed.");
                println!();
            }
            Err(e) if e.is_fatal() => fatal(session, e),
            Err(e) => println!("{}", e),
        },
        Err(e) => println!("{}", e),
    }
}

fn handle_meta(line: &str) {
    match line {
        ".exit" => {
            debug!("received .exit");
        }
        ".constants" => print_constants(),
        other => println!("Unrecognized command '{}'.", other),
    }
}

fn print_constants() {
    let c = crate::storage::constants();
    println!("ROW_SIZE: {}", c.row_size);
    println!("COMMON_NODE_HEADER_SIZE: {}", c.common_node_header_size);
    println!("LEAF_NODE_HEADER_SIZE: {}", c.leaf_node_header_size);
    println!("LEAF_NODE_CELL_SIZE: {}", c.leaf_node_cell_size);
    println!(
        "LEAF_NODE_SPACE_FOR_CELLS: {}",
        c.leaf_node_space_for_cells
    );
    println!("LEAF_NODE_MAX_CELLS: {}", c.leaf_node_max_cells);
}

/// A fatal storage/IO error: report it, attempt the same clean
/// flush+close a normal shutdown would do, and terminate (spec.md §7 —
/// "the at-exit handler still runs and attempts a clean flush+close").
fn fatal(session: &mut Session, e: Error) -> ! {
    eprintln!("{}", e);
    if let Err(close_err) = session.close() {
        eprintln!("additionally failed to close cleanly: {}", close_err);
    }
    std::process::exit(1);
}
