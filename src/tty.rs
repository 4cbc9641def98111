//! Terminal I/O utilities for CLI.
//!
//! Provides TTY detection and the interactive prompter.

use std::io::{self, BufRead, IsTerminal, Write};

use vllm_provision::prompt::Prompter;
use vllm_provision::{Error, Result};

pub fn is_stdin_tty() -> bool {
    io::stdin().is_terminal()
}

/// Write `message` to stderr and read one line from stdin.
///
/// End of input is an error: re-prompt loops would otherwise spin forever.
pub fn prompt(message: &str) -> Result<String> {
    eprint!("{}", message);
    io::stderr().flush().ok();

    let stdin = io::stdin();
    let mut line = String::new();
    let read = stdin
        .lock()
        .read_line(&mut line)
        .map_err(|e| Error::internal_io(format!("Failed to read input: {}", e), None))?;

    if read == 0 {
        return Err(Error::internal_io(
            "Unexpected end of input",
            Some("read stdin".to_string()),
        )
        .with_hint("Run with --yes to accept defaults without prompting"));
    }

    Ok(line.trim().to_string())
}

/// Print status message to stderr if running in a terminal.
pub fn status(message: &str) {
    if io::stderr().is_terminal() {
        eprintln!("{}", message);
    }
}

/// Prompter reading answers from the controlling terminal.
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn ask(&mut self, question: &str) -> Result<String> {
        prompt(question)
    }

    fn notify(&mut self, message: &str) {
        eprintln!("{}", message);
    }
}
