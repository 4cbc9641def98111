//! Generic utility primitives with zero domain knowledge.
//!
//! - `command` - Command execution behind an injectable runner
//! - `io` - File I/O with consistent error handling
//! - `shell` - Shell and systemd quoting
//! - `template` - Named-placeholder template rendering
//! - `validation` - Input validation helpers

pub mod command;
pub mod io;
pub mod shell;
pub mod template;
pub mod validation;
