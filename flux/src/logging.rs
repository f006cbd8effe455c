//! Structured logging setup shared by the auth server and the hammer. Both binaries build a
//! `slog::Logger` from the same two switches (`ConsoleLoggingEnabled`, `FileLoggingEnabled`) and
//! pass it down into every subsystem constructor instead of reaching for a global logger (Design
//! Note §9 — no process-wide mutable state).

pub use slog::{self, debug, error, info, o, warn, Logger};
use slog::Drain;

use sloggers::file::FileLoggerBuilder;
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;
use std::path::Path;

pub struct LoggingOptions<'a> {
    pub console: bool,
    pub file: bool,
    pub file_path: &'a Path,
    pub level: Severity,
}

impl<'a> Default for LoggingOptions<'a> {
    fn default() -> Self {
        LoggingOptions {
            console: true,
            file: false,
            file_path: Path::new("authenticator.log"),
            level: Severity::Info,
        }
    }
}

/// Builds the root logger. Both sinks disabled yields a `Discard` drain rather than failing — an
/// operator who turns off all logging still gets a working server, just a silent one.
pub fn init(opts: &LoggingOptions) -> Logger {
    let console_logger = if opts.console {
        let mut builder = TerminalLoggerBuilder::new();
        builder.level(opts.level);
        builder.destination(Destination::Stderr);
        Some(builder.build().expect("failed to build terminal logger"))
    } else {
        None
    };

    let file_logger = if opts.file {
        let mut builder = FileLoggerBuilder::new(opts.file_path);
        builder.level(opts.level);
        Some(builder.build().expect("failed to build file logger"))
    } else {
        None
    };

    match (console_logger, file_logger) {
        (Some(console), Some(file)) => {
            Logger::root(slog::Duplicate::new(console, file).fuse(), o!())
        }
        (Some(console), None) => console,
        (None, Some(file)) => file,
        (None, None) => Logger::root(slog::Discard, o!()),
    }
}
