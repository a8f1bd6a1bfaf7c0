//! Log output for a harvest run: terminal, a log file, or both.

use std::fs::File;
use std::path::Path;

use log::LevelFilter;
use serde::{Deserialize, Serialize};
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogDestination {
    File,
    Terminal,
    Both,
}

impl LogDestination {
    fn to_terminal(self) -> bool {
        matches!(self, LogDestination::Terminal | LogDestination::Both)
    }

    fn to_file(self) -> bool {
        matches!(self, LogDestination::File | LogDestination::Both)
    }
}

/// Installs the global logger. The log file is truncated at start.
///
/// An unwritable log file falls back to whatever else was requested; a second
/// call keeps the logger from the first.
pub fn initialize(destination: LogDestination, level: LevelFilter, log_file: &Path) {
    let config = harvest_log_config();
    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();

    if destination.to_terminal() {
        loggers.push(TermLogger::new(
            level,
            config.clone(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ));
    }
    if destination.to_file() {
        match File::create(log_file) {
            Ok(file) => loggers.push(WriteLogger::new(level, config, file)),
            Err(err) => eprintln!("Cannot write log file {}: {}", log_file.display(), err),
        }
    }

    if !loggers.is_empty() {
        let _ = CombinedLogger::init(loggers);
    }
}

fn harvest_log_config() -> Config {
    ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_target_level(LevelFilter::Error)
        // Worker threads are named, so the thread column tells pools apart.
        .set_thread_level(LevelFilter::Debug)
        .add_filter_ignore_str("hyper")
        .add_filter_ignore_str("reqwest")
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_writes_to_terminal_and_file() {
        assert!(LogDestination::Both.to_terminal() && LogDestination::Both.to_file());
        assert!(!LogDestination::File.to_terminal());
        assert!(!LogDestination::Terminal.to_file());
    }
}
