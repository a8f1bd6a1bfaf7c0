#![deny(missing_docs)]
//! Shared logging utilities for the harvester workspace.
//!
//! This crate provides the `engine_*` logging macros used across the codebase,
//! a per-thread worker label for pool threads, and a minimal test initializer
//! for the global logger.

use std::cell::RefCell;

thread_local! {
    /// Name of the pool worker running on the current thread, if any.
    static WORKER_LABEL: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Tags the current thread as a pool worker.
/// Pool threads call this once on startup so their log lines can be attributed.
pub fn set_worker_label(label: impl Into<String>) {
    WORKER_LABEL.with(|v| *v.borrow_mut() = Some(label.into()));
}

/// Returns the worker label of the current thread.
/// Returns `"main"` if the thread was never tagged.
pub fn worker_label() -> String {
    WORKER_LABEL.with(|v| v.borrow().clone().unwrap_or_else(|| "main".to_string()))
}

/// Logs a trace-level message using the global logging facade.
#[macro_export]
macro_rules! engine_trace {
    ($($arg:tt)*) => {{
        log::trace!($($arg)*);
    }};
}

/// Logs an info-level message using the global logging facade.
#[macro_export]
macro_rules! engine_info {
    ($($arg:tt)*) => {{
        log::info!($($arg)*);
    }};
}

/// Logs a debug-level message using the global logging facade.
#[macro_export]
macro_rules! engine_debug {
    ($($arg:tt)*) => {{
        log::debug!($($arg)*);
    }};
}

/// Logs a warn-level message using the global logging facade.
#[macro_export]
macro_rules! engine_warn {
    ($($arg:tt)*) => {{
        log::warn!($($arg)*);
    }};
}

/// Logs an error-level message using the global logging facade.
#[macro_export]
macro_rules! engine_error {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
    }};
}

/// Initializes a simple terminal logger for use in unit tests.
///
/// This safely no-ops if another logger has already been initialized.
pub fn initialize_for_tests() {
    use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode};

    // Use debug level in debug builds, info in release builds.
    let level = if cfg!(debug_assertions) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    // Ignore the error if a logger was already set by another test.
    let _ = CombinedLogger::init(vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )]);
}

#[cfg(test)]
mod tests {
    use super::{set_worker_label, worker_label};

    #[test]
    fn untagged_thread_reports_main() {
        let label = std::thread::spawn(worker_label).join().unwrap();
        assert_eq!(label, "main");
    }

    #[test]
    fn label_is_thread_local() {
        let label = std::thread::spawn(|| {
            set_worker_label("translate-3");
            worker_label()
        })
        .join()
        .unwrap();
        assert_eq!(label, "translate-3");
    }
}
