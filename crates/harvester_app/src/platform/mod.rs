//! Process-level plumbing: logging setup, run state and the harvest run itself.
mod app;
pub mod logging;
mod persistence;

pub use app::run_app;
