use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use engine_logging::{engine_error, engine_info, engine_warn};
use harvester_engine::AtomicFileWriter;
use serde::{Deserialize, Serialize};

const STATE_FILENAME: &str = ".harvester_state.ron";

/// What the next run needs to know about previous ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RunState {
    pub runs: u32,
    /// Start of the last run that finished without error. Later runs harvest
    /// changes since this time.
    pub last_success_utc: Option<DateTime<Utc>>,
}

impl RunState {
    pub fn record_success(&mut self, started: DateTime<Utc>) {
        self.runs += 1;
        self.last_success_utc = Some(started);
    }
}

pub(crate) fn load_run_state(output_dir: &Path) -> RunState {
    let path = output_dir.join(STATE_FILENAME);
    let content = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return RunState::default();
        }
        Err(err) => {
            engine_warn!("Failed to read run state from {:?}: {}", path, err);
            return RunState::default();
        }
    };

    match ron::from_str::<RunState>(&content) {
        Ok(state) => {
            engine_info!("Loaded run state from {:?}", path);
            state
        }
        Err(err) => {
            engine_warn!("Failed to parse run state from {:?}: {}", path, err);
            RunState::default()
        }
    }
}

pub(crate) fn save_run_state(output_dir: &Path, state: &RunState) {
    let pretty = ron::ser::PrettyConfig::new();
    let content = match ron::ser::to_string_pretty(state, pretty) {
        Ok(text) => text,
        Err(err) => {
            engine_error!("Failed to serialize run state: {}", err);
            return;
        }
    };

    let writer = AtomicFileWriter::new(output_dir);
    if let Err(err) = writer.write(STATE_FILENAME, &content) {
        engine_error!("Failed to write run state to {:?}: {}", output_dir, err);
    }
}
