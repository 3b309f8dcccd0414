//! StateStore: the service's persisted documents in the state directory.
//!
//! - state.json: flood/status counters
//! - status.txt: lifetime sent counter mirror, one integer and a newline
//! - config.json: runtime generation parameters

use std::path::{Path, PathBuf};

use tracing::warn;

use super::json::{JsonStore, write_atomic};
use crate::error::StoreError;
use crate::pipeline::flood::FloodState;
use crate::pipeline::settings::RuntimeConfig;
use crate::workspace::paths;

const STATE_FILE: &str = "state.json";
const STATUS_FILE: &str = "status.txt";
const CONFIG_FILE: &str = "config.json";

/// Loads and saves flood state and runtime config.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
    state: JsonStore,
    config: JsonStore,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            state: JsonStore::new(dir.join(STATE_FILE)),
            config: JsonStore::new(dir.join(CONFIG_FILE)),
            dir,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where learned facts are journaled.
    pub fn lessons_path(&self) -> PathBuf {
        self.dir.join(paths::LESSONS)
    }

    /// Load flood state. Missing or corrupt files give the default state.
    pub fn load_flood_state(&self) -> FloodState {
        match self.state.load() {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Flood state unreadable, starting from defaults");
                FloodState::default()
            }
        }
    }

    /// Save flood state and its status.txt mirror.
    pub fn save_flood_state(&self, state: &FloodState) -> Result<(), StoreError> {
        self.state.save(state)?;
        write_atomic(&self.dir.join(STATUS_FILE), &format!("{}\n", state.total_sent))
    }

    /// Load runtime config. Missing keys and files take defaults; a corrupt
    /// file is logged and ignored.
    pub fn load_runtime_config(&self) -> RuntimeConfig {
        match self.config.load() {
            Ok(config) => config.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Runtime config unreadable, using defaults");
                RuntimeConfig::default()
            }
        }
    }

    pub fn save_runtime_config(&self, config: &RuntimeConfig) -> Result<(), StoreError> {
        self.config.save(config)
    }
}
