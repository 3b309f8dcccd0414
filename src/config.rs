//! Process configuration, read once from the environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default directory for persisted state (`state.json`, `config.json`, ...).
pub const DEFAULT_STATE_DIR: &str = "/var/lib/dt-core";

/// Default directory for memory files and the model artifact.
pub const DEFAULT_MEMORY_DIR: &str = "/var/lib/dt-core-database";

/// Default llama.cpp binary.
pub const DEFAULT_LLAMA_BIN: &str = "/usr/local/bin/llama";

/// Default label that separates echoed prompt from the generated answer.
pub const DEFAULT_ANSWER_MARKER: &str = "Answer:";

/// Thresholds and override for the resource gate.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Skip the memory check entirely.
    pub ignore_check: bool,
    /// Minimum total memory, in KiB.
    pub min_total_kb: u64,
    /// Minimum memory available right now, in KiB.
    pub min_available_kb: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            ignore_check: false,
            min_total_kb: 700_000,
            min_available_kb: 250_000,
        }
    }
}

/// Everything the service needs apart from the mailbox credentials.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub state_dir: PathBuf,
    pub memory_dir: PathBuf,
    pub llama_bin: PathBuf,
    pub model_path: PathBuf,
    pub llama_temperature: f32,
    pub gate: GateConfig,
    /// Sleep between polling cycles.
    pub poll_interval: Duration,
    /// Minimum gap between two outbound replies.
    pub min_send_interval: Duration,
    pub answer_marker: String,
    /// Optional directory for the rolling log file.
    pub log_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let memory_dir = PathBuf::from(DEFAULT_MEMORY_DIR);
        Self {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            model_path: memory_dir.join("model.bin"),
            memory_dir,
            llama_bin: PathBuf::from(DEFAULT_LLAMA_BIN),
            llama_temperature: 0.5,
            gate: GateConfig::default(),
            poll_interval: Duration::from_secs(60),
            min_send_interval: Duration::from_secs(10),
            answer_marker: DEFAULT_ANSWER_MARKER.to_string(),
            log_dir: None,
        }
    }
}

impl AppConfig {
    /// Build config from environment variables.
    ///
    /// Unparseable numbers fall back to their defaults; only a blank answer
    /// marker is rejected.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let memory_dir = env_path("DT_MEMORY_DIR").unwrap_or(defaults.memory_dir);
        let model_path = env_path("DT_MODEL_PATH").unwrap_or_else(|| memory_dir.join("model.bin"));

        let gate = GateConfig {
            ignore_check: std::env::var("DT_IGNORE_RAM_CHECK").is_ok_and(|v| v == "1"),
            min_total_kb: env_parse("DT_MIN_TOTAL_MEMORY_KB").unwrap_or(defaults.gate.min_total_kb),
            min_available_kb: env_parse("DT_MIN_AVAILABLE_MEMORY_KB")
                .unwrap_or(defaults.gate.min_available_kb),
        };

        let answer_marker =
            std::env::var("DT_ANSWER_MARKER").unwrap_or_else(|_| defaults.answer_marker.clone());
        if answer_marker.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "DT_ANSWER_MARKER".into(),
                message: "marker must not be blank".into(),
            });
        }

        Ok(Self {
            state_dir: env_path("DT_STATE_DIR").unwrap_or(defaults.state_dir),
            memory_dir,
            llama_bin: env_path("DT_LLAMA_BIN").unwrap_or(defaults.llama_bin),
            model_path,
            llama_temperature: env_parse("DT_LLAMA_TEMPERATURE")
                .unwrap_or(defaults.llama_temperature),
            gate,
            poll_interval: env_parse("DT_POLL_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            min_send_interval: env_parse("DT_MIN_SEND_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.min_send_interval),
            answer_marker: answer_marker.trim().to_string(),
            log_dir: env_path("DT_LOG_DIR"),
        })
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployed_layout() {
        let config = AppConfig::default();
        assert_eq!(config.state_dir, PathBuf::from("/var/lib/dt-core"));
        assert_eq!(
            config.model_path,
            PathBuf::from("/var/lib/dt-core-database/model.bin")
        );
        assert_eq!(config.min_send_interval, Duration::from_secs(10));
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.answer_marker, "Answer:");
        assert!(!config.gate.ignore_check);
    }

    #[test]
    fn gate_defaults() {
        let gate = GateConfig::default();
        assert_eq!(gate.min_total_kb, 700_000);
        assert_eq!(gate.min_available_kb, 250_000);
    }
}
