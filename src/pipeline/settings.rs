//! Runtime configuration and the in-band `CONFIG:` command handler.
//!
//! The operator tunes generation by mailing a question such as
//! `CONFIG: LLAMA_TOKENS=120 LLAMA_TIMEOUT=300` or `CONFIG: ADD_SITE=ssa.gov`.
//! A handled command is the whole reply; generation never runs for it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Reserved prefix that marks a configuration command.
pub const CONFIG_PREFIX: &str = "CONFIG:";

const DEFAULT_LLAMA_TOKENS: u32 = 200;
const DEFAULT_LLAMA_TIMEOUT_SECS: u64 = 65;

/// Generation parameters persisted in `config.json`.
///
/// Absent keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Token budget per generation.
    pub llama_tokens: u32,
    /// Generation wall-clock timeout, in seconds.
    pub llama_timeout: u64,
    /// Domains the site fetcher may contact, lower-cased, insertion order.
    pub allowed_sites: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            llama_tokens: DEFAULT_LLAMA_TOKENS,
            llama_timeout: DEFAULT_LLAMA_TIMEOUT_SECS,
            allowed_sites: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.llama_timeout)
    }

    pub fn is_site_allowed(&self, domain: &str) -> bool {
        self.allowed_sites.iter().any(|s| s == domain)
    }

    /// Add a domain, lower-cased and de-duplicated. Blank input is ignored.
    pub fn add_site(&mut self, domain: &str) {
        let domain = domain.trim().to_lowercase();
        if !domain.is_empty() && !self.is_site_allowed(&domain) {
            self.allowed_sites.push(domain);
        }
    }

    /// The effective parameters, one `KEY: value` per line.
    pub fn describe(&self) -> String {
        let sites = if self.allowed_sites.is_empty() {
            "(none)".to_string()
        } else {
            self.allowed_sites.join(", ")
        };
        format!(
            "LLAMA_TOKENS: {}\nLLAMA_TIMEOUT: {}\nALLOWED_SITES: {}",
            self.llama_tokens, self.llama_timeout, sites
        )
    }
}

/// A parsed `CONFIG:` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    Show,
    Reset,
    ListAllowedDomains,
    /// Upper-cased keys with their raw values, in order.
    SetParameters(Vec<(String, String)>),
}

impl ConfigCommand {
    /// Parse `text`, or `None` when it does not start with [`CONFIG_PREFIX`].
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim_start();
        let head = trimmed.get(..CONFIG_PREFIX.len())?;
        if !head.eq_ignore_ascii_case(CONFIG_PREFIX) {
            return None;
        }
        let rest = trimmed[CONFIG_PREFIX.len()..].trim();

        let first = rest
            .split_whitespace()
            .next()
            .map(str::to_uppercase)
            .unwrap_or_default();
        let command = match first.as_str() {
            "" | "SHOW" => Self::Show,
            "RESET" | "DEFAULT" | "DEFAULTS" => Self::Reset,
            "LIST_SITES" => Self::ListAllowedDomains,
            _ => Self::SetParameters(
                rest.split_whitespace()
                    .filter_map(|token| token.split_once('='))
                    .map(|(k, v)| (k.trim().to_uppercase(), v.trim().to_string()))
                    .collect(),
            ),
        };
        Some(command)
    }
}

/// Outcome of a handled command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigReply {
    /// Reply body for the requester.
    pub response: String,
    /// Configuration after the command.
    pub config: RuntimeConfig,
}

impl ConfigReply {
    /// Whether the command changed anything worth persisting.
    pub fn changed(&self, before: &RuntimeConfig) -> bool {
        &self.config != before
    }
}

/// Handle `text` if it is a configuration command.
pub fn handle_config_command(text: &str, current: &RuntimeConfig) -> Option<ConfigReply> {
    let command = ConfigCommand::parse(text)?;
    debug!(?command, "Handling config command");

    let reply = match command {
        ConfigCommand::Show => ConfigReply {
            response: format!("Current configuration:\n{}", current.describe()),
            config: current.clone(),
        },
        ConfigCommand::Reset => {
            let config = RuntimeConfig::default();
            info!("Runtime configuration reset to defaults");
            ConfigReply {
                response: format!("Configuration reset to defaults.\n{}", config.describe()),
                config,
            }
        }
        ConfigCommand::ListAllowedDomains => {
            let response = if current.allowed_sites.is_empty() {
                "No allowed sites configured.".to_string()
            } else {
                let lines: Vec<String> =
                    current.allowed_sites.iter().map(|s| format!("- {s}")).collect();
                format!("Allowed sites:\n{}", lines.join("\n"))
            };
            ConfigReply {
                response,
                config: current.clone(),
            }
        }
        ConfigCommand::SetParameters(pairs) => {
            let mut config = current.clone();
            for (key, value) in pairs {
                apply_parameter(&mut config, &key, &value);
            }
            info!(
                llama_tokens = config.llama_tokens,
                llama_timeout = config.llama_timeout,
                sites = config.allowed_sites.len(),
                "Runtime configuration updated"
            );
            ConfigReply {
                response: format!("Configuration updated.\n{}", config.describe()),
                config,
            }
        }
    };
    Some(reply)
}

fn apply_parameter(config: &mut RuntimeConfig, key: &str, value: &str) {
    match key {
        "LLAMA_TOKENS" => match value.parse() {
            Ok(n) => config.llama_tokens = n,
            Err(_) => debug!(value, "Ignoring invalid LLAMA_TOKENS"),
        },
        "LLAMA_TIMEOUT" => match value.parse() {
            Ok(n) => config.llama_timeout = n,
            Err(_) => debug!(value, "Ignoring invalid LLAMA_TIMEOUT"),
        },
        "ADD_SITE" => config.add_site(value),
        other => debug!(key = other, "Ignoring unknown config key"),
    }
}
