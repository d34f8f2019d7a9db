use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::orchestrator::OrchestratorConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub transfer: TransferConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("slskq.db")
}

/// Transfer client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransferConfig {
    /// Transfer backend type
    pub backend: TransferBackend,
    /// slskd-specific configuration (required when backend = "slskd")
    #[serde(default)]
    pub slskd: Option<SlskdConfig>,
}

/// Available transfer backends
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferBackend {
    Slskd,
    // Future: Nicotine, DirectPeer
}

/// slskd transfer backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SlskdConfig {
    /// slskd server URL (e.g., "http://localhost:5030")
    pub url: String,
    /// slskd API key
    pub api_key: String,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

fn default_timeout() -> u32 {
    30
}

/// Event stream configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventsConfig {
    /// In-memory replay ring size. Subscribers further behind than this
    /// get a replay-gap error and must resync from the job store.
    #[serde(default = "default_replay_buffer")]
    pub replay_buffer: usize,
    /// Queue depth between the broadcaster and the durable log writer.
    #[serde(default = "default_persist_buffer")]
    pub persist_buffer: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            replay_buffer: default_replay_buffer(),
            persist_buffer: default_persist_buffer(),
        }
    }
}

fn default_replay_buffer() -> usize {
    1024
}

fn default_persist_buffer() -> usize {
    256
}

/// Sanitized config for status output (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub transfer: SanitizedTransferConfig,
    pub database: DatabaseConfig,
    pub orchestrator: OrchestratorConfig,
    pub events: EventsConfig,
}

/// Sanitized transfer config (API key redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedTransferConfig {
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slskd: Option<SanitizedSlskdConfig>,
}

/// Sanitized slskd config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedSlskdConfig {
    pub url: String,
    pub api_key_configured: bool,
    pub timeout_secs: u32,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            transfer: SanitizedTransferConfig {
                backend: match config.transfer.backend {
                    TransferBackend::Slskd => "slskd".to_string(),
                },
                slskd: config.transfer.slskd.as_ref().map(|s| SanitizedSlskdConfig {
                    url: s.url.clone(),
                    api_key_configured: !s.api_key.is_empty(),
                    timeout_secs: s.timeout_secs,
                }),
            },
            database: config.database.clone(),
            orchestrator: config.orchestrator.clone(),
            events: config.events.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slskd_section() -> &'static str {
        r#"
[transfer]
backend = "slskd"

[transfer.slskd]
url = "http://localhost:5030"
api_key = "test-api-key"
"#
    }

    #[test]
    fn test_deserialize_minimal_config() {
        let config: Config = toml::from_str(slskd_section()).unwrap();
        assert_eq!(config.transfer.backend, TransferBackend::Slskd);

        let slskd = config.transfer.slskd.as_ref().unwrap();
        assert_eq!(slskd.url, "http://localhost:5030");
        assert_eq!(slskd.timeout_secs, 30); // default

        // Defaulted sections
        assert_eq!(config.database.path.to_str().unwrap(), "slskq.db");
        assert_eq!(config.orchestrator.worker_capacity, 3);
        assert_eq!(config.events.replay_buffer, 1024);
    }

    #[test]
    fn test_deserialize_missing_transfer_fails() {
        let toml = r#"
[database]
path = "/data/slskq.db"
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
[transfer]
backend = "slskd"

[transfer.slskd]
url = "http://slskd:5030"
api_key = "key"
timeout_secs = 60

[database]
path = "/data/queue.db"

[orchestrator]
worker_capacity = 6

[events]
replay_buffer = 4096
persist_buffer = 512
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.transfer.slskd.as_ref().unwrap().timeout_secs, 60);
        assert_eq!(config.database.path.to_str().unwrap(), "/data/queue.db");
        assert_eq!(config.orchestrator.worker_capacity, 6);
        assert_eq!(config.events.replay_buffer, 4096);
        assert_eq!(config.events.persist_buffer, 512);
    }

    #[test]
    fn test_sanitized_config_hides_api_key() {
        let config: Config = toml::from_str(slskd_section()).unwrap();
        let sanitized = SanitizedConfig::from(&config);

        assert_eq!(sanitized.transfer.backend, "slskd");
        let slskd = sanitized.transfer.slskd.as_ref().unwrap();
        assert!(slskd.api_key_configured);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("test-api-key"));
    }
}
