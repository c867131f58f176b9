//! Node configuration
//!
//! Settings are read from a JSON file with a `network` section (listening
//! port, seeds, access rules, pacing) and a `chain` section (standby
//! validators and genesis parameters). Everything is checked on load so a
//! bad file stops the node before it opens a socket.

use crate::core::ChainSettings;
use crate::network::{AclConfig, AclError, DEFAULT_USER_AGENT};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default P2P port
pub const DEFAULT_PORT: u16 = 20333;

/// Default pause between two messages from the same peer
pub const DEFAULT_MESSAGE_INTERVAL_MS: u64 = 100;

/// Default outbound connect timeout
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Default maximum number of connected peers
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Invalid access rule: {0}")]
    Acl(#[from] AclError),
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_relay() -> bool {
    true
}

fn default_message_interval_ms() -> u64 {
    DEFAULT_MESSAGE_INTERVAL_MS
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

/// Network configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Peers dialled on start, as `host:port`
    #[serde(default)]
    pub seeds: Vec<String>,
    /// Access rules; absent means everyone may connect
    #[serde(default)]
    pub acl: Option<AclConfig>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Ask peers to relay transactions to us
    #[serde(default = "default_relay")]
    pub relay: bool,
    #[serde(default = "default_message_interval_ms")]
    pub message_interval_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            seeds: Vec::new(),
            acl: None,
            user_agent: default_user_agent(),
            relay: true,
            message_interval_ms: DEFAULT_MESSAGE_INTERVAL_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl NetworkConfig {
    pub fn message_interval(&self) -> Duration {
        Duration::from_millis(self.message_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "connect_timeout_ms must be positive".to_string(),
            ));
        }
        for seed in &self.seeds {
            let valid = seed
                .rsplit_once(':')
                .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
                .unwrap_or(false);
            if !valid {
                return Err(ConfigError::Invalid(format!(
                    "seed '{}' is not host:port",
                    seed
                )));
            }
        }
        if let Some(acl) = &self.acl {
            acl.validate()?;
        }
        Ok(())
    }
}

/// Complete node settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub network: NetworkConfig,
    pub chain: ChainSettings,
}

impl Settings {
    /// Default network settings around the given chain
    pub fn new(chain: ChainSettings) -> Self {
        Self {
            network: NetworkConfig::default(),
            chain,
        }
    }

    /// Read and validate a settings file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let settings: Settings = serde_json::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Write settings as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network.validate()?;

        if self.chain.standby_validators.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one standby validator is required".to_string(),
            ));
        }
        if self.chain.validators_count() == 0 {
            return Err(ConfigError::Invalid(
                "validators_count must be at least 1".to_string(),
            ));
        }
        if self.chain.initial_supply == 0 {
            return Err(ConfigError::Invalid(
                "initial_supply must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::network::{AclAction, AclRule};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn settings() -> Settings {
        Settings::new(ChainSettings::new(vec![KeyPair::generate().validator_key()]))
    }

    fn write_temp(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_save_and_load() {
        let mut original = settings();
        original.network.seeds = vec!["seed1.example.org:20333".to_string()];
        original.network.acl = Some(AclConfig {
            default: AclAction::Allow,
            rules: vec![AclRule::deny("10.0.0.0/8")],
        });

        let file = NamedTempFile::new().unwrap();
        original.save(file.path()).unwrap();
        let loaded = Settings::load(file.path()).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_network_defaults_applied() {
        let key = KeyPair::generate().validator_key();
        let json = format!(r#"{{"chain":{{"standby_validators":["{}"]}}}}"#, key);
        let file = write_temp(&json);

        let loaded = Settings::load(file.path()).unwrap();
        assert_eq!(loaded.network, NetworkConfig::default());
        assert_eq!(loaded.network.message_interval(), Duration::from_millis(100));
        assert_eq!(loaded.chain.validators_count(), 1);
    }

    #[test]
    fn test_missing_standby_validators_rejected() {
        let file = write_temp(r#"{"chain":{"standby_validators":[]}}"#);
        assert!(matches!(
            Settings::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_malformed_key_rejected() {
        let file = write_temp(r#"{"chain":{"standby_validators":["zz"]}}"#);
        assert!(matches!(Settings::load(file.path()), Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_bad_seed_rejected() {
        let mut bad = settings();
        bad.network.seeds = vec!["no-port".to_string()];
        assert!(matches!(bad.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_bad_acl_rejected() {
        let mut bad = settings();
        bad.network.acl = Some(AclConfig {
            default: AclAction::Deny,
            rules: vec![AclRule::allow("300.1.1.1")],
        });
        assert!(matches!(bad.validate(), Err(ConfigError::Acl(_))));
    }

    #[test]
    fn test_zero_validators_rejected() {
        let mut bad = settings();
        bad.chain.validators_count = Some(0);
        assert!(matches!(bad.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Settings::load("/nonexistent/ledger-node.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
