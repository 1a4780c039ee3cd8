//! Bridge configuration
//!
//! Constants shared across modules plus the TOML-backed [`BridgeConfig`].

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_DIRECTORY: &str = "wallet-bridge";
pub const CONFIG_FILE_NAME: &str = "config.toml";

pub const WORKER_ENV: &str = "WALLET_BRIDGE_WORKER";
pub const LOG_ENV: &str = "WALLET_BRIDGE_LOG";

/// Out-of-band message broadcast to UI surfaces when shutdown begins.
pub const KILL_QUEUE_SIGNAL: &str = "kill-queue";

pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: "defid-worker".to_string(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub worker: WorkerConfig,
    pub startup_timeout_ms: u64,
    pub drain_timeout_ms: u64,
    pub grace_period_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            startup_timeout_ms: DEFAULT_STARTUP_TIMEOUT.as_millis() as u64,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT.as_millis() as u64,
            grace_period_ms: DEFAULT_GRACE_PERIOD.as_millis() as u64,
        }
    }
}

impl BridgeConfig {
    /// `~/.config/wallet-bridge/config.toml` on Linux, platform equivalent elsewhere.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIRECTORY).join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load from `path` (or the default location), falling back to defaults
    /// when the file does not exist, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };

        let mut config = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|err| ConfigError::Io {
                path: path.display().to_string(),
                message: err.to_string(),
            })?;
            Self::from_toml(&raw)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|err| ConfigError::InvalidFormat {
            message: err.to_string(),
        })
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|err| ConfigError::InvalidFormat {
            message: err.to_string(),
        })
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(program) = std::env::var(WORKER_ENV) {
            if !program.trim().is_empty() {
                self.worker.program = program;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.program.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "worker.program",
            });
        }
        for (field, value) in [
            ("startup_timeout_ms", self.startup_timeout_ms),
            ("drain_timeout_ms", self.drain_timeout_ms),
            ("grace_period_ms", self.grace_period_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroTimeout { field });
            }
        }
        Ok(())
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = BridgeConfig::from_toml(
            r#"
            grace_period_ms = 250

            [worker]
            program = "/opt/defi/worker"
            args = ["--testnet"]
            "#,
        )
        .unwrap();

        assert_eq!(config.worker.program, "/opt/defi/worker");
        assert_eq!(config.worker.args, vec!["--testnet".to_string()]);
        assert_eq!(config.grace_period(), Duration::from_millis(250));
        assert_eq!(config.startup_timeout(), DEFAULT_STARTUP_TIMEOUT);
        assert_eq!(config.drain_timeout(), DEFAULT_DRAIN_TIMEOUT);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = BridgeConfig {
            drain_timeout_ms: 0,
            ..BridgeConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroTimeout {
                field: "drain_timeout_ms"
            })
        ));
    }

    #[test]
    fn empty_program_is_rejected() {
        let mut config = BridgeConfig::default();
        config.worker.program = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = BridgeConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.grace_period(), DEFAULT_GRACE_PERIOD);
    }

    #[test]
    fn toml_round_trip_preserves_worker() {
        let mut config = BridgeConfig::default();
        config.worker.env.insert("NETWORK".into(), "testnet".into());
        let parsed = BridgeConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn malformed_toml_reports_format_error() {
        assert!(matches!(
            BridgeConfig::from_toml("grace_period_ms = \"soon\""),
            Err(ConfigError::InvalidFormat { .. })
        ));
    }
}
