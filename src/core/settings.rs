//! Supervisor settings

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::ConfigError;

/// Environment variable overriding the server binary
pub const BINARY_ENV_VAR: &str = "DISPOSABLE_SERVER_BINARY";

/// Supervisor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    // Launch
    /// Server executable (looked up on PATH if relative)
    pub binary_path: PathBuf,
    /// Directory for pid files, data files and output logs
    pub scratch_dir: PathBuf,
    /// Prefix of the pid and log file names
    pub file_prefix: String,
    /// Time the server has to fail before it is assumed started (ms)
    pub launch_grace_ms: u64,
    /// Maximum random ports tried before giving up
    pub port_retries: u32,

    // Polling
    /// Delay between readiness connection attempts (ms)
    pub ready_poll_interval_ms: u64,
    /// How long a new replica has to accept connections (ms)
    pub replica_ready_timeout_ms: u64,
    /// Status queries made while waiting for a replica to sync
    pub replica_poll_attempts: u32,
    /// Delay between replica status queries (ms)
    pub replica_poll_interval_ms: u64,

    // Advanced
    /// How long to wait for a killed process to be reaped (ms)
    pub reap_timeout_ms: u64,
    /// Read/write timeout for protocol commands (ms)
    pub io_timeout_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            // Launch
            binary_path: PathBuf::from("redis-server"),
            scratch_dir: std::env::temp_dir(),
            file_prefix: "disposable_redis".to_string(),
            launch_grace_ms: 100,
            port_retries: 10,

            // Polling
            ready_poll_interval_ms: 5,
            replica_ready_timeout_ms: 100,
            replica_poll_attempts: 100,
            replica_poll_interval_ms: 50,

            // Advanced
            reap_timeout_ms: 5000,
            io_timeout_ms: 1000,
        }
    }
}

impl SupervisorConfig {
    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(s)?;
        config.validate();
        Ok(config)
    }

    /// Load a TOML config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Apply `DISPOSABLE_SERVER_BINARY` if it is set
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(binary) = std::env::var_os(BINARY_ENV_VAR).filter(|v| !v.is_empty()) {
            self.binary_path = PathBuf::from(binary);
        }
        self
    }

    pub fn with_binary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary_path = path.into();
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    /// Fix values that would make polling loops degenerate
    pub fn validate(&mut self) {
        self.port_retries = self.port_retries.max(1);
        self.ready_poll_interval_ms = self.ready_poll_interval_ms.max(1);
        self.replica_poll_attempts = self.replica_poll_attempts.max(1);
        self.io_timeout_ms = self.io_timeout_ms.max(1);
        if self.file_prefix.is_empty() {
            self.file_prefix = Self::default().file_prefix;
        }
    }

    pub fn launch_grace(&self) -> Duration {
        Duration::from_millis(self.launch_grace_ms)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms)
    }

    pub fn replica_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.replica_ready_timeout_ms)
    }

    pub fn replica_poll_interval(&self) -> Duration {
        Duration::from_millis(self.replica_poll_interval_ms)
    }

    pub fn reap_timeout(&self) -> Duration {
        Duration::from_millis(self.reap_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_fixed_budgets() {
        let config = SupervisorConfig::default();
        assert_eq!(config.binary_path, PathBuf::from("redis-server"));
        assert_eq!(config.launch_grace(), Duration::from_millis(100));
        assert_eq!(config.port_retries, 10);
        assert_eq!(config.ready_poll_interval(), Duration::from_millis(5));
        assert_eq!(config.replica_poll_attempts, 100);
        assert_eq!(config.replica_poll_interval(), Duration::from_millis(50));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let toml = r#"
binary_path = "/opt/redis/bin/redis-server"
port_retries = 3
replica_poll_interval_ms = 10
"#;

        let config = SupervisorConfig::from_toml_str(toml).unwrap();
        assert_eq!(
            config.binary_path,
            PathBuf::from("/opt/redis/bin/redis-server")
        );
        assert_eq!(config.port_retries, 3);
        assert_eq!(config.replica_poll_interval_ms, 10);
        assert_eq!(config.launch_grace_ms, 100);
        assert_eq!(config.file_prefix, "disposable_redis");
    }

    #[test]
    fn validate_clamps_zero_budgets() {
        let toml = r#"
port_retries = 0
ready_poll_interval_ms = 0
replica_poll_attempts = 0
io_timeout_ms = 0
file_prefix = ""
"#;

        let config = SupervisorConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.port_retries, 1);
        assert_eq!(config.ready_poll_interval_ms, 1);
        assert_eq!(config.replica_poll_attempts, 1);
        assert_eq!(config.io_timeout_ms, 1);
        assert_eq!(config.file_prefix, "disposable_redis");
    }

    #[test]
    fn unknown_types_are_rejected() {
        let err = SupervisorConfig::from_toml_str("port_retries = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = SupervisorConfig::load(&path).unwrap_err();
        match err {
            ConfigError::Read { path: p, .. } => assert_eq!(p, path),
            other => panic!("unexpected error: {other}"),
        }
    }
}
