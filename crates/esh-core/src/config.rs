// ── Configuration ─────────────────────────────────────────────────────────────
//
// Relay and session settings. Loaded from a camelCase JSON file with every
// field optional, then a handful of environment overrides are applied.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ── Serde default helpers ────────────────────────────────────────────────────

fn default_bind() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    3001
}
fn default_ready_timeout_ms() -> u64 {
    20_000
}
fn default_keepalive_secs() -> u64 {
    10
}
fn default_terminal_type() -> String {
    "xterm-256color".into()
}
fn default_cols() -> u32 {
    80
}
fn default_rows() -> u32 {
    24
}
fn default_attempts() -> u32 {
    1
}
fn default_backoff_ms() -> u64 {
    1000
}
fn default_chunk_size() -> usize {
    65_536 // 64 KiB
}
fn default_log_level() -> String {
    "info".into()
}

// ── Session settings ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshSettings {
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_interval_secs: u64,
    #[serde(default = "default_terminal_type")]
    pub terminal_type: String,
    #[serde(default = "default_cols")]
    pub cols: u32,
    #[serde(default = "default_rows")]
    pub rows: u32,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            ready_timeout_ms: default_ready_timeout_ms(),
            keepalive_interval_secs: default_keepalive_secs(),
            terminal_type: default_terminal_type(),
            cols: default_cols(),
            rows: default_rows(),
            retry: RetryPolicy::default(),
        }
    }
}

impl SshSettings {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }
}

/// Opt-in reconnect policy for the connect phase only.
///
/// `attempts = 1` (the default) means a single try. Only transport and
/// timeout failures are retried; auth and config failures never are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

// ── Transfer settings ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSettings {
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: usize,
    /// Unset means transfers may run indefinitely.
    #[serde(default)]
    pub operation_timeout_ms: Option<u64>,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size_bytes: default_chunk_size(),
            operation_timeout_ms: None,
        }
    }
}

impl TransferSettings {
    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }
}

// ── Logging ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// ── Relay ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub ssh: SshSettings,
    #[serde(default)]
    pub transfer: TransferSettings,
    #[serde(default)]
    pub log: LogSettings,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            ssh: SshSettings::default(),
            transfer: TransferSettings::default(),
            log: LogSettings::default(),
        }
    }
}

impl RelayConfig {
    /// `<config_dir>/easyshell/relay.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("easyshell").join("relay.json"))
    }

    /// Parses a config file. A missing file is an error here; use
    /// [`RelayConfig::load`] for the optional lookup chain.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("Invalid config '{}': {}", path.display(), e)))
    }

    /// Explicit path, then `$EASYSHELL_CONFIG`, then the per-user default
    /// location if it exists, then built-in defaults. Environment
    /// overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var_os("EASYSHELL_CONFIG").map(PathBuf::from);
        let mut config = match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_file(&path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies `PORT`, `EASYSHELL_BIND` and `EASYSHELL_LOG` from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("Invalid PORT value '{}'", port)))?;
        }
        if let Some(bind) = lookup("EASYSHELL_BIND") {
            self.bind = bind;
        }
        if let Some(level) = lookup("EASYSHELL_LOG") {
            self.log.level = level;
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn empty_object_gives_defaults() {
        let config: RelayConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.listen_addr(), "0.0.0.0:3001");
        assert_eq!(config.ssh.ready_timeout(), Duration::from_secs(20));
        assert_eq!(config.ssh.keepalive_interval(), Duration::from_secs(10));
        assert_eq!(config.ssh.terminal_type, "xterm-256color");
        assert_eq!(config.ssh.retry.attempts, 1);
        assert_eq!(config.transfer.chunk_size_bytes, 65_536);
        assert!(config.transfer.operation_timeout().is_none());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: RelayConfig = serde_json::from_str(
            r#"{"port":4000,"ssh":{"readyTimeoutMs":500},"log":{"format":"json"}}"#,
        )
        .unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.ssh.ready_timeout_ms, 500);
        assert_eq!(config.ssh.keepalive_interval_secs, 10);
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [("PORT", "8080"), ("EASYSHELL_LOG", "debug")]
            .into_iter()
            .collect();
        let mut config = RelayConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.bind, "0.0.0.0");
    }

    #[test]
    fn bad_port_env_is_a_config_error() {
        let mut config = RelayConfig::default();
        let err = config
            .apply_env(|k| (k == "PORT").then(|| "not-a-port".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"bind":"127.0.0.1","transfer":{{"operationTimeoutMs":1500}}}}"#).unwrap();
        let config = RelayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.bind, "127.0.0.1");
        assert_eq!(
            config.transfer.operation_timeout(),
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn invalid_json_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            RelayConfig::from_file(file.path()),
            Err(Error::Config(_))
        ));
    }
}
