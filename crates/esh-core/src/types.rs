// ── Types ─────────────────────────────────────────────────────────────────────

use crate::error::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

// ── Serde default helpers ────────────────────────────────────────────────────

fn default_ssh_port() -> u16 {
    22
}

fn expose_optional<S: Serializer>(
    value: &Option<SecretString>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    value
        .as_ref()
        .map(|secret| secret.expose_secret().as_str())
        .serialize(serializer)
}

fn non_blank(value: &Option<SecretString>) -> Option<&str> {
    value
        .as_ref()
        .map(|secret| secret.expose_secret().as_str())
        .filter(|s| !s.trim().is_empty())
}

// ── Host configuration ───────────────────────────────────────────────────────

/// Connection parameters for one remote host, supplied per call.
///
/// Credentials are wrapped in [`SecretString`] so they never show up in
/// `Debug` output or logs. They are only exposed when serialized for the
/// relay wire protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    /// Record id in the caller's host store, if the config came from one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(
        default,
        serialize_with = "expose_optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub password: Option<SecretString>,
    /// PEM/OpenSSH private key material (not a path).
    #[serde(
        default,
        serialize_with = "expose_optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub private_key: Option<SecretString>,
    #[serde(
        default,
        serialize_with = "expose_optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub passphrase: Option<SecretString>,
}

impl HostConfig {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            id: None,
            host: host.into(),
            port,
            username: username.into(),
            password: None,
            private_key: None,
            passphrase: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::new(password.into()));
        self
    }

    pub fn with_private_key(mut self, key: impl Into<String>, passphrase: Option<String>) -> Self {
        self.private_key = Some(SecretString::new(key.into()));
        self.passphrase = passphrase.map(SecretString::new);
        self
    }

    /// The password, if one was given and it is not blank.
    pub fn password(&self) -> Option<&str> {
        non_blank(&self.password)
    }

    /// The private key material, if given and not blank.
    pub fn private_key(&self) -> Option<&str> {
        non_blank(&self.private_key)
    }

    pub fn passphrase(&self) -> Option<&str> {
        non_blank(&self.passphrase)
    }

    /// `host:port`, used in log lines and session listings.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Checks the config before any network activity happens.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("Host is required".into()));
        }
        if self.username.trim().is_empty() {
            return Err(Error::Config("Username is required".into()));
        }
        if self.password().is_none() && self.private_key().is_none() {
            return Err(Error::Config(
                "Either password or private key is required".into(),
            ));
        }
        Ok(())
    }
}

// ── Handles ──────────────────────────────────────────────────────────────────

/// Opaque handle for one live session.
///
/// Only the registry side mints new ids (random UUIDs). Ids arriving from
/// a front end are wrapped as-is and only ever used for lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ── Session events ───────────────────────────────────────────────────────────

/// Pushed from a live session to whoever opened it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Raw output bytes (stdout and stderr merged), in channel order.
    Data {
        connection_id: ConnectionId,
        data: Vec<u8>,
    },
    /// A channel or connection error. A `Closed` event follows when fatal.
    Error {
        connection_id: ConnectionId,
        message: String,
    },
    /// The session ended. Emitted exactly once.
    Closed { connection_id: ConnectionId },
}

impl SessionEvent {
    pub fn connection_id(&self) -> &ConnectionId {
        match self {
            SessionEvent::Data { connection_id, .. }
            | SessionEvent::Error { connection_id, .. }
            | SessionEvent::Closed { connection_id } => connection_id,
        }
    }
}

pub type SessionEventSender = mpsc::UnboundedSender<SessionEvent>;
pub type SessionEventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

// ── Exec ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

// ── Transfers ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Upload,
    Download,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: TransferKind,
    pub filename: String,
    pub percent: u8,
    pub transferred: u64,
    pub total: u64,
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

/// Metadata for one remote path, classified from the raw mode bits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttributes {
    pub size: u64,
    pub mtime: u64,
    pub atime: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub is_directory: bool,
    pub is_file: bool,
    pub is_symbolic_link: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn host_config_defaults_port() {
        let cfg: HostConfig =
            serde_json::from_str(r#"{"host":"10.0.0.5","username":"root","password":"x"}"#)
                .unwrap();
        assert_eq!(cfg.port, 22);
        assert_eq!(cfg.password(), Some("x"));
        assert!(cfg.private_key().is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn blank_credentials_are_a_config_error() {
        let cfg = HostConfig::new("example.org", 22, "root").with_password("   ");
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(err.message(), "Either password or private key is required");
    }

    #[test]
    fn missing_host_is_a_config_error() {
        let cfg = HostConfig::new("", 22, "root").with_password("pw");
        assert_eq!(cfg.validate().unwrap_err().kind(), ErrorKind::Config);
    }

    #[test]
    fn secrets_are_redacted_in_debug_but_serialized_for_the_wire() {
        let cfg = HostConfig::new("h", 2222, "u").with_private_key("KEY", Some("pp".into()));
        let debug = format!("{:?}", cfg);
        assert!(!debug.contains("KEY"));

        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["privateKey"], "KEY");
        assert_eq!(json["passphrase"], "pp");
        assert_eq!(json["port"], 2222);
        assert!(json.get("password").is_none());
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn progress_event_wire_shape() {
        let ev = ProgressEvent {
            kind: TransferKind::Download,
            filename: "a.txt".into(),
            percent: 50,
            transferred: 5,
            total: 10,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "download");
        assert_eq!(json["filename"], "a.txt");
        assert_eq!(json["percent"], 50);
    }
}
