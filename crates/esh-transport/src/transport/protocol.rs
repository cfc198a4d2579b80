// ── Relay wire protocol ───────────────────────────────────────────────────────
//
// JSON text frames over one WebSocket. Calls are correlated by a
// client-chosen id; everything the relay pushes on its own is an event
// addressed by topic.

use esh_core::{ConnectionId, HostConfig, SessionEvent};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Base64 (standard alphabet) for byte payloads.
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// ── Client → relay ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Request {
    #[serde(rename_all = "camelCase")]
    Connect { host_config: HostConfig },
    #[serde(rename_all = "camelCase")]
    Exec { host_config: HostConfig, command: String },
    #[serde(rename_all = "camelCase")]
    Test { host_config: HostConfig },
    #[serde(rename_all = "camelCase")]
    List { host_config: HostConfig, path: String },
    #[serde(rename_all = "camelCase")]
    Mkdir { host_config: HostConfig, path: String },
    #[serde(rename_all = "camelCase")]
    Delete { host_config: HostConfig, path: String },
    #[serde(rename_all = "camelCase")]
    Rmdir { host_config: HostConfig, path: String },
    #[serde(rename_all = "camelCase")]
    Rename {
        host_config: HostConfig,
        old_path: String,
        new_path: String,
    },
    #[serde(rename_all = "camelCase")]
    ReadFile { host_config: HostConfig, path: String },
    #[serde(rename_all = "camelCase")]
    WriteFile {
        host_config: HostConfig,
        path: String,
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    Stat { host_config: HostConfig, path: String },
    #[serde(rename_all = "camelCase")]
    Chmod {
        host_config: HostConfig,
        path: String,
        mode: u32,
    },
    #[serde(rename_all = "camelCase")]
    Chown {
        host_config: HostConfig,
        path: String,
        uid: u32,
        gid: u32,
    },
    /// `local_path` is resolved on the relay host.
    #[serde(rename_all = "camelCase")]
    Upload {
        host_config: HostConfig,
        local_path: String,
        remote_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress_id: Option<String>,
    },
    /// `local_path` is resolved on the relay host.
    #[serde(rename_all = "camelCase")]
    Download {
        host_config: HostConfig,
        remote_path: String,
        local_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress_id: Option<String>,
    },
}

impl Request {
    pub fn op(&self) -> &'static str {
        match self {
            Request::Connect { .. } => "connect",
            Request::Exec { .. } => "exec",
            Request::Test { .. } => "test",
            Request::List { .. } => "list",
            Request::Mkdir { .. } => "mkdir",
            Request::Delete { .. } => "delete",
            Request::Rmdir { .. } => "rmdir",
            Request::Rename { .. } => "rename",
            Request::ReadFile { .. } => "readFile",
            Request::WriteFile { .. } => "writeFile",
            Request::Stat { .. } => "stat",
            Request::Chmod { .. } => "chmod",
            Request::Chown { .. } => "chown",
            Request::Upload { .. } => "upload",
            Request::Download { .. } => "download",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ClientFrame {
    Call { id: u64, request: Request },
    #[serde(rename_all = "camelCase")]
    Write {
        connection_id: ConnectionId,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    #[serde(rename_all = "camelCase")]
    Resize {
        connection_id: ConnectionId,
        cols: u32,
        rows: u32,
    },
    #[serde(rename_all = "camelCase")]
    Disconnect { connection_id: ConnectionId },
}

// ── Relay → client ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ServerFrame {
    /// Settles call `id`; `body` is a serialized `Reply`.
    Reply { id: u64, body: serde_json::Value },
    Event {
        topic: String,
        payload: serde_json::Value,
    },
}

impl ServerFrame {
    /// Event frame for one session event.
    pub fn session_event(event: &SessionEvent) -> Self {
        let (topic, payload) = match event {
            SessionEvent::Data {
                connection_id,
                data,
            } => (
                Topic::SshData(connection_id.clone()),
                serde_json::to_value(DataPayload { data: data.clone() }),
            ),
            SessionEvent::Error {
                connection_id,
                message,
            } => (
                Topic::SshError(connection_id.clone()),
                serde_json::to_value(ErrorPayload {
                    message: message.clone(),
                }),
            ),
            SessionEvent::Closed { connection_id } => (
                Topic::SshClose(connection_id.clone()),
                Ok(serde_json::json!({})),
            ),
        };
        ServerFrame::Event {
            topic: topic.to_string(),
            payload: payload.unwrap_or(serde_json::Value::Null),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPayload {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

// ── Topics ───────────────────────────────────────────────────────────────────

/// Event channel names: `ssh:data:<id>`, `ssh:close:<id>`, `ssh:error:<id>`
/// and `sftp:progress:<progressId>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    SshData(ConnectionId),
    SshClose(ConnectionId),
    SshError(ConnectionId),
    Progress(String),
}

impl Topic {
    pub fn parse(topic: &str) -> Option<Self> {
        let (prefix, id) = match topic.splitn(3, ':').collect::<Vec<_>>().as_slice() {
            [a, b, id] if !id.is_empty() => ((*a, *b), id.to_string()),
            _ => return None,
        };
        match prefix {
            ("ssh", "data") => Some(Topic::SshData(id.into())),
            ("ssh", "close") => Some(Topic::SshClose(id.into())),
            ("ssh", "error") => Some(Topic::SshError(id.into())),
            ("sftp", "progress") => Some(Topic::Progress(id)),
            _ => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::SshData(id) => write!(f, "ssh:data:{}", id),
            Topic::SshClose(id) => write!(f, "ssh:close:{}", id),
            Topic::SshError(id) => write!(f, "ssh:error:{}", id),
            Topic::Progress(id) => write!(f, "sftp:progress:{}", id),
        }
    }
}

/// Rebuilds a session event from a pushed frame. `None` for progress
/// topics and malformed payloads.
pub fn session_event_from(topic: &Topic, payload: serde_json::Value) -> Option<SessionEvent> {
    match topic {
        Topic::SshData(id) => {
            let DataPayload { data } = serde_json::from_value(payload).ok()?;
            Some(SessionEvent::Data {
                connection_id: id.clone(),
                data,
            })
        }
        Topic::SshError(id) => {
            let ErrorPayload { message } = serde_json::from_value(payload).ok()?;
            Some(SessionEvent::Error {
                connection_id: id.clone(),
                message,
            })
        }
        Topic::SshClose(id) => Some(SessionEvent::Closed {
            connection_id: id.clone(),
        }),
        Topic::Progress(_) => None,
    }
}
