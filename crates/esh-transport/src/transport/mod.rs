// ── esh-transport / transport module ──────────────────────────────────────────
//
// One method surface, two topologies:
//   • EmbeddedTransport calls the session connector and transfer façade
//     in-process
//   • NetworkedTransport forwards every call to a relay over WebSocket and
//     demultiplexes pushed events by topic
//   • Callers resolve stored hosts through a HostStore before connecting

pub mod client;
pub mod embedded;
pub mod hosts;
pub mod protocol;

pub use client::NetworkedTransport;
pub use embedded::EmbeddedTransport;
pub use hosts::{connect_host, exec_host, HostStore, InMemoryHostStore};
pub use protocol::{ClientFrame, Request, ServerFrame, Topic};

use async_trait::async_trait;
use esh_core::{
    Ack, ConnectionId, ExecOutput, FileAttributes, HostConfig, ProgressSender, Reply,
    SessionEventSender,
};
use esh_sftp::RemoteEntry;
use serde::{Deserialize, Serialize};

// ── Reply payloads ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    #[serde(default)]
    pub connection_id: Option<ConnectionId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    #[serde(default)]
    pub files: Vec<RemoteEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    #[serde(default)]
    pub stats: FileAttributes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Uploaded {
    #[serde(default)]
    pub remote_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Downloaded {
    #[serde(default)]
    pub local_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    #[serde(default)]
    pub message: String,
}

// ── Transport ────────────────────────────────────────────────────────────────

/// Everything a front end can ask of the session and transfer layer.
///
/// Async methods always settle into a [`Reply`]; failures travel as
/// `{success: false, error}` and never as panics. `write`, `resize` and
/// `disconnect` are fire-and-forget and silently ignore unknown handles.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens an interactive session. Output, errors and the final close of
    /// the new session are pushed to `events`.
    async fn connect(&self, host: HostConfig, events: SessionEventSender) -> Reply<Connected>;

    fn write(&self, connection_id: &ConnectionId, data: Vec<u8>);

    fn resize(&self, connection_id: &ConnectionId, cols: u32, rows: u32);

    fn disconnect(&self, connection_id: &ConnectionId);

    async fn exec(&self, host: HostConfig, command: String) -> Reply<ExecOutput>;

    /// Runs a trivial command to prove the host is reachable and accepts the
    /// credentials.
    async fn test(&self, host: HostConfig) -> Reply<TestResult>;

    async fn list(&self, host: HostConfig, path: String) -> Reply<Listing>;

    async fn mkdir(&self, host: HostConfig, path: String) -> Reply<Ack>;

    async fn delete(&self, host: HostConfig, path: String) -> Reply<Ack>;

    /// Recursive and non-atomic.
    async fn rmdir(&self, host: HostConfig, path: String) -> Reply<Ack>;

    async fn rename(&self, host: HostConfig, old_path: String, new_path: String) -> Reply<Ack>;

    async fn read_file(&self, host: HostConfig, path: String) -> Reply<FileContent>;

    async fn write_file(&self, host: HostConfig, path: String, content: String) -> Reply<Ack>;

    async fn stat(&self, host: HostConfig, path: String) -> Reply<Stats>;

    async fn chmod(&self, host: HostConfig, path: String, mode: u32) -> Reply<Ack>;

    async fn chown(&self, host: HostConfig, path: String, uid: u32, gid: u32) -> Reply<Ack>;

    async fn upload(
        &self,
        host: HostConfig,
        local_path: String,
        remote_path: String,
        progress: Option<ProgressSender>,
    ) -> Reply<Uploaded>;

    async fn download(
        &self,
        host: HostConfig,
        remote_path: String,
        local_path: String,
        progress: Option<ProgressSender>,
    ) -> Reply<Downloaded>;

    /// Ends every session reachable through this transport.
    async fn shutdown(&self);
}
