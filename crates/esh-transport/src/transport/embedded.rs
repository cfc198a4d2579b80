// ── Embedded transport – same-process sessions and transfers ─────────────────

use crate::transport::{
    Connected, Downloaded, FileContent, Listing, Stats, TestResult, Transport, Uploaded,
};
use async_trait::async_trait;
use esh_core::{
    Ack, ConnectionId, ExecOutput, HostConfig, ProgressSender, Reply, SessionEventSender,
    SshSettings, TransferSettings,
};
use esh_sftp::TransferFacade;
use esh_ssh::{SessionManager, SshBackend};
use std::sync::Arc;
use tracing::info;

/// Calls the session connector and transfer façade directly. Owns its own
/// session registry.
#[derive(Clone)]
pub struct EmbeddedTransport {
    sessions: SessionManager,
    transfers: TransferFacade,
}

impl EmbeddedTransport {
    /// Must be called inside a tokio runtime.
    pub fn new(backend: Arc<dyn SshBackend>, ssh: SshSettings, transfer: TransferSettings) -> Self {
        let transfers = TransferFacade::new(Arc::clone(&backend), &ssh, transfer);
        Self {
            sessions: SessionManager::new(backend, ssh),
            transfers,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn transfers(&self) -> &TransferFacade {
        &self.transfers
    }
}

#[async_trait]
impl Transport for EmbeddedTransport {
    async fn connect(&self, host: HostConfig, events: SessionEventSender) -> Reply<Connected> {
        self.sessions
            .connect(host, events)
            .await
            .map(|session| Connected {
                connection_id: Some(session.connection_id().clone()),
            })
            .into()
    }

    fn write(&self, connection_id: &ConnectionId, data: Vec<u8>) {
        self.sessions.write(connection_id, data);
    }

    fn resize(&self, connection_id: &ConnectionId, cols: u32, rows: u32) {
        self.sessions.resize(connection_id, cols, rows);
    }

    fn disconnect(&self, connection_id: &ConnectionId) {
        self.sessions.disconnect(connection_id);
    }

    async fn exec(&self, host: HostConfig, command: String) -> Reply<ExecOutput> {
        self.sessions.exec(host, command).await.into()
    }

    async fn test(&self, host: HostConfig) -> Reply<TestResult> {
        self.sessions
            .test(host)
            .await
            .map(|message| TestResult { message })
            .into()
    }

    async fn list(&self, host: HostConfig, path: String) -> Reply<Listing> {
        self.transfers
            .list(&host, &path)
            .await
            .map(|files| Listing { files })
            .into()
    }

    async fn mkdir(&self, host: HostConfig, path: String) -> Reply<Ack> {
        self.transfers.mkdir(&host, &path).await.map(|()| Ack {}).into()
    }

    async fn delete(&self, host: HostConfig, path: String) -> Reply<Ack> {
        self.transfers.delete(&host, &path).await.map(|()| Ack {}).into()
    }

    async fn rmdir(&self, host: HostConfig, path: String) -> Reply<Ack> {
        self.transfers.rmdir(&host, &path).await.map(|()| Ack {}).into()
    }

    async fn rename(&self, host: HostConfig, old_path: String, new_path: String) -> Reply<Ack> {
        self.transfers
            .rename(&host, &old_path, &new_path)
            .await
            .map(|()| Ack {})
            .into()
    }

    async fn read_file(&self, host: HostConfig, path: String) -> Reply<FileContent> {
        self.transfers
            .read_file(&host, &path)
            .await
            .map(|content| FileContent { content })
            .into()
    }

    async fn write_file(&self, host: HostConfig, path: String, content: String) -> Reply<Ack> {
        self.transfers
            .write_file(&host, &path, &content)
            .await
            .map(|()| Ack {})
            .into()
    }

    async fn stat(&self, host: HostConfig, path: String) -> Reply<Stats> {
        self.transfers
            .stat(&host, &path)
            .await
            .map(|stats| Stats { stats })
            .into()
    }

    async fn chmod(&self, host: HostConfig, path: String, mode: u32) -> Reply<Ack> {
        self.transfers
            .chmod(&host, &path, mode)
            .await
            .map(|()| Ack {})
            .into()
    }

    async fn chown(&self, host: HostConfig, path: String, uid: u32, gid: u32) -> Reply<Ack> {
        self.transfers
            .chown(&host, &path, uid, gid)
            .await
            .map(|()| Ack {})
            .into()
    }

    async fn upload(
        &self,
        host: HostConfig,
        local_path: String,
        remote_path: String,
        progress: Option<ProgressSender>,
    ) -> Reply<Uploaded> {
        self.transfers
            .upload(&host, &local_path, &remote_path, progress)
            .await
            .map(|remote_path| Uploaded { remote_path })
            .into()
    }

    async fn download(
        &self,
        host: HostConfig,
        remote_path: String,
        local_path: String,
        progress: Option<ProgressSender>,
    ) -> Reply<Downloaded> {
        self.transfers
            .download(&host, &remote_path, &local_path, progress)
            .await
            .map(|local_path| Downloaded { local_path })
            .into()
    }

    async fn shutdown(&self) {
        let closed = self.sessions.disconnect_all().await;
        info!("Embedded transport shut down ({} sessions closed)", closed);
    }
}
