// ── TransferFacade – per-call SFTP channel lifecycle ─────────────────────────

use esh_core::{Error, HostConfig, Result, SshSettings, TransferSettings};
use esh_ssh::{ConnectOptions, RemoteFs, SshBackend};
use std::sync::Arc;
use tracing::{debug, warn};

/// Closes the channel when the operation is done with it, whatever the outcome.
struct FsGuard {
    fs: Box<dyn RemoteFs>,
}

impl Drop for FsGuard {
    fn drop(&mut self) {
        self.fs.close();
    }
}

/// One-shot remote filesystem operations. Nothing is kept between calls:
/// every method connects, opens the `sftp` subsystem, does its work and
/// tears the channel down again.
#[derive(Clone)]
pub struct TransferFacade {
    backend: Arc<dyn SshBackend>,
    connect: ConnectOptions,
    settings: TransferSettings,
}

pub type TransferFacadeState = Arc<TransferFacade>;

impl TransferFacade {
    pub fn new(
        backend: Arc<dyn SshBackend>,
        ssh: &SshSettings,
        settings: TransferSettings,
    ) -> Self {
        Self {
            backend,
            connect: ConnectOptions::from(ssh),
            settings,
        }
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    pub(crate) fn chunk_size(&self) -> usize {
        self.settings.chunk_size_bytes.max(1)
    }

    /// Runs `op` against a fresh channel on the blocking pool.
    pub(crate) async fn with_remote_fs<T, F>(
        &self,
        host: &HostConfig,
        name: &str,
        op: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn RemoteFs) -> Result<T> + Send + 'static,
    {
        host.validate()?;

        let backend = Arc::clone(&self.backend);
        let options = self.connect.clone();
        let host = host.clone();
        debug!("SFTP {} on {}", name, host.endpoint());

        let task = tokio::task::spawn_blocking(move || {
            let fs = backend.open_sftp(&host, &options)?;
            let mut guard = FsGuard { fs };
            op(guard.fs.as_mut())
        });

        let joined = match self.settings.operation_timeout() {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!("SFTP {} timed out after {:?}", name, limit);
                    return Err(Error::Timeout(format!(
                        "SFTP {} timed out after {} ms",
                        name,
                        limit.as_millis()
                    )));
                }
            },
            None => task.await,
        };

        let result = joined
            .map_err(|e| Error::Operation(format!("SFTP {} task failed: {}", name, e)))?;
        if let Err(e) = &result {
            debug!("SFTP {} failed: {}", name, e);
        }
        result
    }
}
