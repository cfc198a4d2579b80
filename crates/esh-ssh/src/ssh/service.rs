// ── Session connector ─────────────────────────────────────────────────────────

use crate::ssh::backend::{ConnectOptions, ShellChannel, ShellOptions, SshBackend};
use crate::ssh::registry::{SessionInfo, SessionRegistry};
use crate::ssh::relay::relay_events;
use crate::ssh::shell::spawn_pump;
use crate::ssh::state::SessionState;
use chrono::Utc;
use esh_core::{
    ConnectionId, Error, ExecOutput, HostConfig, Result, SessionEventSender, SshSettings,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Command used by [`SessionManager::test`].
pub const TEST_COMMAND: &str = r#"echo "connected""#;

/// Front-end handle to a live session: it can only write and resize.
#[derive(Clone)]
pub struct SessionCapability {
    connection_id: ConnectionId,
    registry: SessionRegistry,
}

impl SessionCapability {
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub fn write(&self, data: impl Into<Vec<u8>>) {
        self.registry.write(&self.connection_id, data.into());
    }

    pub fn resize(&self, cols: u32, rows: u32) {
        self.registry.resize(&self.connection_id, cols, rows);
    }
}

impl std::fmt::Debug for SessionCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCapability")
            .field("connection_id", &self.connection_id)
            .finish()
    }
}

/// Opens sessions, routes input to them and runs one-shot commands.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct SessionManager {
    backend: Arc<dyn SshBackend>,
    registry: SessionRegistry,
    settings: Arc<SshSettings>,
}

pub type SessionManagerState = Arc<SessionManager>;

impl SessionManager {
    /// Must be called inside a tokio runtime (spawns the registry task).
    pub fn new(backend: Arc<dyn SshBackend>, settings: SshSettings) -> Self {
        Self {
            backend,
            registry: SessionRegistry::spawn(),
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &SshSettings {
        &self.settings
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    // ── Connect ──────────────────────────────────────────────────────────────

    /// Connects, authenticates and opens an interactive shell.
    ///
    /// The session is registered only once the shell is open; a failed
    /// attempt leaves no trace in the registry. Output, errors and the
    /// final close are pushed to `events`.
    pub async fn connect(
        &self,
        host: HostConfig,
        events: SessionEventSender,
    ) -> Result<SessionCapability> {
        host.validate()?;

        let connection_id = ConnectionId::generate();
        let state = SessionState::Created
            .advance(SessionState::Connecting)
            .map_err(|e| Error::Transport(e.to_string()))?;
        info!(
            "[{}] SSH connecting to {} as {} ({:?})",
            connection_id,
            host.endpoint(),
            host.username,
            state
        );

        let channel = match self.open_with_retry(&connection_id, &host).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!(
                    "[{}] SSH connect to {} failed ({:?}): {}",
                    connection_id,
                    host.endpoint(),
                    SessionState::for_failure(&e),
                    e
                );
                return Err(e);
            }
        };

        let (shell, pump_events) = spawn_pump(connection_id.clone(), channel)
            .map_err(|e| Error::Transport(format!("Failed to start shell thread: {}", e)))?;

        let info = SessionInfo {
            connection_id: connection_id.clone(),
            host: host.host.clone(),
            port: host.port,
            username: host.username.clone(),
            state: state
                .advance(SessionState::Ready)
                .map_err(|e| Error::Transport(e.to_string()))?,
            connected_at: Utc::now(),
        };
        if !self.registry.insert(info, shell).await {
            return Err(Error::Transport(format!(
                "Session handle {} is already in use",
                connection_id
            )));
        }

        tokio::spawn(relay_events(
            connection_id.clone(),
            pump_events,
            events,
            self.registry.clone(),
        ));

        info!("[{}] SSH session ready", connection_id);
        Ok(SessionCapability {
            connection_id,
            registry: self.registry.clone(),
        })
    }

    async fn open_with_retry(
        &self,
        connection_id: &ConnectionId,
        host: &HostConfig,
    ) -> Result<Box<dyn ShellChannel>> {
        let policy = &self.settings.retry;
        let attempts = policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.open_shell_bounded(host).await {
                Ok(channel) => return Ok(channel),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        "[{}] attempt {}/{} failed: {} (retrying in {} ms)",
                        connection_id, attempt, attempts, e, policy.backoff_ms
                    );
                    tokio::time::sleep(policy.backoff()).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Runs the blocking open under the ready-timeout. A shell that opens
    /// after the timeout already fired is closed straight away.
    async fn open_shell_bounded(&self, host: &HostConfig) -> Result<Box<dyn ShellChannel>> {
        let backend = Arc::clone(&self.backend);
        let host = host.clone();
        let options = ShellOptions::from(self.settings.as_ref());
        let ready_timeout = options.connect.ready_timeout;

        let mut task = tokio::task::spawn_blocking(move || backend.open_shell(&host, &options));
        match tokio::time::timeout(ready_timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(Error::Transport(format!("Connect task failed: {}", e))),
            Err(_) => {
                tokio::spawn(async move {
                    if let Ok(Ok(mut late)) = task.await {
                        debug!("closing shell that opened after the ready-timeout");
                        late.close();
                    }
                });
                Err(Error::Timeout("Timed out while waiting for handshake".into()))
            }
        }
    }

    // ── Input ────────────────────────────────────────────────────────────────

    /// Silently ignored if `connection_id` is not live.
    pub fn write(&self, connection_id: &ConnectionId, data: impl Into<Vec<u8>>) {
        self.registry.write(connection_id, data.into());
    }

    /// Silently ignored if `connection_id` is not live.
    pub fn resize(&self, connection_id: &ConnectionId, cols: u32, rows: u32) {
        self.registry.resize(connection_id, cols, rows);
    }

    // ── Teardown ─────────────────────────────────────────────────────────────

    /// Fire-and-forget. Takes effect before any later write or resize.
    pub fn disconnect(&self, connection_id: &ConnectionId) {
        self.registry.remove(connection_id);
    }

    /// Returns whether the handle was live.
    pub async fn disconnect_and_wait(&self, connection_id: &ConnectionId) -> bool {
        self.registry.remove_and_wait(connection_id).await
    }

    pub async fn disconnect_all(&self) -> usize {
        let closed = self.registry.remove_all().await;
        if closed > 0 {
            info!("Disconnected {} SSH session(s)", closed);
        }
        closed
    }

    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.registry.list().await
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    // ── One-shot commands ────────────────────────────────────────────────────

    /// Runs `command` on its own short-lived connection.
    pub async fn exec(&self, host: HostConfig, command: String) -> Result<ExecOutput> {
        host.validate()?;
        let backend = Arc::clone(&self.backend);
        let options = ConnectOptions::from(self.settings.as_ref());
        debug!("SSH exec on {}: {}", host.endpoint(), command);
        tokio::task::spawn_blocking(move || backend.exec(&host, &command, &options))
            .await
            .map_err(|e| Error::Transport(format!("Exec task failed: {}", e)))?
    }

    /// Checks that the host accepts the credentials and runs a command.
    pub async fn test(&self, host: HostConfig) -> Result<String> {
        let output = self.exec(host, TEST_COMMAND.to_string()).await?;
        if output.code == 0 {
            Ok("Connection succeeded".into())
        } else {
            Err(Error::Operation(format!(
                "Test command exited with code {}",
                output.code
            )))
        }
    }
}
