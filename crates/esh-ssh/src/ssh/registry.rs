// ── Session registry ──────────────────────────────────────────────────────────
//
// One tokio task exclusively owns the handle → session map. Everyone else
// holds a cloneable `SessionRegistry` and reaches sessions only by handle.
// Commands are applied one at a time in arrival order, so a `remove`
// followed by `write` from the same caller always sees the removal.

use crate::ssh::shell::{ShellCommand, ShellHandle};
use crate::ssh::state::SessionState;
use chrono::{DateTime, Utc};
use esh_core::ConnectionId;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub connection_id: ConnectionId,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub state: SessionState,
    pub connected_at: DateTime<Utc>,
}

struct SessionEntry {
    info: SessionInfo,
    shell: ShellHandle,
}

enum RegistryCommand {
    Insert {
        info: SessionInfo,
        shell: ShellHandle,
        ack: oneshot::Sender<bool>,
    },
    Write {
        id: ConnectionId,
        data: Vec<u8>,
    },
    Resize {
        id: ConnectionId,
        cols: u32,
        rows: u32,
    },
    Remove {
        id: ConnectionId,
        ack: Option<oneshot::Sender<bool>>,
    },
    RemoveAll {
        ack: oneshot::Sender<usize>,
    },
    List {
        reply: oneshot::Sender<Vec<SessionInfo>>,
    },
    Contains {
        id: ConnectionId,
        reply: oneshot::Sender<bool>,
    },
}

#[derive(Clone)]
pub struct SessionRegistry {
    commands: mpsc::UnboundedSender<RegistryCommand>,
    count: watch::Receiver<usize>,
}

impl SessionRegistry {
    /// Spawns the owner task. Must be called inside a tokio runtime. The
    /// task ends once every `SessionRegistry` clone is dropped, closing any
    /// sessions still open.
    pub fn spawn() -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (count_tx, count) = watch::channel(0usize);
        tokio::spawn(run_registry(rx, count_tx));
        Self { commands, count }
    }

    /// Stores a freshly opened session. Returns `false` (and closes the
    /// shell) if the handle is already taken.
    pub async fn insert(&self, info: SessionInfo, shell: ShellHandle) -> bool {
        let (ack, rx) = oneshot::channel();
        if self
            .commands
            .send(RegistryCommand::Insert { info, shell, ack })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Forwards bytes to the session's channel. Unknown handles are ignored.
    pub fn write(&self, id: &ConnectionId, data: Vec<u8>) {
        let _ = self.commands.send(RegistryCommand::Write {
            id: id.clone(),
            data,
        });
    }

    /// Window change. Unknown handles are ignored.
    pub fn resize(&self, id: &ConnectionId, cols: u32, rows: u32) {
        let _ = self.commands.send(RegistryCommand::Resize {
            id: id.clone(),
            cols,
            rows,
        });
    }

    /// Ends the session and drops its entry. No-op for unknown handles.
    pub fn remove(&self, id: &ConnectionId) {
        let _ = self.commands.send(RegistryCommand::Remove {
            id: id.clone(),
            ack: None,
        });
    }

    /// Like [`SessionRegistry::remove`] but waits for the owner task.
    /// Returns whether an entry was actually removed.
    pub async fn remove_and_wait(&self, id: &ConnectionId) -> bool {
        let (ack, rx) = oneshot::channel();
        if self
            .commands
            .send(RegistryCommand::Remove {
                id: id.clone(),
                ack: Some(ack),
            })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Ends every live session. Returns how many were closed.
    pub async fn remove_all(&self) -> usize {
        let (ack, rx) = oneshot::channel();
        if self.commands.send(RegistryCommand::RemoveAll { ack }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(RegistryCommand::List { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn contains(&self, id: &ConnectionId) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(RegistryCommand::Contains {
                id: id.clone(),
                reply,
            })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Live session count as of the last applied command.
    pub fn len(&self) -> usize {
        *self.count.borrow()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn close_entry(id: &ConnectionId, mut entry: SessionEntry) {
    entry.info.state = SessionState::Closing;
    info!(
        "[{}] closing session to {}:{}",
        id, entry.info.host, entry.info.port
    );
    entry.shell.close();
}

async fn run_registry(
    mut commands: mpsc::UnboundedReceiver<RegistryCommand>,
    count: watch::Sender<usize>,
) {
    let mut sessions: HashMap<ConnectionId, SessionEntry> = HashMap::new();

    while let Some(command) = commands.recv().await {
        match command {
            RegistryCommand::Insert { info, shell, ack } => {
                let id = info.connection_id.clone();
                if sessions.contains_key(&id) {
                    shell.close();
                    let _ = ack.send(false);
                    continue;
                }
                debug!("[{}] session registered", id);
                sessions.insert(id, SessionEntry { info, shell });
                let _ = count.send(sessions.len());
                let _ = ack.send(true);
            }
            RegistryCommand::Write { id, data } => match sessions.get(&id) {
                Some(entry) => {
                    if !entry.shell.send(ShellCommand::Input(data)) {
                        debug!("[{}] write after pump exit dropped", id);
                    }
                }
                None => debug!("[{}] write to unknown session ignored", id),
            },
            RegistryCommand::Resize { id, cols, rows } => {
                if let Some(entry) = sessions.get(&id) {
                    entry.shell.send(ShellCommand::Resize(cols, rows));
                }
            }
            RegistryCommand::Remove { id, ack } => {
                let removed = match sessions.remove(&id) {
                    Some(entry) => {
                        close_entry(&id, entry);
                        let _ = count.send(sessions.len());
                        true
                    }
                    None => false,
                };
                if let Some(ack) = ack {
                    let _ = ack.send(removed);
                }
            }
            RegistryCommand::RemoveAll { ack } => {
                let closed = sessions.len();
                for (id, entry) in sessions.drain() {
                    close_entry(&id, entry);
                }
                let _ = count.send(0);
                let _ = ack.send(closed);
            }
            RegistryCommand::List { reply } => {
                let mut infos: Vec<SessionInfo> =
                    sessions.values().map(|e| e.info.clone()).collect();
                infos.sort_by_key(|i| i.connected_at);
                let _ = reply.send(infos);
            }
            RegistryCommand::Contains { id, reply } => {
                let _ = reply.send(sessions.contains_key(&id));
            }
        }
    }

    for (id, entry) in sessions.drain() {
        close_entry(&id, entry);
    }
}
