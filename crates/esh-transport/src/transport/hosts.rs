// ── Host store collaborator ──────────────────────────────────────────────────

use crate::transport::{Connected, Transport};
use esh_core::{ExecOutput, HostConfig, Reply, SessionEventSender};
use std::collections::HashMap;
use std::sync::RwLock;

/// Read side of the local configuration store: resolves a saved host and
/// its credentials by id.
pub trait HostStore: Send + Sync {
    fn get_host_by_id(&self, id: &str) -> Option<HostConfig>;
}

/// Process-local store, mostly for tests and the relay's own use.
#[derive(Debug, Default)]
pub struct InMemoryHostStore {
    hosts: RwLock<HashMap<String, HostConfig>>,
}

impl InMemoryHostStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Saves `host` under `id`, replacing any previous record.
    pub fn insert(&self, id: impl Into<String>, mut host: HostConfig) {
        let id = id.into();
        host.id = Some(id.clone());
        if let Ok(mut hosts) = self.hosts.write() {
            hosts.insert(id, host);
        }
    }

    pub fn remove(&self, id: &str) -> Option<HostConfig> {
        self.hosts.write().ok()?.remove(id)
    }
}

impl HostStore for InMemoryHostStore {
    fn get_host_by_id(&self, id: &str) -> Option<HostConfig> {
        self.hosts.read().ok()?.get(id).cloned()
    }
}

fn unknown_host<T: Default>(id: &str) -> Reply<T> {
    Reply::failed(format!("Host {} not found", id))
}

/// Resolves `host_id` and opens a session to it.
pub async fn connect_host(
    store: &dyn HostStore,
    transport: &dyn Transport,
    host_id: &str,
    events: SessionEventSender,
) -> Reply<Connected> {
    match store.get_host_by_id(host_id) {
        Some(host) => transport.connect(host, events).await,
        None => unknown_host(host_id),
    }
}

/// Resolves `host_id` and runs `command` on it.
pub async fn exec_host(
    store: &dyn HostStore,
    transport: &dyn Transport,
    host_id: &str,
    command: String,
) -> Reply<ExecOutput> {
    match store.get_host_by_id(host_id) {
        Some(host) => transport.exec(host, command).await,
        None => unknown_host(host_id),
    }
}
