// ── Relay process ─────────────────────────────────────────────────────────────
//
// Hosts its own session registry behind an embedded transport and exposes
// it to remote front ends:
//   • GET /health, GET /info
//   • GET /ws – call/reply plus pushed session and progress events

pub mod routes;
pub mod socket;

use axum::{routing::get, Router};
use esh_core::{Error, Result};
use esh_transport::{EmbeddedTransport, Transport};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

pub struct RelayState {
    pub transport: EmbeddedTransport,
    /// Flips to `true` once shutdown starts; open sockets watch it.
    closing: watch::Sender<bool>,
}

pub type SharedRelayState = Arc<RelayState>;

impl RelayState {
    pub fn new(transport: EmbeddedTransport) -> SharedRelayState {
        let (closing, _) = watch::channel(false);
        Arc::new(Self { transport, closing })
    }

    pub fn connections(&self) -> usize {
        self.transport.sessions().session_count()
    }

    pub(crate) fn closing(&self) -> watch::Receiver<bool> {
        self.closing.subscribe()
    }
}

pub fn router(state: SharedRelayState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/info", get(routes::info))
        .route("/ws", get(socket::ws_handler))
        .with_state(state)
}

/// Serves until `shutdown` resolves, then closes open sockets and every
/// session.
pub async fn serve<F>(listener: TcpListener, state: SharedRelayState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener
        .local_addr()
        .map_err(|e| Error::Transport(format!("Relay listener has no address: {}", e)))?;
    info!("EasyShell relay listening on {}", addr);

    let app = router(Arc::clone(&state));
    let signalled = Arc::clone(&state);
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("Shutdown requested");
            signalled.closing.send_replace(true);
        })
        .await;

    state.closing.send_replace(true);
    state.transport.shutdown().await;
    info!("EasyShell relay stopped");

    result.map_err(|e| Error::Transport(format!("Relay server failed: {}", e)))
}
