// ── Data relay ────────────────────────────────────────────────────────────────

use crate::ssh::registry::SessionRegistry;
use crate::ssh::shell::PumpEvent;
use esh_core::{ConnectionId, SessionEvent, SessionEventSender};
use tokio::sync::mpsc;
use tracing::debug;

/// Forwards one session's pump output to its owner, in channel order.
///
/// When the pump exits (remote close, fatal error or explicit disconnect)
/// the registry entry is released before `Closed` goes out, so any write
/// the owner issues after seeing `Closed` is already a no-op.
pub(crate) async fn relay_events(
    connection_id: ConnectionId,
    mut pump: mpsc::UnboundedReceiver<PumpEvent>,
    sink: SessionEventSender,
    registry: SessionRegistry,
) {
    while let Some(event) = pump.recv().await {
        let forwarded = match event {
            PumpEvent::Output(data) => SessionEvent::Data {
                connection_id: connection_id.clone(),
                data,
            },
            PumpEvent::Failed(message) => SessionEvent::Error {
                connection_id: connection_id.clone(),
                message,
            },
            PumpEvent::Exited => break,
        };
        // A dropped sink only means nobody is listening any more.
        let _ = sink.send(forwarded);
    }

    registry.remove(&connection_id);
    debug!("[{}] session closed", connection_id);
    let _ = sink.send(SessionEvent::Closed { connection_id });
}
