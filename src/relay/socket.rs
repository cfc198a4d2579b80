// ── WebSocket handler ─────────────────────────────────────────────────────────
//
// Fire-and-forget frames (write, resize, disconnect) are applied inline, in
// arrival order. Calls run as their own tasks and answer through the shared
// outbound queue. Sessions opened over a socket die with it.

use crate::relay::SharedRelayState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use esh_core::{ConnectionId, ProgressEvent, ProgressReceiver, Reply, SessionEvent};
use esh_transport::{ClientFrame, Request, ServerFrame, Topic, Transport};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

type Outbound = mpsc::UnboundedSender<ServerFrame>;

/// How long queued frames may take to flush once the socket loop ends.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

static NEXT_SOCKET: AtomicU64 = AtomicU64::new(1);

/// Handles opened through one socket. Once `closed` is set no new handle
/// is admitted, so a connect that settles after the client left is undone
/// instead of leaking.
#[derive(Default)]
struct Owned {
    closed: bool,
    ids: HashSet<ConnectionId>,
}

#[derive(Clone, Default)]
struct OwnedSessions(Arc<Mutex<Owned>>);

impl OwnedSessions {
    fn lock(&self) -> MutexGuard<'_, Owned> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records `id` unless the socket is already gone.
    fn claim(&self, id: &ConnectionId) -> bool {
        let mut owned = self.lock();
        if owned.closed {
            return false;
        }
        owned.ids.insert(id.clone());
        true
    }

    fn release(&self, id: &ConnectionId) {
        self.lock().ids.remove(id);
    }

    /// Marks the socket gone and hands back everything it still owns.
    fn close(&self) -> Vec<ConnectionId> {
        let mut owned = self.lock();
        owned.closed = true;
        owned.ids.drain().collect()
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedRelayState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedRelayState) {
    let socket_id = NEXT_SOCKET.fetch_add(1, Ordering::Relaxed);
    info!("[ws {}] client connected", socket_id);

    let (mut sink, mut stream) = socket.split();
    let (outbound, mut frames) = mpsc::unbounded_channel::<ServerFrame>();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode relay frame: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let owned = OwnedSessions::default();
    let mut closing = state.closing();

    loop {
        let message = tokio::select! {
            message = stream.next() => message,
            _ = closing.changed() => break,
        };
        let text = match message {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!("[ws {}] read error: {}", socket_id, e);
                break;
            }
        };

        match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::Call { id, request }) => {
                debug!("[ws {}] call {} ({})", socket_id, id, request.op());
                tokio::spawn(run_call(
                    Arc::clone(&state),
                    outbound.clone(),
                    owned.clone(),
                    id,
                    request,
                ));
            }
            Ok(ClientFrame::Write {
                connection_id,
                data,
            }) => state.transport.write(&connection_id, data),
            Ok(ClientFrame::Resize {
                connection_id,
                cols,
                rows,
            }) => state.transport.resize(&connection_id, cols, rows),
            Ok(ClientFrame::Disconnect { connection_id }) => {
                state.transport.disconnect(&connection_id)
            }
            Err(e) => warn!("[ws {}] unreadable frame: {}", socket_id, e),
        }
    }

    let orphans = owned.close();
    for connection_id in &orphans {
        state.transport.disconnect(connection_id);
    }

    // The writer ends once every call and forwarder has let go of its sender.
    drop(outbound);
    if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        debug!("[ws {}] outbound queue not drained, dropping it", socket_id);
        writer.abort();
    }
    info!(
        "[ws {}] client disconnected ({} sessions closed)",
        socket_id,
        orphans.len()
    );
}

fn body<T: Serialize>(reply: Reply<T>) -> serde_json::Value {
    serde_json::to_value(reply).unwrap_or_else(|e| {
        serde_json::json!({
            "success": false,
            "error": format!("Failed to encode reply: {}", e),
        })
    })
}

async fn run_call(
    state: SharedRelayState,
    outbound: Outbound,
    owned: OwnedSessions,
    id: u64,
    request: Request,
) {
    let transport = &state.transport;
    let body = match request {
        Request::Connect { host_config } => {
            let (events, rx) = mpsc::unbounded_channel();
            let reply = transport.connect(host_config, events).await;
            let opened = reply.payload.connection_id.clone().filter(|_| reply.success);
            if let Some(connection_id) = opened {
                if !owned.claim(&connection_id) {
                    info!("[{}] client left before connect finished, closing", connection_id);
                    transport.disconnect(&connection_id);
                    return;
                }
                // The reply goes out before any of the session's events.
                let _ = outbound.send(ServerFrame::Reply { id, body: body(reply) });
                tokio::spawn(forward_session(rx, outbound, owned, connection_id));
                return;
            }
            body(reply)
        }
        Request::Exec {
            host_config,
            command,
        } => body(transport.exec(host_config, command).await),
        Request::Test { host_config } => body(transport.test(host_config).await),
        Request::List { host_config, path } => body(transport.list(host_config, path).await),
        Request::Mkdir { host_config, path } => body(transport.mkdir(host_config, path).await),
        Request::Delete { host_config, path } => body(transport.delete(host_config, path).await),
        Request::Rmdir { host_config, path } => body(transport.rmdir(host_config, path).await),
        Request::Rename {
            host_config,
            old_path,
            new_path,
        } => body(transport.rename(host_config, old_path, new_path).await),
        Request::ReadFile { host_config, path } => {
            body(transport.read_file(host_config, path).await)
        }
        Request::WriteFile {
            host_config,
            path,
            content,
        } => body(transport.write_file(host_config, path, content).await),
        Request::Stat { host_config, path } => body(transport.stat(host_config, path).await),
        Request::Chmod {
            host_config,
            path,
            mode,
        } => body(transport.chmod(host_config, path, mode).await),
        Request::Chown {
            host_config,
            path,
            uid,
            gid,
        } => body(transport.chown(host_config, path, uid, gid).await),
        Request::Upload {
            host_config,
            local_path,
            remote_path,
            progress_id,
        } => {
            let (sink, rx) = mpsc::unbounded_channel();
            let call = transport.upload(host_config, local_path, remote_path, Some(sink));
            body(forward_progress(call, rx, progress_id, &outbound).await)
        }
        Request::Download {
            host_config,
            remote_path,
            local_path,
            progress_id,
        } => {
            let (sink, rx) = mpsc::unbounded_channel();
            let call = transport.download(host_config, remote_path, local_path, Some(sink));
            body(forward_progress(call, rx, progress_id, &outbound).await)
        }
    };
    let _ = outbound.send(ServerFrame::Reply { id, body });
}

async fn forward_session(
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    outbound: Outbound,
    owned: OwnedSessions,
    connection_id: ConnectionId,
) {
    while let Some(event) = events.recv().await {
        let closed = matches!(event, SessionEvent::Closed { .. });
        let _ = outbound.send(ServerFrame::session_event(&event));
        if closed {
            break;
        }
    }
    owned.release(&connection_id);
}

/// Drives `call` while pushing its progress events, so every event of the
/// transfer is queued ahead of its reply.
async fn forward_progress<T, F>(
    call: F,
    mut rx: ProgressReceiver,
    progress_id: Option<String>,
    outbound: &Outbound,
) -> Reply<T>
where
    F: Future<Output = Reply<T>>,
{
    let topic = progress_id.map(|id| Topic::Progress(id).to_string());
    let push = |event: ProgressEvent| {
        if let Some(topic) = &topic {
            let _ = outbound.send(ServerFrame::Event {
                topic: topic.clone(),
                payload: serde_json::to_value(&event).unwrap_or_default(),
            });
        }
    };

    tokio::pin!(call);
    let reply = loop {
        tokio::select! {
            biased;
            Some(event) = rx.recv() => push(event),
            reply = &mut call => break reply,
        }
    };
    while let Ok(event) = rx.try_recv() {
        push(event);
    }
    reply
}
