// ── Networked transport – WebSocket client to a relay ─────────────────────────
//
// One socket per transport. A writer task drains the outbound queue; a
// reader task settles pending calls by id and routes pushed events to the
// session or progress sink registered for their topic.

use crate::transport::protocol::{session_event_from, ClientFrame, Request, ServerFrame, Topic};
use crate::transport::{
    Connected, Downloaded, FileContent, Listing, Stats, TestResult, Transport, Uploaded,
};
use async_trait::async_trait;
use esh_core::{
    Ack, ConnectionId, Error, ExecOutput, HostConfig, ProgressEvent, ProgressSender, Reply,
    Result, SessionEvent, SessionEventSender,
};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use uuid::Uuid;

const CONNECTION_CLOSED: &str = "Relay connection closed";
const CONNECTION_LOST: &str = "Relay connection lost";

struct PendingCall {
    reply: oneshot::Sender<serde_json::Value>,
    /// Set for `connect`: registered under the new handle before the reply
    /// is released, so no early output is lost.
    events: Option<SessionEventSender>,
}

#[derive(Default)]
struct PendingCalls {
    closed: bool,
    calls: HashMap<u64, PendingCall>,
}

#[derive(Default)]
struct Shared {
    next_id: AtomicU64,
    pending: Mutex<PendingCalls>,
    sessions: Mutex<HashMap<ConnectionId, SessionEventSender>>,
    progress: Mutex<HashMap<String, ProgressSender>>,
}

impl Shared {
    fn settle(&self, id: u64, body: serde_json::Value) {
        let call = match self.pending.lock() {
            Ok(mut pending) => pending.calls.remove(&id),
            Err(_) => None,
        };
        let Some(call) = call else {
            debug!("Reply for unknown call {} dropped", id);
            return;
        };
        if let Some(events) = call.events {
            let connected: Reply<Connected> =
                serde_json::from_value(body.clone()).unwrap_or_else(|_| Reply::failed(""));
            let opened = connected.payload.connection_id.filter(|_| connected.success);
            if let Some(connection_id) = opened {
                if let Ok(mut sessions) = self.sessions.lock() {
                    sessions.insert(connection_id, events);
                }
            }
        }
        let _ = call.reply.send(body);
    }

    fn route_event(&self, topic: &str, payload: serde_json::Value) {
        let Some(topic) = Topic::parse(topic) else {
            debug!("Event with unknown topic {:?} dropped", topic);
            return;
        };
        if let Topic::Progress(progress_id) = &topic {
            let sink = self
                .progress
                .lock()
                .ok()
                .and_then(|progress| progress.get(progress_id).cloned());
            let event = serde_json::from_value::<ProgressEvent>(payload);
            if let (Some(sink), Ok(event)) = (sink, event) {
                let _ = sink.send(event);
            }
            return;
        }

        let Some(event) = session_event_from(&topic, payload) else {
            warn!("Malformed payload on {}", topic);
            return;
        };
        let Ok(mut sessions) = self.sessions.lock() else {
            return;
        };
        let connection_id = event.connection_id().clone();
        let closed = matches!(event, SessionEvent::Closed { .. });
        if let Some(sink) = sessions.get(&connection_id) {
            let _ = sink.send(event);
        }
        if closed {
            sessions.remove(&connection_id);
        }
    }

    /// Fails every pending call and ends every live session.
    fn shut(&self) {
        let calls = match self.pending.lock() {
            Ok(mut pending) => {
                pending.closed = true;
                std::mem::take(&mut pending.calls)
            }
            Err(_) => HashMap::new(),
        };
        drop(calls);

        let sessions = match self.sessions.lock() {
            Ok(mut sessions) => std::mem::take(&mut *sessions),
            Err(_) => HashMap::new(),
        };
        for (connection_id, sink) in sessions {
            let _ = sink.send(SessionEvent::Error {
                connection_id: connection_id.clone(),
                message: CONNECTION_LOST.into(),
            });
            let _ = sink.send(SessionEvent::Closed { connection_id });
        }

        if let Ok(mut progress) = self.progress.lock() {
            progress.clear();
        }
    }
}

/// Talks to a relay process. Sessions opened here live in the relay's own
/// registry; local paths in upload/download are paths on the relay host.
pub struct NetworkedTransport {
    outbound: mpsc::UnboundedSender<ClientFrame>,
    shared: Arc<Shared>,
}

impl NetworkedTransport {
    /// Connects to `url` (e.g. `ws://127.0.0.1:3001/ws`).
    pub async fn open(url: &str) -> Result<Self> {
        let (socket, _) = connect_async(url)
            .await
            .map_err(|e| Error::Transport(format!("Relay connection to {} failed: {}", url, e)))?;
        info!("Connected to relay at {}", url);

        let (mut sink, mut stream) = socket.split();
        let (outbound, mut frames) = mpsc::unbounded_channel::<ClientFrame>();
        let shared = Arc::new(Shared::default());

        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode relay frame: {}", e);
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
        });

        let reader = Arc::clone(&shared);
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("Relay socket error: {}", e);
                        break;
                    }
                };
                match serde_json::from_str::<ServerFrame>(text.as_str()) {
                    Ok(ServerFrame::Reply { id, body }) => reader.settle(id, body),
                    Ok(ServerFrame::Event { topic, payload }) => {
                        reader.route_event(&topic, payload)
                    }
                    Err(e) => warn!("Unreadable relay frame: {}", e),
                }
            }
            info!("Relay connection closed");
            reader.shut();
        });

        Ok(Self { outbound, shared })
    }

    /// Sends one call and waits for its reply.
    async fn call<T>(&self, request: Request, events: Option<SessionEventSender>) -> Reply<T>
    where
        T: DeserializeOwned + Default + Send,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let op = request.op();
        let (reply, settled) = oneshot::channel();
        {
            let Ok(mut pending) = self.shared.pending.lock() else {
                return Reply::failed(CONNECTION_CLOSED);
            };
            if pending.closed {
                return Reply::failed(CONNECTION_CLOSED);
            }
            pending.calls.insert(id, PendingCall { reply, events });
        }

        if self.outbound.send(ClientFrame::Call { id, request }).is_err() {
            if let Ok(mut pending) = self.shared.pending.lock() {
                pending.calls.remove(&id);
            }
            return Reply::failed(CONNECTION_CLOSED);
        }
        debug!("Relay call {} ({}) sent", id, op);

        match settled.await {
            Ok(body) => serde_json::from_value(body)
                .unwrap_or_else(|e| Reply::failed(format!("Malformed {} reply: {}", op, e))),
            Err(_) => Reply::failed(CONNECTION_CLOSED),
        }
    }

    /// Registers `sink` under a fresh progress id for the duration of `run`.
    async fn with_progress<T, F, Fut>(&self, sink: Option<ProgressSender>, run: F) -> Reply<T>
    where
        F: FnOnce(Option<String>) -> Fut,
        Fut: std::future::Future<Output = Reply<T>>,
    {
        let Some(sink) = sink else {
            return run(None).await;
        };
        let progress_id = Uuid::new_v4().to_string();
        if let Ok(mut progress) = self.shared.progress.lock() {
            progress.insert(progress_id.clone(), sink);
        }
        let reply = run(Some(progress_id.clone())).await;
        if let Ok(mut progress) = self.shared.progress.lock() {
            progress.remove(&progress_id);
        }
        reply
    }

    fn send(&self, frame: ClientFrame) {
        if self.outbound.send(frame).is_err() {
            debug!("Relay connection gone; frame dropped");
        }
    }
}

#[async_trait]
impl Transport for NetworkedTransport {
    async fn connect(&self, host: HostConfig, events: SessionEventSender) -> Reply<Connected> {
        self.call(Request::Connect { host_config: host }, Some(events))
            .await
    }

    fn write(&self, connection_id: &ConnectionId, data: Vec<u8>) {
        self.send(ClientFrame::Write {
            connection_id: connection_id.clone(),
            data,
        });
    }

    fn resize(&self, connection_id: &ConnectionId, cols: u32, rows: u32) {
        self.send(ClientFrame::Resize {
            connection_id: connection_id.clone(),
            cols,
            rows,
        });
    }

    fn disconnect(&self, connection_id: &ConnectionId) {
        self.send(ClientFrame::Disconnect {
            connection_id: connection_id.clone(),
        });
    }

    async fn exec(&self, host: HostConfig, command: String) -> Reply<ExecOutput> {
        self.call(
            Request::Exec {
                host_config: host,
                command,
            },
            None,
        )
        .await
    }

    async fn test(&self, host: HostConfig) -> Reply<TestResult> {
        self.call(Request::Test { host_config: host }, None).await
    }

    async fn list(&self, host: HostConfig, path: String) -> Reply<Listing> {
        self.call(
            Request::List {
                host_config: host,
                path,
            },
            None,
        )
        .await
    }

    async fn mkdir(&self, host: HostConfig, path: String) -> Reply<Ack> {
        self.call(
            Request::Mkdir {
                host_config: host,
                path,
            },
            None,
        )
        .await
    }

    async fn delete(&self, host: HostConfig, path: String) -> Reply<Ack> {
        self.call(
            Request::Delete {
                host_config: host,
                path,
            },
            None,
        )
        .await
    }

    async fn rmdir(&self, host: HostConfig, path: String) -> Reply<Ack> {
        self.call(
            Request::Rmdir {
                host_config: host,
                path,
            },
            None,
        )
        .await
    }

    async fn rename(&self, host: HostConfig, old_path: String, new_path: String) -> Reply<Ack> {
        self.call(
            Request::Rename {
                host_config: host,
                old_path,
                new_path,
            },
            None,
        )
        .await
    }

    async fn read_file(&self, host: HostConfig, path: String) -> Reply<FileContent> {
        self.call(
            Request::ReadFile {
                host_config: host,
                path,
            },
            None,
        )
        .await
    }

    async fn write_file(&self, host: HostConfig, path: String, content: String) -> Reply<Ack> {
        self.call(
            Request::WriteFile {
                host_config: host,
                path,
                content,
            },
            None,
        )
        .await
    }

    async fn stat(&self, host: HostConfig, path: String) -> Reply<Stats> {
        self.call(
            Request::Stat {
                host_config: host,
                path,
            },
            None,
        )
        .await
    }

    async fn chmod(&self, host: HostConfig, path: String, mode: u32) -> Reply<Ack> {
        self.call(
            Request::Chmod {
                host_config: host,
                path,
                mode,
            },
            None,
        )
        .await
    }

    async fn chown(&self, host: HostConfig, path: String, uid: u32, gid: u32) -> Reply<Ack> {
        self.call(
            Request::Chown {
                host_config: host,
                path,
                uid,
                gid,
            },
            None,
        )
        .await
    }

    async fn upload(
        &self,
        host: HostConfig,
        local_path: String,
        remote_path: String,
        progress: Option<ProgressSender>,
    ) -> Reply<Uploaded> {
        self.with_progress(progress, |progress_id| {
            self.call(
                Request::Upload {
                    host_config: host,
                    local_path,
                    remote_path,
                    progress_id,
                },
                None,
            )
        })
        .await
    }

    async fn download(
        &self,
        host: HostConfig,
        remote_path: String,
        local_path: String,
        progress: Option<ProgressSender>,
    ) -> Reply<Downloaded> {
        self.with_progress(progress, |progress_id| {
            self.call(
                Request::Download {
                    host_config: host,
                    remote_path,
                    local_path,
                    progress_id,
                },
                None,
            )
        })
        .await
    }

    /// Disconnects every session this client opened. The socket itself
    /// stays up until the transport is dropped.
    async fn shutdown(&self) {
        let ids: Vec<ConnectionId> = match self.shared.sessions.lock() {
            Ok(sessions) => sessions.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        for connection_id in &ids {
            self.disconnect(connection_id);
        }
        info!("Networked transport shut down ({} sessions)", ids.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shared_with_call(
        id: u64,
        events: Option<SessionEventSender>,
    ) -> (Shared, oneshot::Receiver<serde_json::Value>) {
        let shared = Shared::default();
        let (reply, rx) = oneshot::channel();
        shared
            .pending
            .lock()
            .unwrap()
            .calls
            .insert(id, PendingCall { reply, events });
        (shared, rx)
    }

    #[tokio::test]
    async fn connect_reply_registers_sink_before_settling() {
        let (events, mut rx) = mpsc::unbounded_channel();
        let (shared, settled) = shared_with_call(1, Some(events));

        shared.settle(1, json!({"success": true, "connectionId": "c-1"}));
        shared.route_event("ssh:data:c-1", json!({"data": "aGk="}));

        assert!(settled.await.is_ok());
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::Data {
                connection_id: "c-1".into(),
                data: b"hi".to_vec(),
            })
        );
    }

    #[tokio::test]
    async fn failed_connect_registers_nothing() {
        let (events, _rx) = mpsc::unbounded_channel();
        let (shared, _settled) = shared_with_call(1, Some(events));
        shared.settle(1, json!({"success": false, "error": "Auth failed"}));
        assert!(shared.sessions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn close_event_unregisters_session() {
        let (events, mut rx) = mpsc::unbounded_channel();
        let shared = Shared::default();
        shared.sessions.lock().unwrap().insert("c-1".into(), events);

        shared.route_event("ssh:close:c-1", json!({}));
        shared.route_event("ssh:data:c-1", json!({"data": "aGk="}));

        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::Closed {
                connection_id: "c-1".into()
            })
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutting_down_fails_calls_and_closes_sessions() {
        let (events, mut rx) = mpsc::unbounded_channel();
        let (shared, settled) = shared_with_call(9, None);
        shared.sessions.lock().unwrap().insert("c-1".into(), events);

        shared.shut();

        assert!(settled.await.is_err());
        assert!(matches!(rx.recv().await, Some(SessionEvent::Error { .. })));
        assert!(matches!(rx.recv().await, Some(SessionEvent::Closed { .. })));
        assert!(shared.pending.lock().unwrap().closed);
    }

    #[tokio::test]
    async fn progress_events_reach_their_sink() {
        let (sink, mut rx) = mpsc::unbounded_channel();
        let shared = Shared::default();
        shared.progress.lock().unwrap().insert("p-1".into(), sink);

        shared.route_event(
            "sftp:progress:p-1",
            json!({
                "type": "upload",
                "filename": "a",
                "percent": 50,
                "transferred": 5,
                "total": 10,
            }),
        );
        shared.route_event(
            "sftp:progress:p-2",
            json!({
                "type": "upload",
                "filename": "b",
                "percent": 50,
                "transferred": 5,
                "total": 10,
            }),
        );

        let event = rx.recv().await.unwrap();
        assert_eq!((event.filename.as_str(), event.percent), ("a", 50));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unreachable_relay_is_a_transport_error() {
        let err = NetworkedTransport::open("ws://127.0.0.1:1/ws").await.err().unwrap();
        assert_eq!(err.kind(), esh_core::ErrorKind::Transport);
    }
}
