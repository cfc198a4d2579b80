//! Relay process driven end to end through the networked transport.

use std::sync::Arc;
use std::time::Duration;

use easyshell::{serve, RelayState, SharedRelayState};
use esh_core::{Error, SessionEvent, SshSettings, TransferSettings};
use esh_test_utils::{recv, test_host, wait_until, MockBackend, WAIT};
use esh_transport::{EmbeddedTransport, NetworkedTransport, Transport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_test::assert_ok;

struct Relay {
    addr: String,
    state: SharedRelayState,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<esh_core::Result<()>>,
}

impl Relay {
    async fn start(backend: Arc<MockBackend>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let state = RelayState::new(EmbeddedTransport::new(
            backend,
            SshSettings::default(),
            TransferSettings::default(),
        ));
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(serve(listener, Arc::clone(&state), async {
            let _ = stopped.await;
        }));
        Self {
            addr,
            state,
            stop: Some(stop),
            task,
        }
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    async fn client(&self) -> NetworkedTransport {
        NetworkedTransport::open(&self.ws_url()).await.unwrap()
    }

    async fn get_json(&self, path: &str) -> serde_json::Value {
        let mut stream = TcpStream::connect(&self.addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            path, self.addr
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.unwrap();
        let text = String::from_utf8(raw).unwrap();
        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        assert!(head.starts_with("HTTP/1.1 200"), "{}", head);
        serde_json::from_str(body).unwrap()
    }

    async fn stop(mut self) -> esh_core::Result<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        tokio::time::timeout(WAIT, self.task).await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn health_and_info() {
    let relay = Relay::start(Arc::new(MockBackend::new())).await;

    let health = relay.get_json("/health").await;
    assert_eq!(health["status"], "ok");
    assert!(health["timestamp"].as_i64().unwrap() > 0);

    let info = relay.get_json("/info").await;
    assert_eq!(info["name"], "EasyShell Relay");
    assert_eq!(info["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(info["connections"], 0);

    assert_ok!(relay.stop().await);
}

#[tokio::test]
async fn session_round_trip_over_the_relay() {
    let backend = Arc::new(MockBackend::echoing());
    let relay = Relay::start(backend.clone()).await;
    let client = relay.client().await;
    let (events, mut rx) = mpsc::unbounded_channel();

    let reply = client.connect(test_host(), events).await;
    assert!(reply.success, "{:?}", reply.error);
    let id = reply.payload.connection_id.unwrap();
    assert_eq!(relay.get_json("/info").await["connections"], 1);

    backend.last_shell().unwrap().push_output(b"Welcome\r\n\xff");
    assert_eq!(
        recv(&mut rx).await,
        Some(SessionEvent::Data {
            connection_id: id.clone(),
            data: b"Welcome\r\n\xff".to_vec(),
        })
    );

    client.write(&id, b"uptime\n".to_vec());
    assert_eq!(
        recv(&mut rx).await,
        Some(SessionEvent::Data {
            connection_id: id.clone(),
            data: b"uptime\n".to_vec(),
        })
    );
    let shell = backend.last_shell().unwrap();
    assert_eq!(shell.input(), b"uptime\n");

    client.resize(&id, 132, 50);
    assert!(wait_until(WAIT, || shell.sizes().contains(&(132, 50))).await);

    client.disconnect(&id);
    assert_eq!(
        recv(&mut rx).await,
        Some(SessionEvent::Closed { connection_id: id })
    );
    assert!(shell.is_closed());
    assert_eq!(relay.state.connections(), 0);

    drop(client);
    assert_ok!(relay.stop().await);
}

#[tokio::test]
async fn failures_come_back_as_replies() {
    let backend = Arc::new(MockBackend::new());
    backend.fail_connect(Error::Auth("All configured authentication methods failed".into()));
    let relay = Relay::start(backend).await;
    let client = relay.client().await;
    let (events, _rx) = mpsc::unbounded_channel();

    let reply = client.connect(test_host(), events).await;
    assert!(!reply.success);
    assert_eq!(
        reply.error.as_deref(),
        Some("All configured authentication methods failed")
    );
    assert!(reply.payload.connection_id.is_none());

    let listing = client.list(test_host(), "/".into()).await;
    assert!(!listing.success);
    assert!(listing.payload.files.is_empty());

    drop(client);
    assert_ok!(relay.stop().await);
}

#[tokio::test]
async fn file_operations_over_the_relay() {
    let backend = Arc::new(MockBackend::new());
    backend.fs().add_file("/a.txt", 0o644, b"0123456789".to_vec());
    backend.fs().add_dir("/sub", 0o755);
    let relay = Relay::start(backend.clone()).await;
    let client = relay.client().await;
    let host = test_host();

    let listing = client.list(host.clone(), "/".into()).await;
    assert!(listing.success);
    let mut names: Vec<_> = listing.payload.files.iter().map(|f| f.filename.clone()).collect();
    names.sort();
    assert_eq!(names, ["a.txt", "sub"]);

    assert!(client.chmod(host.clone(), "/a.txt".into(), 0o755).await.success);
    let stats = client.stat(host.clone(), "/a.txt".into()).await;
    assert_eq!(stats.payload.stats.mode & 0o777, 0o755);

    let written = client
        .write_file(host.clone(), "/notes.txt".into(), "ünïcode".into())
        .await;
    assert!(written.success);
    let read = client.read_file(host.clone(), "/notes.txt".into()).await;
    assert_eq!(read.payload.content, "ünïcode");

    let renamed = client
        .rename(host.clone(), "/notes.txt".into(), "/sub/notes.txt".into())
        .await;
    assert!(renamed.success);
    assert!(client.rmdir(host.clone(), "/sub".into()).await.success);
    assert!(!backend.fs().exists("/sub"));

    let exec = client.exec(host.clone(), "whoami".into()).await;
    assert!(exec.success);
    assert_eq!(exec.payload.code, 127);
    assert_eq!(client.test(host).await.payload.message, "Connection succeeded");

    drop(client);
    assert_ok!(relay.stop().await);
}

#[tokio::test]
async fn upload_progress_arrives_before_the_reply() {
    let backend = Arc::new(MockBackend::new());
    let relay = Relay::start(backend.clone()).await;
    let client = relay.client().await;

    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("payload.bin");
    let total = 1024 * 1024 + 17;
    std::fs::write(&local, vec![9u8; total]).unwrap();

    let (sink, mut progress) = mpsc::unbounded_channel();
    let reply = client
        .upload(
            test_host(),
            local.to_string_lossy().into_owned(),
            "/payload.bin".into(),
            Some(sink),
        )
        .await;
    assert!(reply.success, "{:?}", reply.error);
    assert_eq!(reply.payload.remote_path, "/payload.bin");

    let mut events = Vec::new();
    while let Ok(event) = progress.try_recv() {
        events.push(event);
    }
    assert_eq!(events.len(), 17);
    assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));
    let last = events.last().unwrap();
    assert_eq!((last.transferred, last.total), (total as u64, total as u64));
    assert_eq!(backend.fs().contents("/payload.bin").unwrap().len(), total);

    drop(client);
    assert_ok!(relay.stop().await);
}

#[tokio::test]
async fn closing_the_socket_ends_its_sessions() {
    let backend = Arc::new(MockBackend::new());
    let relay = Relay::start(backend.clone()).await;
    let client = relay.client().await;
    let (events, _rx) = mpsc::unbounded_channel();

    assert!(client.connect(test_host(), events.clone()).await.success);
    assert!(client.connect(test_host(), events).await.success);
    assert_eq!(relay.state.connections(), 2);

    drop(client);
    let shells = backend.shells();
    assert!(wait_until(WAIT, || shells.iter().all(|s| s.is_closed())).await);
    assert!(wait_until(WAIT, || relay.state.connections() == 0).await);

    assert_ok!(relay.stop().await);
}

#[tokio::test]
async fn connect_finishing_after_the_socket_closed_is_undone() {
    let backend = Arc::new(MockBackend::echoing());
    backend.delay_connect(Duration::from_millis(400));
    let relay = Relay::start(backend.clone()).await;
    let client = relay.client().await;

    let pending = tokio::spawn(async move {
        let (events, _rx) = mpsc::unbounded_channel();
        client.connect(test_host(), events).await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    pending.abort();
    assert!(pending.await.unwrap_err().is_cancelled());

    assert!(wait_until(WAIT, || backend.shells_opened() == 1).await);
    let shell = backend.last_shell().unwrap();
    assert!(wait_until(WAIT, || shell.is_closed()).await);
    assert!(wait_until(WAIT, || relay.state.connections() == 0).await);
    assert_eq!(backend.connect_attempts(), 1);

    assert_ok!(relay.stop().await);
}

#[tokio::test]
async fn relay_shutdown_closes_sessions_and_clients() {
    let backend = Arc::new(MockBackend::new());
    let relay = Relay::start(backend.clone()).await;
    let client = relay.client().await;
    let (events, mut rx) = mpsc::unbounded_channel();

    let id = client
        .connect(test_host(), events)
        .await
        .payload
        .connection_id
        .unwrap();

    assert_ok!(relay.stop().await);
    let shell = backend.last_shell().unwrap();
    assert!(wait_until(WAIT, || shell.is_closed()).await);

    // The relay flushes the session's own close before dropping the socket,
    // so the client never has to synthesize a connection-lost error.
    let mut closes = 0;
    while let Some(event) = recv(&mut rx).await {
        match event {
            SessionEvent::Closed { connection_id } => {
                assert_eq!(connection_id, id);
                closes += 1;
            }
            SessionEvent::Error { message, .. } => panic!("unexpected error: {}", message),
            SessionEvent::Data { .. } => {}
        }
    }
    assert_eq!(closes, 1);

    let late = client.list(test_host(), "/".into()).await;
    assert!(!late.success);
}
