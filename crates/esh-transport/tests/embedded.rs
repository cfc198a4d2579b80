//! Embedded transport over the fake host: reply envelopes and session events.

use std::sync::Arc;

use esh_core::{ExecOutput, HostConfig, SessionEvent, SshSettings, TransferSettings};
use esh_test_utils::{recv, test_host, wait_until, MockBackend, WAIT};
use esh_transport::{connect_host, exec_host, EmbeddedTransport, InMemoryHostStore, Transport};
use tokio::sync::mpsc;

fn transport(backend: &Arc<MockBackend>) -> EmbeddedTransport {
    EmbeddedTransport::new(
        backend.clone(),
        SshSettings::default(),
        TransferSettings::default(),
    )
}

#[tokio::test]
async fn connect_write_and_disconnect() {
    let backend = Arc::new(MockBackend::echoing());
    let transport = transport(&backend);
    let (events, mut rx) = mpsc::unbounded_channel();

    let reply = transport.connect(test_host(), events).await;
    assert!(reply.success, "{:?}", reply.error);
    let id = reply.payload.connection_id.unwrap();

    transport.write(&id, b"ls\n".to_vec());
    match recv(&mut rx).await {
        Some(SessionEvent::Data { connection_id, data }) => {
            assert_eq!(connection_id, id);
            assert_eq!(data, b"ls\n");
        }
        other => panic!("expected data, got {:?}", other),
    }

    transport.resize(&id, 120, 40);
    let shell = backend.last_shell().unwrap();
    assert!(wait_until(WAIT, || shell.sizes().contains(&(120, 40))).await);

    transport.disconnect(&id);
    assert_eq!(
        recv(&mut rx).await,
        Some(SessionEvent::Closed { connection_id: id.clone() })
    );
    assert_eq!(transport.sessions().session_count(), 0);

    // Unknown handle now: both are silent no-ops.
    transport.write(&id, b"late".to_vec());
    transport.disconnect(&id);
}

#[tokio::test]
async fn connect_failure_is_a_failed_reply() {
    let backend = Arc::new(MockBackend::new());
    let transport = transport(&backend);
    let (events, _rx) = mpsc::unbounded_channel();

    let reply = transport
        .connect(HostConfig::new("", 22, "tester").with_password("x"), events)
        .await;
    assert!(!reply.success);
    assert_eq!(reply.error.as_deref(), Some("Host is required"));
    assert!(reply.payload.connection_id.is_none());

    let json = serde_json::to_value(&reply).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "Host is required");
}

#[tokio::test]
async fn exec_and_test_replies() {
    let backend = Arc::new(MockBackend::new());
    backend.set_exec_output(
        "uname",
        ExecOutput {
            code: 0,
            stdout: "Linux\n".into(),
            stderr: String::new(),
        },
    );
    let transport = transport(&backend);

    let reply = transport.exec(test_host(), "uname".into()).await;
    assert!(reply.success);
    let json = serde_json::to_value(&reply).unwrap();
    assert_eq!(json["code"], 0);
    assert_eq!(json["stdout"], "Linux\n");

    let reply = transport.test(test_host()).await;
    assert!(reply.success);
    assert_eq!(reply.payload.message, "Connection succeeded");
}

#[tokio::test]
async fn file_operations_settle_into_replies() {
    let backend = Arc::new(MockBackend::new());
    backend.fs().add_file("/a.txt", 0o644, b"0123456789".to_vec());
    backend.fs().add_dir("/sub", 0o755);
    let transport = transport(&backend);
    let host = test_host();

    let listing = transport.list(host.clone(), "/".into()).await;
    assert!(listing.success);
    assert_eq!(listing.payload.files.len(), 2);
    let json = serde_json::to_value(&listing).unwrap();
    assert!(json["files"].is_array());

    assert!(transport.chmod(host.clone(), "/a.txt".into(), 0o600).await.success);
    let stats = transport.stat(host.clone(), "/a.txt".into()).await;
    assert_eq!(stats.payload.stats.mode & 0o777, 0o600);

    assert!(transport.write_file(host.clone(), "/b.txt".into(), "hello".into()).await.success);
    let content = transport.read_file(host.clone(), "/b.txt".into()).await;
    assert_eq!(content.payload.content, "hello");

    let missing = transport.delete(host.clone(), "/nope".into()).await;
    assert!(!missing.success);
    assert_eq!(missing.error.as_deref(), Some("No such file"));
    assert_eq!(
        serde_json::to_value(&missing).unwrap(),
        serde_json::json!({"success": false, "error": "No such file"})
    );
}

#[tokio::test]
async fn shutdown_closes_every_session() {
    let backend = Arc::new(MockBackend::new());
    let transport = transport(&backend);
    let (events, mut rx) = mpsc::unbounded_channel();

    for _ in 0..3 {
        assert!(transport.connect(test_host(), events.clone()).await.success);
    }
    transport.shutdown().await;

    let mut closed = 0;
    while closed < 3 {
        match recv(&mut rx).await {
            Some(SessionEvent::Closed { .. }) => closed += 1,
            Some(_) => {}
            None => panic!("only {} sessions closed", closed),
        }
    }
    assert_eq!(transport.sessions().session_count(), 0);
}

#[tokio::test]
async fn host_store_resolves_credentials() {
    let backend = Arc::new(MockBackend::new());
    let transport = transport(&backend);
    let store = InMemoryHostStore::new();
    store.insert("box", test_host());

    let (events, _rx) = mpsc::unbounded_channel();
    assert!(connect_host(&store, &transport, "box", events.clone()).await.success);

    let missing = connect_host(&store, &transport, "nowhere", events).await;
    assert!(!missing.success);
    assert_eq!(missing.error.as_deref(), Some("Host nowhere not found"));

    let reply = exec_host(&store, &transport, "box", "true".into()).await;
    assert!(reply.success);
    assert_eq!(reply.payload.code, 127);
    assert_eq!(backend.connect_attempts(), 2);
}
