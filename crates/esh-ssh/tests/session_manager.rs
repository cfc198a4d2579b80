use std::sync::Arc;
use std::time::{Duration, Instant};

use esh_core::{Error, ErrorKind, HostConfig, RetryPolicy, SessionEvent, SshSettings};
use esh_ssh::{SessionManager, SessionState};
use esh_test_utils::{recv, test_host, wait_until, MockBackend, WAIT};
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

fn manager(backend: &Arc<MockBackend>) -> SessionManager {
    SessionManager::new(backend.clone(), SshSettings::default())
}

fn manager_with(backend: &Arc<MockBackend>, settings: SshSettings) -> SessionManager {
    SessionManager::new(backend.clone(), settings)
}

#[tokio::test]
async fn connect_registers_session_and_forwards_writes_in_order() {
    let backend = Arc::new(MockBackend::new());
    let sessions = manager(&backend);
    let (tx, _rx) = mpsc::unbounded_channel();

    let cap = assert_ok!(sessions.connect(test_host(), tx).await);
    assert_eq!(sessions.session_count(), 1);

    for chunk in ["ls", " -la", "\r", "exit", "\r"] {
        sessions.write(cap.connection_id(), chunk);
    }

    let shell = backend.last_shell().unwrap();
    assert!(wait_until(WAIT, || shell.input() == b"ls -la\rexit\r").await);
}

#[tokio::test]
async fn capability_writes_and_resizes() {
    let backend = Arc::new(MockBackend::new());
    let sessions = manager(&backend);
    let (tx, _rx) = mpsc::unbounded_channel();

    let cap = sessions.connect(test_host(), tx).await.unwrap();
    cap.write(b"whoami\n".to_vec());
    cap.resize(120, 40);
    cap.resize(100, 30);

    let shell = backend.last_shell().unwrap();
    assert!(wait_until(WAIT, || shell.sizes().len() == 2).await);
    assert_eq!(shell.sizes(), vec![(120, 40), (100, 30)]);
    assert_eq!(shell.input(), b"whoami\n");
}

#[tokio::test]
async fn pty_uses_configured_terminal() {
    let backend = Arc::new(MockBackend::new());
    let sessions = manager(&backend);
    let (tx, _rx) = mpsc::unbounded_channel();

    sessions.connect(test_host(), tx).await.unwrap();

    let options = backend.last_shell_options().unwrap();
    assert_eq!(options.terminal_type, "xterm-256color");
    assert_eq!((options.cols, options.rows), (80, 24));
    assert_eq!(options.connect.ready_timeout, Duration::from_secs(20));
    assert_eq!(options.connect.keepalive_interval, Duration::from_secs(10));
}

#[tokio::test]
async fn remote_output_arrives_in_order() {
    let backend = Arc::new(MockBackend::new());
    let sessions = manager(&backend);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let cap = sessions.connect(test_host(), tx).await.unwrap();
    let shell = backend.last_shell().unwrap();
    shell.push_output("Welcome\r\n");
    shell.push_output("$ ");

    let mut received = Vec::new();
    while received != b"Welcome\r\n$ " {
        match recv(&mut rx).await {
            Some(SessionEvent::Data {
                connection_id,
                data,
            }) => {
                assert_eq!(&connection_id, cap.connection_id());
                received.extend(data);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}

#[tokio::test]
async fn writes_after_disconnect_are_ignored() {
    let backend = Arc::new(MockBackend::new());
    let sessions = manager(&backend);
    let (tx, _rx) = mpsc::unbounded_channel();

    let cap = sessions.connect(test_host(), tx).await.unwrap();
    let id = cap.connection_id().clone();
    sessions.write(&id, "before");
    sessions.disconnect(&id);
    sessions.write(&id, "after");
    sessions.resize(&id, 10, 10);

    let shell = backend.last_shell().unwrap();
    assert!(wait_until(WAIT, || shell.is_closed()).await);
    assert_eq!(shell.input(), b"before");
    assert!(shell.sizes().is_empty());
    assert_eq!(sessions.session_count(), 0);
}

#[tokio::test]
async fn disconnect_twice_is_a_noop() {
    let backend = Arc::new(MockBackend::new());
    let sessions = manager(&backend);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let cap = sessions.connect(test_host(), tx).await.unwrap();
    let id = cap.connection_id().clone();

    assert!(sessions.disconnect_and_wait(&id).await);
    assert!(!sessions.disconnect_and_wait(&id).await);
    sessions.disconnect(&id);

    // Exactly one close event.
    assert_eq!(
        recv(&mut rx).await,
        Some(SessionEvent::Closed {
            connection_id: id.clone()
        })
    );
    assert!(tokio::time::timeout(Duration::from_millis(100), rx.recv())
        .await
        .map(|e| e.is_none())
        .unwrap_or(true));
}

#[tokio::test]
async fn unknown_handles_are_ignored() {
    let backend = Arc::new(MockBackend::new());
    let sessions = manager(&backend);
    let ghost = "not-a-session".into();

    sessions.write(&ghost, "data");
    sessions.resize(&ghost, 80, 24);
    sessions.disconnect(&ghost);
    assert!(!sessions.disconnect_and_wait(&ghost).await);
}

#[tokio::test]
async fn remote_hang_up_closes_and_unregisters() {
    let backend = Arc::new(MockBackend::new());
    let sessions = manager(&backend);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let cap = sessions.connect(test_host(), tx).await.unwrap();
    let shell = backend.last_shell().unwrap();
    shell.push_output("logout\r\n");
    shell.hang_up();

    assert!(matches!(recv(&mut rx).await, Some(SessionEvent::Data { .. })));
    assert_eq!(
        recv(&mut rx).await,
        Some(SessionEvent::Closed {
            connection_id: cap.connection_id().clone()
        })
    );
    assert!(wait_until(WAIT, || sessions.session_count() == 0).await);
    assert_eq!(shell.close_calls(), 1);
}

#[tokio::test]
async fn channel_error_is_reported_then_closed() {
    let backend = Arc::new(MockBackend::new());
    let sessions = manager(&backend);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let cap = sessions.connect(test_host(), tx).await.unwrap();
    backend.last_shell().unwrap().fail_read("Connection reset by peer");

    match recv(&mut rx).await {
        Some(SessionEvent::Error { message, .. }) => {
            assert_eq!(message, "Connection reset by peer")
        }
        other => panic!("expected error event, got {:?}", other),
    }
    assert_eq!(
        recv(&mut rx).await,
        Some(SessionEvent::Closed {
            connection_id: cap.connection_id().clone()
        })
    );
    assert!(wait_until(WAIT, || sessions.session_count() == 0).await);
}

#[tokio::test]
async fn missing_credentials_fail_before_network() {
    let backend = Arc::new(MockBackend::new());
    let sessions = manager(&backend);
    let (tx, _rx) = mpsc::unbounded_channel();

    let host = HostConfig::new("example.org", 22, "root");
    let err = assert_err!(sessions.connect(host, tx).await);
    assert_eq!(err.kind(), ErrorKind::Config);
    assert_eq!(backend.connect_attempts(), 0);
    assert_eq!(sessions.session_count(), 0);
}

#[tokio::test]
async fn failed_connect_never_populates_registry() {
    let backend = Arc::new(MockBackend::new());
    backend.fail_connect(Error::Auth(
        "All configured authentication methods failed".into(),
    ));
    let sessions = manager(&backend);
    let (tx, _rx) = mpsc::unbounded_channel();

    let err = sessions.connect(test_host(), tx).await.unwrap_err();
    assert_eq!(err.to_string(), "All configured authentication methods failed");
    assert_eq!(SessionState::for_failure(&err), SessionState::AuthFailed);
    assert!(sessions.sessions().await.is_empty());
}

#[tokio::test]
async fn hung_connect_times_out() {
    let backend = Arc::new(MockBackend::new());
    backend.delay_connect(Duration::from_millis(800));
    let settings = SshSettings {
        ready_timeout_ms: 100,
        ..SshSettings::default()
    };
    let sessions = manager_with(&backend, settings);
    let (tx, _rx) = mpsc::unbounded_channel();

    let started = Instant::now();
    let err = sessions.connect(test_host(), tx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(started.elapsed() < Duration::from_millis(700));
    assert_eq!(sessions.session_count(), 0);

    // The late shell is closed instead of leaking.
    assert!(
        wait_until(WAIT, || backend
            .last_shell()
            .map(|s| s.is_closed())
            .unwrap_or(false))
        .await
    );
}

#[tokio::test]
async fn retry_policy_retries_transport_errors_only() {
    let backend = Arc::new(MockBackend::new());
    backend.fail_next_connect(Error::Transport("connect ECONNREFUSED".into()));
    let settings = SshSettings {
        retry: RetryPolicy {
            attempts: 3,
            backoff_ms: 10,
        },
        ..SshSettings::default()
    };
    let sessions = manager_with(&backend, settings.clone());
    let (tx, _rx) = mpsc::unbounded_channel();

    assert_ok!(sessions.connect(test_host(), tx.clone()).await);
    assert_eq!(backend.connect_attempts(), 2);

    let backend = Arc::new(MockBackend::new());
    backend.fail_connect(Error::Auth("denied".into()));
    let sessions = manager_with(&backend, settings);
    assert_err!(sessions.connect(test_host(), tx).await);
    assert_eq!(backend.connect_attempts(), 1);
}

#[tokio::test]
async fn no_retry_by_default() {
    let backend = Arc::new(MockBackend::new());
    backend.fail_next_connect(Error::Transport("connect ECONNREFUSED".into()));
    let sessions = manager(&backend);
    let (tx, _rx) = mpsc::unbounded_channel();

    assert_err!(sessions.connect(test_host(), tx).await);
    assert_eq!(backend.connect_attempts(), 1);
}

#[tokio::test]
async fn handles_are_unique_and_sessions_independent() {
    let backend = Arc::new(MockBackend::new());
    let sessions = manager(&backend);
    let (tx, _rx) = mpsc::unbounded_channel();

    let a = sessions.connect(test_host(), tx.clone()).await.unwrap();
    let b = sessions.connect(test_host(), tx).await.unwrap();
    assert_ne!(a.connection_id(), b.connection_id());

    a.write("to-a");
    b.write("to-b");
    let shells = backend.shells();
    assert!(
        wait_until(WAIT, || shells[0].input() == b"to-a" && shells[1].input() == b"to-b").await
    );

    let listed = sessions.sessions().await;
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|s| s.state == SessionState::Ready));
}

#[tokio::test]
async fn disconnect_all_closes_everything() {
    let backend = Arc::new(MockBackend::new());
    let sessions = manager(&backend);
    let (tx, _rx) = mpsc::unbounded_channel();

    for _ in 0..3 {
        sessions.connect(test_host(), tx.clone()).await.unwrap();
    }
    assert_eq!(sessions.disconnect_all().await, 3);
    assert_eq!(sessions.session_count(), 0);

    let shells = backend.shells();
    assert!(wait_until(WAIT, || shells.iter().all(|s| s.is_closed())).await);
    assert_eq!(sessions.disconnect_all().await, 0);
}

#[tokio::test]
async fn exec_and_test_use_their_own_connection() {
    let backend = Arc::new(MockBackend::new());
    backend.set_exec_output(
        "uname -a",
        esh_core::ExecOutput {
            code: 0,
            stdout: "Linux box\n".into(),
            stderr: String::new(),
        },
    );
    let sessions = manager(&backend);

    let out = sessions
        .exec(test_host(), "uname -a".into())
        .await
        .unwrap();
    assert_eq!(out.stdout, "Linux box\n");

    let missing = sessions.exec(test_host(), "nope".into()).await.unwrap();
    assert_eq!(missing.code, 127);

    assert_eq!(
        sessions.test(test_host()).await.unwrap(),
        "Connection succeeded"
    );
    assert_eq!(backend.exec_calls(), 3);
    assert_eq!(backend.shells_opened(), 0);
    assert_eq!(sessions.session_count(), 0);
}

#[tokio::test]
async fn test_reports_auth_failure() {
    let backend = Arc::new(MockBackend::new());
    backend.fail_connect(Error::Auth("denied".into()));
    let sessions = manager(&backend);

    let err = sessions.test(test_host()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Auth);
}
