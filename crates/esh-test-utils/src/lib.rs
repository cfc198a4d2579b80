//! esh-test-utils: test infrastructure for EasyShell.
//!
//! Provides:
//! - MockBackend: fake SSH host implementing the backend seam
//! - FakeFs: in-memory remote filesystem with failure injection
//! - FakeShell: scriptable interactive channel
//! - helpers for awaiting events in async tests

mod fake_fs;
mod fake_shell;
mod mock_backend;

pub use fake_fs::{
    FakeFs, FakeFsChannel, FakeNode, FsCall, FsOp, NodeKind, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG,
};
pub use fake_shell::{fake_shell_pair, FakeShell, FakeShellRemote};
pub use mock_backend::MockBackend;

use std::time::Duration;

use esh_core::HostConfig;
use tokio::sync::mpsc;

/// Default wait used by the helpers below.
pub const WAIT: Duration = Duration::from_secs(5);

/// Password-authenticated config for the fake host.
pub fn test_host() -> HostConfig {
    HostConfig::new("mock.local", 22, "tester").with_password("secret")
}

/// Polls `condition` every 5 ms until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Next message, or `None` after [`WAIT`].
pub async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Option<T> {
    tokio::time::timeout(WAIT, rx.recv()).await.ok().flatten()
}
