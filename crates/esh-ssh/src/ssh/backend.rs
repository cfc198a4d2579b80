// ── Protocol capability seam ──────────────────────────────────────────────────
//
// The SSH wire protocol is consumed, never implemented here. Everything
// above this module talks to a remote host through these three traits, so
// the connector, pump and transfer logic run unchanged against the real
// libssh2 backend or an in-memory fake.

use esh_core::{ExecOutput, HostConfig, Result, SshSettings};
use std::io::{self, Read, Write};
use std::time::Duration;

/// Parameters shared by every connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub ready_timeout: Duration,
    pub keepalive_interval: Duration,
}

impl From<&SshSettings> for ConnectOptions {
    fn from(settings: &SshSettings) -> Self {
        Self {
            ready_timeout: settings.ready_timeout(),
            keepalive_interval: settings.keepalive_interval(),
        }
    }
}

/// Parameters for an interactive shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOptions {
    pub connect: ConnectOptions,
    pub terminal_type: String,
    pub cols: u32,
    pub rows: u32,
}

impl From<&SshSettings> for ShellOptions {
    fn from(settings: &SshSettings) -> Self {
        Self {
            connect: ConnectOptions::from(settings),
            terminal_type: settings.terminal_type.clone(),
            cols: settings.cols,
            rows: settings.rows,
        }
    }
}

/// Raw attributes as returned by the SFTP server. Every field is optional
/// on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteStat {
    pub size: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// Full `st_mode`: file type bits plus permissions.
    pub perm: Option<u32>,
    pub atime: Option<u64>,
    pub mtime: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDirEntry {
    /// Bare name, without the directory prefix.
    pub filename: String,
    pub stat: RemoteStat,
}

/// Opens connections. Every method blocks and is driven from tokio's
/// blocking pool or a dedicated thread.
pub trait SshBackend: Send + Sync + 'static {
    /// Connect, authenticate, request a PTY and start an interactive shell.
    fn open_shell(
        &self,
        host: &HostConfig,
        options: &ShellOptions,
    ) -> Result<Box<dyn ShellChannel>>;

    /// Connect, authenticate and start the `sftp` subsystem.
    fn open_sftp(&self, host: &HostConfig, options: &ConnectOptions) -> Result<Box<dyn RemoteFs>>;

    /// Run one command on a short-lived connection and collect its output.
    fn exec(
        &self,
        host: &HostConfig,
        command: &str,
        options: &ConnectOptions,
    ) -> Result<ExecOutput>;
}

/// An open interactive channel, owned by exactly one pump thread.
pub trait ShellChannel: Send {
    /// Non-blocking read of stdout and stderr merged. `Ok(0)` means no data
    /// right now; use [`ShellChannel::is_eof`] to detect the end.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes all of `data` before returning.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Window-change request.
    fn resize(&mut self, cols: u32, rows: u32) -> io::Result<()>;

    /// Called periodically by the pump so the backend can send keepalives.
    fn keepalive(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn is_eof(&self) -> bool;

    /// Ends the channel and its connection. Must be safe to call twice.
    fn close(&mut self);
}

/// One SFTP subsystem channel.
pub trait RemoteFs: Send {
    fn read_dir(&mut self, path: &str) -> Result<Vec<RemoteDirEntry>>;
    fn stat(&mut self, path: &str) -> Result<RemoteStat>;
    /// Applies only the `Some` fields of `stat`.
    fn set_stat(&mut self, path: &str, stat: RemoteStat) -> Result<()>;
    fn mkdir(&mut self, path: &str, mode: u32) -> Result<()>;
    fn unlink(&mut self, path: &str) -> Result<()>;
    fn rmdir(&mut self, path: &str) -> Result<()>;
    fn rename(&mut self, from: &str, to: &str) -> Result<()>;
    fn open_read(&mut self, path: &str) -> Result<Box<dyn Read + Send>>;
    /// Create or truncate.
    fn open_write(&mut self, path: &str) -> Result<Box<dyn Write + Send>>;
    /// Ends the subsystem channel and its connection. Must be safe to call twice.
    fn close(&mut self);
}
