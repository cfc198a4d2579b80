// ── libssh2 backend ───────────────────────────────────────────────────────────

use crate::ssh::backend::{
    ConnectOptions, RemoteDirEntry, RemoteFs, RemoteStat, ShellChannel, ShellOptions, SshBackend,
};
use esh_core::{Error, ExecOutput, HostConfig, Result};
use ssh2::{Channel, ErrorCode, FileStat, KeyboardInteractivePrompt, Prompt, Session, Sftp};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
const CLOSE_TIMEOUT_MS: u32 = 2_000;
const WOULD_BLOCK_RETRY: Duration = Duration::from_millis(1);
const MAX_RESIZE_RETRIES: u32 = 50;

/// Production backend on top of the `ssh2` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ssh2Backend;

impl Ssh2Backend {
    pub fn new() -> Self {
        Self
    }
}

impl SshBackend for Ssh2Backend {
    fn open_shell(
        &self,
        host: &HostConfig,
        options: &ShellOptions,
    ) -> Result<Box<dyn ShellChannel>> {
        let session = establish(host, &options.connect)?;

        let mut channel = session
            .channel_session()
            .map_err(|e| protocol_error("Failed to open session channel", e))?;
        channel
            .request_pty(
                &options.terminal_type,
                None,
                Some((options.cols, options.rows, 0, 0)),
            )
            .map_err(|e| protocol_error("Failed to request PTY", e))?;
        channel
            .shell()
            .map_err(|e| protocol_error("Failed to start shell", e))?;

        session.set_blocking(false);
        info!(endpoint = %host.endpoint(), "SSH shell opened");

        Ok(Box::new(Ssh2Shell {
            session,
            channel,
            closed: false,
        }))
    }

    fn open_sftp(&self, host: &HostConfig, options: &ConnectOptions) -> Result<Box<dyn RemoteFs>> {
        let session = establish(host, options)?;
        // Transfers have no built-in timeout once connected.
        session.set_timeout(0);
        let sftp = session
            .sftp()
            .map_err(|e| protocol_error("SFTP subsystem refused", e))?;
        debug!(endpoint = %host.endpoint(), "SFTP channel opened");
        Ok(Box::new(Ssh2Fs {
            session: Some(session),
            sftp: Some(sftp),
        }))
    }

    fn exec(
        &self,
        host: &HostConfig,
        command: &str,
        options: &ConnectOptions,
    ) -> Result<ExecOutput> {
        let session = establish(host, options)?;
        session.set_timeout(0);

        let result = run_command(&session, command);
        let _ = session.disconnect(None, "Command finished", None);
        result
    }
}

// ── Connect & authenticate ───────────────────────────────────────────────────

fn resolve(host: &HostConfig) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = (host.host.as_str(), host.port)
        .to_socket_addrs()
        .map_err(|e| Error::Transport(format!("Cannot resolve host '{}': {}", host.host, e)))?
        .collect();
    if addrs.is_empty() {
        return Err(Error::Transport(format!(
            "Cannot resolve host '{}': no addresses",
            host.host
        )));
    }
    Ok(addrs)
}

fn connect_tcp(host: &HostConfig, timeout: Duration) -> Result<TcpStream> {
    let mut last_error = None;
    for addr in resolve(host)? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) if e.kind() == ErrorKind::TimedOut => {
                last_error = Some(Error::Timeout(format!(
                    "Timed out while connecting to {}",
                    addr
                )));
            }
            Err(e) => {
                last_error = Some(Error::Transport(format!(
                    "connect to {} failed: {}",
                    addr, e
                )));
            }
        }
    }
    Err(last_error.unwrap_or_else(|| Error::Transport(format!("Cannot reach {}", host.endpoint()))))
}

/// TCP connect, handshake and authentication, all bounded by the
/// ready-timeout. Keepalive is armed before returning.
fn establish(host: &HostConfig, options: &ConnectOptions) -> Result<Session> {
    host.validate()?;

    let tcp = connect_tcp(host, options.ready_timeout)?;
    let _ = tcp.set_nodelay(true);

    let mut session =
        Session::new().map_err(|e| Error::Transport(format!("Failed to create session: {}", e)))?;
    session.set_timeout(options.ready_timeout.as_millis().min(u32::MAX as u128) as u32);
    session.set_tcp_stream(tcp);
    session.handshake().map_err(|e| {
        if is_timeout(&e) {
            Error::Timeout("Timed out while waiting for handshake".into())
        } else {
            Error::Transport(format!("Handshake failed: {}", e.message()))
        }
    })?;

    authenticate(&session, host)?;

    session.set_keepalive(true, options.keepalive_interval.as_secs() as u32);
    debug!(endpoint = %host.endpoint(), user = %host.username, "SSH authenticated");
    Ok(session)
}

struct PasswordPrompt<'a> {
    password: &'a str,
}

impl KeyboardInteractivePrompt for PasswordPrompt<'_> {
    fn prompt<'b>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[Prompt<'b>],
    ) -> Vec<String> {
        prompts.iter().map(|_| self.password.to_string()).collect()
    }
}

/// Private key first, then password, then keyboard-interactive answered
/// with the password.
fn authenticate(session: &Session, host: &HostConfig) -> Result<()> {
    let mut last_error: Option<ssh2::Error> = None;

    if let Some(key) = host.private_key() {
        match session.userauth_pubkey_memory(&host.username, None, key, host.passphrase()) {
            Ok(()) if session.authenticated() => return Ok(()),
            Ok(()) => {}
            Err(e) if is_timeout(&e) => {
                return Err(Error::Timeout("Timed out while authenticating".into()))
            }
            Err(e) => {
                debug!("publickey auth rejected: {}", e.message());
                last_error = Some(e);
            }
        }
    }

    if let Some(password) = host.password() {
        match session.userauth_password(&host.username, password) {
            Ok(()) if session.authenticated() => return Ok(()),
            Ok(()) => {}
            Err(e) if is_timeout(&e) => {
                return Err(Error::Timeout("Timed out while authenticating".into()))
            }
            Err(e) => {
                debug!("password auth rejected: {}", e.message());
                last_error = Some(e);
            }
        }

        let mut prompt = PasswordPrompt { password };
        if session
            .userauth_keyboard_interactive(&host.username, &mut prompt)
            .is_ok()
            && session.authenticated()
        {
            return Ok(());
        }
    }

    warn!(endpoint = %host.endpoint(), user = %host.username, "SSH authentication failed");
    Err(Error::Auth(match last_error {
        Some(e) => format!(
            "All configured authentication methods failed: {}",
            e.message()
        ),
        None => "All configured authentication methods failed".into(),
    }))
}

fn is_timeout(e: &ssh2::Error) -> bool {
    matches!(e.code(), ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT))
}

fn protocol_error(context: &str, e: ssh2::Error) -> Error {
    Error::Protocol(format!("{}: {}", context, e.message()))
}

fn remote_error(e: ssh2::Error) -> Error {
    Error::Operation(e.message().to_string())
}

// ── Exec ─────────────────────────────────────────────────────────────────────

fn run_command(session: &Session, command: &str) -> Result<ExecOutput> {
    let mut channel = session
        .channel_session()
        .map_err(|e| protocol_error("Failed to open exec channel", e))?;
    channel
        .exec(command)
        .map_err(|e| protocol_error("Failed to execute command", e))?;

    let mut stdout = Vec::new();
    channel
        .read_to_end(&mut stdout)
        .map_err(|e| Error::Operation(format!("Failed to read stdout: {}", e)))?;
    let mut stderr = Vec::new();
    channel
        .stderr()
        .read_to_end(&mut stderr)
        .map_err(|e| Error::Operation(format!("Failed to read stderr: {}", e)))?;

    channel.wait_close().map_err(remote_error)?;
    let code = channel.exit_status().map_err(remote_error)?;

    Ok(ExecOutput {
        code,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

// ── Interactive shell ────────────────────────────────────────────────────────

struct Ssh2Shell {
    session: Session,
    channel: Channel,
    closed: bool,
}

impl ShellChannel for Ssh2Shell {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.channel.read(buf) {
            Ok(n) if n > 0 => return Ok(n),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }
        match self.channel.stderr().read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    // The session is non-blocking, so partial writes and EAGAIN are retried
    // here instead of surfacing as errors.
    fn write_all(&mut self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            match self.channel.write(data) {
                Ok(0) => return Err(io::Error::new(ErrorKind::WriteZero, "channel closed")),
                Ok(n) => data = &data[n..],
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(WOULD_BLOCK_RETRY)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn resize(&mut self, cols: u32, rows: u32) -> io::Result<()> {
        for _ in 0..MAX_RESIZE_RETRIES {
            match self.channel.request_pty_size(cols, rows, None, None) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let e = io::Error::from(e);
                    if e.kind() != ErrorKind::WouldBlock {
                        return Err(e);
                    }
                    std::thread::sleep(WOULD_BLOCK_RETRY);
                }
            }
        }
        Err(io::Error::new(ErrorKind::WouldBlock, "window-change request kept blocking"))
    }

    fn keepalive(&mut self) -> io::Result<()> {
        match self.session.keepalive_send() {
            Ok(_) => Ok(()),
            Err(e) => {
                let e = io::Error::from(e);
                if e.kind() == ErrorKind::WouldBlock {
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    fn is_eof(&self) -> bool {
        self.channel.eof()
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.session.set_blocking(true);
        self.session.set_timeout(CLOSE_TIMEOUT_MS);
        let _ = self.channel.close();
        let _ = self.session.disconnect(None, "Client disconnecting", None);
    }
}

// ── SFTP ─────────────────────────────────────────────────────────────────────

struct Ssh2Fs {
    session: Option<Session>,
    sftp: Option<Sftp>,
}

impl Ssh2Fs {
    fn sftp(&self) -> Result<&Sftp> {
        self.sftp
            .as_ref()
            .ok_or_else(|| Error::Operation("SFTP channel is closed".into()))
    }
}

fn to_remote_stat(stat: &FileStat) -> RemoteStat {
    RemoteStat {
        size: stat.size,
        uid: stat.uid,
        gid: stat.gid,
        perm: stat.perm,
        atime: stat.atime,
        mtime: stat.mtime,
    }
}

fn to_file_stat(stat: RemoteStat) -> FileStat {
    FileStat {
        size: stat.size,
        uid: stat.uid,
        gid: stat.gid,
        perm: stat.perm,
        atime: stat.atime,
        mtime: stat.mtime,
    }
}

impl RemoteFs for Ssh2Fs {
    fn read_dir(&mut self, path: &str) -> Result<Vec<RemoteDirEntry>> {
        let entries = self.sftp()?.readdir(Path::new(path)).map_err(remote_error)?;
        Ok(entries
            .into_iter()
            .filter_map(|(entry, stat)| {
                let filename = entry.file_name()?.to_string_lossy().into_owned();
                Some(RemoteDirEntry {
                    filename,
                    stat: to_remote_stat(&stat),
                })
            })
            .collect())
    }

    fn stat(&mut self, path: &str) -> Result<RemoteStat> {
        let stat = self.sftp()?.stat(Path::new(path)).map_err(remote_error)?;
        Ok(to_remote_stat(&stat))
    }

    fn set_stat(&mut self, path: &str, stat: RemoteStat) -> Result<()> {
        self.sftp()?
            .setstat(Path::new(path), to_file_stat(stat))
            .map_err(remote_error)
    }

    fn mkdir(&mut self, path: &str, mode: u32) -> Result<()> {
        self.sftp()?
            .mkdir(Path::new(path), mode as i32)
            .map_err(remote_error)
    }

    fn unlink(&mut self, path: &str) -> Result<()> {
        self.sftp()?.unlink(Path::new(path)).map_err(remote_error)
    }

    fn rmdir(&mut self, path: &str) -> Result<()> {
        self.sftp()?.rmdir(Path::new(path)).map_err(remote_error)
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.sftp()?
            .rename(Path::new(from), Path::new(to), None)
            .map_err(remote_error)
    }

    fn open_read(&mut self, path: &str) -> Result<Box<dyn Read + Send>> {
        let file = self.sftp()?.open(Path::new(path)).map_err(remote_error)?;
        Ok(Box::new(file))
    }

    fn open_write(&mut self, path: &str) -> Result<Box<dyn Write + Send>> {
        let file = self.sftp()?.create(Path::new(path)).map_err(remote_error)?;
        Ok(Box::new(file))
    }

    fn close(&mut self) {
        self.sftp.take();
        if let Some(session) = self.session.take() {
            let _ = session.disconnect(None, "Transfer complete", None);
        }
    }
}
