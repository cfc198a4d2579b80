//! `SshBackend` backed by a fake host.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use esh_core::{Error, ExecOutput, HostConfig, Result};
use esh_ssh::{ConnectOptions, RemoteFs, ShellChannel, ShellOptions, SshBackend, TEST_COMMAND};

use crate::fake_fs::FakeFs;
use crate::fake_shell::{fake_shell_pair, FakeShellRemote};

#[derive(Debug, Default)]
struct Counters {
    connect_attempts: AtomicUsize,
    shells_opened: AtomicUsize,
    sftp_opened: AtomicUsize,
    sftp_closed: Arc<AtomicUsize>,
    execs: AtomicUsize,
}

#[derive(Debug, Default)]
struct Behavior {
    /// Failures returned by the next connection attempts, in order.
    connect_failures: VecDeque<Error>,
    /// Every attempt fails with this once the queue above is empty.
    always_fail: Option<Error>,
    connect_delay: Option<Duration>,
    echo: bool,
    exec_outputs: HashMap<String, ExecOutput>,
}

/// Fake remote host: one filesystem, any number of shells.
#[derive(Debug, Default)]
pub struct MockBackend {
    fs: FakeFs,
    behavior: Mutex<Behavior>,
    shells: Mutex<Vec<FakeShellRemote>>,
    counters: Counters,
    last_shell_options: Mutex<Option<ShellOptions>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shells echo their input back as output.
    pub fn echoing() -> Self {
        let backend = Self::default();
        backend.behavior.lock().unwrap().echo = true;
        backend
    }

    pub fn fs(&self) -> &FakeFs {
        &self.fs
    }

    // ── Behaviour knobs ──────────────────────────────────────────────────────

    /// Every connection attempt fails with `error`.
    pub fn fail_connect(&self, error: Error) {
        self.behavior.lock().unwrap().always_fail = Some(error);
    }

    /// The next connection attempt fails with `error`; later ones proceed.
    pub fn fail_next_connect(&self, error: Error) {
        self.behavior.lock().unwrap().connect_failures.push_back(error);
    }

    /// Each connection attempt blocks this long before completing.
    pub fn delay_connect(&self, delay: Duration) {
        self.behavior.lock().unwrap().connect_delay = Some(delay);
    }

    pub fn set_exec_output(&self, command: &str, output: ExecOutput) {
        self.behavior
            .lock()
            .unwrap()
            .exec_outputs
            .insert(command.to_string(), output);
    }

    // ── Inspection ───────────────────────────────────────────────────────────

    /// Remote sides of every shell opened so far, oldest first.
    pub fn shells(&self) -> Vec<FakeShellRemote> {
        self.shells.lock().unwrap().clone()
    }

    pub fn last_shell(&self) -> Option<FakeShellRemote> {
        self.shells.lock().unwrap().last().cloned()
    }

    pub fn last_shell_options(&self) -> Option<ShellOptions> {
        self.last_shell_options.lock().unwrap().clone()
    }

    pub fn connect_attempts(&self) -> usize {
        self.counters.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn shells_opened(&self) -> usize {
        self.counters.shells_opened.load(Ordering::SeqCst)
    }

    pub fn sftp_opened(&self) -> usize {
        self.counters.sftp_opened.load(Ordering::SeqCst)
    }

    pub fn sftp_closed(&self) -> usize {
        self.counters.sftp_closed.load(Ordering::SeqCst)
    }

    pub fn exec_calls(&self) -> usize {
        self.counters.execs.load(Ordering::SeqCst)
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn connect(&self, host: &HostConfig) -> Result<()> {
        host.validate()?;
        self.counters.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let (delay, failure) = {
            let mut behavior = self.behavior.lock().unwrap();
            let failure = behavior
                .connect_failures
                .pop_front()
                .or_else(|| behavior.always_fail.clone());
            (behavior.connect_delay, failure)
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl SshBackend for MockBackend {
    fn open_shell(
        &self,
        host: &HostConfig,
        options: &ShellOptions,
    ) -> Result<Box<dyn ShellChannel>> {
        self.connect(host)?;
        *self.last_shell_options.lock().unwrap() = Some(options.clone());

        let echo = self.behavior.lock().unwrap().echo;
        let (shell, remote) = fake_shell_pair(echo);
        self.shells.lock().unwrap().push(remote);
        self.counters.shells_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(shell))
    }

    fn open_sftp(&self, host: &HostConfig, _options: &ConnectOptions) -> Result<Box<dyn RemoteFs>> {
        self.connect(host)?;
        self.counters.sftp_opened.fetch_add(1, Ordering::SeqCst);
        let closed = Arc::clone(&self.counters.sftp_closed);
        Ok(Box::new(self.fs.channel().on_close(move || {
            closed.fetch_add(1, Ordering::SeqCst);
        })))
    }

    fn exec(
        &self,
        host: &HostConfig,
        command: &str,
        _options: &ConnectOptions,
    ) -> Result<ExecOutput> {
        self.connect(host)?;
        self.counters.execs.fetch_add(1, Ordering::SeqCst);

        if let Some(output) = self.behavior.lock().unwrap().exec_outputs.get(command) {
            return Ok(output.clone());
        }
        if command == TEST_COMMAND {
            return Ok(ExecOutput {
                code: 0,
                stdout: "connected\n".into(),
                stderr: String::new(),
            });
        }
        Ok(ExecOutput {
            code: 127,
            stdout: String::new(),
            stderr: format!("sh: {}: command not found\n", command),
        })
    }
}
