//! Fake interactive shell channel.
//!
//! The backend hands a `FakeShell` to the pump thread and keeps a
//! `FakeShellRemote` so tests can play the remote side.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use esh_ssh::ShellChannel;

#[derive(Debug, Default)]
struct ShellState {
    output: VecDeque<Vec<u8>>,
    input: Vec<u8>,
    sizes: Vec<(u32, u32)>,
    eof: bool,
    closed: bool,
    close_calls: usize,
    read_error: Option<String>,
    echo: bool,
}

/// Channel side, owned by the pump.
#[derive(Debug)]
pub struct FakeShell {
    state: Arc<Mutex<ShellState>>,
}

/// Test side of a fake shell.
#[derive(Debug, Clone)]
pub struct FakeShellRemote {
    state: Arc<Mutex<ShellState>>,
}

/// Creates a connected channel/remote pair. With `echo`, every input
/// chunk is queued back as output.
pub fn fake_shell_pair(echo: bool) -> (FakeShell, FakeShellRemote) {
    let state = Arc::new(Mutex::new(ShellState {
        echo,
        ..ShellState::default()
    }));
    (
        FakeShell {
            state: Arc::clone(&state),
        },
        FakeShellRemote { state },
    )
}

impl ShellChannel for FakeShell {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.read_error.take() {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, message));
        }
        let Some(mut chunk) = state.output.pop_front() else {
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            let rest = chunk.split_off(n);
            state.output.push_front(rest);
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "channel closed"));
        }
        state.input.extend_from_slice(data);
        if state.echo {
            state.output.push_back(data.to_vec());
        }
        Ok(())
    }

    fn resize(&mut self, cols: u32, rows: u32) -> io::Result<()> {
        self.state.lock().unwrap().sizes.push((cols, rows));
        Ok(())
    }

    fn is_eof(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.eof && state.output.is_empty()
    }

    fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        state.close_calls += 1;
    }
}

impl FakeShellRemote {
    /// Queues bytes for the pump to read.
    pub fn push_output(&self, data: impl AsRef<[u8]>) {
        self.state
            .lock()
            .unwrap()
            .output
            .push_back(data.as_ref().to_vec());
    }

    /// Everything written to the channel so far.
    pub fn input(&self) -> Vec<u8> {
        self.state.lock().unwrap().input.clone()
    }

    /// Every window-change request, oldest first.
    pub fn sizes(&self) -> Vec<(u32, u32)> {
        self.state.lock().unwrap().sizes.clone()
    }

    /// Remote end sends EOF once the queued output is drained.
    pub fn hang_up(&self) {
        self.state.lock().unwrap().eof = true;
    }

    /// The next read fails with `message`.
    pub fn fail_read(&self, message: impl Into<String>) {
        self.state.lock().unwrap().read_error = Some(message.into());
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().unwrap().close_calls
    }
}
