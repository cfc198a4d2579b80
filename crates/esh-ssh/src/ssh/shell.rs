// ── Shell pump ────────────────────────────────────────────────────────────────
//
// Each interactive channel is owned by one OS thread. The thread drains
// queued commands (input, resize, close) in order, then polls the channel
// for output, backing off from 1 ms to 10 ms while idle.

use crate::ssh::backend::ShellChannel;
use esh_core::ConnectionId;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const READ_BUFFER_SIZE: usize = 16_384;
const MIN_SLEEP_MS: u64 = 1;
const MAX_SLEEP_MS: u64 = 10;
const IDLE_THRESHOLD: u32 = 10;
const KEEPALIVE_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Input(Vec<u8>),
    Resize(u32, u32),
    Close,
}

/// What the pump reports back. `Exited` is always the last message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpEvent {
    Output(Vec<u8>),
    Failed(String),
    Exited,
}

/// Owning side of a running pump.
#[derive(Debug)]
pub struct ShellHandle {
    sender: mpsc::UnboundedSender<ShellCommand>,
    thread: JoinHandle<()>,
}

impl ShellHandle {
    /// Queues a command. Returns `false` once the pump has exited.
    pub fn send(&self, command: ShellCommand) -> bool {
        self.sender.send(command).is_ok()
    }

    /// Asks the pump to close the channel. The thread is detached and
    /// reports `Exited` on its own.
    pub fn close(self) {
        let _ = self.sender.send(ShellCommand::Close);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

/// Starts the pump thread for `channel`.
pub fn spawn_pump(
    connection_id: ConnectionId,
    channel: Box<dyn ShellChannel>,
) -> std::io::Result<(ShellHandle, mpsc::UnboundedReceiver<PumpEvent>)> {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let thread = std::thread::Builder::new()
        .name(format!("ssh-shell-{}", connection_id))
        .spawn(move || run_pump(connection_id, channel, command_rx, event_tx))?;

    Ok((
        ShellHandle {
            sender: command_tx,
            thread,
        },
        event_rx,
    ))
}

fn run_pump(
    connection_id: ConnectionId,
    mut channel: Box<dyn ShellChannel>,
    mut commands: mpsc::UnboundedReceiver<ShellCommand>,
    events: mpsc::UnboundedSender<PumpEvent>,
) {
    let mut buffer = [0u8; READ_BUFFER_SIZE];
    let mut running = true;
    let mut idle_count: u32 = 0;
    let mut last_keepalive = Instant::now();

    while running {
        loop {
            let command = match commands.try_recv() {
                Ok(command) => command,
                Err(mpsc::error::TryRecvError::Empty) => break,
                // Owner dropped without an explicit close.
                Err(mpsc::error::TryRecvError::Disconnected) => ShellCommand::Close,
            };
            match command {
                ShellCommand::Input(data) => {
                    if let Err(e) = channel.write_all(&data) {
                        let _ = events.send(PumpEvent::Failed(e.to_string()));
                        running = false;
                        break;
                    }
                    idle_count = 0;
                }
                ShellCommand::Resize(cols, rows) => {
                    if let Err(e) = channel.resize(cols, rows) {
                        warn!("[{}] window change {}x{} failed: {}", connection_id, cols, rows, e);
                    }
                }
                ShellCommand::Close => {
                    running = false;
                    break;
                }
            }
        }
        if !running {
            break;
        }

        match channel.read(&mut buffer) {
            Ok(n) if n > 0 => {
                idle_count = 0;
                let _ = events.send(PumpEvent::Output(buffer[..n].to_vec()));
                // Keep draining while the channel has data.
                continue;
            }
            Ok(_) => idle_count = idle_count.saturating_add(1),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                idle_count = idle_count.saturating_add(1)
            }
            Err(e) => {
                let _ = events.send(PumpEvent::Failed(e.to_string()));
                break;
            }
        }

        if channel.is_eof() {
            break;
        }

        if last_keepalive.elapsed() >= KEEPALIVE_TICK {
            last_keepalive = Instant::now();
            if let Err(e) = channel.keepalive() {
                let _ = events.send(PumpEvent::Failed(e.to_string()));
                break;
            }
        }

        let sleep_ms = if idle_count > IDLE_THRESHOLD {
            MAX_SLEEP_MS
        } else {
            MIN_SLEEP_MS
        };
        std::thread::sleep(Duration::from_millis(sleep_ms));
    }

    channel.close();
    debug!("[{}] shell pump exited", connection_id);
    let _ = events.send(PumpEvent::Exited);
}
