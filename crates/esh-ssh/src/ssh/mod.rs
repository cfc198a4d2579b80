// ── esh-ssh / ssh module ──────────────────────────────────────────────────────
//
// Interactive SSH sessions:
//   • Backend seam (shell, SFTP and exec capabilities) with a libssh2 impl
//   • Connect / authenticate under a ready-timeout, optional retry policy
//   • One pump thread per shell (ordered input, resize, output, close)
//   • Single-owner session registry reached only by handle

pub mod backend;
pub mod registry;
pub mod service;
pub mod shell;
pub mod ssh2_backend;
pub mod state;

mod relay;

pub use backend::*;
pub use registry::{SessionInfo, SessionRegistry};
pub use service::{SessionCapability, SessionManager, SessionManagerState, TEST_COMMAND};
pub use shell::{spawn_pump, PumpEvent, ShellCommand, ShellHandle};
pub use ssh2_backend::Ssh2Backend;
pub use state::{InvalidTransition, SessionState};
