//! Shared building blocks for EasyShell: the host and handle model, the
//! error taxonomy, the `{success, error}` reply envelope, configuration
//! and logging.

pub mod config;
pub mod error;
pub mod logging;
pub mod reply;
pub mod types;

pub use config::{LogFormat, LogSettings, RelayConfig, RetryPolicy, SshSettings, TransferSettings};
pub use error::{Error, ErrorKind, Result};
pub use logging::init_logging;
pub use reply::{Ack, Reply};
pub use types::*;
