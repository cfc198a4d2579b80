// ── esh-sftp / sftp module ────────────────────────────────────────────────────
//
// One-shot SFTP operations over the backend seam:
//   • Every call opens and closes its own subsystem channel
//   • Listing with mode-mask classification and `ls -l` long names
//   • Recursive, non-atomic directory removal
//   • Chunked uploads/downloads with a per-transfer progress sink

pub mod attrs;
pub mod dir_ops;
pub mod file_ops;
pub mod progress;
pub mod service;
pub mod transfer;
pub mod types;

pub use attrs::{file_attributes, format_permissions, long_name};
pub use progress::percent;
pub use service::{TransferFacade, TransferFacadeState};
pub use types::RemoteEntry;
