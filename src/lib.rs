//! EasyShell relay: hosts SSH sessions and SFTP operations on behalf of
//! front ends that cannot hold native connections themselves.

pub mod relay;

pub use relay::{router, serve, RelayState, SharedRelayState};
