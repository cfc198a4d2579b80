pub mod ssh;

pub use ssh::*;
