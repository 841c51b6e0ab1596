//! Unix socket IPC between the daemon and the command line
//!
//! The daemon owns the scheduler and the session manager; the CLI drives
//! them through newline-delimited JSON requests.

mod client;
mod protocol;
mod server;

pub use client::{is_daemon_running, DaemonClient};
pub use protocol::*;
pub use server::{DaemonContext, DaemonServer};
