pub mod commands;
pub mod config;
pub mod error;
pub mod feed;
pub mod gateway;
pub mod ingest;
pub mod ipc;
pub mod pipeline;
pub mod publisher;
pub mod render;
pub mod router;
pub mod scheduler;
pub mod session;
pub mod storage;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use ipc::{DaemonClient, DaemonServer};
