//! clamstream-core - clamd INSTREAM client
//!
//! This crate runs the daemon conversations defined in `clamstream-protocol`:
//! - Blocking scans on the calling thread ([`ClamClient`], [`engine`])
//! - Non-blocking scans driven by an explicit state machine ([`session`])
//!   on an owned worker pool ([`AsyncClient`])
//! - PING and VERSION queries
//! - Configuration management

pub mod client;
pub mod config;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod pool;
pub mod query;
pub mod session;
pub mod transport;

pub use client::ClamClient;
pub use config::Config;
pub use endpoint::{Endpoint, Timeout};
pub use error::{ClamError, Result};
pub use pool::AsyncClient;
pub use session::{SessionState, StreamSession};

pub use clamstream_protocol::{ProtocolError, ScanResult, VersionInfo};
