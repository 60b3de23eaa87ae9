use std::time::Duration;

use clamstream_protocol::{ChunkTooLarge, MalformedVersion, ProtocolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClamError {
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Timed out after {0:?} waiting for daemon response")]
    Timeout(Duration),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    MalformedVersion(#[from] MalformedVersion),

    #[error("Source read error: {0}")]
    Source(std::io::Error),

    #[error("Source too large: {size} bytes (max {max} bytes)")]
    SourceTooLarge { size: u64, max: u64 },

    #[error("Scan cancelled: worker pool shut down")]
    Cancelled,

    #[error("Worker pool error: {0}")]
    Runtime(std::io::Error),
}

impl From<ChunkTooLarge> for ClamError {
    fn from(e: ChunkTooLarge) -> Self {
        ClamError::SourceTooLarge {
            size: e.len,
            max: e.max,
        }
    }
}

impl ClamError {
    /// Whether the daemon never answered in time
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClamError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, ClamError>;
