//! Stream scan status parsing

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::wire::{find_sentinel, response_text, CLEAN_MARKER};

const FOUND_PREFIX: &str = "stream: ";
const FOUND_SUFFIX: &str = " FOUND";

/// Verdict for one scanned stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanResult {
    /// No signature matched
    Clean,
    /// A signature matched
    Infected { signature: String },
}

impl ScanResult {
    pub fn is_clean(&self) -> bool {
        matches!(self, ScanResult::Clean)
    }

    pub fn is_infected(&self) -> bool {
        matches!(self, ScanResult::Infected { .. })
    }

    /// Name of the matched signature, if any
    pub fn signature(&self) -> Option<&str> {
        match self {
            ScanResult::Clean => None,
            ScanResult::Infected { signature } => Some(signature),
        }
    }
}

/// Renders the way clamd prints verdicts: `OK` or `<name> FOUND`
impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanResult::Clean => f.write_str("OK"),
            ScanResult::Infected { signature } => write!(f, "{}{}", signature, FOUND_SUFFIX),
        }
    }
}

/// Daemon status that is neither clean nor a well-formed detection
///
/// Displays as the raw status so callers can print it unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status}")]
pub struct ProtocolError {
    status: String,
}

impl ProtocolError {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
        }
    }

    /// The status text exactly as received
    pub fn status(&self) -> &str {
        &self.status
    }
}

/// Parse a status string (without its sentinel)
pub fn parse_status(status: &str) -> Result<ScanResult, ProtocolError> {
    if status == CLEAN_MARKER {
        return Ok(ScanResult::Clean);
    }

    let signature = status
        .strip_prefix(FOUND_PREFIX)
        .and_then(|rest| rest.strip_suffix(FOUND_SUFFIX))
        .filter(|name| !name.is_empty() && !name.contains(['\n', '\r']));

    match signature {
        Some(name) => Ok(ScanResult::Infected {
            signature: name.to_string(),
        }),
        None => Err(ProtocolError::new(status)),
    }
}

/// Parse a raw reply; anything from the first sentinel on is ignored
pub fn parse_response(raw: &[u8]) -> Result<ScanResult, ProtocolError> {
    let end = find_sentinel(raw).unwrap_or(raw.len());
    parse_status(&response_text(&raw[..end]))
}
