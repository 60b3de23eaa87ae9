//! clamstream-protocol - clamd wire protocol
//!
//! This crate holds everything about the daemon conversation that does not
//! touch a socket:
//! - Command bytes and the INSTREAM chunk framing
//! - Sentinel-terminated reply accumulation
//! - Scan status and VERSION reply parsing

pub mod response;
pub mod version;
pub mod wire;

pub use response::{parse_response, parse_status, ProtocolError, ScanResult};
pub use version::{MalformedVersion, VersionInfo};
pub use wire::{ChunkTooLarge, Command, Feed, ResponseAccumulator};
