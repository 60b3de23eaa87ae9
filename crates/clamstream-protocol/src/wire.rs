//! Wire constants and framing for the clamd command protocol
//!
//! Every command is sent in its `z`-prefixed, NUL-terminated form, and every
//! daemon reply is terminated by a single NUL byte (the sentinel).

use thiserror::Error;

/// Default host the daemon listens on
pub const DEFAULT_HOST: &str = "localhost";

/// Default clamd TCP port
pub const DEFAULT_PORT: u16 = 3310;

/// Streaming scan command header
pub const INSTREAM: &[u8] = b"zINSTREAM\0";

/// Liveness command
pub const PING: &[u8] = b"zPING\0";

/// Database version command
pub const VERSION: &[u8] = b"zVERSION\0";

/// Reply to [`PING`] from a live daemon
pub const PONG: &str = "PONG";

/// Reply to a stream scan that found nothing
pub const CLEAN_MARKER: &str = "stream: OK";

/// Terminates every daemon response
pub const SENTINEL: u8 = 0;

/// Client-side send buffer size. The protocol itself has no upper chunk bound.
pub const CHUNK_MAX: usize = 4096;

/// Length of a chunk size prefix
pub const PREFIX_LEN: usize = 4;

/// Size prefix that ends an INSTREAM upload
pub const TERMINATOR: [u8; PREFIX_LEN] = [0; PREFIX_LEN];

/// Upper bound on a daemon reply that has not produced its sentinel yet
pub const MAX_RESPONSE_LEN: usize = 8 * 1024;

/// Commands understood by the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Chunked stream scan
    InStream,
    /// Ping/health check
    Ping,
    /// Client and signature database version
    Version,
}

impl Command {
    /// Bytes sent to open the exchange
    pub const fn bytes(self) -> &'static [u8] {
        match self {
            Command::InStream => INSTREAM,
            Command::Ping => PING,
            Command::Version => VERSION,
        }
    }

    /// Command name without the `z` prefix and terminator
    pub const fn name(self) -> &'static str {
        match self {
            Command::InStream => "INSTREAM",
            Command::Ping => "PING",
            Command::Version => "VERSION",
        }
    }
}

/// A chunk cannot be described by a 4-byte size prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("chunk of {len} bytes exceeds the {max} byte size field")]
pub struct ChunkTooLarge {
    pub len: u64,
    pub max: u64,
}

/// Encode a chunk length as its big-endian size prefix
pub fn chunk_prefix(len: u64) -> Result<[u8; PREFIX_LEN], ChunkTooLarge> {
    u32::try_from(len)
        .map(u32::to_be_bytes)
        .map_err(|_| ChunkTooLarge {
            len,
            max: u64::from(u32::MAX),
        })
}

/// Position of the first sentinel in `bytes`
pub fn find_sentinel(bytes: &[u8]) -> Option<usize> {
    bytes.iter().position(|&b| b == SENTINEL)
}

/// Outcome of feeding bytes into a [`ResponseAccumulator`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    /// No sentinel yet; keep reading
    Incomplete,
    /// Sentinel seen; payload excludes it and anything after it
    Complete(Vec<u8>),
    /// Reply grew past [`MAX_RESPONSE_LEN`] without a sentinel
    Overflow(Vec<u8>),
}

/// Collects a daemon reply across however many reads it takes to arrive
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    buf: Vec<u8>,
    done: bool,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one read's worth of bytes
    pub fn feed(&mut self, bytes: &[u8]) -> Feed {
        if self.done {
            return Feed::Incomplete;
        }

        if let Some(pos) = find_sentinel(bytes) {
            self.buf.extend_from_slice(&bytes[..pos]);
            self.done = true;
            return Feed::Complete(std::mem::take(&mut self.buf));
        }

        self.buf.extend_from_slice(bytes);
        if self.buf.len() > MAX_RESPONSE_LEN {
            self.done = true;
            return Feed::Overflow(std::mem::take(&mut self.buf));
        }

        Feed::Incomplete
    }

    /// Bytes buffered so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Decode a reply payload into text; clamd only speaks ASCII
pub fn response_text(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_bytes() {
        assert_eq!(Command::InStream.bytes(), b"zINSTREAM\0");
        assert_eq!(Command::Ping.bytes(), b"zPING\0");
        assert_eq!(Command::Version.bytes(), b"zVERSION\0");
        assert_eq!(Command::Version.name(), "VERSION");
    }

    #[test]
    fn test_chunk_prefix_is_big_endian() {
        assert_eq!(chunk_prefix(0).unwrap(), TERMINATOR);
        assert_eq!(chunk_prefix(4096).unwrap(), [0, 0, 0x10, 0]);
        assert_eq!(chunk_prefix(0x0102_0304).unwrap(), [1, 2, 3, 4]);
        assert_eq!(chunk_prefix(u64::from(u32::MAX)).unwrap(), [0xff; 4]);
    }

    #[test]
    fn test_chunk_prefix_rejects_oversized() {
        let err = chunk_prefix(u64::from(u32::MAX) + 1).unwrap_err();
        assert_eq!(err.len, 1 << 32);
        assert_eq!(err.max, u64::from(u32::MAX));
    }

    #[test]
    fn test_accumulator_split_sentinel() {
        let mut acc = ResponseAccumulator::new();
        assert_eq!(acc.feed(b"stre"), Feed::Incomplete);
        assert_eq!(acc.feed(b"am: O"), Feed::Incomplete);
        assert_eq!(acc.feed(b"K"), Feed::Incomplete);
        assert_eq!(acc.len(), 10);
        assert_eq!(acc.feed(b"\0trailing"), Feed::Complete(b"stream: OK".to_vec()));
    }

    #[test]
    fn test_accumulator_ignores_bytes_after_sentinel() {
        let mut acc = ResponseAccumulator::new();
        assert_eq!(acc.feed(b"PONG\0PONG\0"), Feed::Complete(b"PONG".to_vec()));
        assert_eq!(acc.feed(b"more"), Feed::Incomplete);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_accumulator_empty_reply() {
        let mut acc = ResponseAccumulator::new();
        assert_eq!(acc.feed(b"\0"), Feed::Complete(Vec::new()));
    }

    #[test]
    fn test_accumulator_overflow() {
        let mut acc = ResponseAccumulator::new();
        let block = vec![b'x'; MAX_RESPONSE_LEN];
        assert_eq!(acc.feed(&block), Feed::Incomplete);
        match acc.feed(b"y") {
            Feed::Overflow(bytes) => assert_eq!(bytes.len(), MAX_RESPONSE_LEN + 1),
            other => panic!("expected overflow, got {:?}", other),
        }
    }
}
