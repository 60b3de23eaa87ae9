//! Blocking INSTREAM scan: the whole conversation runs on the calling thread.

use std::fs::File;
use std::io::{self, Read, Seek, Write};

use clamstream_protocol::wire::{self, response_text, Command, CHUNK_MAX, TERMINATOR};
use clamstream_protocol::{parse_status, ScanResult};
use tracing::debug;

use crate::endpoint::{Endpoint, Timeout};
use crate::error::{ClamError, Result};
use crate::transport::Connection;

/// Scan everything `source` yields
///
/// The source is sent in chunks of at most [`CHUNK_MAX`] bytes.
///
/// # Errors
///
/// `Connection` for socket failures, `Source` if reading `source` fails,
/// `Timeout` if the daemon does not answer in time and `Protocol` if it
/// answers with anything other than a verdict.
pub fn scan<R: Read>(source: &mut R, endpoint: &Endpoint, timeout: Timeout) -> Result<ScanResult> {
    let mut conn = Connection::connect(endpoint)?;
    let outcome = stream_scan(&mut conn, source, timeout);
    conn.close();
    outcome
}

/// Scan a file by handing its descriptor to the socket in one chunk
///
/// # Errors
///
/// As [`scan`], plus `SourceTooLarge` (before connecting) for files that do
/// not fit a 4-byte size prefix. Files reporting a size of zero are streamed
/// in chunks like any other source.
pub fn scan_file(file: &File, endpoint: &Endpoint, timeout: Timeout) -> Result<ScanResult> {
    let len = file.metadata().map_err(ClamError::Source)?.len();
    wire::chunk_prefix(len)?;

    // Zero may just mean unknown (procfs, pipes); stream until EOF instead
    if len == 0 {
        let mut reader = file;
        reader.rewind().map_err(ClamError::Source)?;
        return scan(&mut reader, endpoint, timeout);
    }

    let mut conn = Connection::connect(endpoint)?;
    let outcome = file_scan(&mut conn, file, len, timeout);
    conn.close();
    outcome
}

fn stream_scan<R: Read>(conn: &mut Connection, source: &mut R, timeout: Timeout) -> Result<ScanResult> {
    conn.send_command(Command::InStream)?;
    let sent = write_chunks(source, conn.stream_mut()?)?;
    debug!(endpoint = %conn.endpoint(), bytes = sent, "stream uploaded");
    await_verdict(conn, timeout)
}

fn file_scan(conn: &mut Connection, file: &File, len: u64, timeout: Timeout) -> Result<ScanResult> {
    conn.send_command(Command::InStream)?;
    conn.send_file(file, len)?;
    conn.write_all(&TERMINATOR)?;
    debug!(endpoint = %conn.endpoint(), bytes = len, "file uploaded");
    await_verdict(conn, timeout)
}

fn await_verdict(conn: &mut Connection, timeout: Timeout) -> Result<ScanResult> {
    let payload = conn.read_until_sentinel(timeout)?;
    Ok(parse_status(&response_text(&payload))?)
}

/// Frame `source` as INSTREAM chunks into `sink`, terminator included
///
/// Returns the number of payload bytes sent.
pub fn write_chunks<R, W>(source: &mut R, sink: &mut W) -> Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = [0u8; CHUNK_MAX];
    let mut total = 0u64;

    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ClamError::Source(e)),
        };

        // n <= CHUNK_MAX, always representable
        sink.write_all(&wire::chunk_prefix(n as u64)?)?;
        sink.write_all(&buf[..n])?;
        total += n as u64;
    }

    sink.write_all(&TERMINATOR)?;
    sink.flush()?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Split an INSTREAM body back into its chunks; the terminator is the last entry
    fn decode_chunks(mut bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut chunks = Vec::new();
        loop {
            let (prefix, rest) = bytes.split_at(4);
            let len = u32::from_be_bytes(prefix.try_into().unwrap()) as usize;
            let (chunk, rest) = rest.split_at(len);
            chunks.push(chunk.to_vec());
            bytes = rest;
            if len == 0 {
                assert!(bytes.is_empty(), "bytes after terminator");
                return chunks;
            }
        }
    }

    /// Reader that hands out at most `step` bytes per call
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.data.len().min(self.step).min(buf.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_chunking_reassembles_payload() {
        for size in [0usize, 1, 4095, 4096, 4097, 8192, 10_000] {
            let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let mut wire_bytes = Vec::new();
            let sent = write_chunks(&mut payload.as_slice(), &mut wire_bytes).unwrap();
            assert_eq!(sent, size as u64);

            let chunks = decode_chunks(&wire_bytes);
            let (terminator, data) = chunks.split_last().unwrap();
            assert!(terminator.is_empty());
            assert!(data.iter().all(|c| !c.is_empty() && c.len() <= CHUNK_MAX));
            assert_eq!(data.concat(), payload);
        }
    }

    #[test]
    fn test_short_reads_are_not_end_of_stream() {
        let payload = vec![7u8; 100];
        let mut source = Trickle {
            data: &payload,
            step: 30,
        };
        let mut wire_bytes = Vec::new();
        write_chunks(&mut source, &mut wire_bytes).unwrap();

        let sizes: Vec<usize> = decode_chunks(&wire_bytes).iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![30, 30, 30, 10, 0]);
    }

    #[test]
    fn test_source_error_is_reported_as_source() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
            }
        }

        let mut sink = Vec::new();
        let err = write_chunks(&mut Broken, &mut sink).unwrap_err();
        assert!(matches!(err, ClamError::Source(_)));
    }

    #[test]
    fn test_oversized_file_rejected_before_connecting() {
        let file = tempfile::tempfile().unwrap();
        file.set_len(u64::from(u32::MAX) + 1).unwrap();

        // Nothing listens on port 1; the size check must fire first
        let err = scan_file(&file, &Endpoint::new("127.0.0.1", 1), Timeout::UNBOUNDED).unwrap_err();
        assert!(matches!(
            err,
            ClamError::SourceTooLarge { size, max } if size == 1 << 32 && max == u64::from(u32::MAX)
        ));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_chunking_reassembles_any_payload(
                payload in prop::collection::vec(any::<u8>(), 0..20_000),
                step in 1usize..6_000,
            ) {
                let mut source = Trickle { data: &payload, step };
                let mut wire_bytes = Vec::new();
                let sent = write_chunks(&mut source, &mut wire_bytes).unwrap();
                prop_assert_eq!(sent, payload.len() as u64);

                let chunks = decode_chunks(&wire_bytes);
                let (terminator, data) = chunks.split_last().unwrap();
                prop_assert!(terminator.is_empty());
                prop_assert!(data.iter().all(|c| !c.is_empty() && c.len() <= CHUNK_MAX.min(step)));
                prop_assert_eq!(data.concat(), payload);
            }
        }
    }
}
