//! One TCP connection per daemon operation, in blocking and non-blocking form.

use std::fs::File;
use std::io::{self, Read, Seek, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Instant;

use clamstream_protocol::wire::{self, response_text, Command, Feed, ResponseAccumulator};
use clamstream_protocol::ProtocolError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::endpoint::{Endpoint, Timeout};
use crate::error::{ClamError, Result};

/// Bytes requested per response read
pub(crate) const RESPONSE_READ_LEN: usize = 1024;

/// Copy buffer for single-chunk file transfers
const FILE_COPY_LEN: usize = 64 * 1024;

fn not_connected() -> ClamError {
    ClamError::Connection(io::Error::new(
        io::ErrorKind::NotConnected,
        "connection already closed",
    ))
}

pub(crate) fn eof_before_sentinel() -> ClamError {
    ClamError::Connection(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "daemon closed the connection before terminating its response",
    ))
}

pub(crate) fn overflow_error(payload: &[u8]) -> ClamError {
    ClamError::Protocol(ProtocolError::new(response_text(payload)))
}

// ─── Blocking ────────────────────────────────────────────────────────────────

/// Blocking connection to the daemon, closed on drop
pub struct Connection {
    stream: Option<TcpStream>,
    endpoint: Endpoint,
}

impl Connection {
    /// Connect to the daemon
    ///
    /// # Errors
    ///
    /// Returns `ClamError::Connection` if the endpoint is unreachable.
    pub fn connect(endpoint: &Endpoint) -> Result<Self> {
        let stream = TcpStream::connect(endpoint.addr())?;
        debug!(%endpoint, "connected to daemon");
        Ok(Self {
            stream: Some(stream),
            endpoint: endpoint.clone(),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub(crate) fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or_else(not_connected)
    }

    /// Write every byte or fail
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream_mut()?.write_all(bytes)?;
        Ok(())
    }

    pub fn send_command(&mut self, command: Command) -> Result<()> {
        trace!(endpoint = %self.endpoint, command = command.name(), "sending command");
        self.write_all(command.bytes())
    }

    /// Send a whole file as one chunk
    ///
    /// `len` must be the file's size; the prefix is written first and the file
    /// must deliver exactly that many bytes. Read failures are `Source`
    /// errors, write failures `Connection` errors.
    pub fn send_file(&mut self, file: &File, len: u64) -> Result<()> {
        let prefix = wire::chunk_prefix(len)?;
        let mut reader = file;
        reader.rewind().map_err(ClamError::Source)?;
        let mut reader = reader.take(len);

        let stream = self.stream_mut()?;
        stream.write_all(&prefix)?;

        let mut buf = vec![0u8; FILE_COPY_LEN];
        let mut copied = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ClamError::Source(e)),
            };
            stream.write_all(&buf[..n])?;
            copied += n as u64;
        }

        if copied != len {
            return Err(ClamError::Source(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("file shrank during transfer: sent {} of {} bytes", copied, len),
            )));
        }
        Ok(())
    }

    /// Read until the sentinel and return everything before it
    ///
    /// The timeout bounds the whole reply, not each read.
    pub fn read_until_sentinel(&mut self, timeout: Timeout) -> Result<Vec<u8>> {
        let deadline = timeout.deadline();
        let stream = self.stream_mut()?;
        let mut response = ResponseAccumulator::new();
        let mut buf = [0u8; RESPONSE_READ_LEN];

        loop {
            match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(ClamError::Timeout(timeout.into()));
                    }
                    stream.set_read_timeout(Some(remaining))?;
                }
                None => stream.set_read_timeout(None)?,
            }

            let n = match stream.read(&mut buf) {
                Ok(0) => return Err(eof_before_sentinel()),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    return Err(ClamError::Timeout(timeout.into()));
                }
                Err(e) => return Err(e.into()),
            };

            match response.feed(&buf[..n]) {
                Feed::Incomplete => {}
                Feed::Complete(payload) => return Ok(payload),
                Feed::Overflow(payload) => return Err(overflow_error(&payload)),
            }
        }
    }

    /// Close the socket; later calls are no-ops
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                if e.kind() != io::ErrorKind::NotConnected {
                    debug!(endpoint = %self.endpoint, "shutdown failed: {}", e);
                }
            }
            debug!(endpoint = %self.endpoint, "connection closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

// ─── Non-blocking ────────────────────────────────────────────────────────────

/// Non-blocking connection; every call issues a single I/O operation
pub struct AsyncConnection<S = tokio::net::TcpStream> {
    stream: Option<S>,
    peer: String,
}

impl AsyncConnection<tokio::net::TcpStream> {
    /// Connect to the daemon
    pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
        let stream = tokio::net::TcpStream::connect(endpoint.addr()).await?;
        debug!(%endpoint, "connected to daemon");
        Ok(Self::from_stream(stream, endpoint.to_string()))
    }
}

impl<S> AsyncConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already established stream
    pub fn from_stream(stream: S, peer: impl Into<String>) -> Self {
        Self {
            stream: Some(stream),
            peer: peer.into(),
        }
    }

    /// Issue one write; returns how many bytes the socket took
    pub async fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        Ok(stream.write(bytes).await?)
    }

    /// Issue one read, giving up at `deadline`
    pub async fn read(
        &mut self,
        buf: &mut [u8],
        deadline: Option<tokio::time::Instant>,
        timeout: Timeout,
    ) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        let read = stream.read(buf);
        match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, read).await {
                Ok(n) => Ok(n?),
                Err(_) => Err(ClamError::Timeout(timeout.into())),
            },
            None => Ok(read.await?),
        }
    }

    /// Close the socket; later calls are no-ops
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                if e.kind() != io::ErrorKind::NotConnected {
                    debug!(peer = %self.peer, "shutdown failed: {}", e);
                }
            }
            debug!(peer = %self.peer, "connection closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}
