//! Non-blocking INSTREAM scan as an explicit state machine.
//!
//! [`StreamSession`] owns every buffer of one in-flight scan and decides what
//! happens next; it never touches a socket. Whoever drives it performs the
//! I/O named by each [`Step`] and reports back with a [`Completion`]. Exactly
//! one operation is outstanding at any time, and the next one is only issued
//! once the previous completion has been fed back in.
//!
//! ```text
//! Connecting        -> SendingHeader                         | Failed
//! SendingHeader     -> SendingHeader (partial) | ReadingNextChunk | Failed
//! ReadingNextChunk  -> SendingChunkSize                      | Failed
//! SendingChunkSize  -> SendingChunkSize (partial) | SendingChunkData (size > 0)
//!                      | AwaitingResponse (size == 0)        | Failed
//! SendingChunkData  -> SendingChunkData (partial) | ReadingNextChunk | Failed
//! AwaitingResponse  -> AwaitingResponse (no sentinel yet) | Completed | Failed
//! ```

use std::fmt;
use std::future::Future;
use std::io;

use clamstream_protocol::wire::{self, response_text, Feed, ResponseAccumulator, CHUNK_MAX, INSTREAM, PREFIX_LEN};
use clamstream_protocol::{parse_status, ScanResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, trace};

use crate::endpoint::{Endpoint, Timeout};
use crate::error::{ClamError, Result};
use crate::transport::{eof_before_sentinel, overflow_error, AsyncConnection, RESPONSE_READ_LEN};

/// Where a session is in the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    SendingHeader,
    ReadingNextChunk,
    SendingChunkSize,
    SendingChunkData,
    AwaitingResponse,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of the I/O operation a [`Step`] asked for
#[derive(Debug)]
pub enum Completion {
    /// Socket connected
    Connected,
    /// This many bytes of [`StreamSession::outgoing`] were written
    Wrote(usize),
    /// This many bytes were read from the source into [`StreamSession::source_buffer`]
    SourceRead(usize),
    /// This many bytes were read from the socket into [`StreamSession::response_buffer`]
    Received(usize),
    /// The operation failed
    Failed(ClamError),
}

/// The next I/O operation the driver must perform
#[derive(Debug)]
pub enum Step {
    Connect,
    /// Write [`StreamSession::outgoing`]; partial writes are fine
    Write,
    /// Read from the source into [`StreamSession::source_buffer`]
    ReadSource,
    /// Read from the socket into [`StreamSession::response_buffer`]
    ReadResponse,
    /// Close the socket and hand this to the caller
    Finish(Result<ScanResult>),
}

/// Private state of one asynchronous scan
pub struct StreamSession {
    state: SessionState,
    header_sent: usize,
    /// Source read buffer; holds the chunk currently being sent
    chunk: Box<[u8; CHUNK_MAX]>,
    chunk_len: usize,
    chunk_sent: usize,
    prefix: [u8; PREFIX_LEN],
    prefix_sent: usize,
    response: ResponseAccumulator,
    scratch: [u8; RESPONSE_READ_LEN],
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Connecting,
            header_sent: 0,
            chunk: Box::new([0u8; CHUNK_MAX]),
            chunk_len: 0,
            chunk_sent: 0,
            prefix: wire::TERMINATOR,
            prefix_sent: 0,
            response: ResponseAccumulator::new(),
            scratch: [0u8; RESPONSE_READ_LEN],
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// First operation of every session
    pub fn start(&self) -> Step {
        Step::Connect
    }

    /// Unwritten remainder of whatever is being sent in the current state
    pub fn outgoing(&self) -> &[u8] {
        match self.state {
            SessionState::SendingHeader => &INSTREAM[self.header_sent..],
            SessionState::SendingChunkSize => &self.prefix[self.prefix_sent..],
            SessionState::SendingChunkData => &self.chunk[self.chunk_sent..self.chunk_len],
            _ => &[],
        }
    }

    /// Where the next source read must land
    pub fn source_buffer(&mut self) -> &mut [u8] {
        &mut self.chunk[..]
    }

    /// Where the next socket read must land
    pub fn response_buffer(&mut self) -> &mut [u8] {
        &mut self.scratch[..]
    }

    /// Size of the chunk currently being framed
    pub fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    /// Apply a completion and decide the next step
    pub fn advance(&mut self, completion: Completion) -> Step {
        use SessionState::*;

        if self.state.is_terminal() {
            return Step::Finish(Err(ClamError::Connection(io::Error::new(
                io::ErrorKind::Other,
                format!("session already {}", self.state),
            ))));
        }

        match (self.state, completion) {
            (_, Completion::Failed(e)) => self.fail(e),

            (Connecting, Completion::Connected) => self.transition(SendingHeader, Step::Write),

            (SendingHeader, Completion::Wrote(n)) => match Self::consume(&mut self.header_sent, INSTREAM.len(), n) {
                Ok(true) => self.transition(ReadingNextChunk, Step::ReadSource),
                Ok(false) => Step::Write,
                Err(e) => self.fail(e),
            },

            (ReadingNextChunk, Completion::SourceRead(n)) => {
                let n = n.min(CHUNK_MAX);
                self.chunk_len = n;
                self.chunk_sent = 0;
                self.prefix = (n as u32).to_be_bytes();
                self.prefix_sent = 0;
                self.transition(SendingChunkSize, Step::Write)
            }

            (SendingChunkSize, Completion::Wrote(n)) => match Self::consume(&mut self.prefix_sent, PREFIX_LEN, n) {
                Ok(true) if self.chunk_len > 0 => self.transition(SendingChunkData, Step::Write),
                Ok(true) => self.transition(AwaitingResponse, Step::ReadResponse),
                Ok(false) => Step::Write,
                Err(e) => self.fail(e),
            },

            (SendingChunkData, Completion::Wrote(n)) => match Self::consume(&mut self.chunk_sent, self.chunk_len, n) {
                Ok(true) => self.transition(ReadingNextChunk, Step::ReadSource),
                Ok(false) => Step::Write,
                Err(e) => self.fail(e),
            },

            (AwaitingResponse, Completion::Received(0)) => self.fail(eof_before_sentinel()),

            (AwaitingResponse, Completion::Received(n)) => {
                let n = n.min(RESPONSE_READ_LEN);
                match self.response.feed(&self.scratch[..n]) {
                    Feed::Incomplete => Step::ReadResponse,
                    Feed::Complete(payload) => match parse_status(&response_text(&payload)) {
                        Ok(result) => self.transition(Completed, Step::Finish(Ok(result))),
                        Err(e) => self.fail(e.into()),
                    },
                    Feed::Overflow(payload) => self.fail(overflow_error(&payload)),
                }
            }

            (state, completion) => self.fail(ClamError::Connection(io::Error::new(
                io::ErrorKind::Other,
                format!("unexpected {:?} while {}", completion, state),
            ))),
        }
    }

    /// Add `n` written bytes to `sent`; true once `total` is reached
    fn consume(sent: &mut usize, total: usize, n: usize) -> Result<bool> {
        if n == 0 {
            return Err(ClamError::Connection(io::ErrorKind::WriteZero.into()));
        }
        *sent = (*sent + n).min(total);
        Ok(*sent == total)
    }

    fn transition(&mut self, next: SessionState, step: Step) -> Step {
        trace!(from = %self.state, to = %next, "session transition");
        self.state = next;
        step
    }

    fn fail(&mut self, error: ClamError) -> Step {
        debug!(state = %self.state, "session failed: {}", error);
        self.transition(SessionState::Failed, Step::Finish(Err(error)))
    }
}

/// Drive a session to completion over whatever `connect` yields
///
/// The socket is closed before the result is returned, on every path.
pub async fn drive<S, R, C>(connect: C, source: &mut R, timeout: Timeout) -> Result<ScanResult>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + Unpin + ?Sized,
    C: Future<Output = Result<AsyncConnection<S>>>,
{
    let mut session = StreamSession::new();
    let mut connect = Some(connect);
    let mut conn: Option<AsyncConnection<S>> = None;
    let mut deadline = None;
    let mut step = session.start();

    loop {
        let completion = match step {
            Step::Connect => match connect.take() {
                Some(pending) => match pending.await {
                    Ok(c) => {
                        conn = Some(c);
                        Completion::Connected
                    }
                    Err(e) => Completion::Failed(e),
                },
                None => Completion::Failed(ClamError::Connection(io::ErrorKind::NotConnected.into())),
            },
            Step::Write => match conn.as_mut() {
                Some(c) => match c.write(session.outgoing()).await {
                    Ok(n) => Completion::Wrote(n),
                    Err(e) => Completion::Failed(e),
                },
                None => Completion::Failed(ClamError::Connection(io::ErrorKind::NotConnected.into())),
            },
            Step::ReadSource => match read_source(source, session.source_buffer()).await {
                Ok(n) => Completion::SourceRead(n),
                Err(e) => Completion::Failed(ClamError::Source(e)),
            },
            Step::ReadResponse => {
                // The timeout covers the whole reply, not each read
                let deadline = *deadline
                    .get_or_insert_with(|| timeout.duration().map(|d| tokio::time::Instant::now() + d));
                match conn.as_mut() {
                    Some(c) => match c.read(session.response_buffer(), deadline, timeout).await {
                        Ok(n) => Completion::Received(n),
                        Err(e) => Completion::Failed(e),
                    },
                    None => Completion::Failed(ClamError::Connection(io::ErrorKind::NotConnected.into())),
                }
            }
            Step::Finish(result) => {
                if let Some(mut c) = conn.take() {
                    c.close().await;
                }
                return result;
            }
        };
        step = session.advance(completion);
    }
}

async fn read_source<R>(source: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    loop {
        match source.read(buf).await {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Scan `source` against `endpoint` without blocking a thread
pub async fn scan<R>(source: &mut R, endpoint: &Endpoint, timeout: Timeout) -> Result<ScanResult>
where
    R: AsyncRead + Unpin + ?Sized,
{
    drive(AsyncConnection::connect(endpoint), source, timeout).await
}
