//! In-process stand-in for clamd, speaking just enough of the protocol.

#![allow(dead_code)]

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use clamstream_core::Endpoint;

pub const VERSION_REPLY: &str = "ClamAV 0.98.1/19209/Wed Jun 10 08:23:45 2015";
pub const SIZE_LIMIT: usize = 64 * 1024;

/// How the daemon answers INSTREAM uploads
#[derive(Clone)]
pub enum Behavior {
    /// Verdict derived from the payload, see [`verdict`]
    Verdicts,
    /// Never answer; wait for the client to hang up
    Silent,
    /// Answer every command with these pieces, pausing between them
    Pieces(Vec<&'static [u8]>),
}

#[derive(Default)]
struct Stats {
    uploads: Mutex<Vec<Vec<u32>>>,
    hangups: AtomicUsize,
}

pub struct MockDaemon {
    endpoint: Endpoint,
    stats: Arc<Stats>,
}

impl MockDaemon {
    pub fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let stats = Arc::new(Stats::default());

        let accept_stats = Arc::clone(&stats);
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let behavior = behavior.clone();
                let stats = Arc::clone(&accept_stats);
                std::thread::spawn(move || {
                    let _ = handle(stream, &behavior, &stats);
                });
            }
        });

        Self {
            endpoint: Endpoint::new("127.0.0.1", port),
            stats,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    /// Chunk size prefixes of every finished upload, terminator included
    pub fn uploads(&self) -> Vec<Vec<u32>> {
        self.stats.uploads.lock().unwrap().clone()
    }

    /// Connections the client closed while the daemon was still waiting
    pub fn hangups(&self) -> usize {
        self.stats.hangups.load(Ordering::SeqCst)
    }

    /// Poll until `hangups() >= n` or two seconds pass
    pub fn wait_for_hangups(&self, n: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if self.hangups() >= n {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

/// An address nothing listens on
pub fn dead_endpoint() -> Endpoint {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    Endpoint::new("127.0.0.1", port)
}

/// Payload for a session the daemon will report as `name`, spread over
/// several chunks so that any interleaving would corrupt it
pub fn named_payload(name: &str, repeats: usize) -> Vec<u8> {
    format!("NAME:{}\n", name).repeat(repeats).into_bytes()
}

/// `NAME:<x>\n` repeated → `<x> FOUND` (or an error if the repeats differ),
/// anything containing `EICAR` → the test signature, otherwise clean
pub fn verdict(payload: &[u8]) -> String {
    if payload.len() > SIZE_LIMIT {
        return "INSTREAM size limit exceeded. ERROR".into();
    }

    if let Some(first) = payload.split(|&b| b == b'\n').next() {
        if let Some(name) = first.strip_prefix(b"NAME:") {
            let line_len = first.len() + 1;
            let consistent = payload.len() % line_len == 0
                && payload.chunks(line_len).all(|line| line[..first.len()] == *first);
            return if consistent {
                format!("stream: {} FOUND", String::from_utf8_lossy(name))
            } else {
                "CORRUPTED STREAM ERROR".into()
            };
        }
    }

    if payload.windows(5).any(|w| w == b"EICAR") {
        "stream: Eicar-Test-Signature FOUND".into()
    } else {
        "stream: OK".into()
    }
}

fn read_command(stream: &mut TcpStream) -> io::Result<Vec<u8>> {
    let mut command = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte)?;
        if byte[0] == 0 {
            return Ok(command);
        }
        command.push(byte[0]);
    }
}

fn read_upload(stream: &mut TcpStream) -> io::Result<(Vec<u32>, Vec<u8>)> {
    let mut sizes = Vec::new();
    let mut payload = Vec::new();
    loop {
        let mut prefix = [0u8; 4];
        stream.read_exact(&mut prefix)?;
        let len = u32::from_be_bytes(prefix);
        sizes.push(len);
        if len == 0 {
            return Ok((sizes, payload));
        }
        let start = payload.len();
        payload.resize(start + len as usize, 0);
        stream.read_exact(&mut payload[start..])?;
    }
}

fn send_pieces(stream: &mut TcpStream, pieces: &[&[u8]]) -> io::Result<()> {
    for piece in pieces {
        stream.write_all(piece)?;
        stream.flush()?;
        std::thread::sleep(Duration::from_millis(5));
    }
    Ok(())
}

fn handle(mut stream: TcpStream, behavior: &Behavior, stats: &Stats) -> io::Result<()> {
    let command = read_command(&mut stream)?;
    if command == b"zINSTREAM" {
        let (sizes, payload) = read_upload(&mut stream)?;
        stats.uploads.lock().unwrap().push(sizes);
        if let Behavior::Verdicts = behavior {
            return stream.write_all(format!("{}\0", verdict(&payload)).as_bytes());
        }
    }

    match behavior {
        Behavior::Pieces(pieces) => send_pieces(&mut stream, pieces),
        Behavior::Silent if command == b"zINSTREAM" => {
            let mut rest = Vec::new();
            stream.read_to_end(&mut rest)?;
            stats.hangups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        _ => match command.as_slice() {
            b"zPING" => stream.write_all(b"PONG\0"),
            b"zVERSION" => stream.write_all(format!("{}\0", VERSION_REPLY).as_bytes()),
            _ => stream.write_all(b"UNKNOWN COMMAND\0"),
        },
    }
}
