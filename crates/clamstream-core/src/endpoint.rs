//! Daemon address and read timeout

use std::fmt;
use std::time::{Duration, Instant};

use clamstream_protocol::wire::{DEFAULT_HOST, DEFAULT_PORT};
use serde::{Deserialize, Serialize};

/// Where the daemon listens
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `(host, port)` pair accepted by `TcpStream::connect`
    pub fn addr(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Bound on waiting for a daemon reply; zero waits forever
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timeout(Duration);

impl Timeout {
    /// Never time out
    pub const UNBOUNDED: Timeout = Timeout(Duration::ZERO);

    pub const fn new(duration: Duration) -> Self {
        Self(duration)
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    pub fn is_unbounded(&self) -> bool {
        self.0.is_zero()
    }

    /// The bound, or `None` when unbounded
    pub fn duration(&self) -> Option<Duration> {
        if self.is_unbounded() {
            None
        } else {
            Some(self.0)
        }
    }

    /// Deadline for an operation starting now
    pub fn deadline(&self) -> Option<Instant> {
        self.duration().map(|d| Instant::now() + d)
    }

    pub fn as_millis(&self) -> u64 {
        u64::try_from(self.0.as_millis()).unwrap_or(u64::MAX)
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Self::new(duration)
    }
}

impl From<Timeout> for Duration {
    fn from(timeout: Timeout) -> Self {
        timeout.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_default() {
        let endpoint = Endpoint::default();
        assert_eq!(endpoint.to_string(), "localhost:3310");
        assert_eq!(endpoint.addr(), ("localhost", 3310));
    }

    #[test]
    fn test_zero_timeout_is_unbounded() {
        assert!(Timeout::from_millis(0).is_unbounded());
        assert_eq!(Timeout::UNBOUNDED.duration(), None);
        assert!(Timeout::UNBOUNDED.deadline().is_none());
    }

    #[test]
    fn test_timeout_deadline() {
        let timeout = Timeout::from_millis(250);
        assert_eq!(timeout.duration(), Some(Duration::from_millis(250)));
        assert_eq!(timeout.as_millis(), 250);
        assert!(timeout.deadline().unwrap() > Instant::now());
        assert_eq!(Timeout::new(Duration::from_millis(250)), timeout);
        assert_eq!(Timeout::from(Duration::from_millis(250)), timeout);
    }
}
