//! Blocking client facade

use std::fs::File;
use std::io::Read;
use std::path::Path;

use clamstream_protocol::{ScanResult, VersionInfo};

use crate::config::Config;
use crate::endpoint::{Endpoint, Timeout};
use crate::error::{ClamError, Result};
use crate::{engine, query};

/// Talks to one daemon; every call opens and closes its own connection
#[derive(Debug, Clone, Default)]
pub struct ClamClient {
    endpoint: Endpoint,
    timeout: Timeout,
}

impl ClamClient {
    pub fn new(endpoint: Endpoint, timeout: Timeout) -> Self {
        Self { endpoint, timeout }
    }

    /// Client for the daemon named in `config`
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.endpoint(), config.timeout())
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn set_endpoint(&mut self, endpoint: Endpoint) {
        self.endpoint = endpoint;
    }

    pub fn timeout(&self) -> Timeout {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Timeout) {
        self.timeout = timeout;
    }

    /// Scan everything `source` yields, in chunks
    pub fn scan<R: Read>(&self, source: &mut R) -> Result<ScanResult> {
        engine::scan(source, &self.endpoint, self.timeout)
    }

    /// Scan an open file in a single chunk
    pub fn scan_file(&self, file: &File) -> Result<ScanResult> {
        engine::scan_file(file, &self.endpoint, self.timeout)
    }

    /// Open and scan the file at `path`
    ///
    /// With `direct` the file goes out as one chunk straight from its
    /// descriptor, otherwise it is streamed in chunks.
    pub fn scan_path(&self, path: &Path, direct: bool) -> Result<ScanResult> {
        let mut file = File::open(path).map_err(ClamError::Source)?;
        if direct {
            self.scan_file(&file)
        } else {
            self.scan(&mut file)
        }
    }

    pub fn ping(&self) -> bool {
        query::ping(&self.endpoint, self.timeout)
    }

    pub fn version(&self) -> Result<VersionInfo> {
        query::version(&self.endpoint, self.timeout)
    }
}
