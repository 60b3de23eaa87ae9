//! Worker pool running many asynchronous scans at once

use std::future::Future;
use std::io;
use std::path::PathBuf;

use clamstream_protocol::{ScanResult, VersionInfo};
use parking_lot::{Mutex, RwLock};
use tokio::io::AsyncRead;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{default_workers, Config};
use crate::endpoint::{Endpoint, Timeout};
use crate::error::{ClamError, Result};
use crate::{query, session};

/// Invokes the wrapped callback exactly once: with the outcome, or with
/// `Cancelled` if the session is dropped before finishing.
struct Callback<F>
where
    F: FnOnce(Result<ScanResult>),
{
    inner: Option<F>,
}

impl<F> Callback<F>
where
    F: FnOnce(Result<ScanResult>),
{
    fn new(callback: F) -> Self {
        Self {
            inner: Some(callback),
        }
    }

    fn complete(mut self, result: Result<ScanResult>) {
        if let Some(callback) = self.inner.take() {
            callback(result);
        }
    }
}

impl<F> Drop for Callback<F>
where
    F: FnOnce(Result<ScanResult>),
{
    fn drop(&mut self) {
        if let Some(callback) = self.inner.take() {
            callback(Err(ClamError::Cancelled));
        }
    }
}

/// Client that scans without blocking the caller
///
/// Owns a fixed-size worker pool; each scan runs as an independent session on
/// it and reports through a callback, which may run on any worker thread.
/// Call [`AsyncClient::close`] to wait for outstanding scans. Dropping the
/// client instead cancels them.
pub struct AsyncClient {
    runtime: Option<Runtime>,
    endpoint: RwLock<Endpoint>,
    timeout: RwLock<Timeout>,
    sessions: Mutex<Vec<JoinHandle<()>>>,
    workers: usize,
}

impl AsyncClient {
    /// Pool sized to the available parallelism
    pub fn new(endpoint: Endpoint, timeout: Timeout) -> Result<Self> {
        Self::with_workers(endpoint, timeout, default_workers())
    }

    /// Pool with a fixed number of worker threads
    pub fn with_workers(endpoint: Endpoint, timeout: Timeout, workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name("clamstream-worker")
            .enable_all()
            .build()
            .map_err(ClamError::Runtime)?;

        debug!(%endpoint, workers, "worker pool started");

        Ok(Self {
            runtime: Some(runtime),
            endpoint: RwLock::new(endpoint),
            timeout: RwLock::new(timeout),
            sessions: Mutex::new(Vec::new()),
            workers,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_workers(
            config.endpoint(),
            config.timeout(),
            config.scanner.worker_threads(),
        )
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.read().clone()
    }

    /// Rebinds scans submitted from now on; in-flight scans keep their endpoint
    pub fn set_endpoint(&self, endpoint: Endpoint) {
        *self.endpoint.write() = endpoint;
    }

    pub fn timeout(&self) -> Timeout {
        *self.timeout.read()
    }

    pub fn set_timeout(&self, timeout: Timeout) {
        *self.timeout.write() = timeout;
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Scan `source` in the background; `callback` receives the outcome once
    pub fn scan<R, F>(&self, source: R, callback: F)
    where
        R: AsyncRead + Unpin + Send + 'static,
        F: FnOnce(Result<ScanResult>) + Send + 'static,
    {
        let endpoint = self.endpoint();
        let timeout = self.timeout();
        let callback = Callback::new(callback);

        self.spawn(async move {
            let mut source = source;
            let result = session::scan(&mut source, &endpoint, timeout).await;
            drop(source);
            callback.complete(result);
        });
    }

    /// Open the file at `path` on the pool and scan it
    pub fn scan_path<F>(&self, path: impl Into<PathBuf>, callback: F)
    where
        F: FnOnce(Result<ScanResult>) + Send + 'static,
    {
        let path = path.into();
        let endpoint = self.endpoint();
        let timeout = self.timeout();
        let callback = Callback::new(callback);

        self.spawn(async move {
            let result = match tokio::fs::File::open(&path).await {
                Ok(mut file) => session::scan(&mut file, &endpoint, timeout).await,
                Err(e) => Err(ClamError::Source(e)),
            };
            callback.complete(result);
        });
    }

    fn spawn<T>(&self, task: T)
    where
        T: Future<Output = ()> + Send + 'static,
    {
        // Unreachable once closed; dropping the task still fires its callback
        let Some(runtime) = self.runtime.as_ref() else {
            return;
        };

        let handle = runtime.spawn(task);
        let mut sessions = self.sessions.lock();
        sessions.retain(|h| !h.is_finished());
        sessions.push(handle);
    }

    /// Scans submitted but not yet finished
    pub fn in_flight(&self) -> usize {
        self.sessions.lock().iter().filter(|h| !h.is_finished()).count()
    }

    pub fn ping(&self) -> bool {
        query::ping(&self.endpoint(), self.timeout())
    }

    pub fn version(&self) -> Result<VersionInfo> {
        query::version(&self.endpoint(), self.timeout())
    }

    /// Wait for outstanding scans, then stop the pool
    ///
    /// The wait is bounded by the client timeout (zero waits forever). Scans
    /// still running when it expires are cancelled and `Timeout` is returned.
    /// Inside an async context the wait moves to a dedicated thread, since the
    /// pool's runtime cannot be entered from another runtime's thread.
    pub fn close(mut self) -> Result<()> {
        let Some(runtime) = self.runtime.take() else {
            return Ok(());
        };

        let handles = std::mem::take(&mut *self.sessions.lock());
        let timeout = self.timeout();
        let outstanding = handles.len();

        let wait = move || {
            let drained = runtime.block_on(async move {
                let all = async move {
                    for handle in handles {
                        if let Err(e) = handle.await {
                            warn!("scan task ended abnormally: {}", e);
                        }
                    }
                };
                match timeout.duration() {
                    Some(limit) => tokio::time::timeout(limit, all).await.is_ok(),
                    None => {
                        all.await;
                        true
                    }
                }
            });
            runtime.shutdown_background();
            drained
        };

        let drained = if tokio::runtime::Handle::try_current().is_ok() {
            std::thread::Builder::new()
                .name("clamstream-close".into())
                .spawn(wait)
                .map_err(ClamError::Runtime)?
                .join()
                .map_err(|_| {
                    ClamError::Runtime(io::Error::new(
                        io::ErrorKind::Other,
                        "pool shutdown thread panicked",
                    ))
                })?
        } else {
            wait()
        };

        debug!(outstanding, drained, "worker pool stopped");

        if drained {
            Ok(())
        } else {
            Err(ClamError::Timeout(timeout.into()))
        }
    }
}

impl Drop for AsyncClient {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            debug!("worker pool dropped without close; cancelling scans");
            runtime.shutdown_background();
        }
    }
}
