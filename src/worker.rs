use std::fmt;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};

use crate::error::{Error, Result};

/// How long an idle worker thread lingers before it is retired
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Threads driving sockets and timers for in-flight exchanges
pub const DEFAULT_IO_THREADS: usize = 2;

const MAX_WORKER_THREADS: usize = 4096;

/// Growable pool of worker threads owned by one engine
///
/// Tasks run on blocking threads that are spawned on demand and retired
/// after sitting idle for the keep-alive period. A small set of async
/// threads drives the network I/O those tasks wait on.
pub struct WorkerPool {
    runtime: Option<Runtime>,
    handle: Handle,
    keep_alive: Duration,
}

impl WorkerPool {
    /// Start a pool whose idle workers retire after `keep_alive`
    pub fn new(keep_alive: Duration, io_threads: usize) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(io_threads.max(1))
            .max_blocking_threads(MAX_WORKER_THREADS)
            .thread_keep_alive(keep_alive)
            .thread_name("litehttp-worker")
            .enable_all()
            .build()
            .map_err(|e| Error::config(format!("Failed to start worker pool: {}", e)))?;
        let handle = runtime.handle().clone();
        tracing::debug!(?keep_alive, io_threads, "worker pool started");
        Ok(Self {
            runtime: Some(runtime),
            handle,
            keep_alive,
        })
    }

    /// Handle to the runtime behind the pool
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Idle keep-alive for worker threads
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// Run `job` on a worker thread
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        spawn_on(&self.handle, job);
    }
}

/// Run `job` on a worker thread of the runtime behind `handle`
pub(crate) fn spawn_on<F>(handle: &Handle, job: F)
where
    F: FnOnce() + Send + 'static,
{
    drop(handle.spawn_blocking(job));
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
            tracing::debug!("worker pool shut down");
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}
