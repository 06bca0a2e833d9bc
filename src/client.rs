use std::sync::Arc;
use std::time::Duration;

use http::Method;
use tokio::sync::oneshot;

use crate::buffer::{BufferPool, DEFAULT_POOL_CAPACITY};
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::filter::{CacheFilter, Filter};
use crate::request::{Request, RequestBody, RequestBuilder};
use crate::response::Response;
use crate::task::TaskHandle;
use crate::timeout::TimeoutConfig;
use crate::tls::TlsConfig;
use crate::transport::{DispatchFilter, HttpTransport, Transport};
use crate::worker::{WorkerPool, DEFAULT_IO_THREADS, DEFAULT_KEEP_ALIVE};

/// Default and minimum number of concurrently running tasks
pub const DEFAULT_MAX_RUNNING: usize = 10;

/// HTTP client engine
///
/// Requests are submitted as tasks. At most
/// [`max_running`](EngineConfig::max_running) tasks run at once, each on its
/// own worker thread; the rest wait in arrival order. Every task walks the
/// filter chain out to the transport and back, and its callback receives the
/// final response exactly once unless the task is canceled first.
///
/// Dropping the engine discards tasks still waiting for a slot; their
/// callbacks never fire. Tasks already running are left to finish on their
/// worker threads.
///
/// # Examples
///
/// ```no_run
/// use litehttp::Engine;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let engine = Engine::new()?;
///     let request = engine.get("http://httpbin.org/json")?.build()?;
///     let response = engine.execute(request).await?;
///     println!("Status: {:?}", response.status());
///     Ok(())
/// }
/// ```
pub struct Engine {
    dispatcher: Arc<Dispatcher>,
    buffers: BufferPool,
    config: EngineConfig,
    workers: WorkerPool,
}

impl Engine {
    /// Create an engine with default settings
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Create a new engine builder
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Start a request seeded with the engine's default timeouts
    pub fn request(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        Ok(Request::builder()
            .url(url)?
            .timeout_config(self.config.timeout_config)
            .method(method, None))
    }

    /// Create a GET request
    pub fn get(&self, url: &str) -> Result<RequestBuilder> {
        self.request(Method::GET, url)
    }

    /// Create a HEAD request
    pub fn head(&self, url: &str) -> Result<RequestBuilder> {
        self.request(Method::HEAD, url)
    }

    /// Create a DELETE request
    pub fn delete(&self, url: &str) -> Result<RequestBuilder> {
        Ok(self.request(Method::DELETE, url)?.delete())
    }

    /// Create a POST request
    pub fn post(&self, url: &str, body: RequestBody) -> Result<RequestBuilder> {
        Ok(self.request(Method::POST, url)?.post(body))
    }

    /// Create a PUT request
    pub fn put(&self, url: &str, body: RequestBody) -> Result<RequestBuilder> {
        Ok(self.request(Method::PUT, url)?.put(body))
    }

    /// Create a PATCH request
    pub fn patch(&self, url: &str, body: RequestBody) -> Result<RequestBuilder> {
        Ok(self.request(Method::PATCH, url)?.patch(body))
    }

    /// Wrap `request` in a task without scheduling it
    pub fn new_task<F>(&self, request: Request, callback: F) -> TaskHandle
    where
        F: FnOnce(Response) + Send + 'static,
    {
        self.dispatcher.new_task(request, callback)
    }

    /// Schedule a task. Enqueuing the same task again does nothing.
    pub fn enqueue(&self, handle: &TaskHandle) {
        self.dispatcher.enqueue(handle.task());
    }

    /// Create and schedule a task for `request`
    pub fn submit<F>(&self, request: Request, callback: F) -> TaskHandle
    where
        F: FnOnce(Response) + Send + 'static,
    {
        let handle = self.new_task(request, callback);
        self.enqueue(&handle);
        handle
    }

    /// Cancel a task
    ///
    /// A waiting task is dropped from the queue. A running task stops at the
    /// next filter boundary; an exchange already in flight is not interrupted,
    /// but its response is discarded.
    pub fn cancel(&self, handle: &TaskHandle) {
        self.dispatcher.cancel(handle.task());
    }

    /// Submit `request` and wait for its response
    ///
    /// Dropping the returned future cancels the task.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let (tx, rx) = oneshot::channel();
        let handle = self.submit(request, move |response| {
            let _ = tx.send(response);
        });
        let mut guard = CancelOnDrop {
            engine: self,
            handle: Some(handle),
        };
        let response = rx
            .await
            .map_err(|_| Error::custom("task finished without a response"));
        guard.handle = None;
        response
    }

    /// Number of tasks currently running
    pub fn running_count(&self) -> usize {
        self.dispatcher.running_count()
    }

    /// Number of tasks waiting for a running slot
    pub fn waiting_count(&self) -> usize {
        self.dispatcher.waiting_count()
    }

    /// Get the engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Pool that response bodies are buffered in
    pub fn buffer_pool(&self) -> &BufferPool {
        &self.buffers
    }

    /// Worker pool running the tasks
    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let discarded = self.dispatcher.discard_waiting();
        if discarded > 0 {
            tracing::warn!(discarded, running = self.running_count(), "engine dropped with tasks still waiting");
        } else {
            tracing::debug!(running = self.running_count(), "engine dropped");
        }
    }
}

struct CancelOnDrop<'a> {
    engine: &'a Engine,
    handle: Option<TaskHandle>,
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.engine.cancel(&handle);
        }
    }
}

/// Engine-wide settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    max_running: usize,
    keep_alive: Duration,
    io_threads: usize,
    buffer_pool_capacity: usize,
    timeout_config: TimeoutConfig,
    tls_config: TlsConfig,
    cache_ttl: Option<Duration>,
}

impl EngineConfig {
    /// Maximum number of concurrently running tasks
    pub fn max_running(&self) -> usize {
        self.max_running
    }

    /// Idle time after which a worker thread retires
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// Threads driving network I/O
    pub fn io_threads(&self) -> usize {
        self.io_threads
    }

    /// Number of idle body buffers kept for reuse
    pub fn buffer_pool_capacity(&self) -> usize {
        self.buffer_pool_capacity
    }

    /// Timeouts new requests start from
    pub fn timeout_config(&self) -> &TimeoutConfig {
        &self.timeout_config
    }

    /// TLS trust policy of the built-in transport
    pub fn tls_config(&self) -> &TlsConfig {
        &self.tls_config
    }

    /// TTL of the response cache, if enabled
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_running: DEFAULT_MAX_RUNNING,
            keep_alive: DEFAULT_KEEP_ALIVE,
            io_threads: DEFAULT_IO_THREADS,
            buffer_pool_capacity: DEFAULT_POOL_CAPACITY,
            timeout_config: TimeoutConfig::default(),
            tls_config: TlsConfig::default(),
            cache_ttl: None,
        }
    }
}

/// Builder for creating engines with custom configuration
///
/// # Examples
///
/// ```no_run
/// use litehttp::{EngineBuilder, LoggingFilter};
/// use std::time::Duration;
///
/// let engine = EngineBuilder::new()
///     .max_running(16)
///     .connect_timeout(Duration::from_secs(3))
///     .filter(LoggingFilter::new())
///     .build()
///     .unwrap();
/// ```
pub struct EngineBuilder {
    config: EngineConfig,
    filters: Vec<Arc<dyn Filter>>,
    transport: Option<Arc<dyn Transport>>,
}

impl EngineBuilder {
    /// Create a new engine builder
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            filters: Vec::new(),
            transport: None,
        }
    }

    /// Set the concurrency cap. Values below the default are raised to it.
    pub fn max_running(mut self, max_running: usize) -> Self {
        if max_running < DEFAULT_MAX_RUNNING {
            tracing::debug!(requested = max_running, used = DEFAULT_MAX_RUNNING, "max_running raised to minimum");
        }
        self.config.max_running = max_running.max(DEFAULT_MAX_RUNNING);
        self
    }

    /// Set how long idle worker threads linger
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.config.keep_alive = keep_alive;
        self
    }

    /// Set the number of threads driving network I/O
    pub fn io_threads(mut self, io_threads: usize) -> Self {
        self.config.io_threads = io_threads.max(1);
        self
    }

    /// Set how many idle body buffers are kept for reuse
    pub fn buffer_pool_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_pool_capacity = capacity;
        self
    }

    /// Set the default timeouts for new requests
    pub fn timeout_config(mut self, config: TimeoutConfig) -> Self {
        self.config.timeout_config = config;
        self
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_config = self.config.timeout_config.connect_timeout(timeout);
        self
    }

    /// Set the read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_config = self.config.timeout_config.read_timeout(timeout);
        self
    }

    /// Set TLS configuration
    pub fn tls_config(mut self, config: TlsConfig) -> Self {
        self.config.tls_config = config;
        self
    }

    /// Cache successful GET responses for `ttl`
    pub fn cache(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = Some(ttl);
        self
    }

    /// Append a filter. Filters run in the order they are added.
    pub fn filter<F>(self, filter: F) -> Self
    where
        F: Filter + 'static,
    {
        self.filter_arc(Arc::new(filter))
    }

    /// Append a shared filter
    pub fn filter_arc(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Replace the built-in HTTP transport
    pub fn transport<T>(mut self, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Build the engine
    pub fn build(self) -> Result<Engine> {
        let EngineBuilder {
            config,
            mut filters,
            transport,
        } = self;

        let workers = WorkerPool::new(config.keep_alive, config.io_threads)?;
        let transport: Arc<dyn Transport> = match transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(
                workers.handle().clone(),
                &config.timeout_config,
                &config.tls_config,
            )?),
        };

        if let Some(ttl) = config.cache_ttl {
            filters.push(Arc::new(CacheFilter::new(ttl)));
        }
        let buffers = BufferPool::new(config.buffer_pool_capacity);
        filters.push(Arc::new(DispatchFilter::new(Arc::clone(&transport), buffers.clone())));

        tracing::debug!(
            max_running = config.max_running,
            filters = filters.len(),
            transport = transport.name(),
            "engine built"
        );

        let dispatcher = Dispatcher::new(config.max_running, workers.handle().clone(), filters.into());
        Ok(Engine {
            dispatcher,
            buffers,
            config,
            workers,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportResponse;
    use http::{HeaderMap, StatusCode};

    struct Echo;

    impl Transport for Echo {
        fn execute(&self, request: &Request) -> Result<TransportResponse> {
            Ok(TransportResponse::from_bytes(
                StatusCode::OK,
                HeaderMap::new(),
                request.url().to_string(),
            ))
        }

        fn name(&self) -> &str {
            "Echo"
        }
    }

    #[test]
    fn test_builder_defaults() {
        let engine = EngineBuilder::new().transport(Echo).build().unwrap();
        let config = engine.config();
        assert_eq!(config.max_running(), DEFAULT_MAX_RUNNING);
        assert_eq!(config.keep_alive(), Duration::from_secs(60));
        assert_eq!(config.buffer_pool_capacity(), 8);
        assert_eq!(config.timeout_config(), &TimeoutConfig::default());
        assert!(config.cache_ttl().is_none());
    }

    #[test]
    fn test_max_running_is_floor_clamped() {
        let engine = EngineBuilder::new().max_running(2).transport(Echo).build().unwrap();
        assert_eq!(engine.config().max_running(), DEFAULT_MAX_RUNNING);

        let engine = EngineBuilder::new().max_running(32).transport(Echo).build().unwrap();
        assert_eq!(engine.config().max_running(), 32);
    }

    #[test]
    fn test_request_builders_use_engine_timeouts() {
        let engine = EngineBuilder::new()
            .connect_timeout(Duration::from_secs(1))
            .transport(Echo)
            .build()
            .unwrap();

        let request = engine.get("http://example.com/").unwrap().build().unwrap();
        assert_eq!(request.method(), &Method::GET);
        assert_eq!(request.timeout_config().get_connect_timeout(), Duration::from_secs(1));

        let request = engine
            .post("http://example.com/", RequestBody::text("hi"))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(request.method(), &Method::POST);
        assert!(engine.get("ftp://example.com/").is_err());
    }

    #[test]
    fn test_execute_from_synchronous_caller() {
        let engine = EngineBuilder::new().transport(Echo).build().unwrap();
        let request = engine.get("http://example.com/sync").unwrap().build().unwrap();

        let response = tokio_test::block_on(engine.execute(request)).unwrap();
        assert_eq!(response.text().unwrap(), "http://example.com/sync");
    }

    #[tokio::test]
    async fn test_execute_round_trip() {
        let engine = EngineBuilder::new().transport(Echo).build().unwrap();
        let request = engine.get("http://example.com/echo").unwrap().build().unwrap();

        let response = engine.execute(request).await.unwrap();
        assert_eq!(response.status(), Some(StatusCode::OK));
        assert_eq!(response.text().unwrap(), "http://example.com/echo");
    }
}
