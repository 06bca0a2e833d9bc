use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use http::header::AUTHORIZATION;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::request::Request;
use crate::response::Response;
use crate::task::Task;

/// Filter trait for intercepting requests and responses
///
/// Filters run in registration order on the way out and in reverse order on
/// the way back. A filter that returns `true` from
/// [`on_request`](Filter::on_request) becomes the pivot of the chain: no later
/// filter sees the request, and the filter is expected to produce a response
/// through [`FilterChain::handle_response`], either right away or later.
pub trait Filter: Send + Sync {
    /// Observe or rewrite the outgoing request. Return `true` to stop here.
    fn on_request(&self, chain: &mut FilterChain, request: &mut Request) -> bool;

    /// Observe or rewrite the response on its way back to the caller
    fn on_response(&self, chain: &FilterChain, response: &mut Response) {
        let _ = (chain, response);
    }

    /// Get the name of this filter
    fn name(&self) -> &str {
        "Unknown"
    }
}

/// Where a [`FilterChain`] is in its walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    /// Created, no request yet
    Ready,
    /// Walking forward over the request
    Forward,
    /// Forward walk stopped at the given pivot index
    StoppedAt(usize),
    /// Walking backward over the response
    Backward,
    /// Done; the callback has fired or the task was abandoned
    Completed,
}

/// Per-task cursor over the engine's filter list
///
/// The list itself is shared by every task; only the cursor and state belong
/// to the chain. The cursor is moved onto a filter before the filter runs, so
/// a pivot that answers reentrantly from inside `on_request` walks back over
/// exactly the filters that saw the request.
pub struct FilterChain {
    task: Arc<Task>,
    filters: Arc<[Arc<dyn Filter>]>,
    cursor: usize,
    state: ChainState,
}

impl FilterChain {
    /// Create a chain for `task` over `filters`
    pub fn new(task: Arc<Task>, filters: Arc<[Arc<dyn Filter>]>) -> Self {
        Self {
            task,
            filters,
            cursor: 0,
            state: ChainState::Ready,
        }
    }

    /// The task this chain runs
    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Whether the task has been canceled
    pub fn is_canceled(&self) -> bool {
        self.task.is_canceled()
    }

    /// Current state of the walk
    pub fn state(&self) -> ChainState {
        self.state
    }

    /// Index of the filter most recently entered
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Get the number of filters in the chain
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Check if the chain is empty
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Walk `request` forward until a filter stops it or the list runs out
    pub fn handle_request(&mut self, mut request: Request) {
        if self.state != ChainState::Ready {
            warn!(task = %self.task.id(), state = ?self.state, "request already sent through this chain");
            return;
        }
        if self.filters.is_empty() {
            warn!(task = %self.task.id(), "empty filter chain, request dropped");
            self.state = ChainState::Completed;
            return;
        }

        self.state = ChainState::Forward;
        let filters = Arc::clone(&self.filters);
        for (index, filter) in filters.iter().enumerate() {
            if self.task.is_canceled() {
                debug!(task = %self.task.id(), filter = filter.name(), "task canceled, abandoning request");
                self.state = ChainState::Completed;
                return;
            }

            self.cursor = index;
            trace!(task = %self.task.id(), filter = filter.name(), index, "request filter");
            let stop = filter.on_request(self, &mut request);
            if stop || self.state != ChainState::Forward {
                self.stop_at(index);
                return;
            }
        }
        self.stop_at(self.cursor);
    }

    /// Walk `response` back from the pivot and hand it to the task callback
    ///
    /// Only the first call has any effect.
    pub fn handle_response(&mut self, mut response: Response) {
        match self.state {
            ChainState::Forward | ChainState::StoppedAt(_) => {}
            state => {
                warn!(task = %self.task.id(), state = ?state, "response already handled, ignoring");
                return;
            }
        }

        self.state = ChainState::Backward;
        let filters = Arc::clone(&self.filters);
        for (index, filter) in filters[..=self.cursor].iter().enumerate().rev() {
            if self.task.is_canceled() {
                debug!(task = %self.task.id(), filter = filter.name(), "task canceled, abandoning response");
                self.state = ChainState::Completed;
                return;
            }
            trace!(task = %self.task.id(), filter = filter.name(), index, "response filter");
            filter.on_response(self, &mut response);
        }

        self.state = ChainState::Completed;
        if !self.task.complete(response) {
            debug!(task = %self.task.id(), "response not delivered");
        }
    }

    fn stop_at(&mut self, index: usize) {
        if self.state == ChainState::Forward {
            self.state = ChainState::StoppedAt(index);
        }
    }
}

/// Logging filter
pub struct LoggingFilter {
    level: log::Level,
    include_headers: bool,
}

impl LoggingFilter {
    /// Create a new logging filter
    pub fn new() -> Self {
        Self {
            level: log::Level::Info,
            include_headers: false,
        }
    }

    /// Set the log level
    pub fn level(mut self, level: log::Level) -> Self {
        self.level = level;
        self
    }

    /// Include headers in logs
    pub fn include_headers(mut self, include: bool) -> Self {
        self.include_headers = include;
        self
    }

    fn log_headers(&self, headers: &HeaderMap) {
        if self.include_headers {
            for (name, value) in headers {
                log::log!(self.level, "  {}: {}", name, value.to_str().unwrap_or(""));
            }
        }
    }
}

impl Default for LoggingFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for LoggingFilter {
    fn on_request(&self, _chain: &mut FilterChain, request: &mut Request) -> bool {
        log::log!(self.level, "{} {}", request.method(), request.url());
        self.log_headers(request.headers());
        false
    }

    fn on_response(&self, _chain: &FilterChain, response: &mut Response) {
        match response.status() {
            Some(status) if response.is_from_cache() => {
                log::log!(self.level, "Response: {} {} (cached)", status, response.url())
            }
            Some(status) => log::log!(self.level, "Response: {} {}", status, response.url()),
            None => log::log!(self.level, "Response: {}", response.message()),
        }
        self.log_headers(response.headers());
    }

    fn name(&self) -> &str {
        "Logging"
    }
}

/// Authentication filter
pub struct AuthFilter {
    auth_header: HeaderValue,
}

impl AuthFilter {
    /// Create a filter that sets `Authorization` to `auth_header`
    pub fn new(auth_header: &str) -> Result<Self> {
        let auth_header = auth_header.parse::<HeaderValue>()?;
        Ok(Self { auth_header })
    }

    /// Create filter with bearer token
    pub fn bearer(token: &str) -> Result<Self> {
        Self::new(&format!("Bearer {}", token))
    }

    /// Create filter with basic auth
    pub fn basic(username: &str, password: &str) -> Result<Self> {
        use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
        let credentials = format!("{}:{}", username, password);
        let encoded = BASE64.encode(credentials.as_bytes());
        Self::new(&format!("Basic {}", encoded))
    }
}

impl Filter for AuthFilter {
    fn on_request(&self, _chain: &mut FilterChain, request: &mut Request) -> bool {
        request.headers_mut().insert(AUTHORIZATION, self.auth_header.clone());
        false
    }

    fn name(&self) -> &str {
        "Authentication"
    }
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    responses: AtomicU64,
    failures: AtomicU64,
    cached: AtomicU64,
}

/// Counting filter. Clones share the same counters.
#[derive(Clone, Default)]
pub struct MetricsFilter {
    counters: Arc<Counters>,
}

/// Snapshot of a [`MetricsFilter`]'s counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Metrics {
    pub request_count: u64,
    pub response_count: u64,
    pub failure_count: u64,
    pub cached_count: u64,
}

impl MetricsFilter {
    /// Create a new metrics filter
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the total request count
    pub fn request_count(&self) -> u64 {
        self.counters.requests.load(Ordering::Relaxed)
    }

    /// Get all metrics
    pub fn metrics(&self) -> Metrics {
        Metrics {
            request_count: self.request_count(),
            response_count: self.counters.responses.load(Ordering::Relaxed),
            failure_count: self.counters.failures.load(Ordering::Relaxed),
            cached_count: self.counters.cached.load(Ordering::Relaxed),
        }
    }
}

impl Filter for MetricsFilter {
    fn on_request(&self, _chain: &mut FilterChain, _request: &mut Request) -> bool {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        false
    }

    fn on_response(&self, _chain: &FilterChain, response: &mut Response) {
        self.counters.responses.fetch_add(1, Ordering::Relaxed);
        if response.is_failure() {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
        }
        if response.is_from_cache() {
            self.counters.cached.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn name(&self) -> &str {
        "Metrics"
    }
}

/// Filter built from a pair of closures
pub struct CustomFilter<F, G> {
    request_processor: F,
    response_processor: G,
    name: String,
}

impl<F, G> CustomFilter<F, G>
where
    F: Fn(&mut Request) + Send + Sync + 'static,
    G: Fn(&mut Response) + Send + Sync + 'static,
{
    /// Create a new custom filter
    pub fn new(request_processor: F, response_processor: G, name: &str) -> Self {
        Self {
            request_processor,
            response_processor,
            name: name.to_string(),
        }
    }
}

impl<F, G> Filter for CustomFilter<F, G>
where
    F: Fn(&mut Request) + Send + Sync + 'static,
    G: Fn(&mut Response) + Send + Sync + 'static,
{
    fn on_request(&self, _chain: &mut FilterChain, request: &mut Request) -> bool {
        (self.request_processor)(request);
        false
    }

    fn on_response(&self, _chain: &FilterChain, response: &mut Response) {
        (self.response_processor)(response);
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct CachedResponse {
    stored_at: Instant,
    status: StatusCode,
    message: String,
    headers: HeaderMap,
    body: Vec<u8>,
}

/// TTL cache of successful GET responses
///
/// A fresh hit stops the chain and answers from memory, so the transport is
/// never called. Misses pass through and the response is stored on the way
/// back.
pub struct CacheFilter {
    entries: Mutex<HashMap<String, CachedResponse>>,
    ttl: Duration,
}

impl CacheFilter {
    /// Create a new caching filter
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Cache time to live
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of stored entries, fresh or not
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries().clear();
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CachedResponse>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cache_key(method: &Method, url: &str) -> String {
        format!("{}:{}", method, url)
    }

    fn lookup(&self, request: &Request) -> Option<Response> {
        let key = Self::cache_key(request.method(), &request.url().to_string());
        let mut entries = self.entries();
        let cached = entries.get(&key)?;
        if cached.stored_at.elapsed() >= self.ttl {
            entries.remove(&key);
            return None;
        }
        let response = Response::new(request, cached.status, cached.message.clone(), cached.headers.clone())
            .with_body_bytes(&cached.body)
            .mark_from_cache();
        Some(response)
    }
}

impl Filter for CacheFilter {
    fn on_request(&self, chain: &mut FilterChain, request: &mut Request) -> bool {
        if request.method() != Method::GET {
            return false;
        }
        match self.lookup(request) {
            Some(response) => {
                debug!(task = %chain.task().id(), url = %request.url(), "cache hit");
                chain.handle_response(response);
                true
            }
            None => false,
        }
    }

    fn on_response(&self, _chain: &FilterChain, response: &mut Response) {
        if response.method() != Method::GET || response.is_from_cache() || !response.is_success() {
            return;
        }
        let status = match response.status() {
            Some(status) => status,
            None => return,
        };
        let entry = CachedResponse {
            stored_at: Instant::now(),
            status,
            message: response.message().to_string(),
            headers: response.headers().clone(),
            body: response.body().map(|body| body.to_vec()).unwrap_or_default(),
        };
        let key = Self::cache_key(response.method(), response.url());
        self.entries().insert(key, entry);
    }

    fn name(&self) -> &str {
        "Cache"
    }
}
