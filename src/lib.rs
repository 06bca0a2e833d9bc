//! litehttp - a lightweight HTTP client engine
//!
//! Requests are wrapped in cancellable tasks and run on a growable pool of
//! worker threads, with a concurrency cap and a first-in first-out waiting
//! queue in front of it. Every task walks an ordered chain of filters out to
//! the transport and back, and response bodies land in pooled, reference
//! counted buffers.
//!
//! ## Features
//!
//! - **Admission control**: at most `max_running` tasks in flight, the rest
//!   admitted strictly in arrival order
//! - **Bidirectional filters** with cooperative cancellation
//! - **Pooled body buffers** read through counted views
//! - **Strict URL parsing** for `http` and `https`
//! - **Per-request timeouts** for connect and read
//! - **Gzip decoding** (`compression` feature)
//!
//! ## Quick Start
//!
//! ```no_run
//! use litehttp::{Engine, LoggingFilter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::builder().filter(LoggingFilter::new()).build()?;
//!
//!     let request = engine.get("http://httpbin.org/json")?.build()?;
//!     let response = engine.execute(request).await?;
//!
//!     println!("Status: {:?}", response.status());
//!     println!("Body: {}", response.text()?);
//!     Ok(())
//! }
//! ```
//!
//! Callbacks work without an async runtime on the caller's side:
//!
//! ```no_run
//! use litehttp::Engine;
//!
//! let engine = Engine::new().unwrap();
//! let request = engine.get("http://example.com/").unwrap().build().unwrap();
//! let handle = engine.submit(request, |response| {
//!     println!("{:?} {}", response.status(), response.url());
//! });
//! println!("submitted {}", handle.id());
//! ```

pub mod buffer;
pub mod client;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod request;
pub mod request_url;
pub mod response;
pub mod task;
pub mod timeout;
pub mod tls;
pub mod transport;
pub mod worker;

// Re-export main types for convenience
pub use buffer::{Buffer, BufferPool, BufferView};
pub use client::{Engine, EngineBuilder, EngineConfig, DEFAULT_MAX_RUNNING};
pub use dispatcher::{Admission, Admit};
pub use error::{Error, FailureKind, Result, StatusError};
pub use filter::{
    AuthFilter, CacheFilter, ChainState, CustomFilter, Filter, FilterChain, LoggingFilter, Metrics,
    MetricsFilter,
};
pub use request::{Request, RequestBody, RequestBuilder};
pub use request_url::{ParsedUrl, ParsedUrlBuilder, Scheme};
pub use response::Response;
pub use task::{Task, TaskHandle, TaskId};
pub use timeout::TimeoutConfig;
pub use tls::TlsConfig;
pub use transport::{DispatchFilter, HttpTransport, Transport, TransportResponse};
pub use worker::WorkerPool;

// Re-export common HTTP types
pub use http::{HeaderMap, HeaderValue, Method, StatusCode};
