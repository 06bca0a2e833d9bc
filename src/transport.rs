use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;

use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING};
use http::{HeaderMap, StatusCode};
use reqwest::Client as ReqwestClient;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::buffer::BufferPool;
use crate::error::{Error, Result};
use crate::filter::{Filter, FilterChain};
use crate::request::Request;
use crate::response::Response;
use crate::timeout::TimeoutConfig;
use crate::tls::TlsConfig;

/// Buffer size used for gzip bodies, whose decoded length is unknown
pub const GZIP_BUFFER_SIZE: usize = 32 * 1024;

/// Buffer size used when the server sends no content length
pub const DEFAULT_BODY_BUFFER_SIZE: usize = 8 * 1024;

/// Smallest buffer handed to a body
pub const MIN_BODY_BUFFER_SIZE: usize = 1024;

/// Largest up-front allocation made on the strength of a content length
pub const MAX_BODY_PREALLOCATION: usize = 4 * 1024 * 1024;

const COPY_CHUNK_SIZE: usize = 1024;

/// Outcome of one exchange, before the body is buffered
pub struct TransportResponse {
    /// Status code
    pub status: StatusCode,
    /// Reason phrase
    pub message: String,
    /// Response headers
    pub headers: HeaderMap,
    /// Declared body length, if any
    pub content_length: Option<u64>,
    /// Whether the body was gzip-encoded on the wire
    pub gzip: bool,
    /// Decoded body stream
    pub body: Box<dyn Read + Send>,
}

impl TransportResponse {
    /// Response with an in-memory body
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        Self {
            status,
            message: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            content_length: Some(body.len() as u64),
            gzip: false,
            body: Box::new(io::Cursor::new(body)),
        }
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("message", &self.message)
            .field("content_length", &self.content_length)
            .field("gzip", &self.gzip)
            .finish()
    }
}

/// Transport trait for HTTP exchanges
///
/// Implementations are called synchronously from a worker thread and may
/// block it for the whole exchange. They must not be called from async code.
pub trait Transport: Send + Sync {
    /// Perform the exchange for `request`
    fn execute(&self, request: &Request) -> Result<TransportResponse>;

    /// Get the transport name/type
    fn name(&self) -> &str;
}

/// Default HTTP transport implementation using reqwest
///
/// Each exchange is driven on the engine runtime through `handle`, blocking
/// the calling worker thread until the headers arrive. The body is pulled
/// chunk by chunk as it is read.
pub struct HttpTransport {
    client: ReqwestClient,
    handle: Handle,
}

impl HttpTransport {
    /// Create a transport driven by `handle`
    pub fn new(handle: Handle, timeouts: &TimeoutConfig, tls: &TlsConfig) -> Result<Self> {
        let builder = ReqwestClient::builder().connect_timeout(timeouts.get_connect_timeout());
        let client = tls.apply_to_builder(builder)?.build()?;
        Ok(Self { client, handle })
    }

    /// Get the underlying reqwest client
    pub fn client(&self) -> &ReqwestClient {
        &self.client
    }

    fn build_request(&self, request: &Request) -> Result<reqwest::Request> {
        let url = url::Url::parse(&request.url().to_string())?;
        let mut builder = self
            .client
            .request(request.method().clone(), url)
            .headers(request.headers().clone());
        if cfg!(feature = "compression") && !request.headers().contains_key(ACCEPT_ENCODING) {
            builder = builder.header(ACCEPT_ENCODING, "gzip");
        }
        if let Some(body) = request.body() {
            builder = builder.body(body.as_bytes().to_vec());
        }
        Ok(builder.build()?)
    }
}

impl Transport for HttpTransport {
    fn execute(&self, request: &Request) -> Result<TransportResponse> {
        let outgoing = self.build_request(request)?;
        let timeouts = *request.timeout_config();
        let limit = timeouts.get_effective_timeout();

        let response = self
            .handle
            .block_on(async { tokio::time::timeout(limit, self.client.execute(outgoing)).await })
            .map_err(|_| Error::timeout(limit))??;

        let status = response.status();
        let headers = response.headers().clone();
        let content_length = response.content_length();
        let gzip = headers
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |v| v.trim().eq_ignore_ascii_case("gzip"));
        debug!(%status, ?content_length, gzip, "response headers received");

        let reader = ChunkReader {
            handle: self.handle.clone(),
            response,
            read_timeout: timeouts.get_read_timeout(),
            pending: Vec::new(),
            offset: 0,
            done: false,
        };

        Ok(TransportResponse {
            status,
            message: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            content_length,
            gzip,
            body: decode_body(reader, gzip),
        })
    }

    fn name(&self) -> &str {
        "HTTP/1.1"
    }
}

#[cfg(feature = "compression")]
fn decode_body(reader: ChunkReader, gzip: bool) -> Box<dyn Read + Send> {
    if gzip {
        Box::new(flate2::read::GzDecoder::new(reader))
    } else {
        Box::new(reader)
    }
}

#[cfg(not(feature = "compression"))]
fn decode_body(reader: ChunkReader, _gzip: bool) -> Box<dyn Read + Send> {
    Box::new(reader)
}

/// Blocking reader over a reqwest body; each chunk must arrive within the read timeout
struct ChunkReader {
    handle: Handle,
    response: reqwest::Response,
    read_timeout: Duration,
    pending: Vec<u8>,
    offset: usize,
    done: bool,
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.offset == self.pending.len() {
            if self.done {
                return Ok(0);
            }
            let read_timeout = self.read_timeout;
            let response = &mut self.response;
            let next = self
                .handle
                .block_on(async { tokio::time::timeout(read_timeout, response.chunk()).await });
            match next {
                Ok(Ok(Some(chunk))) => {
                    self.pending = chunk.to_vec();
                    self.offset = 0;
                }
                Ok(Ok(None)) => self.done = true,
                Ok(Err(e)) => return Err(io::Error::new(io::ErrorKind::Other, e)),
                Err(_) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "timed out reading response body"))
                }
            }
        }

        let count = buf.len().min(self.pending.len() - self.offset);
        buf[..count].copy_from_slice(&self.pending[self.offset..self.offset + count]);
        self.offset += count;
        Ok(count)
    }
}

/// Terminal filter: performs the exchange and buffers the body
///
/// Always the last filter of a chain. Transport errors become a failed
/// response, so the callback still fires.
pub struct DispatchFilter {
    transport: Arc<dyn Transport>,
    buffers: BufferPool,
}

impl DispatchFilter {
    /// Create the terminal filter over `transport`, buffering bodies from `buffers`
    pub fn new(transport: Arc<dyn Transport>, buffers: BufferPool) -> Self {
        Self { transport, buffers }
    }

    /// Run the exchange, folding any error into a failed response
    pub fn exchange(&self, request: &Request) -> Response {
        match self.transport.execute(request).and_then(|r| self.buffer_body(request, r)) {
            Ok(response) => response,
            Err(e) => {
                let kind = e.failure_kind();
                warn!(transport = self.transport.name(), url = %request.url(), error = %e, kind = %kind, "request failed");
                Response::failed(request, kind)
            }
        }
    }

    fn buffer_body(&self, request: &Request, exchange: TransportResponse) -> Result<Response> {
        let TransportResponse {
            status,
            message,
            headers,
            content_length,
            gzip,
            mut body,
        } = exchange;

        let mut buffer = self.buffers.acquire(body_buffer_size(content_length, gzip));
        let mut chunk = [0u8; COPY_CHUNK_SIZE];
        loop {
            match body.read(&mut chunk) {
                Ok(0) => break,
                Ok(count) => buffer.write_bytes(&chunk[..count]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Response::new(request, status, message, headers).with_body(buffer.into_view()))
    }
}

/// Initial buffer size for a body of the given declared length
pub fn body_buffer_size(content_length: Option<u64>, gzip: bool) -> usize {
    if gzip {
        return GZIP_BUFFER_SIZE;
    }
    let declared = content_length
        .map(|len| usize::try_from(len).unwrap_or(usize::MAX))
        .unwrap_or(DEFAULT_BODY_BUFFER_SIZE);
    declared.clamp(MIN_BODY_BUFFER_SIZE, MAX_BODY_PREALLOCATION)
}

impl Filter for DispatchFilter {
    fn on_request(&self, chain: &mut FilterChain, request: &mut Request) -> bool {
        let response = self.exchange(request);
        chain.handle_response(response);
        true
    }

    fn name(&self) -> &str {
        "Dispatch"
    }
}
