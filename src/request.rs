use std::path::Path;
use std::time::Duration;

use http::header::{HeaderName, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method};

use crate::error::{Error, Result};
use crate::request_url::ParsedUrl;
use crate::timeout::TimeoutConfig;

/// Content type applied when a body is sent without one
pub const DEFAULT_BODY_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// HTTP request representation
///
/// Requests are immutable values once built. A task clones its request for
/// each chain execution, so filters are free to modify the copy they see.
#[derive(Clone)]
pub struct Request {
    method: Method,
    url: ParsedUrl,
    headers: HeaderMap,
    body: Option<RequestBody>,
    timeout_config: TimeoutConfig,
    retry_limit: u32,
}

impl Request {
    /// Create a new request builder
    pub fn builder() -> RequestBuilder {
        RequestBuilder::new()
    }

    /// Get the HTTP method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Get the URL
    pub fn url(&self) -> &ParsedUrl {
        &self.url
    }

    /// Get the headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get mutable access to headers
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Get the body
    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    /// Get the timeout configuration
    pub fn timeout_config(&self) -> &TimeoutConfig {
        &self.timeout_config
    }

    /// Number of retries the caller asked for. The engine itself never retries.
    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url.to_string())
            .field("headers", &self.headers)
            .field("body", &self.body)
            .finish()
    }
}

/// Request body: the encoded bytes plus the content type they were encoded as
#[derive(Clone, PartialEq, Eq)]
pub struct RequestBody {
    content_type: Option<String>,
    bytes: Vec<u8>,
}

impl RequestBody {
    /// Raw bytes with no declared content type
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type: None,
            bytes: bytes.into(),
        }
    }

    /// An empty body, for methods that need one but have nothing to send
    pub fn empty() -> Self {
        Self::bytes(Vec::new())
    }

    /// UTF-8 text
    pub fn text(text: &str) -> Self {
        Self::bytes(text.as_bytes()).with_content_type("text/plain; charset=utf-8")
    }

    /// JSON-serialized value
    pub fn json<T>(value: &T) -> Result<Self>
    where
        T: serde::Serialize,
    {
        let bytes = serde_json::to_vec(value)?;
        Ok(Self::bytes(bytes).with_content_type("application/json"))
    }

    /// URL-encoded form pairs, in the order given
    pub fn form<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in pairs {
            serializer.append_pair(key.as_ref(), value.as_ref());
        }
        Self::bytes(serializer.finish()).with_content_type(DEFAULT_BODY_CONTENT_TYPE)
    }

    /// The whole contents of a file
    pub fn file(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Ok(Self::bytes(bytes).with_content_type("application/octet-stream"))
    }

    /// Override the content type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Declared content type, if any
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Encoded length in bytes
    pub fn content_length(&self) -> usize {
        self.bytes.len()
    }

    /// Encoded bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBody")
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// `POST`, `PUT`, `PATCH` and the WebDAV `PROPPATCH`/`REPORT` must carry a body
pub fn requires_body(method: &Method) -> bool {
    matches!(
        method.as_str(),
        "POST" | "PUT" | "PATCH" | "PROPPATCH" | "REPORT"
    )
}

/// `GET` and `HEAD` must not carry a body
pub fn permits_body(method: &Method) -> bool {
    !matches!(method.as_str(), "GET" | "HEAD")
}

/// Builder for creating HTTP requests
///
/// Method/body combinations are checked in [`build`](RequestBuilder::build).
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: Method,
    url: Option<ParsedUrl>,
    headers: HeaderMap,
    body: Option<RequestBody>,
    timeout_config: TimeoutConfig,
    retry_limit: u32,
}

impl RequestBuilder {
    /// Create a new `GET` request builder with default timeouts
    pub fn new() -> Self {
        Self {
            method: Method::GET,
            url: None,
            headers: HeaderMap::new(),
            body: None,
            timeout_config: TimeoutConfig::default(),
            retry_limit: 0,
        }
    }

    /// Parse and set the URL
    pub fn url(mut self, url: &str) -> Result<Self> {
        self.url = Some(ParsedUrl::parse(url)?);
        Ok(self)
    }

    /// Set an already parsed URL
    pub fn parsed_url(mut self, url: ParsedUrl) -> Self {
        self.url = Some(url);
        self
    }

    /// Set the method and body together
    pub fn method(mut self, method: Method, body: Option<RequestBody>) -> Self {
        self.method = method;
        self.body = body;
        self
    }

    /// `GET` with no body
    pub fn get(self) -> Self {
        self.method(Method::GET, None)
    }

    /// `HEAD` with no body
    pub fn head(self) -> Self {
        self.method(Method::HEAD, None)
    }

    /// `POST` with a body
    pub fn post(self, body: RequestBody) -> Self {
        self.method(Method::POST, Some(body))
    }

    /// `PUT` with a body
    pub fn put(self, body: RequestBody) -> Self {
        self.method(Method::PUT, Some(body))
    }

    /// `PATCH` with a body
    pub fn patch(self, body: RequestBody) -> Self {
        self.method(Method::PATCH, Some(body))
    }

    /// `DELETE` with an empty body
    pub fn delete(self) -> Self {
        self.method(Method::DELETE, Some(RequestBody::empty()))
    }

    /// Set a header, appending to any existing values for the name
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = name.parse::<HeaderName>()?;
        let value = value.parse::<HeaderValue>()?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Set multiple headers
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers {
            if let Some(name) = name {
                self.headers.append(name, value);
            }
        }
        self
    }

    /// Replace the timeout configuration
    pub fn timeout_config(mut self, config: TimeoutConfig) -> Self {
        self.timeout_config = config;
        self
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_config = self.timeout_config.connect_timeout(timeout);
        self
    }

    /// Set the read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_config = self.timeout_config.read_timeout(timeout);
        self
    }

    /// Set the retry limit carried on the request
    pub fn retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    /// Build the request
    pub fn build(self) -> Result<Request> {
        let url = self
            .url
            .ok_or_else(|| Error::invalid_request("request has no URL"))?;

        if self.body.is_some() && !permits_body(&self.method) {
            return Err(Error::invalid_request(format!(
                "method {} must not have a request body",
                self.method
            )));
        }
        if self.body.is_none() && requires_body(&self.method) {
            return Err(Error::invalid_request(format!(
                "method {} must have a request body",
                self.method
            )));
        }

        let mut headers = self.headers;
        if let Some(body) = &self.body {
            if !headers.contains_key(CONTENT_TYPE) {
                let content_type = body.content_type().unwrap_or(DEFAULT_BODY_CONTENT_TYPE);
                headers.insert(CONTENT_TYPE, content_type.parse::<HeaderValue>()?);
            }
        }

        Ok(Request {
            method: self.method,
            url,
            headers,
            body: self.body,
            timeout_config: self.timeout_config,
            retry_limit: self.retry_limit,
        })
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}
