use std::io::Read;

use http::{HeaderMap, HeaderValue, Method, StatusCode};

use crate::buffer::{Buffer, BufferView};
use crate::error::{Error, FailureKind, Result, StatusError};
use crate::request::Request;

/// HTTP response representation
///
/// A response is delivered to the completion callback after the filter
/// chain has walked back over it. Transport failures do not surface as
/// errors: they arrive as a response with no status and a
/// [`failure`](Response::failure) kind instead.
///
/// The body is a [`BufferView`] over a pooled buffer. Reading or dropping the
/// response releases the buffer back to the engine.
#[derive(Debug)]
pub struct Response {
    method: Method,
    url: String,
    status: Option<StatusCode>,
    message: String,
    headers: HeaderMap,
    body: Option<BufferView>,
    failure: Option<FailureKind>,
    from_cache: bool,
}

impl Response {
    /// Create a response for `request` with the given status line and headers
    pub fn new(request: &Request, status: StatusCode, message: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            method: request.method().clone(),
            url: request.url().to_string(),
            status: Some(status),
            message: message.into(),
            headers,
            body: None,
            failure: None,
            from_cache: false,
        }
    }

    /// Create an error-shaped response for a request whose exchange failed
    pub fn failed(request: &Request, kind: FailureKind) -> Self {
        let url = request.url().to_string();
        Self {
            method: request.method().clone(),
            message: format!("request on {} error,{}", kind, url),
            url,
            status: None,
            headers: HeaderMap::new(),
            body: None,
            failure: Some(kind),
            from_cache: false,
        }
    }

    /// Attach a body
    pub fn with_body(mut self, body: BufferView) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach a body copied from `bytes` into a fresh unpooled buffer
    pub fn with_body_bytes(self, bytes: &[u8]) -> Self {
        let mut buffer = Buffer::with_capacity(bytes.len());
        buffer.write_bytes(bytes);
        self.with_body(buffer.into_view())
    }

    pub(crate) fn mark_from_cache(mut self) -> Self {
        self.from_cache = true;
        self
    }

    /// Method of the request that produced this response
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Rendered URL of the request that produced this response
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Get the HTTP status code, `None` if the exchange failed
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Reason phrase, or a description of the failure
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Failure kind if the transport could not complete the exchange
    pub fn failure(&self) -> Option<FailureKind> {
        self.failure
    }

    /// Whether the transport failed to complete the exchange
    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }

    /// Whether the response was served by the cache filter
    pub fn is_from_cache(&self) -> bool {
        self.from_cache
    }

    /// Get the response headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get mutable access to the response headers
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Get a specific header value
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    /// Get the content type
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Get the content length
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
    }

    /// Check if the response is successful (2xx status code)
    pub fn is_success(&self) -> bool {
        self.status.map_or(false, |s| s.is_success())
    }

    /// Check if the response is a client error (4xx status code)
    pub fn is_client_error(&self) -> bool {
        self.status.map_or(false, |s| s.is_client_error())
    }

    /// Check if the response is a server error (5xx status code)
    pub fn is_server_error(&self) -> bool {
        self.status.map_or(false, |s| s.is_server_error())
    }

    /// Check if the response indicates a redirect
    pub fn is_redirect(&self) -> bool {
        self.status.map_or(false, |s| s.is_redirection())
    }

    /// Raise an error for failed exchanges and bad status codes
    pub fn error_for_status(self) -> Result<Self> {
        if let Some(kind) = self.failure {
            return Err(Error::from(StatusError::Failed {
                kind,
                message: self.message,
            }));
        }
        match self.status {
            Some(status) if status.is_client_error() => Err(Error::from(StatusError::client(
                status,
                format!("Client error: {}", status),
            ))),
            Some(status) if status.is_server_error() => Err(Error::from(StatusError::server(
                status,
                format!("Server error: {}", status),
            ))),
            _ => Ok(self),
        }
    }

    /// The body view, if the response has one
    pub fn body(&self) -> Option<&BufferView> {
        self.body.as_ref()
    }

    /// Mutable access to the body view, for streaming reads
    pub fn body_mut(&mut self) -> Option<&mut BufferView> {
        self.body.as_mut()
    }

    /// Detach the body view from the response
    pub fn take_body(&mut self) -> Option<BufferView> {
        self.body.take()
    }

    /// Read the rest of the body
    pub fn bytes(mut self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        if let Some(mut body) = self.body.take() {
            body.read_to_end(&mut bytes)?;
            body.close();
        }
        Ok(bytes)
    }

    /// Read the rest of the body as UTF-8 text
    pub fn text(self) -> Result<String> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes).map_err(|e| Error::custom(format!("Response body is not UTF-8: {}", e)))
    }

    /// Deserialize the rest of the body as JSON
    pub fn json<T>(self) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let bytes = self.bytes()?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Request {
        Request::builder().url("http://example.com/a?x=1").unwrap().build().unwrap()
    }

    #[test]
    fn test_response_status_checks() {
        let response = Response::new(&request(), StatusCode::OK, "OK", HeaderMap::new());
        assert!(response.is_success());
        assert!(!response.is_client_error());
        assert!(!response.is_failure());
        assert_eq!(response.url(), "http://example.com/a?x=1");

        let response = Response::new(&request(), StatusCode::NOT_FOUND, "Not Found", HeaderMap::new());
        assert!(response.is_client_error());
        assert!(response.error_for_status().is_err());

        let response = Response::new(&request(), StatusCode::BAD_GATEWAY, "Bad Gateway", HeaderMap::new());
        assert!(response.is_server_error());
    }

    #[test]
    fn test_failed_response() {
        let response = Response::failed(&request(), FailureKind::Io);
        assert_eq!(response.status(), None);
        assert!(!response.is_success());
        assert_eq!(response.failure(), Some(FailureKind::Io));
        assert_eq!(response.message(), "request on io error,http://example.com/a?x=1");
        assert!(response.error_for_status().is_err());
    }

    #[test]
    fn test_body_readers() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        headers.insert("content-length", "11".parse().unwrap());
        let response = Response::new(&request(), StatusCode::OK, "OK", headers)
            .with_body_bytes(br#"{"ok":true}"#);
        assert_eq!(response.content_type(), Some("application/json"));
        assert_eq!(response.content_length(), Some(11));

        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["ok"], true);

        let response = Response::new(&request(), StatusCode::OK, "OK", HeaderMap::new())
            .with_body_bytes(b"plain");
        assert_eq!(response.text().unwrap(), "plain");

        let response = Response::new(&request(), StatusCode::NO_CONTENT, "No Content", HeaderMap::new());
        assert!(response.bytes().unwrap().is_empty());
    }

    #[test]
    fn test_streaming_body() {
        let mut response = Response::new(&request(), StatusCode::OK, "OK", HeaderMap::new())
            .with_body_bytes(b"0123456789");
        let body = response.body_mut().unwrap();
        let mut chunk = [0u8; 4];
        assert_eq!(body.read(&mut chunk).unwrap(), 4);
        assert_eq!(&chunk, b"0123");
        assert_eq!(response.bytes().unwrap(), b"456789");
    }
}
