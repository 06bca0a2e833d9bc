use thiserror::Error;

/// Result type for litehttp operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for litehttp
#[derive(Error, Debug)]
pub enum Error {
    /// Network-related errors reported by the HTTP transport
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// URL errors reported by the `url` crate when handing a request to the transport
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// URL errors reported by [`ParsedUrl::parse`](crate::request_url::ParsedUrl::parse)
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// HTTP protocol violations
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O errors while talking to the remote end or reading a body
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout errors
    #[error("Request timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// HTTP type construction errors
    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid request configuration
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Engine bookkeeping was corrupted: a task finished twice, a buffer
    /// was reset while views were still open, and the like
    #[error("Engine invariant violated: {0}")]
    Invariant(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with custom message
    #[error("{0}")]
    Custom(String),
}

/// Classification of a failed exchange, carried on a [`Response`](crate::Response)
/// instead of being raised across the task boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The request URL could not be used
    Url,
    /// The remote end violated the protocol
    Protocol,
    /// Connect/read timeout or connection failure
    Io,
    /// Anything else
    Unknown,
}

impl FailureKind {
    /// Short label used in failure messages
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Url => "invalid url",
            FailureKind::Protocol => "protocol",
            FailureKind::Io => "io",
            FailureKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Create a new timeout error
    pub fn timeout(duration: std::time::Duration) -> Self {
        Error::Timeout { duration }
    }

    /// Create a new URL error
    pub fn invalid_url(message: impl Into<String>) -> Self {
        Error::InvalidUrl(message.into())
    }

    /// Create a new protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(message.into())
    }

    /// Create a new invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Error::InvalidRequest(message.into())
    }

    /// Create a new invariant violation
    pub fn invariant(message: impl Into<String>) -> Self {
        Error::Invariant(message.into())
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Create a new custom error
    pub fn custom(message: impl Into<String>) -> Self {
        Error::Custom(message.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout { .. } => true,
            Error::Network(e) => e.is_timeout(),
            Error::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    /// Check if this is a network error
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    /// Check if this is an engine invariant violation
    pub fn is_invariant(&self) -> bool {
        matches!(self, Error::Invariant(_))
    }

    /// Get the underlying reqwest error if this is a network error
    pub fn as_network_error(&self) -> Option<&reqwest::Error> {
        match self {
            Error::Network(e) => Some(e),
            _ => None,
        }
    }

    /// Classify a transport error into the kind reported on the response
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Error::Url(_) | Error::InvalidUrl(_) => FailureKind::Url,
            Error::Protocol(_) | Error::Http(_) => FailureKind::Protocol,
            Error::Io(_) | Error::Timeout { .. } => FailureKind::Io,
            Error::Network(e) => {
                if e.is_builder() {
                    FailureKind::Url
                } else if e.is_decode() || e.is_redirect() {
                    FailureKind::Protocol
                } else if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
                    FailureKind::Io
                } else {
                    FailureKind::Unknown
                }
            }
            _ => FailureKind::Unknown,
        }
    }
}

impl From<http::header::InvalidHeaderName> for Error {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        Error::InvalidRequest(format!("Invalid header name: {}", err))
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Error::InvalidRequest(format!("Invalid header value: {}", err))
    }
}

impl From<http::method::InvalidMethod> for Error {
    fn from(err: http::method::InvalidMethod) -> Self {
        Error::InvalidRequest(format!("Invalid method: {}", err))
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Custom(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Custom(s.to_string())
    }
}

/// HTTP status code error
#[derive(Error, Debug)]
pub enum StatusError {
    /// Client error (4xx status codes)
    #[error("Client error: {status} - {message}")]
    Client { status: http::StatusCode, message: String },

    /// Server error (5xx status codes)
    #[error("Server error: {status} - {message}")]
    Server { status: http::StatusCode, message: String },

    /// The exchange never produced a status line
    #[error("Request failed ({kind}): {message}")]
    Failed { kind: FailureKind, message: String },
}

impl StatusError {
    /// Create a new client error
    pub fn client(status: http::StatusCode, message: impl Into<String>) -> Self {
        StatusError::Client {
            status,
            message: message.into(),
        }
    }

    /// Create a new server error
    pub fn server(status: http::StatusCode, message: impl Into<String>) -> Self {
        StatusError::Server {
            status,
            message: message.into(),
        }
    }

    /// Get the status code, if the exchange produced one
    pub fn status(&self) -> Option<http::StatusCode> {
        match self {
            StatusError::Client { status, .. } => Some(*status),
            StatusError::Server { status, .. } => Some(*status),
            StatusError::Failed { .. } => None,
        }
    }

    /// Check if this is a client error
    pub fn is_client_error(&self) -> bool {
        matches!(self, StatusError::Client { .. })
    }

    /// Check if this is a server error
    pub fn is_server_error(&self) -> bool {
        matches!(self, StatusError::Server { .. })
    }
}

impl From<StatusError> for Error {
    fn from(err: StatusError) -> Self {
        Error::Custom(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_classification() {
        assert_eq!(Error::invalid_url("bad").failure_kind(), FailureKind::Url);
        assert_eq!(Error::protocol("bad status line").failure_kind(), FailureKind::Protocol);
        assert_eq!(
            Error::timeout(std::time::Duration::from_secs(1)).failure_kind(),
            FailureKind::Io
        );
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(Error::from(io).failure_kind(), FailureKind::Io);
        assert_eq!(Error::custom("boom").failure_kind(), FailureKind::Unknown);
    }

    #[test]
    fn test_url_parse_error_is_url_failure() {
        let err: Error = url::Url::parse("http://[::1").unwrap_err().into();
        assert_eq!(err.failure_kind(), FailureKind::Url);
    }

    #[test]
    fn test_timeout_predicate() {
        assert!(Error::timeout(std::time::Duration::from_millis(5)).is_timeout());
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out");
        assert!(Error::from(io).is_timeout());
        assert!(!Error::custom("x").is_timeout());
    }

    #[test]
    fn test_status_error() {
        let err = StatusError::client(http::StatusCode::NOT_FOUND, "missing");
        assert!(err.is_client_error());
        assert_eq!(err.status(), Some(http::StatusCode::NOT_FOUND));

        let err = StatusError::Failed {
            kind: FailureKind::Io,
            message: "request on io error,http://h/".into(),
        };
        assert_eq!(err.status(), None);
        assert!(err.to_string().contains("io"));
    }
}
