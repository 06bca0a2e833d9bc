use std::time::Duration;

/// Default time allowed to establish a connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(8);

/// Default time allowed to read the response once connected
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(6);

/// Connect and read timeouts applied to a request
///
/// Every request carries one of these. The engine-wide value set on the
/// [`EngineBuilder`](crate::EngineBuilder) is the starting point for new
/// requests, and individual requests may override either field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Connection establishment timeout
    pub connect_timeout: Duration,
    /// Read timeout
    pub read_timeout: Duration,
}

impl TimeoutConfig {
    /// Create a timeout configuration from explicit values
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout,
        }
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Get the connection timeout
    pub fn get_connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Get the read timeout
    pub fn get_read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Upper bound on a whole exchange: connect + read
    pub fn get_effective_timeout(&self) -> Duration {
        self.connect_timeout + self.read_timeout
    }

    /// Create a timeout configuration suitable for quick requests
    pub fn quick() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(3))
    }

    /// Create a timeout configuration suitable for long-running requests
    pub fn long() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(270))
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
    }
}
