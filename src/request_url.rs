//! Absolute `http`/`https` URL parsing.
//!
//! [`ParsedUrl::parse`] is a single left-to-right scan with explicit
//! delimiter searches. It is intentionally forgiving about ports (an
//! unusable port falls back to the scheme default) and strict about the
//! scheme and the presence of an authority.

use std::fmt;
use std::str::FromStr;

use url::form_urlencoded;

use crate::error::{Error, Result};

/// Supported URL schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    /// The scheme name as it appears in a URL
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    /// Port used when the URL does not name a usable one
    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed absolute URL.
///
/// Query pairs keep the position of the first occurrence of each key; a
/// repeated key overwrites the earlier value in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    scheme: Scheme,
    host: String,
    port: u16,
    path: Vec<String>,
    query: Vec<(String, String)>,
    fragment: Option<String>,
}

impl ParsedUrl {
    /// Parse an absolute `http` or `https` URL
    pub fn parse(input: &str) -> Result<Self> {
        Parser::new(input).parse()
    }

    /// Start building a URL field by field
    pub fn builder() -> ParsedUrlBuilder {
        ParsedUrlBuilder::new()
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn is_https(&self) -> bool {
        self.scheme == Scheme::Https
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// The explicit port, or the scheme default
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Path segments in the order they were added
    pub fn path_segments(&self) -> &[String] {
        &self.path
    }

    /// Query pairs in insertion order
    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    /// Look up a query value by key
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    /// The joined path, always starting with `/`
    pub fn path(&self) -> String {
        let mut path = String::new();
        for segment in &self.path {
            if !segment.starts_with('/') {
                path.push('/');
            }
            path.push_str(segment);
        }
        if path.is_empty() {
            path.push('/');
        }
        path
    }
}

impl fmt::Display for ParsedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if self.port != self.scheme.default_port() {
            write!(f, ":{}", self.port)?;
        }
        for segment in &self.path {
            if !segment.starts_with('/') {
                f.write_str("/")?;
            }
            f.write_str(segment)?;
        }
        if !self.query.is_empty() {
            let query = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.query.iter())
                .finish();
            write!(f, "?{}", query)?;
        }
        if let Some(fragment) = self.fragment.as_deref().filter(|frag| !frag.is_empty()) {
            write!(f, "#{}", fragment)?;
        }
        Ok(())
    }
}

impl FromStr for ParsedUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ParsedUrl::parse(s)
    }
}

/// Builder for [`ParsedUrl`]
#[derive(Debug, Clone)]
pub struct ParsedUrlBuilder {
    scheme: Scheme,
    host: Option<String>,
    port: Option<u16>,
    path: Vec<String>,
    query: Vec<(String, String)>,
    fragment: Option<String>,
}

impl ParsedUrlBuilder {
    /// Create a builder for an `http` URL with no host yet
    pub fn new() -> Self {
        Self {
            scheme: Scheme::Http,
            host: None,
            port: None,
            path: Vec::new(),
            query: Vec::new(),
            fragment: None,
        }
    }

    pub fn scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set an explicit port. Without one the scheme default is used.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Append a path segment. Blank segments are ignored.
    pub fn path_segment(mut self, segment: &str) -> Self {
        self.push_path(segment);
        self
    }

    /// Add a query pair. Pairs with an empty key or value are ignored.
    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.push_query(key, value);
        self
    }

    pub fn fragment(mut self, fragment: impl Into<String>) -> Self {
        self.fragment = Some(fragment.into());
        self
    }

    fn push_path(&mut self, segment: &str) {
        let segment = segment.trim();
        if !segment.is_empty() {
            self.path.push(segment.to_string());
        }
    }

    fn push_query(&mut self, key: &str, value: &str) {
        if key.is_empty() || value.is_empty() {
            return;
        }
        let value = value.trim().to_string();
        match self.query.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.query.push((key.to_string(), value)),
        }
    }

    /// Build the URL. Fails if no host was set.
    pub fn build(self) -> Result<ParsedUrl> {
        let host = match self.host {
            Some(host) if !host.is_empty() => host,
            _ => return Err(Error::invalid_url("URL has no host")),
        };
        Ok(ParsedUrl {
            port: self.port.unwrap_or_else(|| self.scheme.default_port()),
            scheme: self.scheme,
            host,
            path: self.path,
            query: self.query,
            fragment: self.fragment,
        })
    }
}

impl Default for ParsedUrlBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn is_ascii_whitespace(b: u8) -> bool {
    matches!(b, b'\t' | b'\n' | 0x0c | b'\r' | b' ')
}

/// First position in `[pos, limit)` holding one of `delimiters`, or `limit`
fn delimiter_offset(input: &[u8], pos: usize, limit: usize, delimiters: &[u8]) -> usize {
    input[pos..limit]
        .iter()
        .position(|b| delimiters.contains(b))
        .map_or(limit, |i| pos + i)
}

/// Port in `0..=65535`, or `None` for anything else
fn parse_port(text: &str) -> Option<u16> {
    text.parse::<u32>().ok().and_then(|port| u16::try_from(port).ok())
}

struct Parser<'a> {
    input: &'a str,
    builder: ParsedUrlBuilder,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            builder: ParsedUrlBuilder::new(),
        }
    }

    fn parse(mut self) -> Result<ParsedUrl> {
        let input = self.input;
        let bytes = input.as_bytes();
        let mut pos = bytes
            .iter()
            .position(|b| !is_ascii_whitespace(*b))
            .unwrap_or(bytes.len());
        let limit = bytes
            .iter()
            .rposition(|b| !is_ascii_whitespace(*b))
            .map_or(pos, |i| i + 1);

        pos = self.scheme(pos, limit)?;

        let slashes = bytes[pos..limit]
            .iter()
            .take_while(|b| **b == b'/' || **b == b'\\')
            .count();
        if slashes < 2 {
            return Err(Error::invalid_url(format!(
                "Expected '//' and a host after the scheme in '{}'",
                &input[..limit]
            )));
        }
        pos += slashes;

        let authority_end = delimiter_offset(bytes, pos, limit, b"/\\?#");
        let colon = delimiter_offset(bytes, pos, authority_end, b":");
        self.builder.host = Some(input[pos..colon].to_string());
        if colon < authority_end {
            let port = &input[colon + 1..authority_end];
            self.builder.port = parse_port(port);
            if self.builder.port.is_none() {
                tracing::debug!(port, "unusable port, falling back to scheme default");
            }
        }
        pos = authority_end;

        let path_end = delimiter_offset(bytes, pos, limit, b"?#");
        self.builder.push_path(&input[pos..path_end]);
        pos = path_end;

        if pos < limit && bytes[pos] == b'?' {
            let query_end = delimiter_offset(bytes, pos, limit, b"#");
            for piece in input[pos + 1..query_end].split('&') {
                if let Some((key, value)) = piece.split_once('=') {
                    self.builder.push_query(key, value);
                }
            }
            pos = query_end;
        }

        if pos < limit && bytes[pos] == b'#' {
            self.builder.fragment = Some(input[pos + 1..limit].to_string());
        }

        self.builder.build()
    }

    fn scheme(&mut self, pos: usize, limit: usize) -> Result<usize> {
        let input = self.input;
        let rest = &input.as_bytes()[pos..limit];
        for scheme in [Scheme::Https, Scheme::Http] {
            let prefix = scheme.as_str().len();
            if rest.len() > prefix
                && rest[..prefix].eq_ignore_ascii_case(scheme.as_str().as_bytes())
                && rest[prefix] == b':'
            {
                self.builder.scheme = scheme;
                return Ok(pos + prefix + 1);
            }
        }
        match input[pos..limit].find(':') {
            Some(colon) => Err(Error::invalid_url(format!(
                "Expected URL scheme 'http' or 'https' but was '{}'",
                &input[pos..pos + colon]
            ))),
            None => Err(Error::invalid_url(
                "Expected URL scheme 'http' or 'https' but no colon was found",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_url() {
        let url = ParsedUrl::parse("http://example.com/api/v1?foo=bar&baz=qux#frag").unwrap();
        assert_eq!(url.scheme(), Scheme::Http);
        assert_eq!(url.host(), "example.com");
        assert_eq!(url.port(), 80);
        assert_eq!(url.path_segments(), ["/api/v1".to_string()]);
        assert_eq!(
            url.query_pairs(),
            [
                ("foo".to_string(), "bar".to_string()),
                ("baz".to_string(), "qux".to_string())
            ]
        );
        assert_eq!(url.fragment(), Some("frag"));
        assert_eq!(url.to_string(), "http://example.com/api/v1?foo=bar&baz=qux#frag");
    }

    #[test]
    fn test_invalid_port_falls_back_to_default() {
        let url = ParsedUrl::parse("http://h:99999/").unwrap();
        assert_eq!(url.host(), "h");
        assert_eq!(url.port(), 80);

        let url = ParsedUrl::parse("https://h:abc/x").unwrap();
        assert_eq!(url.port(), 443);

        let url = ParsedUrl::parse("https://h:/x").unwrap();
        assert_eq!(url.port(), 443);
    }

    #[test]
    fn test_explicit_port() {
        let url = ParsedUrl::parse("https://api.example.com:8443/v2").unwrap();
        assert_eq!(url.port(), 8443);
        assert_eq!(url.to_string(), "https://api.example.com:8443/v2");

        let url = ParsedUrl::parse("http://h:0").unwrap();
        assert_eq!(url.port(), 0);
    }

    #[test]
    fn test_malformed_query_pairs_are_dropped() {
        let url = ParsedUrl::parse("http://h/?a=1&bad&b=2").unwrap();
        assert_eq!(url.query("a"), Some("1"));
        assert_eq!(url.query("b"), Some("2"));
        assert_eq!(url.query("bad"), None);
        assert_eq!(url.query_pairs().len(), 2);
    }

    #[test]
    fn test_query_splits_on_first_equals_only() {
        let url = ParsedUrl::parse("http://h/p?token=a=b&empty=&=x").unwrap();
        assert_eq!(url.query_pairs(), [("token".to_string(), "a=b".to_string())]);
    }

    #[test]
    fn test_duplicate_query_key_keeps_first_position() {
        let url = ParsedUrl::parse("http://h/?a=1&b=2&a=3").unwrap();
        assert_eq!(
            url.query_pairs(),
            [
                ("a".to_string(), "3".to_string()),
                ("b".to_string(), "2".to_string())
            ]
        );
    }

    #[test]
    fn test_query_without_fragment() {
        let url = ParsedUrl::parse("http://h/search?q=rust").unwrap();
        assert_eq!(url.query("q"), Some("rust"));
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn test_scheme_is_case_insensitive_and_whitespace_trimmed() {
        let url = ParsedUrl::parse("  \tHTTPS://Example.com/a \r\n").unwrap();
        assert!(url.is_https());
        assert_eq!(url.host(), "Example.com");
        assert_eq!(url.path_segments(), ["/a".to_string()]);
    }

    #[test]
    fn test_rejects_other_schemes() {
        let err = ParsedUrl::parse("ftp://example.com/file").unwrap_err();
        assert!(err.to_string().contains("'ftp'"));
        assert!(ParsedUrl::parse("example.com").is_err());
        assert!(ParsedUrl::parse("").is_err());
    }

    #[test]
    fn test_rejects_missing_authority() {
        let err = ParsedUrl::parse("http:/example.com").unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)));
        assert!(ParsedUrl::parse("https:example.com").is_err());
    }

    #[test]
    fn test_backslashes_count_as_slashes() {
        let url = ParsedUrl::parse("http:\\\\h\\x").unwrap();
        assert_eq!(url.host(), "h");
        assert_eq!(url.path_segments(), ["\\x".to_string()]);
    }

    #[test]
    fn test_host_only() {
        let url = ParsedUrl::parse("http://example.com").unwrap();
        assert!(url.path_segments().is_empty());
        assert_eq!(url.path(), "/");
        assert_eq!(url.to_string(), "http://example.com");

        let url = ParsedUrl::parse("http://example.com#top").unwrap();
        assert_eq!(url.fragment(), Some("top"));
    }

    #[test]
    fn test_render_encodes_query() {
        let url = ParsedUrl::builder()
            .scheme(Scheme::Https)
            .host("h")
            .path_segment("search")
            .query("q", "a b&c")
            .build()
            .unwrap();
        assert_eq!(url.to_string(), "https://h/search?q=a+b%26c");
    }

    #[test]
    fn test_builder_requires_host() {
        assert!(ParsedUrl::builder().build().is_err());
        let url = ParsedUrl::builder().host("h").port(8080).build().unwrap();
        assert_eq!(url.to_string(), "http://h:8080");
    }
}
