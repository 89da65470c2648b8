//! HTTP/1.0 subset request parsing.
//!
//! # Responsibilities
//! - Extract method, request-target, and version from the request line
//! - Extract the `Host` header (with optional inline `:port`) when present
//! - Reduce absolute-URI targets to a bare path
//!
//! The subset stops here on purpose: no other headers, no body, no
//! transfer encodings.

/// Error type for request parsing.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    /// Head was not valid UTF-8 text.
    NotText,
    /// Request line had fewer than two fields.
    MalformedRequestLine,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::NotText => write!(f, "request head is not text"),
            ParseError::MalformedRequestLine => write!(f, "malformed request line"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Destination named by a `Host` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSpec {
    pub name: String,
    pub port: Option<u16>,
}

/// A parsed request head.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub version: String,
    pub host: Option<HostSpec>,
}

impl Request {
    /// Parse raw bytes accumulated up to and including the blank-line
    /// terminator.
    pub fn parse(head: &[u8]) -> Result<Self, ParseError> {
        let text = std::str::from_utf8(head).map_err(|_| ParseError::NotText)?;
        let mut lines = text.split("\r\n");

        let request_line = lines.next().unwrap_or("");
        let mut fields = request_line.split_whitespace();
        let method = fields.next().ok_or(ParseError::MalformedRequestLine)?;
        let target = fields.next().ok_or(ParseError::MalformedRequestLine)?;
        let version = fields.next().unwrap_or("HTTP/1.0");

        let host = lines.find_map(parse_host_line);
        let target = normalize_target(target, host.as_ref());

        Ok(Self {
            method: method.to_string(),
            target,
            version: version.to_string(),
            host,
        })
    }
}

/// Match a `Host:` header line, with or without a space after the colon.
/// The header name match is exact-case, per the protocol subset.
fn parse_host_line(line: &str) -> Option<HostSpec> {
    let value = line.strip_prefix("Host:")?.trim();
    if value.is_empty() {
        return None;
    }
    match value.split_once(':') {
        Some((name, port)) => Some(HostSpec {
            name: name.to_string(),
            port: port.trim().parse().ok(),
        }),
        None => Some(HostSpec {
            name: value.to_string(),
            port: None,
        }),
    }
}

/// Reduce an absolute-URI target to its path component.
///
/// Clients sending through a proxy may emit `GET http://host:port/path`;
/// the origin only ever sees the path.
fn normalize_target(target: &str, host: Option<&HostSpec>) -> String {
    if let Some(rest) = target.strip_prefix("http://") {
        return match rest.find('/') {
            Some(i) => rest[i..].to_string(),
            None => "/".to_string(),
        };
    }
    // A target that embeds the Host value without a scheme.
    if !target.starts_with('/') {
        if let Some(h) = host {
            if !h.name.is_empty() {
                if let Some(pos) = target.find(h.name.as_str()) {
                    let after = &target[pos + h.name.len()..];
                    let after = after.trim_start_matches(|c: char| c == ':' || c.is_ascii_digit());
                    return if after.starts_with('/') {
                        after.to_string()
                    } else {
                        "/".to_string()
                    };
                }
            }
        }
    }
    target.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_request_line() {
        let req = Request::parse(b"GET /index.html HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.target, "/index.html");
        assert_eq!(req.version, "HTTP/1.0");
        assert!(req.host.is_none());
    }

    #[test]
    fn test_host_with_port() {
        let req =
            Request::parse(b"GET /a HTTP/1.0\r\nHost: example.com:9091\r\n\r\n").unwrap();
        let host = req.host.unwrap();
        assert_eq!(host.name, "example.com");
        assert_eq!(host.port, Some(9091));
    }

    #[test]
    fn test_host_without_port_or_space() {
        let req = Request::parse(b"GET /a HTTP/1.0\r\nHost:example.com\r\n\r\n").unwrap();
        let host = req.host.unwrap();
        assert_eq!(host.name, "example.com");
        assert_eq!(host.port, None);
    }

    #[test]
    fn test_lowercase_host_header_ignored() {
        // The subset matches "Host:" exactly.
        let req = Request::parse(b"GET /a HTTP/1.0\r\nhost: example.com\r\n\r\n").unwrap();
        assert!(req.host.is_none());
    }

    #[test]
    fn test_absolute_uri_stripped() {
        let req = Request::parse(
            b"GET http://example.com:9091/files/a.txt HTTP/1.0\r\nHost: example.com:9091\r\n\r\n",
        )
        .unwrap();
        assert_eq!(req.target, "/files/a.txt");
    }

    #[test]
    fn test_host_embedded_target_stripped() {
        let req = Request::parse(
            b"GET example.com:9091/files/a.txt HTTP/1.0\r\nHost: example.com:9091\r\n\r\n",
        )
        .unwrap();
        assert_eq!(req.target, "/files/a.txt");
    }

    #[test]
    fn test_empty_request_line_rejected() {
        assert_eq!(
            Request::parse(b"\r\n\r\n").unwrap_err(),
            ParseError::MalformedRequestLine
        );
    }

    #[test]
    fn test_shbuff_method_passes_through() {
        let req = Request::parse(b"SHBUFF /img.jpg HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(req.method, "SHBUFF");
        assert_eq!(req.target, "/img.jpg");
    }
}
