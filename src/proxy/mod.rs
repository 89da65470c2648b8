//! Reverse proxy: forwards requests to an origin, over a socket or over
//! shared memory.
//!
//! # Data Flow
//! ```text
//! parsed request
//!     → destination (Host header, else configured default)
//!     → transport choice (registered local origin? → shared memory)
//!     → upstream fetch (socket, or SHBUFF handshake + slot receive)
//!     → optional image alteration (200 + image extension)
//!     → response bytes to client
//! ```
//!
//! # Design Decisions
//! - Upstream failures and timeouts become a 502; a worker is never
//!   parked past the configured timeout on a dead upstream
//! - The shared path still opens a socket: the request and the slot index
//!   travel over it, only the response body moves through shared memory

pub mod transform;
pub mod upstream;

use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use crate::http::engine::BodySource;
use crate::http::request::{HostSpec, Request};
use crate::http::response;
use crate::net::Connection;
use crate::origin::SHBUFF_METHOD;
use crate::shm::{ServerRegistry, SlotId, SlotPool};

pub use transform::{is_image_target, ImageFilter, RemoteTranscoder};
pub use upstream::UpstreamError;

/// Proxy body source.
pub struct ProxyService {
    default_host: String,
    default_port: u16,
    timeout: Duration,
    registry: Option<Arc<ServerRegistry>>,
    slots: Option<Arc<SlotPool>>,
    filter: Option<Arc<dyn ImageFilter>>,
    local_addrs: Vec<IpAddr>,
}

impl ProxyService {
    pub fn new(
        default_host: impl Into<String>,
        default_port: u16,
        timeout: Duration,
        registry: Option<Arc<ServerRegistry>>,
        slots: Option<Arc<SlotPool>>,
        filter: Option<Arc<dyn ImageFilter>>,
    ) -> Self {
        Self {
            default_host: default_host.into(),
            default_port,
            timeout,
            registry,
            slots,
            filter,
            local_addrs: local_interface_addrs(),
        }
    }

    /// Destination host and port: explicit Host header, with its own
    /// optional port, overrides the configured default.
    fn destination<'a>(&'a self, req: &'a Request) -> (&'a str, u16) {
        match &req.host {
            Some(HostSpec { name, port }) => (name.as_str(), port.unwrap_or(self.default_port)),
            None => (self.default_host.as_str(), self.default_port),
        }
    }

    /// Whether `host` resolves to an address of this machine.
    fn is_local_host(&self, host: &str) -> bool {
        let Ok(addr) = upstream::resolve(host, 0) else {
            return false;
        };
        let ip = addr.ip();
        ip.is_loopback() || self.local_addrs.contains(&ip)
    }

    /// The shared path applies only to a registered origin reachable on a
    /// local interface.
    fn use_shared_transport(&self, host: &str, port: u16) -> bool {
        let (Some(registry), Some(_)) = (&self.registry, &self.slots) else {
            return false;
        };
        registry.contains(port) && self.is_local_host(host)
    }

    /// Socket-only handshake of the shared path: send SHBUFF, learn which
    /// slot the origin picked, then drain the slot until end-of-stream.
    fn fetch_via_slot(
        &self,
        pool: &SlotPool,
        host: &str,
        port: u16,
        req: &Request,
    ) -> Result<Vec<u8>, UpstreamError> {
        let addr = upstream::resolve(host, port)?;
        let mut stream = upstream::connect(addr, self.timeout)?;

        let request = build_request(SHBUFF_METHOD, &req.target, req.host.as_ref());
        stream.write_all(&request)?;

        let mut index_buf = [0u8; 4];
        stream.read_exact(&mut index_buf)?;
        let id = SlotId(u32::from_ne_bytes(index_buf) as usize);
        if id.0 >= pool.slot_count() {
            return Err(UpstreamError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("origin sent slot index {} out of range", id.0),
            )));
        }

        let mut body = Vec::with_capacity(4096);
        loop {
            let chunk = pool
                .recv(id)
                .map_err(|e| UpstreamError::Io(io::Error::new(io::ErrorKind::Other, e)))?;
            if chunk.is_empty() {
                break;
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    /// Run the image collaborator over a 200 image response, substituting
    /// the returned bytes at the body offset. Collaborator failure leaves
    /// the response as-is.
    fn maybe_alter_image(&self, req: &Request, response_bytes: &mut Vec<u8>) {
        let Some(filter) = &self.filter else {
            return;
        };
        if !is_image_target(&req.target) || !is_status_200(response_bytes) {
            return;
        }
        let Some(body_start) = find_body_offset(response_bytes) else {
            return;
        };
        if let Some(altered) = filter.alter(&response_bytes[body_start..]) {
            tracing::debug!(
                target = %req.target,
                original = response_bytes.len() - body_start,
                altered = altered.len(),
                "Substituted altered image body"
            );
            response_bytes.truncate(body_start);
            response_bytes.extend_from_slice(&altered);
        }
    }
}

impl BodySource for ProxyService {
    fn fetch(&self, req: &Request, conn: &mut Connection) -> io::Result<()> {
        let (host, port) = self.destination(req);
        let host = host.to_string();

        let result = if let (true, Some(pool)) =
            (self.use_shared_transport(&host, port), self.slots.as_deref())
        {
            tracing::debug!(%host, port, "Forwarding via shared memory");
            self.fetch_via_slot(pool, &host, port, req)
        } else {
            tracing::debug!(%host, port, "Forwarding via socket");
            let request = build_request("GET", &req.target, req.host.as_ref());
            upstream::fetch(&host, port, &request, self.timeout)
        };

        match result {
            Ok(mut bytes) => {
                self.maybe_alter_image(req, &mut bytes);
                conn.write_all(&bytes)
            }
            Err(e) => {
                tracing::warn!(%host, port, error = %e, "Upstream fetch failed");
                conn.write_all(&response::with_body(502, "Upstream unavailable\n"))
            }
        }
    }
}

/// Rebuild the upstream request: request line, the Host header when the
/// client sent one, blank line.
fn build_request(method: &str, target: &str, host: Option<&HostSpec>) -> Vec<u8> {
    let mut out = format!("{method} {target} HTTP/1.0\r\n");
    if let Some(h) = host {
        match h.port {
            Some(port) => out.push_str(&format!("Host: {}:{}\r\n", h.name, port)),
            None => out.push_str(&format!("Host: {}\r\n", h.name)),
        }
    }
    out.push_str("\r\n");
    out.into_bytes()
}

fn is_status_200(response_bytes: &[u8]) -> bool {
    // Status line: "HTTP/x.y 200 ..."
    response_bytes
        .split(|&b| b == b'\r')
        .next()
        .and_then(|line| line.split(|&b| b == b' ').nth(1))
        .is_some_and(|code| code == b"200")
}

fn find_body_offset(response_bytes: &[u8]) -> Option<usize> {
    response_bytes
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4)
}

/// Addresses of this machine's interfaces, IPv4 and IPv6.
fn local_interface_addrs() -> Vec<IpAddr> {
    let mut out = Vec::new();
    unsafe {
        let mut ifap: *mut libc::ifaddrs = std::ptr::null_mut();
        if libc::getifaddrs(&mut ifap) != 0 {
            tracing::warn!(
                error = %io::Error::last_os_error(),
                "getifaddrs failed; shared transport limited to loopback"
            );
            return out;
        }
        let mut cursor = ifap;
        while !cursor.is_null() {
            let ifa = &*cursor;
            if !ifa.ifa_addr.is_null() {
                match i32::from((*ifa.ifa_addr).sa_family) {
                    libc::AF_INET => {
                        let sin = &*(ifa.ifa_addr as *const libc::sockaddr_in);
                        out.push(IpAddr::V4(Ipv4Addr::from(u32::from_be(
                            sin.sin_addr.s_addr,
                        ))));
                    }
                    libc::AF_INET6 => {
                        let sin6 = &*(ifa.ifa_addr as *const libc::sockaddr_in6);
                        out.push(IpAddr::V6(Ipv6Addr::from(sin6.sin6_addr.s6_addr)));
                    }
                    _ => {}
                }
            }
            cursor = ifa.ifa_next;
        }
        libc::freeifaddrs(ifap);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_prefers_host_header() {
        let service = ProxyService::new(
            "10.0.0.1",
            9090,
            Duration::from_secs(1),
            None,
            None,
            None,
        );
        let with_port =
            Request::parse(b"GET / HTTP/1.0\r\nHost: example.com:9091\r\n\r\n").unwrap();
        assert_eq!(service.destination(&with_port), ("example.com", 9091));

        let without_port = Request::parse(b"GET / HTTP/1.0\r\nHost: example.com\r\n\r\n").unwrap();
        assert_eq!(service.destination(&without_port), ("example.com", 9090));

        let bare = Request::parse(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(service.destination(&bare), ("10.0.0.1", 9090));
    }

    #[test]
    fn test_build_request_includes_host() {
        let host = HostSpec {
            name: "h".into(),
            port: Some(81),
        };
        let req = build_request("GET", "/a", Some(&host));
        assert_eq!(req, b"GET /a HTTP/1.0\r\nHost: h:81\r\n\r\n");
        let bare = build_request("GET", "/a", None);
        assert_eq!(bare, b"GET /a HTTP/1.0\r\n\r\n");
    }

    #[test]
    fn test_status_detection_and_body_offset() {
        let resp = b"HTTP/1.0 200 OK\r\n\r\nbody".to_vec();
        assert!(is_status_200(&resp));
        assert_eq!(find_body_offset(&resp), Some(19));
        assert!(!is_status_200(b"HTTP/1.0 404 Not Found\r\n\r\nx"));
    }

    #[test]
    fn test_loopback_counts_as_local() {
        let service = ProxyService::new(
            "127.0.0.1",
            9090,
            Duration::from_secs(1),
            None,
            None,
            None,
        );
        assert!(service.is_local_host("127.0.0.1"));
        assert!(service.is_local_host("localhost"));
    }

    struct Doubler;
    impl ImageFilter for Doubler {
        fn alter(&self, bytes: &[u8]) -> Option<Vec<u8>> {
            let mut out = bytes.to_vec();
            out.extend_from_slice(bytes);
            Some(out)
        }
    }

    struct Failing;
    impl ImageFilter for Failing {
        fn alter(&self, _bytes: &[u8]) -> Option<Vec<u8>> {
            None
        }
    }

    #[test]
    fn test_image_body_substituted_in_place() {
        let service = ProxyService::new(
            "127.0.0.1",
            9090,
            Duration::from_secs(1),
            None,
            None,
            Some(Arc::new(Doubler)),
        );
        let req = Request::parse(b"GET /cat.jpg HTTP/1.0\r\n\r\n").unwrap();
        let mut resp = b"HTTP/1.0 200 OK\r\n\r\nIMG".to_vec();
        service.maybe_alter_image(&req, &mut resp);
        assert_eq!(resp, b"HTTP/1.0 200 OK\r\n\r\nIMGIMG");
    }

    #[test]
    fn test_failed_filter_leaves_body_unmodified() {
        let service = ProxyService::new(
            "127.0.0.1",
            9090,
            Duration::from_secs(1),
            None,
            None,
            Some(Arc::new(Failing)),
        );
        let req = Request::parse(b"GET /cat.jpg HTTP/1.0\r\n\r\n").unwrap();
        let mut resp = b"HTTP/1.0 200 OK\r\n\r\nIMG".to_vec();
        service.maybe_alter_image(&req, &mut resp);
        assert_eq!(resp, b"HTTP/1.0 200 OK\r\n\r\nIMG");
    }

    #[test]
    fn test_non_image_targets_skip_filter() {
        let service = ProxyService::new(
            "127.0.0.1",
            9090,
            Duration::from_secs(1),
            None,
            None,
            Some(Arc::new(Doubler)),
        );
        let req = Request::parse(b"GET /page.html HTTP/1.0\r\n\r\n").unwrap();
        let mut resp = b"HTTP/1.0 200 OK\r\n\r\nhtml".to_vec();
        service.maybe_alter_image(&req, &mut resp);
        assert_eq!(resp, b"HTTP/1.0 200 OK\r\n\r\nhtml");
    }
}
