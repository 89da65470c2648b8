//! TCP listener implementation.
//!
//! # Responsibilities
//! - Bind to the configured port on all interfaces, small fixed backlog
//! - Accept incoming TCP connections for the boss thread
//! - Unblock a boss thread parked in accept during shutdown
//!
//! Bind or listen failure is a construction failure; there is no recovery
//! path once the socket cannot be set up.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};

use crate::net::Connection;

/// Fixed accept backlog; admission control happens at the request queue,
/// not in the kernel.
const ACCEPT_BACKLOG: libc::c_int = 8;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to create, bind, or listen on the socket.
    Bind(io::Error),
    /// Failed to accept a connection.
    Accept(io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {}

/// A bound, listening TCP socket.
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind to `port` on every interface with the fixed backlog.
    ///
    /// Goes through libc directly so the backlog is under our control;
    /// the resulting descriptor is handed to `std::net::TcpListener`.
    pub fn bind(port: u16) -> Result<Self, ListenerError> {
        let fd = Self::bind_raw(port).map_err(ListenerError::Bind)?;
        // Safety: fd is a fresh, owned, listening socket.
        let inner = unsafe { TcpListener::from_raw_fd(fd) };
        let local_addr = inner.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(address = %local_addr, "Listener bound");

        Ok(Self { inner, local_addr })
    }

    fn bind_raw(port: u16) -> io::Result<RawFd> {
        unsafe {
            let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0);
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }

            let one: libc::c_int = 1;
            if libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &one as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            ) < 0
            {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err);
            }

            let addr = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: port.to_be(),
                sin_addr: libc::in_addr {
                    s_addr: libc::INADDR_ANY.to_be(),
                },
                sin_zero: [0; 8],
            };
            if libc::bind(
                fd,
                &addr as *const libc::sockaddr_in as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            ) < 0
            {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err);
            }

            if libc::listen(fd, ACCEPT_BACKLOG) < 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err);
            }

            Ok(fd)
        }
    }

    /// Block until a connection arrives.
    pub fn accept(&self) -> Result<Connection, ListenerError> {
        let (stream, peer) = self.inner.accept().map_err(ListenerError::Accept)?;
        Ok(Connection::new(stream, peer))
    }

    /// Force a thread blocked in `accept` to return with an error.
    ///
    /// `shutdown(2)` on a listening socket makes pending and future accepts
    /// fail immediately; the socket itself is closed when the listener drops.
    pub fn unblock(&self) {
        unsafe {
            libc::shutdown(self.inner.as_raw_fd(), libc::SHUT_RDWR);
        }
    }

    /// The local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Check whether anything is still accepting on `addr`.
///
/// Used by shutdown tests; a refused connection proves the descriptor
/// is gone.
pub fn port_is_closed(addr: SocketAddr) -> bool {
    TcpStream::connect_timeout(&addr, std::time::Duration::from_millis(200)).is_err()
}
