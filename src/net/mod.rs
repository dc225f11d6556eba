//! Protocol and endpoint value types.
//!
//! A [`Protocol`] is the `(family, type, protocol)` triple handed to
//! `socket(2)`. An [`Endpoint`] owns the bit-exact native socket address
//! (`sockaddr_in`, `sockaddr_in6`, `sockaddr_un`, `sockaddr_can`) and
//! exposes it as a pointer + length pair for direct syscall passthrough.
//!
//! Supported combinations:
//!
//! | Protocol | Family | Type | Proto |
//! |----------|--------|------|-------|
//! | [`Protocol::tcp_v4`] | `AF_INET` | `SOCK_STREAM` | 0 |
//! | [`Protocol::tcp_v6`] | `AF_INET6` | `SOCK_STREAM` | 0 |
//! | [`Protocol::unix_stream`] | `AF_LOCAL` | `SOCK_STREAM` | 0 |
//! | [`Protocol::can_raw`] | `PF_CAN` | `SOCK_RAW` | `CAN_RAW` |

pub mod can;
pub mod ip;
pub mod unix;

use std::fmt;
use std::mem;

/// The `(family, type, protocol)` triple for `socket(2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protocol {
    family: libc::c_int,
    socket_type: libc::c_int,
    protocol: libc::c_int,
}

impl Protocol {
    /// TCP over IPv4.
    #[must_use]
    pub const fn tcp_v4() -> Self {
        Self {
            family: libc::AF_INET,
            socket_type: libc::SOCK_STREAM,
            protocol: 0,
        }
    }

    /// TCP over IPv6.
    #[must_use]
    pub const fn tcp_v6() -> Self {
        Self {
            family: libc::AF_INET6,
            socket_type: libc::SOCK_STREAM,
            protocol: 0,
        }
    }

    /// UNIX domain stream socket.
    #[must_use]
    pub const fn unix_stream() -> Self {
        Self {
            family: libc::AF_UNIX,
            socket_type: libc::SOCK_STREAM,
            protocol: 0,
        }
    }

    /// Raw CAN socket.
    #[must_use]
    pub const fn can_raw() -> Self {
        Self {
            family: libc::PF_CAN,
            socket_type: libc::SOCK_RAW,
            protocol: libc::CAN_RAW,
        }
    }

    /// The address family.
    #[must_use]
    pub const fn family(&self) -> libc::c_int {
        self.family
    }

    /// The socket type.
    #[must_use]
    pub const fn socket_type(&self) -> libc::c_int {
        self.socket_type
    }

    /// The protocol number.
    #[must_use]
    pub const fn protocol(&self) -> libc::c_int {
        self.protocol
    }
}

/// Per-socket options applied when opening acceptors and sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketOptions {
    /// Unlink the filesystem path of a pathname UNIX endpoint when the
    /// owning acceptor closes.
    pub unlink_on_close: bool,
}

/// Errors constructing an endpoint.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// A UNIX path does not fit `sun_path`.
    #[error("socket path of {len} bytes exceeds the {max}-byte sun_path limit")]
    PathTooLong {
        /// Length of the rejected path.
        len: usize,
        /// Maximum representable length.
        max: usize,
    },
    /// The path contains an interior NUL byte.
    #[error("socket path contains an interior NUL byte")]
    InteriorNul,
}

/// An owned, bit-exact native socket address.
#[derive(Clone, Copy)]
pub struct Endpoint {
    storage: libc::sockaddr_storage,
    len: libc::socklen_t,
}

impl Endpoint {
    /// Creates an endpoint from raw storage.
    ///
    /// `len` must describe the initialized prefix of `storage`.
    #[must_use]
    pub fn from_storage(storage: libc::sockaddr_storage, len: libc::socklen_t) -> Self {
        Self { storage, len }
    }

    /// Zeroed storage sized for the largest supported address, used as an
    /// out-parameter for `getsockname`/`accept`.
    #[must_use]
    pub fn zeroed() -> Self {
        Self {
            // SAFETY: sockaddr_storage is a plain-old-data byte container;
            // all-zero is a valid (AF_UNSPEC) value.
            storage: unsafe { mem::zeroed() },
            len: mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t,
        }
    }

    /// The address family stored in the endpoint.
    #[must_use]
    pub fn family(&self) -> libc::sa_family_t {
        self.storage.ss_family
    }

    /// Pointer to the native address bytes.
    #[must_use]
    pub fn data(&self) -> *const libc::sockaddr {
        std::ptr::addr_of!(self.storage).cast()
    }

    /// Mutable pointer to the native address bytes.
    #[must_use]
    pub fn data_mut(&mut self) -> *mut libc::sockaddr {
        std::ptr::addr_of_mut!(self.storage).cast()
    }

    /// Byte size of the initialized address.
    #[must_use]
    pub const fn len(&self) -> libc::socklen_t {
        self.len
    }

    /// Returns `true` if no address has been stored.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Overwrites the stored length, after the kernel filled the address.
    pub fn set_len(&mut self, len: libc::socklen_t) {
        self.len = len;
    }

}

type QueryFn =
    unsafe extern "C" fn(libc::c_int, *mut libc::sockaddr, *mut libc::socklen_t) -> libc::c_int;

/// Reads a socket address via `getsockname`/`getpeername`.
pub(crate) fn query_endpoint(fd: std::os::fd::RawFd, query: QueryFn) -> std::io::Result<Endpoint> {
    let mut endpoint = Endpoint::zeroed();
    let mut len = endpoint.len();
    // SAFETY: the out-buffer is sockaddr_storage-sized and len tracks it.
    if unsafe { query(fd, endpoint.data_mut(), &mut len) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    endpoint.set_len(len);
    Ok(endpoint)
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("family", &self.family())
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_triples() {
        let tcp = Protocol::tcp_v4();
        assert_eq!(tcp.family(), libc::AF_INET);
        assert_eq!(tcp.socket_type(), libc::SOCK_STREAM);
        assert_eq!(tcp.protocol(), 0);

        let can = Protocol::can_raw();
        assert_eq!(can.family(), libc::PF_CAN);
        assert_eq!(can.socket_type(), libc::SOCK_RAW);
        assert_eq!(can.protocol(), libc::CAN_RAW);
    }

    #[test]
    fn zeroed_storage_is_unspec() {
        let endpoint = Endpoint::zeroed();
        assert_eq!(endpoint.family(), libc::AF_UNSPEC as libc::sa_family_t);
        assert!(!endpoint.is_empty());
    }
}
