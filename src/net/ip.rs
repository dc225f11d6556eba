//! IP endpoints.
//!
//! Conversions between `std::net::SocketAddr` and the native
//! `sockaddr_in`/`sockaddr_in6` layouts.

use super::Endpoint;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => v4.into(),
            SocketAddr::V6(v6) => v6.into(),
        }
    }
}

impl From<SocketAddrV4> for Endpoint {
    fn from(addr: SocketAddrV4) -> Self {
        // SAFETY: zeroed sockaddr_storage is valid; the prefix is then
        // overwritten with a fully initialized sockaddr_in.
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let sin = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: addr.port().to_be(),
            sin_addr: libc::in_addr {
                s_addr: u32::from_ne_bytes(addr.ip().octets()),
            },
            sin_zero: [0; 8],
        };
        // SAFETY: sockaddr_in fits inside sockaddr_storage.
        unsafe {
            std::ptr::write(std::ptr::addr_of_mut!(storage).cast::<libc::sockaddr_in>(), sin);
        }
        Self::from_storage(storage, mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
    }
}

impl From<SocketAddrV6> for Endpoint {
    fn from(addr: SocketAddrV6) -> Self {
        // SAFETY: as above, for sockaddr_in6.
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let sin6 = libc::sockaddr_in6 {
            sin6_family: libc::AF_INET6 as libc::sa_family_t,
            sin6_port: addr.port().to_be(),
            sin6_flowinfo: addr.flowinfo(),
            sin6_addr: libc::in6_addr {
                s6_addr: addr.ip().octets(),
            },
            sin6_scope_id: addr.scope_id(),
        };
        // SAFETY: sockaddr_in6 fits inside sockaddr_storage.
        unsafe {
            std::ptr::write(
                std::ptr::addr_of_mut!(storage).cast::<libc::sockaddr_in6>(),
                sin6,
            );
        }
        Self::from_storage(storage, mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t)
    }
}

impl Endpoint {
    /// Reads the endpoint back as a socket address, if it holds an IP
    /// address family.
    #[must_use]
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        match libc::c_int::from(self.family()) {
            libc::AF_INET => {
                // SAFETY: family says the storage prefix is a sockaddr_in.
                let sin = unsafe { &*self.data().cast::<libc::sockaddr_in>() };
                let ip = Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
                Some(SocketAddr::V4(SocketAddrV4::new(
                    ip,
                    u16::from_be(sin.sin_port),
                )))
            }
            libc::AF_INET6 => {
                // SAFETY: family says the storage prefix is a sockaddr_in6.
                let sin6 = unsafe { &*self.data().cast::<libc::sockaddr_in6>() };
                let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
                Some(SocketAddr::V6(SocketAddrV6::new(
                    ip,
                    u16::from_be(sin6.sin6_port),
                    sin6.sin6_flowinfo,
                    sin6.sin6_scope_id,
                )))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_round_trip() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let endpoint = Endpoint::from(addr);
        assert_eq!(endpoint.family(), libc::AF_INET as libc::sa_family_t);
        assert_eq!(
            endpoint.len() as usize,
            std::mem::size_of::<libc::sockaddr_in>()
        );
        assert_eq!(endpoint.to_socket_addr(), Some(addr));
    }

    #[test]
    fn v6_round_trip() {
        let addr: SocketAddr = "[::1]:443".parse().unwrap();
        let endpoint = Endpoint::from(addr);
        assert_eq!(endpoint.family(), libc::AF_INET6 as libc::sa_family_t);
        assert_eq!(endpoint.to_socket_addr(), Some(addr));
    }

    #[test]
    fn port_is_network_order() {
        let addr: SocketAddr = "0.0.0.0:1".parse().unwrap();
        let endpoint = Endpoint::from(addr);
        // SAFETY: constructed above as sockaddr_in.
        let sin = unsafe { &*endpoint.data().cast::<libc::sockaddr_in>() };
        assert_eq!(sin.sin_port, 1u16.to_be());
    }
}
