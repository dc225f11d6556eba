//! CAN bus endpoints.
//!
//! A raw CAN endpoint names an interface by index; index 0 binds to all
//! interfaces. Only the layout matters here: `sockaddr_can` is passed to
//! `bind(2)` byte-for-byte.

use super::Endpoint;
use std::mem;

impl Endpoint {
    /// Creates a raw CAN endpoint for the interface with `ifindex`.
    #[must_use]
    pub fn can(ifindex: u32) -> Self {
        // SAFETY: zeroed storage is valid; the prefix is overwritten with
        // an initialized sockaddr_can.
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        // SAFETY: sockaddr_can fits inside sockaddr_storage.
        let can = unsafe { &mut *std::ptr::addr_of_mut!(storage).cast::<libc::sockaddr_can>() };
        can.can_family = libc::AF_CAN as libc::sa_family_t;
        can.can_ifindex = ifindex as libc::c_int;
        Self::from_storage(storage, mem::size_of::<libc::sockaddr_can>() as libc::socklen_t)
    }

    /// The interface index of a CAN endpoint, if it holds one.
    #[must_use]
    pub fn can_ifindex(&self) -> Option<u32> {
        if libc::c_int::from(self.family()) != libc::AF_CAN {
            return None;
        }
        // SAFETY: family says the storage prefix is a sockaddr_can.
        let can = unsafe { &*self.data().cast::<libc::sockaddr_can>() };
        Some(can.can_ifindex as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        let endpoint = Endpoint::can(3);
        assert_eq!(endpoint.family(), libc::AF_CAN as libc::sa_family_t);
        assert_eq!(
            endpoint.len() as usize,
            mem::size_of::<libc::sockaddr_can>()
        );
        assert_eq!(endpoint.can_ifindex(), Some(3));
    }

    #[test]
    fn wildcard_interface() {
        assert_eq!(Endpoint::can(0).can_ifindex(), Some(0));
    }
}
