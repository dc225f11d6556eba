//! UNIX domain endpoints.
//!
//! Both addressing forms are supported, with the exact length rules of
//! `sockaddr_un`:
//!
//! - **pathname**: NUL-terminated filesystem path; the address length
//!   includes the terminator.
//! - **abstract**: a leading NUL byte followed by an arbitrary name; no
//!   terminator, the address length is exactly the used bytes.

use super::{Endpoint, EndpointError};
use std::mem;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::Path;

const SUN_PATH_LEN: usize = 108;

fn sun_path_offset() -> usize {
    mem::offset_of!(libc::sockaddr_un, sun_path)
}

impl Endpoint {
    /// Creates a pathname UNIX endpoint.
    ///
    /// # Errors
    ///
    /// Fails when the path does not fit `sun_path` (with its NUL
    /// terminator) or contains an interior NUL byte.
    pub fn unix(path: impl AsRef<Path>) -> Result<Self, EndpointError> {
        let bytes = path.as_ref().as_os_str().as_bytes();
        if bytes.contains(&0) {
            return Err(EndpointError::InteriorNul);
        }
        if bytes.len() > SUN_PATH_LEN - 1 {
            return Err(EndpointError::PathTooLong {
                len: bytes.len(),
                max: SUN_PATH_LEN - 1,
            });
        }

        // SAFETY: zeroed storage is valid and pre-terminates sun_path.
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        // SAFETY: sockaddr_un fits inside sockaddr_storage.
        let sun = unsafe { &mut *std::ptr::addr_of_mut!(storage).cast::<libc::sockaddr_un>() };
        sun.sun_family = libc::AF_UNIX as libc::sa_family_t;
        for (dst, src) in sun.sun_path.iter_mut().zip(bytes) {
            *dst = *src as libc::c_char;
        }

        let len = sun_path_offset() + bytes.len() + 1;
        Ok(Self::from_storage(storage, len as libc::socklen_t))
    }

    /// Creates an abstract UNIX endpoint from `name` (without the leading
    /// NUL, which is added here).
    ///
    /// # Errors
    ///
    /// Fails when the name does not fit `sun_path`.
    pub fn unix_abstract(name: &[u8]) -> Result<Self, EndpointError> {
        if name.len() > SUN_PATH_LEN - 1 {
            return Err(EndpointError::PathTooLong {
                len: name.len(),
                max: SUN_PATH_LEN - 1,
            });
        }

        // SAFETY: zeroed storage is valid; sun_path[0] stays NUL.
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        // SAFETY: sockaddr_un fits inside sockaddr_storage.
        let sun = unsafe { &mut *std::ptr::addr_of_mut!(storage).cast::<libc::sockaddr_un>() };
        sun.sun_family = libc::AF_UNIX as libc::sa_family_t;
        for (dst, src) in sun.sun_path[1..].iter_mut().zip(name) {
            *dst = *src as libc::c_char;
        }

        let len = sun_path_offset() + 1 + name.len();
        Ok(Self::from_storage(storage, len as libc::socklen_t))
    }

    /// The filesystem path of a pathname UNIX endpoint.
    ///
    /// Returns `None` for non-UNIX families and for abstract addresses.
    #[must_use]
    pub fn unix_path(&self) -> Option<std::path::PathBuf> {
        if libc::c_int::from(self.family()) != libc::AF_UNIX {
            return None;
        }
        let offset = sun_path_offset();
        // SAFETY: family says the storage prefix is a sockaddr_un.
        let sun = unsafe { &*self.data().cast::<libc::sockaddr_un>() };
        let used = (self.len() as usize)
            .checked_sub(offset)?
            .min(sun.sun_path.len());
        if used == 0 || sun.sun_path[0] == 0 {
            return None; // unnamed or abstract
        }
        let bytes: Vec<u8> = sun.sun_path[..used]
            .iter()
            .take_while(|c| **c != 0)
            .map(|c| *c as u8)
            .collect();
        Some(std::path::PathBuf::from(
            std::ffi::OsString::from_vec(bytes),
        ))
    }

    /// Returns `true` for an abstract UNIX endpoint.
    #[must_use]
    pub fn is_unix_abstract(&self) -> bool {
        if libc::c_int::from(self.family()) != libc::AF_UNIX {
            return false;
        }
        // SAFETY: family says the storage prefix is a sockaddr_un.
        let sun = unsafe { &*self.data().cast::<libc::sockaddr_un>() };
        (self.len() as usize) > sun_path_offset() && sun.sun_path[0] == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pathname_layout() {
        let endpoint = Endpoint::unix("/tmp/spindrift.sock").unwrap();
        assert_eq!(endpoint.family(), libc::AF_UNIX as libc::sa_family_t);
        let expected = sun_path_offset() + "/tmp/spindrift.sock".len() + 1;
        assert_eq!(endpoint.len() as usize, expected);
        assert_eq!(
            endpoint.unix_path(),
            Some(std::path::PathBuf::from("/tmp/spindrift.sock"))
        );
        assert!(!endpoint.is_unix_abstract());
    }

    #[test]
    fn abstract_layout() {
        let endpoint = Endpoint::unix_abstract(b"spindrift-test").unwrap();
        let expected = sun_path_offset() + 1 + "spindrift-test".len();
        assert_eq!(endpoint.len() as usize, expected);
        assert!(endpoint.is_unix_abstract());
        assert!(endpoint.unix_path().is_none());
    }

    #[test]
    fn overlong_path_rejected() {
        let long = "x".repeat(200);
        assert!(matches!(
            Endpoint::unix(&long),
            Err(EndpointError::PathTooLong { len: 200, .. })
        ));
        assert!(Endpoint::unix_abstract(&[0u8; 200]).is_err());
    }

    #[test]
    fn interior_nul_rejected() {
        use std::ffi::OsStr;
        let path = OsStr::from_bytes(b"/tmp/a\0b");
        assert!(matches!(
            Endpoint::unix(Path::new(path)),
            Err(EndpointError::InteriorNul)
        ));
    }
}
