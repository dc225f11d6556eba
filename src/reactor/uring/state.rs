//! Descriptor-state values handed out by the io_uring backend.
//!
//! No slot table here: per-operation identity travels through SQE user
//! data, so a state is just the raw fd bound to its context. Closing goes
//! through the `CLOSE` opcode.

use super::context::Context;
use crate::net::{query_endpoint, Endpoint, Protocol};
use std::io;
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::sync::Arc;

/// State of an open file descriptor (file or stream).
#[derive(Clone)]
pub struct FdState {
    ctx: Arc<Context>,
    fd: RawFd,
}

impl FdState {
    pub(crate) fn new(ctx: Arc<Context>, fd: RawFd) -> Self {
        Self { ctx, fd }
    }

    /// The owning reactor context.
    #[must_use]
    pub fn ctx(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// The raw fd.
    #[must_use]
    pub fn native_handle(&self) -> RawFd {
        self.fd
    }
}

impl std::fmt::Debug for FdState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FdState").field("fd", &self.fd).finish_non_exhaustive()
    }
}

/// State of an open socket.
#[derive(Clone, Debug)]
pub struct SocketState {
    fd: FdState,
    protocol: Protocol,
}

impl SocketState {
    pub(crate) fn new(fd: FdState, protocol: Protocol) -> Self {
        Self { fd, protocol }
    }

    /// The underlying descriptor state.
    #[must_use]
    pub fn fd(&self) -> &FdState {
        &self.fd
    }

    /// The protocol the socket was opened with.
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// The locally bound address, via `getsockname`.
    ///
    /// # Errors
    ///
    /// Propagates the syscall failure.
    pub fn local_endpoint(&self) -> io::Result<Endpoint> {
        query_endpoint(self.fd.native_handle(), libc::getsockname)
    }

    /// The peer's address, via `getpeername`.
    ///
    /// # Errors
    ///
    /// Propagates the syscall failure.
    pub fn remote_endpoint(&self) -> io::Result<Endpoint> {
        query_endpoint(self.fd.native_handle(), libc::getpeername)
    }

    /// Binds the socket to `endpoint`, passing the endpoint's native bytes
    /// and its exact byte size.
    ///
    /// # Errors
    ///
    /// Propagates the `bind(2)` failure.
    pub fn bind(&self, endpoint: &Endpoint) -> io::Result<()> {
        // SAFETY: data()/len() describe the endpoint's initialized bytes.
        if unsafe { libc::bind(self.fd.native_handle(), endpoint.data(), endpoint.len()) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// State of a listening socket.
#[derive(Clone, Debug)]
pub struct AcceptorState {
    socket: SocketState,
    /// Path to unlink when the acceptor closes, for filesystem UNIX
    /// endpoints opened with `unlink_on_close`.
    unlink_path: Option<PathBuf>,
}

impl AcceptorState {
    pub(crate) fn new(socket: SocketState, unlink_path: Option<PathBuf>) -> Self {
        Self {
            socket,
            unlink_path,
        }
    }

    /// The underlying socket state.
    #[must_use]
    pub fn socket(&self) -> &SocketState {
        &self.socket
    }

    /// The underlying descriptor state.
    #[must_use]
    pub fn fd(&self) -> &FdState {
        self.socket.fd()
    }

    /// The protocol the acceptor listens with.
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.socket.protocol()
    }

    /// The bound listening address.
    ///
    /// # Errors
    ///
    /// See [`SocketState::local_endpoint`].
    pub fn local_endpoint(&self) -> io::Result<Endpoint> {
        self.socket.local_endpoint()
    }

    pub(crate) fn unlink_path(&self) -> Option<&PathBuf> {
        self.unlink_path.as_ref()
    }
}
