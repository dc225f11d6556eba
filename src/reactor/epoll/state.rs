//! Descriptor-state values handed out by the epoll backend.
//!
//! A state is a token bound to its context. It is a value, not a guard:
//! closing is explicit through the close sender, and copies of a state all
//! observe the close through token staleness.

use super::context::{Context, DescriptorToken};
use crate::net::{query_endpoint, Endpoint, Protocol};
use std::io;
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::sync::Arc;

/// State of an open file descriptor (file or stream).
#[derive(Clone)]
pub struct FdState {
    ctx: Arc<Context>,
    token: DescriptorToken,
}

impl FdState {
    pub(crate) fn new(ctx: Arc<Context>, token: DescriptorToken) -> Self {
        Self { ctx, token }
    }

    /// The owning reactor context.
    #[must_use]
    pub fn ctx(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// The descriptor token.
    #[must_use]
    pub fn token(&self) -> DescriptorToken {
        self.token
    }

    /// Returns `true` while the token still resolves.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.ctx.native_handle(self.token).is_ok()
    }

    /// The raw fd behind the token.
    ///
    /// # Errors
    ///
    /// `EBADF` once the descriptor has been released.
    pub fn native_handle(&self) -> io::Result<RawFd> {
        self.ctx.native_handle(self.token)
    }
}

impl std::fmt::Debug for FdState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FdState")
            .field("token", &self.token)
            .finish_non_exhaustive()
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
    /// Propagates `EBADF` for released descriptors and syscall failures.
    pub fn local_endpoint(&self) -> io::Result<Endpoint> {
        query_endpoint(self.fd.native_handle()?, libc::getsockname)
    }

    /// The peer's address, via `getpeername`.
    ///
    /// # Errors
    ///
    /// Propagates `EBADF` for released descriptors and syscall failures.
    pub fn remote_endpoint(&self) -> io::Result<Endpoint> {
        query_endpoint(self.fd.native_handle()?, libc::getpeername)
    }

    /// Binds the socket to `endpoint`, passing the endpoint's native bytes
    /// and its exact byte size.
    ///
    /// # Errors
    ///
    /// Propagates the `bind(2)` failure.
    pub fn bind(&self, endpoint: &Endpoint) -> io::Result<()> {
        let fd = self.fd.native_handle()?;
        // SAFETY: data()/len() describe the endpoint's initialized bytes.
        if unsafe { libc::bind(fd, endpoint.data(), endpoint.len()) } < 0 {
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
