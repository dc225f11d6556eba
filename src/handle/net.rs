//! Socket and acceptor resources.

use crate::backend::Backend;
use crate::buffer::{ConstBuffer, ConstBufferSpan, MutableBuffer, MutableBufferSpan};
use crate::exec::{then, Sender};
use crate::net::{Endpoint, Protocol, SocketOptions};
use crate::seq::{reduce, BufferedSequence};
use std::io;
use std::sync::Arc;

/// A stream-socket resource: open yields a [`SocketHandle`].
pub struct Socket<B: Backend> {
    ctx: Arc<B::Context>,
    protocol: Protocol,
}

impl<B: Backend> Socket<B> {
    /// Creates the factory for `protocol`.
    pub fn new(ctx: &Arc<B::Context>, protocol: Protocol) -> Self {
        Self {
            ctx: ctx.clone(),
            protocol,
        }
    }

    /// Opens the socket.
    pub fn open(&self) -> impl Sender<Value = SocketHandle<B>> {
        then(B::open_socket(&self.ctx, self.protocol), |state| {
            SocketHandle { state }
        })
    }
}

/// View on open socket state.
pub struct SocketHandle<B: Backend> {
    state: B::SocketState,
}

impl<B: Backend> Clone for SocketHandle<B> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<B: Backend> SocketHandle<B> {
    pub(crate) fn from_state(state: B::SocketState) -> Self {
        Self { state }
    }

    /// The backend socket state.
    #[must_use]
    pub fn state(&self) -> &B::SocketState {
        &self.state
    }

    /// Releases the socket.
    pub fn close(&self) -> B::CloseSender {
        B::close_socket(&self.state)
    }

    /// Connects to `endpoint`.
    pub fn connect(&self, endpoint: Endpoint) -> B::ConnectSender {
        B::connect(&self.state, endpoint)
    }

    /// Binds to `endpoint`.
    ///
    /// # Errors
    ///
    /// Propagates the `bind(2)` failure.
    pub fn bind(&self, endpoint: &Endpoint) -> io::Result<()> {
        B::bind(&self.state, endpoint)
    }

    /// The locally bound address.
    ///
    /// # Errors
    ///
    /// Propagates `getsockname` failures.
    pub fn local_endpoint(&self) -> io::Result<Endpoint> {
        B::local_endpoint(&self.state)
    }

    /// The peer's address.
    ///
    /// # Errors
    ///
    /// Propagates `getpeername` failures.
    pub fn remote_endpoint(&self) -> io::Result<Endpoint> {
        B::remote_endpoint(&self.state)
    }

    /// One partial read from the stream.
    pub fn read_some(&self, buffer: MutableBuffer) -> B::ReadSomeSender {
        let fd_state = B::socket_fd_state(&self.state);
        B::read_some(&fd_state, MutableBufferSpan::single(buffer), None)
    }

    /// One partial write to the stream.
    pub fn write_some(&self, buffer: ConstBuffer) -> B::WriteSomeSender {
        let fd_state = B::socket_fd_state(&self.state);
        B::write_some(&fd_state, ConstBufferSpan::single(buffer), None)
    }

    /// Reads until `buffers` is full or the peer signals EOF; completes
    /// with the total byte count.
    pub fn read(&self, buffers: MutableBufferSpan) -> impl Sender<Value = usize> {
        let fd_state = B::socket_fd_state(&self.state);
        reduce(BufferedSequence::new(
            move |remaining, _offset| B::read_some(&fd_state, remaining, None),
            buffers,
            None,
        ))
    }

    /// Writes all of `buffers`; completes with the total byte count.
    pub fn write(&self, buffers: ConstBufferSpan) -> impl Sender<Value = usize> {
        let fd_state = B::socket_fd_state(&self.state);
        reduce(BufferedSequence::new(
            move |remaining, _offset| B::write_some(&fd_state, remaining, None),
            buffers,
            None,
        ))
    }

    /// Sends a gather buffer via `sendmsg`.
    pub fn sendmsg(&self, buffers: ConstBufferSpan) -> B::SendMsgSender {
        B::sendmsg(&self.state, buffers)
    }
}

/// A listening-socket resource: open yields an [`AcceptorHandle`].
pub struct Acceptor<B: Backend> {
    ctx: Arc<B::Context>,
    protocol: Protocol,
    endpoint: Endpoint,
    options: SocketOptions,
}

impl<B: Backend> Acceptor<B> {
    /// Creates the factory for `protocol`, bound to `endpoint`.
    pub fn new(ctx: &Arc<B::Context>, protocol: Protocol, endpoint: Endpoint) -> Self {
        Self {
            ctx: ctx.clone(),
            protocol,
            endpoint,
            options: SocketOptions::default(),
        }
    }

    /// Applies socket options (e.g. `unlink_on_close` for UNIX paths).
    #[must_use]
    pub fn options(mut self, options: SocketOptions) -> Self {
        self.options = options;
        self
    }

    /// Opens, binds and starts listening.
    pub fn open(&self) -> impl Sender<Value = AcceptorHandle<B>> {
        then(
            B::open_acceptor(&self.ctx, self.protocol, self.endpoint, self.options),
            |state| AcceptorHandle { state },
        )
    }
}

/// View on listening-socket state.
pub struct AcceptorHandle<B: Backend> {
    state: B::AcceptorState,
}

impl<B: Backend> Clone for AcceptorHandle<B> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<B: Backend> AcceptorHandle<B> {
    /// The backend acceptor state.
    #[must_use]
    pub fn state(&self) -> &B::AcceptorState {
        &self.state
    }

    /// Releases the listener (unlinking its UNIX path if requested).
    pub fn close(&self) -> B::CloseSender {
        B::close_acceptor(&self.state)
    }

    /// The bound listening address (e.g. to learn an ephemeral port).
    ///
    /// # Errors
    ///
    /// Propagates `getsockname` failures.
    pub fn local_endpoint(&self) -> io::Result<Endpoint> {
        B::acceptor_local_endpoint(&self.state)
    }

    /// Accepts one connection, yielding the peer's socket handle.
    pub fn accept_once(&self) -> impl Sender<Value = SocketHandle<B>> {
        then(B::accept_once(&self.state), SocketHandle::from_state)
    }
}
