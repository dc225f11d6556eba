//! Backend contract.
//!
//! The compile-time interface both reactors satisfy, so resource handles
//! are written once and work against either. Each associated type names
//! the backend's concrete sender for one operation; the methods are the
//! factories the handles call.
//!
//! The two implementations are the zero-sized markers [`Epoll`] and
//! (feature `io-uring`) [`Uring`].

use crate::buffer::{ConstBufferSpan, MutableBufferSpan};
use crate::config::ContextConfig;
use crate::exec::Sender;
use crate::net::{Endpoint, Protocol, SocketOptions};
use crate::open_options::OpenRequest;
use crate::reactor::RunMode;
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;

/// A reactor backend: context plus one sender factory per operation.
///
/// Semantics are identical across implementations; only the kernel
/// mechanism differs (readiness + non-blocking syscalls vs. ring
/// submission).
pub trait Backend: Sized + Send + Sync + 'static {
    /// The reactor context type.
    type Context: Send + Sync + 'static;
    /// Descriptor state for files and adopted fds.
    type FileState: Clone + Send + 'static;
    /// Descriptor state for sockets.
    type SocketState: Clone + Send + 'static;
    /// Descriptor state for listening sockets.
    type AcceptorState: Clone + Send + 'static;

    /// Sender of [`Self::FileState`] from a path open.
    type OpenFileSender: Sender<Value = Self::FileState> + Send + 'static;
    /// Sender releasing any descriptor state.
    type CloseSender: Sender<Value = ()> + Send + 'static;
    /// Sender of the byte count of a partial read.
    type ReadSomeSender: Sender<Value = usize> + Send + 'static;
    /// Sender of the byte count of a partial write.
    type WriteSomeSender: Sender<Value = usize> + Send + 'static;
    /// Sender of [`Self::SocketState`] from a socket open.
    type SocketOpenSender: Sender<Value = Self::SocketState> + Send + 'static;
    /// Sender of [`Self::AcceptorState`] from an acceptor open.
    type AcceptorOpenSender: Sender<Value = Self::AcceptorState> + Send + 'static;
    /// Sender completing when a connect finishes.
    type ConnectSender: Sender<Value = ()> + Send + 'static;
    /// Sender of the accepted peer's socket state.
    type AcceptSender: Sender<Value = Self::SocketState> + Send + 'static;
    /// Sender of the byte count of a `sendmsg`.
    type SendMsgSender: Sender<Value = usize> + Send + 'static;
    /// Sender completing on the reactor thread.
    type ScheduleSender: Sender<Value = ()> + Send + 'static;
    /// Sender driving the reactor.
    type RunSender: Sender<Value = ()> + Send + 'static;

    /// Creates a reactor context.
    ///
    /// # Errors
    ///
    /// Propagates reactor-handle creation failures.
    fn new_context(config: &ContextConfig) -> io::Result<Arc<Self::Context>>;

    /// The run sender for `ctx`.
    fn run(ctx: &Arc<Self::Context>, mode: RunMode) -> Self::RunSender;

    /// The schedule sender for `ctx`.
    fn schedule(ctx: &Arc<Self::Context>) -> Self::ScheduleSender;

    /// Requests the context to stop. Idempotent, thread-safe.
    fn request_stop(ctx: &Arc<Self::Context>);

    /// Drains the context until a pass processes nothing.
    ///
    /// # Errors
    ///
    /// Propagates reactor poll failures.
    fn run_until_empty(ctx: &Arc<Self::Context>) -> io::Result<()>;

    /// Opens a file per `request`.
    fn open_file(ctx: &Arc<Self::Context>, request: OpenRequest) -> Self::OpenFileSender;

    /// Adopts an externally owned fd (e.g. stdin/stdout) as file state.
    ///
    /// # Errors
    ///
    /// Propagates registration failures (epoll marks the fd
    /// non-blocking).
    fn adopt_fd(ctx: &Arc<Self::Context>, fd: RawFd) -> io::Result<Self::FileState>;

    /// Closes file state.
    fn close_file(state: &Self::FileState) -> Self::CloseSender;

    /// Partial read into `buffers`, optionally at `offset`.
    fn read_some(
        state: &Self::FileState,
        buffers: MutableBufferSpan,
        offset: Option<u64>,
    ) -> Self::ReadSomeSender;

    /// Partial write of `buffers`, optionally at `offset`.
    fn write_some(
        state: &Self::FileState,
        buffers: ConstBufferSpan,
        offset: Option<u64>,
    ) -> Self::WriteSomeSender;

    /// Opens a socket for `protocol`.
    fn open_socket(ctx: &Arc<Self::Context>, protocol: Protocol) -> Self::SocketOpenSender;

    /// Opens a bound, listening acceptor.
    fn open_acceptor(
        ctx: &Arc<Self::Context>,
        protocol: Protocol,
        endpoint: Endpoint,
        options: SocketOptions,
    ) -> Self::AcceptorOpenSender;

    /// File-state view of a socket, for stream reads/writes.
    fn socket_fd_state(state: &Self::SocketState) -> Self::FileState;

    /// Closes socket state.
    fn close_socket(state: &Self::SocketState) -> Self::CloseSender;

    /// Closes acceptor state, honoring `unlink_on_close`.
    fn close_acceptor(state: &Self::AcceptorState) -> Self::CloseSender;

    /// Connects `state` to `endpoint`.
    fn connect(state: &Self::SocketState, endpoint: Endpoint) -> Self::ConnectSender;

    /// Binds `state` to `endpoint` (synchronous, like socket creation).
    ///
    /// # Errors
    ///
    /// Propagates the `bind(2)` failure.
    fn bind(state: &Self::SocketState, endpoint: &Endpoint) -> io::Result<()>;

    /// Accepts one connection.
    fn accept_once(state: &Self::AcceptorState) -> Self::AcceptSender;

    /// Sends a gather buffer via `sendmsg`.
    fn sendmsg(state: &Self::SocketState, buffers: ConstBufferSpan) -> Self::SendMsgSender;

    /// The socket's locally bound address.
    ///
    /// # Errors
    ///
    /// Propagates `getsockname` failures.
    fn local_endpoint(state: &Self::SocketState) -> io::Result<Endpoint>;

    /// The socket's peer address.
    ///
    /// # Errors
    ///
    /// Propagates `getpeername` failures.
    fn remote_endpoint(state: &Self::SocketState) -> io::Result<Endpoint>;

    /// The acceptor's locally bound address.
    ///
    /// # Errors
    ///
    /// Propagates `getsockname` failures.
    fn acceptor_local_endpoint(state: &Self::AcceptorState) -> io::Result<Endpoint>;
}

/// The epoll backend marker.
#[derive(Debug, Clone, Copy, Default)]
pub struct Epoll;

impl Backend for Epoll {
    type Context = crate::reactor::epoll::Context;
    type FileState = crate::reactor::epoll::FdState;
    type SocketState = crate::reactor::epoll::SocketState;
    type AcceptorState = crate::reactor::epoll::AcceptorState;

    type OpenFileSender = crate::reactor::epoll::OpenFileSender;
    type CloseSender = crate::reactor::epoll::CloseSender;
    type ReadSomeSender = crate::reactor::epoll::ReadSomeSender;
    type WriteSomeSender = crate::reactor::epoll::WriteSomeSender;
    type SocketOpenSender = crate::reactor::epoll::SocketOpenSender;
    type AcceptorOpenSender = crate::reactor::epoll::AcceptorOpenSender;
    type ConnectSender = crate::reactor::epoll::ConnectSender;
    type AcceptSender = crate::reactor::epoll::AcceptSender;
    type SendMsgSender = crate::reactor::epoll::SendMsgSender;
    type ScheduleSender = crate::reactor::epoll::ScheduleSender;
    type RunSender = crate::reactor::epoll::RunSender;

    fn new_context(config: &ContextConfig) -> io::Result<Arc<Self::Context>> {
        crate::reactor::epoll::Context::with_config(config)
    }

    fn run(ctx: &Arc<Self::Context>, mode: RunMode) -> Self::RunSender {
        crate::reactor::epoll::RunSender::new(ctx.clone(), mode)
    }

    fn schedule(ctx: &Arc<Self::Context>) -> Self::ScheduleSender {
        crate::reactor::epoll::ScheduleSender::new(ctx.clone())
    }

    fn request_stop(ctx: &Arc<Self::Context>) {
        ctx.request_stop();
    }

    fn run_until_empty(ctx: &Arc<Self::Context>) -> io::Result<()> {
        ctx.run_until_empty()
    }

    fn open_file(ctx: &Arc<Self::Context>, request: OpenRequest) -> Self::OpenFileSender {
        crate::reactor::epoll::OpenFileSender::new(ctx.clone(), request)
    }

    fn adopt_fd(ctx: &Arc<Self::Context>, fd: RawFd) -> io::Result<Self::FileState> {
        // The readiness loop needs the fd non-blocking.
        // SAFETY: fcntl on a caller-provided live fd.
        let rc = unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            if flags < 0 {
                -1
            } else {
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK)
            }
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        let token = ctx.register_descriptor(fd);
        Ok(crate::reactor::epoll::FdState::new(ctx.clone(), token))
    }

    fn close_file(state: &Self::FileState) -> Self::CloseSender {
        crate::reactor::epoll::CloseSender::new(state.ctx().clone(), state.token(), None)
    }

    fn read_some(
        state: &Self::FileState,
        buffers: MutableBufferSpan,
        offset: Option<u64>,
    ) -> Self::ReadSomeSender {
        crate::reactor::epoll::ReadSomeSender::new(
            state.ctx().clone(),
            state.token(),
            buffers,
            offset,
        )
    }

    fn write_some(
        state: &Self::FileState,
        buffers: ConstBufferSpan,
        offset: Option<u64>,
    ) -> Self::WriteSomeSender {
        crate::reactor::epoll::WriteSomeSender::new(
            state.ctx().clone(),
            state.token(),
            buffers,
            offset,
        )
    }

    fn open_socket(ctx: &Arc<Self::Context>, protocol: Protocol) -> Self::SocketOpenSender {
        crate::reactor::epoll::SocketOpenSender::new(ctx.clone(), protocol)
    }

    fn open_acceptor(
        ctx: &Arc<Self::Context>,
        protocol: Protocol,
        endpoint: Endpoint,
        options: SocketOptions,
    ) -> Self::AcceptorOpenSender {
        crate::reactor::epoll::AcceptorOpenSender::new(ctx.clone(), protocol, endpoint, options)
    }

    fn socket_fd_state(state: &Self::SocketState) -> Self::FileState {
        state.fd().clone()
    }

    fn close_socket(state: &Self::SocketState) -> Self::CloseSender {
        crate::reactor::epoll::CloseSender::new(state.fd().ctx().clone(), state.fd().token(), None)
    }

    fn close_acceptor(state: &Self::AcceptorState) -> Self::CloseSender {
        crate::reactor::epoll::CloseSender::new(
            state.fd().ctx().clone(),
            state.fd().token(),
            state.unlink_path().cloned(),
        )
    }

    fn connect(state: &Self::SocketState, endpoint: Endpoint) -> Self::ConnectSender {
        crate::reactor::epoll::ConnectSender::new(state.clone(), endpoint)
    }

    fn bind(state: &Self::SocketState, endpoint: &Endpoint) -> io::Result<()> {
        state.bind(endpoint)
    }

    fn accept_once(state: &Self::AcceptorState) -> Self::AcceptSender {
        crate::reactor::epoll::AcceptSender::new(state.clone())
    }

    fn sendmsg(state: &Self::SocketState, buffers: ConstBufferSpan) -> Self::SendMsgSender {
        crate::reactor::epoll::SendMsgSender::new(state.clone(), buffers)
    }

    fn local_endpoint(state: &Self::SocketState) -> io::Result<Endpoint> {
        state.local_endpoint()
    }

    fn remote_endpoint(state: &Self::SocketState) -> io::Result<Endpoint> {
        state.remote_endpoint()
    }

    fn acceptor_local_endpoint(state: &Self::AcceptorState) -> io::Result<Endpoint> {
        state.local_endpoint()
    }
}

/// The io_uring backend marker.
#[cfg(feature = "io-uring")]
#[derive(Debug, Clone, Copy, Default)]
pub struct Uring;

#[cfg(feature = "io-uring")]
impl Backend for Uring {
    type Context = crate::reactor::uring::Context;
    type FileState = crate::reactor::uring::FdState;
    type SocketState = crate::reactor::uring::SocketState;
    type AcceptorState = crate::reactor::uring::AcceptorState;

    type OpenFileSender = crate::reactor::uring::OpenFileSender;
    type CloseSender = crate::reactor::uring::CloseSender;
    type ReadSomeSender = crate::reactor::uring::ReadSomeSender;
    type WriteSomeSender = crate::reactor::uring::WriteSomeSender;
    type SocketOpenSender = crate::reactor::uring::SocketOpenSender;
    type AcceptorOpenSender = crate::reactor::uring::AcceptorOpenSender;
    type ConnectSender = crate::reactor::uring::ConnectSender;
    type AcceptSender = crate::reactor::uring::AcceptSender;
    type SendMsgSender = crate::reactor::uring::SendMsgSender;
    type ScheduleSender = crate::reactor::uring::ScheduleSender;
    type RunSender = crate::reactor::uring::RunSender;

    fn new_context(config: &ContextConfig) -> io::Result<Arc<Self::Context>> {
        crate::reactor::uring::Context::with_config(config)
    }

    fn run(ctx: &Arc<Self::Context>, mode: RunMode) -> Self::RunSender {
        crate::reactor::uring::RunSender::new(ctx.clone(), mode)
    }

    fn schedule(ctx: &Arc<Self::Context>) -> Self::ScheduleSender {
        crate::reactor::uring::ScheduleSender::new(ctx.clone())
    }

    fn request_stop(ctx: &Arc<Self::Context>) {
        ctx.request_stop();
    }

    fn run_until_empty(ctx: &Arc<Self::Context>) -> io::Result<()> {
        ctx.run_until_empty()
    }

    fn open_file(ctx: &Arc<Self::Context>, request: OpenRequest) -> Self::OpenFileSender {
        crate::reactor::uring::OpenFileSender::new(ctx.clone(), request)
    }

    fn adopt_fd(ctx: &Arc<Self::Context>, fd: RawFd) -> io::Result<Self::FileState> {
        Ok(crate::reactor::uring::FdState::new(ctx.clone(), fd))
    }

    fn close_file(state: &Self::FileState) -> Self::CloseSender {
        crate::reactor::uring::CloseSender::new(state.ctx().clone(), state.native_handle(), None)
    }

    fn read_some(
        state: &Self::FileState,
        buffers: MutableBufferSpan,
        offset: Option<u64>,
    ) -> Self::ReadSomeSender {
        crate::reactor::uring::ReadSomeSender::new(
            state.ctx().clone(),
            state.native_handle(),
            buffers,
            offset,
        )
    }

    fn write_some(
        state: &Self::FileState,
        buffers: ConstBufferSpan,
        offset: Option<u64>,
    ) -> Self::WriteSomeSender {
        crate::reactor::uring::WriteSomeSender::new(
            state.ctx().clone(),
            state.native_handle(),
            buffers,
            offset,
        )
    }

    fn open_socket(ctx: &Arc<Self::Context>, protocol: Protocol) -> Self::SocketOpenSender {
        crate::reactor::uring::SocketOpenSender::new(ctx.clone(), protocol)
    }

    fn open_acceptor(
        ctx: &Arc<Self::Context>,
        protocol: Protocol,
        endpoint: Endpoint,
        options: SocketOptions,
    ) -> Self::AcceptorOpenSender {
        crate::reactor::uring::AcceptorOpenSender::new(ctx.clone(), protocol, endpoint, options)
    }

    fn socket_fd_state(state: &Self::SocketState) -> Self::FileState {
        state.fd().clone()
    }

    fn close_socket(state: &Self::SocketState) -> Self::CloseSender {
        crate::reactor::uring::CloseSender::new(
            state.fd().ctx().clone(),
            state.fd().native_handle(),
            None,
        )
    }

    fn close_acceptor(state: &Self::AcceptorState) -> Self::CloseSender {
        crate::reactor::uring::CloseSender::new(
            state.fd().ctx().clone(),
            state.fd().native_handle(),
            state.unlink_path().cloned(),
        )
    }

    fn connect(state: &Self::SocketState, endpoint: Endpoint) -> Self::ConnectSender {
        crate::reactor::uring::ConnectSender::new(state.clone(), endpoint)
    }

    fn bind(state: &Self::SocketState, endpoint: &Endpoint) -> io::Result<()> {
        state.bind(endpoint)
    }

    fn accept_once(state: &Self::AcceptorState) -> Self::AcceptSender {
        crate::reactor::uring::AcceptSender::new(state.clone())
    }

    fn sendmsg(state: &Self::SocketState, buffers: ConstBufferSpan) -> Self::SendMsgSender {
        crate::reactor::uring::SendMsgSender::new(state.clone(), buffers)
    }

    fn local_endpoint(state: &Self::SocketState) -> io::Result<Endpoint> {
        state.local_endpoint()
    }

    fn remote_endpoint(state: &Self::SocketState) -> io::Result<Endpoint> {
        state.remote_endpoint()
    }

    fn acceptor_local_endpoint(state: &Self::AcceptorState) -> io::Result<Endpoint> {
        state.local_endpoint()
    }
}
