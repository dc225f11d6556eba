//! Socket operations over the ring: open, connect, accept, sendmsg.
//!
//! Socket creation is a synchronous `socket(2)` call by design — the ring
//! `SOCKET` opcode is not universally available on older kernels, and only
//! the fd allocation is immediate. Connect, accept and sendmsg go through
//! the ring.

use crate::buffer::ConstBufferSpan;
use crate::config::LISTEN_BACKLOG;
use crate::exec::{Operation, Receiver, Sender};
use crate::net::{Endpoint, Protocol, SocketOptions};
use io_uring::{opcode, types};
use std::io;
use std::marker::PhantomPinned;
use std::os::fd::RawFd;
use std::pin::Pin;
use std::ptr::NonNull;
use std::sync::Arc;

use super::context::Context;
use super::operation::{start_submission, CompletionBase};
use super::ops::TransferOp;
use super::state::{AcceptorState, FdState, SocketState};
use crate::reactor::seat::OpSeat;

fn ring_error(result: i32) -> io::Error {
    io::Error::from_raw_os_error(-result)
}

/// Creates a close-on-exec socket for `protocol`.
pub(crate) fn open_socket_fd(protocol: Protocol) -> io::Result<RawFd> {
    // SAFETY: plain socket(2); result checked.
    let fd = unsafe {
        libc::socket(
            protocol.family(),
            protocol.socket_type() | libc::SOCK_CLOEXEC,
            protocol.protocol(),
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

/// Sender creating a socket and yielding its state.
pub struct SocketOpenSender {
    ctx: Arc<Context>,
    protocol: Protocol,
}

impl SocketOpenSender {
    pub(crate) fn new(ctx: Arc<Context>, protocol: Protocol) -> Self {
        Self { ctx, protocol }
    }
}

impl Sender for SocketOpenSender {
    type Value = SocketState;
    type Operation<R>
        = SocketOpenOperation<R>
    where
        R: Receiver<Value = SocketState>;

    fn connect<R>(self, receiver: R) -> Self::Operation<R>
    where
        R: Receiver<Value = SocketState>,
    {
        SocketOpenOperation {
            ctx: self.ctx,
            protocol: self.protocol,
            receiver: Some(receiver),
        }
    }
}

/// Operation state of [`SocketOpenSender`].
pub struct SocketOpenOperation<R> {
    ctx: Arc<Context>,
    protocol: Protocol,
    receiver: Option<R>,
}

impl<R: Receiver<Value = SocketState>> Operation for SocketOpenOperation<R> {
    fn start(self: Pin<&mut Self>) {
        // SAFETY: only the Option is taken; nothing is moved.
        let this = unsafe { self.get_unchecked_mut() };
        let receiver = this.receiver.take().expect("operation started twice");
        if receiver.stop_token().stop_requested() {
            receiver.set_stopped();
            return;
        }
        match open_socket_fd(this.protocol) {
            Ok(fd) => {
                let state = SocketState::new(FdState::new(this.ctx.clone(), fd), this.protocol);
                receiver.set_value(state);
            }
            Err(err) => receiver.set_error(err),
        }
    }
}

/// Sender opening a bound, listening acceptor in one step.
pub struct AcceptorOpenSender {
    ctx: Arc<Context>,
    protocol: Protocol,
    endpoint: Endpoint,
    options: SocketOptions,
}

impl AcceptorOpenSender {
    pub(crate) fn new(
        ctx: Arc<Context>,
        protocol: Protocol,
        endpoint: Endpoint,
        options: SocketOptions,
    ) -> Self {
        Self {
            ctx,
            protocol,
            endpoint,
            options,
        }
    }
}

impl Sender for AcceptorOpenSender {
    type Value = AcceptorState;
    type Operation<R>
        = AcceptorOpenOperation<R>
    where
        R: Receiver<Value = AcceptorState>;

    fn connect<R>(self, receiver: R) -> Self::Operation<R>
    where
        R: Receiver<Value = AcceptorState>,
    {
        AcceptorOpenOperation {
            ctx: self.ctx,
            protocol: self.protocol,
            endpoint: self.endpoint,
            options: self.options,
            receiver: Some(receiver),
        }
    }
}

/// Operation state of [`AcceptorOpenSender`].
pub struct AcceptorOpenOperation<R> {
    ctx: Arc<Context>,
    protocol: Protocol,
    endpoint: Endpoint,
    options: SocketOptions,
    receiver: Option<R>,
}

fn listen_socket(fd: RawFd, endpoint: &Endpoint) -> io::Result<()> {
    let one: libc::c_int = 1;
    // SAFETY: fd is a fresh socket owned by the caller.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            std::ptr::addr_of!(one).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: the endpoint's native bytes and exact byte size are passed
    // through unchanged.
    if unsafe { libc::bind(fd, endpoint.data(), endpoint.len()) } < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd is bound.
    if unsafe { libc::listen(fd, LISTEN_BACKLOG) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl<R: Receiver<Value = AcceptorState>> Operation for AcceptorOpenOperation<R> {
    fn start(self: Pin<&mut Self>) {
        // SAFETY: only the Option is taken; nothing is moved.
        let this = unsafe { self.get_unchecked_mut() };
        let receiver = this.receiver.take().expect("operation started twice");
        if receiver.stop_token().stop_requested() {
            receiver.set_stopped();
            return;
        }

        let fd = match open_socket_fd(this.protocol) {
            Ok(fd) => fd,
            Err(err) => {
                receiver.set_error(err);
                return;
            }
        };
        if let Err(err) = listen_socket(fd, &this.endpoint) {
            // SAFETY: fd is ours and not yet handed out.
            unsafe { libc::close(fd) };
            receiver.set_error(err);
            return;
        }

        let socket = SocketState::new(FdState::new(this.ctx.clone(), fd), this.protocol);
        let unlink_path = if this.options.unlink_on_close {
            this.endpoint.unix_path()
        } else {
            None
        };
        receiver.set_value(AcceptorState::new(socket, unlink_path));
    }
}

/// Sender connecting a socket via the `CONNECT` opcode.
pub struct ConnectSender {
    state: SocketState,
    endpoint: Endpoint,
}

impl ConnectSender {
    pub(crate) fn new(state: SocketState, endpoint: Endpoint) -> Self {
        Self { state, endpoint }
    }
}

impl Sender for ConnectSender {
    type Value = ();
    type Operation<R>
        = ConnectOperation<R>
    where
        R: Receiver<Value = ()>;

    fn connect<R>(self, receiver: R) -> Self::Operation<R>
    where
        R: Receiver<Value = ()>,
    {
        ConnectOperation {
            base: CompletionBase::new(self.state.fd().ctx().clone(), complete_connect::<R>),
            fd: self.state.fd().native_handle(),
            endpoint: self.endpoint,
            seat: OpSeat::new(receiver),
            _pin: PhantomPinned,
        }
    }
}

/// Operation state of [`ConnectSender`].
#[repr(C)]
pub struct ConnectOperation<R: Receiver<Value = ()>> {
    base: CompletionBase,
    fd: RawFd,
    endpoint: Endpoint,
    seat: OpSeat<R>,
    _pin: PhantomPinned,
}

// SAFETY: completed from the reactor thread; shared base state is atomic.
unsafe impl<R: Receiver<Value = ()>> Send for ConnectOperation<R> {}

unsafe fn complete_connect<R: Receiver<Value = ()>>(base: NonNull<CompletionBase>, result: i32) {
    let mut op = base.cast::<ConnectOperation<R>>();
    let op = op.as_mut();
    if op.base.cancelled() || result == -libc::ECANCELED {
        op.seat.take().set_stopped();
    } else if result == 0 {
        op.seat.take().set_value(());
    } else {
        op.seat.take().set_error(ring_error(result));
    }
}

impl<R: Receiver<Value = ()>> Operation for ConnectOperation<R> {
    fn start(self: Pin<&mut Self>) {
        // SAFETY: only field projections; nothing is moved.
        let this = unsafe { self.get_unchecked_mut() };
        let entry = opcode::Connect::new(
            types::Fd(this.fd),
            this.endpoint.data(),
            this.endpoint.len(),
        )
        .build();
        // SAFETY: the endpoint bytes live inside this pinned operation.
        unsafe { start_submission(&this.base, &mut this.seat, entry) };
    }
}

/// Sender accepting one connection via the `ACCEPT` opcode.
pub struct AcceptSender {
    state: AcceptorState,
}

impl AcceptSender {
    pub(crate) fn new(state: AcceptorState) -> Self {
        Self { state }
    }
}

impl Sender for AcceptSender {
    type Value = SocketState;
    type Operation<R>
        = AcceptOperation<R>
    where
        R: Receiver<Value = SocketState>;

    fn connect<R>(self, receiver: R) -> Self::Operation<R>
    where
        R: Receiver<Value = SocketState>,
    {
        AcceptOperation {
            base: CompletionBase::new(self.state.fd().ctx().clone(), complete_accept::<R>),
            fd: self.state.fd().native_handle(),
            protocol: self.state.protocol(),
            peer: Endpoint::zeroed(),
            peer_len: Endpoint::zeroed().len(),
            seat: OpSeat::new(receiver),
            _pin: PhantomPinned,
        }
    }
}

/// Operation state of [`AcceptSender`].
#[repr(C)]
pub struct AcceptOperation<R: Receiver<Value = SocketState>> {
    base: CompletionBase,
    fd: RawFd,
    protocol: Protocol,
    /// Kernel-filled peer address; pinned with the operation.
    peer: Endpoint,
    peer_len: libc::socklen_t,
    seat: OpSeat<R>,
    _pin: PhantomPinned,
}

// SAFETY: see `ConnectOperation`.
unsafe impl<R: Receiver<Value = SocketState>> Send for AcceptOperation<R> {}

unsafe fn complete_accept<R: Receiver<Value = SocketState>>(
    base: NonNull<CompletionBase>,
    result: i32,
) {
    let mut op = base.cast::<AcceptOperation<R>>();
    let op = op.as_mut();
    if op.base.cancelled() || result == -libc::ECANCELED {
        op.seat.take().set_stopped();
    } else if result >= 0 {
        let state = SocketState::new(
            FdState::new(op.base.ctx().clone(), result),
            op.protocol,
        );
        op.seat.take().set_value(state);
    } else {
        op.seat.take().set_error(ring_error(result));
    }
}

impl<R: Receiver<Value = SocketState>> Operation for AcceptOperation<R> {
    fn start(self: Pin<&mut Self>) {
        // SAFETY: only field projections; nothing is moved.
        let this = unsafe { self.get_unchecked_mut() };
        this.peer_len = this.peer.len();
        let entry = opcode::Accept::new(
            types::Fd(this.fd),
            this.peer.data_mut(),
            std::ptr::addr_of_mut!(this.peer_len),
        )
        .flags(libc::SOCK_CLOEXEC)
        .build();
        // SAFETY: the peer address storage is pinned with this operation
        // for the kernel to fill.
        unsafe { start_submission(&this.base, &mut this.seat, entry) };
    }
}

/// Sender transmitting a gather buffer via the `SENDMSG` opcode.
pub struct SendMsgSender {
    state: SocketState,
    buffers: ConstBufferSpan,
}

impl SendMsgSender {
    pub(crate) fn new(state: SocketState, buffers: ConstBufferSpan) -> Self {
        Self { state, buffers }
    }
}

impl Sender for SendMsgSender {
    type Value = usize;
    type Operation<R>
        = SendMsgOperation<R>
    where
        R: Receiver<Value = usize>;

    fn connect<R>(self, receiver: R) -> Self::Operation<R>
    where
        R: Receiver<Value = usize>,
    {
        SendMsgOperation {
            base: CompletionBase::new(
                self.state.fd().ctx().clone(),
                super::ops::complete_transfer::<SendMsgOperation<R>, R>,
            ),
            fd: self.state.fd().native_handle(),
            iovecs: self.buffers.iovecs(),
            // SAFETY: zeroed msghdr is a valid all-null value; the real
            // pointers are filled in at start.
            msghdr: unsafe { std::mem::zeroed() },
            seat: OpSeat::new(receiver),
            _pin: PhantomPinned,
        }
    }
}

/// Operation state of [`SendMsgSender`].
#[repr(C)]
pub struct SendMsgOperation<R: Receiver<Value = usize>> {
    base: CompletionBase,
    fd: RawFd,
    iovecs: Vec<libc::iovec>,
    /// Pinned with the operation; points at `iovecs`.
    msghdr: libc::msghdr,
    seat: OpSeat<R>,
    _pin: PhantomPinned,
}

// SAFETY: see `ConnectOperation`; gather buffers are caller-pinned.
unsafe impl<R: Receiver<Value = usize>> Send for SendMsgOperation<R> {}

impl<R: Receiver<Value = usize>> TransferOp for SendMsgOperation<R> {
    type Receiver = R;
    fn parts(&mut self) -> (&CompletionBase, &mut OpSeat<R>) {
        (&self.base, &mut self.seat)
    }
}

impl<R: Receiver<Value = usize>> Operation for SendMsgOperation<R> {
    fn start(self: Pin<&mut Self>) {
        // SAFETY: only field projections; nothing is moved.
        let this = unsafe { self.get_unchecked_mut() };
        this.msghdr.msg_iov = this.iovecs.as_mut_ptr();
        this.msghdr.msg_iovlen = this.iovecs.len();
        let entry =
            opcode::SendMsg::new(types::Fd(this.fd), std::ptr::addr_of!(this.msghdr)).build();
        // SAFETY: the msghdr and iovec array are pinned with this
        // operation; gather buffers are caller-pinned.
        unsafe { start_submission(&this.base, &mut this.seat, entry) };
    }
}
