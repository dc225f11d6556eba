//! Socket operations: open, connect, accept, sendmsg.
//!
//! Sockets are created `SOCK_NONBLOCK | SOCK_CLOEXEC`, falling back to
//! `fcntl` where the combined flags are rejected. Creation is synchronous
//! (only the fd allocation is immediate; everything that can block goes
//! through the reactor), and failures are translated to the error channel
//! before the operation ever suspends.

use crate::config::LISTEN_BACKLOG;
use crate::exec::{Operation, Receiver, Sender};
use crate::net::{Endpoint, Protocol, SocketOptions};
use std::io;
use std::marker::PhantomPinned;
use std::os::fd::RawFd;
use std::pin::Pin;
use std::ptr::NonNull;
use std::sync::Arc;

use super::context::{Context, Interest, Runnable};
use super::operation::{start_enqueue, FdOpCore, OpSeat};
use super::rw::bad_fd;
use super::state::{AcceptorState, FdState, SocketState};

/// Creates a non-blocking, close-on-exec socket for `protocol`.
pub(crate) fn open_socket_fd(protocol: Protocol) -> io::Result<RawFd> {
    // SAFETY: plain socket(2); result checked.
    let fd = unsafe {
        libc::socket(
            protocol.family(),
            protocol.socket_type() | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            protocol.protocol(),
        )
    };
    if fd >= 0 {
        return Ok(fd);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() != Some(libc::EINVAL) {
        return Err(err);
    }

    // Old kernels reject the combined type flags; fall back to fcntl.
    // SAFETY: plain socket(2); result checked.
    let fd = unsafe { libc::socket(protocol.family(), protocol.socket_type(), protocol.protocol()) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd was just opened by us.
    let rc = unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            -1
        } else if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            -1
        } else {
            libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC)
        }
    };
    if rc < 0 {
        let err = io::Error::last_os_error();
        // SAFETY: fd is ours and unusable.
        unsafe { libc::close(fd) };
        return Err(err);
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
                let token = this.ctx.register_descriptor(fd);
                let state =
                    SocketState::new(FdState::new(this.ctx.clone(), token), this.protocol);
                receiver.set_value(state);
            }
            Err(err) => receiver.set_error(err),
        }
    }
}

/// Sender opening a bound, listening acceptor in one step:
/// socket → `SO_REUSEADDR` → bind → listen.
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
            // SAFETY: fd is ours and not yet registered.
            unsafe { libc::close(fd) };
            receiver.set_error(err);
            return;
        }

        let token = this.ctx.register_descriptor(fd);
        let socket = SocketState::new(FdState::new(this.ctx.clone(), token), this.protocol);
        let unlink_path = if this.options.unlink_on_close {
            this.endpoint.unix_path()
        } else {
            None
        };
        receiver.set_value(AcceptorState::new(socket, unlink_path));
    }
}

/// Sender connecting a socket to a peer endpoint.
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
            core: FdOpCore::new(
                self.state.fd().ctx().clone(),
                self.state.fd().token(),
                dispatch_connect::<R>,
            ),
            endpoint: self.endpoint,
            awaiting_completion: false,
            seat: OpSeat::new(receiver),
            _pin: PhantomPinned,
        }
    }
}

/// Operation state of [`ConnectSender`].
#[repr(C)]
pub struct ConnectOperation<R: Receiver<Value = ()>> {
    core: FdOpCore,
    endpoint: Endpoint,
    /// Set once the kernel reported `EINPROGRESS`; the resume path then
    /// reads `SO_ERROR` for the terminal result.
    awaiting_completion: bool,
    seat: OpSeat<R>,
    _pin: PhantomPinned,
}

// SAFETY: completed from the reactor thread; shared core state is
// synchronized.
unsafe impl<R: Receiver<Value = ()>> Send for ConnectOperation<R> {}

unsafe fn dispatch_connect<R: Receiver<Value = ()>>(task: NonNull<Runnable>) {
    let mut op = task.cast::<ConnectOperation<R>>();
    op.as_mut().run_once();
}

impl<R: Receiver<Value = ()>> ConnectOperation<R> {
    fn run_once(&mut self) {
        if self.core.stop_requested() {
            self.core.release_entry_ref();
            self.seat.take().set_stopped();
            return;
        }
        let Some(entry) = self.core.ensure_entry() else {
            self.seat.take().set_error(bad_fd());
            return;
        };
        // SAFETY: entries outlive operations.
        let fd = unsafe { entry.as_ref() }.raw_fd();

        if self.awaiting_completion {
            self.complete_connect(fd);
            return;
        }

        loop {
            // SAFETY: endpoint bytes are owned by the pinned operation.
            let rc = unsafe { libc::connect(fd, self.endpoint.data(), self.endpoint.len()) };
            if rc == 0 {
                self.core.release_entry_ref();
                self.seat.take().set_value(());
                return;
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::EINPROGRESS) | Some(libc::EALREADY) => {
                    self.awaiting_completion = true;
                    if !self.core.wait_on(Interest::Write) {
                        self.awaiting_completion = false;
                        self.seat.take().set_error(bad_fd());
                    }
                    return;
                }
                _ => {
                    self.core.release_entry_ref();
                    self.seat.take().set_error(err);
                    return;
                }
            }
        }
    }

    fn complete_connect(&mut self, fd: RawFd) {
        self.awaiting_completion = false;
        let mut so_error: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        // SAFETY: out-buffer sized for an int.
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                std::ptr::addr_of_mut!(so_error).cast(),
                &mut len,
            )
        };
        self.core.release_entry_ref();
        if rc < 0 {
            self.seat.take().set_error(io::Error::last_os_error());
        } else if so_error == 0 {
            self.seat.take().set_value(());
        } else {
            self.seat
                .take()
                .set_error(io::Error::from_raw_os_error(so_error));
        }
    }
}

impl<R: Receiver<Value = ()>> Operation for ConnectOperation<R> {
    fn start(self: Pin<&mut Self>) {
        // SAFETY: only field projections; nothing is moved.
        let this = unsafe { self.get_unchecked_mut() };
        // SAFETY: core and seat belong to this pinned operation.
        unsafe { start_enqueue(&this.core, &mut this.seat) };
    }
}

/// Sender accepting one connection from an acceptor.
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
            core: FdOpCore::new(
                self.state.fd().ctx().clone(),
                self.state.fd().token(),
                dispatch_accept::<R>,
            ),
            protocol: self.state.protocol(),
            seat: OpSeat::new(receiver),
            _pin: PhantomPinned,
        }
    }
}

/// Operation state of [`AcceptSender`].
#[repr(C)]
pub struct AcceptOperation<R: Receiver<Value = SocketState>> {
    core: FdOpCore,
    protocol: Protocol,
    seat: OpSeat<R>,
    _pin: PhantomPinned,
}

// SAFETY: see `ConnectOperation`.
unsafe impl<R: Receiver<Value = SocketState>> Send for AcceptOperation<R> {}

unsafe fn dispatch_accept<R: Receiver<Value = SocketState>>(task: NonNull<Runnable>) {
    let mut op = task.cast::<AcceptOperation<R>>();
    op.as_mut().run_once();
}

impl<R: Receiver<Value = SocketState>> AcceptOperation<R> {
    fn run_once(&mut self) {
        if self.core.stop_requested() {
            self.core.release_entry_ref();
            self.seat.take().set_stopped();
            return;
        }
        let Some(entry) = self.core.ensure_entry() else {
            self.seat.take().set_error(bad_fd());
            return;
        };
        // SAFETY: entries outlive operations.
        let fd = unsafe { entry.as_ref() }.raw_fd();

        loop {
            let mut addr = Endpoint::zeroed();
            let mut addrlen = addr.len();
            // SAFETY: out-buffer is sockaddr_storage-sized; the accepted
            // fd inherits NONBLOCK and CLOEXEC from the flags.
            let accepted = unsafe {
                libc::accept4(
                    fd,
                    addr.data_mut(),
                    &mut addrlen,
                    libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                )
            };
            if accepted >= 0 {
                let ctx = self.core.ctx().clone();
                let token = ctx.register_descriptor(accepted);
                let state = SocketState::new(FdState::new(ctx, token), self.protocol);
                self.core.release_entry_ref();
                self.seat.take().set_value(state);
                return;
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => {
                    if !self.core.wait_on(Interest::Read) {
                        self.seat.take().set_error(bad_fd());
                    }
                    return;
                }
                _ => {
                    self.core.release_entry_ref();
                    self.seat.take().set_error(err);
                    return;
                }
            }
        }
    }
}

impl<R: Receiver<Value = SocketState>> Operation for AcceptOperation<R> {
    fn start(self: Pin<&mut Self>) {
        // SAFETY: only field projections; nothing is moved.
        let this = unsafe { self.get_unchecked_mut() };
        // SAFETY: core and seat belong to this pinned operation.
        unsafe { start_enqueue(&this.core, &mut this.seat) };
    }
}

/// Sender transmitting a gather buffer via `sendmsg(2)`.
pub struct SendMsgSender {
    state: SocketState,
    buffers: crate::buffer::ConstBufferSpan,
}

impl SendMsgSender {
    pub(crate) fn new(state: SocketState, buffers: crate::buffer::ConstBufferSpan) -> Self {
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
            core: FdOpCore::new(
                self.state.fd().ctx().clone(),
                self.state.fd().token(),
                dispatch_sendmsg::<R>,
            ),
            iovecs: self.buffers.iovecs(),
            seat: OpSeat::new(receiver),
            _pin: PhantomPinned,
        }
    }
}

/// Operation state of [`SendMsgSender`].
#[repr(C)]
pub struct SendMsgOperation<R: Receiver<Value = usize>> {
    core: FdOpCore,
    iovecs: Vec<libc::iovec>,
    seat: OpSeat<R>,
    _pin: PhantomPinned,
}

// SAFETY: see `ConnectOperation`.
unsafe impl<R: Receiver<Value = usize>> Send for SendMsgOperation<R> {}

unsafe fn dispatch_sendmsg<R: Receiver<Value = usize>>(task: NonNull<Runnable>) {
    let mut op = task.cast::<SendMsgOperation<R>>();
    op.as_mut().run_once();
}

impl<R: Receiver<Value = usize>> SendMsgOperation<R> {
    fn run_once(&mut self) {
        if self.core.stop_requested() {
            self.core.release_entry_ref();
            self.seat.take().set_stopped();
            return;
        }
        let Some(entry) = self.core.ensure_entry() else {
            self.seat.take().set_error(bad_fd());
            return;
        };
        // SAFETY: entries outlive operations.
        let fd = unsafe { entry.as_ref() }.raw_fd();

        loop {
            // SAFETY: msghdr points at iovecs owned by the pinned op; the
            // struct is rebuilt per attempt and not retained by the
            // kernel.
            let rc = unsafe {
                let mut msg: libc::msghdr = std::mem::zeroed();
                msg.msg_iov = self.iovecs.as_mut_ptr();
                msg.msg_iovlen = self.iovecs.len();
                libc::sendmsg(fd, &msg, 0)
            };
            if rc >= 0 {
                self.core.release_entry_ref();
                self.seat.take().set_value(rc as usize);
                return;
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => {
                    if !self.core.wait_on(Interest::Write) {
                        self.seat.take().set_error(bad_fd());
                    }
                    return;
                }
                _ => {
                    self.core.release_entry_ref();
                    self.seat.take().set_error(err);
                    return;
                }
            }
        }
    }
}

impl<R: Receiver<Value = usize>> Operation for SendMsgOperation<R> {
    fn start(self: Pin<&mut Self>) {
        // SAFETY: only field projections; nothing is moved.
        let this = unsafe { self.get_unchecked_mut() };
        // SAFETY: core and seat belong to this pinned operation.
        unsafe { start_enqueue(&this.core, &mut this.seat) };
    }
}
