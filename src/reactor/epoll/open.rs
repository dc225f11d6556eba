//! File open and descriptor close operations.
//!
//! `openat(2)` is issued on the reactor thread as a queued step; the
//! resulting fd is registered in the slot table before the value is
//! delivered. Close is the slot-table release: waiters are torn out,
//! interest is dropped, the fd is closed and the epoch advances.

use crate::exec::{Operation, Receiver, Sender};
use crate::open_options::OpenRequest;
use std::ffi::CString;
use std::io;
use std::marker::PhantomPinned;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::pin::Pin;
use std::ptr::NonNull;
use std::sync::Arc;

use super::context::{Context, DescriptorToken, Runnable};
use super::operation::{start_enqueue_queued, OpSeat, QueuedCore};
use super::state::FdState;

/// Sender opening a file and yielding its descriptor state.
pub struct OpenFileSender {
    ctx: Arc<Context>,
    request: OpenRequest,
}

impl OpenFileSender {
    pub(crate) fn new(ctx: Arc<Context>, request: OpenRequest) -> Self {
        Self { ctx, request }
    }
}

impl Sender for OpenFileSender {
    type Value = FdState;
    type Operation<R>
        = OpenFileOperation<R>
    where
        R: Receiver<Value = FdState>;

    fn connect<R>(self, receiver: R) -> Self::Operation<R>
    where
        R: Receiver<Value = FdState>,
    {
        OpenFileOperation {
            core: QueuedCore::new(self.ctx, dispatch_open::<R>),
            path: CString::new(self.request.path.as_os_str().as_bytes()).ok(),
            dirfd: self.request.dirfd,
            flags: self.request.flags,
            mode: self.request.mode,
            seat: OpSeat::new(receiver),
            _pin: PhantomPinned,
        }
    }
}

/// Operation state of [`OpenFileSender`].
#[repr(C)]
pub struct OpenFileOperation<R: Receiver<Value = FdState>> {
    core: QueuedCore,
    /// `None` when the path contained an interior NUL byte.
    path: Option<CString>,
    dirfd: libc::c_int,
    flags: libc::c_int,
    mode: libc::mode_t,
    seat: OpSeat<R>,
    _pin: PhantomPinned,
}

// SAFETY: completed from the reactor thread; shared state is atomic.
unsafe impl<R: Receiver<Value = FdState>> Send for OpenFileOperation<R> {}

unsafe fn dispatch_open<R: Receiver<Value = FdState>>(task: NonNull<Runnable>) {
    let mut op = task.cast::<OpenFileOperation<R>>();
    op.as_mut().run_once();
}

impl<R: Receiver<Value = FdState>> OpenFileOperation<R> {
    fn run_once(&mut self) {
        if self.core.cancelled() {
            self.seat.take().set_stopped();
            return;
        }
        let Some(path) = self.path.as_ref() else {
            self.seat
                .take()
                .set_error(io::Error::from_raw_os_error(libc::EINVAL));
            return;
        };
        loop {
            // SAFETY: path is a valid NUL-terminated string owned by the
            // pinned operation.
            let fd = unsafe {
                libc::openat(self.dirfd, path.as_ptr(), self.flags, libc::c_uint::from(self.mode))
            };
            if fd >= 0 {
                let token = self.core.ctx().register_descriptor(fd);
                let state = FdState::new(self.core.ctx().clone(), token);
                self.seat.take().set_value(state);
                return;
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            self.seat.take().set_error(err);
            return;
        }
    }
}

impl<R: Receiver<Value = FdState>> Operation for OpenFileOperation<R> {
    fn start(self: Pin<&mut Self>) {
        // SAFETY: only field projections; nothing is moved.
        let this = unsafe { self.get_unchecked_mut() };
        // SAFETY: core and seat belong to this pinned operation.
        unsafe { start_enqueue_queued(&this.core, &mut this.seat) };
    }
}

/// Sender releasing a descriptor (and optionally unlinking a socket
/// path).
pub struct CloseSender {
    ctx: Arc<Context>,
    token: DescriptorToken,
    unlink: Option<PathBuf>,
}

impl CloseSender {
    pub(crate) fn new(ctx: Arc<Context>, token: DescriptorToken, unlink: Option<PathBuf>) -> Self {
        Self { ctx, token, unlink }
    }
}

impl Sender for CloseSender {
    type Value = ();
    type Operation<R>
        = CloseOperation<R>
    where
        R: Receiver<Value = ()>;

    fn connect<R>(self, receiver: R) -> Self::Operation<R>
    where
        R: Receiver<Value = ()>,
    {
        CloseOperation {
            core: QueuedCore::new(self.ctx, dispatch_close::<R>),
            token: self.token,
            unlink: self.unlink,
            seat: OpSeat::new(receiver),
            _pin: PhantomPinned,
        }
    }
}

/// Operation state of [`CloseSender`].
#[repr(C)]
pub struct CloseOperation<R: Receiver<Value = ()>> {
    core: QueuedCore,
    token: DescriptorToken,
    unlink: Option<PathBuf>,
    seat: OpSeat<R>,
    _pin: PhantomPinned,
}

// SAFETY: see `OpenFileOperation`.
unsafe impl<R: Receiver<Value = ()>> Send for CloseOperation<R> {}

unsafe fn dispatch_close<R: Receiver<Value = ()>>(task: NonNull<Runnable>) {
    let mut op = task.cast::<CloseOperation<R>>();
    op.as_mut().run_once();
}

impl<R: Receiver<Value = ()>> CloseOperation<R> {
    fn run_once(&mut self) {
        if self.core.cancelled() {
            self.seat.take().set_stopped();
            return;
        }
        let result = self.core.ctx().release_entry(self.token);
        if let Some(path) = self.unlink.take() {
            let _ = std::fs::remove_file(path);
        }
        match result {
            Ok(()) => self.seat.take().set_value(()),
            Err(err) => self.seat.take().set_error(err),
        }
    }
}

impl<R: Receiver<Value = ()>> Operation for CloseOperation<R> {
    fn start(self: Pin<&mut Self>) {
        // SAFETY: only field projections; nothing is moved.
        let this = unsafe { self.get_unchecked_mut() };
        // SAFETY: core and seat belong to this pinned operation.
        unsafe { start_enqueue_queued(&this.core, &mut this.seat) };
    }
}
