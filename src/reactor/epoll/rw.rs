//! Read and write operations (single and vectored, optionally offset).
//!
//! One operation type per direction covers both shapes: a one-element span
//! issues `read`/`pread` (`write`/`pwrite`), a longer span issues
//! `readv`/`preadv` (`writev`/`pwritev`). The retry loop is shared across
//! all fd operations: `EINTR` retries, `EAGAIN` arms interest and
//! suspends, anything else is terminal.

use crate::buffer::{ConstBufferSpan, MutableBufferSpan};
use crate::exec::{Operation, Receiver, Sender};
use std::io;
use std::marker::PhantomPinned;
use std::pin::Pin;
use std::ptr::NonNull;
use std::sync::Arc;

use super::context::{Context, DescriptorToken, Interest, Runnable};
use super::operation::{start_enqueue, FdOpCore, OpSeat};

pub(crate) fn bad_fd() -> io::Error {
    io::Error::from_raw_os_error(libc::EBADF)
}

/// Sender for a partial read.
pub struct ReadSomeSender {
    ctx: Arc<Context>,
    token: DescriptorToken,
    buffers: MutableBufferSpan,
    offset: Option<u64>,
}

impl ReadSomeSender {
    pub(crate) fn new(
        ctx: Arc<Context>,
        token: DescriptorToken,
        buffers: MutableBufferSpan,
        offset: Option<u64>,
    ) -> Self {
        Self {
            ctx,
            token,
            buffers,
            offset,
        }
    }
}

impl Sender for ReadSomeSender {
    type Value = usize;
    type Operation<R>
        = ReadSomeOperation<R>
    where
        R: Receiver<Value = usize>;

    fn connect<R>(self, receiver: R) -> Self::Operation<R>
    where
        R: Receiver<Value = usize>,
    {
        ReadSomeOperation {
            core: FdOpCore::new(self.ctx, self.token, dispatch_read::<R>),
            total_len: self.buffers.total_len(),
            iovecs: self.buffers.iovecs(),
            offset: self.offset,
            seat: OpSeat::new(receiver),
            _pin: PhantomPinned,
        }
    }
}

/// Operation state of [`ReadSomeSender`].
#[repr(C)]
pub struct ReadSomeOperation<R: Receiver<Value = usize>> {
    core: FdOpCore,
    total_len: usize,
    iovecs: Vec<libc::iovec>,
    offset: Option<u64>,
    seat: OpSeat<R>,
    _pin: PhantomPinned,
}

// SAFETY: the operation is completed from the reactor thread; all shared
// state inside the core is synchronized, the rest is accessed only by the
// executing thread.
unsafe impl<R: Receiver<Value = usize>> Send for ReadSomeOperation<R> {}

unsafe fn dispatch_read<R: Receiver<Value = usize>>(task: NonNull<Runnable>) {
    // The runnable heads the core, which heads the repr(C) operation.
    let mut op = task.cast::<ReadSomeOperation<R>>();
    op.as_mut().run_once();
}

impl<R: Receiver<Value = usize>> ReadSomeOperation<R> {
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
        if self.total_len == 0 {
            self.core.release_entry_ref();
            self.seat.take().set_value(0);
            return;
        }

        loop {
            // SAFETY: entries outlive operations; fd validity is handled
            // by the syscall result.
            let fd = unsafe { entry.as_ref() }.raw_fd();
            // SAFETY: the iovecs point into caller-pinned buffers for the
            // operation's lifetime.
            let rc = unsafe {
                match (self.iovecs.len(), self.offset) {
                    (1, None) => libc::read(fd, self.iovecs[0].iov_base, self.iovecs[0].iov_len),
                    (1, Some(offset)) => libc::pread(
                        fd,
                        self.iovecs[0].iov_base,
                        self.iovecs[0].iov_len,
                        offset as libc::off_t,
                    ),
                    (n, None) => libc::readv(fd, self.iovecs.as_ptr(), n as libc::c_int),
                    (n, Some(offset)) => libc::preadv(
                        fd,
                        self.iovecs.as_ptr(),
                        n as libc::c_int,
                        offset as libc::off_t,
                    ),
                }
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

impl<R: Receiver<Value = usize>> Operation for ReadSomeOperation<R> {
    fn start(self: Pin<&mut Self>) {
        // SAFETY: only field projections; nothing is moved.
        let this = unsafe { self.get_unchecked_mut() };
        // SAFETY: core and seat belong to this pinned operation.
        unsafe { start_enqueue(&this.core, &mut this.seat) };
    }
}

/// Sender for a partial write.
pub struct WriteSomeSender {
    ctx: Arc<Context>,
    token: DescriptorToken,
    buffers: ConstBufferSpan,
    offset: Option<u64>,
}

impl WriteSomeSender {
    pub(crate) fn new(
        ctx: Arc<Context>,
        token: DescriptorToken,
        buffers: ConstBufferSpan,
        offset: Option<u64>,
    ) -> Self {
        Self {
            ctx,
            token,
            buffers,
            offset,
        }
    }
}

impl Sender for WriteSomeSender {
    type Value = usize;
    type Operation<R>
        = WriteSomeOperation<R>
    where
        R: Receiver<Value = usize>;

    fn connect<R>(self, receiver: R) -> Self::Operation<R>
    where
        R: Receiver<Value = usize>,
    {
        WriteSomeOperation {
            core: FdOpCore::new(self.ctx, self.token, dispatch_write::<R>),
            total_len: self.buffers.total_len(),
            iovecs: self.buffers.iovecs(),
            offset: self.offset,
            seat: OpSeat::new(receiver),
            _pin: PhantomPinned,
        }
    }
}

/// Operation state of [`WriteSomeSender`].
#[repr(C)]
pub struct WriteSomeOperation<R: Receiver<Value = usize>> {
    core: FdOpCore,
    total_len: usize,
    iovecs: Vec<libc::iovec>,
    offset: Option<u64>,
    seat: OpSeat<R>,
    _pin: PhantomPinned,
}

// SAFETY: see `ReadSomeOperation`.
unsafe impl<R: Receiver<Value = usize>> Send for WriteSomeOperation<R> {}

unsafe fn dispatch_write<R: Receiver<Value = usize>>(task: NonNull<Runnable>) {
    let mut op = task.cast::<WriteSomeOperation<R>>();
    op.as_mut().run_once();
}

impl<R: Receiver<Value = usize>> WriteSomeOperation<R> {
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
        if self.total_len == 0 {
            self.core.release_entry_ref();
            self.seat.take().set_value(0);
            return;
        }

        loop {
            // SAFETY: see `ReadSomeOperation::run_once`.
            let fd = unsafe { entry.as_ref() }.raw_fd();
            // SAFETY: iovecs point into caller-pinned buffers.
            let rc = unsafe {
                match (self.iovecs.len(), self.offset) {
                    (1, None) => libc::write(fd, self.iovecs[0].iov_base, self.iovecs[0].iov_len),
                    (1, Some(offset)) => libc::pwrite(
                        fd,
                        self.iovecs[0].iov_base,
                        self.iovecs[0].iov_len,
                        offset as libc::off_t,
                    ),
                    (n, None) => libc::writev(fd, self.iovecs.as_ptr(), n as libc::c_int),
                    (n, Some(offset)) => libc::pwritev(
                        fd,
                        self.iovecs.as_ptr(),
                        n as libc::c_int,
                        offset as libc::off_t,
                    ),
                }
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

impl<R: Receiver<Value = usize>> Operation for WriteSomeOperation<R> {
    fn start(self: Pin<&mut Self>) {
        // SAFETY: only field projections; nothing is moved.
        let this = unsafe { self.get_unchecked_mut() };
        // SAFETY: core and seat belong to this pinned operation.
        unsafe { start_enqueue(&this.core, &mut this.seat) };
    }
}
