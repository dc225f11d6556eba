//! File operations over the ring: close, open, read, write.

use crate::buffer::{ConstBufferSpan, MutableBufferSpan};
use crate::exec::{Operation, Receiver, Sender};
use crate::open_options::OpenRequest;
use io_uring::{opcode, types};
use std::ffi::CString;
use std::io;
use std::marker::PhantomPinned;
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::pin::Pin;
use std::ptr::NonNull;
use std::sync::Arc;

use super::context::Context;
use super::operation::{start_submission, CompletionBase};
use super::state::FdState;
use crate::reactor::seat::OpSeat;

/// Offset value meaning "use the file position".
const CURRENT_POSITION: u64 = u64::MAX;

fn ring_error(result: i32) -> io::Error {
    io::Error::from_raw_os_error(-result)
}

/// Sender releasing a descriptor via the `CLOSE` opcode.
pub struct CloseSender {
    ctx: Arc<Context>,
    fd: RawFd,
    unlink: Option<PathBuf>,
}

impl CloseSender {
    pub(crate) fn new(ctx: Arc<Context>, fd: RawFd, unlink: Option<PathBuf>) -> Self {
        Self { ctx, fd, unlink }
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
            base: CompletionBase::new(self.ctx, complete_close::<R>),
            fd: self.fd,
            unlink: self.unlink,
            seat: OpSeat::new(receiver),
            _pin: PhantomPinned,
        }
    }
}

/// Operation state of [`CloseSender`].
#[repr(C)]
pub struct CloseOperation<R: Receiver<Value = ()>> {
    base: CompletionBase,
    fd: RawFd,
    unlink: Option<PathBuf>,
    seat: OpSeat<R>,
    _pin: PhantomPinned,
}

// SAFETY: completed from the reactor thread; shared base state is atomic.
unsafe impl<R: Receiver<Value = ()>> Send for CloseOperation<R> {}

unsafe fn complete_close<R: Receiver<Value = ()>>(base: NonNull<CompletionBase>, result: i32) {
    let mut op = base.cast::<CloseOperation<R>>();
    let op = op.as_mut();
    if op.base.cancelled() || result == -libc::ECANCELED {
        op.seat.take().set_stopped();
        return;
    }
    if result == 0 {
        if let Some(path) = op.unlink.take() {
            let _ = std::fs::remove_file(path);
        }
        op.seat.take().set_value(());
    } else {
        op.seat.take().set_error(ring_error(result));
    }
}

impl<R: Receiver<Value = ()>> Operation for CloseOperation<R> {
    fn start(self: Pin<&mut Self>) {
        // SAFETY: only field projections; nothing is moved.
        let this = unsafe { self.get_unchecked_mut() };
        let entry = opcode::Close::new(types::Fd(this.fd)).build();
        // SAFETY: base and seat belong to this pinned operation.
        unsafe { start_submission(&this.base, &mut this.seat, entry) };
    }
}

/// Sender opening a file via the `OPENAT` opcode.
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
            base: CompletionBase::new(self.ctx, complete_open::<R>),
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
    base: CompletionBase,
    /// `None` when the path contained an interior NUL byte.
    path: Option<CString>,
    dirfd: libc::c_int,
    flags: libc::c_int,
    mode: libc::mode_t,
    seat: OpSeat<R>,
    _pin: PhantomPinned,
}

// SAFETY: see `CloseOperation`.
unsafe impl<R: Receiver<Value = FdState>> Send for OpenFileOperation<R> {}

unsafe fn complete_open<R: Receiver<Value = FdState>>(base: NonNull<CompletionBase>, result: i32) {
    let mut op = base.cast::<OpenFileOperation<R>>();
    let op = op.as_mut();
    if op.base.cancelled() || result == -libc::ECANCELED {
        op.seat.take().set_stopped();
    } else if result >= 0 {
        let state = FdState::new(op.base.ctx().clone(), result);
        op.seat.take().set_value(state);
    } else {
        op.seat.take().set_error(ring_error(result));
    }
}

impl<R: Receiver<Value = FdState>> Operation for OpenFileOperation<R> {
    fn start(self: Pin<&mut Self>) {
        // SAFETY: only field projections; nothing is moved.
        let this = unsafe { self.get_unchecked_mut() };
        let Some(path) = this.path.as_ref() else {
            this.seat
                .take()
                .set_error(io::Error::from_raw_os_error(libc::EINVAL));
            return;
        };
        let entry = opcode::OpenAt::new(types::Fd(this.dirfd), path.as_ptr())
            .flags(this.flags)
            .mode(this.mode)
            .build();
        // SAFETY: the path's heap storage is owned by this pinned op.
        unsafe { start_submission(&this.base, &mut this.seat, entry) };
    }
}

/// Sender for a partial read (`READ`/`READV`).
pub struct ReadSomeSender {
    ctx: Arc<Context>,
    fd: RawFd,
    buffers: MutableBufferSpan,
    offset: Option<u64>,
}

impl ReadSomeSender {
    pub(crate) fn new(
        ctx: Arc<Context>,
        fd: RawFd,
        buffers: MutableBufferSpan,
        offset: Option<u64>,
    ) -> Self {
        Self {
            ctx,
            fd,
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
            base: CompletionBase::new(self.ctx, complete_transfer::<ReadSomeOperation<R>, R>),
            fd: self.fd,
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
    base: CompletionBase,
    fd: RawFd,
    iovecs: Vec<libc::iovec>,
    offset: Option<u64>,
    seat: OpSeat<R>,
    _pin: PhantomPinned,
}

// SAFETY: see `CloseOperation`; buffers are caller-pinned.
unsafe impl<R: Receiver<Value = usize>> Send for ReadSomeOperation<R> {}

/// Shared completion for byte-count operations.
pub(crate) trait TransferOp {
    type Receiver: Receiver<Value = usize>;
    fn parts(&mut self) -> (&CompletionBase, &mut OpSeat<Self::Receiver>);
}

pub(crate) unsafe fn complete_transfer<O, R>(base: NonNull<CompletionBase>, result: i32)
where
    O: TransferOp<Receiver = R>,
    R: Receiver<Value = usize>,
{
    let mut op = base.cast::<O>();
    let (op_base, seat) = op.as_mut().parts();
    if op_base.cancelled() || result == -libc::ECANCELED {
        seat.take().set_stopped();
    } else if result >= 0 {
        seat.take().set_value(result as usize);
    } else {
        seat.take().set_error(ring_error(result));
    }
}

impl<R: Receiver<Value = usize>> TransferOp for ReadSomeOperation<R> {
    type Receiver = R;
    fn parts(&mut self) -> (&CompletionBase, &mut OpSeat<R>) {
        (&self.base, &mut self.seat)
    }
}

impl<R: Receiver<Value = usize>> Operation for ReadSomeOperation<R> {
    fn start(self: Pin<&mut Self>) {
        // SAFETY: only field projections; nothing is moved.
        let this = unsafe { self.get_unchecked_mut() };
        let offset = this.offset.unwrap_or(CURRENT_POSITION);
        let entry = if this.iovecs.len() == 1 {
            opcode::Read::new(
                types::Fd(this.fd),
                this.iovecs[0].iov_base.cast(),
                this.iovecs[0].iov_len as u32,
            )
            .offset(offset)
            .build()
        } else {
            opcode::Readv::new(
                types::Fd(this.fd),
                this.iovecs.as_ptr(),
                this.iovecs.len() as u32,
            )
            .offset(offset)
            .build()
        };
        // SAFETY: the iovec array's heap storage is owned by this pinned
        // op; target buffers are caller-pinned.
        unsafe { start_submission(&this.base, &mut this.seat, entry) };
    }
}

/// Sender for a partial write (`WRITE`/`WRITEV`).
pub struct WriteSomeSender {
    ctx: Arc<Context>,
    fd: RawFd,
    buffers: ConstBufferSpan,
    offset: Option<u64>,
}

impl WriteSomeSender {
    pub(crate) fn new(
        ctx: Arc<Context>,
        fd: RawFd,
        buffers: ConstBufferSpan,
        offset: Option<u64>,
    ) -> Self {
        Self {
            ctx,
            fd,
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
            base: CompletionBase::new(self.ctx, complete_transfer::<WriteSomeOperation<R>, R>),
            fd: self.fd,
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
    base: CompletionBase,
    fd: RawFd,
    iovecs: Vec<libc::iovec>,
    offset: Option<u64>,
    seat: OpSeat<R>,
    _pin: PhantomPinned,
}

// SAFETY: see `ReadSomeOperation`.
unsafe impl<R: Receiver<Value = usize>> Send for WriteSomeOperation<R> {}

impl<R: Receiver<Value = usize>> TransferOp for WriteSomeOperation<R> {
    type Receiver = R;
    fn parts(&mut self) -> (&CompletionBase, &mut OpSeat<R>) {
        (&self.base, &mut self.seat)
    }
}

impl<R: Receiver<Value = usize>> Operation for WriteSomeOperation<R> {
    fn start(self: Pin<&mut Self>) {
        // SAFETY: only field projections; nothing is moved.
        let this = unsafe { self.get_unchecked_mut() };
        let offset = this.offset.unwrap_or(CURRENT_POSITION);
        let entry = if this.iovecs.len() == 1 {
            opcode::Write::new(
                types::Fd(this.fd),
                this.iovecs[0].iov_base.cast(),
                this.iovecs[0].iov_len as u32,
            )
            .offset(offset)
            .build()
        } else {
            opcode::Writev::new(
                types::Fd(this.fd),
                this.iovecs.as_ptr(),
                this.iovecs.len() as u32,
            )
            .offset(offset)
            .build()
        };
        // SAFETY: see `ReadSomeOperation::start`.
        unsafe { start_submission(&this.base, &mut this.seat, entry) };
    }
}
