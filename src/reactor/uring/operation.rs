//! Completion base shared by io_uring operations.
//!
//! Each operation embeds a [`CompletionBase`] as its first field and
//! registers the base's address as SQE user data. The reactor casts the
//! user data back and invokes the completion function with the CQE's
//! result. Cancellation raises the base's flag and issues `ASYNC_CANCEL`;
//! a `-ECANCELED` result or a raised flag maps to the stopped channel.

use crate::exec::Receiver;
use crate::reactor::seat::OpSeat;
use io_uring::squeue;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::context::Context;

/// Completion-dispatch record registered as SQE user data.
#[repr(C)]
pub(crate) struct CompletionBase {
    complete: unsafe fn(NonNull<CompletionBase>, i32),
    cancelled: AtomicBool,
    ctx: Arc<Context>,
}

impl CompletionBase {
    pub(crate) fn new(ctx: Arc<Context>, complete: unsafe fn(NonNull<CompletionBase>, i32)) -> Self {
        Self {
            complete,
            cancelled: AtomicBool::new(false),
            ctx,
        }
    }

    pub(crate) fn ctx(&self) -> &Arc<Context> {
        &self.ctx
    }

    pub(crate) fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Invokes the operation's completion function.
    ///
    /// # Safety
    ///
    /// `this` must be the user data of a CQE belonging to a live, pinned,
    /// not-yet-completed operation.
    pub(crate) unsafe fn complete(this: NonNull<CompletionBase>, result: i32) {
        (this.as_ref().complete)(this, result);
    }
}

/// Common start path of io_uring submission operations: observe an
/// already-stopped token, subscribe the cancel callback, stamp the
/// operation's address as user data and submit.
///
/// Submission failures (including `ENOSPC` after one retry) are reported
/// on the error channel before the operation ever suspends.
///
/// # Safety
///
/// `base` and `seat` must belong to the same pinned operation, which must
/// stay alive until its terminal signal. `entry`'s buffers must be owned
/// by that operation.
pub(crate) unsafe fn start_submission<R>(
    base: &CompletionBase,
    seat: &mut OpSeat<R>,
    entry: squeue::Entry,
) where
    R: Receiver,
{
    let token = seat.stop_token();
    if token.stop_requested() {
        seat.take().set_stopped();
        return;
    }
    let target = BasePointer(NonNull::from(base));
    let ctx = base.ctx().clone();
    seat.install_callback(token.on_stop(move || {
        let target = target;
        ctx.cancel(target.0);
    }));

    let entry = entry.user_data(base as *const CompletionBase as u64);
    if let Err(err) = base.ctx().submit_entry(entry) {
        seat.take().set_error(err);
    }
    // After a successful submit the kernel owns the operation: the CQE may
    // already be in flight on the reactor thread, so nothing may touch the
    // operation past this point.
}

/// Pointer wrapper making the cancel closure sendable.
#[derive(Clone, Copy)]
struct BasePointer(NonNull<CompletionBase>);

// SAFETY: the pointee is pinned and internally synchronized; cancel is
// designed for cross-thread calls.
unsafe impl Send for BasePointer {}
