//! Schedule sender: run a continuation on the reactor thread via a `NOP`
//! completion.

use crate::exec::{Operation, Receiver, Sender};
use crate::reactor::seat::OpSeat;
use io_uring::opcode;
use std::marker::PhantomPinned;
use std::pin::Pin;
use std::ptr::NonNull;
use std::sync::Arc;

use super::context::Context;
use super::operation::{start_submission, CompletionBase};

/// Sender completing with `()` on the reactor thread.
pub struct ScheduleSender {
    ctx: Arc<Context>,
}

impl ScheduleSender {
    pub(crate) fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }
}

impl Sender for ScheduleSender {
    type Value = ();
    type Operation<R>
        = ScheduleOperation<R>
    where
        R: Receiver<Value = ()>;

    fn connect<R>(self, receiver: R) -> Self::Operation<R>
    where
        R: Receiver<Value = ()>,
    {
        ScheduleOperation {
            base: CompletionBase::new(self.ctx, complete_schedule::<R>),
            seat: OpSeat::new(receiver),
            _pin: PhantomPinned,
        }
    }
}

/// Operation state of [`ScheduleSender`].
#[repr(C)]
pub struct ScheduleOperation<R: Receiver<Value = ()>> {
    base: CompletionBase,
    seat: OpSeat<R>,
    _pin: PhantomPinned,
}

// SAFETY: completed from the reactor thread; shared base state is atomic.
unsafe impl<R: Receiver<Value = ()>> Send for ScheduleOperation<R> {}

unsafe fn complete_schedule<R: Receiver<Value = ()>>(base: NonNull<CompletionBase>, result: i32) {
    let mut op = base.cast::<ScheduleOperation<R>>();
    let op = op.as_mut();
    if op.base.cancelled() || result == -libc::ECANCELED {
        op.seat.take().set_stopped();
    } else {
        op.seat.take().set_value(());
    }
}

impl<R: Receiver<Value = ()>> Operation for ScheduleOperation<R> {
    fn start(self: Pin<&mut Self>) {
        // SAFETY: only field projections; nothing is moved.
        let this = unsafe { self.get_unchecked_mut() };
        let entry = opcode::Nop::new().build();
        // SAFETY: base and seat belong to this pinned operation.
        unsafe { start_submission(&this.base, &mut this.seat, entry) };
    }
}
