//! Schedule sender: run a continuation on the reactor thread.

use crate::exec::{Operation, Receiver, Sender};
use std::marker::PhantomPinned;
use std::pin::Pin;
use std::ptr::NonNull;
use std::sync::Arc;

use super::context::{Context, Runnable};
use super::operation::{start_enqueue_queued, OpSeat, QueuedCore};

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
            core: QueuedCore::new(self.ctx, dispatch_schedule::<R>),
            seat: OpSeat::new(receiver),
            _pin: PhantomPinned,
        }
    }
}

/// Operation state of [`ScheduleSender`].
#[repr(C)]
pub struct ScheduleOperation<R: Receiver<Value = ()>> {
    core: QueuedCore,
    seat: OpSeat<R>,
    _pin: PhantomPinned,
}

// SAFETY: completed from the reactor thread; shared state is atomic.
unsafe impl<R: Receiver<Value = ()>> Send for ScheduleOperation<R> {}

unsafe fn dispatch_schedule<R: Receiver<Value = ()>>(task: NonNull<Runnable>) {
    let mut op = task.cast::<ScheduleOperation<R>>();
    op.as_mut().run_once();
}

impl<R: Receiver<Value = ()>> ScheduleOperation<R> {
    fn run_once(&mut self) {
        if self.core.cancelled() {
            self.seat.take().set_stopped();
        } else {
            self.seat.take().set_value(());
        }
    }
}

impl<R: Receiver<Value = ()>> Operation for ScheduleOperation<R> {
    fn start(self: Pin<&mut Self>) {
        // SAFETY: only field projections; nothing is moved.
        let this = unsafe { self.get_unchecked_mut() };
        // SAFETY: core and seat belong to this pinned operation.
        unsafe { start_enqueue_queued(&this.core, &mut this.seat) };
    }
}
