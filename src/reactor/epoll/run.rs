//! Run sender: drive the reactor from inside the async graph.
//!
//! The canonical idiom races the run sender against the work graph:
//! `sync_wait(when_any(work, ctx.run(RunMode::Stopped)))` — whichever
//! side finishes first cancels the other. The run operation drives the
//! loop inline in `start`, so the thread that starts it becomes the
//! reactor thread until the loop exits.

use crate::exec::{Operation, Receiver, Sender};
use crate::reactor::RunMode;
use std::pin::Pin;
use std::sync::Arc;

use super::context::Context;

/// Sender driving the reactor until its mode's exit condition.
pub struct RunSender {
    ctx: Arc<Context>,
    mode: RunMode,
}

impl RunSender {
    pub(crate) fn new(ctx: Arc<Context>, mode: RunMode) -> Self {
        Self { ctx, mode }
    }
}

impl Sender for RunSender {
    type Value = ();
    type Operation<R>
        = RunOperation<R>
    where
        R: Receiver<Value = ()>;

    fn connect<R>(self, receiver: R) -> Self::Operation<R>
    where
        R: Receiver<Value = ()>,
    {
        RunOperation {
            ctx: self.ctx,
            mode: self.mode,
            receiver: Some(receiver),
        }
    }
}

/// Operation state of [`RunSender`].
pub struct RunOperation<R> {
    ctx: Arc<Context>,
    mode: RunMode,
    receiver: Option<R>,
}

impl<R: Receiver<Value = ()>> Operation for RunOperation<R> {
    fn start(self: Pin<&mut Self>) {
        // SAFETY: only the Option is taken; nothing is moved.
        let this = unsafe { self.get_unchecked_mut() };
        let receiver = this.receiver.take().expect("operation started twice");
        let token = receiver.stop_token();
        if token.stop_requested() {
            receiver.set_stopped();
            return;
        }

        // An external stop request must unstick a blocked wait.
        let wake_ctx = this.ctx.clone();
        let callback = token.on_stop(move || wake_ctx.request_stop());

        let finished = loop {
            if token.stop_requested() {
                break false;
            }
            let step = match this.mode {
                RunMode::Stopped => {
                    if this.ctx.stop_requested() {
                        break true;
                    }
                    this.ctx.run_one().map(|_| true)
                }
                RunMode::Drained => this.ctx.run_some().map(|n| n != 0),
            };
            match step {
                Ok(true) => {}
                Ok(false) => break true,
                Err(err) => {
                    drop(callback);
                    receiver.set_error(err);
                    return;
                }
            }
        };

        drop(callback);
        if finished {
            receiver.set_value(());
        } else {
            receiver.set_stopped();
        }
    }
}
