//! Blocking bridge from lazy work to the calling thread.

use super::{Operation, Outcome, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::io;
use std::sync::Arc;

struct WaitState<T> {
    outcome: Mutex<Option<Outcome<T>>>,
    done: Condvar,
}

/// Receiver recording the outcome and waking the waiting thread.
struct WaitReceiver<T> {
    state: Arc<WaitState<T>>,
}

impl<T> WaitReceiver<T> {
    fn deliver(self, outcome: Outcome<T>) {
        let mut slot = self.state.outcome.lock();
        debug_assert!(slot.is_none(), "operation completed twice");
        *slot = Some(outcome);
        self.state.done.notify_one();
    }
}

impl<T: Send + 'static> Receiver for WaitReceiver<T> {
    type Value = T;

    fn set_value(self, value: T) {
        self.deliver(Outcome::Value(value));
    }

    fn set_error(self, error: io::Error) {
        self.deliver(Outcome::Error(error));
    }

    fn set_stopped(self) {
        self.deliver(Outcome::Stopped);
    }
}

/// Starts `sender` and blocks until its terminal signal arrives.
///
/// The operation is pinned on the heap for the duration of the wait, so
/// completions may arrive from any thread.
pub fn sync_wait<S>(sender: S) -> Outcome<S::Value>
where
    S: Sender + 'static,
    S::Value: Send + 'static,
{
    let state = Arc::new(WaitState {
        outcome: Mutex::new(None),
        done: Condvar::new(),
    });

    let mut op = Box::pin(sender.connect(WaitReceiver {
        state: state.clone(),
    }));
    op.as_mut().start();

    let mut slot = state.outcome.lock();
    while slot.is_none() {
        state.done.wait(&mut slot);
    }
    slot.take().expect("outcome recorded")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::just;
    use crate::exec::{Operation, Sender};
    use std::pin::Pin;
    use std::thread;

    #[test]
    fn waits_for_synchronous_completion() {
        assert_eq!(sync_wait(just(3u8)).into_value(), Some(3));
    }

    /// Sender completing from another thread after a delay.
    struct Deferred;

    struct DeferredOperation<R> {
        receiver: Option<R>,
    }

    impl Sender for Deferred {
        type Value = u32;
        type Operation<R>
            = DeferredOperation<R>
        where
            R: crate::exec::Receiver<Value = u32>;

        fn connect<R>(self, receiver: R) -> DeferredOperation<R>
        where
            R: crate::exec::Receiver<Value = u32>,
        {
            DeferredOperation {
                receiver: Some(receiver),
            }
        }
    }

    impl<R: crate::exec::Receiver<Value = u32> + Send + 'static> Operation for DeferredOperation<R> {
        fn start(self: Pin<&mut Self>) {
            // SAFETY: only the Option is taken; nothing is moved out of
            // the pinned allocation afterwards.
            let receiver = unsafe { self.get_unchecked_mut() }
                .receiver
                .take()
                .expect("started twice");
            thread::spawn(move || {
                thread::sleep(std::time::Duration::from_millis(10));
                receiver.set_value(99);
            });
        }
    }

    #[test]
    fn waits_for_cross_thread_completion() {
        assert_eq!(sync_wait(Deferred).into_value(), Some(99));
    }
}
