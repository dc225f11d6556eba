//! Race of two senders.
//!
//! `when_any(a, b)` starts both arms. The first terminal signal wins and is
//! delivered to the outer receiver; the losing arm is stopped through a
//! shared stop source and its (stopped) completion is awaited before the
//! winning outcome is forwarded, so neither arm can outlive the race.

use super::{Operation, Outcome, Receiver, Sender};
use crate::stop::{StopCallback, StopSource, StopToken};
use parking_lot::Mutex;
use std::io;
use std::marker::PhantomPinned;
use std::pin::Pin;
use std::sync::Arc;

/// Creates a sender racing `a` against `b`.
///
/// Both arms must complete with the same value type; the canonical use is
/// racing a unit-valued work graph against a reactor's run sender.
pub fn when_any<A, B>(a: A, b: B) -> WhenAny<A, B>
where
    A: Sender + 'static,
    A::Value: Send + 'static,
    B: Sender<Value = A::Value> + 'static,
{
    WhenAny { a, b }
}

/// Sender returned by [`when_any`].
pub struct WhenAny<A, B> {
    a: A,
    b: B,
}

struct RaceInner<T, R> {
    outcome: Option<Outcome<T>>,
    pending: u8,
    receiver: Option<R>,
    outer_callback: Option<StopCallback>,
}

struct RaceShared<T, R> {
    inner: Mutex<RaceInner<T, R>>,
    stop: StopSource,
}

impl<T: Send + 'static, R: Receiver<Value = T>> RaceShared<T, R> {
    /// Records one arm's outcome; the first one wins and stops the other
    /// arm. The last arm to finish delivers the stored outcome.
    fn arm_complete(self: &Arc<Self>, outcome: Outcome<T>) {
        let mut inner = self.inner.lock();
        let won = if inner.outcome.is_none() {
            inner.outcome = Some(outcome);
            true
        } else {
            false
        };
        inner.pending -= 1;
        let finished = inner.pending == 0;
        let delivery = if finished {
            Some((
                inner.receiver.take().expect("receiver present"),
                inner.outcome.take().expect("outcome recorded"),
                inner.outer_callback.take(),
            ))
        } else {
            None
        };
        drop(inner);

        if won {
            self.stop.request_stop();
        }
        if let Some((receiver, outcome, callback)) = delivery {
            // Deregister before the terminal signal.
            drop(callback);
            outcome.send_to(receiver);
        }
    }
}

/// Receiver attached to each arm.
pub struct ArmReceiver<T, R> {
    shared: Arc<RaceShared<T, R>>,
}

impl<T: Send + 'static, R: Receiver<Value = T>> Receiver for ArmReceiver<T, R> {
    type Value = T;

    fn stop_token(&self) -> StopToken {
        self.shared.stop.token()
    }

    fn set_value(self, value: T) {
        self.shared.arm_complete(Outcome::Value(value));
    }

    fn set_error(self, error: io::Error) {
        self.shared.arm_complete(Outcome::Error(error));
    }

    fn set_stopped(self) {
        self.shared.arm_complete(Outcome::Stopped);
    }
}

impl<A, B> Sender for WhenAny<A, B>
where
    A: Sender + 'static,
    A::Value: Send + 'static,
    B: Sender<Value = A::Value> + 'static,
{
    type Value = A::Value;
    type Operation<R>
        = WhenAnyOperation<A, B, R>
    where
        R: Receiver<Value = A::Value>;

    fn connect<R>(self, receiver: R) -> Self::Operation<R>
    where
        R: Receiver<Value = A::Value>,
    {
        let outer_token = receiver.stop_token();
        let shared = Arc::new(RaceShared {
            inner: Mutex::new(RaceInner {
                outcome: None,
                pending: 2,
                receiver: Some(receiver),
                outer_callback: None,
            }),
            stop: StopSource::new(),
        });
        let arm_a = self.a.connect(ArmReceiver {
            shared: shared.clone(),
        });
        let arm_b = self.b.connect(ArmReceiver {
            shared: shared.clone(),
        });
        WhenAnyOperation {
            arm_a: Some(arm_a),
            arm_b: Some(arm_b),
            shared,
            outer_token,
            _pin: PhantomPinned,
        }
    }
}

/// Operation state of [`WhenAny`].
pub struct WhenAnyOperation<A, B, R>
where
    A: Sender + 'static,
    A::Value: Send + 'static,
    B: Sender<Value = A::Value> + 'static,
    R: Receiver<Value = A::Value>,
{
    arm_a: Option<A::Operation<ArmReceiver<A::Value, R>>>,
    arm_b: Option<B::Operation<ArmReceiver<A::Value, R>>>,
    shared: Arc<RaceShared<A::Value, R>>,
    outer_token: StopToken,
    _pin: PhantomPinned,
}

impl<A, B, R> Operation for WhenAnyOperation<A, B, R>
where
    A: Sender + 'static,
    A::Value: Send + 'static,
    B: Sender<Value = A::Value> + 'static,
    R: Receiver<Value = A::Value>,
{
    fn start(self: Pin<&mut Self>) {
        // SAFETY: arms are pinned structurally and never moved after start.
        let this = unsafe { self.get_unchecked_mut() };

        // Propagate the caller's stop request into the race.
        if this.outer_token.stop_requested() {
            this.shared.stop.request_stop();
        } else {
            let shared = this.shared.clone();
            let callback = this.outer_token.on_stop(move || {
                shared.stop.request_stop();
            });
            this.shared.inner.lock().outer_callback = callback;
        }

        let arm_a = this.arm_a.as_mut().expect("operation started twice");
        // SAFETY: pinned inside this operation.
        unsafe { Pin::new_unchecked(arm_a) }.start();
        let arm_b = this.arm_b.as_mut().expect("operation started twice");
        // SAFETY: pinned inside this operation.
        unsafe { Pin::new_unchecked(arm_b) }.start();
    }
}

impl<A, B, R> Drop for WhenAnyOperation<A, B, R>
where
    A: Sender + 'static,
    A::Value: Send + 'static,
    B: Sender<Value = A::Value> + 'static,
    R: Receiver<Value = A::Value>,
{
    fn drop(&mut self) {
        // Break the cycle outer-stop-state -> callback -> shared.
        let callback = self.shared.inner.lock().outer_callback.take();
        drop(callback);
    }
}

#[cfg(test)]
mod tests {
    use crate::exec::{just, sync_wait, when_any, Operation, Receiver, Sender};
    use std::pin::Pin;

    /// Sender that never completes on its own; completes stopped when the
    /// receiver's token fires.
    struct Pending;

    struct PendingOperation<R> {
        receiver: Option<R>,
        callback: Option<crate::stop::StopCallback>,
    }

    impl Sender for Pending {
        type Value = u32;
        type Operation<R>
            = PendingOperation<R>
        where
            R: Receiver<Value = u32>;

        fn connect<R>(self, receiver: R) -> PendingOperation<R>
        where
            R: Receiver<Value = u32>,
        {
            PendingOperation {
                receiver: Some(receiver),
                callback: None,
            }
        }
    }

    impl<R: Receiver<Value = u32> + Send + 'static> Operation for PendingOperation<R> {
        fn start(self: Pin<&mut Self>) {
            // SAFETY: fields are only taken, never moved.
            let this = unsafe { self.get_unchecked_mut() };
            let token = this.receiver.as_ref().expect("started once").stop_token();
            let receiver = std::sync::Arc::new(parking_lot::Mutex::new(this.receiver.take()));
            this.callback = token.on_stop(move || {
                if let Some(receiver) = receiver.lock().take() {
                    receiver.set_stopped();
                }
            });
        }
    }

    #[test]
    fn first_value_wins() {
        let outcome = sync_wait(when_any(just(1u32), just(2u32)));
        assert_eq!(outcome.into_value(), Some(1));
    }

    #[test]
    fn winner_cancels_pending_loser() {
        let outcome = sync_wait(when_any(just(7u32), Pending));
        assert_eq!(outcome.into_value(), Some(7));
    }

    #[test]
    fn pending_loser_on_either_side() {
        let outcome = sync_wait(when_any(Pending, just(9u32)));
        assert_eq!(outcome.into_value(), Some(9));
    }
}
