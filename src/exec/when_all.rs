//! Join of two senders.
//!
//! `when_all(a, b)` starts both arms and completes with the pair of their
//! values once both have finished. The first error or stop wins the
//! outcome and cancels the other arm, but both completions are always
//! awaited before anything is delivered.

use super::{Operation, Receiver, Sender};
use crate::stop::{StopCallback, StopSource, StopToken};
use parking_lot::Mutex;
use std::io;
use std::marker::PhantomPinned;
use std::pin::Pin;
use std::sync::Arc;

/// Creates a sender joining `a` and `b`.
pub fn when_all<A, B>(a: A, b: B) -> WhenAll<A, B>
where
    A: Sender + 'static,
    A::Value: Send + 'static,
    B: Sender + 'static,
    B::Value: Send + 'static,
{
    WhenAll { a, b }
}

/// Sender returned by [`when_all`].
pub struct WhenAll<A, B> {
    a: A,
    b: B,
}

enum JoinVerdict {
    Ok,
    Failed(io::Error),
    Stopped,
}

struct JoinInner<TA, TB, R> {
    value_a: Option<TA>,
    value_b: Option<TB>,
    verdict: JoinVerdict,
    pending: u8,
    receiver: Option<R>,
    outer_callback: Option<StopCallback>,
}

struct JoinShared<TA, TB, R> {
    inner: Mutex<JoinInner<TA, TB, R>>,
    stop: StopSource,
}

impl<TA, TB, R> JoinShared<TA, TB, R>
where
    TA: Send + 'static,
    TB: Send + 'static,
    R: Receiver<Value = (TA, TB)>,
{
    fn arm_complete(self: &Arc<Self>, result: ArmResult<TA, TB>) {
        let mut inner = self.inner.lock();
        let mut should_stop = false;
        match result {
            ArmResult::ValueA(v) => inner.value_a = Some(v),
            ArmResult::ValueB(v) => inner.value_b = Some(v),
            ArmResult::Failed(err) => {
                if matches!(inner.verdict, JoinVerdict::Ok) {
                    inner.verdict = JoinVerdict::Failed(err);
                    should_stop = true;
                }
            }
            ArmResult::Stopped => {
                if matches!(inner.verdict, JoinVerdict::Ok) {
                    inner.verdict = JoinVerdict::Stopped;
                    should_stop = true;
                }
            }
        }
        inner.pending -= 1;
        let delivery = if inner.pending == 0 {
            Some((
                inner.receiver.take().expect("join completed twice"),
                inner.value_a.take(),
                inner.value_b.take(),
                std::mem::replace(&mut inner.verdict, JoinVerdict::Ok),
                inner.outer_callback.take(),
            ))
        } else {
            None
        };
        drop(inner);

        if should_stop {
            self.stop.request_stop();
        }
        if let Some((receiver, value_a, value_b, verdict, callback)) = delivery {
            // Deregister before the terminal signal.
            drop(callback);
            match verdict {
                JoinVerdict::Ok => {
                    let a = value_a.expect("arm A value present");
                    let b = value_b.expect("arm B value present");
                    receiver.set_value((a, b));
                }
                JoinVerdict::Failed(err) => receiver.set_error(err),
                JoinVerdict::Stopped => receiver.set_stopped(),
            }
        }
    }
}

enum ArmResult<TA, TB> {
    ValueA(TA),
    ValueB(TB),
    Failed(io::Error),
    Stopped,
}

/// Receiver for arm A.
pub struct JoinReceiverA<TA, TB, R> {
    shared: Arc<JoinShared<TA, TB, R>>,
}

impl<TA, TB, R> Receiver for JoinReceiverA<TA, TB, R>
where
    TA: Send + 'static,
    TB: Send + 'static,
    R: Receiver<Value = (TA, TB)>,
{
    type Value = TA;

    fn stop_token(&self) -> StopToken {
        self.shared.stop.token()
    }

    fn set_value(self, value: TA) {
        self.shared.arm_complete(ArmResult::ValueA(value));
    }

    fn set_error(self, error: io::Error) {
        self.shared.arm_complete(ArmResult::Failed(error));
    }

    fn set_stopped(self) {
        self.shared.arm_complete(ArmResult::Stopped);
    }
}

/// Receiver for arm B.
pub struct JoinReceiverB<TA, TB, R> {
    shared: Arc<JoinShared<TA, TB, R>>,
}

impl<TA, TB, R> Receiver for JoinReceiverB<TA, TB, R>
where
    TA: Send + 'static,
    TB: Send + 'static,
    R: Receiver<Value = (TA, TB)>,
{
    type Value = TB;

    fn stop_token(&self) -> StopToken {
        self.shared.stop.token()
    }

    fn set_value(self, value: TB) {
        self.shared.arm_complete(ArmResult::ValueB(value));
    }

    fn set_error(self, error: io::Error) {
        self.shared.arm_complete(ArmResult::Failed(error));
    }

    fn set_stopped(self) {
        self.shared.arm_complete(ArmResult::Stopped);
    }
}

impl<A, B> Sender for WhenAll<A, B>
where
    A: Sender + 'static,
    A::Value: Send + 'static,
    B: Sender + 'static,
    B::Value: Send + 'static,
{
    type Value = (A::Value, B::Value);
    type Operation<R>
        = WhenAllOperation<A, B, R>
    where
        R: Receiver<Value = (A::Value, B::Value)>;

    fn connect<R>(self, receiver: R) -> Self::Operation<R>
    where
        R: Receiver<Value = (A::Value, B::Value)>,
    {
        let outer_token = receiver.stop_token();
        let shared = Arc::new(JoinShared {
            inner: Mutex::new(JoinInner {
                value_a: None,
                value_b: None,
                verdict: JoinVerdict::Ok,
                pending: 2,
                receiver: Some(receiver),
                outer_callback: None,
            }),
            stop: StopSource::new(),
        });
        let arm_a = self.a.connect(JoinReceiverA {
            shared: shared.clone(),
        });
        let arm_b = self.b.connect(JoinReceiverB {
            shared: shared.clone(),
        });
        WhenAllOperation {
            arm_a: Some(arm_a),
            arm_b: Some(arm_b),
            shared,
            outer_token,
            _pin: PhantomPinned,
        }
    }
}

/// Operation state of [`WhenAll`].
pub struct WhenAllOperation<A, B, R>
where
    A: Sender + 'static,
    A::Value: Send + 'static,
    B: Sender + 'static,
    B::Value: Send + 'static,
    R: Receiver<Value = (A::Value, B::Value)>,
{
    arm_a: Option<A::Operation<JoinReceiverA<A::Value, B::Value, R>>>,
    arm_b: Option<B::Operation<JoinReceiverB<A::Value, B::Value, R>>>,
    shared: Arc<JoinShared<A::Value, B::Value, R>>,
    outer_token: StopToken,
    _pin: PhantomPinned,
}

impl<A, B, R> Operation for WhenAllOperation<A, B, R>
where
    A: Sender + 'static,
    A::Value: Send + 'static,
    B: Sender + 'static,
    B::Value: Send + 'static,
    R: Receiver<Value = (A::Value, B::Value)>,
{
    fn start(self: Pin<&mut Self>) {
        // SAFETY: arms are pinned structurally and never moved after start.
        let this = unsafe { self.get_unchecked_mut() };

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

impl<A, B, R> Drop for WhenAllOperation<A, B, R>
where
    A: Sender + 'static,
    A::Value: Send + 'static,
    B: Sender + 'static,
    B::Value: Send + 'static,
    R: Receiver<Value = (A::Value, B::Value)>,
{
    fn drop(&mut self) {
        // Break the cycle outer-stop-state -> callback -> shared.
        let callback = self.shared.inner.lock().outer_callback.take();
        drop(callback);
    }
}

#[cfg(test)]
mod tests {
    use crate::exec::{just, sync_wait, then, when_all};

    #[test]
    fn joins_both_values() {
        let outcome = sync_wait(when_all(just(1u32), just("two")));
        assert_eq!(outcome.into_value(), Some((1, "two")));
    }

    #[test]
    fn composes_with_then() {
        let sender = then(when_all(just(20u32), just(22u32)), |(a, b)| a + b);
        assert_eq!(sync_wait(sender).into_value(), Some(42));
    }
}
