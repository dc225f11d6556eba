//! Dependent-sender chaining.
//!
//! `let_value(s, f)` runs `s`, feeds its value to `f` to obtain a second
//! sender, and runs that. The second operation is pinned on the heap and
//! kept alive by the outer operation until it has delivered its terminal
//! signal.

use super::{Operation, Receiver, Sender};
use crate::stop::StopToken;
use parking_lot::Mutex;
use std::io;
use std::marker::{PhantomData, PhantomPinned};
use std::pin::Pin;
use std::sync::Arc;

/// Creates a sender chaining `f`'s sender off the value of `sender`.
pub fn let_value<S, F, S2>(sender: S, f: F) -> LetValue<S, F>
where
    S: Sender + 'static,
    S::Value: Send + 'static,
    S2: Sender + 'static,
    F: FnOnce(S::Value) -> S2 + Send + 'static,
{
    LetValue { sender, f }
}

/// Sender returned by [`let_value`].
pub struct LetValue<S, F> {
    sender: S,
    f: F,
}

/// Slot keeping the second operation alive past the first's completion.
type SecondSlot<S2, R> =
    Arc<Mutex<Option<Pin<Box<<S2 as Sender>::Operation<R>>>>>>;

impl<S, F, S2> Sender for LetValue<S, F>
where
    S: Sender + 'static,
    S::Value: Send + 'static,
    S2: Sender + 'static,
    F: FnOnce(S::Value) -> S2 + Send + 'static,
{
    type Value = S2::Value;
    type Operation<R>
        = LetValueOperation<S, F, S2, R>
    where
        R: Receiver<Value = S2::Value>;

    fn connect<R>(self, receiver: R) -> Self::Operation<R>
    where
        R: Receiver<Value = S2::Value>,
    {
        let slot: SecondSlot<S2, R> = Arc::new(Mutex::new(None));
        let first = self.sender.connect(FirstReceiver {
            f: self.f,
            next: receiver,
            slot: slot.clone(),
            _marker: PhantomData,
        });
        LetValueOperation {
            first: Some(first),
            slot,
            _pin: PhantomPinned,
        }
    }
}

/// Operation state of [`LetValue`].
pub struct LetValueOperation<S, F, S2, R>
where
    S: Sender + 'static,
    S::Value: Send + 'static,
    S2: Sender + 'static,
    F: FnOnce(S::Value) -> S2 + Send + 'static,
    R: Receiver<Value = S2::Value>,
{
    first: Option<S::Operation<FirstReceiver<S::Value, F, S2, R>>>,
    /// Owned here as well so the second operation outlives its completion
    /// and is only dropped with this operation.
    slot: SecondSlot<S2, R>,
    _pin: PhantomPinned,
}

impl<S, F, S2, R> Operation for LetValueOperation<S, F, S2, R>
where
    S: Sender + 'static,
    S::Value: Send + 'static,
    S2: Sender + 'static,
    F: FnOnce(S::Value) -> S2 + Send + 'static,
    R: Receiver<Value = S2::Value>,
{
    fn start(self: Pin<&mut Self>) {
        // SAFETY: `first` is pinned structurally; it is never taken or
        // moved after start.
        let this = unsafe { self.get_unchecked_mut() };
        let first = this.first.as_mut().expect("operation started twice");
        // SAFETY: `first` lives inside this pinned operation.
        unsafe { Pin::new_unchecked(first) }.start();
        let _ = &this.slot;
    }
}

/// Receiver for the first stage; builds and starts the second.
pub struct FirstReceiver<T, F, S2, R>
where
    S2: Sender + 'static,
    R: Receiver<Value = S2::Value>,
{
    f: F,
    next: R,
    slot: SecondSlot<S2, R>,
    _marker: PhantomData<fn(T) -> S2>,
}

impl<T, F, S2, R> Receiver for FirstReceiver<T, F, S2, R>
where
    T: Send + 'static,
    S2: Sender + 'static,
    F: FnOnce(T) -> S2 + Send + 'static,
    R: Receiver<Value = S2::Value>,
{
    type Value = T;

    fn stop_token(&self) -> StopToken {
        self.next.stop_token()
    }

    fn set_value(self, value: T) {
        let second = (self.f)(value).connect(self.next);
        let mut slot = self.slot.lock();
        let op = slot.insert(Box::pin(second));
        // The second operation may complete synchronously inside start;
        // the slot keeps its storage alive regardless.
        op.as_mut().start();
    }

    fn set_error(self, error: io::Error) {
        self.next.set_error(error);
    }

    fn set_stopped(self) {
        self.next.set_stopped();
    }
}

#[cfg(test)]
mod tests {
    use crate::exec::{just, let_value, sync_wait, then};

    #[test]
    fn chains_dependent_sender() {
        let sender = let_value(just(4u32), |n| just(n * 10));
        assert_eq!(sync_wait(sender).into_value(), Some(40));
    }

    #[test]
    fn nests() {
        let sender = let_value(just(1u32), |a| {
            let_value(just(2u32), move |b| then(just(()), move |()| a + b))
        });
        assert_eq!(sync_wait(sender).into_value(), Some(3));
    }
}
