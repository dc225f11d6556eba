//! Value-channel map combinator.

use super::{Receiver, Sender};
use crate::stop::StopToken;
use std::io;
use std::marker::PhantomData;

/// Creates a sender that applies `f` to the value of `sender`.
///
/// Errors and stops pass through untouched.
pub fn then<S, F, U>(sender: S, f: F) -> Then<S, F>
where
    S: Sender + 'static,
    S::Value: Send + 'static,
    F: FnOnce(S::Value) -> U + Send + 'static,
{
    Then { sender, f }
}

/// Sender returned by [`then`].
pub struct Then<S, F> {
    sender: S,
    f: F,
}

impl<S, F, U> Sender for Then<S, F>
where
    S: Sender + 'static,
    S::Value: Send + 'static,
    F: FnOnce(S::Value) -> U + Send + 'static,
{
    type Value = U;
    type Operation<R>
        = S::Operation<ThenReceiver<S::Value, F, R>>
    where
        R: Receiver<Value = U>;

    fn connect<R>(self, receiver: R) -> Self::Operation<R>
    where
        R: Receiver<Value = U>,
    {
        self.sender.connect(ThenReceiver {
            f: self.f,
            next: receiver,
            _marker: PhantomData,
        })
    }
}

/// Receiver that maps the value before forwarding.
pub struct ThenReceiver<T, F, R> {
    f: F,
    next: R,
    _marker: PhantomData<fn(T)>,
}

impl<T, U, F, R> Receiver for ThenReceiver<T, F, R>
where
    T: Send + 'static,
    F: FnOnce(T) -> U + Send + 'static,
    R: Receiver<Value = U>,
{
    type Value = T;

    fn stop_token(&self) -> StopToken {
        self.next.stop_token()
    }

    fn set_value(self, value: T) {
        self.next.set_value((self.f)(value));
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
    use crate::exec::{just, sync_wait, then};

    #[test]
    fn maps_value() {
        let outcome = sync_wait(then(just(20u32), |n| n + 1));
        assert_eq!(outcome.into_value(), Some(21));
    }

    #[test]
    fn chains() {
        let sender = then(then(just(1u32), |n| n * 10), |n| n + 5);
        assert_eq!(sync_wait(sender).into_value(), Some(15));
    }
}
