//! Sender of an immediately available value.

use super::{Operation, Receiver, Sender};
use std::pin::Pin;

/// Creates a sender that completes with `value` as soon as it is started.
pub fn just<T>(value: T) -> Just<T> {
    Just { value }
}

/// Sender returned by [`just`].
pub struct Just<T> {
    value: T,
}

impl<T: Send + 'static> Sender for Just<T> {
    type Value = T;
    type Operation<R>
        = JustOperation<T, R>
    where
        R: Receiver<Value = T>;

    fn connect<R>(self, receiver: R) -> Self::Operation<R>
    where
        R: Receiver<Value = T>,
    {
        JustOperation {
            inner: Some((self.value, receiver)),
        }
    }
}

/// Operation state of [`Just`].
pub struct JustOperation<T, R> {
    inner: Option<(T, R)>,
}

impl<T: Send + 'static, R: Receiver<Value = T>> Operation for JustOperation<T, R> {
    fn start(self: Pin<&mut Self>) {
        // SAFETY: `inner` is consumed without moving the operation itself.
        let this = unsafe { self.get_unchecked_mut() };
        let (value, receiver) = this.inner.take().expect("operation started twice");
        receiver.set_value(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::sync_wait;

    #[test]
    fn just_completes_with_value() {
        let outcome = sync_wait(just(5u32));
        assert_eq!(outcome.into_value(), Some(5));
    }
}
