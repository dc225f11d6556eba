//! Await a batch of independent operations.
//!
//! `all_of(senders)` starts every sender and completes once all of them
//! have delivered a terminal signal. The first error (or stop) wins the
//! outcome, but every operation is still awaited, so no in-flight kernel
//! operation can outlive the batch.

use crate::exec::{Operation, Receiver, Sender};
use crate::stop::StopToken;
use parking_lot::Mutex;
use std::io;
use std::marker::PhantomPinned;
use std::pin::Pin;
use std::sync::Arc;

/// Creates a sender awaiting every sender in `senders`.
///
/// Used by batched reads: N single-offset reads fanned out and joined.
pub fn all_of<S>(senders: Vec<S>) -> AllOf<S>
where
    S: Sender + 'static,
    S::Value: Send + 'static,
{
    AllOf { senders }
}

/// Sender returned by [`all_of`].
pub struct AllOf<S> {
    senders: Vec<S>,
}

enum BatchVerdict {
    Ok,
    Failed(io::Error),
    Stopped,
}

struct BatchInner<R> {
    pending: usize,
    verdict: BatchVerdict,
    receiver: Option<R>,
}

struct BatchShared<R> {
    inner: Mutex<BatchInner<R>>,
}

impl<R: Receiver<Value = ()>> BatchShared<R> {
    fn part_complete(&self, result: Option<Result<(), io::Error>>) {
        let delivery = {
            let mut inner = self.inner.lock();
            match result {
                Some(Ok(())) => {}
                Some(Err(err)) => {
                    if matches!(inner.verdict, BatchVerdict::Ok) {
                        inner.verdict = BatchVerdict::Failed(err);
                    }
                }
                None => {
                    if matches!(inner.verdict, BatchVerdict::Ok) {
                        inner.verdict = BatchVerdict::Stopped;
                    }
                }
            }
            inner.pending -= 1;
            if inner.pending == 0 {
                let receiver = inner.receiver.take().expect("batch completed twice");
                let verdict = std::mem::replace(&mut inner.verdict, BatchVerdict::Ok);
                Some((receiver, verdict))
            } else {
                None
            }
        };
        if let Some((receiver, verdict)) = delivery {
            match verdict {
                BatchVerdict::Ok => receiver.set_value(()),
                BatchVerdict::Failed(err) => receiver.set_error(err),
                BatchVerdict::Stopped => receiver.set_stopped(),
            }
        }
    }
}

/// Receiver for one element of the batch.
pub struct PartReceiver<T, R> {
    shared: Arc<BatchShared<R>>,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T: Send + 'static, R: Receiver<Value = ()>> Receiver for PartReceiver<T, R> {
    type Value = T;

    fn stop_token(&self) -> StopToken {
        self.shared
            .inner
            .lock()
            .receiver
            .as_ref()
            .map_or_else(StopToken::never, Receiver::stop_token)
    }

    fn set_value(self, _value: T) {
        self.shared.part_complete(Some(Ok(())));
    }

    fn set_error(self, error: io::Error) {
        self.shared.part_complete(Some(Err(error)));
    }

    fn set_stopped(self) {
        self.shared.part_complete(None);
    }
}

impl<S> Sender for AllOf<S>
where
    S: Sender + 'static,
    S::Value: Send + 'static,
{
    type Value = ();
    type Operation<R>
        = AllOfOperation<S, R>
    where
        R: Receiver<Value = ()>;

    fn connect<R>(self, receiver: R) -> Self::Operation<R>
    where
        R: Receiver<Value = ()>,
    {
        let shared = Arc::new(BatchShared {
            inner: Mutex::new(BatchInner {
                pending: self.senders.len(),
                verdict: BatchVerdict::Ok,
                receiver: Some(receiver),
            }),
        });
        let parts = self
            .senders
            .into_iter()
            .map(|sender| {
                Box::pin(sender.connect(PartReceiver {
                    shared: shared.clone(),
                    _marker: std::marker::PhantomData,
                }))
            })
            .collect();
        AllOfOperation {
            shared,
            parts,
            _pin: PhantomPinned,
        }
    }
}

/// Operation state of [`AllOf`].
pub struct AllOfOperation<S, R>
where
    S: Sender + 'static,
    S::Value: Send + 'static,
    R: Receiver<Value = ()>,
{
    shared: Arc<BatchShared<R>>,
    parts: Vec<Pin<Box<S::Operation<PartReceiver<S::Value, R>>>>>,
    _pin: PhantomPinned,
}

impl<S, R> Operation for AllOfOperation<S, R>
where
    S: Sender + 'static,
    S::Value: Send + 'static,
    R: Receiver<Value = ()>,
{
    fn start(self: Pin<&mut Self>) {
        // SAFETY: parts are heap-pinned; the vector itself may move but
        // the operations do not.
        let this = unsafe { self.get_unchecked_mut() };
        if this.parts.is_empty() {
            let receiver = this
                .shared
                .inner
                .lock()
                .receiver
                .take()
                .expect("batch completed twice");
            receiver.set_value(());
            return;
        }
        for part in &mut this.parts {
            part.as_mut().start();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{just, sync_wait};

    #[test]
    fn awaits_every_part() {
        let senders = vec![just(1usize), just(2usize), just(3usize)];
        assert!(sync_wait(all_of(senders)).is_value());
    }

    #[test]
    fn empty_batch_completes() {
        let senders: Vec<crate::exec::Just<usize>> = Vec::new();
        assert!(sync_wait(all_of(senders)).is_value());
    }
}
