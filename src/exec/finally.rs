//! Unconditional cleanup combinator.
//!
//! `finally(source, cleanup)` runs `source`, remembers its outcome, then
//! runs `cleanup` regardless of which channel `source` completed on, and
//! finally re-delivers the remembered outcome. The cleanup sender runs with
//! an un-stoppable token: a cancelled graph still releases its resources.
//! A cleanup failure replaces the remembered outcome with the cleanup
//! error.

use super::{Operation, Outcome, Receiver, Sender};
use crate::stop::StopToken;
use parking_lot::Mutex;
use std::io;
use std::marker::{PhantomData, PhantomPinned};
use std::pin::Pin;
use std::sync::Arc;

/// Creates a sender running `cleanup` after `source` on every exit path.
pub fn finally<S, C>(source: S, cleanup: C) -> Finally<S, C>
where
    S: Sender + 'static,
    S::Value: Send + 'static,
    C: Sender<Value = ()> + Send + 'static,
{
    Finally { source, cleanup }
}

/// Sender returned by [`finally`].
pub struct Finally<S, C> {
    source: S,
    cleanup: C,
}

struct FinallyInner<S, C, R>
where
    S: Sender + 'static,
    S::Value: Send + 'static,
    C: Sender<Value = ()> + Send + 'static,
    R: Receiver<Value = S::Value>,
{
    cleanup: Option<C>,
    saved: Option<Outcome<S::Value>>,
    receiver: Option<R>,
}

struct FinallyShared<S, C, R>
where
    S: Sender + 'static,
    S::Value: Send + 'static,
    C: Sender<Value = ()> + Send + 'static,
    R: Receiver<Value = S::Value>,
{
    inner: Mutex<FinallyInner<S, C, R>>,
    /// Keep-alive slot for the cleanup operation. Guarded separately from
    /// `inner` so the cleanup receiver can complete synchronously while
    /// this lock is still held by the launcher.
    cleanup_op: Mutex<Option<Pin<Box<C::Operation<CleanupReceiver<S, C, R>>>>>>,
}

impl<S, C> Sender for Finally<S, C>
where
    S: Sender + 'static,
    S::Value: Send + 'static,
    C: Sender<Value = ()> + Send + 'static,
{
    type Value = S::Value;
    type Operation<R>
        = FinallyOperation<S, C, R>
    where
        R: Receiver<Value = S::Value>;

    fn connect<R>(self, receiver: R) -> Self::Operation<R>
    where
        R: Receiver<Value = S::Value>,
    {
        let shared = Arc::new(FinallyShared {
            inner: Mutex::new(FinallyInner {
                cleanup: Some(self.cleanup),
                saved: None,
                receiver: Some(receiver),
            }),
            cleanup_op: Mutex::new(None),
        });
        let source = self.source.connect(SourceReceiver {
            shared: shared.clone(),
        });
        FinallyOperation {
            source: Some(source),
            shared,
            _pin: PhantomPinned,
        }
    }
}

/// Operation state of [`Finally`].
pub struct FinallyOperation<S, C, R>
where
    S: Sender + 'static,
    S::Value: Send + 'static,
    C: Sender<Value = ()> + Send + 'static,
    R: Receiver<Value = S::Value>,
{
    source: Option<S::Operation<SourceReceiver<S, C, R>>>,
    /// Keeps the cleanup operation's storage alive until this drops.
    shared: Arc<FinallyShared<S, C, R>>,
    _pin: PhantomPinned,
}

impl<S, C, R> Operation for FinallyOperation<S, C, R>
where
    S: Sender + 'static,
    S::Value: Send + 'static,
    C: Sender<Value = ()> + Send + 'static,
    R: Receiver<Value = S::Value>,
{
    fn start(self: Pin<&mut Self>) {
        // SAFETY: `source` is pinned structurally, never moved after start.
        let this = unsafe { self.get_unchecked_mut() };
        let source = this.source.as_mut().expect("operation started twice");
        // SAFETY: pinned inside this operation.
        unsafe { Pin::new_unchecked(source) }.start();
        let _ = &this.shared;
    }
}

/// Receiver for the source stage; launches the cleanup stage.
pub struct SourceReceiver<S, C, R>
where
    S: Sender + 'static,
    S::Value: Send + 'static,
    C: Sender<Value = ()> + Send + 'static,
    R: Receiver<Value = S::Value>,
{
    shared: Arc<FinallyShared<S, C, R>>,
}

impl<S, C, R> SourceReceiver<S, C, R>
where
    S: Sender + 'static,
    S::Value: Send + 'static,
    C: Sender<Value = ()> + Send + 'static,
    R: Receiver<Value = S::Value>,
{
    fn run_cleanup(self, outcome: Outcome<S::Value>) {
        let cleanup = {
            let mut inner = self.shared.inner.lock();
            inner.saved = Some(outcome);
            inner.cleanup.take().expect("cleanup present")
        };
        let connected = cleanup.connect(CleanupReceiver {
            shared: self.shared.clone(),
            _marker: PhantomData,
        });
        let mut slot = self.shared.cleanup_op.lock();
        let op = slot.insert(Box::pin(connected));
        // May complete synchronously; the cleanup receiver only touches
        // `inner`, never this slot.
        op.as_mut().start();
    }
}

impl<S, C, R> Receiver for SourceReceiver<S, C, R>
where
    S: Sender + 'static,
    S::Value: Send + 'static,
    C: Sender<Value = ()> + Send + 'static,
    R: Receiver<Value = S::Value>,
{
    type Value = S::Value;

    fn stop_token(&self) -> StopToken {
        self.shared
            .inner
            .lock()
            .receiver
            .as_ref()
            .map_or_else(StopToken::never, Receiver::stop_token)
    }

    fn set_value(self, value: S::Value) {
        self.run_cleanup(Outcome::Value(value));
    }

    fn set_error(self, error: io::Error) {
        self.run_cleanup(Outcome::Error(error));
    }

    fn set_stopped(self) {
        self.run_cleanup(Outcome::Stopped);
    }
}

/// Receiver for the cleanup stage; re-delivers the saved outcome.
pub struct CleanupReceiver<S, C, R>
where
    S: Sender + 'static,
    S::Value: Send + 'static,
    C: Sender<Value = ()> + Send + 'static,
    R: Receiver<Value = S::Value>,
{
    shared: Arc<FinallyShared<S, C, R>>,
    _marker: PhantomData<fn(C)>,
}

impl<S, C, R> CleanupReceiver<S, C, R>
where
    S: Sender + 'static,
    S::Value: Send + 'static,
    C: Sender<Value = ()> + Send + 'static,
    R: Receiver<Value = S::Value>,
{
    fn take_delivery(&self) -> (R, Outcome<S::Value>) {
        let mut inner = self.shared.inner.lock();
        let receiver = inner.receiver.take().expect("receiver present");
        let saved = inner.saved.take().expect("outcome saved");
        (receiver, saved)
    }
}

impl<S, C, R> Receiver for CleanupReceiver<S, C, R>
where
    S: Sender + 'static,
    S::Value: Send + 'static,
    C: Sender<Value = ()> + Send + 'static,
    R: Receiver<Value = S::Value>,
{
    type Value = ();

    fn stop_token(&self) -> StopToken {
        // Cleanup is not cancellable: a stopped graph still closes its
        // descriptors.
        StopToken::never()
    }

    fn set_value(self, (): ()) {
        let (receiver, saved) = self.take_delivery();
        saved.send_to(receiver);
    }

    fn set_error(self, error: io::Error) {
        let (receiver, _saved) = self.take_delivery();
        receiver.set_error(error);
    }

    fn set_stopped(self) {
        let (receiver, _saved) = self.take_delivery();
        receiver.set_stopped();
    }
}

#[cfg(test)]
mod tests {
    use crate::exec::{finally, just, sync_wait, then, Sender};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn tracked(ran: &Arc<AtomicBool>) -> impl Sender<Value = ()> {
        let ran = ran.clone();
        then(just(()), move |()| {
            ran.store(true, Ordering::SeqCst);
        })
    }

    #[test]
    fn cleanup_runs_on_value() {
        let ran = Arc::new(AtomicBool::new(false));
        let outcome = sync_wait(finally(just(11u32), tracked(&ran)));
        assert_eq!(outcome.into_value(), Some(11));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn outcome_survives_cleanup() {
        let ran = Arc::new(AtomicBool::new(false));
        let sender = finally(then(just(2u32), |n| n + 2), tracked(&ran));
        assert_eq!(sync_wait(sender).into_value(), Some(4));
        assert!(ran.load(Ordering::SeqCst));
    }
}
