//! Buffered sequence + reduction: retry partial transfers to completion.

use crate::buffer::{ConstBufferSpan, MutableBufferSpan};
use crate::exec::{Operation, Outcome, Receiver, Sender};
use crate::stop::StopToken;
use parking_lot::Mutex;
use std::io;
use std::marker::PhantomPinned;
use std::pin::Pin;
use std::sync::Arc;

/// Buffer sequences the transfer loop can advance through.
pub trait BufferCursor: Clone + Send + 'static {
    /// The sequence with its first `n` bytes removed.
    #[must_use]
    fn advanced(&self, n: usize) -> Self;

    /// Returns `true` when no bytes remain.
    fn is_done(&self) -> bool;
}

impl BufferCursor for MutableBufferSpan {
    fn advanced(&self, n: usize) -> Self {
        self.advance(n)
    }

    fn is_done(&self) -> bool {
        self.is_empty()
    }
}

impl BufferCursor for ConstBufferSpan {
    fn advanced(&self, n: usize) -> Self {
        self.advance(n)
    }

    fn is_done(&self) -> bool {
        self.is_empty()
    }
}

/// A lazy sequence of partial transfers produced by `factory`.
///
/// Each element is `factory(remaining_buffers, adjusted_offset)`; its
/// value is the bytes moved by that element.
pub struct BufferedSequence<F, B> {
    factory: F,
    buffers: B,
    offset: Option<u64>,
}

impl<F, B> BufferedSequence<F, B> {
    /// Creates the sequence over `buffers`, starting at `offset`.
    pub fn new(factory: F, buffers: B, offset: Option<u64>) -> Self {
        Self {
            factory,
            buffers,
            offset,
        }
    }
}

/// Folds a [`BufferedSequence`] into the total transferred byte count.
pub fn reduce<F, B, S>(sequence: BufferedSequence<F, B>) -> Reduce<F, B>
where
    F: FnMut(B, Option<u64>) -> S + Send + 'static,
    B: BufferCursor,
    S: Sender<Value = usize> + 'static,
{
    Reduce {
        factory: sequence.factory,
        buffers: sequence.buffers,
        offset: sequence.offset,
    }
}

/// Sender returned by [`reduce`].
pub struct Reduce<F, B> {
    factory: F,
    buffers: B,
    offset: Option<u64>,
}

enum RoundResult {
    Transferred(usize),
    Failed(io::Error),
    Stopped,
}

struct TransferInner<F, B, R> {
    factory: F,
    buffers: B,
    offset: Option<u64>,
    transferred: usize,
    receiver: Option<R>,
    /// True while a thread is inside the drive loop; completions arriving
    /// meanwhile are recorded in `round_done` instead of re-entering.
    driving: bool,
    round_done: Option<RoundResult>,
}

struct TransferShared<F, B, S, R>
where
    F: FnMut(B, Option<u64>) -> S + Send + 'static,
    B: BufferCursor,
    S: Sender<Value = usize> + 'static,
    R: Receiver<Value = usize>,
{
    inner: Mutex<TransferInner<F, B, R>>,
    /// Keep-alive slot for the in-flight round; guarded separately so a
    /// synchronous completion (which touches `inner`) cannot deadlock
    /// against the launcher holding this lock.
    slot: Mutex<Option<Pin<Box<S::Operation<RoundReceiver<F, B, S, R>>>>>>,
}

impl<F, B, S> Sender for Reduce<F, B>
where
    F: FnMut(B, Option<u64>) -> S + Send + 'static,
    B: BufferCursor,
    S: Sender<Value = usize> + 'static,
{
    type Value = usize;
    type Operation<R>
        = ReduceOperation<F, B, S, R>
    where
        R: Receiver<Value = usize>;

    fn connect<R>(self, receiver: R) -> Self::Operation<R>
    where
        R: Receiver<Value = usize>,
    {
        ReduceOperation {
            shared: Arc::new(TransferShared {
                inner: Mutex::new(TransferInner {
                    factory: self.factory,
                    buffers: self.buffers,
                    offset: self.offset,
                    transferred: 0,
                    receiver: Some(receiver),
                    driving: false,
                    round_done: None,
                }),
                slot: Mutex::new(None),
            }),
            _pin: PhantomPinned,
        }
    }
}

/// Operation state of [`Reduce`].
pub struct ReduceOperation<F, B, S, R>
where
    F: FnMut(B, Option<u64>) -> S + Send + 'static,
    B: BufferCursor,
    S: Sender<Value = usize> + 'static,
    R: Receiver<Value = usize>,
{
    shared: Arc<TransferShared<F, B, S, R>>,
    _pin: PhantomPinned,
}

impl<F, B, S, R> Operation for ReduceOperation<F, B, S, R>
where
    F: FnMut(B, Option<u64>) -> S + Send + 'static,
    B: BufferCursor,
    S: Sender<Value = usize> + 'static,
    R: Receiver<Value = usize>,
{
    fn start(self: Pin<&mut Self>) {
        // SAFETY: the shared state is reference-counted; nothing moves.
        let this = unsafe { self.get_unchecked_mut() };
        drive(&this.shared);
    }
}

/// The transfer loop. Launches rounds until the transfer finishes or a
/// round suspends; resumed by [`RoundReceiver`] on asynchronous
/// completions.
fn drive<F, B, S, R>(shared: &Arc<TransferShared<F, B, S, R>>)
where
    F: FnMut(B, Option<u64>) -> S + Send + 'static,
    B: BufferCursor,
    S: Sender<Value = usize> + 'static,
    R: Receiver<Value = usize>,
{
    enum Step<S2, R2> {
        Launch(S2),
        Finish(R2, Outcome<usize>),
    }

    loop {
        let step = {
            let mut inner = shared.inner.lock();
            inner.driving = true;
            let remaining = inner.buffers.advanced(inner.transferred);
            if remaining.is_done() {
                let receiver = inner.receiver.take().expect("transfer completed twice");
                let total = inner.transferred;
                inner.driving = false;
                Step::Finish(receiver, Outcome::Value(total))
            } else {
                let offset = inner.offset.map(|o| o + inner.transferred as u64);
                let sender = (inner.factory)(remaining, offset);
                inner.round_done = None;
                Step::Launch(sender)
            }
        };

        let sender = match step {
            Step::Finish(receiver, outcome) => {
                outcome.send_to(receiver);
                return;
            }
            Step::Launch(sender) => sender,
        };

        {
            let mut slot = shared.slot.lock();
            let op = slot.insert(Box::pin(sender.connect(RoundReceiver {
                shared: shared.clone(),
            })));
            op.as_mut().start();
        }

        // Pick up a synchronous completion, or hand off to the receiver.
        let mut inner = shared.inner.lock();
        match inner.round_done.take() {
            Some(RoundResult::Transferred(0)) => {
                let receiver = inner.receiver.take().expect("transfer completed twice");
                let total = inner.transferred;
                inner.driving = false;
                drop(inner);
                receiver.set_value(total);
                return;
            }
            Some(RoundResult::Transferred(n)) => {
                inner.transferred += n;
            }
            Some(RoundResult::Failed(err)) => {
                let receiver = inner.receiver.take().expect("transfer completed twice");
                inner.driving = false;
                drop(inner);
                receiver.set_error(err);
                return;
            }
            Some(RoundResult::Stopped) => {
                let receiver = inner.receiver.take().expect("transfer completed twice");
                inner.driving = false;
                drop(inner);
                receiver.set_stopped();
                return;
            }
            None => {
                // The round suspended; its completion resumes the loop.
                inner.driving = false;
                return;
            }
        }
    }
}

/// Receiver for one round of the transfer loop.
pub struct RoundReceiver<F, B, S, R>
where
    F: FnMut(B, Option<u64>) -> S + Send + 'static,
    B: BufferCursor,
    S: Sender<Value = usize> + 'static,
    R: Receiver<Value = usize>,
{
    shared: Arc<TransferShared<F, B, S, R>>,
}

impl<F, B, S, R> RoundReceiver<F, B, S, R>
where
    F: FnMut(B, Option<u64>) -> S + Send + 'static,
    B: BufferCursor,
    S: Sender<Value = usize> + 'static,
    R: Receiver<Value = usize>,
{
    fn complete(self, result: RoundResult) {
        {
            let mut inner = self.shared.inner.lock();
            if inner.driving {
                inner.round_done = Some(result);
                return;
            }
            match result {
                RoundResult::Transferred(0) => {
                    let receiver = inner.receiver.take().expect("transfer completed twice");
                    let total = inner.transferred;
                    drop(inner);
                    receiver.set_value(total);
                    return;
                }
                RoundResult::Transferred(n) => {
                    inner.transferred += n;
                }
                RoundResult::Failed(err) => {
                    let receiver = inner.receiver.take().expect("transfer completed twice");
                    drop(inner);
                    receiver.set_error(err);
                    return;
                }
                RoundResult::Stopped => {
                    let receiver = inner.receiver.take().expect("transfer completed twice");
                    drop(inner);
                    receiver.set_stopped();
                    return;
                }
            }
        }
        drive(&self.shared);
    }
}

impl<F, B, S, R> Receiver for RoundReceiver<F, B, S, R>
where
    F: FnMut(B, Option<u64>) -> S + Send + 'static,
    B: BufferCursor,
    S: Sender<Value = usize> + 'static,
    R: Receiver<Value = usize>,
{
    type Value = usize;

    fn stop_token(&self) -> StopToken {
        self.shared
            .inner
            .lock()
            .receiver
            .as_ref()
            .map_or_else(StopToken::never, Receiver::stop_token)
    }

    fn set_value(self, value: usize) {
        self.complete(RoundResult::Transferred(value));
    }

    fn set_error(self, error: io::Error) {
        self.complete(RoundResult::Failed(error));
    }

    fn set_stopped(self) {
        self.complete(RoundResult::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MutableBuffer;
    use crate::exec::{just, sync_wait};

    /// Transfers at most `chunk` bytes per round, counting rounds.
    fn chunked_factory(
        chunk: usize,
        rounds: Arc<Mutex<Vec<usize>>>,
    ) -> impl FnMut(MutableBufferSpan, Option<u64>) -> crate::exec::Just<usize> {
        move |buffers, _offset| {
            let n = buffers.total_len().min(chunk);
            rounds.lock().push(n);
            just(n)
        }
    }

    #[test]
    fn reduces_to_total() {
        let mut storage = [0u8; 10];
        let span = MutableBufferSpan::single(MutableBuffer::new(&mut storage));
        let rounds = Arc::new(Mutex::new(Vec::new()));
        let sender = reduce(BufferedSequence::new(
            chunked_factory(4, rounds.clone()),
            span,
            None,
        ));
        assert_eq!(sync_wait(sender).into_value(), Some(10));
        assert_eq!(*rounds.lock(), vec![4, 4, 2]);
    }

    #[test]
    fn zero_round_is_eof() {
        let mut storage = [0u8; 8];
        let span = MutableBufferSpan::single(MutableBuffer::new(&mut storage));
        let mut first = true;
        let sender = reduce(BufferedSequence::new(
            move |buffers: MutableBufferSpan, _| {
                let n = if first {
                    first = false;
                    buffers.total_len().min(3)
                } else {
                    0
                };
                just(n)
            },
            span,
            None,
        ));
        assert_eq!(sync_wait(sender).into_value(), Some(3));
    }

    #[test]
    fn empty_buffers_complete_immediately() {
        let span = MutableBufferSpan::default();
        let sender = reduce(BufferedSequence::new(
            |_buffers: MutableBufferSpan, _| just(1usize),
            span,
            None,
        ));
        assert_eq!(sync_wait(sender).into_value(), Some(0));
    }

    #[test]
    fn offset_advances_with_progress() {
        let mut storage = [0u8; 6];
        let span = MutableBufferSpan::single(MutableBuffer::new(&mut storage));
        let offsets = Arc::new(Mutex::new(Vec::new()));
        let seen = offsets.clone();
        let sender = reduce(BufferedSequence::new(
            move |buffers: MutableBufferSpan, offset| {
                seen.lock().push(offset);
                just(buffers.total_len().min(2))
            },
            span,
            Some(100),
        ));
        assert_eq!(sync_wait(sender).into_value(), Some(6));
        assert_eq!(*offsets.lock(), vec![Some(100), Some(102), Some(104)]);
    }
}
