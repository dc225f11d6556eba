//! Shared state of epoll fd operations.
//!
//! Every fd operation embeds an [`FdOpCore`] as its first field. The core
//! carries the runnable (ready-queue linkage + dispatch), the wait-queue
//! links, the descriptor token with a cached entry pointer, and the
//! cancellation flag. Concrete operations add their submission parameters,
//! the receiver and the stop callback, and implement `run_once` on top of
//! the core's suspension helpers.
//!
//! # Layout
//!
//! ```text
//! ┌───────────────────────────────┐
//! │ concrete op (repr(C))         │
//! │ ┌──────────────────────────┐  │
//! │ │ FdOpCore (repr(C))       │  │  first field: the reactor holds a
//! │ │ ┌─────────────────────┐  │  │  Runnable* and casts back through
//! │ │ │ Runnable            │  │  │  these prefixes.
//! │ │ └─────────────────────┘  │  │
//! │ │ wait links, token, flags │  │
//! │ └──────────────────────────┘  │
//! │ buffers / endpoint / receiver │
//! └───────────────────────────────┘
//! ```

use crate::intrusive::{ListLinks, ListNode};
pub(crate) use crate::reactor::seat::OpSeat;
use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, Ordering};
use std::sync::Arc;

use super::context::{Context, DescriptorEntry, DescriptorToken, Interest, Runnable};

/// Common state of every epoll fd operation.
#[repr(C)]
pub(crate) struct FdOpCore {
    runnable: Runnable,
    wait_links: UnsafeCell<ListLinks<FdOpCore>>,
    pub(crate) waiting: AtomicBool,
    pub(crate) waiting_interest: AtomicU8,
    cancelled: AtomicBool,
    entry: AtomicPtr<DescriptorEntry>,
    token: DescriptorToken,
    ctx: Arc<Context>,
}

// SAFETY: `wait_links` belongs to the core; membership is exclusive (one
// wait queue at a time, guarded by the entry mutex).
unsafe impl ListNode for FdOpCore {
    unsafe fn links(this: NonNull<Self>) -> NonNull<ListLinks<Self>> {
        NonNull::new_unchecked((*this.as_ptr()).wait_links.get())
    }
}

impl FdOpCore {
    pub(crate) fn new(
        ctx: Arc<Context>,
        token: DescriptorToken,
        execute: unsafe fn(NonNull<Runnable>),
    ) -> Self {
        Self {
            runnable: Runnable::new(execute),
            wait_links: UnsafeCell::new(ListLinks::new()),
            waiting: AtomicBool::new(false),
            waiting_interest: AtomicU8::new(Interest::None as u8),
            cancelled: AtomicBool::new(false),
            entry: AtomicPtr::new(std::ptr::null_mut()),
            token,
            ctx,
        }
    }

    pub(crate) fn ctx(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// The runnable embedded in a core.
    pub(crate) fn runnable_of(core: NonNull<FdOpCore>) -> NonNull<Runnable> {
        // The runnable is the first field of a repr(C) struct.
        core.cast()
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn clear_waiting(&self) {
        self.waiting_interest
            .store(Interest::None as u8, Ordering::Release);
        self.waiting.store(false, Ordering::Release);
    }

    /// Resolves (and caches) the descriptor entry behind the token.
    /// `None` means the descriptor was released: the token is stale.
    pub(crate) fn ensure_entry(&self) -> Option<NonNull<DescriptorEntry>> {
        if let Some(entry) = NonNull::new(self.entry.load(Ordering::Acquire)) {
            // SAFETY: entries are never deallocated while the context
            // lives; staleness is detected via the epoch.
            let entry_ref = unsafe { entry.as_ref() };
            if entry_ref.has_fd() && entry_ref.epoch() == self.token.epoch {
                return Some(entry);
            }
            self.entry.store(std::ptr::null_mut(), Ordering::Release);
        }
        let entry = self.ctx.lookup(self.token)?;
        self.entry.store(entry.as_ptr(), Ordering::Release);
        Some(entry)
    }

    /// Drops the cached entry pointer.
    pub(crate) fn release_entry_ref(&self) {
        self.entry.store(std::ptr::null_mut(), Ordering::Release);
    }

    /// Suspends this operation until `interest` readiness. Returns `false`
    /// when the descriptor vanished and no wait was armed.
    pub(crate) fn wait_on(&self, interest: Interest) -> bool {
        self.waiting_interest.store(interest as u8, Ordering::Release);
        self.waiting.store(true, Ordering::Release);
        let Some(entry) = self.ensure_entry() else {
            self.clear_waiting();
            return false;
        };
        // SAFETY: entry pointers stay valid for the context's lifetime.
        unsafe { entry.as_ref() }.add_waiter(&self.ctx, NonNull::from(self), interest);
        true
    }

    /// Cooperative cancellation: first caller wins the flag; if the op is
    /// parked in a wait queue it is spliced out and re-enqueued so its
    /// next step observes the flag and completes stopped.
    pub(crate) fn request_stop(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut was_waiting = false;
        if let Some(entry) = NonNull::new(self.entry.load(Ordering::Acquire)) {
            // SAFETY: entries outlive the context's operations.
            was_waiting = unsafe { entry.as_ref() }.remove_waiter(&self.ctx, NonNull::from(self));
        }
        if was_waiting {
            tracing::trace!(slot = self.token.slot, "cancelled waiting operation");
            // SAFETY: the op was spliced out of its only queue, so it is
            // not enqueued anywhere else; its owner is pinned.
            unsafe { self.ctx.enqueue_task(Self::runnable_of(NonNull::from(self))) };
        }
    }
}

/// Common start path of epoll operations: observe an already-stopped
/// token, otherwise subscribe the stop callback and enqueue the first
/// `run_once` step on the reactor.
///
/// # Safety
///
/// `core` and `seat` must belong to the same pinned operation, which must
/// stay alive until its terminal signal.
pub(crate) unsafe fn start_enqueue<R>(core: &FdOpCore, seat: &mut OpSeat<R>)
where
    R: crate::exec::Receiver,
{
    let token = seat.stop_token();
    if token.stop_requested() {
        seat.take().set_stopped();
        return;
    }
    let target = CorePointer(NonNull::from(core));
    seat.install_callback(token.on_stop(move || {
        let target = target;
        // SAFETY: the callback is deregistered before the op completes,
        // so the core outlives every possible invocation.
        unsafe { target.0.as_ref() }.request_stop();
    }));
    core.ctx()
        .enqueue_task(FdOpCore::runnable_of(NonNull::from(core)));
}

/// Pointer wrapper making the stop-callback closure sendable.
#[derive(Clone, Copy)]
struct CorePointer(NonNull<FdOpCore>);

// SAFETY: the pointee is pinned and synchronized internally (atomics);
// request_stop is designed for cross-thread calls.
unsafe impl Send for CorePointer {}

/// Common state of operations that run once on the reactor thread without
/// waiting on a descriptor (open, close, schedule).
#[repr(C)]
pub(crate) struct QueuedCore {
    runnable: Runnable,
    cancelled: AtomicBool,
    ctx: Arc<Context>,
}

impl QueuedCore {
    pub(crate) fn new(ctx: Arc<Context>, execute: unsafe fn(NonNull<Runnable>)) -> Self {
        Self {
            runnable: Runnable::new(execute),
            cancelled: AtomicBool::new(false),
            ctx,
        }
    }

    pub(crate) fn ctx(&self) -> &Arc<Context> {
        &self.ctx
    }

    pub(crate) fn runnable_of(core: NonNull<QueuedCore>) -> NonNull<Runnable> {
        // The runnable is the first field of a repr(C) struct.
        core.cast()
    }

    pub(crate) fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Start path of queued operations: the op is enqueued immediately, so a
/// later stop request only needs to raise the flag — the queued step
/// observes it and completes stopped.
///
/// # Safety
///
/// `core` and `seat` must belong to the same pinned operation, which must
/// stay alive until its terminal signal.
pub(crate) unsafe fn start_enqueue_queued<R>(core: &QueuedCore, seat: &mut OpSeat<R>)
where
    R: crate::exec::Receiver,
{
    let token = seat.stop_token();
    if token.stop_requested() {
        seat.take().set_stopped();
        return;
    }
    let target = QueuedPointer(NonNull::from(core));
    seat.install_callback(token.on_stop(move || {
        let target = target;
        // SAFETY: the callback is deregistered before the op completes.
        unsafe { target.0.as_ref() }
            .cancelled
            .store(true, Ordering::Release);
    }));
    core.ctx()
        .enqueue_task(QueuedCore::runnable_of(NonNull::from(core)));
}

/// Pointer wrapper making the queued stop-callback closure sendable.
#[derive(Clone, Copy)]
struct QueuedPointer(NonNull<QueuedCore>);

// SAFETY: see `CorePointer`.
unsafe impl Send for QueuedPointer {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::RawFd;

    unsafe fn noop(_task: NonNull<Runnable>) {}

    #[test]
    fn interest_mask_follows_wait_queues() {
        let ctx = Context::new().expect("context");
        let mut fds = [0 as RawFd; 2];
        // SAFETY: disposable pipe for a pollable fd.
        assert_eq!(
            unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) },
            0
        );
        let token = ctx.register_descriptor(fds[0]);

        // The core stays in place for the whole test.
        let core = FdOpCore::new(ctx.clone(), token, noop);
        assert!(core.wait_on(Interest::Read));
        {
            let entry = ctx.lookup(token).expect("entry");
            // SAFETY: entries outlive the context's users.
            let state = unsafe { entry.as_ref() }.state.lock();
            assert_eq!(state.interest_mask, state.computed_mask());
            assert_ne!(state.interest_mask & libc::EPOLLIN as u32, 0);
        }

        // Cancellation splices the waiter out and re-derives the mask.
        core.request_stop();
        {
            let entry = ctx.lookup(token).expect("entry");
            // SAFETY: as above.
            let state = unsafe { entry.as_ref() }.state.lock();
            assert_eq!(state.computed_mask(), 0);
            assert_eq!(state.interest_mask, state.computed_mask());
        }

        ctx.run_until_empty().expect("drain");
        ctx.release_entry(token).expect("release");
        // SAFETY: write end still ours.
        unsafe { libc::close(fds[1]) };
    }

    #[test]
    fn stale_token_misses_after_release() {
        let ctx = Context::new().expect("context");
        let mut fds = [0 as RawFd; 2];
        // SAFETY: disposable pipe.
        assert_eq!(
            unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) },
            0
        );
        let token = ctx.register_descriptor(fds[0]);

        let core = FdOpCore::new(ctx.clone(), token, noop);
        assert!(core.ensure_entry().is_some());

        ctx.release_entry(token).expect("release");
        assert!(core.ensure_entry().is_none(), "stale token must miss");
        assert!(!core.wait_on(Interest::Read), "arming on a stale token fails");

        // SAFETY: write end still ours.
        unsafe { libc::close(fds[1]) };
    }
}
