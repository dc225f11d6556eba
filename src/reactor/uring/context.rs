//! The io_uring reactor context.
//!
//! One ring serves as both the submission path (any thread, serialized by
//! the submit mutex) and the completion path (reactor thread only). The
//! wake channel is a `NOP` SQE carrying null user data: pushing it from
//! another thread makes a blocked `submit_and_wait(1)` return.
//!
//! Completion dispatch is lock-free by construction: only the driving
//! thread reads the completion queue, and each CQE's user data is the
//! address of the operation's completion base.

use crate::config::ContextConfig;
use io_uring::{opcode, squeue, IoUring};
use parking_lot::Mutex;
use std::io;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::operation::CompletionBase;

/// The io_uring reactor.
///
/// Lifecycle: `create → (run | submit)* → request_stop → drain → drop`.
/// The ring is valid for the whole lifetime; `submit_entry` and
/// `request_stop` are safe from any thread, the completion queue belongs
/// to the thread inside `run*`.
pub struct Context {
    ring: IoUring,
    /// Serializes submission queue access across producer threads.
    submit: Mutex<()>,
    stop_requested: AtomicBool,
}

// SAFETY: the submission queue is only touched under `submit`, the
// completion queue only by the driving thread, and the submitter side of
// the ring is thread-safe (it issues `io_uring_enter` on the ring fd).
unsafe impl Send for Context {}
unsafe impl Sync for Context {}

impl Context {
    /// Creates a context with default configuration.
    ///
    /// # Errors
    ///
    /// Fails if `io_uring_queue_init` fails.
    pub fn new() -> io::Result<Arc<Self>> {
        Self::with_config(&ContextConfig::new())
    }

    /// Creates a context with the given configuration.
    ///
    /// # Errors
    ///
    /// Fails if `io_uring_queue_init` fails.
    pub fn with_config(config: &ContextConfig) -> io::Result<Arc<Self>> {
        let ring = IoUring::new(config.queue_depth_value())?;
        Ok(Arc::new(Self {
            ring,
            submit: Mutex::new(()),
            stop_requested: AtomicBool::new(false),
        }))
    }

    /// Returns `true` once [`request_stop`](Self::request_stop) was called.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Requests the drive loop to stop. Idempotent, thread-safe.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.wake();
    }

    /// Unsticks a blocked drive loop with a `NOP` completion.
    pub(crate) fn wake(&self) {
        let entry = opcode::Nop::new().build().user_data(0);
        if let Err(err) = self.submit_entry(entry) {
            tracing::debug!(error = %err, "wake submission failed");
        }
    }

    /// Pushes one SQE and submits it, serialized across producers.
    ///
    /// A full queue is submitted and retried once; if it is still full the
    /// caller gets `ENOSPC`.
    pub(crate) fn submit_entry(&self, entry: squeue::Entry) -> io::Result<()> {
        let guard = self.submit.lock();
        // SAFETY: exclusive submission queue access is guaranteed by the
        // submit lock; the entry's buffers are owned by pinned operations
        // that outlive the kernel's use of them.
        unsafe {
            let mut sq = self.ring.submission_shared();
            if sq.push(&entry).is_err() {
                drop(sq);
                self.ring.submitter().submit()?;
                let mut sq = self.ring.submission_shared();
                if sq.push(&entry).is_err() {
                    return Err(io::Error::from_raw_os_error(libc::ENOSPC));
                }
            }
        }
        self.ring.submitter().submit()?;
        drop(guard);
        Ok(())
    }

    /// Requests cancellation of an in-flight operation: raises its flag
    /// and submits `ASYNC_CANCEL` keyed by the operation's address. The
    /// cancel SQE itself carries null user data so its CQE is ignored;
    /// the original operation still completes via its own CQE.
    pub(crate) fn cancel(&self, target: NonNull<CompletionBase>) {
        // SAFETY: the target is a pinned operation that deregisters its
        // stop callback before completing, so it is alive here.
        unsafe { target.as_ref() }.mark_cancelled();
        let entry = opcode::AsyncCancel::new(target.as_ptr() as u64)
            .build()
            .user_data(0);
        if let Err(err) = self.submit_entry(entry) {
            // The flag alone suffices; the op maps its eventual CQE to
            // stopped.
            tracing::debug!(error = %err, "async-cancel submission failed");
        }
    }

    fn dispatch(&self, user_data: u64, result: i32) {
        let Some(base) = NonNull::new(user_data as *mut CompletionBase) else {
            // Wake NOP or ignored cancel completion.
            return;
        };
        // SAFETY: non-null user data is always the address of a pinned,
        // still-incomplete operation's completion base.
        unsafe { CompletionBase::complete(base, result) };
    }

    fn drive(&self, block: bool) -> io::Result<usize> {
        let mut processed = 0;
        loop {
            // SAFETY: completion queue access is confined to the driving
            // thread.
            let next = unsafe {
                let mut cq = self.ring.completion_shared();
                cq.next().map(|cqe| (cqe.user_data(), cqe.result()))
            };

            let Some((user_data, result)) = next else {
                if !block {
                    break;
                }
                match self.ring.submitter().submit_and_wait(1) {
                    Ok(_) => continue,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) if err.raw_os_error() == Some(libc::EAGAIN) => break,
                    Err(err) => return Err(err),
                }
            };

            self.dispatch(user_data, result);
            processed += 1;
            if !block {
                continue;
            }
            if self.stop_requested() {
                break;
            }
        }
        Ok(processed)
    }

    /// Blocks until at least one completion has been dispatched (or stop
    /// was requested); returns the count processed.
    ///
    /// # Errors
    ///
    /// A ring wait failure other than `EINTR`/`EAGAIN` is fatal for this
    /// call; the context itself stays usable.
    pub fn run_one(&self) -> io::Result<usize> {
        self.drive(true)
    }

    /// Drains ready completions without blocking; returns the count.
    ///
    /// # Errors
    ///
    /// See [`run_one`](Self::run_one).
    pub fn run_some(&self) -> io::Result<usize> {
        self.drive(false)
    }

    /// Repeats [`run_some`](Self::run_some) until a pass processes
    /// nothing.
    ///
    /// # Errors
    ///
    /// See [`run_one`](Self::run_one).
    pub fn run_until_empty(&self) -> io::Result<()> {
        while self.run_some()? != 0 {}
        Ok(())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("uring::Context")
            .field("stop_requested", &self.stop_requested())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_available() -> bool {
        Context::new().is_ok()
    }

    #[test]
    fn create_and_poll_idle() {
        if !ring_available() {
            return;
        }
        let ctx = Context::new().expect("context");
        assert_eq!(ctx.run_some().expect("poll"), 0);
        ctx.run_until_empty().expect("drain");
    }

    #[test]
    fn stop_is_idempotent() {
        if !ring_available() {
            return;
        }
        let ctx = Context::new().expect("context");
        ctx.request_stop();
        ctx.request_stop();
        assert!(ctx.stop_requested());
    }

    #[test]
    fn wake_unblocks_run_one() {
        if !ring_available() {
            return;
        }
        let ctx = Context::new().expect("context");
        let ctx2 = ctx.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(30));
            ctx2.request_stop();
        });
        let started = std::time::Instant::now();
        ctx.run_one().expect("run_one");
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        handle.join().unwrap();
    }
}
