//! Cooperative stop tokens.
//!
//! A [`StopSource`] owns a stop state; [`StopToken`]s observe it; a
//! [`StopCallback`] runs a closure when stop is requested. Every operation
//! registers at most one callback pointing at itself and deregisters it
//! before delivering any terminal signal, so a callback can never fire into
//! an operation that has already completed.
//!
//! Dropping a [`StopCallback`] guarantees the closure either already ran to
//! completion or will never run. If the closure is executing on another
//! thread at drop time, drop blocks until it finishes.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

type Callback = Box<dyn FnOnce() + Send>;

struct Registry {
    next_id: u64,
    entries: Vec<(u64, Callback)>,
    /// Callback currently executing, with the thread running it.
    running: Option<(u64, ThreadId)>,
}

struct StopState {
    stopped: AtomicBool,
    registry: Mutex<Registry>,
    unblock: Condvar,
}

impl StopState {
    fn new() -> Self {
        Self {
            stopped: AtomicBool::new(false),
            registry: Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
                running: None,
            }),
            unblock: Condvar::new(),
        }
    }

    fn request_stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }
        loop {
            let mut registry = self.registry.lock();
            let Some((id, callback)) = registry.entries.pop() else {
                break;
            };
            registry.running = Some((id, thread::current().id()));
            drop(registry);

            callback();

            let mut registry = self.registry.lock();
            registry.running = None;
            self.unblock.notify_all();
            drop(registry);
        }
        true
    }
}

/// Owner side of a stop state. Cloning shares the same state.
#[derive(Clone)]
pub struct StopSource {
    state: Arc<StopState>,
}

impl StopSource {
    /// Creates a fresh, un-stopped source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(StopState::new()),
        }
    }

    /// A token observing this source.
    #[must_use]
    pub fn token(&self) -> StopToken {
        StopToken {
            state: Some(self.state.clone()),
        }
    }

    /// Requests stop. Idempotent; returns `true` on the first request.
    ///
    /// Registered callbacks run on the calling thread before this returns.
    pub fn request_stop(&self) -> bool {
        self.state.request_stop()
    }

    /// Returns `true` if stop has been requested.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.state.stopped.load(Ordering::Acquire)
    }
}

impl Default for StopSource {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StopSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSource")
            .field("stop_requested", &self.stop_requested())
            .finish()
    }
}

/// Observer side of a stop state.
#[derive(Clone, Default)]
pub struct StopToken {
    state: Option<Arc<StopState>>,
}

impl StopToken {
    /// A token that can never be stopped.
    #[must_use]
    pub const fn never() -> Self {
        Self { state: None }
    }

    /// Returns `true` if stop has been requested.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|s| s.stopped.load(Ordering::Acquire))
    }

    /// Returns `true` if a stop request is possible at all.
    #[must_use]
    pub fn stop_possible(&self) -> bool {
        self.state.is_some()
    }

    /// Registers `callback` to run when stop is requested.
    ///
    /// Returns `None` without registering when the token cannot stop.
    /// If stop was already requested, `callback` runs immediately on this
    /// thread and `None` is returned.
    pub fn on_stop<F>(&self, callback: F) -> Option<StopCallback>
    where
        F: FnOnce() + Send + 'static,
    {
        let state = self.state.as_ref()?;
        {
            let mut registry = state.registry.lock();
            if !state.stopped.load(Ordering::Acquire) {
                let id = registry.next_id;
                registry.next_id += 1;
                registry.entries.push((id, Box::new(callback)));
                return Some(StopCallback {
                    state: state.clone(),
                    id,
                });
            }
        }
        // Raced with request_stop: honor the registration by running now.
        callback();
        None
    }
}

impl std::fmt::Debug for StopToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopToken")
            .field("stop_possible", &self.stop_possible())
            .field("stop_requested", &self.stop_requested())
            .finish()
    }
}

/// A registered stop callback. Dropping deregisters.
pub struct StopCallback {
    state: Arc<StopState>,
    id: u64,
}

impl Drop for StopCallback {
    fn drop(&mut self) {
        let mut registry = self.state.registry.lock();
        if let Some(pos) = registry.entries.iter().position(|(id, _)| *id == self.id) {
            registry.entries.swap_remove(pos);
            return;
        }
        // The callback was taken by request_stop. If it is mid-execution on
        // another thread, wait for it; re-entrant drop from the callback's
        // own thread must not deadlock.
        let current = thread::current().id();
        while matches!(registry.running, Some((id, tid)) if id == self.id && tid != current) {
            self.state.unblock.wait(&mut registry);
        }
    }
}

impl std::fmt::Debug for StopCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopCallback").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn request_stop_is_idempotent() {
        let source = StopSource::new();
        assert!(!source.stop_requested());
        assert!(source.request_stop());
        assert!(!source.request_stop());
        assert!(source.stop_requested());
        assert!(source.token().stop_requested());
    }

    #[test]
    fn callback_runs_on_stop() {
        let source = StopSource::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let _cb = source.token().on_stop(move || {
            flag.store(true, Ordering::SeqCst);
        });
        assert!(!fired.load(Ordering::SeqCst));
        source.request_stop();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn callback_after_stop_runs_immediately() {
        let source = StopSource::new();
        source.request_stop();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let cb = source.token().on_stop(move || {
            flag.store(true, Ordering::SeqCst);
        });
        assert!(cb.is_none());
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn dropped_callback_never_runs() {
        let source = StopSource::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let cb = source.token().on_stop(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(cb);
        source.request_stop();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn never_token_cannot_register() {
        let token = StopToken::never();
        assert!(!token.stop_possible());
        assert!(!token.stop_requested());
        assert!(token.on_stop(|| {}).is_none());
    }

    #[test]
    fn multiple_callbacks_all_fire() {
        let source = StopSource::new();
        let count = Arc::new(AtomicUsize::new(0));
        let callbacks: Vec<_> = (0..5)
            .map(|_| {
                let counter = count.clone();
                source.token().on_stop(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        source.request_stop();
        assert_eq!(count.load(Ordering::SeqCst), 5);
        drop(callbacks);
    }

    #[test]
    fn cross_thread_stop() {
        let source = StopSource::new();
        let token = source.token();
        let handle = thread::spawn(move || {
            source.request_stop();
        });
        handle.join().unwrap();
        assert!(token.stop_requested());
    }
}
