//! The epoll reactor context.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                          Context                               │
//! │  ┌───────────┐  ┌───────────┐  ┌────────────────────────────┐  │
//! │  │ epoll fd  │  │ eventfd   │  │  descriptor slot table     │  │
//! │  │ (pwait2)  │  │ (wake)    │  │  {fd, epoch, wait queues}  │  │
//! │  └───────────┘  └───────────┘  └────────────────────────────┘  │
//! │  ┌──────────────────────────────────────────────────────────┐  │
//! │  │ ready queue (intrusive, mutex push / swap-drain pop)     │  │
//! │  └──────────────────────────────────────────────────────────┘  │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The drive loop drains the ready queue, then waits on `epoll_pwait2`.
//! Each readiness event either drains the wake eventfd or wakes the
//! matching descriptor entry's wait queues.
//!
//! # Descriptor tokens
//!
//! Closing an fd does not atomically cancel kernel-registered interest
//! with respect to outstanding waiters, so descriptor state is never
//! handed out by pointer. Instead [`Context::register_descriptor`] returns
//! a [`DescriptorToken`] — a `{slot, epoch}` pair. Releasing the entry
//! bumps the epoch; a stale token fails [`Context::lookup`] and the
//! operation holding it completes with `EBADF` instead of touching reused
//! state.

use crate::config::ContextConfig;
use crate::intrusive::{List, ListLinks, ListNode, Queue, QueueNode};
use parking_lot::{Mutex, RwLock};
use std::cell::UnsafeCell;
use std::io;
use std::os::fd::RawFd;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use super::operation::FdOpCore;

/// Readiness interest of a suspended operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Interest {
    /// Not waiting.
    None = 0,
    /// Waiting for read readiness.
    Read = 1,
    /// Waiting for write readiness.
    Write = 2,
}

impl Interest {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Read,
            2 => Self::Write,
            _ => Self::None,
        }
    }
}

/// Epoch-versioned handle to a descriptor slot.
///
/// Valid while the slot still holds the epoch the token was minted with;
/// releasing the slot invalidates every outstanding token for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DescriptorToken {
    pub(crate) slot: u32,
    pub(crate) epoch: u32,
}

impl DescriptorToken {
    pub(crate) const INVALID_SLOT: u32 = u32::MAX;

    /// A token that never matches any slot. Zero-initialized tokens are
    /// also detectably invalid because epoch 0 is skipped when minting.
    #[must_use]
    pub const fn invalid() -> Self {
        Self {
            slot: Self::INVALID_SLOT,
            epoch: 0,
        }
    }

    /// Returns `true` if the token could name a slot at all.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.slot != Self::INVALID_SLOT && self.epoch != 0
    }
}

/// Work item executable on the reactor thread.
///
/// The universal base of everything the ready queue holds: completion
/// steps, schedule callbacks, resumed waiters. Owned by its enclosing
/// operation, which stays pinned while the runnable is reachable.
#[repr(C)]
pub(crate) struct Runnable {
    next: *mut Runnable,
    execute: unsafe fn(NonNull<Runnable>),
}

impl Runnable {
    pub(crate) fn new(execute: unsafe fn(NonNull<Runnable>)) -> Self {
        Self {
            next: ptr::null_mut(),
            execute,
        }
    }

    /// Runs the work item.
    ///
    /// # Safety
    ///
    /// `this` must point at a live runnable whose owner is pinned.
    pub(crate) unsafe fn run(this: NonNull<Runnable>) {
        (this.as_ref().execute)(this);
    }
}

// SAFETY: `next` is embedded in the runnable and used by one queue at a
// time (ready-queue membership is exclusive).
unsafe impl QueueNode for Runnable {
    unsafe fn next(this: NonNull<Self>) -> *mut Self {
        (*this.as_ptr()).next
    }

    unsafe fn set_next(this: NonNull<Self>, next: *mut Self) {
        (*this.as_ptr()).next = next;
    }
}

/// Mutable portion of a descriptor entry, guarded by the entry mutex.
pub(crate) struct EntryState {
    pub(crate) registered: bool,
    pub(crate) interest_mask: u32,
    pub(crate) read_waiters: List<FdOpCore>,
    pub(crate) write_waiters: List<FdOpCore>,
}

impl EntryState {
    /// Interest mask implied by the wait queues. The entry's armed mask
    /// equals this value whenever an operation is enqueued.
    pub(crate) fn computed_mask(&self) -> u32 {
        let mut mask = 0;
        if !self.read_waiters.is_empty() {
            mask |= (libc::EPOLLIN | libc::EPOLLRDHUP | libc::EPOLLERR) as u32;
        }
        if !self.write_waiters.is_empty() {
            mask |= (libc::EPOLLOUT | libc::EPOLLERR) as u32;
        }
        mask
    }
}

/// One slot of the descriptor table.
pub(crate) struct DescriptorEntry {
    slot: u32,
    epoch: AtomicU32,
    fd: AtomicI32,
    pub(crate) state: Mutex<EntryState>,
    free_links: UnsafeCell<ListLinks<DescriptorEntry>>,
}

// SAFETY: all mutable state is behind atomics or the entry mutex; the
// free links are only touched under the table's exclusive lock.
unsafe impl Send for DescriptorEntry {}
unsafe impl Sync for DescriptorEntry {}

// SAFETY: `free_links` belongs to the entry and is only used by the
// context's free list, under the table's exclusive lock.
unsafe impl ListNode for DescriptorEntry {
    unsafe fn links(this: NonNull<Self>) -> NonNull<ListLinks<Self>> {
        NonNull::new_unchecked((*this.as_ptr()).free_links.get())
    }
}

impl DescriptorEntry {
    fn new(slot: u32) -> Self {
        Self {
            slot,
            epoch: AtomicU32::new(0),
            fd: AtomicI32::new(-1),
            state: Mutex::new(EntryState {
                registered: false,
                interest_mask: 0,
                read_waiters: List::new(),
                write_waiters: List::new(),
            }),
            free_links: UnsafeCell::new(ListLinks::new()),
        }
    }

    pub(crate) fn slot(&self) -> u32 {
        self.slot
    }

    pub(crate) fn epoch(&self) -> u32 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Advances the epoch, skipping the 0 sentinel.
    fn bump_epoch(&self) -> u32 {
        let mut next = self.epoch.load(Ordering::Relaxed).wrapping_add(1);
        if next == 0 {
            next = 1;
        }
        self.epoch.store(next, Ordering::Release);
        next
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.fd.load(Ordering::Acquire)
    }

    pub(crate) fn has_fd(&self) -> bool {
        self.raw_fd() >= 0
    }

    /// Appends `op` to the wait queue for `interest` and re-arms the
    /// entry's interest mask.
    pub(crate) fn add_waiter(&self, ctx: &Context, op: NonNull<FdOpCore>, interest: Interest) {
        let mut state = self.state.lock();
        match interest {
            // SAFETY: the op is pinned and joins exactly one queue.
            Interest::Read => unsafe { state.read_waiters.push_back(op) },
            Interest::Write => unsafe { state.write_waiters.push_back(op) },
            Interest::None => return,
        }
        let mask = state.computed_mask();
        ctx.update_interest(self, &mut state, mask);
    }

    /// Splices `op` out of its wait queue if it is still enqueued.
    /// Returns `true` if it was.
    pub(crate) fn remove_waiter(&self, ctx: &Context, op: NonNull<FdOpCore>) -> bool {
        let mut state = self.state.lock();
        // SAFETY: the waiting flag is only true while the op is linked in
        // one of this entry's queues; both are checked under the lock.
        let removed = unsafe {
            let core = op.as_ref();
            if !core.waiting.load(Ordering::Acquire) {
                false
            } else {
                match Interest::from_u8(core.waiting_interest.load(Ordering::Acquire)) {
                    Interest::Read => state.read_waiters.remove(op),
                    Interest::Write => state.write_waiters.remove(op),
                    Interest::None => return false,
                }
                core.clear_waiting();
                true
            }
        };
        if removed {
            let mask = state.computed_mask();
            ctx.update_interest(self, &mut state, mask);
        }
        removed
    }

    /// Wakes the waiters selected by the epoll event bits.
    fn handle_events(&self, ctx: &Context, events: u32) {
        let wake_read = events
            & (libc::EPOLLIN | libc::EPOLLERR | libc::EPOLLRDHUP | libc::EPOLLHUP) as u32
            != 0;
        let wake_write = events & (libc::EPOLLOUT | libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0;
        if !wake_read && !wake_write {
            return;
        }

        let mut ready_readers = List::new();
        let mut ready_writers = List::new();
        {
            let mut state = self.state.lock();
            if wake_read {
                ready_readers = state.read_waiters.take_all();
            }
            if wake_write {
                ready_writers = state.write_waiters.take_all();
            }
            // Clear waiting flags under the lock so a concurrent cancel
            // cannot splice an already-removed node.
            for list in [&ready_readers, &ready_writers] {
                let mut cursor = list_head(list);
                while let Some(op) = cursor {
                    // SAFETY: taken-out ops are live and owned by pinned
                    // operations.
                    unsafe {
                        op.as_ref().clear_waiting();
                        cursor = next_in_list(op);
                    }
                }
            }
            let mask = state.computed_mask();
            ctx.update_interest(self, &mut state, mask);
        }

        resume_waiters(ctx, ready_readers);
        resume_waiters(ctx, ready_writers);
    }
}

fn list_head(list: &List<FdOpCore>) -> Option<NonNull<FdOpCore>> {
    list.peek_front()
}

unsafe fn next_in_list(op: NonNull<FdOpCore>) -> Option<NonNull<FdOpCore>> {
    List::next_of(op)
}

fn resume_waiters(ctx: &Context, mut list: List<FdOpCore>) {
    while let Some(op) = list.pop_front() {
        // SAFETY: the op is pinned; its runnable is enqueued exactly once
        // (it was just removed from the only queue it was in).
        unsafe { ctx.enqueue_task(FdOpCore::runnable_of(op)) };
    }
}

struct EntryTable {
    entries: Vec<Box<DescriptorEntry>>,
    free: List<DescriptorEntry>,
}

/// The epoll reactor.
///
/// Lifecycle: `create → (run | enqueue)* → request_stop → drain → drop`.
/// The epoll fd and the wake eventfd are valid for the whole lifetime.
/// The ready queue is popped only by the thread inside `run*`;
/// `enqueue_task` and `request_stop` are safe from any thread.
pub struct Context {
    epoll_fd: RawFd,
    wake_fd: RawFd,
    ready: Mutex<Queue<Runnable>>,
    stop_requested: AtomicBool,
    table: RwLock<EntryTable>,
    /// Event batch buffer, used only by the driving thread.
    events: Mutex<Vec<libc::epoll_event>>,
    event_capacity: usize,
}

// SAFETY: every field is synchronized (atomics, mutexes, rwlock); raw fds
// are plain integers.
unsafe impl Send for Context {}
unsafe impl Sync for Context {}

impl Context {
    /// Creates a context with default configuration.
    ///
    /// # Errors
    ///
    /// Fails if `epoll_create1` or `eventfd` fail.
    pub fn new() -> io::Result<Arc<Self>> {
        Self::with_config(&ContextConfig::new())
    }

    /// Creates a context with the given configuration.
    ///
    /// # Errors
    ///
    /// Fails if `epoll_create1` or `eventfd` fail.
    pub fn with_config(config: &ContextConfig) -> io::Result<Arc<Self>> {
        // SAFETY: plain syscalls; results are checked.
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: as above.
        let wake_fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if wake_fd < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: epoll_fd was just opened by us.
            unsafe { libc::close(epoll_fd) };
            return Err(err);
        }

        let mut ev = libc::epoll_event {
            events: (libc::EPOLLIN | libc::EPOLLET) as u32,
            u64: 0, // wake sentinel
        };
        // SAFETY: registering the eventfd we own with the epoll we own.
        if unsafe { libc::epoll_ctl(epoll_fd, libc::EPOLL_CTL_ADD, wake_fd, &mut ev) } < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: both fds were just opened by us.
            unsafe {
                libc::close(wake_fd);
                libc::close(epoll_fd);
            }
            return Err(err);
        }

        Ok(Arc::new(Self {
            epoll_fd,
            wake_fd,
            ready: Mutex::new(Queue::new()),
            stop_requested: AtomicBool::new(false),
            table: RwLock::new(EntryTable {
                entries: Vec::new(),
                free: List::new(),
            }),
            events: Mutex::new(Vec::new()),
            event_capacity: config.event_capacity_value().max(1),
        }))
    }

    /// Returns `true` once [`request_stop`](Self::request_stop) was called.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Requests the drive loop to stop. Idempotent, thread-safe.
    ///
    /// Already-enqueued work still executes; operations that observe the
    /// stop flag cancel themselves.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.wake();
    }

    pub(crate) fn wake(&self) {
        let value: u64 = 1;
        // SAFETY: wake_fd is a valid eventfd for the context's lifetime; a
        // full counter (EAGAIN) already guarantees a pending wake.
        let rc = unsafe {
            libc::write(
                self.wake_fd,
                std::ptr::addr_of!(value).cast(),
                std::mem::size_of::<u64>(),
            )
        };
        let _ = rc;
    }

    fn drain_wake_fd(&self) {
        let mut value: u64 = 0;
        loop {
            // SAFETY: reading our own non-blocking eventfd.
            let rc = unsafe {
                libc::read(
                    self.wake_fd,
                    std::ptr::addr_of_mut!(value).cast(),
                    std::mem::size_of::<u64>(),
                )
            };
            if rc > 0 {
                continue;
            }
            if rc < 0 && io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
                continue;
            }
            break;
        }
    }

    /// Enqueues a runnable for execution on the reactor thread and wakes
    /// a blocked drive loop. Thread-safe, O(1).
    ///
    /// # Safety
    ///
    /// The runnable's owner must stay pinned until the runnable executes,
    /// and the runnable must not already be enqueued.
    pub(crate) unsafe fn enqueue_task(&self, task: NonNull<Runnable>) {
        {
            let mut ready = self.ready.lock();
            ready.push_back(task);
        }
        self.wake();
    }

    fn drain_ready_tasks(&self) -> usize {
        let mut pending = self.ready.lock().take_all();
        let mut executed = 0;
        while let Some(task) = pending.pop_front() {
            // SAFETY: enqueue_task's contract keeps the owner pinned.
            unsafe { Runnable::run(task) };
            executed += 1;
        }
        executed
    }

    fn dispatch_event(&self, event: &libc::epoll_event) {
        if event.u64 == 0 {
            self.drain_wake_fd();
            return;
        }
        let entry = event.u64 as *const DescriptorEntry;
        // SAFETY: non-wake events carry a pointer to an entry owned by our
        // table; entries are never deallocated while the context lives.
        let entry = unsafe { &*entry };
        if entry.has_fd() {
            entry.handle_events(self, event.events);
        }
    }

    /// One `epoll_pwait2` pass: waits (or polls), dispatches every event.
    /// Dispatch only moves waiters to the ready queue; user code runs
    /// later in `drain_ready_tasks`, outside the events-buffer lock.
    fn poll_events(&self, block: bool) -> io::Result<usize> {
        let zero = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        let timeout: *const libc::timespec = if block { ptr::null() } else { &zero };

        let mut events = self.events.lock();
        events.resize(
            self.event_capacity,
            libc::epoll_event { events: 0, u64: 0 },
        );

        loop {
            // SAFETY: the buffer outlives the call and capacity is passed
            // alongside; sigmask is null (no signal masking).
            let n = unsafe {
                libc::epoll_pwait2(
                    self.epoll_fd,
                    events.as_mut_ptr(),
                    self.event_capacity as libc::c_int,
                    timeout,
                    ptr::null(),
                )
            };
            if n >= 0 {
                for event in &events[..n as usize] {
                    self.dispatch_event(event);
                }
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                if block {
                    continue;
                }
                return Ok(0);
            }
            return Err(err);
        }
    }

    fn drive(&self, block: bool) -> io::Result<usize> {
        let mut processed = self.drain_ready_tasks();
        if !block && processed != 0 {
            return Ok(processed);
        }

        loop {
            processed += self.poll_events(block)?;
            processed += self.drain_ready_tasks();

            if !block || processed != 0 || self.stop_requested() {
                break;
            }
        }

        Ok(processed)
    }

    /// Blocks until at least one runnable executed or one OS event was
    /// dispatched; returns the count processed.
    ///
    /// # Errors
    ///
    /// An `epoll_pwait2` failure other than `EINTR` is fatal for this
    /// call; the context itself stays usable.
    pub fn run_one(&self) -> io::Result<usize> {
        self.drive(true)
    }

    /// Polls the ready queue and the OS reactor without blocking; returns
    /// the count processed.
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

    /// Registers `fd` in the slot table and returns its token.
    ///
    /// Interest is not armed yet; that happens when the first operation
    /// waits on the descriptor. The table takes ownership of `fd` and
    /// closes it on release.
    pub fn register_descriptor(&self, fd: RawFd) -> DescriptorToken {
        let mut table = self.table.write();
        let entry: &DescriptorEntry = if let Some(free) = table.free.pop_front() {
            // SAFETY: free-listed entries are owned by `entries` and
            // remain boxed for the table's lifetime.
            unsafe { free.as_ref() }
        } else {
            let slot = table.entries.len() as u32;
            table.entries.push(Box::new(DescriptorEntry::new(slot)));
            table.entries.last().expect("just pushed")
        };

        entry.fd.store(fd, Ordering::Release);
        {
            let mut state = entry.state.lock();
            state.registered = false;
            state.interest_mask = 0;
            debug_assert!(state.read_waiters.is_empty());
            debug_assert!(state.write_waiters.is_empty());
        }
        let epoch = entry.bump_epoch();
        tracing::trace!(slot = entry.slot(), epoch, fd, "descriptor registered");
        DescriptorToken {
            slot: entry.slot(),
            epoch,
        }
    }

    /// Resolves a token to its entry; `None` if the token is stale or the
    /// slot holds no fd. Safe to race with [`release_entry`](Self::release_entry).
    pub(crate) fn lookup(&self, token: DescriptorToken) -> Option<NonNull<DescriptorEntry>> {
        if !token.is_valid() {
            return None;
        }
        let table = self.table.read();
        let entry = table.entries.get(token.slot as usize)?;
        if entry.epoch() != token.epoch || !entry.has_fd() {
            return None;
        }
        Some(NonNull::from(&**entry))
    }

    /// The raw fd behind a valid token.
    ///
    /// # Errors
    ///
    /// `EBADF` for stale or released tokens.
    pub fn native_handle(&self, token: DescriptorToken) -> io::Result<RawFd> {
        self.lookup(token)
            // SAFETY: entries are never deallocated while the context
            // lives.
            .map(|entry| unsafe { entry.as_ref().raw_fd() })
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))
    }

    /// Releases a descriptor: tears out its waiters, unregisters from
    /// epoll, closes the fd, bumps the epoch and recycles the slot. Taken
    /// out waiters are re-enqueued and complete with `EBADF` on their next
    /// step.
    ///
    /// # Errors
    ///
    /// `EBADF` when the token no longer matches the slot.
    pub fn release_entry(&self, token: DescriptorToken) -> io::Result<()> {
        let (ready_readers, ready_writers, fd) = {
            let mut table = self.table.write();
            if !token.is_valid() || token.slot as usize >= table.entries.len() {
                return Err(io::Error::from_raw_os_error(libc::EBADF));
            }
            let entry = NonNull::from(&*table.entries[token.slot as usize]);
            // SAFETY: boxed entry, stable for the table's lifetime.
            let entry_ref = unsafe { entry.as_ref() };
            if entry_ref.epoch() != token.epoch || !entry_ref.has_fd() {
                return Err(io::Error::from_raw_os_error(libc::EBADF));
            }
            let fd = entry_ref.raw_fd();
            let (ready_readers, ready_writers) = {
                let mut state = entry_ref.state.lock();
                let readers = state.read_waiters.take_all();
                let writers = state.write_waiters.take_all();
                for list in [&readers, &writers] {
                    let mut cursor = list_head(list);
                    while let Some(op) = cursor {
                        // SAFETY: taken-out ops are live and pinned.
                        unsafe {
                            op.as_ref().clear_waiting();
                            cursor = next_in_list(op);
                        }
                    }
                }
                state.interest_mask = 0;
                state.registered = false;
                (readers, writers)
            };
            entry_ref.fd.store(-1, Ordering::Release);
            // SAFETY: the entry leaves circulation under the exclusive
            // table lock; it joins only the free list.
            unsafe { table.free.push_back(entry) };
            entry_ref.bump_epoch();
            tracing::trace!(slot = token.slot, fd, "descriptor released");
            (ready_readers, ready_writers, fd)
        };

        if fd >= 0 {
            // SAFETY: fd was owned by the entry; interest removal may fail
            // if it was never armed, which is fine.
            unsafe {
                libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, ptr::null_mut());
                libc::close(fd);
            }
        }

        resume_waiters(self, ready_readers);
        resume_waiters(self, ready_writers);
        Ok(())
    }

    /// Applies `mask` to the kernel for `entry`. Must be called with the
    /// entry's state lock held (enforced by the `state` borrow).
    pub(crate) fn update_interest(
        &self,
        entry: &DescriptorEntry,
        state: &mut EntryState,
        mask: u32,
    ) {
        let fd = entry.raw_fd();
        if fd < 0 || mask == state.interest_mask {
            return;
        }
        let mut ev = libc::epoll_event {
            events: mask,
            u64: std::ptr::from_ref(entry) as u64,
        };
        if !state.registered {
            // SAFETY: fd is owned by the entry; ev carries the entry
            // pointer, stable for the context's lifetime.
            if unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut ev) } == 0 {
                state.registered = true;
                state.interest_mask = mask;
            }
            return;
        }
        if mask == 0 {
            // SAFETY: deregistering an armed fd.
            if unsafe {
                libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, ptr::null_mut())
            } == 0
            {
                state.registered = false;
                state.interest_mask = 0;
            }
            return;
        }
        // SAFETY: modifying an armed fd.
        if unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_MOD, fd, &mut ev) } == 0 {
            state.interest_mask = mask;
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        // SAFETY: both fds are owned by the context and unused past drop.
        unsafe {
            libc::close(self.wake_fd);
            libc::close(self.epoll_fd);
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("epoll::Context")
            .field("stop_requested", &self.stop_requested())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_validity() {
        assert!(!DescriptorToken::invalid().is_valid());
        assert!(!DescriptorToken::default().is_valid());
        let token = DescriptorToken { slot: 0, epoch: 1 };
        assert!(token.is_valid());
    }

    #[test]
    fn register_lookup_release() {
        let ctx = Context::new().expect("context");
        // SAFETY: plain pipe syscall for a disposable fd pair.
        let mut fds = [0 as RawFd; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);

        let token = ctx.register_descriptor(fds[0]);
        assert!(token.is_valid());
        assert_eq!(ctx.native_handle(token).unwrap(), fds[0]);
        assert!(ctx.lookup(token).is_some());

        ctx.release_entry(token).expect("release");
        assert!(ctx.lookup(token).is_none());
        assert_eq!(
            ctx.native_handle(token).unwrap_err().raw_os_error(),
            Some(libc::EBADF)
        );
        assert!(ctx.release_entry(token).is_err());

        // SAFETY: write end still ours.
        unsafe { libc::close(fds[1]) };
    }

    #[test]
    fn slot_reuse_bumps_epoch() {
        let ctx = Context::new().expect("context");
        let mut fds = [0 as RawFd; 2];
        // SAFETY: disposable pipe.
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);

        let first = ctx.register_descriptor(fds[0]);
        ctx.release_entry(first).expect("release");

        let second = ctx.register_descriptor(fds[1]);
        assert_eq!(first.slot, second.slot, "slot recycled through free list");
        assert_ne!(first.epoch, second.epoch, "epoch advanced");
        assert!(ctx.lookup(first).is_none());
        assert!(ctx.lookup(second).is_some());
        ctx.release_entry(second).expect("release");
    }

    #[test]
    fn epoch_skips_zero() {
        let entry = DescriptorEntry::new(0);
        entry.epoch.store(u32::MAX, Ordering::Relaxed);
        assert_eq!(entry.bump_epoch(), 1, "wraparound lands on 1, never 0");
    }

    #[test]
    fn stop_is_idempotent() {
        let ctx = Context::new().expect("context");
        assert!(!ctx.stop_requested());
        ctx.request_stop();
        ctx.request_stop();
        assert!(ctx.stop_requested());
        // A stopped context still polls.
        ctx.run_until_empty().expect("drain");
    }

    #[test]
    fn run_some_on_idle_context() {
        let ctx = Context::new().expect("context");
        assert_eq!(ctx.run_some().expect("poll"), 0);
    }

    #[repr(C)]
    struct OrderTask {
        runnable: Runnable,
        slot: usize,
        log: *const parking_lot::Mutex<Vec<usize>>,
    }

    unsafe fn record_order(task: NonNull<Runnable>) {
        let task = task.cast::<OrderTask>();
        let task = task.as_ref();
        (*task.log).lock().push(task.slot);
    }

    #[test]
    fn ready_queue_is_fifo() {
        let ctx = Context::new().expect("context");
        let log = parking_lot::Mutex::new(Vec::new());

        let mut tasks: Vec<OrderTask> = (0..4)
            .map(|slot| OrderTask {
                runnable: Runnable::new(record_order),
                slot,
                log: &log,
            })
            .collect();
        for task in &mut tasks {
            // SAFETY: tasks outlive the drain below and are enqueued once.
            unsafe { ctx.enqueue_task(NonNull::from(&mut task.runnable)) };
        }

        ctx.run_until_empty().expect("drain");
        assert_eq!(*log.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn wake_unblocks_run_one() {
        let ctx = Context::new().expect("context");
        let ctx2 = ctx.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(30));
            ctx2.request_stop();
        });
        let started = std::time::Instant::now();
        // Blocks until the cross-thread wake arrives.
        ctx.run_one().expect("run_one");
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        handle.join().unwrap();
    }
}
