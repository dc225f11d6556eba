//! Reactor backends.
//!
//! Two interchangeable event loops with identical operation semantics:
//!
//! | Backend | Kernel interface | Module |
//! |---------|------------------|--------|
//! | epoll | readiness + non-blocking syscalls | [`epoll`] |
//! | io_uring | submission/completion rings | [`uring`] (feature `io-uring`) |
//!
//! A reactor context multiplexes OS events and user-enqueued work onto a
//! single consuming thread. Exactly one thread drives `run*` at a time;
//! work may be enqueued from any thread through the wake channel.

pub mod epoll;
pub(crate) mod seat;

#[cfg(feature = "io-uring")]
pub mod uring;

/// Termination condition for a reactor's run sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Drive until `request_stop` is observed.
    #[default]
    Stopped,
    /// Drive until a non-blocking pass finds no work.
    Drained,
}
