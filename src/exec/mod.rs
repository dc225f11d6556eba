//! Lazy, composable asynchronous work.
//!
//! The reactor describes every asynchronous step as a [`Sender`]: a lazy
//! value that, once [`connect`](Sender::connect)ed to a [`Receiver`] and
//! [`start`](Operation::start)ed, delivers exactly one terminal signal —
//! `set_value`, `set_error` or `set_stopped`. Nothing happens before
//! `start`; after the terminal signal nothing happens again.
//!
//! # Key pieces
//!
//! | Item | Purpose |
//! |------|---------|
//! | [`Sender`] | lazy description of one asynchronous step |
//! | [`Receiver`] | continuation consuming the terminal signal |
//! | [`Operation`] | connected, pinned, startable state |
//! | [`Outcome`] | materialized terminal signal |
//! | [`just`] | sender of an immediate value |
//! | [`then`] | map the value channel |
//! | [`let_value`] | chain a dependent sender off the value |
//! | [`when_any`] | race two senders, cancelling the loser |
//! | [`when_all`] | join two senders into a value pair |
//! | [`finally`] | run a cleanup sender on every exit path |
//! | [`sync_wait`] | block the calling thread until completion |
//!
//! # Pinning
//!
//! Operations may hand their own address to the reactor (intrusive queue
//! links, SQE user data), so `start` takes `Pin<&mut Self>` and a started
//! operation must stay pinned and alive until its terminal signal has been
//! delivered. [`sync_wait`] and the combinators in this module uphold that
//! contract for everything they connect.
//!
//! # Cancellation
//!
//! A receiver exposes the [`StopToken`] governing its operation. Operations
//! observe the token at start and may register a stop callback; the
//! callback is always deregistered before a terminal signal is delivered.

mod finally;
mod just;
mod let_value;
mod sync_wait;
mod then;
mod when_all;
mod when_any;

pub use finally::{finally, Finally};
pub use just::{just, Just};
pub use let_value::{let_value, LetValue};
pub use sync_wait::sync_wait;
pub use then::{then, Then};
pub use when_all::{when_all, WhenAll};
pub use when_any::{when_any, WhenAny};

use crate::stop::StopToken;
use std::io;
use std::pin::Pin;

/// Continuation of a sender.
///
/// Exactly one of the three completion methods is invoked, consuming the
/// receiver. Receivers are `Send`: a terminal signal may be delivered
/// from the reactor thread.
pub trait Receiver: Send + 'static {
    /// Type delivered on the value channel.
    type Value;

    /// The stop token governing the connected operation.
    fn stop_token(&self) -> StopToken {
        StopToken::never()
    }

    /// Delivers the successful value.
    fn set_value(self, value: Self::Value);

    /// Delivers an error.
    fn set_error(self, error: io::Error);

    /// Signals that the operation was stopped before producing a value.
    fn set_stopped(self);
}

/// A connected sender/receiver pair, ready to start.
///
/// Operations are `Send` so parent combinators may store them regardless
/// of which thread completes them; a started operation is nevertheless
/// pinned and never actually moved.
pub trait Operation: Send + 'static {
    /// Starts the operation. Called at most once.
    ///
    /// The operation must stay pinned and alive until its receiver has
    /// been completed.
    fn start(self: Pin<&mut Self>);
}

/// A lazy description of one asynchronous step.
pub trait Sender {
    /// Type delivered on the value channel.
    type Value;

    /// Operation state produced by [`connect`](Self::connect).
    type Operation<R>: Operation
    where
        R: Receiver<Value = Self::Value>;

    /// Binds this sender to `receiver`, producing an unstarted operation.
    fn connect<R>(self, receiver: R) -> Self::Operation<R>
    where
        R: Receiver<Value = Self::Value>;
}

/// The materialized terminal signal of an operation.
#[derive(Debug)]
pub enum Outcome<T> {
    /// `set_value` was delivered.
    Value(T),
    /// `set_error` was delivered.
    Error(io::Error),
    /// `set_stopped` was delivered.
    Stopped,
}

impl<T> Outcome<T> {
    /// Returns `true` for [`Outcome::Value`].
    #[must_use]
    pub const fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    /// Returns `true` for [`Outcome::Stopped`].
    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Returns the value, if any.
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the value or panics with the outcome's description.
    ///
    /// # Panics
    ///
    /// Panics on [`Outcome::Error`] and [`Outcome::Stopped`].
    #[track_caller]
    pub fn expect_value(self, context: &str) -> T {
        match self {
            Self::Value(v) => v,
            Self::Error(e) => panic!("{context}: completed with error: {e}"),
            Self::Stopped => panic!("{context}: completed stopped"),
        }
    }

    /// Maps the value channel.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Value(v) => Outcome::Value(f(v)),
            Self::Error(e) => Outcome::Error(e),
            Self::Stopped => Outcome::Stopped,
        }
    }

    /// Delivers this outcome into `receiver`.
    pub fn send_to<R: Receiver<Value = T>>(self, receiver: R) {
        match self {
            Self::Value(v) => receiver.set_value(v),
            Self::Error(e) => receiver.set_error(e),
            Self::Stopped => receiver.set_stopped(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_accessors() {
        let v: Outcome<u32> = Outcome::Value(7);
        assert!(v.is_value());
        assert_eq!(v.into_value(), Some(7));

        let s: Outcome<u32> = Outcome::Stopped;
        assert!(s.is_stopped());
        assert!(s.into_value().is_none());

        let e: Outcome<u32> = Outcome::Error(io::Error::from_raw_os_error(libc::EBADF));
        assert!(!e.is_value());
        assert!(e.into_value().is_none());
    }

    #[test]
    fn outcome_map() {
        let v: Outcome<u32> = Outcome::Value(21);
        assert_eq!(v.map(|n| n * 2).into_value(), Some(42));
        assert!(Outcome::<u32>::Stopped.map(|n| n * 2).is_stopped());
    }
}
