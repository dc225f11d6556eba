//! Spindrift: a backend-portable asynchronous I/O reactor for Linux.
//!
//! # Overview
//!
//! Spindrift multiplexes OS I/O onto a single consuming thread through one
//! of two interchangeable backends — **epoll** (readiness + non-blocking
//! syscalls) and **io_uring** (kernel-batched submission/completion) —
//! underneath a common set of resource handles whose semantics are
//! identical across backends. Work is described lazily: every operation is
//! a [`exec::Sender`] that does nothing until connected and started, and
//! then delivers exactly one of `set_value`, `set_error`, `set_stopped`.
//!
//! # Core guarantees
//!
//! - **Exactly one terminal signal** per started operation
//! - **Cooperative cancellation**: a stop request is observed at the
//!   operation's next reactor step; completion paths detach the stop
//!   callback first, so cancellation can never fire into a finished
//!   operation
//! - **Forge-proof descriptor handles** (epoll): closing a descriptor
//!   bumps its slot's epoch, and every operation still holding the old
//!   token completes with `EBADF` instead of touching reused state
//! - **Thread-safe producers**: work may be enqueued and stop may be
//!   requested from any thread; the reactor consumes on one
//!
//! # Module structure
//!
//! | Module | Content |
//! |--------|---------|
//! | [`buffer`] | pointer+length byte buffers and spans |
//! | [`intrusive`] | intrusive list/queue/heap for zero-allocation linkage |
//! | [`stop`] | stop tokens and callbacks |
//! | [`exec`] | the lazy-work algebra: senders, receivers, combinators |
//! | [`config`] | context configuration with environment overrides |
//! | [`net`] | protocols and bit-exact endpoints (TCP, UNIX, CAN) |
//! | [`open_options`] | open-mode/creation mapping onto `open(2)` flags |
//! | [`reactor`] | the epoll and io_uring backends |
//! | [`backend`] | the compile-time contract both backends satisfy |
//! | [`handle`] | file/socket/acceptor factories and handle views |
//! | [`seq`] | buffered sequences, reduction, batched reads |
//!
//! # Canonical idiom
//!
//! Compose the work graph, then race it against the reactor's run sender;
//! the first to finish cancels the other:
//!
//! ```ignore
//! use spindrift::backend::{Backend, Epoll};
//! use spindrift::exec::{sync_wait, when_any};
//! use spindrift::reactor::RunMode;
//!
//! let ctx = Epoll::new_context(&Default::default())?;
//! let work = /* sender graph built from handles bound to ctx */;
//! sync_wait(when_any(work, Epoll::run(&ctx, RunMode::Stopped)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

pub mod backend;
pub mod buffer;
pub mod config;
pub mod exec;
pub mod handle;
pub mod intrusive;
pub mod net;
pub mod open_options;
pub mod reactor;
pub mod seq;
pub mod stop;
pub mod test_utils;

pub use backend::{Backend, Epoll};
#[cfg(feature = "io-uring")]
pub use backend::Uring;
pub use buffer::{ConstBuffer, ConstBufferSpan, MutableBuffer, MutableBufferSpan};
pub use config::ContextConfig;
pub use exec::{
    finally, just, let_value, sync_wait, then, when_all, when_any, Outcome, Receiver, Sender,
};
pub use handle::{
    Acceptor, AcceptorHandle, File, FileHandle, SeekableFile, SeekableFileHandle, Socket,
    SocketHandle,
};
pub use net::{Endpoint, EndpointError, Protocol, SocketOptions};
pub use open_options::{Caching, Creation, Mode};
pub use reactor::RunMode;
pub use stop::{StopCallback, StopSource, StopToken};
