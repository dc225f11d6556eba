//! Resource handles: files, seekable files, sockets, acceptors.
//!
//! A resource is a **factory** bound to a reactor context plus its
//! configuration (path and open options, or protocol and endpoint). Its
//! single `open()` method returns a sender of a handle. Handles are
//! **views** on backend-owned descriptor state: every per-operation method
//! returns a fresh sender, and closing is explicit through the handle's
//! `close()` sender (compose with `finally` to guarantee release on every
//! exit path).
//!
//! ```ignore
//! let ctx = Epoll::new_context(&ContextConfig::from_env())?;
//! let file = SeekableFile::<Epoll>::new(&ctx, "data.bin", Mode::Read, Creation::OpenExisting);
//! let work = let_value(file.open(), |handle| {
//!     finally(
//!         then(handle.read_at(buffers, 0), |n| { /* ... */ }),
//!         handle.close(),
//!     )
//! });
//! sync_wait(when_any(work, Epoll::run(&ctx, RunMode::Stopped)));
//! ```

mod file;
mod net;

pub use file::{File, FileHandle, SeekableFile, SeekableFileHandle};
pub use net::{Acceptor, AcceptorHandle, Socket, SocketHandle};
