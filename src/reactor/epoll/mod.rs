//! epoll backend: readiness-driven reactor over non-blocking syscalls.
//!
//! | Piece | Module |
//! |-------|--------|
//! | context, slot table, drive loop | [`context`] |
//! | operation bases | `operation` |
//! | read/write operations | [`rw`] |
//! | open/close operations | [`open`] |
//! | socket operations | [`socket`] |
//! | schedule sender | [`scheduler`] |
//! | run sender | [`run`] |
//! | descriptor-state values | [`state`] |
//!
//! An operation suspends between arming interest on its descriptor entry
//! and the reactor dispatching a matching readiness event; no user code
//! runs while suspended. Wait queues are FIFO per `(fd, interest)` pair.

pub mod context;
pub(crate) mod operation;
pub mod open;
pub mod run;
pub mod rw;
pub mod scheduler;
pub mod socket;
pub mod state;

pub use context::{Context, DescriptorToken, Interest};
pub use open::{CloseSender, OpenFileSender};
pub use run::RunSender;
pub use rw::{ReadSomeSender, WriteSomeSender};
pub use scheduler::ScheduleSender;
pub use socket::{AcceptSender, AcceptorOpenSender, ConnectSender, SendMsgSender, SocketOpenSender};
pub use state::{AcceptorState, FdState, SocketState};
