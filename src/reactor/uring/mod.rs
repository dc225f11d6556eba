//! io_uring backend: kernel-batched submission/completion reactor.
//!
//! | Piece | Module |
//! |-------|--------|
//! | context, ring, drive loop | [`context`] |
//! | completion bases | `operation` |
//! | close/open/read/write | [`ops`] |
//! | socket operations | [`socket`] |
//! | schedule sender | [`scheduler`] |
//! | run sender | [`run`] |
//! | descriptor-state values | [`state`] |
//!
//! An operation suspends between SQE submission and CQE dispatch. The SQE
//! carries the operation's address as user data; a null user data marks
//! wake `NOP`s and ignored `ASYNC_CANCEL` completions.

pub mod context;
pub(crate) mod operation;
pub mod ops;
pub mod run;
pub mod scheduler;
pub mod socket;
pub mod state;

pub use context::Context;
pub use ops::{CloseSender, OpenFileSender, ReadSomeSender, WriteSomeSender};
pub use run::RunSender;
pub use scheduler::ScheduleSender;
pub use socket::{AcceptSender, AcceptorOpenSender, ConnectSender, SendMsgSender, SocketOpenSender};
pub use state::{AcceptorState, FdState, SocketState};
