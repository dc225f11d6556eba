//! Lazy sequences over partial transfers.
//!
//! | Item | Purpose |
//! |------|---------|
//! | [`BufferedSequence`] | factory-driven sequence of partial transfers |
//! | [`reduce`] | fold the sequence into a total byte count |
//! | [`all_of`] | await a batch of independent operations |
//!
//! `reduce(BufferedSequence::new(factory, buffers))` is the "transfer
//! all" building block: each element invokes the factory on the
//! still-unconsumed suffix of the buffers, and the fold finishes when all
//! bytes moved, the factory's operation reports 0 (EOF for reads, no room
//! for writes), or an error/stop short-circuits.

mod all;
mod transfer;

pub use all::{all_of, AllOf};
pub use transfer::{reduce, BufferCursor, BufferedSequence, Reduce};
