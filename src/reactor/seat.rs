//! Receiver seat shared by both backends' operations.

use crate::exec::Receiver;
use crate::stop::{StopCallback, StopToken};

/// Receiver + stop-callback pair held by a concrete operation until its
/// terminal signal.
pub(crate) struct OpSeat<R> {
    receiver: Option<R>,
    stop_callback: Option<StopCallback>,
}

impl<R: Receiver> OpSeat<R> {
    pub(crate) fn new(receiver: R) -> Self {
        Self {
            receiver: Some(receiver),
            stop_callback: None,
        }
    }

    pub(crate) fn stop_token(&self) -> StopToken {
        self.receiver
            .as_ref()
            .map_or_else(StopToken::never, Receiver::stop_token)
    }

    pub(crate) fn install_callback(&mut self, callback: Option<StopCallback>) {
        self.stop_callback = callback;
    }

    /// Detaches the stop callback and takes the receiver for the terminal
    /// signal. Blocks if the callback is mid-flight on another thread, so
    /// completion can never race cancellation.
    pub(crate) fn take(&mut self) -> R {
        self.stop_callback = None;
        self.receiver.take().expect("operation completed twice")
    }
}
