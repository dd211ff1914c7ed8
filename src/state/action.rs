//! Action type returned by the protocol engine.

use crate::pipeline::Request;

/// What the caller must do after feeding the engine one message.
#[derive(Debug)]
pub enum Action {
    /// Nothing to write; keep reading.
    Continue,

    /// Write this request to the server.
    ///
    /// Password replies carry no operation. Sync barriers carry one, which
    /// must be enqueued in write order like any other request.
    Send(Request),
}

impl Action {
    pub fn is_continue(&self) -> bool {
        matches!(self, Action::Continue)
    }
}
