//! Sans-I/O state machines for PostgreSQL protocol.
//!
//! These state machines handle the protocol logic without performing any I/O.
//! They produce [`Action`] values that tell the caller what to write next.

pub mod action;
pub mod connection;
pub mod engine;

pub use action::Action;
pub use connection::{
    ConnectionPhase, ConnectionState, ConnectionStateMachine, SslDecision,
};
pub use engine::{ExecState, ProtocolEngine};
