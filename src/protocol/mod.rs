//! PostgreSQL v3 wire codec.
//!
//! Encoders append whole frontend messages to a caller-owned `Vec<u8>`;
//! decoders borrow backend message bodies straight from the reassembly
//! buffer. Nothing in here performs I/O.
//!
//! - `frontend`: client to server encoders
//! - `backend`: server to client decoders
//! - `codec`: big-endian primitives and the length-patching message builder
//! - `types`: `Oid`, `FormatCode`, `TransactionStatus`

pub mod backend;
pub mod codec;
pub mod frontend;
pub mod types;

pub use types::{FormatCode, Oid, TransactionStatus};
