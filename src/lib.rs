//! A pipelining PostgreSQL client library.
//!
//! # Features
//!
//! - **Pipelining**: every request is written immediately; responses are
//!   matched to requests in order by a single reader task
//! - **Zero-copy parsing**: message payloads are parsed directly from the read buffer
//! - **Sans-I/O state machines**: protocol logic is separated from I/O
//! - **Statement cache**: each SQL text is parsed and described once per connection
//! - **Error isolation**: a failed request never corrupts the requests behind it
//!
//! # Example
//!
//! ```no_run
//! use pgpipeline::{Conn, Opts};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> pgpipeline::Result<()> {
//!     let opts = Opts {
//!         host: "localhost".into(),
//!         user: "postgres".into(),
//!         database: "mydb".into(),
//!         password: Some("secret".into()),
//!         ..Default::default()
//!     };
//!     let mut conn = Conn::connect(opts).await?;
//!
//!     let first = conn.query("SELECT $1::int AS num", &(1,));
//!     let second = conn.simple_query("SELECT 2 AS num");
//!     for row in first.await?.rows() {
//!         println!("num = {:?}", row.get("num"));
//!     }
//!     println!("{:?}", second.await?.rows_affected());
//!
//!     conn.close().await
//! }
//! ```

pub mod error;
pub mod handler;
pub mod opts;
pub mod pipeline;
pub mod protocol;
pub mod reassembler;
pub mod row;
pub mod state;
pub mod statement;
pub mod tokio;
pub mod types;

pub use error::{Error, ErrorFields, Result};
pub use handler::{ArraySink, CopySink, DescribeSink, DropSink, ObjectSink, ResultHandler, SinkKind};
pub use opts::{Opts, SslMode};
pub use pipeline::Pending;
pub use protocol::types::{FormatCode, Oid, TransactionStatus};
pub use reassembler::PacketReassembler;
pub use row::{ArrayRow, Column, CommandTag, NamedRow, Outcome, RowShape};
pub use self::tokio::{COPY_IN_FLIGHT, Conn, CopyWriter, UnnamedPortal};
pub use types::{ToParams, ToWireValue};
