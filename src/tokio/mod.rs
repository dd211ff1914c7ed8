//! Asynchronous PostgreSQL client using Tokio.

mod conn;
mod copy;
mod stream;
mod task;
mod unnamed_portal;

pub use conn::{COPY_IN_FLIGHT, Conn};
pub use copy::CopyWriter;
#[cfg(feature = "tokio-tls")]
pub use stream::upgrade_to_tls;
pub use stream::Stream;
pub use unnamed_portal::UnnamedPortal;
