//! COPY FROM STDIN data writer.

use crate::error::{Error, Result};
use crate::handler::CopySink;
use crate::pipeline::Pending;
use crate::protocol::frontend::{write_copy_data, write_copy_done, write_copy_fail, write_sync};
use crate::protocol::types::FormatCode;

use super::Conn;

/// Streams data to a server in COPY IN mode.
///
/// Created by [`Conn::copy_from`] and [`Conn::simple_copy_from`]. Finish with
/// [`finish`](Self::finish) or [`fail`](Self::fail); dropping an unfinished
/// writer aborts the copy.
#[derive(Debug)]
pub struct CopyWriter<'a> {
    conn: &'a mut Conn,
    /// Started with the extended protocol; needs a Sync after CopyDone/CopyFail
    extended: bool,
    ready: CopySink,
    done: Option<Pending<CopySink>>,
}

impl<'a> CopyWriter<'a> {
    pub(crate) fn new(
        conn: &'a mut Conn,
        extended: bool,
        ready: CopySink,
        done: Pending<CopySink>,
    ) -> Self {
        Self {
            conn,
            extended,
            ready,
            done: Some(done),
        }
    }

    /// Overall format the server expects.
    pub fn format(&self) -> Option<FormatCode> {
        self.ready.format()
    }

    /// Per-column formats the server expects.
    pub fn column_formats(&self) -> &[FormatCode] {
        self.ready.column_formats()
    }

    /// Send one chunk of COPY data.
    ///
    /// Waits while more than [`COPY_IN_FLIGHT`](super::COPY_IN_FLIGHT) bytes
    /// are queued but not yet written to the socket.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(data.len() + 5);
        write_copy_data(&mut buf, data);
        self.conn.send_copy_data(buf).await
    }

    /// End the copy and wait for the server's CommandComplete.
    pub async fn finish(mut self) -> Result<CopySink> {
        let mut buf = Vec::new();
        write_copy_done(&mut buf);
        self.end(buf).await
    }

    /// Abort the copy with `reason`.
    ///
    /// The server answers with an error, which is the expected outcome.
    pub async fn fail(mut self, reason: &str) -> Result<()> {
        let mut buf = Vec::new();
        write_copy_fail(&mut buf, reason);
        match self.end(buf).await {
            Ok(_) | Err(Error::Server(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn end(&mut self, mut buf: Vec<u8>) -> Result<CopySink> {
        if self.extended {
            write_sync(&mut buf);
        }
        let done = self.done.take().ok_or(Error::ConnectionBroken)?;
        self.conn.send_bytes(buf)?;
        done.await
    }
}

impl Drop for CopyWriter<'_> {
    fn drop(&mut self) {
        if self.done.take().is_none() {
            return;
        }
        let mut buf = Vec::new();
        write_copy_fail(&mut buf, "COPY writer dropped");
        if self.extended {
            write_sync(&mut buf);
        }
        if self.conn.send_bytes(buf).is_err() {
            tracing::debug!("connection closed before aborting COPY");
        }
    }
}
