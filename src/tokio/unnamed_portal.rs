//! Unnamed portal for incremental row fetching.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::handler::{ObjectSink, Sink, SinkKind};
use crate::pipeline::{ExecMode, Pending, PendingOperation, Request};
use crate::protocol::frontend::{write_execute, write_flush};
use crate::row::Outcome;
use crate::state::engine::sync_barrier;
use crate::statement::ParsedStatement;

use super::Conn;

/// Handle to the unnamed portal bound by [`Conn::start_query`].
///
/// Each [`fetch`](Self::fetch) pulls up to `max_rows` rows. The implicit
/// transaction ends when the portal runs out of rows, when a fetch fails, or
/// when the portal is closed or dropped.
#[derive(Debug)]
pub struct UnnamedPortal<'a> {
    conn: &'a mut Conn,
    statement: Arc<ParsedStatement>,
    exhausted: bool,
}

impl<'a> UnnamedPortal<'a> {
    pub(crate) fn new(conn: &'a mut Conn, statement: Arc<ParsedStatement>) -> Self {
        Self {
            conn,
            statement,
            exhausted: false,
        }
    }

    /// Fetch up to `max_rows` rows (0 means all remaining) as named rows.
    pub async fn fetch(&mut self, max_rows: u32) -> Result<ObjectSink> {
        self.fetch_with(max_rows, ObjectSink::new()).await
    }

    /// Fetch up to `max_rows` rows into `sink`.
    ///
    /// The sink's last outcome is [`Outcome::Suspended`] while more rows remain.
    pub async fn fetch_with<S: SinkKind>(&mut self, max_rows: u32, sink: S) -> Result<S> {
        if self.exhausted {
            return Err(Error::InvalidUsage("portal is already exhausted".into()));
        }
        let mut buf = Vec::new();
        write_execute(&mut buf, "", max_rows);
        write_flush(&mut buf);

        let (mut op, rx) = PendingOperation::new(ExecMode::Fetch, sink.wrap());
        op.statement = Some(Arc::clone(&self.statement));
        self.conn.submit(Request::new(buf, op));

        match Pending::<Sink>::new(rx).await {
            Ok(sink) => {
                if sink.outcomes().last() != Some(&Outcome::Suspended) {
                    self.exhausted = true;
                }
                S::from_sink(sink)
            }
            Err(err) => {
                // the connection already synced past the failed fetch
                self.exhausted = true;
                Err(err)
            }
        }
    }

    /// True once the portal has no more rows to fetch.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// End the portal's implicit transaction and wait for the server.
    pub async fn close(mut self) -> Result<()> {
        if self.exhausted {
            return Ok(());
        }
        self.exhausted = true;
        self.conn.sync().await
    }
}

impl Drop for UnnamedPortal<'_> {
    fn drop(&mut self) {
        if !self.exhausted {
            self.conn.submit(sync_barrier());
        }
    }
}
