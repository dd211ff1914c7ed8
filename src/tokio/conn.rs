//! Asynchronous PostgreSQL connection.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc, watch};

use crate::error::{Error, Result};
use crate::handler::{ArraySink, CopySink, DescribeSink, DropSink, ObjectSink, SinkKind};
use crate::opts::Opts;
use crate::pipeline::{ExecMode, Pending, PendingOperation, Request};
use crate::protocol::frontend::{
    check_param_count, write_bind, write_close_statement, write_describe_statement,
    write_execute, write_flush, write_parse, write_query, write_sync, write_terminate,
};
use crate::protocol::types::TransactionStatus;
use crate::state::{
    ConnectionPhase, ConnectionState, ConnectionStateMachine, ProtocolEngine, SslDecision,
};
use crate::statement::{Prepared, StatementCache};
use crate::types::ToParams;

use super::copy::CopyWriter;
use super::unnamed_portal::UnnamedPortal;
use super::stream::Stream;
use super::task;

/// Upper bound on COPY data bytes queued for the writer task.
pub const COPY_IN_FLIGHT: usize = 1024 * 1024;

/// Asynchronous PostgreSQL connection.
///
/// Requests are pipelined: every request method writes immediately and
/// returns a [`Pending`] future, so many requests can be in flight at once.
/// Results arrive in request order.
///
/// ```no_run
/// # async fn run() -> pgpipeline::Result<()> {
/// let mut conn = pgpipeline::Conn::connect("postgres://postgres@localhost/app").await?;
/// let a = conn.query("SELECT $1::int AS n", &(1,));
/// let b = conn.query("SELECT $1::int AS n", &(2,));
/// assert_eq!(a.await?.rows()[0].get("n"), Some("1"));
/// assert_eq!(b.await?.rows()[0].get("n"), Some("2"));
/// conn.close().await
/// # }
/// ```
#[derive(Debug)]
pub struct Conn {
    requests: mpsc::UnboundedSender<Request>,
    session: watch::Receiver<ConnectionState>,
    cache: StatementCache,
    /// Bytes of COPY data that may wait in the writer queue.
    copy_budget: Arc<Semaphore>,
    host: String,
}

impl Conn {
    /// Connect to a PostgreSQL server.
    pub async fn connect<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts = opts.try_into()?;
        opts.validate()?;
        let stream = Stream::connect(&opts).await?;
        Self::connect_with_stream(stream, opts).await
    }

    /// Run the startup sequence over an already connected transport.
    pub async fn connect_with_stream<S>(mut stream: S, opts: Opts) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut machine = ConnectionStateMachine::new(&opts)?;
        let mut buf = Vec::new();
        if !machine.start(&mut buf) {
            return Self::startup(stream, machine, buf, opts.host).await;
        }

        stream.write_all(&buf).await?;
        stream.flush().await?;
        let answer = stream.read_u8().await?;
        buf.clear();
        match machine.process_ssl_response(answer)? {
            SslDecision::Plaintext => {
                machine.write_startup_message(&mut buf);
                Self::startup(stream, machine, buf, opts.host).await
            }
            SslDecision::Upgrade => {
                #[cfg(feature = "tokio-tls")]
                {
                    let tls = super::stream::upgrade_to_tls(stream, &opts.host).await?;
                    machine.write_startup_message(&mut buf);
                    Self::startup(tls, machine, buf, opts.host).await
                }
                #[cfg(not(feature = "tokio-tls"))]
                {
                    Err(Error::Unsupported(
                        "TLS requested but tokio-tls feature not enabled".into(),
                    ))
                }
            }
        }
    }

    /// Start the background tasks and wait for the first ReadyForQuery.
    async fn startup<T>(
        transport: T,
        machine: ConnectionStateMachine,
        startup_message: Vec<u8>,
        host: String,
    ) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let engine = ProtocolEngine::new(machine);
        let tasks = task::spawn(transport, engine);
        let conn = Self {
            requests: tasks.requests,
            session: tasks.session,
            cache: StatementCache::new(),
            copy_budget: Arc::new(Semaphore::new(COPY_IN_FLIGHT)),
            host,
        };
        let (op, rx) = PendingOperation::new(ExecMode::Startup, DropSink::new().wrap());
        conn.submit(Request::new(startup_message, op));
        Pending::<DropSink>::new(rx).await?;
        tracing::debug!(host = %conn.host, "connection ready");
        Ok(conn)
    }

    /// Hand a request to the writer task. A closed connection fails the
    /// request's operation, which its [`Pending`] reports.
    pub(crate) fn submit(&self, request: Request) {
        if let Err(returned) = self.requests.send(request) {
            if let Some(mut op) = returned.0.op {
                op.fail(Error::ConnectionBroken);
            }
        }
    }

    /// Send bytes that have no response of their own.
    pub(crate) fn send_bytes(&self, payload: Vec<u8>) -> Result<()> {
        self.requests
            .send(Request::bytes(payload))
            .map_err(|_closed| Error::ConnectionBroken)
    }

    /// Queue COPY data, waiting while [`COPY_IN_FLIGHT`] bytes are still unwritten.
    ///
    /// A chunk larger than the whole budget waits for all of it.
    pub(crate) async fn send_copy_data(&self, payload: Vec<u8>) -> Result<()> {
        let wanted = payload.len().min(COPY_IN_FLIGHT);
        let permits = u32::try_from(wanted).map_err(|_overflow| {
            Error::InvalidUsage(format!("COPY chunk of {wanted} bytes is too large"))
        })?;
        let permit = Arc::clone(&self.copy_budget)
            .acquire_many_owned(permits)
            .await
            .map_err(|_closed| Error::ConnectionBroken)?;
        self.requests
            .send(Request::bytes(payload).with_permit(permit))
            .map_err(|_closed| Error::ConnectionBroken)
    }

    pub(crate) fn issue<S: SinkKind>(&self, mode: ExecMode, payload: Vec<u8>, sink: S) -> Pending<S> {
        let (op, rx) = PendingOperation::new(mode, sink.wrap());
        self.submit(Request::new(payload, op));
        Pending::new(rx)
    }

    // === Session ===

    /// Snapshot of the session state.
    pub fn session(&self) -> ConnectionState {
        self.session.borrow().clone()
    }

    /// Latest value of a server parameter (from ParameterStatus).
    pub fn server_param(&self, name: &str) -> Option<String> {
        self.session.borrow().server_param(name).map(str::to_owned)
    }

    /// BackendKeyData bytes (process id + secret), for cancel requests.
    pub fn backend_key(&self) -> Vec<u8> {
        self.session.borrow().backend_key.clone()
    }

    /// Transaction status from the last ReadyForQuery.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.session.borrow().transaction_status
    }

    /// Check if the connection is broken.
    pub fn is_broken(&self) -> bool {
        self.requests.is_closed()
            || self.session.borrow().phase == ConnectionPhase::Failed
    }

    // === Extended Query Protocol ===

    /// Execute `sql` with the extended protocol and collect named rows.
    ///
    /// The statement is parsed and described once per connection; later
    /// calls with the same text reuse it.
    pub fn query<P: ToParams + ?Sized>(&mut self, sql: &str, params: &P) -> Pending<ObjectSink> {
        self.query_with(sql, params, ObjectSink::new())
    }

    /// Execute `sql` and collect positional rows.
    pub fn query_array<P: ToParams + ?Sized>(
        &mut self,
        sql: &str,
        params: &P,
    ) -> Pending<ArraySink> {
        self.query_with(sql, params, ArraySink::new())
    }

    /// Execute `sql` into a caller-chosen sink.
    pub fn query_with<S: SinkKind, P: ToParams + ?Sized>(
        &mut self,
        sql: &str,
        params: &P,
        sink: S,
    ) -> Pending<S> {
        let mut buf = Vec::new();
        let prepared = match self.encode_bind(sql, params, &mut buf) {
            Ok(prepared) => prepared,
            Err(err) => return Pending::failed(err),
        };
        write_execute(&mut buf, "", 0);
        write_sync(&mut buf);

        let (op, rx) = PendingOperation::new(ExecMode::Extended, sink.wrap());
        self.submit(Request::new(buf, op.with_statement(&prepared)));
        Pending::new(rx)
    }

    /// Bind `sql` to the unnamed portal without executing it.
    ///
    /// Rows are then pulled with [`UnnamedPortal::fetch`]. The transaction
    /// stays open until the portal is exhausted or closed.
    pub async fn start_query<P: ToParams + ?Sized>(
        &mut self,
        sql: &str,
        params: &P,
    ) -> Result<UnnamedPortal<'_>> {
        let mut buf = Vec::new();
        let prepared = self.encode_bind(sql, params, &mut buf)?;
        write_flush(&mut buf);

        let (op, rx) = PendingOperation::new(ExecMode::Bind, DropSink::new().wrap());
        self.submit(Request::new(buf, op.with_statement(&prepared)));
        Pending::<DropSink>::new(rx).await?;
        Ok(UnnamedPortal::new(self, prepared.statement))
    }

    /// Parse (first use only) and Bind `sql` to the unnamed portal.
    ///
    /// The parameter count is checked before the cache is touched, so a
    /// rejected call never leaves a statement cached without its Parse.
    fn encode_bind<P: ToParams + ?Sized>(
        &mut self,
        sql: &str,
        params: &P,
        buf: &mut Vec<u8>,
    ) -> Result<Prepared> {
        check_param_count(params)?;
        let prepared = self.cache.prepare(sql, buf)?;
        write_bind(buf, "", prepared.statement.name(), params)?;
        Ok(prepared)
    }

    /// Describe `sql` as a cached prepared statement.
    ///
    /// Returns the parameter types the server inferred and the row shape.
    pub async fn prepare(&mut self, sql: &str) -> Result<DescribeSink> {
        let mut buf = Vec::new();
        let prepared = self.cache.prepare(sql, &mut buf)?;
        if !prepared.issued_parse {
            write_describe_statement(&mut buf, prepared.statement.name());
        }
        write_sync(&mut buf);

        let (op, rx) = PendingOperation::new(ExecMode::Extended, DescribeSink::new().wrap());
        self.submit(Request::new(buf, op.with_statement(&prepared)));
        Pending::new(rx).await
    }

    /// Close the cached statement for `sql` on the server and forget it.
    pub async fn close_statement(&mut self, sql: &str) -> Result<()> {
        let statement = self.cache.remove(sql).ok_or_else(|| {
            Error::InvalidUsage(format!("statement was never prepared: {sql}"))
        })?;
        let mut buf = Vec::new();
        write_close_statement(&mut buf, statement.name());
        write_sync(&mut buf);
        self.issue(ExecMode::Extended, buf, DropSink::new()).await?;
        Ok(())
    }

    /// Cached `(sql, statement name)` pairs.
    pub fn cached_statements(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cache.iter()
    }

    // === Simple Query Protocol ===

    /// Run `sql` (possibly several statements) with the simple protocol.
    pub fn simple_query(&mut self, sql: &str) -> Pending<ObjectSink> {
        self.simple_query_with(sql, ObjectSink::new())
    }

    /// Run `sql` with the simple protocol into a caller-chosen sink.
    pub fn simple_query_with<S: SinkKind>(&mut self, sql: &str, sink: S) -> Pending<S> {
        let mut buf = Vec::new();
        write_query(&mut buf, sql);
        self.issue(ExecMode::Simple, buf, sink)
    }

    // === COPY ===

    /// Run a `COPY ... TO STDOUT` statement and collect its data.
    pub fn copy_to<P: ToParams + ?Sized>(&mut self, sql: &str, params: &P) -> Pending<CopySink> {
        let mut buf = Vec::new();
        if let Err(err) = encode_unnamed(&mut buf, sql, params) {
            return Pending::failed(err);
        }
        write_execute(&mut buf, "", 0);
        write_sync(&mut buf);
        self.issue(ExecMode::Extended, buf, CopySink::new())
    }

    /// Start a `COPY ... FROM STDIN` statement with the extended protocol.
    ///
    /// Resolves once the server is ready to receive data.
    pub async fn copy_from<P: ToParams + ?Sized>(
        &mut self,
        sql: &str,
        params: &P,
    ) -> Result<CopyWriter<'_>> {
        let mut buf = Vec::new();
        encode_unnamed(&mut buf, sql, params)?;
        write_execute(&mut buf, "", 0);
        write_flush(&mut buf);
        self.start_copy(ExecMode::CopyIn, buf).await
    }

    /// Start a `COPY ... FROM STDIN` statement with the simple protocol.
    pub async fn simple_copy_from(&mut self, sql: &str) -> Result<CopyWriter<'_>> {
        let mut buf = Vec::new();
        write_query(&mut buf, sql);
        self.start_copy(ExecMode::SimpleCopyIn, buf).await
    }

    async fn start_copy(&mut self, mode: ExecMode, payload: Vec<u8>) -> Result<CopyWriter<'_>> {
        let (op, ready_rx) = PendingOperation::new(mode, CopySink::new().wrap());
        let (op, done_rx) = op.with_copy_done();
        self.submit(Request::new(payload, op));
        let ready = Pending::<CopySink>::new(ready_rx).await?;
        Ok(CopyWriter::new(
            self,
            mode == ExecMode::CopyIn,
            ready,
            Pending::new(done_rx),
        ))
    }

    // === Flow control ===

    /// Send a lone Sync and wait for its ReadyForQuery.
    pub async fn sync(&mut self) -> Result<()> {
        let mut buf = Vec::new();
        write_sync(&mut buf);
        self.issue(ExecMode::Barrier, buf, DropSink::new()).await?;
        Ok(())
    }

    /// Ask the server to flush its pending output.
    pub fn flush(&mut self) -> Result<()> {
        let mut buf = Vec::new();
        write_flush(&mut buf);
        self.send_bytes(buf)
    }

    /// Close the connection gracefully.
    pub async fn close(self) -> Result<()> {
        let mut buf = Vec::new();
        write_terminate(&mut buf);
        self.send_bytes(buf)
    }
}

/// Unnamed Parse + Bind for statements that are never cached.
fn encode_unnamed<P: ToParams + ?Sized>(buf: &mut Vec<u8>, sql: &str, params: &P) -> Result<()> {
    write_parse(buf, "", sql, &[])?;
    write_bind(buf, "", "", params)
}
