//! Protocol engine: routes every backend message to the operation that owns it.
//!
//! The server answers requests in the order they were written, so the head
//! of the [`PipelineQueue`] owns each message until its terminator arrives:
//!
//! | mode           | terminator                                    |
//! |----------------|-----------------------------------------------|
//! | `Startup`      | ReadyForQuery                                 |
//! | `Simple`       | ReadyForQuery                                 |
//! | `Extended`     | ReadyForQuery                                 |
//! | `Bind`         | BindComplete                                  |
//! | `Fetch`        | PortalSuspended, CommandComplete              |
//! | `CopyIn`       | CopyInResponse, then ReadyForQuery            |
//! | `SimpleCopyIn` | CopyInResponse, then ReadyForQuery            |
//! | `Barrier`      | ReadyForQuery                                 |
//!
//! An ErrorResponse fails the head at once. Operations that end with a Sync
//! stay queued as tombstones until their ReadyForQuery. A Sync-less
//! operation is removed immediately; the engine then issues a Sync barrier
//! and fails whatever the server skips until the matching ReadyForQuery.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::handler::{DropSink, ResultHandler, Sink, SinkKind};
use crate::pipeline::{ExecMode, PendingOperation, PipelineQueue, Request};
use crate::protocol::backend::{
    AuthenticationMessage, BackendKeyData, CommandComplete, CopyData, CopyResponse, DataRow,
    ErrorResponse, NegotiateProtocolVersion, NoticeResponse, NotificationResponse,
    ParameterDescription, ParameterStatus, ReadyForQuery, RowDescription, message_name, msg_type,
};
use crate::protocol::frontend::{write_copy_fail, write_sync};
use crate::reassembler::Packet;
use crate::row::{CommandTag, Outcome, RowShape};

use super::action::Action;
use super::connection::{ConnectionState, ConnectionStateMachine};

/// Query-execution state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecState {
    #[default]
    Idle,
    /// A Query message is being answered
    SimpleQueryInFlight,
    /// Extended-protocol messages are being answered; a Sync is pending
    ExtendedQueryAwaitingSync,
    /// The unnamed portal is open and can be fetched from
    ExtendedQueryCursorActive,
    /// A Sync-less operation failed; the server discards input until the next Sync
    Aborted,
}

const COPY_IN_MISUSE: &str = "COPY FROM STDIN must be issued through copy_from";

/// Request carrying a lone Sync whose ReadyForQuery nobody waits for.
pub fn sync_barrier() -> Request {
    let mut buf = Vec::with_capacity(5);
    write_sync(&mut buf);
    Request::new(
        buf,
        PendingOperation::internal(ExecMode::Barrier, DropSink::new().wrap()),
    )
}

/// Apply `f` to the operation's sink unless the operation already failed.
/// A sink error fails the operation; it stays queued until its terminator.
fn feed<F>(op: &mut PendingOperation, f: F)
where
    F: FnOnce(&mut Sink) -> Result<()>,
{
    if op.is_failed() {
        return;
    }
    if let Err(err) = f(&mut op.sink) {
        debug!(%err, "result sink rejected a message");
        op.fail(err);
    }
}

/// Sans-I/O message dispatcher.
///
/// Owns the pipeline queue and the session state. Fed one [`Packet`] at a
/// time by the reader task.
#[derive(Debug)]
pub struct ProtocolEngine {
    connection: ConnectionStateMachine,
    queue: PipelineQueue,
    exec: ExecState,
    /// ErrorResponse that arrived while nothing was queued
    orphan: Option<Error>,
    changed: bool,
}

impl ProtocolEngine {
    pub fn new(connection: ConnectionStateMachine) -> Self {
        Self {
            connection,
            queue: PipelineQueue::new(),
            exec: ExecState::Idle,
            orphan: None,
            changed: false,
        }
    }

    /// Append an operation in write order.
    pub fn enqueue(&mut self, mut op: PendingOperation) {
        if let Some(err) = self.orphan.take() {
            debug!(%err, "delivering held error to the next operation");
            op.fail(err);
        }
        self.queue.push(op);
        self.connection.set_query_in_progress(true);
    }

    pub fn session(&self) -> &ConnectionState {
        self.connection.state()
    }

    /// True once after every session change (ParameterStatus, ReadyForQuery, ...).
    pub fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    pub fn exec_state(&self) -> ExecState {
        self.exec
    }

    /// Number of queued operations.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Fail every queued operation in order. Used when the transport dies.
    pub fn fail_all(&mut self, err: &Error) {
        self.queue.fail_all(err);
        self.orphan = None;
        self.connection.fail();
        self.connection.set_query_in_progress(false);
        self.changed = true;
    }

    /// Route one backend message.
    ///
    /// Errors are fatal for the connection: malformed messages, failed or
    /// unsupported authentication.
    pub fn dispatch(&mut self, packet: Packet<'_>) -> Result<Action> {
        trace!(
            tag = %packet.tag.escape_ascii(),
            len = packet.len,
            message = message_name(packet.tag),
            "packet"
        );
        let tag = packet.tag;
        let payload = packet.payload();

        match tag {
            msg_type::AUTHENTICATION => self.on_authentication(payload),
            msg_type::PARAMETER_STATUS => {
                let param = ParameterStatus::parse(payload)?;
                self.connection.parameter_status(&param.name, &param.value);
                self.changed = true;
                Ok(Action::Continue)
            }
            msg_type::BACKEND_KEY_DATA => {
                let key = BackendKeyData::parse(payload)?;
                self.connection.backend_key(key.bytes);
                self.changed = true;
                Ok(Action::Continue)
            }
            msg_type::READY_FOR_QUERY => self.on_ready_for_query(payload),
            msg_type::ERROR_RESPONSE => self.on_error(payload),
            msg_type::NOTICE_RESPONSE => {
                let notice = NoticeResponse::parse(payload)?;
                warn!(
                    severity = notice.severity(),
                    message = notice.message(),
                    "server notice"
                );
                Ok(Action::Continue)
            }
            msg_type::NOTIFICATION_RESPONSE => {
                let n = NotificationResponse::parse(payload)?;
                warn!(
                    pid = n.pid,
                    channel = %n.channel,
                    payload = %n.payload,
                    "notification ignored"
                );
                Ok(Action::Continue)
            }
            msg_type::NEGOTIATE_PROTOCOL_VERSION => {
                let negotiate = NegotiateProtocolVersion::parse(payload)?;
                warn!(
                    minor = negotiate.newest_minor_version,
                    options = ?negotiate.unrecognized_options,
                    "server negotiated protocol version"
                );
                Ok(Action::Continue)
            }
            msg_type::ROW_DESCRIPTION => {
                let desc = RowDescription::parse(payload)?;
                let shape = Arc::new(RowShape::from_description(&desc));
                if let Some(op) = self.head(tag) {
                    if let Some(stmt) = &op.statement {
                        // already set when the statement was described earlier
                        let _ = stmt.shape.set(Arc::clone(&shape));
                    }
                    op.shape = Some(Arc::clone(&shape));
                    feed(op, |sink| sink.row_description(&shape));
                }
                Ok(Action::Continue)
            }
            msg_type::NO_DATA => {
                if let Some(op) = self.head(tag) {
                    if let Some(stmt) = &op.statement {
                        let _ = stmt.shape.set(Arc::new(RowShape::default()));
                    }
                    feed(op, |sink| {
                        sink.no_data();
                        Ok(())
                    });
                }
                Ok(Action::Continue)
            }
            msg_type::DATA_ROW => {
                let row = DataRow::parse(payload)?;
                if let Some(op) = self.head(tag) {
                    let shape = op.row_shape();
                    feed(op, |sink| sink.data_row(shape.as_ref(), &row));
                }
                Ok(Action::Continue)
            }
            msg_type::COMMAND_COMPLETE => {
                let complete = CommandComplete::parse(payload)?;
                let outcome = Outcome::Command(CommandTag::parse(&complete.tag));
                self.on_statement_end(tag, outcome)
            }
            msg_type::EMPTY_QUERY_RESPONSE => self.on_statement_end(tag, Outcome::Empty),
            msg_type::PORTAL_SUSPENDED => {
                if let Some(op) = self.head(tag) {
                    feed(op, |sink| {
                        sink.outcome(Outcome::Suspended);
                        Ok(())
                    });
                    if op.mode() == ExecMode::Fetch {
                        self.retire_head();
                        self.exec = ExecState::ExtendedQueryCursorActive;
                    }
                }
                Ok(Action::Continue)
            }
            msg_type::PARSE_COMPLETE | msg_type::CLOSE_COMPLETE => {
                self.head(tag);
                Ok(Action::Continue)
            }
            msg_type::BIND_COMPLETE => {
                if let Some(op) = self.head(tag) {
                    if op.mode() == ExecMode::Bind {
                        self.retire_head();
                        self.exec = ExecState::ExtendedQueryCursorActive;
                    }
                }
                Ok(Action::Continue)
            }
            msg_type::PARAMETER_DESCRIPTION => {
                let desc = ParameterDescription::parse(payload)?;
                if let Some(op) = self.head(tag) {
                    feed(op, |sink| {
                        sink.parameter_description(desc.into_oids());
                        Ok(())
                    });
                }
                Ok(Action::Continue)
            }
            msg_type::COPY_IN_RESPONSE => self.on_copy_in(payload),
            msg_type::COPY_OUT_RESPONSE | msg_type::COPY_BOTH_RESPONSE => {
                let response = CopyResponse::parse(payload)?;
                if let Some(op) = self.head(tag) {
                    feed(op, |sink| {
                        sink.copy_response(response);
                        Ok(())
                    });
                }
                Ok(Action::Continue)
            }
            msg_type::COPY_DATA => {
                let data = CopyData::parse(payload)?;
                if let Some(op) = self.head(tag) {
                    feed(op, |sink| sink.copy_data(data.data));
                }
                Ok(Action::Continue)
            }
            msg_type::COPY_DONE => {
                if let Some(op) = self.head(tag) {
                    feed(op, |sink| {
                        sink.copy_done();
                        Ok(())
                    });
                }
                Ok(Action::Continue)
            }
            other => {
                warn!(tag = %other.escape_ascii(), len = packet.len, "unrecognized backend message");
                Ok(Action::Continue)
            }
        }
    }

    /// Head of the queue for a message it owns. Updates the execution state.
    fn head(&mut self, tag: u8) -> Option<&mut PendingOperation> {
        let Some(mode) = self.queue.head().map(PendingOperation::mode) else {
            warn!(message = message_name(tag), "message with no pending operation");
            return None;
        };
        if self.exec != ExecState::Aborted {
            self.exec = match mode {
                ExecMode::Startup => self.exec,
                ExecMode::Simple | ExecMode::SimpleCopyIn => ExecState::SimpleQueryInFlight,
                ExecMode::Fetch => ExecState::ExtendedQueryCursorActive,
                ExecMode::Extended | ExecMode::Bind | ExecMode::CopyIn | ExecMode::Barrier => {
                    ExecState::ExtendedQueryAwaitingSync
                }
            };
        }
        self.queue.head_mut()
    }

    fn retire_head(&mut self) {
        if let Some(op) = self.queue.pop() {
            op.finish();
        }
    }

    fn on_authentication(&mut self, payload: &[u8]) -> Result<Action> {
        let auth = AuthenticationMessage::parse(payload)?;
        if self.queue.head().map(PendingOperation::mode) != Some(ExecMode::Startup) {
            return Err(Error::Protocol(
                "Authentication message outside of startup".into(),
            ));
        }
        match self.connection.handle_authentication(auth)? {
            Some(reply) => Ok(Action::Send(Request::bytes(reply))),
            None => Ok(Action::Continue),
        }
    }

    /// CommandComplete or EmptyQueryResponse.
    fn on_statement_end(&mut self, tag: u8, outcome: Outcome) -> Result<Action> {
        let Some(op) = self.head(tag) else {
            return Ok(Action::Continue);
        };
        feed(op, |sink| {
            sink.outcome(outcome);
            Ok(())
        });
        match op.mode() {
            ExecMode::Fetch => {
                // the portal is exhausted; close the implicit transaction
                self.retire_head();
                self.exec = ExecState::ExtendedQueryAwaitingSync;
                Ok(Action::Send(sync_barrier()))
            }
            ExecMode::CopyIn if !op.is_copy_ready() => {
                op.fail(Error::InvalidUsage(
                    "statement did not start COPY FROM STDIN".into(),
                ));
                self.retire_head();
                self.exec = ExecState::ExtendedQueryAwaitingSync;
                Ok(Action::Send(sync_barrier()))
            }
            _ => Ok(Action::Continue),
        }
    }

    fn on_copy_in(&mut self, payload: &[u8]) -> Result<Action> {
        let response = CopyResponse::parse(payload)?;
        let Some(op) = self.head(msg_type::COPY_IN_RESPONSE) else {
            return Ok(Action::Continue);
        };
        let mode = op.mode();
        feed(op, |sink| {
            sink.copy_response(response);
            Ok(())
        });

        // Nobody will stream data for this operation; refuse the copy.
        let needs_sync = match mode {
            ExecMode::CopyIn | ExecMode::SimpleCopyIn => {
                op.resolve_copy_ready();
                if !op.is_failed() {
                    return Ok(Action::Continue);
                }
                mode == ExecMode::CopyIn
            }
            ExecMode::Extended => true,
            _ => false,
        };
        op.fail(Error::InvalidUsage(COPY_IN_MISUSE.into()));
        let mut buf = Vec::new();
        write_copy_fail(&mut buf, COPY_IN_MISUSE);
        if needs_sync {
            write_sync(&mut buf);
        }
        Ok(Action::Send(Request::bytes(buf)))
    }

    fn on_error(&mut self, payload: &[u8]) -> Result<Action> {
        let err = ErrorResponse::parse(payload)?.into_error();
        let Some(op) = self.queue.head_mut() else {
            warn!(%err, "error response with no pending operation");
            self.orphan = Some(err);
            return Ok(Action::Continue);
        };

        match op.mode() {
            ExecMode::Barrier => warn!(%err, "error response on internal Sync barrier"),
            ExecMode::Startup => {
                debug!(%err, "error response during startup");
                self.connection.fail();
                self.changed = true;
            }
            mode => debug!(%err, ?mode, "error response"),
        }

        if op.ends_at_ready() {
            // tombstone until its ReadyForQuery
            op.fail(err);
            return Ok(Action::Continue);
        }

        if let Some(mut op) = self.queue.pop() {
            op.fail(err);
        }
        self.exec = ExecState::Aborted;
        Ok(Action::Send(sync_barrier()))
    }

    fn on_ready_for_query(&mut self, payload: &[u8]) -> Result<Action> {
        let ready = ReadyForQuery::parse(payload)?;
        let status = ready.transaction_status().ok_or_else(|| {
            Error::Protocol(format!(
                "ReadyForQuery: unknown transaction status 0x{:02x}",
                ready.status
            ))
        })?;

        if self.exec == ExecState::Aborted {
            self.recover();
        } else {
            match self.queue.head() {
                Some(op) if op.ends_at_ready() => self.retire_head(),
                Some(op) => warn!(
                    mode = ?op.mode(),
                    "ReadyForQuery while the head operation has no Sync"
                ),
                None => warn!("ReadyForQuery with no pending operation"),
            }
        }

        self.exec = ExecState::Idle;
        self.connection.ready_for_query(status);
        self.connection
            .set_query_in_progress(!self.queue.is_empty());
        self.changed = true;
        Ok(Action::Continue)
    }

    /// ReadyForQuery after an aborted pipeline: everything up to the first
    /// Sync-bearing operation was skipped by the server.
    fn recover(&mut self) {
        let carries_sync =
            |op: &PendingOperation| matches!(op.mode(), ExecMode::Extended | ExecMode::Barrier);

        while self.queue.head().is_some_and(|op| !carries_sync(op)) {
            if let Some(mut op) = self.queue.pop() {
                debug!(mode = ?op.mode(), "operation skipped after pipeline error");
                op.fail(Error::PipelineAborted);
            }
        }

        match self.queue.pop() {
            Some(op) if op.mode() == ExecMode::Barrier => op.finish(),
            Some(mut op) => op.fail(Error::PipelineAborted),
            None => warn!("ReadyForQuery closed an aborted pipeline with no Sync pending"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{ArraySink, CopySink, ObjectSink};
    use crate::opts::Opts;
    use crate::protocol::types::{FormatCode, TransactionStatus};
    use crate::state::connection::ConnectionPhase;
    use crate::statement::StatementCache;
    use tokio::sync::oneshot;

    type Rx = oneshot::Receiver<Result<Sink>>;

    fn engine(password: Option<&str>) -> ProtocolEngine {
        let opts = Opts {
            user: "postgres".into(),
            database: "db".into(),
            password: password.map(Into::into),
            ..Opts::default()
        };
        ProtocolEngine::new(ConnectionStateMachine::new(&opts).unwrap())
    }

    fn send(engine: &mut ProtocolEngine, tag: u8, body: &[u8]) -> Result<Action> {
        let len = (body.len() + 4) as u32;
        let mut frame = vec![tag];
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(body);
        engine.dispatch(Packet {
            tag,
            len,
            frame: &frame,
        })
    }

    fn ok(engine: &mut ProtocolEngine, tag: u8, body: &[u8]) {
        assert!(send(engine, tag, body).unwrap().is_continue());
    }

    fn row_description(names: &[&str]) -> Vec<u8> {
        let mut out = (names.len() as u16).to_be_bytes().to_vec();
        for name in names {
            out.extend_from_slice(name.as_bytes());
            out.push(0);
            out.extend_from_slice(&0_u32.to_be_bytes());
            out.extend_from_slice(&0_i16.to_be_bytes());
            out.extend_from_slice(&25_u32.to_be_bytes());
            out.extend_from_slice(&(-1_i16).to_be_bytes());
            out.extend_from_slice(&(-1_i32).to_be_bytes());
            out.extend_from_slice(&0_u16.to_be_bytes());
        }
        out
    }

    fn data_row(values: &[&str]) -> Vec<u8> {
        let mut out = (values.len() as u16).to_be_bytes().to_vec();
        for value in values {
            out.extend_from_slice(&(value.len() as i32).to_be_bytes());
            out.extend_from_slice(value.as_bytes());
        }
        out
    }

    fn cstr(s: &str) -> Vec<u8> {
        let mut out = s.as_bytes().to_vec();
        out.push(0);
        out
    }

    fn error_body(code: &str, message: &str) -> Vec<u8> {
        let mut out = b"SERROR\0".to_vec();
        out.push(b'C');
        out.extend(cstr(code));
        out.push(b'M');
        out.extend(cstr(message));
        out.push(0);
        out
    }

    fn op<S: SinkKind>(mode: ExecMode, sink: S) -> (PendingOperation, Rx) {
        PendingOperation::new(mode, sink.wrap())
    }

    fn result<S: SinkKind>(mut rx: Rx) -> Result<S> {
        rx.try_recv().expect("operation not completed").and_then(S::from_sink)
    }

    fn select_one(engine: &mut ProtocolEngine, value: &str) {
        ok(engine, b'T', &row_description(&["v"]));
        ok(engine, b'D', &data_row(&[value]));
        ok(engine, b'C', &cstr("SELECT 1"));
        ok(engine, b'Z', b"I");
    }

    /// Enqueue the barrier an action asks for, as the writer task would.
    fn enqueue_sent(engine: &mut ProtocolEngine, action: Action) -> Vec<u8> {
        match action {
            Action::Send(request) => {
                if let Some(op) = request.op {
                    engine.enqueue(op);
                }
                request.payload
            }
            Action::Continue => panic!("expected a request"),
        }
    }

    #[test]
    fn test_startup_md5() {
        let mut engine = engine(Some("pw"));
        let (startup, rx) = op(ExecMode::Startup, DropSink::new());
        engine.enqueue(startup);

        let mut body = 5_i32.to_be_bytes().to_vec();
        body.extend_from_slice(&[1, 2, 3, 4]);
        let reply = match send(&mut engine, b'R', &body).unwrap() {
            Action::Send(request) => {
                assert!(request.op.is_none());
                request.payload
            }
            Action::Continue => panic!("expected a password reply"),
        };
        assert_eq!(&reply[5..40], b"md549ecef387f96d9f1f78c977dc4c331ae");

        ok(&mut engine, b'R', &0_i32.to_be_bytes());
        ok(&mut engine, b'S', b"server_version\x0016.2\0");
        ok(&mut engine, b'K', &[0, 0, 0, 42, 0, 0, 0, 7]);
        ok(&mut engine, b'Z', b"I");

        result::<DropSink>(rx).unwrap();
        let session = engine.session();
        assert!(session.authenticated);
        assert_eq!(session.phase, ConnectionPhase::Ready);
        assert_eq!(session.server_param("server_version"), Some("16.2"));
        assert_eq!(session.backend_key, vec![0, 0, 0, 42, 0, 0, 0, 7]);
        assert!(!session.query_in_progress);
        assert!(engine.take_changed());
        assert!(!engine.take_changed());
    }

    #[test]
    fn test_startup_password_missing() {
        let mut engine = engine(None);
        let (startup, _rx) = op(ExecMode::Startup, DropSink::new());
        engine.enqueue(startup);
        let result = send(&mut engine, b'R', &3_i32.to_be_bytes());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_startup_unsupported_auth() {
        let mut engine = engine(Some("pw"));
        let (startup, _rx) = op(ExecMode::Startup, DropSink::new());
        engine.enqueue(startup);
        let result = send(&mut engine, b'R', &10_i32.to_be_bytes());
        assert!(matches!(result, Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_startup_error_fails_connect() {
        let mut engine = engine(None);
        let (startup, rx) = op(ExecMode::Startup, DropSink::new());
        engine.enqueue(startup);
        ok(&mut engine, b'E', &error_body("28000", "no pg_hba.conf entry"));
        assert_eq!(
            result::<DropSink>(rx).unwrap_err().sqlstate(),
            Some("28000")
        );
        assert_eq!(engine.session().phase, ConnectionPhase::Failed);
    }

    #[test]
    fn test_pipeline_fifo() {
        let mut engine = engine(None);
        let receivers: Vec<Rx> = (0..3)
            .map(|_| {
                let (op, rx) = op(ExecMode::Extended, ObjectSink::new());
                engine.enqueue(op);
                rx
            })
            .collect();
        assert_eq!(engine.pending(), 3);

        for value in ["a", "b", "c"] {
            select_one(&mut engine, value);
        }
        let values: Vec<String> = receivers
            .into_iter()
            .map(|rx| {
                let sink = result::<ObjectSink>(rx).unwrap();
                sink.rows()[0].get("v").unwrap().to_owned()
            })
            .collect();
        assert_eq!(values, ["a", "b", "c"]);
        assert_eq!(engine.pending(), 0);
        assert_eq!(engine.exec_state(), ExecState::Idle);
    }

    #[test]
    fn test_error_isolation() {
        let mut engine = engine(None);
        let (first, rx1) = op(ExecMode::Extended, ObjectSink::new());
        let (second, rx2) = op(ExecMode::Extended, ObjectSink::new());
        let (third, rx3) = op(ExecMode::Extended, ObjectSink::new());
        engine.enqueue(first);
        engine.enqueue(second);
        engine.enqueue(third);

        select_one(&mut engine, "1");
        ok(&mut engine, b'E', &error_body("42P01", "relation does not exist"));
        assert_eq!(engine.pending(), 2);
        ok(&mut engine, b'Z', b"I");
        select_one(&mut engine, "3");

        assert_eq!(result::<ObjectSink>(rx1).unwrap().rows().len(), 1);
        assert_eq!(
            result::<ObjectSink>(rx2).unwrap_err().sqlstate(),
            Some("42P01")
        );
        assert_eq!(
            result::<ObjectSink>(rx3).unwrap().rows()[0].get("v"),
            Some("3")
        );
    }

    #[test]
    fn test_simple_query_multiple_results() {
        let mut engine = engine(None);
        let (query, rx) = op(ExecMode::Simple, ArraySink::new());
        engine.enqueue(query);
        ok(&mut engine, b'T', &row_description(&["a"]));
        assert_eq!(engine.exec_state(), ExecState::SimpleQueryInFlight);
        ok(&mut engine, b'D', &data_row(&["1"]));
        ok(&mut engine, b'C', &cstr("SELECT 1"));
        ok(&mut engine, b'C', &cstr("UPDATE 4"));
        ok(&mut engine, b'I', b"");
        ok(&mut engine, b'Z', b"T");

        let sink = result::<ArraySink>(rx).unwrap();
        assert_eq!(sink.rows(), &[vec![Some("1".to_string())]]);
        assert_eq!(sink.outcomes().len(), 3);
        assert_eq!(sink.outcomes()[2], Outcome::Empty);
        assert_eq!(sink.rows_affected(), Some(4));
        assert_eq!(
            engine.session().transaction_status,
            TransactionStatus::InTransaction
        );
    }

    #[test]
    fn test_cursor_auto_sync() {
        let mut engine = engine(None);
        let mut cache = StatementCache::new();
        let mut buf = Vec::new();
        let prepared = cache.prepare("SELECT v FROM t", &mut buf).unwrap();

        let (bind, bind_rx) = op(ExecMode::Bind, DropSink::new());
        engine.enqueue(bind.with_statement(&prepared));
        ok(&mut engine, b'1', b"");
        ok(&mut engine, b't', &0_u16.to_be_bytes());
        ok(&mut engine, b'T', &row_description(&["v"]));
        ok(&mut engine, b'2', b"");
        result::<DropSink>(bind_rx).unwrap();
        assert_eq!(engine.exec_state(), ExecState::ExtendedQueryCursorActive);
        assert!(prepared.statement.is_described());

        let (fetch, rx) = op(ExecMode::Fetch, ObjectSink::new());
        engine.enqueue(fetch.with_statement(&prepared));
        ok(&mut engine, b'D', &data_row(&["x"]));
        ok(&mut engine, b's', b"");
        let sink = result::<ObjectSink>(rx).unwrap();
        assert_eq!(sink.rows()[0].get("v"), Some("x"));
        assert_eq!(sink.outcomes(), &[Outcome::Suspended]);
        assert_eq!(engine.exec_state(), ExecState::ExtendedQueryCursorActive);

        let (fetch, rx) = op(ExecMode::Fetch, ObjectSink::new());
        engine.enqueue(fetch.with_statement(&prepared));
        ok(&mut engine, b'D', &data_row(&["y"]));
        let action = send(&mut engine, b'C', &cstr("SELECT 2")).unwrap();
        assert_eq!(enqueue_sent(&mut engine, action), b"S\0\0\0\x04");
        assert_eq!(engine.exec_state(), ExecState::ExtendedQueryAwaitingSync);
        assert_eq!(result::<ObjectSink>(rx).unwrap().rows_affected(), Some(2));

        ok(&mut engine, b'Z', b"I");
        assert_eq!(engine.exec_state(), ExecState::Idle);
        assert_eq!(engine.pending(), 0);
    }

    #[test]
    fn test_sync_less_error_recovery() {
        let mut engine = engine(None);
        let (fetch, fetch_rx) = op(ExecMode::Fetch, ArraySink::new());
        let (simple, simple_rx) = op(ExecMode::Simple, DropSink::new());
        let (extended, extended_rx) = op(ExecMode::Extended, DropSink::new());
        let (after, after_rx) = op(ExecMode::Extended, DropSink::new());
        engine.enqueue(fetch);
        engine.enqueue(simple);
        engine.enqueue(extended);

        let action = send(&mut engine, b'E', &error_body("22012", "division by zero")).unwrap();
        assert_eq!(engine.exec_state(), ExecState::Aborted);
        enqueue_sent(&mut engine, action);
        engine.enqueue(after);
        assert_eq!(
            result::<ArraySink>(fetch_rx).unwrap_err().sqlstate(),
            Some("22012")
        );

        // the Query and the Extended request were discarded; the Extended Sync answers
        ok(&mut engine, b'Z', b"I");
        assert!(matches!(
            result::<DropSink>(simple_rx),
            Err(Error::PipelineAborted)
        ));
        assert!(matches!(
            result::<DropSink>(extended_rx),
            Err(Error::PipelineAborted)
        ));
        assert_eq!(engine.exec_state(), ExecState::Idle);

        // barrier
        ok(&mut engine, b'Z', b"I");
        assert_eq!(engine.pending(), 1);

        ok(&mut engine, b'C', &cstr("INSERT 0 1"));
        ok(&mut engine, b'Z', b"I");
        assert_eq!(result::<DropSink>(after_rx).unwrap().rows_affected(), Some(1));
    }

    #[test]
    fn test_orphan_error_goes_to_next_operation() {
        let mut engine = engine(None);
        ok(&mut engine, b'E', &error_body("57P01", "terminating connection"));
        let (query, rx) = op(ExecMode::Simple, DropSink::new());
        engine.enqueue(query);
        assert_eq!(
            result::<DropSink>(rx).unwrap_err().sqlstate(),
            Some("57P01")
        );
    }

    #[test]
    fn test_decode_error_fails_only_head() {
        let mut engine = engine(None);
        let (bad, bad_rx) = op(ExecMode::Simple, ObjectSink::new());
        let (good, good_rx) = op(ExecMode::Simple, ObjectSink::new());
        engine.enqueue(bad);
        engine.enqueue(good);

        // DataRow with no RowDescription cannot be named
        ok(&mut engine, b'D', &data_row(&["1"]));
        ok(&mut engine, b'C', &cstr("SELECT 1"));
        ok(&mut engine, b'Z', b"I");
        select_one(&mut engine, "2");

        assert!(matches!(
            result::<ObjectSink>(bad_rx),
            Err(Error::Decode(_))
        ));
        assert_eq!(result::<ObjectSink>(good_rx).unwrap().rows().len(), 1);
    }

    #[test]
    fn test_shape_shared_by_later_executions() {
        let mut engine = engine(None);
        let mut cache = StatementCache::new();
        let mut buf = Vec::new();
        let first = cache.prepare("SELECT v", &mut buf).unwrap();
        let second = cache.prepare("SELECT v", &mut buf).unwrap();
        assert!(!second.issued_parse);

        let (op1, rx1) = op(ExecMode::Extended, ObjectSink::new());
        let (op2, rx2) = op(ExecMode::Extended, ObjectSink::new());
        engine.enqueue(op1.with_statement(&first));
        engine.enqueue(op2.with_statement(&second));

        ok(&mut engine, b'1', b"");
        ok(&mut engine, b't', &0_u16.to_be_bytes());
        ok(&mut engine, b'T', &row_description(&["v"]));
        ok(&mut engine, b'2', b"");
        ok(&mut engine, b'D', &data_row(&["a"]));
        ok(&mut engine, b'C', &cstr("SELECT 1"));
        ok(&mut engine, b'Z', b"I");

        // no Describe for the cached statement
        ok(&mut engine, b'2', b"");
        ok(&mut engine, b'D', &data_row(&["b"]));
        ok(&mut engine, b'C', &cstr("SELECT 1"));
        ok(&mut engine, b'Z', b"I");

        assert_eq!(result::<ObjectSink>(rx1).unwrap().rows()[0].get("v"), Some("a"));
        assert_eq!(result::<ObjectSink>(rx2).unwrap().rows()[0].get("v"), Some("b"));
    }

    #[test]
    fn test_copy_in_lifecycle() {
        let mut engine = engine(None);
        let (copy, ready_rx) = op(ExecMode::CopyIn, CopySink::new());
        let (copy, done_rx) = copy.with_copy_done();
        engine.enqueue(copy);

        ok(&mut engine, b'G', &[0, 0, 2, 0, 0, 0, 0]);
        let ready = result::<CopySink>(ready_rx).unwrap();
        assert_eq!(ready.format(), Some(FormatCode::Text));
        assert_eq!(ready.column_count(), 2);
        assert_eq!(engine.pending(), 1);

        ok(&mut engine, b'C', &cstr("COPY 2"));
        ok(&mut engine, b'Z', b"I");
        assert_eq!(result::<CopySink>(done_rx).unwrap().rows_affected(), Some(2));
    }

    #[test]
    fn test_copy_in_on_plain_query_is_refused() {
        let mut engine = engine(None);
        let (query, rx) = op(ExecMode::Simple, DropSink::new());
        engine.enqueue(query);
        let payload = match send(&mut engine, b'G', &[0, 0, 0]).unwrap() {
            Action::Send(request) => request.payload,
            Action::Continue => panic!("expected CopyFail"),
        };
        assert_eq!(payload[0], b'f');
        ok(&mut engine, b'E', &error_body("57014", "COPY from stdin failed"));
        ok(&mut engine, b'Z', b"I");
        assert!(matches!(
            result::<DropSink>(rx),
            Err(Error::InvalidUsage(_))
        ));
    }

    #[test]
    fn test_copy_out() {
        let mut engine = engine(None);
        let (copy, rx) = op(ExecMode::Extended, CopySink::new());
        engine.enqueue(copy);
        ok(&mut engine, b'H', &[0, 0, 1, 0, 0]);
        ok(&mut engine, b'd', b"1\n");
        ok(&mut engine, b'd', b"2\n");
        ok(&mut engine, b'c', b"");
        ok(&mut engine, b'C', &cstr("COPY 2"));
        ok(&mut engine, b'Z', b"I");
        let sink = result::<CopySink>(rx).unwrap();
        assert_eq!(sink.data(), b"1\n2\n");
        assert!(sink.is_completed());
    }

    #[test]
    fn test_unknown_and_async_messages_are_not_fatal() {
        let mut engine = engine(None);
        ok(&mut engine, b'!', b"junk");
        ok(&mut engine, b'N', b"SWARNING\0Mcareful\0\0");
        ok(&mut engine, b'A', b"\0\0\0\x01chan\0payload\0");
        ok(&mut engine, b'S', b"TimeZone\0UTC\0");
        assert_eq!(engine.session().server_param("TimeZone"), Some("UTC"));
    }

    #[test]
    fn test_non_utf8_text_is_not_fatal() {
        let mut engine = engine(None);
        let (query, rx) = op(ExecMode::Simple, ObjectSink::new());
        engine.enqueue(query);

        // LATIN1 column name "café"
        let mut desc = row_description(&["cafX"]);
        let pos = desc.iter().position(|b| *b == b'X').unwrap();
        desc[pos] = 0xe9;
        assert!(send(&mut engine, b'T', &desc).unwrap().is_continue());
        assert!(send(&mut engine, b'A', b"\0\0\0\x01chan\0x\xe9\0").unwrap().is_continue());
        ok(&mut engine, b'S', b"application_name\0caf\xe9\0");
        ok(&mut engine, b'D', &data_row(&["1"]));
        ok(&mut engine, b'C', &cstr("SELECT 1"));
        ok(&mut engine, b'Z', b"I");

        let sink = result::<ObjectSink>(rx).unwrap();
        assert_eq!(sink.rows()[0].get("caf\u{fffd}"), Some("1"));
        assert_eq!(
            engine.session().server_param("application_name"),
            Some("caf\u{fffd}")
        );
        assert_ne!(engine.session().phase, ConnectionPhase::Failed);
    }

    #[test]
    fn test_fail_all() {
        let mut engine = engine(None);
        let (first, rx1) = op(ExecMode::Simple, DropSink::new());
        let (second, rx2) = op(ExecMode::Fetch, DropSink::new());
        engine.enqueue(first);
        engine.enqueue(second);
        engine.fail_all(&Error::ConnectionBroken);
        assert!(matches!(result::<DropSink>(rx1), Err(Error::ConnectionBroken)));
        assert!(matches!(result::<DropSink>(rx2), Err(Error::ConnectionBroken)));
        assert_eq!(engine.pending(), 0);
    }
}
