//! Pipeline queue: in-flight operations in the order their requests were written.
//!
//! PostgreSQL answers requests strictly in order and carries no correlation
//! ids, so the head of the queue owns every message until its terminator
//! arrives. Each entry is removed exactly once.

use std::collections::VecDeque;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{OwnedSemaphorePermit, oneshot};

use crate::error::{Error, Result};
use crate::handler::{Sink, SinkKind};
use crate::row::RowShape;
use crate::statement::{ParsedStatement, Prepared};

/// How an operation's response sequence ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Startup and authentication; ends at the first ReadyForQuery
    Startup,
    /// Query message; ends at ReadyForQuery
    Simple,
    /// Bind + Execute + Sync; ends at ReadyForQuery
    Extended,
    /// Bind + Flush opening a portal; ends at BindComplete
    Bind,
    /// Execute with a row limit + Flush; ends at PortalSuspended or CommandComplete
    Fetch,
    /// Extended-protocol COPY FROM STDIN; resolves at CopyInResponse
    CopyIn,
    /// Query-protocol COPY FROM STDIN; resolves at CopyInResponse
    SimpleCopyIn,
    /// Lone Sync; ends at ReadyForQuery
    Barrier,
}

type Completion = oneshot::Sender<Result<Sink>>;

/// One queued operation.
#[derive(Debug)]
pub struct PendingOperation {
    pub(crate) sink: Sink,
    /// Shape used to decode DataRows, set by RowDescription
    pub(crate) shape: Option<Arc<RowShape>>,
    pub(crate) statement: Option<Arc<ParsedStatement>>,
    /// This operation's request carried the statement's Parse
    pub(crate) issued_parse: bool,
    pub(crate) mode: ExecMode,
    completion: Option<Completion>,
    /// Second completion of a COPY FROM STDIN, fired at the end of the copy
    copy_done: Option<Completion>,
    copy_ready: bool,
    failed: bool,
}

impl PendingOperation {
    /// Create an operation and the receiver of its completion.
    pub fn new(mode: ExecMode, sink: Sink) -> (Self, oneshot::Receiver<Result<Sink>>) {
        let (tx, rx) = oneshot::channel();
        let mut op = Self::internal(mode, sink);
        op.completion = Some(tx);
        (op, rx)
    }

    /// Create an operation nobody waits for (internal Sync barriers).
    pub fn internal(mode: ExecMode, sink: Sink) -> Self {
        Self {
            sink,
            shape: None,
            statement: None,
            issued_parse: false,
            mode,
            completion: None,
            copy_done: None,
            copy_ready: false,
            failed: false,
        }
    }

    /// Attach the prepared statement the request executes.
    pub fn with_statement(mut self, prepared: &Prepared) -> Self {
        self.statement = Some(Arc::clone(&prepared.statement));
        self.issued_parse = prepared.issued_parse;
        self
    }

    /// Add the completion fired when a COPY FROM STDIN finishes.
    pub fn with_copy_done(mut self) -> (Self, oneshot::Receiver<Result<Sink>>) {
        let (tx, rx) = oneshot::channel();
        self.copy_done = Some(tx);
        (self, rx)
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    /// True once the operation has been failed; it stays queued until its terminator.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// True once CopyInResponse has been delivered.
    pub fn is_copy_ready(&self) -> bool {
        self.copy_ready
    }

    /// True when the server will send ReadyForQuery for this operation even after an error.
    pub fn ends_at_ready(&self) -> bool {
        match self.mode {
            ExecMode::Startup
            | ExecMode::Simple
            | ExecMode::Extended
            | ExecMode::SimpleCopyIn
            | ExecMode::Barrier => true,
            // after CopyInResponse the copy writer always sends the Sync
            ExecMode::CopyIn => self.copy_ready,
            ExecMode::Bind | ExecMode::Fetch => false,
        }
    }

    /// Row shape for the next DataRow: the operation's own, else the statement's.
    pub(crate) fn row_shape(&self) -> Option<Arc<RowShape>> {
        self.shape.clone().or_else(|| {
            self.statement
                .as_ref()
                .and_then(|stmt| stmt.shape.get().cloned())
        })
    }

    /// Resolve the first completion at CopyInResponse. The operation stays queued.
    pub(crate) fn resolve_copy_ready(&mut self) {
        self.copy_ready = true;
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(Ok(self.sink.clone()));
        }
    }

    /// Fail the operation. Only the first failure is delivered.
    pub fn fail(&mut self, err: Error) {
        if self.failed {
            return;
        }
        self.failed = true;
        if self.issued_parse {
            if let Some(stmt) = &self.statement {
                if !stmt.is_described() {
                    stmt.mark_invalid();
                }
            }
        }
        let tx = self.completion.take().or_else(|| self.copy_done.take());
        if let Some(tx) = tx {
            // the caller may have dropped the future
            let _ = tx.send(Err(err));
        }
    }

    /// Resolve the operation with its sink. No-op for failed operations.
    pub fn finish(mut self) {
        if self.failed {
            return;
        }
        let tx = self.copy_done.take().or_else(|| self.completion.take());
        if let Some(tx) = tx {
            let _ = tx.send(Ok(self.sink));
        }
    }
}

/// Bytes to write plus the operation that will consume the response.
#[derive(Debug)]
pub struct Request {
    pub payload: Vec<u8>,
    pub op: Option<PendingOperation>,
    /// Released once the writer has written the payload.
    pub permit: Option<OwnedSemaphorePermit>,
}

impl Request {
    pub fn new(payload: Vec<u8>, op: PendingOperation) -> Self {
        Self {
            payload,
            op: Some(op),
            permit: None,
        }
    }

    /// Bytes with no response of their own (CopyData, auth replies).
    pub fn bytes(payload: Vec<u8>) -> Self {
        Self {
            payload,
            op: None,
            permit: None,
        }
    }

    /// Hold `permit` until the payload is written.
    pub fn with_permit(mut self, permit: OwnedSemaphorePermit) -> Self {
        self.permit = Some(permit);
        self
    }
}

/// FIFO of in-flight operations.
#[derive(Debug, Default)]
pub struct PipelineQueue {
    ops: VecDeque<PendingOperation>,
}

impl PipelineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: PendingOperation) {
        self.ops.push_back(op);
    }

    pub fn head(&self) -> Option<&PendingOperation> {
        self.ops.front()
    }

    pub fn head_mut(&mut self) -> Option<&mut PendingOperation> {
        self.ops.front_mut()
    }

    pub fn pop(&mut self) -> Option<PendingOperation> {
        self.ops.pop_front()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Fail every queued operation in order and empty the queue.
    pub fn fail_all(&mut self, err: &Error) {
        while let Some(mut op) = self.ops.pop_front() {
            op.fail(err.duplicate());
        }
    }
}

/// Future resolving to the sink of one pipelined operation.
///
/// Resolves to [`Error::ConnectionBroken`] if the connection goes away
/// without answering. Dropping it does not affect the queue.
#[must_use = "the result of a pipelined request is only observable by awaiting it"]
pub struct Pending<S> {
    rx: oneshot::Receiver<Result<Sink>>,
    _kind: PhantomData<fn() -> S>,
}

impl<S> Pending<S> {
    pub(crate) fn new(rx: oneshot::Receiver<Result<Sink>>) -> Self {
        Self {
            rx,
            _kind: PhantomData,
        }
    }

    /// Already resolved to `err`; used when a request cannot be encoded.
    pub(crate) fn failed(err: Error) -> Self {
        let (tx, rx) = oneshot::channel();
        // the receiver is alive, so this cannot fail
        let _sent = tx.send(Err(err));
        Self::new(rx)
    }
}

impl<S> std::fmt::Debug for Pending<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending").finish_non_exhaustive()
    }
}

impl<S: SinkKind> Future for Pending<S> {
    type Output = Result<S>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(Ok(sink))) => Poll::Ready(S::from_sink(sink)),
            Poll::Ready(Ok(Err(err))) => Poll::Ready(Err(err)),
            Poll::Ready(Err(_closed)) => Poll::Ready(Err(Error::ConnectionBroken)),
            Poll::Pending => Poll::Pending,
        }
    }
}
