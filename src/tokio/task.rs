//! Background reader and writer tasks.
//!
//! The writer owns the write half and forwards each request's operation to
//! the reader *before* writing the request's bytes, so the reader always
//! knows about an operation before any response to it can arrive. The
//! reader owns the reassembler and the [`ProtocolEngine`].

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::pipeline::{PendingOperation, Request};
use crate::reassembler::PacketReassembler;
use crate::state::{Action, ConnectionState, ProtocolEngine};

/// Size of one socket read.
const READ_CHUNK: usize = 16 * 1024;

/// Handles the facade keeps to the running tasks.
#[derive(Debug)]
pub(crate) struct Tasks {
    pub requests: UnboundedSender<Request>,
    pub session: watch::Receiver<ConnectionState>,
}

/// Split `transport` and start both tasks.
pub(crate) fn spawn<T>(transport: T, engine: ProtocolEngine) -> Tasks
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(transport);
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (op_tx, op_rx) = mpsc::unbounded_channel();
    let (session_tx, session_rx) = watch::channel(engine.session().clone());

    let writer = request_tx.downgrade();
    tokio::spawn(write_loop(write_half, request_rx, op_tx));
    tokio::spawn(read_loop(read_half, engine, op_rx, writer, session_tx));

    Tasks {
        requests: request_tx,
        session: session_rx,
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut requests: UnboundedReceiver<Request>,
    ops: UnboundedSender<PendingOperation>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(request) = requests.recv().await {
        if let Some(op) = request.op {
            if let Err(returned) = ops.send(op) {
                let mut op = returned.0;
                op.fail(Error::ConnectionBroken);
                break;
            }
        }
        if let Err(err) = writer.write_all(&request.payload).await {
            warn!(%err, "write to server failed");
            break;
        }
        // frees COPY budget held by the request
        drop(request.permit);
        // coalesce pipelined requests into fewer flushes
        if requests.is_empty() {
            if let Err(err) = writer.flush().await {
                warn!(%err, "flush to server failed");
                break;
            }
        }
    }

    requests.close();
    while let Some(request) = requests.recv().await {
        if let Some(mut op) = request.op {
            op.fail(Error::ConnectionBroken);
        }
    }
    if let Err(err) = writer.shutdown().await {
        debug!(%err, "shutdown of write half failed");
    }
    debug!("writer task stopped");
}

async fn read_loop<R>(
    mut reader: R,
    mut engine: ProtocolEngine,
    mut ops: UnboundedReceiver<PendingOperation>,
    writer: WeakUnboundedSender<Request>,
    session: watch::Sender<ConnectionState>,
) where
    R: AsyncRead + Unpin,
{
    let mut reassembler = PacketReassembler::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut ops_open = true;

    let result: Result<()> = loop {
        tokio::select! {
            biased;

            op = ops.recv(), if ops_open => match op {
                Some(op) => engine.enqueue(op),
                None => {
                    ops_open = false;
                    if engine.pending() == 0 {
                        break Ok(());
                    }
                }
            },

            read = reader.read(&mut chunk) => match read {
                Ok(0) if engine.pending() == 0 => break Ok(()),
                Ok(0) => {
                    break Err(Error::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "server closed the connection",
                    )));
                }
                Ok(n) => {
                    // operations written before these bytes are queued first
                    while let Ok(op) = ops.try_recv() {
                        engine.enqueue(op);
                    }
                    let fed = reassembler.feed(&chunk[..n], |packet| {
                        if let Action::Send(request) = engine.dispatch(packet)? {
                            send_internal(&writer, request);
                        }
                        Ok(())
                    });
                    if engine.take_changed() {
                        session.send_replace(engine.session().clone());
                    }
                    if let Err(err) = fed {
                        break Err(err);
                    }
                    if !ops_open && engine.pending() == 0 {
                        break Ok(());
                    }
                }
                Err(err) => break Err(err.into()),
            },
        }
    };

    let err = match result {
        Ok(()) => Error::ConnectionBroken,
        Err(err) => {
            warn!(%err, pending = engine.pending(), "connection failed");
            err
        }
    };
    engine.fail_all(&err);
    ops.close();
    while let Ok(mut op) = ops.try_recv() {
        op.fail(err.duplicate());
    }
    session.send_replace(engine.session().clone());
    debug!("reader task stopped");
}

/// Hand an engine-generated request (password reply, Sync barrier) to the writer.
fn send_internal(writer: &WeakUnboundedSender<Request>, request: Request) {
    let Some(tx) = writer.upgrade() else {
        debug!("connection handle dropped; internal request discarded");
        return;
    };
    if let Err(returned) = tx.send(request) {
        if let Some(mut op) = returned.0.op {
            op.fail(Error::ConnectionBroken);
        }
    }
}
