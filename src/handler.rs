//! Result sinks.
//!
//! A sink receives every backend message that belongs to one pipelined
//! operation. Callback patterns by request type:
//! - SELECT: `row_description` → `data_row*` → `outcome`
//! - INSERT/UPDATE/DELETE: `outcome` only (with affected row count)
//! - COPY TO: `copy_response` → `copy_data*` → `copy_done` → `outcome`
//! - Describe: `parameter_description` → `row_description` or `no_data`
//!
//! For multi-statement simple queries like `"SELECT 1; UPDATE foo SET x=1"`
//! the pattern repeats per statement and every outcome is recorded.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::backend::{CopyResponse, DataRow};
use crate::protocol::types::{FormatCode, Oid};
use crate::row::{ArrayRow, NamedRow, Outcome, RowShape, decode_array, decode_named};

/// Receiver of the messages addressed to one operation.
pub trait ResultHandler {
    /// Called when a RowDescription arrives for this operation.
    fn row_description(&mut self, shape: &Arc<RowShape>) -> Result<()> {
        let _ = shape;
        Ok(())
    }

    /// Called when the statement returns no rows (NoData).
    fn no_data(&mut self) {}

    /// Called for each data row. `shape` is the best known shape for the row.
    fn data_row(&mut self, shape: Option<&Arc<RowShape>>, row: &DataRow<'_>) -> Result<()>;

    /// Called when a statement completes, is empty, or its portal suspends.
    fn outcome(&mut self, outcome: Outcome);

    /// Called for ParameterDescription.
    fn parameter_description(&mut self, oids: Vec<Oid>) {
        let _ = oids;
    }

    /// Called for CopyInResponse, CopyOutResponse and CopyBothResponse.
    fn copy_response(&mut self, response: CopyResponse) {
        let _ = response;
    }

    /// Called for each CopyData chunk from the server.
    fn copy_data(&mut self, data: &[u8]) -> Result<()> {
        let _ = data;
        Err(Error::Protocol("unexpected CopyData".into()))
    }

    /// Called for CopyDone from the server.
    fn copy_done(&mut self) {}
}

fn last_rows(outcomes: &[Outcome]) -> Option<u64> {
    outcomes.iter().rev().find_map(|o| match o {
        Outcome::Command(tag) => Some(tag.rows),
        _ => None,
    })
}

/// Collects rows keyed by column name.
#[derive(Debug, Clone, Default)]
pub struct ObjectSink {
    rows: Vec<NamedRow>,
    outcomes: Vec<Outcome>,
}

impl ObjectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[NamedRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<NamedRow> {
        self.rows
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    /// Row count of the last completed command.
    pub fn rows_affected(&self) -> Option<u64> {
        last_rows(&self.outcomes)
    }
}

impl ResultHandler for ObjectSink {
    fn data_row(&mut self, shape: Option<&Arc<RowShape>>, row: &DataRow<'_>) -> Result<()> {
        let shape =
            shape.ok_or_else(|| Error::Decode("DataRow arrived before RowDescription".into()))?;
        self.rows.push(decode_named(shape, row)?);
        Ok(())
    }

    fn outcome(&mut self, outcome: Outcome) {
        self.outcomes.push(outcome);
    }
}

/// Collects positional rows.
#[derive(Debug, Clone, Default)]
pub struct ArraySink {
    shape: Option<Arc<RowShape>>,
    rows: Vec<ArrayRow>,
    outcomes: Vec<Outcome>,
}

impl ArraySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shape of the last result set, if the server described one.
    pub fn shape(&self) -> Option<&Arc<RowShape>> {
        self.shape.as_ref()
    }

    pub fn rows(&self) -> &[ArrayRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<ArrayRow> {
        self.rows
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    pub fn rows_affected(&self) -> Option<u64> {
        last_rows(&self.outcomes)
    }
}

impl ResultHandler for ArraySink {
    fn row_description(&mut self, shape: &Arc<RowShape>) -> Result<()> {
        self.shape = Some(Arc::clone(shape));
        Ok(())
    }

    fn data_row(&mut self, shape: Option<&Arc<RowShape>>, row: &DataRow<'_>) -> Result<()> {
        if self.shape.is_none() {
            self.shape = shape.cloned();
        }
        self.rows.push(decode_array(row));
        Ok(())
    }

    fn outcome(&mut self, outcome: Outcome) {
        self.outcomes.push(outcome);
    }
}

/// Collects raw COPY payloads and the COPY format header.
#[derive(Debug, Clone, Default)]
pub struct CopySink {
    format: Option<FormatCode>,
    column_formats: Vec<FormatCode>,
    chunks: Vec<Vec<u8>>,
    completed: bool,
    outcomes: Vec<Outcome>,
}

impl CopySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overall COPY format, once a Copy*Response has been seen.
    pub fn format(&self) -> Option<FormatCode> {
        self.format
    }

    pub fn column_count(&self) -> usize {
        self.column_formats.len()
    }

    pub fn column_formats(&self) -> &[FormatCode] {
        &self.column_formats
    }

    /// CopyData payloads in arrival order.
    pub fn chunks(&self) -> &[Vec<u8>] {
        &self.chunks
    }

    /// All payloads concatenated.
    pub fn data(&self) -> Vec<u8> {
        self.chunks.concat()
    }

    /// True once the server sent CopyDone.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    pub fn rows_affected(&self) -> Option<u64> {
        last_rows(&self.outcomes)
    }
}

impl ResultHandler for CopySink {
    fn data_row(&mut self, _shape: Option<&Arc<RowShape>>, _row: &DataRow<'_>) -> Result<()> {
        Err(Error::Protocol("unexpected DataRow during COPY".into()))
    }

    fn outcome(&mut self, outcome: Outcome) {
        self.outcomes.push(outcome);
    }

    fn copy_response(&mut self, response: CopyResponse) {
        self.format = Some(response.format);
        self.column_formats = response.column_formats;
    }

    fn copy_data(&mut self, data: &[u8]) -> Result<()> {
        self.chunks.push(data.to_vec());
        Ok(())
    }

    fn copy_done(&mut self) {
        self.completed = true;
    }
}

/// Collects the metadata of a prepared statement.
#[derive(Debug, Clone, Default)]
pub struct DescribeSink {
    param_oids: Vec<Oid>,
    shape: Option<Arc<RowShape>>,
}

impl DescribeSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameter types inferred by the server.
    pub fn param_oids(&self) -> &[Oid] {
        &self.param_oids
    }

    /// Result shape; `None` when the statement returns no rows.
    pub fn shape(&self) -> Option<&Arc<RowShape>> {
        self.shape.as_ref()
    }
}

impl ResultHandler for DescribeSink {
    fn row_description(&mut self, shape: &Arc<RowShape>) -> Result<()> {
        self.shape = Some(Arc::clone(shape));
        Ok(())
    }

    fn no_data(&mut self) {
        self.shape = None;
    }

    fn data_row(&mut self, _shape: Option<&Arc<RowShape>>, _row: &DataRow<'_>) -> Result<()> {
        Ok(())
    }

    fn outcome(&mut self, _outcome: Outcome) {}

    fn parameter_description(&mut self, oids: Vec<Oid>) {
        self.param_oids = oids;
    }
}

/// Discards rows and keeps only the outcomes.
#[derive(Debug, Clone, Default)]
pub struct DropSink {
    outcomes: Vec<Outcome>,
}

impl DropSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    /// Row count of the last completed command.
    pub fn rows_affected(&self) -> Option<u64> {
        last_rows(&self.outcomes)
    }
}

impl ResultHandler for DropSink {
    fn data_row(&mut self, _shape: Option<&Arc<RowShape>>, _row: &DataRow<'_>) -> Result<()> {
        Ok(())
    }

    fn outcome(&mut self, outcome: Outcome) {
        self.outcomes.push(outcome);
    }

    fn copy_data(&mut self, _data: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// The sink owned by a queued operation.
#[derive(Debug, Clone)]
pub enum Sink {
    Object(ObjectSink),
    Array(ArraySink),
    Copy(CopySink),
    Describe(DescribeSink),
    Drop(DropSink),
}

impl Sink {
    fn handler(&mut self) -> &mut dyn ResultHandler {
        match self {
            Sink::Object(s) => s,
            Sink::Array(s) => s,
            Sink::Copy(s) => s,
            Sink::Describe(s) => s,
            Sink::Drop(s) => s,
        }
    }

    /// Outcomes recorded so far. Empty for describe sinks.
    pub fn outcomes(&self) -> &[Outcome] {
        match self {
            Sink::Object(s) => s.outcomes(),
            Sink::Array(s) => s.outcomes(),
            Sink::Copy(s) => s.outcomes(),
            Sink::Describe(_) => &[],
            Sink::Drop(s) => s.outcomes(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Sink::Object(_) => "ObjectSink",
            Sink::Array(_) => "ArraySink",
            Sink::Copy(_) => "CopySink",
            Sink::Describe(_) => "DescribeSink",
            Sink::Drop(_) => "DropSink",
        }
    }
}

impl ResultHandler for Sink {
    fn row_description(&mut self, shape: &Arc<RowShape>) -> Result<()> {
        self.handler().row_description(shape)
    }

    fn no_data(&mut self) {
        self.handler().no_data();
    }

    fn data_row(&mut self, shape: Option<&Arc<RowShape>>, row: &DataRow<'_>) -> Result<()> {
        self.handler().data_row(shape, row)
    }

    fn outcome(&mut self, outcome: Outcome) {
        self.handler().outcome(outcome);
    }

    fn parameter_description(&mut self, oids: Vec<Oid>) {
        self.handler().parameter_description(oids);
    }

    fn copy_response(&mut self, response: CopyResponse) {
        self.handler().copy_response(response);
    }

    fn copy_data(&mut self, data: &[u8]) -> Result<()> {
        self.handler().copy_data(data)
    }

    fn copy_done(&mut self) {
        self.handler().copy_done();
    }
}

/// A concrete sink type that can travel through the pipeline as a [`Sink`].
pub trait SinkKind: Sized + Send + 'static {
    fn wrap(self) -> Sink;

    fn from_sink(sink: Sink) -> Result<Self>;
}

impl SinkKind for Sink {
    fn wrap(self) -> Sink {
        self
    }

    fn from_sink(sink: Sink) -> Result<Self> {
        Ok(sink)
    }
}

macro_rules! impl_sink_kind {
    ($($variant:ident => $ty:ty),+ $(,)?) => {
        $(
            impl SinkKind for $ty {
                fn wrap(self) -> Sink {
                    Sink::$variant(self)
                }

                fn from_sink(sink: Sink) -> Result<Self> {
                    match sink {
                        Sink::$variant(s) => Ok(s),
                        other => Err(Error::Protocol(format!(
                            "expected {} but the operation carried {}",
                            stringify!($ty),
                            other.kind()
                        ))),
                    }
                }
            }
        )+
    };
}

impl_sink_kind!(
    Object => ObjectSink,
    Array => ArraySink,
    Copy => CopySink,
    Describe => DescribeSink,
    Drop => DropSink,
);
