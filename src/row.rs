//! Row shapes and text row decoding.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::backend::query::{DataRow, RowDescription};
use crate::protocol::types::{FormatCode, Oid};

/// One column of a result set, as announced by RowDescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    /// Table OID (0 if not a table column)
    pub table_oid: Oid,
    /// Column attribute number (0 if not a table column)
    pub column_id: i16,
    pub type_oid: Oid,
    /// Type size (-1 for variable, -2 for null-terminated)
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: FormatCode,
}

/// Ordered column list of a result set.
///
/// Field order is authoritative. Duplicate names are legal; a lookup by name
/// resolves to the last column carrying that name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowShape {
    columns: Vec<Column>,
}

impl RowShape {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Build a shape from a parsed RowDescription.
    pub fn from_description(desc: &RowDescription<'_>) -> Self {
        let columns = desc
            .fields()
            .iter()
            .map(|field| Column {
                name: field.name.to_string(),
                table_oid: field.table_oid(),
                column_id: field.column_id(),
                type_oid: field.type_oid(),
                type_size: field.type_size(),
                type_modifier: field.type_modifier(),
                format: field.format(),
            })
            .collect();
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Index of the last column named `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().rposition(|c| c.name == name)
    }
}

/// Decode one text value. Invalid UTF-8 is replaced rather than rejected.
pub fn decode_text(bytes: &[u8]) -> String {
    match simdutf8::basic::from_utf8(bytes) {
        Ok(s) => s.to_owned(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Positional row: one entry per field, `None` for SQL NULL.
pub type ArrayRow = Vec<Option<String>>;

/// Decode a DataRow positionally. No shape is needed.
pub fn decode_array(row: &DataRow<'_>) -> ArrayRow {
    row.values()
        .iter()
        .map(|value| value.map(decode_text))
        .collect()
}

/// Decode a DataRow against a shape.
///
/// The field count must match the shape exactly; SQL NULL is only ever an
/// explicit -1 length.
pub fn decode_named(shape: &Arc<RowShape>, row: &DataRow<'_>) -> Result<NamedRow> {
    if row.len() != shape.len() {
        return Err(Error::Decode(format!(
            "DataRow has {} fields but the row shape has {}",
            row.len(),
            shape.len()
        )));
    }
    Ok(NamedRow {
        shape: Arc::clone(shape),
        values: decode_array(row),
    })
}

/// A row keyed by column name: a shared shape plus the row's values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedRow {
    shape: Arc<RowShape>,
    values: Vec<Option<String>>,
}

impl NamedRow {
    pub fn shape(&self) -> &Arc<RowShape> {
        &self.shape
    }

    /// Values in column order.
    pub fn values(&self) -> &[Option<String>] {
        &self.values
    }

    /// Value of column `name`. `None` when the column is NULL or absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.shape
            .position(name)
            .and_then(|idx| self.values[idx].as_deref())
    }

    /// Value of column `name`, distinguishing NULL from an unknown column.
    pub fn try_get(&self, name: &str) -> Result<Option<&str>> {
        match self.shape.position(name) {
            Some(idx) => Ok(self.values[idx].as_deref()),
            None => Err(Error::Decode(format!("no column named '{name}'"))),
        }
    }

    /// Value at a column index.
    pub fn get_index(&self, idx: usize) -> Option<&str> {
        self.values.get(idx).and_then(|v| v.as_deref())
    }

    /// `(name, value)` pairs in column order, duplicates included.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.shape
            .columns()
            .iter()
            .zip(&self.values)
            .map(|(col, value)| (col.name.as_str(), value.as_deref()))
    }

    /// Collect into a map. Later duplicate names overwrite earlier ones.
    pub fn into_map(self) -> HashMap<String, Option<String>> {
        self.shape
            .columns()
            .iter()
            .map(|c| c.name.clone())
            .zip(self.values)
            .collect()
    }
}

/// Parsed CommandComplete tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTag {
    /// Command text, e.g. `INSERT`, `SELECT` or `CREATE TABLE`
    pub command: String,
    /// OID field (only INSERT reports one)
    pub oid: Option<Oid>,
    /// Rows affected or returned, 0 when the tag has no count
    pub rows: u64,
}

impl CommandTag {
    /// Parse `"<cmd> <oid> <rows>"`, `"<cmd> <rows>"` or `"<cmd>"`.
    pub fn parse(tag: &str) -> Self {
        let mut words: Vec<&str> = tag.split_whitespace().collect();
        let mut numbers = Vec::with_capacity(2);
        while numbers.len() < 2 && words.len() > 1 {
            match words.last().and_then(|w| w.parse::<u64>().ok()) {
                Some(n) => {
                    numbers.push(n);
                    words.pop();
                }
                None => break,
            }
        }
        let (oid, rows) = match numbers.as_slice() {
            [rows] => (None, *rows),
            [rows, oid] => (Oid::try_from(*oid).ok(), *rows),
            _ => (None, 0),
        };
        Self {
            command: words.join(" "),
            oid,
            rows,
        }
    }
}

/// How one statement of a request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// CommandComplete
    Command(CommandTag),
    /// EmptyQueryResponse
    Empty,
    /// PortalSuspended: the row limit was reached and more rows remain
    Suspended,
}
