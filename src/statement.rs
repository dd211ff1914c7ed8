//! Per-connection prepared statement cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::error::Result;
use crate::protocol::frontend::{write_describe_statement, write_parse};
use crate::row::RowShape;

/// A server-side prepared statement created from one SQL text.
#[derive(Debug)]
pub struct ParsedStatement {
    name: String,
    /// Filled once by the RowDescription (or NoData) answering the first Describe.
    pub(crate) shape: OnceLock<Arc<RowShape>>,
    /// Set when the Parse that created the statement was rejected.
    invalid: AtomicBool,
}

impl ParsedStatement {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            shape: OnceLock::new(),
            invalid: AtomicBool::new(false),
        }
    }

    /// Server-side statement name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cached row shape, once described. Empty for statements without rows.
    pub fn shape(&self) -> Option<&Arc<RowShape>> {
        self.shape.get()
    }

    /// True once the server has described the statement.
    pub fn is_described(&self) -> bool {
        self.shape.get().is_some()
    }

    pub(crate) fn mark_invalid(&self) {
        self.invalid.store(true, Ordering::Release);
    }

    /// True when the server rejected the Parse for this statement.
    pub fn is_invalid(&self) -> bool {
        self.invalid.load(Ordering::Acquire)
    }
}

/// Result of a cache lookup.
#[derive(Debug)]
pub struct Prepared {
    pub statement: Arc<ParsedStatement>,
    /// True when Parse + Describe were written for this lookup.
    pub issued_parse: bool,
}

/// Maps SQL text to prepared statements.
///
/// Names come from a per-connection counter starting at `"1"` and are never
/// reused. Entries are not invalidated when the schema changes.
#[derive(Debug, Default)]
pub struct StatementCache {
    by_sql: HashMap<String, Arc<ParsedStatement>>,
    counter: u64,
}

impl StatementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `sql`; on a miss allocate a name and append Parse + Describe to `buf`.
    ///
    /// An entry whose Parse failed is replaced by a fresh statement.
    pub fn prepare(&mut self, sql: &str, buf: &mut Vec<u8>) -> Result<Prepared> {
        if let Some(statement) = self.by_sql.get(sql) {
            if !statement.is_invalid() {
                return Ok(Prepared {
                    statement: Arc::clone(statement),
                    issued_parse: false,
                });
            }
            tracing::debug!(name = statement.name(), "re-parsing rejected statement");
        }

        self.counter += 1;
        let statement = Arc::new(ParsedStatement::new(self.counter.to_string()));
        write_parse(buf, statement.name(), sql, &[])?;
        write_describe_statement(buf, statement.name());
        self.by_sql.insert(sql.to_owned(), Arc::clone(&statement));
        Ok(Prepared {
            statement,
            issued_parse: true,
        })
    }

    pub fn get(&self, sql: &str) -> Option<&Arc<ParsedStatement>> {
        self.by_sql.get(sql)
    }

    /// Drop the entry for `sql`. The name is not reused.
    pub fn remove(&mut self, sql: &str) -> Option<Arc<ParsedStatement>> {
        self.by_sql.remove(sql)
    }

    pub fn len(&self) -> usize {
        self.by_sql.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_sql.is_empty()
    }

    /// Cached `(sql, statement name)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.by_sql
            .iter()
            .map(|(sql, stmt)| (sql.as_str(), stmt.name()))
    }
}
