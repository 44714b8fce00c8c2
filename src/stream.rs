use std::collections::VecDeque;

use tracing::trace;

use crate::client::{ResultHandle, Row};
use crate::error::Result;

/// Result handle over a SQL Server result set.
///
/// mssql-client's QueryStream buffers every row before returning, so the
/// handle holds the converted rows and hands them out one at a time. The
/// buffered total doubles as the native row count.
#[derive(Debug)]
pub struct RowCursor {
    rows: VecDeque<Row>,
    total: u64,
    done: bool,
}

impl RowCursor {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            total: rows.len() as u64,
            rows: VecDeque::from(rows),
            done: false,
        }
    }

    /// Pop the next row, or None if exhausted.
    pub fn next_row(&mut self) -> Option<Row> {
        if self.done {
            return None;
        }
        match self.rows.pop_front() {
            Some(row) => Some(row),
            None => {
                trace!(total = self.total, "result set exhausted");
                self.done = true;
                None
            }
        }
    }

    /// Rows not yet fetched.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl ResultHandle for RowCursor {
    fn fetch_row(&mut self) -> Result<Option<Row>> {
        Ok(self.next_row())
    }

    fn native_row_count(&self) -> Result<u64> {
        Ok(self.total)
    }
}

impl Drop for RowCursor {
    fn drop(&mut self) {
        if !self.rows.is_empty() {
            trace!(discarded = self.rows.len(), "result handle released before exhaustion");
        }
    }
}
