//! The contract a [`QueryCursor`](crate::QueryCursor) consumes from its data source.

use crate::error::{CursorError, Result};
use crate::params::Params;

/// One fetched row: column name to value, in select-list order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// An open result set, exclusively owned by the cursor that executed it.
///
/// Dropping the handle releases it.
pub trait ResultHandle {
    /// Fetch the next row, or `None` once the result set is exhausted.
    /// Must keep returning `None` when called again after exhaustion.
    fn fetch_row(&mut self) -> Result<Option<Row>>;

    /// Row count as reported by the driver for this result.
    fn native_row_count(&self) -> Result<u64>;
}

/// Executes parameterized queries against a relational data source.
pub trait DatabaseClient {
    type Handle: ResultHandle;

    /// Run `sql` and return a handle over its result rows.
    fn execute(&mut self, sql: &str, params: &Params) -> Result<Self::Handle>;

    /// Run `sql` and return the first column of its first row
    /// (`Value::Null` when there is no row).
    fn execute_scalar(&mut self, sql: &str, params: &Params) -> Result<serde_json::Value>;
}

impl<C: DatabaseClient + ?Sized> DatabaseClient for &mut C {
    type Handle = C::Handle;

    fn execute(&mut self, sql: &str, params: &Params) -> Result<Self::Handle> {
        (**self).execute(sql, params)
    }

    fn execute_scalar(&mut self, sql: &str, params: &Params) -> Result<serde_json::Value> {
        (**self).execute_scalar(sql, params)
    }
}

/// Interpret the scalar returned by a `COUNT(*)` query.
///
/// Drivers may hand back the count as an integer, an integral float or a
/// numeric string (bigint outside the JSON-safe range).
pub fn parse_count(value: &serde_json::Value) -> Result<u64> {
    use serde_json::Value;

    let parsed = match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| CursorError::Count(format!("expected a non-negative integer, got {value}")))
}
