//! Forward-only, lazily executed, countable cursor over the result of a
//! parameterized query.
//!
//! [`QueryCursor`] runs its query on first access against any
//! [`DatabaseClient`], holds one row at a time and can count the result
//! either with a wrapped `COUNT(*)` query or through the driver.
//! [`MssqlDatabase`] is the SQL Server client.

mod client;
mod config;
mod cursor;
pub mod debug;
mod error;
mod mssql;
mod params;
mod query;
mod stream;

pub use client::{parse_count, DatabaseClient, ResultHandle, Row};
pub use config::{AuthConfig, ConnectionConfig, CursorOptions, DEFAULT_COUNT_ALIAS};
pub use cursor::{CountableReader, QueryCursor, Reader, Rows};
pub use error::{CursorError, Result};
pub use mssql::MssqlDatabase;
pub use params::{rewrite_placeholders, Params, QueryParam};
pub use stream::RowCursor;
