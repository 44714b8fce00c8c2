use mssql_client::{Client, Ready};
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

use crate::client::DatabaseClient;
use crate::config::ConnectionConfig;
use crate::error::{CursorError, Result};
use crate::params::Params;
use crate::query;
use crate::stream::RowCursor;

/// A blocking [`DatabaseClient`] over a single SQL Server connection.
///
/// Each call drives the async driver to completion on a private
/// current-thread runtime, so the calling thread blocks until the server
/// answers.
pub struct MssqlDatabase {
    runtime: Runtime,
    client: Client<Ready>,
}

fn new_runtime() -> Result<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| CursorError::Connection(format!("Could not start runtime: {e}")))
}

impl MssqlDatabase {
    /// Open a bare (non-pooled) connection.
    pub fn connect(config: &ConnectionConfig) -> Result<Self> {
        let client_config = config.to_client_config()?;
        let runtime = new_runtime()?;

        debug!(server = %config.server, port = config.port, "connecting");
        let client = runtime
            .block_on(Client::connect(client_config))
            .map_err(CursorError::from)?;
        debug!("connection established");

        Ok(Self { runtime, client })
    }

    /// Wrap a connection that was opened on `runtime`.
    pub fn from_parts(runtime: Runtime, client: Client<Ready>) -> Self {
        Self { runtime, client }
    }

    pub fn into_inner(self) -> (Runtime, Client<Ready>) {
        (self.runtime, self.client)
    }
}

impl DatabaseClient for MssqlDatabase {
    type Handle = RowCursor;

    fn execute(&mut self, sql: &str, params: &Params) -> Result<RowCursor> {
        let rows = self
            .runtime
            .block_on(query::execute_rows(&mut self.client, sql, params))?;
        Ok(RowCursor::new(rows))
    }

    fn execute_scalar(&mut self, sql: &str, params: &Params) -> Result<serde_json::Value> {
        self.runtime
            .block_on(query::execute_scalar(&mut self.client, sql, params))
    }
}
