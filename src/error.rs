/// Error types for the query cursor and its database clients.
#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    /// A placeholder in the query text has no matching parameter, or a
    /// parameter value cannot be converted for the driver.
    #[error("Binding error: {0}")]
    Binding(String),

    /// The `COUNT(*)` query did not produce an integer.
    #[error("Row count error: {0}")]
    Count(String),

    /// `advance()` was called before the cursor was anchored on its first row.
    #[error("Cursor advanced before it was positioned on the first row")]
    NotPositioned,

    #[error("Operation cancelled")]
    Cancelled,
}

impl CursorError {
    /// Whether the failure originated from the data source (execute, fetch or
    /// scalar query) rather than from local configuration or call order.
    pub fn is_data_access(&self) -> bool {
        matches!(
            self,
            CursorError::Connection(_)
                | CursorError::Query(_)
                | CursorError::Binding(_)
                | CursorError::Count(_)
                | CursorError::Cancelled
        )
    }
}

impl From<mssql_client::Error> for CursorError {
    fn from(e: mssql_client::Error) -> Self {
        match e {
            mssql_client::Error::Config(msg) => CursorError::Config(msg),
            mssql_client::Error::Connection(msg) => CursorError::Connection(msg),
            mssql_client::Error::ConnectionClosed => {
                CursorError::Connection("Connection closed".into())
            }
            mssql_client::Error::ConnectTimeout
            | mssql_client::Error::ConnectionTimeout
            | mssql_client::Error::TlsTimeout => {
                CursorError::Connection("Connection timeout".into())
            }
            mssql_client::Error::CommandTimeout => CursorError::Query("Command timeout".into()),
            mssql_client::Error::Query(msg) => CursorError::Query(msg),
            mssql_client::Error::Server {
                number,
                message,
                class,
                ..
            } => CursorError::Query(format!(
                "SQL Server error {number} (severity {class}): {message}"
            )),
            mssql_client::Error::Authentication(e) => {
                CursorError::Connection(format!("Authentication error: {e}"))
            }
            mssql_client::Error::Cancelled => CursorError::Cancelled,
            other => CursorError::Query(format!("{other}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, CursorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_access_classification() {
        assert!(CursorError::Query("syntax".into()).is_data_access());
        assert!(CursorError::Count("not a number".into()).is_data_access());
        assert!(CursorError::Binding(":id".into()).is_data_access());
        assert!(!CursorError::Config("bad json".into()).is_data_access());
        assert!(!CursorError::NotPositioned.is_data_access());
    }

    #[test]
    fn driver_errors_map_to_cursor_errors() {
        let err = CursorError::from(mssql_client::Error::CommandTimeout);
        assert!(matches!(err, CursorError::Query(ref m) if m == "Command timeout"));

        let err = CursorError::from(mssql_client::Error::ConnectionClosed);
        assert!(matches!(err, CursorError::Connection(_)));

        let err = CursorError::from(mssql_client::Error::Cancelled);
        assert!(matches!(err, CursorError::Cancelled));
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            CursorError::Count("got \"abc\"".into()).to_string(),
            "Row count error: got \"abc\""
        );
        assert_eq!(CursorError::Cancelled.to_string(), "Operation cancelled");
    }
}
