use std::fmt;

use tracing::{debug, instrument, trace};

use crate::client::{parse_count, DatabaseClient, ResultHandle, Row};
use crate::config::CursorOptions;
use crate::error::{CursorError, Result};
use crate::params::Params;

/// Sequential access to a result set, as seen by a pipeline driver.
pub trait Reader {
    /// The row under the cursor, or `None` at end of data.
    fn current(&mut self) -> Result<Option<&Row>>;

    fn advance(&mut self) -> Result<()>;

    /// Zero-based index of the current row; `None` before the first read.
    fn position(&self) -> Option<usize>;

    fn is_valid(&mut self) -> Result<bool>;
}

/// A [`Reader`] that also knows its total row count.
pub trait CountableReader: Reader {
    fn count(&mut self) -> Result<u64>;
}

enum State<H> {
    /// Query known, nothing executed.
    Configured,
    /// Executed, no row fetched yet.
    Executed { handle: H },
    Positioned { handle: H, position: usize, record: Row },
    /// The fetch at `position` found no row.
    Exhausted { handle: H, position: usize },
}

impl<H> State<H> {
    fn handle(&self) -> Option<&H> {
        match self {
            State::Configured => None,
            State::Executed { handle }
            | State::Positioned { handle, .. }
            | State::Exhausted { handle, .. } => Some(handle),
        }
    }

    fn position(&self) -> Option<usize> {
        match self {
            State::Positioned { position, .. } | State::Exhausted { position, .. } => {
                Some(*position)
            }
            State::Configured | State::Executed { .. } => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            State::Configured => "configured",
            State::Executed { .. } => "executed",
            State::Positioned { .. } => "positioned",
            State::Exhausted { .. } => "exhausted",
        }
    }
}

/// Fetch one row from `handle` and place the cursor at `position`.
/// On error the handle is dropped.
fn fetch<H: ResultHandle>(mut handle: H, position: usize) -> Result<State<H>> {
    match handle.fetch_row()? {
        Some(record) => Ok(State::Positioned {
            handle,
            position,
            record,
        }),
        None => {
            trace!(position, "no row");
            Ok(State::Exhausted { handle, position })
        }
    }
}

/// Wrap `sql` in `SELECT COUNT(*)`. A `--` comment in `sql` would swallow
/// the closing parenthesis, so the wrapper then closes on a new line.
fn count_query(sql: &str, alias: &str) -> String {
    let close = if sql.contains("--") { "\n)" } else { ")" };
    format!("SELECT COUNT(*) FROM ({sql}{close} AS {alias}")
}

/// Forward-only cursor over the rows of one parameterized query.
///
/// The query runs on first access, not on construction, and at most once
/// per configuration. One row is held at a time. The row count comes either
/// from a wrapped `SELECT COUNT(*)` query or from the result handle, and is
/// cached until the query or its parameters change.
///
/// The cursor must be anchored by [`current`](Self::current),
/// [`is_valid`](Self::is_valid) or [`initialize`](Self::initialize) before
/// [`advance`](Self::advance) is called; advancing first fails with
/// [`CursorError::NotPositioned`].
///
/// ```ignore
/// let db = MssqlDatabase::connect(&config)?;
/// let mut cursor = QueryCursor::new(
///     db,
///     "SELECT id, name FROM users WHERE active = :active",
///     Params::new().bind("active", true),
/// );
/// println!("{} users", cursor.count()?);
/// for row in cursor.rows() {
///     println!("{:?}", row?);
/// }
/// ```
pub struct QueryCursor<C: DatabaseClient> {
    client: C,
    sql: String,
    params: Params,
    options: CursorOptions,
    state: State<C::Handle>,
    row_count: Option<u64>,
}

impl<C: DatabaseClient> QueryCursor<C> {
    pub fn new(client: C, sql: impl Into<String>, params: Params) -> Self {
        Self {
            client,
            sql: sql.into(),
            params,
            options: CursorOptions::default(),
            state: State::Configured,
            row_count: None,
        }
    }

    /// Like [`new`](Self::new), failing with [`CursorError::Config`] when
    /// `options` do not validate.
    pub fn with_options(
        client: C,
        sql: impl Into<String>,
        params: Params,
        options: CursorOptions,
    ) -> Result<Self> {
        options.validate()?;
        let mut cursor = Self::new(client, sql, params);
        cursor.options = options;
        Ok(cursor)
    }

    /// Replace the query text and parameters. Execution is deferred to the
    /// next access.
    pub fn set_query(&mut self, sql: impl Into<String>, params: Params) {
        self.sql = sql.into();
        self.set_parameters(params);
    }

    /// Replace the parameters, keeping the query text.
    pub fn set_parameters(&mut self, params: Params) {
        self.params = params;
        self.reset();
    }

    /// Choose between the wrapped `COUNT(*)` query (`true`, the default) and
    /// the handle's native row count. Applies to the next uncached count.
    pub fn set_row_count_calculated(&mut self, calculate: bool) {
        self.options.calculate_row_count = calculate;
    }

    pub fn is_row_count_calculated(&self) -> bool {
        self.options.calculate_row_count
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn options(&self) -> &CursorOptions {
        &self.options
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn into_client(self) -> C {
        self.client
    }

    /// Release the open result handle, if any. The next access re-executes.
    pub fn close(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        if self.state.handle().is_some() {
            debug!(state = self.state.name(), "releasing result handle");
        }
        self.state = State::Configured;
        self.row_count = None;
    }

    fn execute(&mut self) -> Result<C::Handle> {
        debug!(sql = %self.sql, params = self.params.len(), "executing cursor query");
        self.client.execute(&self.sql, &self.params)
    }

    /// Execute the query if needed and load the first row at position 0.
    /// No-op once the cursor is positioned.
    pub fn initialize(&mut self) -> Result<()> {
        let handle = match std::mem::replace(&mut self.state, State::Configured) {
            State::Configured => self.execute()?,
            State::Executed { handle } => handle,
            positioned => {
                self.state = positioned;
                return Ok(());
            }
        };

        match fetch(handle, 0) {
            Ok(state) => {
                self.state = state;
                Ok(())
            }
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    pub fn current(&mut self) -> Result<Option<&Row>> {
        self.initialize()?;
        match &self.state {
            State::Positioned { record, .. } => Ok(Some(record)),
            _ => Ok(None),
        }
    }

    /// Move to the next row. Past the end only the position moves.
    pub fn advance(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Configured) {
            State::Positioned {
                handle, position, ..
            } => match fetch(handle, position + 1) {
                Ok(state) => {
                    self.state = state;
                    Ok(())
                }
                Err(e) => {
                    self.reset();
                    Err(e)
                }
            },
            State::Exhausted { handle, position } => {
                self.state = State::Exhausted {
                    handle,
                    position: position + 1,
                };
                Ok(())
            }
            unanchored => {
                self.state = unanchored;
                Err(CursorError::NotPositioned)
            }
        }
    }

    pub fn position(&self) -> Option<usize> {
        self.state.position()
    }

    pub fn is_valid(&mut self) -> Result<bool> {
        self.initialize()?;
        Ok(matches!(self.state, State::Positioned { .. }))
    }

    /// Total rows the query returns. Does not move the cursor.
    ///
    /// The calculated strategy runs the query as a derived table, so the
    /// query must be a single `SELECT` without `ORDER BY` (unless paired with
    /// `TOP`/`OFFSET`) and without a trailing `;`. Line comments are allowed.
    #[instrument(level = "debug", skip_all, fields(calculated = self.options.calculate_row_count))]
    pub fn count(&mut self) -> Result<u64> {
        if let Some(count) = self.row_count {
            return Ok(count);
        }

        let count = if self.options.calculate_row_count {
            self.calculated_count()?
        } else {
            self.native_count()?
        };
        debug!(count, "row count computed");
        self.row_count = Some(count);
        Ok(count)
    }

    fn calculated_count(&mut self) -> Result<u64> {
        let sql = count_query(&self.sql, &self.options.count_alias);
        let value = self.client.execute_scalar(&sql, &self.params)?;
        parse_count(&value)
    }

    fn native_count(&mut self) -> Result<u64> {
        if let Some(handle) = self.state.handle() {
            return handle.native_row_count();
        }
        let handle = self.execute()?;
        let count = handle.native_row_count();
        self.state = State::Executed { handle };
        count
    }

    /// Iterate the remaining rows, starting with the current one.
    pub fn rows(&mut self) -> Rows<'_, C> {
        Rows {
            cursor: self,
            started: false,
            finished: false,
        }
    }
}

impl<C: DatabaseClient> fmt::Debug for QueryCursor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCursor")
            .field("sql", &self.sql)
            .field("params", &self.params.len())
            .field("state", &self.state.name())
            .field("position", &self.state.position())
            .field("row_count", &self.row_count)
            .finish()
    }
}

impl<C: DatabaseClient> Reader for QueryCursor<C> {
    fn current(&mut self) -> Result<Option<&Row>> {
        QueryCursor::current(self)
    }

    fn advance(&mut self) -> Result<()> {
        QueryCursor::advance(self)
    }

    fn position(&self) -> Option<usize> {
        QueryCursor::position(self)
    }

    fn is_valid(&mut self) -> Result<bool> {
        QueryCursor::is_valid(self)
    }
}

impl<C: DatabaseClient> CountableReader for QueryCursor<C> {
    fn count(&mut self) -> Result<u64> {
        QueryCursor::count(self)
    }
}

/// Iterator returned by [`QueryCursor::rows`]. Stops after the last row or
/// after the first error.
pub struct Rows<'a, C: DatabaseClient> {
    cursor: &'a mut QueryCursor<C>,
    started: bool,
    finished: bool,
}

impl<C: DatabaseClient> Iterator for Rows<'_, C> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.started {
            if let Err(e) = self.cursor.advance() {
                self.finished = true;
                return Some(Err(e));
            }
        }
        self.started = true;

        match self.cursor.current() {
            Ok(Some(row)) => Some(Ok(row.clone())),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
