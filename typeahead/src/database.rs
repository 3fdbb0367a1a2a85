//! SQLite-backed query provider for customer / address / location fields.
//!
//! The statement receives two parameters: `?1` is an escaped `LIKE` pattern
//! (`%query%`, use `ESCAPE '\'`) and `?2` the row limit. Rows are turned into
//! payloads by a caller-supplied mapper.
//!
//! Uses an r2d2 connection pool; lookups run on the blocking thread pool and a
//! cancelled lookup interrupts the running statement at the SQLite level.

use std::path::Path;

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;

use crate::interface::{QueryProvider, SearchError, SearchResult};

pub type RowMapper<T> = fn(&rusqlite::Row<'_>) -> rusqlite::Result<T>;

pub const DEFAULT_ROW_LIMIT: usize = 200;

pub struct SqliteProvider<T> {
    pool: Pool<SqliteConnectionManager>,
    sql: String,
    row_limit: usize,
    map_row: RowMapper<T>,
}

impl<T> SqliteProvider<T> {
    pub fn new(
        pool: Pool<SqliteConnectionManager>,
        sql: impl Into<String>,
        map_row: RowMapper<T>,
    ) -> Self {
        Self {
            pool,
            sql: sql.into(),
            row_limit: DEFAULT_ROW_LIMIT,
            map_row,
        }
    }

    /// Open a read pool on an existing database file.
    pub fn open<P: AsRef<Path>>(
        path: P,
        sql: impl Into<String>,
        map_row: RowMapper<T>,
    ) -> SearchResult<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
                PRAGMA query_only=ON;
            ",
            )?;
            Ok(())
        });
        let pool = Pool::builder().max_size(4).build(manager)?;
        Ok(Self::new(pool, sql, map_row))
    }

    /// In-memory database for tests and demos. Single connection so the
    /// schema and rows are visible to every lookup.
    pub fn open_in_memory(sql: impl Into<String>, map_row: RowMapper<T>) -> SearchResult<Self> {
        let pool = Pool::builder()
            .max_size(1)
            .build(SqliteConnectionManager::memory())?;
        Ok(Self::new(pool, sql, map_row))
    }

    pub fn with_row_limit(mut self, row_limit: usize) -> Self {
        self.row_limit = row_limit;
        self
    }

    pub fn connection(&self) -> SearchResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }
}

/// `%query%` with `\`, `%` and `_` escaped.
pub fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.trim().chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn is_interrupted(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ffi::ErrorCode::OperationInterrupted
    )
}

fn map_sqlite_error(e: rusqlite::Error) -> SearchError {
    if is_interrupted(&e) {
        SearchError::CancelledDuringFlight
    } else {
        e.into()
    }
}

/// Run the statement with an interrupt watcher tied to `token`.
fn fetch_interruptible<T>(
    pool: &Pool<SqliteConnectionManager>,
    sql: &str,
    pattern: &str,
    row_limit: usize,
    map_row: RowMapper<T>,
    token: &CancellationToken,
    runtime: &tokio::runtime::Handle,
) -> SearchResult<Vec<T>> {
    if token.is_cancelled() {
        return Err(SearchError::CancelledDuringFlight);
    }

    let conn = pool.get()?;
    let interrupt_handle = conn.get_interrupt_handle();

    let token_clone = token.clone();
    let watcher = runtime.spawn(async move {
        token_clone.cancelled().await;
        interrupt_handle.interrupt();
    });
    let _abort_guard = AbortOnDropHandle::new(watcher);

    let mut stmt = conn.prepare_cached(sql).map_err(map_sqlite_error)?;
    let rows = stmt
        .query_map(params![pattern, row_limit as i64], map_row)
        .map_err(map_sqlite_error)?;

    rows.collect::<Result<Vec<T>, _>>().map_err(map_sqlite_error)
}

#[async_trait]
impl<T> QueryProvider<T> for SqliteProvider<T>
where
    T: Send + 'static,
{
    async fn query(&self, query: &str, cancel: &CancellationToken) -> SearchResult<Vec<T>> {
        let pool = self.pool.clone();
        let sql = self.sql.clone();
        let pattern = like_pattern(query);
        let row_limit = self.row_limit;
        let map_row = self.map_row;
        let token = cancel.clone();
        let runtime = tokio::runtime::Handle::current();

        tokio::task::spawn_blocking(move || {
            fetch_interruptible(&pool, &sql, &pattern, row_limit, map_row, &token, &runtime)
        })
        .await?
    }
}
