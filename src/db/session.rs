//! Session-backed resource.
//!
//! A `Session` is a unit of work over a shared [`DbConnection`]: writes are
//! queued with [`Session::persist`] and only reach the database when the
//! session is flushed, which the transaction manager does right before the
//! physical commit.

use crate::config::SessionOptions;
use crate::db::connection::DbConnection;
use crate::error::DbResult;
use crate::models::{QueryParam, Statement};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug)]
pub struct Session {
    connection: Arc<DbConnection>,
    entity_paths: Vec<PathBuf>,
    dev_mode: bool,
    pending: Mutex<Vec<Statement>>,
}

impl Session {
    /// Create a session on top of an existing connection.
    pub fn new(connection: Arc<DbConnection>, options: &SessionOptions) -> Self {
        Self {
            connection,
            entity_paths: options.entity_paths.clone(),
            dev_mode: options.dev_mode,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn connection(&self) -> &Arc<DbConnection> {
        &self.connection
    }

    pub fn name(&self) -> &str {
        self.connection.name()
    }

    pub fn entity_paths(&self) -> &[PathBuf] {
        &self.entity_paths
    }

    pub fn is_dev_mode(&self) -> bool {
        self.dev_mode
    }

    /// Queue a write for the next flush.
    pub async fn persist(&self, sql: impl Into<String>, params: Vec<QueryParam>) {
        self.persist_statement(Statement {
            sql: sql.into(),
            params,
        })
        .await;
    }

    pub async fn persist_statement(&self, statement: Statement) {
        self.pending.lock().await.push(statement);
    }

    /// Number of writes waiting for the next flush.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Execute all queued writes in order and return the total affected rows.
    ///
    /// The queue is emptied up front; a failing statement aborts the flush and
    /// the remaining writes are dropped with it.
    pub async fn flush(&self) -> DbResult<u64> {
        let statements = std::mem::take(&mut *self.pending.lock().await);
        let mut total = 0;
        for statement in &statements {
            if self.dev_mode {
                debug!(
                    datasource = %self.name(),
                    sql = %statement.sql,
                    params = statement.params.len(),
                    "Flushing statement"
                );
            }
            total += self.connection.execute_statement(statement).await?;
        }

        if !statements.is_empty() {
            debug!(
                datasource = %self.name(),
                statements = statements.len(),
                rows_affected = total,
                "Session flushed"
            );
        }
        Ok(total)
    }

    /// Discard all queued writes.
    pub async fn clear(&self) {
        let discarded = std::mem::take(&mut *self.pending.lock().await);
        if !discarded.is_empty() {
            debug!(
                datasource = %self.name(),
                statements = discarded.len(),
                "Discarded pending writes"
            );
        }
    }

    /// Fetch an integer through the session's connection.
    ///
    /// Pending writes are not flushed first.
    pub async fn fetch_i64(&self, sql: &str, params: &[QueryParam]) -> DbResult<i64> {
        self.connection.fetch_i64(sql, params).await
    }
}
