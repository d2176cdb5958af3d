//! The capability a transaction manager drives.
//!
//! Exactly two resources implement it: the connection-backed [`DbConnection`],
//! which maps the primitives onto native transaction commands, and the
//! session-backed [`Session`], which materializes its pending writes as part
//! of the physical commit.

use crate::db::{DbConnection, Session};
use crate::error::DbResult;
use crate::models::ResourceKind;
use std::future::Future;

pub trait TransactionResource: Send + Sync + 'static {
    const KIND: ResourceKind;

    /// Datasource name, for diagnostics.
    fn name(&self) -> &str;

    fn begin_underlying(&self) -> impl Future<Output = DbResult<()>> + Send;

    fn commit_underlying(&self) -> impl Future<Output = DbResult<()>> + Send;

    fn rollback_underlying(&self) -> impl Future<Output = DbResult<()>> + Send;
}

impl TransactionResource for DbConnection {
    const KIND: ResourceKind = ResourceKind::Connection;

    fn name(&self) -> &str {
        DbConnection::name(self)
    }

    async fn begin_underlying(&self) -> DbResult<()> {
        self.begin_transaction().await
    }

    async fn commit_underlying(&self) -> DbResult<()> {
        self.commit().await
    }

    async fn rollback_underlying(&self) -> DbResult<()> {
        self.rollback().await
    }
}

impl TransactionResource for Session {
    const KIND: ResourceKind = ResourceKind::Session;

    fn name(&self) -> &str {
        Session::name(self)
    }

    async fn begin_underlying(&self) -> DbResult<()> {
        self.connection().begin_transaction().await
    }

    /// Flush pending writes, then commit. A failed flush skips the commit.
    async fn commit_underlying(&self) -> DbResult<()> {
        self.flush().await?;
        self.connection().commit().await
    }

    /// Discard pending writes, then roll back.
    async fn rollback_underlying(&self) -> DbResult<()> {
        self.clear().await;
        self.connection().rollback().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DataSourceConfig, SessionOptions};
    use crate::db::{ConnectionParams, ResolvedDataSource};
    use crate::error::DbError;
    use crate::models::Statement;
    use std::sync::Arc;

    fn assert_send<T: Send>(value: T) -> T {
        value
    }

    async fn memory_connection() -> Arc<DbConnection> {
        let source = ResolvedDataSource {
            config: DataSourceConfig::new("mem", "sqlite::memory:"),
            params: ConnectionParams::parse("sqlite::memory:"),
        };
        let conn = DbConnection::connect(&source).await.unwrap();
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
            .await
            .unwrap();
        Arc::new(conn)
    }

    #[tokio::test]
    async fn test_connection_primitives_are_send_and_native() {
        let conn = memory_connection().await;

        assert_send(conn.begin_underlying()).await.unwrap();
        conn.execute("INSERT INTO t (id) VALUES (1)", &[]).await.unwrap();
        assert_send(conn.commit_underlying()).await.unwrap();

        assert_send(conn.begin_underlying()).await.unwrap();
        conn.execute("INSERT INTO t (id) VALUES (2)", &[]).await.unwrap();
        assert_send(conn.rollback_underlying()).await.unwrap();

        assert_eq!(conn.fetch_i64("SELECT COUNT(*) FROM t", &[]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_session_primitives_flush_and_discard() {
        let session = Session::new(memory_connection().await, &SessionOptions::default());

        assert_send(session.begin_underlying()).await.unwrap();
        session
            .persist_statement(Statement::new("INSERT INTO t (id) VALUES (1)"))
            .await;
        assert_send(session.commit_underlying()).await.unwrap();

        assert_send(session.begin_underlying()).await.unwrap();
        session
            .persist_statement(Statement::new("INSERT INTO t (id) VALUES (2)"))
            .await;
        assert_send(session.rollback_underlying()).await.unwrap();

        assert_eq!(session.pending_count().await, 0);
        assert_eq!(session.fetch_i64("SELECT COUNT(*) FROM t", &[]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_begin_inside_open_transaction_fails() {
        let conn = memory_connection().await;
        conn.begin_underlying().await.unwrap();
        let err = conn.begin_underlying().await.unwrap_err();
        assert!(matches!(err, DbError::Database { .. }));
        conn.rollback_underlying().await.unwrap();
    }
}
