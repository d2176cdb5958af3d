//! Connection-backed resource.
//!
//! A `DbConnection` owns one dedicated database-specific connection
//! (MySqlConnection, PgConnection, SqliteConnection) so that native transaction
//! commands issued through it always hit the same physical session.

use crate::db::config_set::ResolvedDataSource;
use crate::db::dsn::ConnectionParams;
use crate::db::params::bind_params;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParam, Statement};
use sqlx::mysql::MySqlConnectOptions;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{
    Connection, Executor, MySql, MySqlConnection, PgConnection, Postgres, Row, Sqlite,
    SqliteConnection,
};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Database-specific connection.
#[derive(Debug)]
enum RawConnection {
    MySql(MySqlConnection),
    Postgres(PgConnection),
    SQLite(SqliteConnection),
}

/// A single dedicated connection to one backend.
#[derive(Debug)]
pub struct DbConnection {
    name: String,
    db_type: DatabaseType,
    inner: Mutex<RawConnection>,
}

impl DbConnection {
    /// Open a connection for a resolved datasource.
    ///
    /// Runs the datasource's validation query, if any, before returning.
    pub async fn connect(source: &ResolvedDataSource) -> DbResult<Self> {
        let config = &source.config;
        let params = &source.params;
        let db_type = DatabaseType::from_driver(&params.driver).ok_or_else(|| {
            DbError::connection(
                format!("Unsupported driver '{}'", params.driver),
                "Use one of: mysql, pgsql, sqlite",
            )
        })?;

        info!(
            datasource = %config.name,
            db_type = %db_type,
            "Connecting to database"
        );
        debug!(
            datasource = %config.name,
            persistent = config.connection.persistent,
            error_mode = ?config.connection.error_mode,
            columns_case = ?config.connection.columns_case,
            auto_commit = config.connection.auto_commit,
            rows_prefetch = config.connection.rows_prefetch,
            idle_timeout_secs = config.connection.idle_timeout_secs,
            "Connection options"
        );

        let timeout = Duration::from_secs(config.connection.timeout_secs);
        let raw = match db_type {
            DatabaseType::MySQL => {
                let options = mysql_options(params)?;
                let conn = MySqlConnection::connect_with(&options)
                    .await
                    .map_err(|e| connect_error(db_type, &e))?;
                RawConnection::MySql(conn)
            }
            DatabaseType::PostgreSQL => {
                let options = postgres_options(params)?;
                let conn = PgConnection::connect_with(&options)
                    .await
                    .map_err(|e| connect_error(db_type, &e))?;
                RawConnection::Postgres(conn)
            }
            DatabaseType::SQLite => {
                let options = sqlite_options(params)?.busy_timeout(timeout);
                let conn = SqliteConnection::connect_with(&options)
                    .await
                    .map_err(|e| connect_error(db_type, &e))?;
                RawConnection::SQLite(conn)
            }
        };

        let connection = Self {
            name: config.name.clone(),
            db_type,
            inner: Mutex::new(raw),
        };

        if let Some(query) = config.validation_query.as_deref().filter(|q| !q.is_empty()) {
            connection.validate(query).await?;
        }

        let server_version = connection.server_version().await;
        info!(
            datasource = %connection.name,
            server_version = ?server_version,
            "Connected successfully"
        );

        Ok(connection)
    }

    /// Name of the datasource this connection belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    /// Close the connection gracefully.
    pub async fn close(self) -> DbResult<()> {
        match self.inner.into_inner() {
            RawConnection::MySql(conn) => conn.close().await?,
            RawConnection::Postgres(conn) => conn.close().await?,
            RawConnection::SQLite(conn) => conn.close().await?,
        }
        debug!(datasource = %self.name, "Connection closed");
        Ok(())
    }

    /// Issue the native begin command.
    pub async fn begin_transaction(&self) -> DbResult<()> {
        self.raw("BEGIN").await
    }

    /// Issue the native commit command.
    pub async fn commit(&self) -> DbResult<()> {
        self.raw("COMMIT").await
    }

    /// Issue the native rollback command.
    pub async fn rollback(&self) -> DbResult<()> {
        self.raw("ROLLBACK").await
    }

    /// Run a validation query and discard its result.
    pub async fn validate(&self, query: &str) -> DbResult<()> {
        self.raw(query).await.map_err(|e| {
            DbError::connection(
                format!("Validation query failed for '{}': {}", self.name, e),
                "Check the validationQuery of the datasource",
            )
        })
    }

    /// Execute a statement, returning the number of affected rows.
    pub async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let mut guard = self.inner.lock().await;
        let rows_affected = match &mut *guard {
            RawConnection::MySql(conn) => {
                bind_params(sqlx::query::<MySql>(sql), params)
                    .execute(&mut *conn)
                    .await?
                    .rows_affected()
            }
            RawConnection::Postgres(conn) => {
                bind_params(sqlx::query::<Postgres>(sql), params)
                    .execute(&mut *conn)
                    .await?
                    .rows_affected()
            }
            RawConnection::SQLite(conn) => {
                bind_params(sqlx::query::<Sqlite>(sql), params)
                    .execute(&mut *conn)
                    .await?
                    .rows_affected()
            }
        };

        debug!(
            datasource = %self.name,
            sql = %sql,
            rows_affected = rows_affected,
            "Executed statement"
        );

        Ok(rows_affected)
    }

    pub async fn execute_statement(&self, statement: &Statement) -> DbResult<u64> {
        self.execute(&statement.sql, &statement.params).await
    }

    /// Fetch the first column of the first row as an integer.
    ///
    /// The result set is drained so no statement is left holding a read lock.
    pub async fn fetch_i64(&self, sql: &str, params: &[QueryParam]) -> DbResult<i64> {
        let mut guard = self.inner.lock().await;
        let value = match &mut *guard {
            RawConnection::MySql(conn) => {
                bind_params(sqlx::query::<MySql>(sql), params)
                    .fetch_all(&mut *conn)
                    .await?
                    .first()
                    .map(|row| row.try_get::<i64, _>(0))
                    .transpose()?
            }
            RawConnection::Postgres(conn) => {
                bind_params(sqlx::query::<Postgres>(sql), params)
                    .fetch_all(&mut *conn)
                    .await?
                    .first()
                    .map(|row| row.try_get::<i64, _>(0))
                    .transpose()?
            }
            RawConnection::SQLite(conn) => {
                bind_params(sqlx::query::<Sqlite>(sql), params)
                    .fetch_all(&mut *conn)
                    .await?
                    .first()
                    .map(|row| row.try_get::<i64, _>(0))
                    .transpose()?
            }
        };
        value.ok_or_else(|| {
            DbError::database(
                format!("Query returned no rows: {sql}"),
                None,
                "Check that the query selects at least one row",
            )
        })
    }

    /// Execute an unprepared command.
    async fn raw(&self, sql: &str) -> DbResult<()> {
        let mut guard = self.inner.lock().await;
        match &mut *guard {
            RawConnection::MySql(conn) => {
                Executor::execute(&mut *conn, sql).await?;
            }
            RawConnection::Postgres(conn) => {
                Executor::execute(&mut *conn, sql).await?;
            }
            RawConnection::SQLite(conn) => {
                Executor::execute(&mut *conn, sql).await?;
            }
        }
        Ok(())
    }

    /// Get the server version from the connected database.
    async fn server_version(&self) -> Option<String> {
        let mut guard = self.inner.lock().await;
        let result = match &mut *guard {
            RawConnection::MySql(conn) => {
                sqlx::query_scalar::<_, String>("SELECT version()")
                    .fetch_one(&mut *conn)
                    .await
            }
            RawConnection::Postgres(conn) => {
                sqlx::query_scalar::<_, String>("SELECT version()")
                    .fetch_one(&mut *conn)
                    .await
            }
            RawConnection::SQLite(conn) => {
                sqlx::query_scalar::<_, String>("SELECT sqlite_version()")
                    .fetch_one(&mut *conn)
                    .await
            }
        };

        match result {
            Ok(version) => Some(version),
            Err(e) => {
                warn!(datasource = %self.name, error = %e, "Failed to get server version");
                None
            }
        }
    }
}

fn port(params: &ConnectionParams) -> DbResult<Option<u16>> {
    params
        .get_str("port")
        .map(|p| {
            p.parse::<u16>()
                .map_err(|_| DbError::configuration(format!("Invalid port '{p}'")))
        })
        .transpose()
}

fn mysql_options(params: &ConnectionParams) -> DbResult<MySqlConnectOptions> {
    let mut options = MySqlConnectOptions::new();
    if let Some(host) = params.get_str("host") {
        options = options.host(&host);
    }
    if let Some(port) = port(params)? {
        options = options.port(port);
    }
    if let Some(socket) = params.get_str("unix_socket") {
        options = options.socket(socket);
    }
    if let Some(database) = params.get_str("dbname") {
        options = options.database(&database);
    }
    if let Some(user) = params.get_str("user") {
        options = options.username(&user);
    }
    if let Some(password) = params.get_str("password") {
        options = options.password(&password);
    }
    let charset = params
        .get_str("charset")
        .unwrap_or_else(|| "utf8mb4".to_string());
    Ok(options.charset(&charset))
}

fn postgres_options(params: &ConnectionParams) -> DbResult<PgConnectOptions> {
    let mut options = PgConnectOptions::new();
    if let Some(host) = params.get_str("host") {
        options = options.host(&host);
    }
    if let Some(port) = port(params)? {
        options = options.port(port);
    }
    if let Some(database) = params.get_str("dbname") {
        options = options.database(&database);
    }
    if let Some(user) = params.get_str("user") {
        options = options.username(&user);
    }
    if let Some(password) = params.get_str("password") {
        options = options.password(&password);
    }
    if let Some(mode) = params.get_str("sslmode") {
        let mode = PgSslMode::from_str(&mode)
            .map_err(|e| DbError::configuration(format!("Invalid sslmode '{mode}': {e}")))?;
        options = options.ssl_mode(mode);
    }
    if let Some(application_name) = params.get_str("application_name") {
        options = options.application_name(&application_name);
    }
    Ok(options)
}

fn sqlite_options(params: &ConnectionParams) -> DbResult<SqliteConnectOptions> {
    let path = params.get_str("path").ok_or_else(|| {
        DbError::configuration("SQLite requires a database file path: sqlite:/path/to/db.sqlite")
    })?;

    if path == ":memory:" {
        return Ok(SqliteConnectOptions::from_str("sqlite::memory:")?);
    }
    Ok(SqliteConnectOptions::new()
        .filename(&path)
        .create_if_missing(true))
}

fn connect_error(db_type: DatabaseType, error: &sqlx::Error) -> DbError {
    DbError::connection(
        format!("Failed to connect: {}", error),
        connection_suggestion(db_type, error),
    )
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(db_type: DatabaseType, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accessible",
            db_type
        );
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the username and password of the datasource".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    match db_type {
        DatabaseType::PostgreSQL => {
            "Verify the url format: pgsql:host=localhost;port=5432;dbname=app".to_string()
        }
        DatabaseType::MySQL => {
            "Verify the url format: mysql:host=localhost;port=3306;dbname=app".to_string()
        }
        DatabaseType::SQLite => {
            "Verify the file path is accessible: sqlite:/path/to/db.sqlite".to_string()
        }
    }
}
