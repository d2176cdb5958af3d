//! DB Transaction Manager Library
//!
//! Nestable transaction control over multiple named database backends
//! (SQLite, PostgreSQL, MySQL). Each backend exposes a connection and a
//! session resource, each driven by its own transaction manager.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod txn;

pub use config::{Config, DataSourceConfig};
pub use db::{AnyTransactionManager, DbConnection, ResourceRegistry, Session};
pub use error::{DbError, DbResult};
pub use txn::{TransactionDefinition, TransactionManager, TransactionResource, TransactionStatus};
