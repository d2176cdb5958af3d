//! Database abstraction layer.
//!
//! This module provides:
//! - DSN parsing and explicit-option merging
//! - Validated, named datasource configurations
//! - Connection-backed and session-backed resources
//! - The registry that builds and caches them per backend

pub mod config_set;
pub mod connection;
pub mod dsn;
pub mod params;
pub mod registry;
pub mod session;

pub use config_set::{ConfigSet, ResolvedDataSource};
pub use connection::DbConnection;
pub use dsn::ConnectionParams;
pub use registry::{AnyTransactionManager, Artifact, ResourceRegistry};
pub use session::Session;
