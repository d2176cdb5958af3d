//! Data models for the transaction manager.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{ArtifactKind, DatabaseType, ResourceKind, TransactionState};
pub use query::{QueryParam, Statement};
