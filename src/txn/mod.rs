//! Nestable transaction control.
//!
//! A [`TransactionManager`] drives one [`TransactionResource`] through the
//! begin/commit/rollback protocol, tracking nesting in a [`TransactionStatus`].

pub mod definition;
pub mod manager;
pub mod resource;
pub mod status;

pub use definition::{IsolationLevel, Propagation, TransactionDefinition};
pub use manager::TransactionManager;
pub use resource::TransactionResource;
pub use status::{Savepoint, TransactionObject, TransactionStatus};
