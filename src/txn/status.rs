//! Per-attempt transaction state.
//!
//! A `TransactionStatus` is created for one logical transaction and shared,
//! by mutable reference, by every nested scope of the call chain that runs
//! inside it. It is not synchronized; concurrent use from independent tasks
//! is out of contract.

use crate::models::TransactionState;
use crate::txn::definition::IsolationLevel;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Intra-transaction rollback checkpoint. No manager in this crate creates one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    pub name: String,
}

/// Nesting and bookkeeping state bound to one resource.
#[derive(Debug)]
pub struct TransactionObject<R> {
    resource: Arc<R>,
    depth: usize,
    state: TransactionState,
    suspended: bool,
    read_only: bool,
    previous_isolation_level: Option<IsolationLevel>,
}

impl<R> TransactionObject<R> {
    pub(crate) fn new(resource: Arc<R>, read_only: bool) -> Self {
        Self {
            resource,
            depth: 0,
            state: TransactionState::Created,
            suspended: false,
            read_only,
            previous_isolation_level: None,
        }
    }

    pub fn resource(&self) -> &Arc<R> {
        &self.resource
    }

    /// Number of scopes currently sharing the physical transaction.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_committed(&self) -> bool {
        self.state == TransactionState::Committed
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_rollback_only(&self) -> bool {
        self.read_only
    }

    pub fn previous_isolation_level(&self) -> Option<IsolationLevel> {
        self.previous_isolation_level
    }

    pub fn set_previous_isolation_level(&mut self, level: Option<IsolationLevel>) {
        self.previous_isolation_level = level;
    }

    /// Open a scope and return the new depth.
    pub(crate) fn enter(&mut self) -> usize {
        self.depth += 1;
        self.depth
    }

    /// Undo [`enter`](Self::enter) after the physical begin failed.
    pub(crate) fn abort_enter(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub(crate) fn activate(&mut self, read_only: bool) {
        self.state = TransactionState::Active;
        self.read_only = read_only;
    }

    /// Close a scope and return the remaining depth, or `None` if no scope is open.
    pub(crate) fn leave(&mut self) -> Option<usize> {
        self.depth = self.depth.checked_sub(1)?;
        Some(self.depth)
    }

    pub(crate) fn reset_depth(&mut self) {
        self.depth = 0;
    }

    pub(crate) fn finish(&mut self, state: TransactionState) {
        self.depth = 0;
        self.state = state;
    }

    pub(crate) fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }
}

/// Handle for one logical transaction attempt.
#[derive(Debug)]
pub struct TransactionStatus<R> {
    id: String,
    started_at: DateTime<Utc>,
    transaction: TransactionObject<R>,
}

impl<R> TransactionStatus<R> {
    pub(crate) fn new(resource: Arc<R>, read_only: bool) -> Self {
        Self {
            id: generate_transaction_id(),
            started_at: Utc::now(),
            transaction: TransactionObject::new(resource, read_only),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn transaction(&self) -> &TransactionObject<R> {
        &self.transaction
    }

    pub fn transaction_mut(&mut self) -> &mut TransactionObject<R> {
        &mut self.transaction
    }

    pub fn state(&self) -> TransactionState {
        self.transaction.state
    }

    pub fn depth(&self) -> usize {
        self.transaction.depth
    }

    pub fn is_committed(&self) -> bool {
        self.transaction.is_committed()
    }

    /// True once the transaction has been committed or rolled back.
    pub fn is_completed(&self) -> bool {
        self.transaction.state.is_ended()
    }

    pub fn is_suspended(&self) -> bool {
        self.transaction.suspended
    }

    pub fn is_read_only(&self) -> bool {
        self.transaction.read_only
    }
}

/// Generate a unique transaction ID.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}
