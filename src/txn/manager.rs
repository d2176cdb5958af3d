//! Generic transaction manager.
//!
//! `TransactionManager<R>` drives the nesting protocol over any
//! [`TransactionResource`]. Scopes sharing one [`TransactionStatus`] ride on a
//! single physical transaction:
//!
//! - `begin` opens a scope; only the first one issues the physical begin.
//! - `commit` closes a scope; only closing the last one issues the physical
//!   commit, so every nested scope must commit before anything is finalized.
//! - `rollback` from any depth rolls back the whole physical transaction at once.
//!
//! Once committed or rolled back, a status rejects further begin, commit and
//! rollback calls.

use crate::error::{DbError, DbResult};
use crate::models::{ResourceKind, TransactionState};
use crate::txn::definition::TransactionDefinition;
use crate::txn::resource::TransactionResource;
use crate::txn::status::{Savepoint, TransactionStatus};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct TransactionManager<R> {
    resource: Arc<R>,
}

impl<R: TransactionResource> TransactionManager<R> {
    pub fn new(resource: Arc<R>) -> Self {
        Self { resource }
    }

    pub fn resource(&self) -> &Arc<R> {
        &self.resource
    }

    pub fn kind(&self) -> ResourceKind {
        R::KIND
    }

    /// Create a new transaction attempt bound to this manager's resource.
    pub fn get_transaction(&self, definition: &TransactionDefinition) -> TransactionStatus<R> {
        let status = TransactionStatus::new(Arc::clone(&self.resource), definition.read_only);
        debug!(
            transaction_id = %status.id(),
            datasource = %self.resource.name(),
            kind = %R::KIND,
            read_only = definition.read_only,
            "Transaction created"
        );
        status
    }

    /// Open a scope. The first scope issues the physical begin.
    pub async fn begin(
        &self,
        status: &mut TransactionStatus<R>,
        definition: &TransactionDefinition,
    ) -> DbResult<()> {
        ensure_not_completed(status, "begin")?;
        // Active with no open scope: the physical commit failed and the
        // transaction is still open on the resource
        if status.state() == TransactionState::Active && status.depth() == 0 {
            return Err(DbError::transaction(
                "Cannot begin: rollback required after failed commit",
                status.id(),
            ));
        }

        let depth = status.transaction_mut().enter();
        if depth > 1 {
            debug!(
                transaction_id = %status.id(),
                depth = depth,
                "Joined existing transaction"
            );
            return Ok(());
        }

        let resource = Arc::clone(status.transaction().resource());
        if let Err(e) = resource.begin_underlying().await {
            status.transaction_mut().abort_enter();
            return Err(e);
        }
        status.transaction_mut().activate(definition.read_only);

        info!(
            transaction_id = %status.id(),
            datasource = %self.resource.name(),
            kind = %R::KIND,
            read_only = definition.read_only,
            "Transaction started"
        );
        Ok(())
    }

    /// Close a scope. Closing the outermost scope issues the physical commit.
    pub async fn commit(&self, status: &mut TransactionStatus<R>) -> DbResult<()> {
        ensure_begun(status, "commit")?;

        let Some(depth) = status.transaction_mut().leave() else {
            return Err(DbError::transaction(
                "No open scope left to commit",
                status.id(),
            ));
        };
        if depth > 0 {
            debug!(
                transaction_id = %status.id(),
                depth = depth,
                "Nested scope committed"
            );
            return Ok(());
        }

        let resource = Arc::clone(status.transaction().resource());
        resource.commit_underlying().await?;
        status.transaction_mut().finish(TransactionState::Committed);

        info!(
            transaction_id = %status.id(),
            datasource = %self.resource.name(),
            kind = %R::KIND,
            "Transaction committed"
        );
        Ok(())
    }

    /// Roll back the whole physical transaction, whatever the current depth.
    pub async fn rollback(&self, status: &mut TransactionStatus<R>) -> DbResult<()> {
        ensure_begun(status, "roll back")?;

        let depth = status.depth();
        status.transaction_mut().reset_depth();
        let resource = Arc::clone(status.transaction().resource());
        resource.rollback_underlying().await?;
        status.transaction_mut().finish(TransactionState::RolledBack);

        info!(
            transaction_id = %status.id(),
            datasource = %self.resource.name(),
            kind = %R::KIND,
            depth = depth,
            "Transaction rolled back"
        );
        Ok(())
    }

    /// Mark the transaction suspended. Depth and the physical transaction are untouched.
    pub fn suspend(&self, status: &mut TransactionStatus<R>) {
        status.transaction_mut().set_suspended(true);
        debug!(transaction_id = %status.id(), "Transaction suspended");
    }

    /// Clear the suspended mark. Never re-issues a begin.
    pub fn resume(&self, status: &mut TransactionStatus<R>) {
        status.transaction_mut().set_suspended(false);
        debug!(transaction_id = %status.id(), "Transaction resumed");
    }

    pub fn is_savepoint_allowed(&self) -> bool {
        false
    }

    pub fn create_savepoint(&self, _status: &TransactionStatus<R>) -> DbResult<Savepoint> {
        Err(savepoints_unsupported::<R>("create_savepoint"))
    }

    pub fn release_savepoint(
        &self,
        _status: &TransactionStatus<R>,
        _savepoint: &Savepoint,
    ) -> DbResult<()> {
        Err(savepoints_unsupported::<R>("release_savepoint"))
    }

    pub fn rollback_to_savepoint(
        &self,
        _status: &TransactionStatus<R>,
        _savepoint: &Savepoint,
    ) -> DbResult<()> {
        Err(savepoints_unsupported::<R>("rollback_to_savepoint"))
    }

    /// Run `work` inside a new transaction.
    pub async fn run_in_transaction<T, F, Fut>(
        &self,
        definition: &TransactionDefinition,
        work: F,
    ) -> DbResult<T>
    where
        F: FnOnce(Arc<R>) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let mut status = self.get_transaction(definition);
        self.run_in_scope(&mut status, definition, work).await
    }

    /// Run `work` as one scope of `status`.
    ///
    /// Commits the scope when `work` succeeds. When it fails the whole
    /// transaction is rolled back and the work's error is returned; if the
    /// rollback fails too, both failures are reported together.
    pub async fn run_in_scope<T, F, Fut>(
        &self,
        status: &mut TransactionStatus<R>,
        definition: &TransactionDefinition,
        work: F,
    ) -> DbResult<T>
    where
        F: FnOnce(Arc<R>) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        self.begin(status, definition).await?;

        match work(Arc::clone(&self.resource)).await {
            Ok(value) => {
                self.commit(status).await?;
                Ok(value)
            }
            Err(err) => match self.rollback(status).await {
                Ok(()) => Err(err),
                Err(rollback_err) => {
                    warn!(
                        transaction_id = %status.id(),
                        error = %err,
                        rollback_error = %rollback_err,
                        "Rollback failed after work error"
                    );
                    Err(DbError::transaction(
                        format!("{err}; rollback also failed: {rollback_err}"),
                        status.id(),
                    ))
                }
            },
        }
    }
}

fn ensure_not_completed<R>(status: &TransactionStatus<R>, operation: &str) -> DbResult<()> {
    if status.is_completed() {
        return Err(DbError::transaction(
            format!("Cannot {operation}: transaction already {}", status.state()),
            status.id(),
        ));
    }
    Ok(())
}

fn ensure_begun<R>(status: &TransactionStatus<R>, operation: &str) -> DbResult<()> {
    ensure_not_completed(status, operation)?;
    if status.state() == TransactionState::Created {
        return Err(DbError::transaction(
            format!("Cannot {operation}: transaction has not begun"),
            status.id(),
        ));
    }
    Ok(())
}

fn savepoints_unsupported<R: TransactionResource>(operation: &str) -> DbError {
    DbError::unsupported(
        operation,
        format!(
            "Savepoints are not supported by the {} transaction manager",
            R::KIND
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Default)]
    struct Recorder {
        calls: Mutex<Vec<&'static str>>,
        fail_begin: AtomicBool,
        fail_commit: AtomicBool,
    }

    impl Recorder {
        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn outcome(&self, call: &'static str, fail: &AtomicBool) -> DbResult<()> {
            self.record(call);
            if fail.load(Ordering::SeqCst) {
                return Err(DbError::connection(format!("{call} failed"), "retry later"));
            }
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct RecordingConnection(Recorder);

    #[derive(Debug, Default)]
    struct RecordingSession(Recorder);

    impl TransactionResource for RecordingConnection {
        const KIND: ResourceKind = ResourceKind::Connection;

        fn name(&self) -> &str {
            "recording"
        }

        async fn begin_underlying(&self) -> DbResult<()> {
            self.0.outcome("begin", &self.0.fail_begin)
        }

        async fn commit_underlying(&self) -> DbResult<()> {
            self.0.outcome("commit", &self.0.fail_commit)
        }

        async fn rollback_underlying(&self) -> DbResult<()> {
            self.0.record("rollback");
            Ok(())
        }
    }

    impl TransactionResource for RecordingSession {
        const KIND: ResourceKind = ResourceKind::Session;

        fn name(&self) -> &str {
            "recording"
        }

        async fn begin_underlying(&self) -> DbResult<()> {
            self.0.outcome("begin", &self.0.fail_begin)
        }

        async fn commit_underlying(&self) -> DbResult<()> {
            self.0.record("flush");
            self.0.outcome("commit", &self.0.fail_commit)
        }

        async fn rollback_underlying(&self) -> DbResult<()> {
            self.0.record("clear");
            self.0.record("rollback");
            Ok(())
        }
    }

    fn manager() -> TransactionManager<RecordingConnection> {
        TransactionManager::new(Arc::new(RecordingConnection::default()))
    }

    #[tokio::test]
    async fn test_nested_commit_issues_one_begin_and_one_commit() {
        let tm = manager();
        let def = TransactionDefinition::new();
        let mut status = tm.get_transaction(&def);

        tm.begin(&mut status, &def).await.unwrap();
        tm.begin(&mut status, &def).await.unwrap();
        assert_eq!(status.depth(), 2);

        tm.commit(&mut status).await.unwrap();
        assert!(!status.is_committed());
        assert_eq!(tm.resource().0.calls(), vec!["begin"]);

        tm.commit(&mut status).await.unwrap();
        assert!(status.is_committed());
        assert_eq!(status.state(), TransactionState::Committed);
        assert_eq!(tm.resource().0.calls(), vec!["begin", "commit"]);
    }

    #[tokio::test]
    async fn test_rollback_from_nested_scope_rolls_back_once() {
        let tm = manager();
        let def = TransactionDefinition::new();
        let mut status = tm.get_transaction(&def);

        tm.begin(&mut status, &def).await.unwrap();
        tm.begin(&mut status, &def).await.unwrap();
        tm.rollback(&mut status).await.unwrap();

        assert_eq!(status.depth(), 0);
        assert_eq!(status.state(), TransactionState::RolledBack);
        assert!(!status.is_committed());
        assert_eq!(tm.resource().0.calls(), vec!["begin", "rollback"]);
    }

    #[tokio::test]
    async fn test_session_commit_flushes_before_commit() {
        let tm = TransactionManager::new(Arc::new(RecordingSession::default()));
        let def = TransactionDefinition::new();
        let mut status = tm.get_transaction(&def);

        tm.begin(&mut status, &def).await.unwrap();
        tm.commit(&mut status).await.unwrap();

        assert_eq!(tm.kind(), ResourceKind::Session);
        assert_eq!(tm.resource().0.calls(), vec!["begin", "flush", "commit"]);
    }

    #[tokio::test]
    async fn test_read_only_taken_from_first_begin() {
        let tm = manager();
        let mut status = tm.get_transaction(&TransactionDefinition::new());
        assert!(!status.is_read_only());

        tm.begin(&mut status, &TransactionDefinition::read_only())
            .await
            .unwrap();
        assert!(status.is_read_only());

        // A nested scope does not change the flag
        tm.begin(&mut status, &TransactionDefinition::new())
            .await
            .unwrap();
        assert!(status.is_read_only());
    }

    #[tokio::test]
    async fn test_suspend_resume_are_bookkeeping_only() {
        let tm = manager();
        let def = TransactionDefinition::new();
        let mut status = tm.get_transaction(&def);
        tm.begin(&mut status, &def).await.unwrap();

        tm.suspend(&mut status);
        assert!(status.is_suspended());
        assert_eq!(status.depth(), 1);

        tm.resume(&mut status);
        assert!(!status.is_suspended());
        assert_eq!(status.depth(), 1);
        assert_eq!(tm.resource().0.calls(), vec!["begin"]);
    }

    #[tokio::test]
    async fn test_savepoints_unsupported_for_both_variants() {
        let conn_tm = manager();
        let mut conn_status = conn_tm.get_transaction(&TransactionDefinition::new());
        conn_tm
            .begin(&mut conn_status, &TransactionDefinition::new())
            .await
            .unwrap();
        let savepoint = Savepoint {
            name: "sp1".to_string(),
        };

        assert!(!conn_tm.is_savepoint_allowed());
        assert!(matches!(
            conn_tm.create_savepoint(&conn_status),
            Err(DbError::Unsupported { .. })
        ));
        assert!(matches!(
            conn_tm.release_savepoint(&conn_status, &savepoint),
            Err(DbError::Unsupported { .. })
        ));
        assert!(matches!(
            conn_tm.rollback_to_savepoint(&conn_status, &savepoint),
            Err(DbError::Unsupported { .. })
        ));

        let session_tm = TransactionManager::new(Arc::new(RecordingSession::default()));
        let session_status = session_tm.get_transaction(&TransactionDefinition::new());
        assert!(!session_tm.is_savepoint_allowed());
        assert!(matches!(
            session_tm.create_savepoint(&session_status),
            Err(DbError::Unsupported { .. })
        ));
        assert!(matches!(
            session_tm.release_savepoint(&session_status, &savepoint),
            Err(DbError::Unsupported { .. })
        ));
        assert!(matches!(
            session_tm.rollback_to_savepoint(&session_status, &savepoint),
            Err(DbError::Unsupported { .. })
        ));
        // Savepoint calls never reach the resource
        assert!(session_tm.resource().0.calls().is_empty());
    }

    #[tokio::test]
    async fn test_calls_after_rollback_are_rejected() {
        let tm = manager();
        let def = TransactionDefinition::new();
        let mut status = tm.get_transaction(&def);
        tm.begin(&mut status, &def).await.unwrap();
        tm.begin(&mut status, &def).await.unwrap();
        tm.rollback(&mut status).await.unwrap();

        // The outer scope still believes it owns the transaction
        let err = tm.commit(&mut status).await.unwrap_err();
        assert!(matches!(err, DbError::Transaction { .. }));
        assert!(err.to_string().contains("rolled back"));

        assert!(tm.rollback(&mut status).await.is_err());
        assert!(tm.begin(&mut status, &def).await.is_err());
        assert_eq!(tm.resource().0.calls(), vec!["begin", "rollback"]);
    }

    #[tokio::test]
    async fn test_calls_after_commit_are_rejected() {
        let tm = manager();
        let def = TransactionDefinition::new();
        let mut status = tm.get_transaction(&def);
        tm.begin(&mut status, &def).await.unwrap();
        tm.commit(&mut status).await.unwrap();

        assert!(tm.commit(&mut status).await.is_err());
        assert!(tm.rollback(&mut status).await.is_err());
        assert!(tm.begin(&mut status, &def).await.is_err());
        assert_eq!(tm.resource().0.calls(), vec!["begin", "commit"]);
    }

    #[tokio::test]
    async fn test_commit_or_rollback_before_begin_rejected() {
        let tm = manager();
        let mut status = tm.get_transaction(&TransactionDefinition::new());

        assert!(tm.commit(&mut status).await.is_err());
        assert!(tm.rollback(&mut status).await.is_err());
        assert_eq!(status.state(), TransactionState::Created);
        assert!(tm.resource().0.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_begin_restores_depth() {
        let tm = manager();
        tm.resource().0.fail_begin.store(true, Ordering::SeqCst);
        let def = TransactionDefinition::new();
        let mut status = tm.get_transaction(&def);

        let err = tm.begin(&mut status, &def).await.unwrap_err();
        assert!(matches!(err, DbError::Connection { .. }));
        assert_eq!(status.depth(), 0);
        assert_eq!(status.state(), TransactionState::Created);

        tm.resource().0.fail_begin.store(false, Ordering::SeqCst);
        tm.begin(&mut status, &def).await.unwrap();
        assert_eq!(status.depth(), 1);
        assert_eq!(tm.resource().0.calls(), vec!["begin", "begin"]);
    }

    #[tokio::test]
    async fn test_failed_commit_propagates_and_allows_rollback() {
        let tm = manager();
        tm.resource().0.fail_commit.store(true, Ordering::SeqCst);
        let def = TransactionDefinition::new();
        let mut status = tm.get_transaction(&def);
        tm.begin(&mut status, &def).await.unwrap();

        let err = tm.commit(&mut status).await.unwrap_err();
        assert!(matches!(err, DbError::Connection { .. }));
        assert!(!status.is_committed());
        assert_eq!(status.state(), TransactionState::Active);

        // No scope left to commit, but cleanup is still possible
        assert!(matches!(
            tm.commit(&mut status).await,
            Err(DbError::Transaction { .. })
        ));
        tm.rollback(&mut status).await.unwrap();
        assert_eq!(tm.resource().0.calls(), vec!["begin", "commit", "rollback"]);
    }

    #[tokio::test]
    async fn test_begin_after_failed_commit_requires_rollback() {
        let tm = manager();
        tm.resource().0.fail_commit.store(true, Ordering::SeqCst);
        let def = TransactionDefinition::new();
        let mut status = tm.get_transaction(&def);
        tm.begin(&mut status, &def).await.unwrap();
        assert!(tm.commit(&mut status).await.is_err());

        let err = tm.begin(&mut status, &def).await.unwrap_err();
        assert!(matches!(err, DbError::Transaction { .. }));
        assert!(err.to_string().contains("rollback required"));
        assert_eq!(status.depth(), 0);
        assert_eq!(tm.resource().0.calls(), vec!["begin", "commit"]);

        tm.rollback(&mut status).await.unwrap();
        assert_eq!(
            tm.resource().0.calls(),
            vec!["begin", "commit", "rollback"]
        );
    }

    #[tokio::test]
    async fn test_run_in_transaction_commits_on_success() {
        let tm = manager();
        let value = tm
            .run_in_transaction(&TransactionDefinition::new(), |_resource| async {
                Ok::<_, DbError>(42)
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(tm.resource().0.calls(), vec!["begin", "commit"]);
    }

    #[tokio::test]
    async fn test_run_in_transaction_rolls_back_on_error() {
        let tm = manager();
        let result: DbResult<()> = tm
            .run_in_transaction(&TransactionDefinition::new(), |resource| async move {
                resource.0.record("work");
                Err(DbError::internal("boom"))
            })
            .await;

        assert!(matches!(result, Err(DbError::Internal { .. })));
        assert_eq!(tm.resource().0.calls(), vec!["begin", "work", "rollback"]);
    }

    #[tokio::test]
    async fn test_run_in_scope_joins_outer_transaction() {
        let tm = manager();
        let def = TransactionDefinition::new();
        let mut status = tm.get_transaction(&def);
        tm.begin(&mut status, &def).await.unwrap();

        tm.run_in_scope(&mut status, &def, |_resource| async { Ok::<_, DbError>(()) })
            .await
            .unwrap();
        assert_eq!(status.depth(), 1);
        assert_eq!(tm.resource().0.calls(), vec!["begin"]);

        tm.commit(&mut status).await.unwrap();
        assert_eq!(tm.resource().0.calls(), vec!["begin", "commit"]);
    }
}
