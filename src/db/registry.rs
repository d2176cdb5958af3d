//! Lazily built, cached backend resources.
//!
//! For every configured datasource the registry hands out four artifacts: a
//! connection, a session over that same connection, and one transaction
//! manager for each of them. Each artifact is built on first request and
//! cached for the lifetime of the registry.
//!
//! # Concurrency
//!
//! - Every artifact lives in its own `OnceCell`, so concurrent first requests
//!   for the same artifact wait on a single build.
//! - A failed build leaves the cell empty and the error goes to the caller;
//!   the next request builds again.

use crate::config::{DataSourceConfig, load_datasources, parse_datasources};
use crate::db::config_set::{ConfigSet, ResolvedDataSource};
use crate::db::connection::DbConnection;
use crate::db::session::Session;
use crate::error::{DbError, DbResult};
use crate::models::{ArtifactKind, ResourceKind};
use crate::txn::TransactionManager;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Transaction manager of either resource kind.
#[derive(Debug, Clone)]
pub enum AnyTransactionManager {
    Session(Arc<TransactionManager<Session>>),
    Connection(Arc<TransactionManager<DbConnection>>),
}

impl AnyTransactionManager {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Session(_) => ResourceKind::Session,
            Self::Connection(_) => ResourceKind::Connection,
        }
    }

    pub fn as_session(&self) -> Option<&Arc<TransactionManager<Session>>> {
        match self {
            Self::Session(manager) => Some(manager),
            Self::Connection(_) => None,
        }
    }

    pub fn as_connection(&self) -> Option<&Arc<TransactionManager<DbConnection>>> {
        match self {
            Self::Connection(manager) => Some(manager),
            Self::Session(_) => None,
        }
    }
}

/// One registered artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    /// Addressable name, `<backend><suffix>`
    pub name: String,
    pub backend: String,
    pub kind: ArtifactKind,
    /// Set on the primary backend's artifacts. This is their unsuffixed
    /// by-type registration: the `primary_*` lookups resolve to this same
    /// cached instance without a name.
    pub primary: bool,
}

#[derive(Debug, Default)]
struct Slot {
    connection: OnceCell<Arc<DbConnection>>,
    session: OnceCell<Arc<Session>>,
    session_manager: OnceCell<Arc<TransactionManager<Session>>>,
    connection_manager: OnceCell<Arc<TransactionManager<DbConnection>>>,
}

#[derive(Debug)]
struct RegistryInner {
    configs: ConfigSet,
    slots: Vec<Slot>,
    builds: AtomicUsize,
}

/// Shared registry of per-backend resources. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct ResourceRegistry {
    inner: Arc<RegistryInner>,
}

impl ResourceRegistry {
    /// Validate the configurations and create an empty registry.
    ///
    /// Nothing is connected until an artifact is first requested.
    pub fn new(configs: Vec<DataSourceConfig>) -> DbResult<Self> {
        let configs = ConfigSet::new(configs)?;
        let slots = (0..configs.len()).map(|_| Slot::default()).collect();

        info!(
            datasources = configs.len(),
            primary = ?configs.primary().map(ResolvedDataSource::name),
            "Resource registry created"
        );

        Ok(Self {
            inner: Arc::new(RegistryInner {
                configs,
                slots,
                builds: AtomicUsize::new(0),
            }),
        })
    }

    /// Create a registry from a JSON document with a `datasource` list.
    pub fn from_json(json: &str) -> DbResult<Self> {
        Self::new(parse_datasources(json)?)
    }

    pub fn from_file(path: &Path) -> DbResult<Self> {
        Self::new(load_datasources(path)?)
    }

    pub fn config_set(&self) -> &ConfigSet {
        &self.inner.configs
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.configs.names()
    }

    /// Number of connection and session builds started so far.
    pub fn build_count(&self) -> usize {
        self.inner.builds.load(Ordering::SeqCst)
    }

    /// Every addressable artifact, four per backend.
    ///
    /// The primary backend's entries carry `primary: true` instead of being
    /// listed a second time under the bare type.
    pub fn artifacts(&self) -> Vec<Artifact> {
        self.inner
            .configs
            .iter()
            .flat_map(|source| {
                ArtifactKind::ALL.into_iter().map(move |kind| Artifact {
                    name: kind.artifact_name(source.name()),
                    backend: source.name().to_string(),
                    kind,
                    primary: source.is_primary(),
                })
            })
            .collect()
    }

    pub async fn connection(&self, name: &str) -> DbResult<Arc<DbConnection>> {
        let position = self.position(ArtifactKind::Connection, name)?;
        self.connection_at(position).await
    }

    pub async fn session(&self, name: &str) -> DbResult<Arc<Session>> {
        let position = self.position(ArtifactKind::Session, name)?;
        self.session_at(position).await
    }

    pub async fn session_transaction_manager(
        &self,
        name: &str,
    ) -> DbResult<Arc<TransactionManager<Session>>> {
        let position = self.position(ArtifactKind::SessionTransactionManager, name)?;
        self.session_manager_at(position).await
    }

    pub async fn connection_transaction_manager(
        &self,
        name: &str,
    ) -> DbResult<Arc<TransactionManager<DbConnection>>> {
        let position = self.position(ArtifactKind::ConnectionTransactionManager, name)?;
        self.connection_manager_at(position).await
    }

    /// Transaction manager of the given kind for a backend.
    pub async fn transaction_manager(
        &self,
        name: &str,
        kind: ResourceKind,
    ) -> DbResult<AnyTransactionManager> {
        let position = self.position(kind.manager_artifact(), name)?;
        self.manager_at(position, kind).await
    }

    pub async fn primary_connection(&self) -> DbResult<Arc<DbConnection>> {
        let position = self.primary_position(ArtifactKind::Connection)?;
        self.connection_at(position).await
    }

    pub async fn primary_session(&self) -> DbResult<Arc<Session>> {
        let position = self.primary_position(ArtifactKind::Session)?;
        self.session_at(position).await
    }

    pub async fn primary_session_transaction_manager(
        &self,
    ) -> DbResult<Arc<TransactionManager<Session>>> {
        let position = self.primary_position(ArtifactKind::SessionTransactionManager)?;
        self.session_manager_at(position).await
    }

    pub async fn primary_connection_transaction_manager(
        &self,
    ) -> DbResult<Arc<TransactionManager<DbConnection>>> {
        let position = self.primary_position(ArtifactKind::ConnectionTransactionManager)?;
        self.connection_manager_at(position).await
    }

    pub async fn primary_transaction_manager(
        &self,
        kind: ResourceKind,
    ) -> DbResult<AnyTransactionManager> {
        let position = self.primary_position(kind.manager_artifact())?;
        self.manager_at(position, kind).await
    }

    fn position(&self, kind: ArtifactKind, name: &str) -> DbResult<usize> {
        self.inner
            .configs
            .position(kind.normalize(name))
            .ok_or_else(|| DbError::not_found(kind.description(), name))
    }

    fn primary_position(&self, kind: ArtifactKind) -> DbResult<usize> {
        self.inner
            .configs
            .primary_position()
            .ok_or_else(|| DbError::not_found(kind.description(), "primary"))
    }

    fn source(&self, position: usize) -> DbResult<&ResolvedDataSource> {
        self.inner
            .configs
            .at(position)
            .ok_or_else(|| DbError::internal(format!("No datasource at position {position}")))
    }

    fn slot(&self, position: usize) -> DbResult<&Slot> {
        self.inner
            .slots
            .get(position)
            .ok_or_else(|| DbError::internal(format!("No resource slot at position {position}")))
    }

    async fn connection_at(&self, position: usize) -> DbResult<Arc<DbConnection>> {
        let source = self.source(position)?;
        self.slot(position)?
            .connection
            .get_or_try_init(|| async {
                self.inner.builds.fetch_add(1, Ordering::SeqCst);
                debug!(datasource = %source.name(), "Building connection");
                let connection = DbConnection::connect(source).await?;
                info!(datasource = %source.name(), "Connection registered");
                Ok::<_, DbError>(Arc::new(connection))
            })
            .await
            .map(Arc::clone)
    }

    async fn session_at(&self, position: usize) -> DbResult<Arc<Session>> {
        let source = self.source(position)?;
        self.slot(position)?
            .session
            .get_or_try_init(|| async {
                let connection = self.connection_at(position).await?;
                self.inner.builds.fetch_add(1, Ordering::SeqCst);
                let session = Session::new(connection, &source.config.session);
                info!(
                    datasource = %source.name(),
                    dev_mode = session.is_dev_mode(),
                    "Session registered"
                );
                Ok::<_, DbError>(Arc::new(session))
            })
            .await
            .map(Arc::clone)
    }

    async fn session_manager_at(
        &self,
        position: usize,
    ) -> DbResult<Arc<TransactionManager<Session>>> {
        self.slot(position)?
            .session_manager
            .get_or_try_init(|| async {
                let session = self.session_at(position).await?;
                Ok::<_, DbError>(Arc::new(TransactionManager::new(session)))
            })
            .await
            .map(Arc::clone)
    }

    async fn connection_manager_at(
        &self,
        position: usize,
    ) -> DbResult<Arc<TransactionManager<DbConnection>>> {
        self.slot(position)?
            .connection_manager
            .get_or_try_init(|| async {
                let connection = self.connection_at(position).await?;
                Ok::<_, DbError>(Arc::new(TransactionManager::new(connection)))
            })
            .await
            .map(Arc::clone)
    }

    async fn manager_at(
        &self,
        position: usize,
        kind: ResourceKind,
    ) -> DbResult<AnyTransactionManager> {
        match kind {
            ResourceKind::Session => self
                .session_manager_at(position)
                .await
                .map(AnyTransactionManager::Session),
            ResourceKind::Connection => self
                .connection_manager_at(position)
                .await
                .map(AnyTransactionManager::Connection),
        }
    }
}
