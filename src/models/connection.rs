//! Backend and resource-related data models.
//!
//! This module defines the database kinds, the two resource variants, the
//! artifact naming convention and the transaction lifecycle states.

use serde::{Deserialize, Serialize};

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Resolve the database type from a driver name as it appears in a DSN.
    pub fn from_driver(driver: &str) -> Option<Self> {
        match driver.to_ascii_lowercase().as_str() {
            "pgsql" | "postgres" | "postgresql" => Some(Self::PostgreSQL),
            "mysql" | "mariadb" => Some(Self::MySQL),
            "sqlite" | "sqlite3" => Some(Self::SQLite),
            _ => None,
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// The two resource variants a backend exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Unit of work batching writes until flush/commit.
    Session,
    /// Raw connection executing statements directly.
    Connection,
}

impl ResourceKind {
    /// The artifact kind of the resource itself.
    pub fn resource_artifact(&self) -> ArtifactKind {
        match self {
            Self::Session => ArtifactKind::Session,
            Self::Connection => ArtifactKind::Connection,
        }
    }

    /// The artifact kind of the transaction manager bound to this resource.
    pub fn manager_artifact(&self) -> ArtifactKind {
        match self {
            Self::Session => ArtifactKind::SessionTransactionManager,
            Self::Connection => ArtifactKind::ConnectionTransactionManager,
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Session => write!(f, "session"),
            Self::Connection => write!(f, "connection"),
        }
    }
}

/// Kinds of artifacts produced per backend.
///
/// Each kind carries a fixed name suffix; collaborators address an artifact as
/// `<backend><suffix>` and lookups strip the suffix again before resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Session,
    Connection,
    SessionTransactionManager,
    ConnectionTransactionManager,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Session,
        ArtifactKind::Connection,
        ArtifactKind::SessionTransactionManager,
        ArtifactKind::ConnectionTransactionManager,
    ];

    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Session => "-session",
            Self::Connection => "-conn",
            Self::SessionTransactionManager => "-session-txn",
            Self::ConnectionTransactionManager => "-conn-txn",
        }
    }

    /// Full artifact name for a backend.
    pub fn artifact_name(&self, backend: &str) -> String {
        format!("{}{}", backend, self.suffix())
    }

    /// Strip this kind's suffix from `name`, if present.
    pub fn normalize<'a>(&self, name: &'a str) -> &'a str {
        name.strip_suffix(self.suffix())
            .filter(|base| !base.is_empty())
            .unwrap_or(name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Connection => "connection",
            Self::SessionTransactionManager => "session transaction manager",
            Self::ConnectionTransactionManager => "connection transaction manager",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Lifecycle state of a transaction object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// Created but no scope has begun yet
    Created,
    Active,
    Committed,
    RolledBack,
}

impl TransactionState {
    /// Check if the transaction is still active.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Check if the transaction has ended (committed or rolled back).
    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Active => write!(f, "active"),
            Self::Committed => write!(f, "committed"),
            Self::RolledBack => write!(f, "rolled back"),
        }
    }
}
