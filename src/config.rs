//! Configuration handling for the transaction manager.
//!
//! This module provides the datasource records consumed by the registry, the
//! dotted-key un-flattening of raw descriptors, JSON loading, and the CLI
//! configuration of the binary (CLI arguments and environment variables).

use crate::db::dsn::redact_dsn;
use crate::error::{DbError, DbResult};
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_ROWS_PREFETCH: u32 = 100;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

/// Top-level key holding the datasource list in a configuration file.
pub const DATASOURCE_KEY: &str = "datasource";

/// How the backend reports statement errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    #[serde(alias = "ERRMODE_SILENT")]
    Silent,
    #[serde(alias = "ERRMODE_WARNING")]
    Warning,
    #[default]
    #[serde(alias = "ERRMODE_EXCEPTION")]
    Exception,
}

/// Case applied to column names in result sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnsCase {
    #[default]
    #[serde(alias = "CASE_NATURAL")]
    Natural,
    #[serde(alias = "CASE_LOWER")]
    Lower,
    #[serde(alias = "CASE_UPPER")]
    Upper,
}

/// Connection-level options (`connection.*` keys).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionOptions {
    pub persistent: bool,
    pub error_mode: ErrorMode,
    pub columns_case: ColumnsCase,
    /// Connect/busy timeout in seconds (default: 30)
    pub timeout_secs: u64,
    pub auto_commit: bool,
    pub rows_prefetch: u32,
    /// Carried for external idle monitoring; never enforced here (default: 600)
    #[serde(rename = "idleTimeout")]
    pub idle_timeout_secs: u64,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            persistent: false,
            error_mode: ErrorMode::default(),
            columns_case: ColumnsCase::default(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            auto_commit: true,
            rows_prefetch: DEFAULT_ROWS_PREFETCH,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
        }
    }
}

/// Session metadata options (`session.*` keys).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionOptions {
    /// Paths holding the session's entity metadata
    pub entity_paths: Vec<PathBuf>,
    #[serde(rename = "isDevMode")]
    pub dev_mode: bool,
}

/// Configuration of one named backend.
///
/// Deserialized from an un-flattened descriptor; `driver` is filled in by
/// [`crate::db::ConfigSet`] once the url has been parsed.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DataSourceConfig {
    pub name: String,
    /// DSN in the form `<driver>:<key>=<value>;...`
    pub url: String,
    pub driver: String,
    pub username: String,
    /// Contains sensitive data - never log
    #[serde(skip_serializing)]
    pub password: String,
    #[serde(rename = "isPrimary")]
    pub primary: bool,
    pub validation_query: Option<String>,
    #[serde(alias = "doctrine")]
    pub session: SessionOptions,
    pub connection: ConnectionOptions,
    /// Explicit driver parameters, merged over the values parsed from `url`
    pub params: BTreeMap<String, Value>,
}

impl DataSourceConfig {
    /// Create a configuration with a name and url, everything else defaulted.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_primary(mut self, primary: bool) -> Self {
        self.primary = primary;
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_validation_query(mut self, query: impl Into<String>) -> Self {
        self.validation_query = Some(query.into());
        self
    }

    /// Build a configuration from a raw descriptor with dotted-path keys.
    pub fn from_descriptor(descriptor: &Map<String, Value>) -> DbResult<Self> {
        let nested = unflatten(descriptor)?;
        serde_json::from_value(nested).map_err(|e| {
            DbError::configuration(format!("Invalid syntax in datasource configuration: {e}"))
        })
    }
}

impl std::fmt::Debug for DataSourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceConfig")
            .field("name", &self.name)
            .field("url", &redact_dsn(&self.url))
            .field("driver", &self.driver)
            .field("username", &self.username)
            .field("primary", &self.primary)
            .field("validation_query", &self.validation_query)
            .field("session", &self.session)
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

/// Turn dotted-path keys into nested objects.
///
/// `{"connection.timeoutSecs": 5}` becomes `{"connection": {"timeoutSecs": 5}}`.
/// A key used both as a value and as a group is rejected.
pub fn unflatten(descriptor: &Map<String, Value>) -> DbResult<Value> {
    let mut root = Map::new();
    for (key, value) in descriptor {
        insert_path(&mut root, key, value.clone())?;
    }
    Ok(Value::Object(root))
}

fn insert_path(target: &mut Map<String, Value>, path: &str, value: Value) -> DbResult<()> {
    match path.split_once('.') {
        None => {
            if let Some(existing) = target.get_mut(path) {
                return match (existing, value) {
                    (Value::Object(existing), Value::Object(incoming)) => {
                        for (key, value) in incoming {
                            insert_path(existing, &key, value)?;
                        }
                        Ok(())
                    }
                    _ => Err(conflicting_key(path)),
                };
            }
            target.insert(path.to_string(), value);
            Ok(())
        }
        Some((head, rest)) => {
            let entry = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            match entry {
                Value::Object(child) => insert_path(child, rest, value),
                _ => Err(conflicting_key(head)),
            }
        }
    }
}

fn conflicting_key(key: &str) -> DbError {
    DbError::configuration(format!(
        "Key '{key}' is used both as a value and as an option group"
    ))
}

/// Parse datasource descriptors from a JSON document of the form
/// `{"datasource": [ {...}, ... ]}`.
pub fn parse_datasources(json: &str) -> DbResult<Vec<DataSourceConfig>> {
    let document: Value = serde_json::from_str(json)
        .map_err(|e| DbError::configuration(format!("Invalid JSON: {e}")))?;

    let entries = match document.get(DATASOURCE_KEY) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(entries)) => entries,
        Some(_) => {
            return Err(DbError::configuration(format!(
                "'{DATASOURCE_KEY}' must be a list of datasource descriptors"
            )));
        }
    };

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| match entry {
            Value::Object(descriptor) => DataSourceConfig::from_descriptor(descriptor),
            _ => Err(DbError::configuration(format!(
                "Datasource #{index} must be an object"
            ))),
        })
        .collect()
}

/// Load datasource descriptors from a JSON file.
pub fn load_datasources(path: &Path) -> DbResult<Vec<DataSourceConfig>> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        DbError::configuration(format!("Cannot read {}: {e}", path.display()))
    })?;
    parse_datasources(&contents)
}

/// Configuration for the db-txn-manager binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-txn-manager",
    about = "Inspect and verify the backends of a datasource configuration",
    version,
    author
)]
pub struct Config {
    /// JSON file with a "datasource" list of backend descriptors
    #[arg(short, long, value_name = "FILE", env = "DB_TXN_CONFIG")]
    pub config: PathBuf,

    /// Connect every backend (running its validation query) after listing
    #[arg(long)]
    pub check: bool,

    /// Print the artifact listing as JSON
    #[arg(long)]
    pub json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DB_TXN_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DB_TXN_JSON_LOGS")]
    pub json_logs: bool,
}
