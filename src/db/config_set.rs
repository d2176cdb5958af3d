//! Validated, named backend configurations.
//!
//! `ConfigSet` turns raw [`DataSourceConfig`] records into resolved entries:
//! the DSN is parsed, explicit options are merged over it, credentials are
//! resolved and the primary backend is determined.

use crate::config::DataSourceConfig;
use crate::db::dsn::ConnectionParams;
use crate::error::{DbError, DbResult};
use std::collections::HashMap;
use tracing::{debug, warn};

/// A configuration together with the connection parameters derived from it.
#[derive(Debug, Clone)]
pub struct ResolvedDataSource {
    pub config: DataSourceConfig,
    pub params: ConnectionParams,
}

impl ResolvedDataSource {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_primary(&self) -> bool {
        self.config.primary
    }
}

/// Ordered set of resolved configurations with unique names and one primary.
#[derive(Debug, Clone, Default)]
pub struct ConfigSet {
    entries: Vec<ResolvedDataSource>,
    index: HashMap<String, usize>,
    primary: Option<usize>,
}

impl ConfigSet {
    /// Validate and resolve a list of configurations.
    ///
    /// Fails on a missing name or url, a DSN without driver, a duplicate name,
    /// or more than one config marked primary. When no config is marked
    /// primary the first one is promoted.
    pub fn new(configs: Vec<DataSourceConfig>) -> DbResult<Self> {
        let mut set = Self::default();

        for config in configs {
            let resolved = resolve(config)?;
            let name = resolved.config.name.clone();

            if resolved.is_primary() {
                if let Some(existing) = set.primary {
                    return Err(DbError::configuration(format!(
                        "Datasources '{}' and '{}' cannot both be primary",
                        set.entries[existing].name(),
                        name
                    )));
                }
                set.primary = Some(set.entries.len());
            }

            if set.index.contains_key(&name) {
                return Err(DbError::configuration(format!(
                    "Two datasources cannot have the same name '{name}'"
                )));
            }

            debug!(
                datasource = %name,
                driver = %resolved.params.driver,
                primary = resolved.is_primary(),
                "Resolved datasource"
            );

            set.index.insert(name, set.entries.len());
            set.entries.push(resolved);
        }

        if set.primary.is_none() && !set.entries.is_empty() {
            set.entries[0].config.primary = true;
            set.primary = Some(0);
            warn!(
                datasource = %set.entries[0].name(),
                "No datasource marked primary, using the first one"
            );
        }

        Ok(set)
    }

    pub fn get(&self, name: &str) -> Option<&ResolvedDataSource> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn at(&self, position: usize) -> Option<&ResolvedDataSource> {
        self.entries.get(position)
    }

    /// Position of a named entry.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn primary(&self) -> Option<&ResolvedDataSource> {
        self.primary.map(|i| &self.entries[i])
    }

    pub fn primary_position(&self) -> Option<usize> {
        self.primary
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedDataSource> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.config.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn resolve(mut config: DataSourceConfig) -> DbResult<ResolvedDataSource> {
    if config.name.trim().is_empty() {
        return Err(DbError::configuration(
            "Datasource configured without \"name\" parameter",
        ));
    }
    if config.url.trim().is_empty() {
        return Err(DbError::configuration(format!(
            "Datasource '{}' configured without \"url\" parameter",
            config.name
        )));
    }

    let mut params = ConnectionParams::parse(&config.url);
    params.merge_explicit(&config.params);

    if params.driver.is_empty() {
        return Err(DbError::configuration(format!(
            "Malformed \"url\" for datasource '{}'. No driver found",
            config.name
        )));
    }
    config.driver = params.driver.clone();

    // Explicit credentials win; otherwise take them from the DSN. Either way the
    // params map ends up holding the resolved value.
    if config.username.is_empty() {
        config.username = params.get_str("user").unwrap_or_default();
    }
    params.set("user", config.username.clone());

    if config.password.is_empty() {
        config.password = params.get_str("password").unwrap_or_default();
    }
    params.set("password", config.password.clone());

    Ok(ResolvedDataSource { config, params })
}
