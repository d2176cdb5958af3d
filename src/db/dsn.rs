//! DSN parsing and explicit-option merging.
//!
//! A DSN has the form `<driver>[:<rest>]`. For the embedded-file driver
//! (`sqlite`) the remainder is a filesystem path taken verbatim; for every
//! other driver it is a `;`-separated list of `key=value` pairs.

use serde_json::Value;
use std::collections::BTreeMap;

/// Driver name written by the DSN parser for the embedded-file kind.
pub const SQLITE_DRIVER: &str = "sqlite3";

/// Key holding the resolved password; masked in debug output.
const PASSWORD_KEY: &str = "password";

const REDACTED: &str = "***";

/// Driver and key/value parameters used to open a connection.
#[derive(Clone, Default, PartialEq)]
pub struct ConnectionParams {
    pub driver: String,
    pub values: BTreeMap<String, Value>,
}

impl ConnectionParams {
    /// Parse a DSN string.
    pub fn parse(dsn: &str) -> Self {
        let (driver, rest) = match dsn.split_once(':') {
            Some((driver, rest)) => (driver, Some(rest)),
            None => (dsn, None),
        };

        let mut params = Self {
            driver: driver.to_string(),
            values: BTreeMap::new(),
        };

        if driver == "sqlite" {
            params.driver = SQLITE_DRIVER.to_string();
            params.set("path", rest.unwrap_or_default());
            return params;
        }

        let Some(rest) = rest else {
            return params;
        };

        for token in rest.split(';') {
            if let Some((key, value)) = token.split_once('=') {
                params.set(key, value);
            }
        }
        params
    }

    /// Merge explicit options over the parsed values.
    ///
    /// An explicit option only wins when it carries a value: nulls, empty
    /// strings and empty collections leave the parsed value in place. A
    /// `driver` option replaces the driver itself.
    pub fn merge_explicit<'a>(
        &mut self,
        options: impl IntoIterator<Item = (&'a String, &'a Value)>,
    ) {
        for (key, value) in options {
            if !has_value(value) {
                continue;
            }
            if key == "driver" {
                if let Some(driver) = value_to_string(value) {
                    self.driver = driver;
                }
                continue;
            }
            self.values.insert(key.clone(), value.clone());
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), Value::String(value.into()));
    }

    /// Get a parameter rendered as a string; empty strings count as absent.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .and_then(value_to_string)
            .filter(|v| !v.is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get_str(key).is_some()
    }
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let masked = Value::String(REDACTED.to_string());
        let values: BTreeMap<&str, &Value> = self
            .values
            .iter()
            .map(|(key, value)| {
                let value = if key == PASSWORD_KEY && has_value(value) {
                    &masked
                } else {
                    value
                };
                (key.as_str(), value)
            })
            .collect();
        f.debug_struct("ConnectionParams")
            .field("driver", &self.driver)
            .field("values", &values)
            .finish()
    }
}

/// Mask the password in a DSN for display.
///
/// File-path DSNs are returned unchanged.
pub fn redact_dsn(dsn: &str) -> String {
    match dsn.split_once(':') {
        Some((driver, rest)) if driver != "sqlite" => {
            let tokens: Vec<String> = rest
                .split(';')
                .map(|token| match token.split_once('=') {
                    Some((key, _)) if key == PASSWORD_KEY => format!("{key}={REDACTED}"),
                    _ => token.to_string(),
                })
                .collect();
            format!("{driver}:{}", tokens.join(";"))
        }
        _ => dsn.to_string(),
    }
}

fn has_value(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
