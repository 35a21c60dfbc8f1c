use crate::core::{MetaError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// SQL backend the generated statements target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    #[default]
    Sqlite,
    Postgres,
}

/// Engine configuration
///
/// Built the same way as a connection config: start from `new()` and chain
/// setters, or deserialize from JSON where every key is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Target SQL dialect
    pub dialect: DialectKind,

    /// Physical table name prefix (`tab` + `User` = `tabUser`)
    pub table_prefix: String,

    /// VARCHAR length used when a field declares none
    pub default_varchar_length: u32,

    /// Total digits of DECIMAL columns
    pub decimal_precision: u8,

    /// Fractional digits of DECIMAL columns when a field declares no precision
    pub decimal_scale: u8,

    /// Maximum number of merged metadata views kept in memory
    pub meta_cache_capacity: usize,

    /// Whether live migrations may drop or narrow columns
    pub allow_destructive: bool,

    /// SQLite only: use `ALTER TABLE .. DROP COLUMN` (3.35+) instead of a table rebuild
    pub sqlite_drop_column: bool,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            dialect: DialectKind::Sqlite,
            table_prefix: "tab".to_string(),
            default_varchar_length: 140,
            decimal_precision: 21,
            decimal_scale: 9,
            meta_cache_capacity: 512,
            allow_destructive: true,
            sqlite_drop_column: true,
        }
    }

    /// Set the SQL dialect
    pub fn dialect(mut self, dialect: DialectKind) -> Self {
        self.dialect = dialect;
        self
    }

    /// Set the table prefix
    pub fn table_prefix(mut self, prefix: &str) -> Self {
        self.table_prefix = prefix.to_string();
        self
    }

    /// Set the default VARCHAR length
    pub fn default_varchar_length(mut self, length: u32) -> Self {
        self.default_varchar_length = length;
        self
    }

    /// Set DECIMAL precision and scale
    pub fn decimal(mut self, precision: u8, scale: u8) -> Self {
        self.decimal_precision = precision;
        self.decimal_scale = scale;
        self
    }

    /// Set the metadata cache capacity
    pub fn meta_cache_capacity(mut self, capacity: usize) -> Self {
        self.meta_cache_capacity = capacity;
        self
    }

    /// Allow or forbid destructive live migrations
    pub fn allow_destructive(mut self, allow: bool) -> Self {
        self.allow_destructive = allow;
        self
    }

    /// Toggle native column drops on SQLite
    pub fn sqlite_drop_column(mut self, enabled: bool) -> Self {
        self.sqlite_drop_column = enabled;
        self
    }

    /// Physical table backing a DocType.
    pub fn table_name(&self, doctype: &str) -> String {
        format!("{}{}", self.table_prefix, doctype)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_varchar_length == 0 {
            return Err(MetaError::Config(
                "default_varchar_length must be > 0".to_string(),
            ));
        }
        if self.decimal_precision == 0 || self.decimal_scale > self.decimal_precision {
            return Err(MetaError::Config(format!(
                "invalid decimal shape ({}, {})",
                self.decimal_precision, self.decimal_scale
            )));
        }
        if self.meta_cache_capacity == 0 {
            return Err(MetaError::Config(
                "meta_cache_capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse from a JSON document; missing keys keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| MetaError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await.map_err(|e| {
            MetaError::Config(format!(
                "Failed to read config {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_json_str(&raw)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
