use crate::schema::SchemaDiff;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Auditable record of one applied schema change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Migration {
    pub id: String,
    pub doctype: String,
    pub timestamp: DateTime<Utc>,
    /// Per-DocType sequence number, starting at 1.
    pub version: u32,
    pub description: String,
    pub sql: Vec<String>,
    pub rollback_sql: Vec<String>,
    pub applied: bool,
    pub destructive: bool,
    pub requires_backup: bool,
    pub diff: SchemaDiff,
}

impl Migration {
    pub fn new(doctype: impl Into<String>, version: u32, diff: SchemaDiff) -> Self {
        let doctype = doctype.into();
        let destructive = diff.is_destructive();
        Self {
            id: Uuid::new_v4().to_string(),
            description: diff.summary(),
            doctype,
            timestamp: Utc::now(),
            version,
            sql: Vec::new(),
            rollback_sql: Vec::new(),
            applied: false,
            destructive,
            requires_backup: destructive,
            diff,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_sql(mut self, sql: Vec<String>, rollback_sql: Vec<String>) -> Self {
        self.sql = sql;
        self.rollback_sql = rollback_sql;
        self
    }
}
