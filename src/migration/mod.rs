//! Schema migration: diff → SQL → transactional apply → audit record.

pub mod generator;
pub mod history;
pub mod workflow;

pub use generator::SqlGenerator;
pub use history::{InMemoryMigrationHistory, MigrationHistory};
pub use workflow::MigrationWorkflow;

use crate::core::MetaError;
use crate::model::Migration;
use crate::schema::SchemaDiff;
use serde::{Deserialize, Serialize};
use std::error::Error as _;
use std::fmt;

/// Where a migration run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Loading,
    Comparing,
    Generating,
    DryRunComplete,
    Executing,
    Applied,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Loading => "loading",
            Self::Comparing => "comparing",
            Self::Generating => "generating",
            Self::DryRunComplete => "dry_run_complete",
            Self::Executing => "executing",
            Self::Applied => "applied",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationOptions {
    /// Generate statements without touching the database
    pub dry_run: bool,

    /// Count affected rows before destructive steps and report them as warnings
    pub validate_data: bool,

    /// Overrides the engine-wide setting for this run
    pub allow_destructive: Option<bool>,

    /// Replaces the generated diff summary in the migration record
    pub description: Option<String>,
}

impl MigrationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn validate_data(mut self, validate: bool) -> Self {
        self.validate_data = validate;
        self
    }

    pub fn allow_destructive(mut self, allow: bool) -> Self {
        self.allow_destructive = Some(allow);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Outcome of one migration run. Failures are reported here, never raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationResult {
    pub success: bool,
    pub stage: Stage,
    pub dry_run: bool,
    pub destructive: bool,
    pub sql: Vec<String>,
    pub rollback_sql: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub diff: Option<SchemaDiff>,
    pub migration: Option<Migration>,
}

impl MigrationResult {
    pub(crate) fn new(dry_run: bool) -> Self {
        Self {
            success: false,
            stage: Stage::Loading,
            dry_run,
            destructive: false,
            sql: Vec::new(),
            rollback_sql: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            diff: None,
            migration: None,
        }
    }

    /// Ends the run as failed, keeping the whole cause chain in `errors`.
    pub(crate) fn fail(mut self, err: MetaError) -> Self {
        self.success = false;
        self.stage = Stage::Failed;
        self.errors.push(err.to_string());
        let mut cause = err.source();
        while let Some(inner) = cause {
            self.errors.push(format!("caused by: {}", inner));
            cause = inner.source();
        }
        self
    }

    pub(crate) fn finish(mut self, stage: Stage) -> Self {
        self.success = true;
        self.stage = stage;
        self
    }

    pub fn is_applied(&self) -> bool {
        self.success && self.stage == Stage::Applied
    }
}
