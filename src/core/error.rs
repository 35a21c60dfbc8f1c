use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// What kind of object a lookup failed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    DocType,
    CustomField,
    PropertySetter,
    Migration,
    Table,
    Column,
    Index,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DocType => "DocType",
            Self::CustomField => "Custom Field",
            Self::PropertySetter => "Property Setter",
            Self::Migration => "Migration",
            Self::Table => "Table",
            Self::Column => "Column",
            Self::Index => "Index",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Required,
    Invalid,
    Duplicate,
    MissingOptions,
    DependencyNotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One structural finding produced by validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub field: String,
    pub message: String,
    pub severity: Severity,
}

impl ValidationIssue {
    pub fn error(kind: IssueKind, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            field: field.into(),
            message: message.into(),
            severity: Severity::Error,
        }
    }

    pub fn warning(kind: IssueKind, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            field: field.into(),
            message: message.into(),
            severity: Severity::Warning,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum MetaError {
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: ObjectKind, name: String },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: ObjectKind, name: String },

    #[error("Validation failed: {}", join_issues(.0))]
    ValidationFailed(Vec<ValidationIssue>),

    #[error("Property '{property}' cannot be set on {target}")]
    PropertyNotSupported { target: String, property: String },

    #[error("Field '{fieldname}' depends on unknown field '{dependency}'")]
    DependencyNotFound { fieldname: String, dependency: String },

    #[error("Migration failed: {message}")]
    MigrationFailed {
        message: String,
        #[source]
        source: Option<Box<MetaError>>,
    },

    #[error("Destructive changes are disabled for '{0}'")]
    DestructiveChangeBlocked(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, MetaError>;

impl MetaError {
    pub fn not_found(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn already_exists(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    /// Wraps a lower level failure, keeping it reachable through `source()`.
    pub fn migration_failed(message: impl Into<String>, cause: MetaError) -> Self {
        Self::MigrationFailed {
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Validation findings carried by this error, if any.
    pub fn issues(&self) -> &[ValidationIssue] {
        match self {
            Self::ValidationFailed(issues) => issues,
            _ => &[],
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for MetaError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for MetaError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for MetaError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_migration_failed_keeps_cause() {
        let err = MetaError::migration_failed(
            "statement 2 failed",
            MetaError::Database("no such column: fax".into()),
        );
        assert_eq!(err.to_string(), "Migration failed: statement 2 failed");
        let cause = err.source().unwrap();
        assert_eq!(cause.to_string(), "Database error: no such column: fax");
    }

    #[test]
    fn test_validation_message_lists_issues() {
        let err = MetaError::ValidationFailed(vec![
            ValidationIssue::error(IssueKind::Required, "name", "name is required"),
            ValidationIssue::error(IssueKind::Duplicate, "email", "duplicate fieldname"),
        ]);
        assert_eq!(
            err.to_string(),
            "Validation failed: name: name is required; email: duplicate fieldname"
        );
        assert_eq!(err.issues().len(), 2);
    }

    #[test]
    fn test_issue_serializes_type_key() {
        let issue = ValidationIssue::error(IssueKind::MissingOptions, "owner", "Link needs options");
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["type"], "missing_options");
        assert_eq!(json["severity"], "error");
    }
}
