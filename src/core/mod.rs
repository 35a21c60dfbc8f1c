pub mod error;
pub mod invalidation;
pub mod value;

pub use error::{IssueKind, MetaError, ObjectKind, Result, Severity, ValidationIssue};
pub use invalidation::{InvalidationListener, Listeners};
pub use value::{Row, Value};
