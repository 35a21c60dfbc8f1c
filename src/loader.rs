//! Declarative DocType records on disk.
//!
//! One JSON object per `*.json` file. Records are checked with
//! [`validate_record`] before they are typed, so a malformed file yields a
//! list of findings instead of a single serde message.

use crate::core::{MetaError, Result};
use crate::model::DocType;
use crate::registry::{DocTypeRegistry, has_errors, validate_record};
use serde_json::Value as Json;
use std::path::{Path, PathBuf};
use tracing::{Level, event};

/// A record that could not be loaded or registered.
#[derive(Debug)]
pub struct LoadFailure {
    pub path: PathBuf,
    pub error: MetaError,
}

/// Outcome of a batch load.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failures: Vec<LoadFailure>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DocTypeLoader;

impl DocTypeLoader {
    /// Parses one record from JSON text.
    pub fn parse(json: &str) -> Result<DocType> {
        let record: Json = serde_json::from_str(json)?;
        let issues = validate_record(&record);
        if has_errors(&issues) {
            return Err(MetaError::ValidationFailed(issues));
        }
        Ok(serde_json::from_value(record)?)
    }

    pub async fn load_file<P: AsRef<Path>>(path: P) -> Result<DocType> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| MetaError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
        let doctype = Self::parse(&raw)?;
        event!(Level::DEBUG, path = %path.display(), doctype = %doctype.name, "DocType record loaded");
        Ok(doctype)
    }

    /// Every `*.json` record in `dir`, in file name order. Records that fail
    /// to load are reported next to the ones that succeeded.
    pub async fn load_dir<P: AsRef<Path>>(dir: P) -> Result<(Vec<DocType>, Vec<LoadFailure>)> {
        let (loaded, failures) = Self::load_entries(dir.as_ref()).await?;
        Ok((loaded.into_iter().map(|(_, doctype)| doctype).collect(), failures))
    }

    async fn load_entries(dir: &Path) -> Result<(Vec<(PathBuf, DocType)>, Vec<LoadFailure>)> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") && entry.file_type().await?.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut loaded = Vec::with_capacity(paths.len());
        let mut failures = Vec::new();
        for path in paths {
            match Self::load_file(&path).await {
                Ok(doctype) => loaded.push((path, doctype)),
                Err(error) => {
                    event!(Level::WARN, path = %path.display(), error = %error, "DocType record skipped");
                    failures.push(LoadFailure { path, error });
                }
            }
        }
        Ok((loaded, failures))
    }

    /// Loads `dir` and registers every record. A bad or duplicate record is
    /// reported without stopping the batch.
    pub async fn register_all<P: AsRef<Path>>(registry: &DocTypeRegistry, dir: P) -> Result<LoadReport> {
        let dir = dir.as_ref();
        let (loaded, failures) = Self::load_entries(dir).await?;
        let mut report = LoadReport {
            loaded: Vec::new(),
            failures,
        };

        for (path, doctype) in loaded {
            let name = doctype.name.clone();
            match registry.register(doctype).await {
                Ok(_) => report.loaded.push(name),
                Err(error) => report.failures.push(LoadFailure { path, error }),
            }
        }
        event!(
            Level::INFO,
            dir = %dir.display(),
            loaded = report.loaded.len(),
            failed = report.failures.len(),
            "DocType directory registered"
        );
        Ok(report)
    }
}
