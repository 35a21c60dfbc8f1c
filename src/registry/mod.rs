//! Authoritative store of DocType definitions.
//!
//! Writes go through a fair async mutex, so concurrent `register` and
//! `unregister` calls are applied one at a time in arrival order. The
//! current [`Catalog`] snapshot sits behind a std `RwLock` that is only held
//! for a pointer-sized clone or swap, so reads never wait for the queue.

pub mod catalog;
pub mod validation;

pub use catalog::Catalog;
pub use validation::{has_errors, validate, validate_field, validate_record};

use crate::core::{InvalidationListener, Listeners, MetaError, ObjectKind, Result, ValidationIssue};
use crate::model::DocType;
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::Mutex;
use tracing::{Level, event};

pub struct DocTypeRegistry {
    catalog: RwLock<Catalog>,
    write_queue: Mutex<()>,
    listeners: Listeners,
}

impl DocTypeRegistry {
    pub fn new() -> Self {
        Self {
            catalog: RwLock::new(Catalog::new()),
            write_queue: Mutex::new(()),
            listeners: Listeners::new(),
        }
    }

    /// Subscribes a cache to name invalidations.
    pub fn subscribe(&self, listener: Weak<dyn InvalidationListener>) {
        self.listeners.subscribe(listener);
    }

    /// Current snapshot. Cheap to clone, never blocks on writers.
    pub fn snapshot(&self) -> Result<Catalog> {
        Ok(self.catalog.read()?.clone())
    }

    /// Pure structural check; see [`validation::validate`].
    pub fn validate(&self, doctype: &DocType) -> Vec<ValidationIssue> {
        validate(doctype)
    }

    pub async fn register(&self, doctype: DocType) -> Result<Arc<DocType>> {
        let _turn = self.write_queue.lock().await;

        // Name clash is reported before validity.
        if self.snapshot()?.contains(&doctype.name) {
            return Err(MetaError::already_exists(ObjectKind::DocType, doctype.name));
        }
        let issues = validate(&doctype);
        if has_errors(&issues) {
            event!(Level::WARN, doctype = %doctype.name, issues = issues.len(), "DocType rejected");
            return Err(MetaError::ValidationFailed(issues));
        }

        let doctype = Arc::new(doctype);
        self.swap(|catalog| catalog.with_doctype(Arc::clone(&doctype)))?;
        event!(
            Level::INFO,
            doctype = %doctype.name,
            module = %doctype.module,
            fields = doctype.fields.len(),
            "DocType registered"
        );
        self.listeners.notify(&doctype.name);
        Ok(doctype)
    }

    /// Redefines an already registered DocType.
    ///
    /// Overlay records are keyed by name and survive the swap; cached
    /// metadata is invalidated.
    pub async fn replace(&self, doctype: DocType) -> Result<Arc<DocType>> {
        let _turn = self.write_queue.lock().await;

        if !self.snapshot()?.contains(&doctype.name) {
            return Err(MetaError::not_found(ObjectKind::DocType, doctype.name));
        }
        let issues = validate(&doctype);
        if has_errors(&issues) {
            return Err(MetaError::ValidationFailed(issues));
        }

        let doctype = Arc::new(doctype);
        self.swap(|catalog| catalog.replacing(Arc::clone(&doctype)))?;
        event!(Level::INFO, doctype = %doctype.name, "DocType replaced");
        self.listeners.notify(&doctype.name);
        Ok(doctype)
    }

    pub async fn unregister(&self, name: &str) -> Result<Arc<DocType>> {
        let _turn = self.write_queue.lock().await;

        let removed = self
            .snapshot()?
            .get(name)
            .ok_or_else(|| MetaError::not_found(ObjectKind::DocType, name))?;
        self.swap(|catalog| catalog.without_doctype(name))?;
        event!(Level::INFO, doctype = %name, "DocType unregistered");
        self.listeners.notify(name);
        Ok(removed)
    }

    fn swap(&self, f: impl FnOnce(&Catalog) -> Result<Catalog>) -> Result<()> {
        let current = self.snapshot()?;
        let next = f(&current)?;
        *self.catalog.write()? = next;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<DocType>> {
        self.snapshot()?
            .get(name)
            .ok_or_else(|| MetaError::not_found(ObjectKind::DocType, name))
    }

    pub fn get_all(&self) -> Result<Vec<Arc<DocType>>> {
        Ok(self.snapshot()?.all())
    }

    pub fn get_by_module(&self, module: &str) -> Result<Vec<Arc<DocType>>> {
        Ok(self.snapshot()?.by_module(module))
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.catalog
            .read()
            .map(|c| c.contains(name))
            .unwrap_or(false)
    }

    pub fn count(&self) -> usize {
        self.catalog.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn count_by_module(&self, module: &str) -> usize {
        self.catalog
            .read()
            .map(|c| c.count_by_module(module))
            .unwrap_or(0)
    }

    pub fn modules(&self) -> Result<Vec<String>> {
        Ok(self.snapshot()?.modules())
    }
}

impl Default for DocTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DocTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocTypeRegistry")
            .field("count", &self.count())
            .field("listeners", &self.listeners)
            .finish()
    }
}
