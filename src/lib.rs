// ============================================================================
// DocMeta Library
// ============================================================================

pub mod config;
pub mod core;
pub mod dialect;
pub mod driver;
pub mod loader;
pub mod meta;
pub mod migration;
pub mod model;
pub mod overlay;
pub mod registry;
pub mod schema;

// Re-export main types for convenience
pub use config::{DialectKind, EngineConfig};
pub use crate::core::{IssueKind, MetaError, ObjectKind, Result, Severity, ValidationIssue, Value};
pub use driver::{Database, MemoryDatabase, Transaction};
pub use loader::{DocTypeLoader, LoadFailure, LoadReport};
pub use meta::{MergedMeta, MetaFactory, PreloadReport};
pub use migration::{
    InMemoryMigrationHistory, MigrationHistory, MigrationOptions, MigrationResult,
    MigrationWorkflow, SqlGenerator, Stage,
};
pub use model::{
    CustomField, DocType, Field, FieldType, Index, Migration, Permission, PropertySetter,
    PropertyValue,
};
pub use overlay::{CustomFieldQuery, MetaOverlay};
pub use registry::DocTypeRegistry;
pub use schema::{SchemaComparator, SchemaDiff};

use std::path::Path;
use std::sync::Arc;

// ============================================================================
// Engine facade
// ============================================================================

/// Registry, overlay, metadata cache and migration workflow wired together.
///
/// Every service is also reachable on its own; the facade only saves the
/// wiring and offers the operations most callers need.
///
/// # Examples
///
/// ```
/// use docmeta::{DocType, EngineConfig, Field, FieldType, MemoryDatabase, MetaEngine, MigrationOptions};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let engine = MetaEngine::new(EngineConfig::new(), Arc::new(MemoryDatabase::new())).unwrap();
/// engine
///     .register(DocType::new("Note", "Desk").with_field(Field::new("title", "Title", FieldType::Data)))
///     .await
///     .unwrap();
///
/// let result = engine.execute_migration("Note", MigrationOptions::new()).await;
/// assert!(result.success);
/// # });
/// ```
pub struct MetaEngine {
    config: EngineConfig,
    registry: Arc<DocTypeRegistry>,
    overlay: Arc<MetaOverlay>,
    factory: Arc<MetaFactory>,
    workflow: MigrationWorkflow,
}

impl MetaEngine {
    /// Engine with an in-memory migration history.
    pub fn new(config: EngineConfig, database: Arc<dyn Database>) -> Result<Self> {
        Self::with_history(config, database, Arc::new(InMemoryMigrationHistory::new()))
    }

    pub fn with_history(
        config: EngineConfig,
        database: Arc<dyn Database>,
        history: Arc<dyn MigrationHistory>,
    ) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(DocTypeRegistry::new());
        let overlay = Arc::new(MetaOverlay::new());
        let factory = MetaFactory::new(
            Arc::clone(&registry),
            Arc::clone(&overlay),
            config.meta_cache_capacity,
        );
        let workflow = MigrationWorkflow::new(&config, Arc::clone(&factory), database, history);
        Ok(Self {
            config,
            registry,
            overlay,
            factory,
            workflow,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DocTypeRegistry> {
        &self.registry
    }

    pub fn overlay(&self) -> &Arc<MetaOverlay> {
        &self.overlay
    }

    pub fn factory(&self) -> &Arc<MetaFactory> {
        &self.factory
    }

    pub fn workflow(&self) -> &MigrationWorkflow {
        &self.workflow
    }

    pub async fn register(&self, doctype: DocType) -> Result<Arc<DocType>> {
        self.registry.register(doctype).await
    }

    /// Registers every `*.json` record in `dir`.
    pub async fn load_dir<P: AsRef<Path>>(&self, dir: P) -> Result<LoadReport> {
        DocTypeLoader::register_all(&self.registry, dir).await
    }

    /// Adds a custom field to a registered DocType.
    pub fn add_custom_field(&self, custom: CustomField) -> Result<CustomField> {
        let base = self.registry.get(&custom.dt)?;
        self.overlay.create_custom_field(custom, &base.fieldnames())
    }

    /// Stores a property setter for a registered DocType. Field setters
    /// must leave the effective field valid.
    pub fn set_property(
        &self,
        doctype: &str,
        fieldname: Option<&str>,
        property: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<PropertySetter> {
        let base = self.registry.get(doctype)?;
        self.overlay.set_property_on(&base, fieldname, property, value)
    }

    pub async fn get_effective_meta(&self, doctype: &str) -> Result<Arc<MergedMeta>> {
        self.factory.get_meta(doctype).await
    }

    pub async fn execute_migration(&self, doctype: &str, options: MigrationOptions) -> MigrationResult {
        self.workflow.execute_migration(doctype, options).await
    }

    /// Migrates every registered DocType in name order, one at a time.
    pub async fn migrate_all(&self, options: MigrationOptions) -> Result<Vec<(String, MigrationResult)>> {
        let mut names: Vec<String> = self
            .registry
            .get_all()?
            .iter()
            .map(|d| d.name.clone())
            .collect();
        names.sort();

        let mut results = Vec::with_capacity(names.len());
        for name in names {
            let result = self.workflow.execute_migration(&name, options.clone()).await;
            results.push((name, result));
        }
        Ok(results)
    }
}

impl std::fmt::Debug for MetaEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaEngine")
            .field("dialect", &self.config.dialect)
            .field("doctypes", &self.registry.count())
            .field("factory", &self.factory)
            .finish()
    }
}
