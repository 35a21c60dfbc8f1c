use super::{MigrationHistory, MigrationOptions, MigrationResult, SqlGenerator, Stage};
use crate::config::EngineConfig;
use crate::core::{MetaError, Result};
use crate::dialect::dialect_for;
use crate::driver::Database;
use crate::meta::MetaFactory;
use crate::model::Migration;
use crate::schema::{ColumnDef, IndexInfo, SchemaComparator, SchemaDiff};
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// Drives one DocType from its effective metadata to a migrated table.
///
/// Runs are independent of each other; callers serialize runs that target
/// the same table.
pub struct MigrationWorkflow {
    factory: Arc<MetaFactory>,
    database: Arc<dyn Database>,
    history: Arc<dyn MigrationHistory>,
    comparator: SchemaComparator,
    generator: SqlGenerator,
    allow_destructive: bool,
}

impl MigrationWorkflow {
    pub fn new(
        config: &EngineConfig,
        factory: Arc<MetaFactory>,
        database: Arc<dyn Database>,
        history: Arc<dyn MigrationHistory>,
    ) -> Self {
        let dialect = dialect_for(config);
        Self {
            factory,
            database,
            history,
            comparator: SchemaComparator::new(config, Arc::clone(&dialect)),
            generator: SqlGenerator::new(dialect),
            allow_destructive: config.allow_destructive,
        }
    }

    pub fn comparator(&self) -> &SchemaComparator {
        &self.comparator
    }

    pub fn generator(&self) -> &SqlGenerator {
        &self.generator
    }

    pub fn history(&self) -> &Arc<dyn MigrationHistory> {
        &self.history
    }

    /// Diff between the effective metadata of `doctype` and its live table.
    pub async fn compare(&self, doctype: &str) -> Result<SchemaDiff> {
        let meta = self.factory.get_meta(doctype).await?;
        let table = self.comparator.table_name(meta.name());
        let live = self.database.introspect(&table).await?;
        Ok(self.comparator.compare(&meta, live.as_ref()))
    }

    /// Same as a dry run of [`execute_migration`](Self::execute_migration).
    pub async fn plan(&self, doctype: &str) -> MigrationResult {
        self.execute_migration(doctype, MigrationOptions::new().dry_run(true))
            .await
    }

    pub async fn execute_migration(&self, doctype: &str, options: MigrationOptions) -> MigrationResult {
        let span = info_span!("migration", doctype = %doctype, dry_run = options.dry_run);
        self.run(doctype, options).instrument(span).await
    }

    async fn run(&self, doctype: &str, options: MigrationOptions) -> MigrationResult {
        let mut result = MigrationResult::new(options.dry_run);

        let meta = match self.factory.get_meta(doctype).await {
            Ok(meta) => meta,
            Err(err) => {
                event!(Level::ERROR, error = %err, "cannot load effective meta");
                return result.fail(err);
            }
        };

        result.stage = Stage::Comparing;
        let table = self.comparator.table_name(meta.name());
        let live = match self.database.introspect(&table).await {
            Ok(live) => live,
            Err(err) => return result.fail(err),
        };
        let diff = self.comparator.compare(&meta, live.as_ref());

        result.stage = Stage::Generating;
        let (columns, indexes): (Vec<ColumnDef>, Vec<IndexInfo>) = match &live {
            Some(live) => (self.comparator.live_columns(live), live.indexes.clone()),
            None => Default::default(),
        };
        result.sql = self.generator.generate(&diff, &columns, &indexes);
        result.rollback_sql = self.generator.rollback(&diff, &columns, &indexes);
        result.destructive = diff.is_destructive();
        event!(
            Level::INFO,
            summary = %diff.summary(),
            statements = result.sql.len(),
            destructive = result.destructive,
            "migration planned"
        );

        if options.validate_data && diff.table_exists {
            match self.check_rows(&diff).await {
                Ok(warnings) => result.warnings.extend(warnings),
                Err(err) => {
                    result.diff = Some(diff);
                    return result.fail(err);
                }
            }
        }
        result.diff = Some(diff.clone());

        if options.dry_run {
            return result.finish(Stage::DryRunComplete);
        }
        if diff.is_empty() {
            event!(Level::INFO, "table already matches metadata");
            return result.finish(Stage::Applied);
        }
        if result.destructive && !options.allow_destructive.unwrap_or(self.allow_destructive) {
            event!(Level::WARN, summary = %diff.summary(), "destructive migration blocked");
            return result.fail(MetaError::DestructiveChangeBlocked(diff.summary()));
        }

        result.stage = Stage::Executing;
        if let Err(err) = self.apply(&result.sql).await {
            return result.fail(err);
        }

        let version = match self.history.next_version(meta.name()).await {
            Ok(version) => version,
            Err(err) => {
                result.warnings.push(format!("migration applied but not recorded: {}", err));
                return result.finish(Stage::Applied);
            }
        };
        let mut migration = Migration::new(meta.name(), version, diff)
            .with_sql(result.sql.clone(), result.rollback_sql.clone());
        if let Some(description) = options.description {
            migration = migration.with_description(description);
        }
        migration.applied = true;

        if let Err(err) = self.history.record(migration.clone()).await {
            result.warnings.push(format!("migration applied but not recorded: {}", err));
        }
        event!(
            Level::INFO,
            version = migration.version,
            id = %migration.id,
            "migration applied"
        );
        result.migration = Some(migration);
        result.finish(Stage::Applied)
    }

    /// Reverts a recorded migration with its stored rollback statements.
    ///
    /// Only the latest migration still applied to its DocType can be
    /// reverted.
    pub async fn rollback_migration(&self, id: &str) -> MigrationResult {
        let span = info_span!("migration_rollback", id = %id);
        self.revert(id).instrument(span).await
    }

    async fn revert(&self, id: &str) -> MigrationResult {
        let mut result = MigrationResult::new(false);
        let migration = match self.history.get(id).await {
            Ok(migration) => migration,
            Err(err) => return result.fail(err),
        };
        result.destructive = migration.diff.inverse().is_destructive() || !migration.diff.table_exists;
        result.sql = migration.rollback_sql.clone();
        result.rollback_sql = migration.sql.clone();
        result.diff = Some(migration.diff.inverse());

        if !migration.applied {
            return result.fail(MetaError::MigrationFailed {
                message: format!("migration {} is already rolled back", id),
                source: None,
            });
        }
        match self.history.latest_applied(&migration.doctype).await {
            Ok(Some(latest)) if latest.id == migration.id => {}
            Ok(_) => {
                return result.fail(MetaError::MigrationFailed {
                    message: format!(
                        "migration {} is not the latest applied migration of {}",
                        id, migration.doctype
                    ),
                    source: None,
                });
            }
            Err(err) => return result.fail(err),
        }

        result.stage = Stage::Executing;
        if let Err(err) = self.apply(&migration.rollback_sql).await {
            return result.fail(err);
        }
        match self.history.mark_unapplied(id).await {
            Ok(updated) => result.migration = Some(updated),
            Err(err) => result
                .warnings
                .push(format!("rollback applied but history not updated: {}", err)),
        }
        event!(Level::INFO, doctype = %migration.doctype, version = migration.version, "migration rolled back");
        result.finish(Stage::Applied)
    }

    /// Runs `statements` in one transaction; the first failure rolls back
    /// everything.
    async fn apply(&self, statements: &[String]) -> Result<()> {
        let mut tx = self
            .database
            .begin()
            .await
            .map_err(|err| MetaError::migration_failed("cannot open transaction", err))?;

        for (i, sql) in statements.iter().enumerate() {
            if let Err(err) = tx.execute(sql, &[]).await {
                event!(
                    Level::ERROR,
                    statement = i + 1,
                    sql = %sql,
                    error = %err,
                    "migration statement failed, rolling back"
                );
                if let Err(rollback_err) = tx.rollback().await {
                    event!(Level::ERROR, error = %rollback_err, "rollback failed");
                }
                return Err(MetaError::migration_failed(
                    format!("statement {} of {} failed: {}", i + 1, statements.len(), sql),
                    err,
                ));
            }
            event!(Level::DEBUG, statement = i + 1, sql = %sql, "statement applied");
        }

        tx.commit()
            .await
            .map_err(|err| MetaError::migration_failed("commit failed", err))
    }

    /// Row counts that make the destructive parts of `diff` visible before
    /// they run.
    async fn check_rows(&self, diff: &SchemaDiff) -> Result<Vec<String>> {
        let d = self.generator.dialect();
        let table = d.quote_ident(&diff.table);
        let mut warnings = Vec::new();

        for modified in &diff.modified_columns {
            let source = diff
                .renamed_columns
                .iter()
                .find(|r| r.to == modified.fieldname)
                .map(|r| r.from.as_str())
                .unwrap_or(modified.fieldname.as_str());
            let column = d.quote_ident(source);

            if modified.tightens_nullability() {
                let nulls = self
                    .count(&format!("SELECT COUNT(*) FROM {} WHERE {} IS NULL", table, column))
                    .await?;
                if nulls > 0 {
                    let outcome = match &modified.to.default {
                        Some(default) => format!("will be set to {}", default),
                        None => "will make the migration fail".to_string(),
                    };
                    warnings.push(format!(
                        "{}: {} row(s) hold NULL and {}",
                        modified.fieldname, nulls, outcome
                    ));
                }
            }
            if let Some(length) = modified.narrows_length() {
                let long = self
                    .count(&format!(
                        "SELECT COUNT(*) FROM {} WHERE LENGTH({}) > {}",
                        table, column, length
                    ))
                    .await?;
                if long > 0 {
                    warnings.push(format!(
                        "{}: {} row(s) are longer than {} characters",
                        modified.fieldname, long, length
                    ));
                }
            }
        }

        let unfillable: Vec<&str> = diff
            .added_columns
            .iter()
            .filter(|a| !a.column.nullable && a.column.default.is_none())
            .map(|a| a.fieldname.as_str())
            .collect();
        if !unfillable.is_empty() {
            let rows = self.count(&format!("SELECT COUNT(*) FROM {}", table)).await?;
            if rows > 0 {
                for fieldname in unfillable {
                    warnings.push(format!(
                        "{}: NOT NULL without a default cannot be added to {} existing row(s)",
                        fieldname, rows
                    ));
                }
            }
        }

        for removed in &diff.removed_columns {
            let filled = self
                .count(&format!(
                    "SELECT COUNT(*) FROM {} WHERE {} IS NOT NULL",
                    table,
                    d.quote_ident(&removed.name)
                ))
                .await?;
            if filled > 0 {
                warnings.push(format!(
                    "{}: {} row(s) with data will be lost",
                    removed.name, filled
                ));
            }
        }

        for warning in &warnings {
            event!(Level::WARN, warning = %warning, "data check");
        }
        Ok(warnings)
    }

    async fn count(&self, sql: &str) -> Result<i64> {
        let rows = self.database.query(sql, &[]).await?;
        Ok(rows
            .first()
            .and_then(|row| row.first())
            .and_then(|value| value.as_i64())
            .unwrap_or(0))
    }
}

impl std::fmt::Debug for MigrationWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationWorkflow")
            .field("dialect", &self.generator.dialect().kind())
            .field("allow_destructive", &self.allow_destructive)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDatabase;
    use crate::migration::InMemoryMigrationHistory;
    use crate::model::{DocType, Field, FieldType};
    use crate::overlay::MetaOverlay;
    use crate::registry::DocTypeRegistry;

    struct Fixture {
        registry: Arc<DocTypeRegistry>,
        db: Arc<MemoryDatabase>,
        history: Arc<InMemoryMigrationHistory>,
        workflow: MigrationWorkflow,
    }

    fn fixture(config: EngineConfig) -> Fixture {
        let registry = Arc::new(DocTypeRegistry::new());
        let factory = MetaFactory::new(Arc::clone(&registry), Arc::new(MetaOverlay::new()), 16);
        let db = Arc::new(MemoryDatabase::new());
        let history = Arc::new(InMemoryMigrationHistory::new());
        let workflow = MigrationWorkflow::new(
            &config,
            factory,
            Arc::clone(&db) as Arc<dyn Database>,
            Arc::clone(&history) as Arc<dyn MigrationHistory>,
        );
        Fixture {
            registry,
            db,
            history,
            workflow,
        }
    }

    fn note() -> DocType {
        DocType::new("Note", "Desk")
            .with_field(Field::new("title", "Title", FieldType::Data).required())
            .with_field(Field::new("body", "Body", FieldType::LongText))
    }

    #[tokio::test]
    async fn test_unknown_doctype_is_reported() {
        let f = fixture(EngineConfig::new());
        let result = f.workflow.execute_migration("Ghost", MigrationOptions::new()).await;
        assert!(!result.success);
        assert_eq!(result.stage, Stage::Failed);
        assert!(result.errors[0].contains("not found"));
    }

    #[tokio::test]
    async fn test_fresh_table_then_in_sync() {
        let f = fixture(EngineConfig::new());
        f.registry.register(note()).await.unwrap();

        let plan = f.workflow.plan("Note").await;
        assert!(plan.success);
        assert_eq!(plan.stage, Stage::DryRunComplete);
        assert!(plan.sql[0].starts_with(r#"CREATE TABLE "tabNote""#));
        assert!(f.db.table_names().unwrap().is_empty());

        let applied = f.workflow.execute_migration("Note", MigrationOptions::new()).await;
        assert!(applied.is_applied(), "{:?}", applied.errors);
        assert_eq!(applied.migration.as_ref().unwrap().version, 1);
        assert_eq!(f.db.table_names().unwrap(), vec!["tabNote"]);

        let again = f.workflow.execute_migration("Note", MigrationOptions::new()).await;
        assert!(again.success);
        assert!(again.sql.is_empty());
        assert!(again.migration.is_none());
        assert_eq!(f.history.len(), 1);
    }

    #[tokio::test]
    async fn test_destructive_blocked_by_config() {
        let f = fixture(EngineConfig::new().allow_destructive(false));
        f.registry.register(note()).await.unwrap();
        f.db.execute(
            r#"CREATE TABLE "tabNote" ("title" VARCHAR(140) NOT NULL DEFAULT '', "body" TEXT, "fax" TEXT)"#,
            &[],
        )
        .await
        .unwrap();

        let blocked = f.workflow.execute_migration("Note", MigrationOptions::new()).await;
        assert!(!blocked.success);
        assert!(blocked.destructive);
        assert!(blocked.errors[0].contains("Destructive"));
        assert_eq!(f.db.introspect_columns("tabNote").await.unwrap().len(), 3);

        let forced = f
            .workflow
            .execute_migration("Note", MigrationOptions::new().allow_destructive(true))
            .await;
        assert!(forced.is_applied(), "{:?}", forced.errors);
        assert_eq!(f.db.introspect_columns("tabNote").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_validate_data_warns_about_lost_values() {
        let f = fixture(EngineConfig::new());
        f.registry.register(note()).await.unwrap();
        f.db.execute(
            r#"CREATE TABLE "tabNote" ("title" VARCHAR(140) NOT NULL DEFAULT '', "body" TEXT, "fax" TEXT)"#,
            &[],
        )
        .await
        .unwrap();
        f.db.execute(r#"INSERT INTO "tabNote" VALUES ('a', NULL, '555'), ('b', NULL, NULL)"#, &[])
            .await
            .unwrap();

        let plan = f
            .workflow
            .execute_migration("Note", MigrationOptions::new().dry_run(true).validate_data(true))
            .await;
        assert!(plan.success);
        assert_eq!(plan.warnings, vec!["fax: 1 row(s) with data will be lost".to_string()]);
    }

    #[tokio::test]
    async fn test_check_rows_flags_unfillable_added_column() {
        let f = fixture(EngineConfig::new());
        f.db.execute(r#"CREATE TABLE "tabNote" ("title" TEXT)"#, &[])
            .await
            .unwrap();

        let mut diff = SchemaDiff::new("tabNote", true);
        diff.added_columns.push(crate::schema::AddedColumn {
            fieldname: "shape".to_string(),
            column: ColumnDef::new(
                "shape",
                crate::schema::ColumnType::Other {
                    name: "GEOMETRY".to_string(),
                },
            )
            .not_null(),
        });
        assert!(f.workflow.check_rows(&diff).await.unwrap().is_empty());

        f.db.execute(r#"INSERT INTO "tabNote" VALUES ('a'), ('b')"#, &[])
            .await
            .unwrap();
        assert_eq!(
            f.workflow.check_rows(&diff).await.unwrap(),
            vec!["shape: NOT NULL without a default cannot be added to 2 existing row(s)".to_string()]
        );
    }

    #[tokio::test]
    async fn test_rollback_migration_restores_shape() {
        let f = fixture(EngineConfig::new());
        f.registry.register(note()).await.unwrap();
        f.db.execute(r#"CREATE TABLE "tabNote" ("title" VARCHAR(140) NOT NULL DEFAULT '')"#, &[])
            .await
            .unwrap();

        let applied = f.workflow.execute_migration("Note", MigrationOptions::new()).await;
        assert!(applied.is_applied(), "{:?}", applied.errors);
        assert_eq!(f.db.introspect_columns("tabNote").await.unwrap().len(), 2);
        let id = applied.migration.unwrap().id;

        let reverted = f.workflow.rollback_migration(&id).await;
        assert!(reverted.success, "{:?}", reverted.errors);
        assert_eq!(f.db.introspect_columns("tabNote").await.unwrap().len(), 1);
        assert!(!f.history.get(&id).await.unwrap().applied);

        let twice = f.workflow.rollback_migration(&id).await;
        assert!(!twice.success);
    }
}
