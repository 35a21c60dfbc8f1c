use crate::core::{MetaError, ObjectKind, Result};
use crate::model::Migration;
use async_trait::async_trait;
use std::sync::RwLock;
use tracing::{Level, event};

/// Audit trail of applied migrations.
#[async_trait]
pub trait MigrationHistory: Send + Sync {
    async fn record(&self, migration: Migration) -> Result<()>;

    /// Migrations of `doctype`, oldest first.
    async fn list(&self, doctype: &str) -> Result<Vec<Migration>>;

    async fn get(&self, id: &str) -> Result<Migration>;

    /// Flags a migration as rolled back and returns the updated record.
    async fn mark_unapplied(&self, id: &str) -> Result<Migration>;

    async fn latest(&self, doctype: &str) -> Result<Option<Migration>> {
        Ok(self.list(doctype).await?.into_iter().last())
    }

    /// Latest migration of `doctype` that is still in effect.
    async fn latest_applied(&self, doctype: &str) -> Result<Option<Migration>> {
        Ok(self
            .list(doctype)
            .await?
            .into_iter()
            .filter(|m| m.applied)
            .last())
    }

    async fn next_version(&self, doctype: &str) -> Result<u32> {
        let highest = self
            .list(doctype)
            .await?
            .iter()
            .map(|m| m.version)
            .max()
            .unwrap_or(0);
        Ok(highest + 1)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMigrationHistory {
    records: RwLock<Vec<Migration>>,
}

impl InMemoryMigrationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MigrationHistory for InMemoryMigrationHistory {
    async fn record(&self, migration: Migration) -> Result<()> {
        let mut records = self.records.write()?;
        if records.iter().any(|m| m.id == migration.id) {
            return Err(MetaError::already_exists(ObjectKind::Migration, migration.id));
        }
        event!(
            Level::INFO,
            doctype = %migration.doctype,
            version = migration.version,
            id = %migration.id,
            "migration recorded"
        );
        records.push(migration);
        Ok(())
    }

    async fn list(&self, doctype: &str) -> Result<Vec<Migration>> {
        let mut found: Vec<Migration> = self
            .records
            .read()?
            .iter()
            .filter(|m| m.doctype == doctype)
            .cloned()
            .collect();
        found.sort_by_key(|m| m.version);
        Ok(found)
    }

    async fn get(&self, id: &str) -> Result<Migration> {
        self.records
            .read()?
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| MetaError::not_found(ObjectKind::Migration, id))
    }

    async fn mark_unapplied(&self, id: &str) -> Result<Migration> {
        let mut records = self.records.write()?;
        let migration = records
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| MetaError::not_found(ObjectKind::Migration, id))?;
        migration.applied = false;
        Ok(migration.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaDiff;

    fn applied(doctype: &str, version: u32) -> Migration {
        let mut m = Migration::new(doctype, version, SchemaDiff::new(format!("tab{}", doctype), true));
        m.applied = true;
        m
    }

    #[tokio::test]
    async fn test_versions_and_latest() {
        let history = InMemoryMigrationHistory::new();
        assert_eq!(history.next_version("User").await.unwrap(), 1);

        history.record(applied("User", 1)).await.unwrap();
        history.record(applied("User", 2)).await.unwrap();
        history.record(applied("Note", 1)).await.unwrap();

        assert_eq!(history.next_version("User").await.unwrap(), 3);
        assert_eq!(history.list("User").await.unwrap().len(), 2);
        assert_eq!(history.latest("User").await.unwrap().unwrap().version, 2);
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn test_mark_unapplied() {
        let history = InMemoryMigrationHistory::new();
        let first = applied("User", 1);
        let second = applied("User", 2);
        let id = second.id.clone();
        history.record(first).await.unwrap();
        history.record(second).await.unwrap();

        let updated = history.mark_unapplied(&id).await.unwrap();
        assert!(!updated.applied);
        assert_eq!(history.latest_applied("User").await.unwrap().unwrap().version, 1);
        assert!(history.get("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_duplicate_record_rejected() {
        let history = InMemoryMigrationHistory::new();
        let m = applied("User", 1);
        history.record(m.clone()).await.unwrap();
        assert!(matches!(
            history.record(m).await,
            Err(MetaError::AlreadyExists { .. })
        ));
    }
}
