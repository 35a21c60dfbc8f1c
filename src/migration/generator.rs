use crate::dialect::SqlDialect;
use crate::schema::{ColumnDef, IndexInfo, ModifiedColumn, SchemaDiff};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const TEMP_PREFIX: &str = "__tmp_";

/// Indexes SQLite creates by itself; they vanish and reappear with the table.
fn is_backend_index(index: &IndexInfo) -> bool {
    index.name.starts_with("sqlite_autoindex_")
}

/// Turns a [`SchemaDiff`] into ordered DDL for one dialect.
///
/// Statement order is fixed: renames, added columns, modified columns,
/// removed columns, added indexes, removed indexes. A fresh table is one
/// `CREATE TABLE` followed by its indexes. When the backend can neither
/// alter a column in place nor swap it through a temporary column, the whole
/// diff is applied as a single table rebuild instead.
#[derive(Debug, Clone)]
pub struct SqlGenerator {
    dialect: Arc<dyn SqlDialect>,
}

impl SqlGenerator {
    pub fn new(dialect: Arc<dyn SqlDialect>) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> &Arc<dyn SqlDialect> {
        &self.dialect
    }

    /// Statements applying `diff` to a table currently shaped as
    /// `columns`/`indexes`.
    pub fn generate(&self, diff: &SchemaDiff, columns: &[ColumnDef], indexes: &[IndexInfo]) -> Vec<String> {
        if !diff.table_exists {
            return self.create_table(diff);
        }
        if diff.is_empty() {
            return Vec::new();
        }
        if self.needs_rebuild(diff, indexes) {
            return self.rebuild(diff, columns, indexes);
        }

        let d = &self.dialect;
        let table = diff.table.as_str();
        let mut sql = Vec::new();
        let mut dropped: HashSet<String> = HashSet::new();
        let mut live_indexes: Vec<IndexInfo> = indexes.to_vec();

        for rename in &diff.renamed_columns {
            sql.push(d.rename_column(table, &rename.from, &rename.to));
            for idx in &mut live_indexes {
                for col in idx.columns.iter_mut().filter(|c| **c == rename.from) {
                    *col = rename.to.clone();
                }
            }
        }

        for added in &diff.added_columns {
            sql.push(d.add_column(table, &added.column));
        }

        for modified in &diff.modified_columns {
            if d.supports_alter_column() {
                sql.extend(self.alter_in_place(table, modified));
            } else {
                sql.extend(self.swap_column(table, modified, &live_indexes, &dropped));
            }
        }

        for removed in &diff.removed_columns {
            for idx in live_indexes.iter().filter(|idx| idx.covers(&removed.name)) {
                if dropped.insert(idx.name.clone()) {
                    sql.push(d.drop_index(&idx.name));
                }
            }
            sql.push(d.drop_column(table, &removed.name));
        }

        for index in &diff.added_indexes {
            // A reshaped index keeps its name, so the old one must go first.
            if diff.removed_indexes.iter().any(|r| r.name == index.name) && dropped.insert(index.name.clone()) {
                sql.push(d.drop_index(&index.name));
            }
            sql.push(d.create_index(table, index));
        }

        for index in &diff.removed_indexes {
            if dropped.insert(index.name.clone()) {
                sql.push(d.drop_index(&index.name));
            }
        }
        sql
    }

    /// Statements undoing `diff` once it has been applied to a table shaped
    /// as `columns`/`indexes`.
    pub fn rollback(&self, diff: &SchemaDiff, columns: &[ColumnDef], indexes: &[IndexInfo]) -> Vec<String> {
        if !diff.table_exists {
            return vec![self.dialect.drop_table(&diff.table)];
        }
        let after_columns = diff.apply_to(columns);
        let after_indexes = diff.apply_to_indexes(indexes);
        self.generate(&diff.inverse(), &after_columns, &after_indexes)
    }

    fn create_table(&self, diff: &SchemaDiff) -> Vec<String> {
        let columns: Vec<ColumnDef> = diff.added_columns.iter().map(|a| a.column.clone()).collect();
        let mut sql = vec![self.dialect.create_table(&diff.table, &columns)];
        sql.extend(
            diff.added_indexes
                .iter()
                .map(|idx| self.dialect.create_index(&diff.table, idx)),
        );
        sql
    }

    fn needs_rebuild(&self, diff: &SchemaDiff, indexes: &[IndexInfo]) -> bool {
        let d = &self.dialect;
        if !diff.removed_columns.is_empty() && !d.supports_drop_column() {
            return true;
        }
        if d.supports_alter_column() {
            return false;
        }
        diff.modified_columns
            .iter()
            .any(|m| !self.can_swap(m, indexes))
    }

    /// A column can be swapped through a temporary twin when the backend can
    /// drop columns and the twin can be added to a populated table.
    fn can_swap(&self, modified: &ModifiedColumn, indexes: &[IndexInfo]) -> bool {
        self.dialect.supports_drop_column()
            && !modified.from.primary_key
            && (modified.to.nullable || modified.to.default.is_some())
            && !indexes
                .iter()
                .any(|idx| is_backend_index(idx) && idx.covers(&modified.fieldname))
    }

    fn alter_in_place(&self, table: &str, modified: &ModifiedColumn) -> Vec<String> {
        let d = &self.dialect;
        let mut statements = d.alter_column(table, &modified.from, &modified.to);
        if modified.tightens_nullability() {
            if let Some(default) = &modified.to.default {
                let column = d.quote_ident(&modified.fieldname);
                let backfill = format!(
                    "UPDATE {} SET {} = {} WHERE {} IS NULL",
                    d.quote_ident(table),
                    column,
                    default,
                    column
                );
                let at = statements
                    .iter()
                    .position(|s| s.ends_with("SET NOT NULL"))
                    .unwrap_or(statements.len());
                statements.insert(at, backfill);
            }
        }
        statements
    }

    /// Add twin, copy converted values, drop original, rename twin. Indexes
    /// on the column are dropped before and recreated after.
    fn swap_column(
        &self,
        table: &str,
        modified: &ModifiedColumn,
        indexes: &[IndexInfo],
        dropped: &HashSet<String>,
    ) -> Vec<String> {
        let d = &self.dialect;
        let name = modified.fieldname.as_str();
        let twin = format!("{}{}", TEMP_PREFIX, name);
        let covering: Vec<&IndexInfo> = indexes
            .iter()
            .filter(|idx| idx.covers(name) && !dropped.contains(&idx.name))
            .collect();

        let mut sql: Vec<String> = covering.iter().map(|idx| d.drop_index(&idx.name)).collect();
        sql.push(d.add_column(table, &modified.to.renamed(&twin)));
        sql.push(format!(
            "UPDATE {} SET {} = {}",
            d.quote_ident(table),
            d.quote_ident(&twin),
            self.converted(name, &modified.to)
        ));
        sql.push(d.drop_column(table, name));
        sql.push(d.rename_column(table, &twin, name));
        sql.extend(covering.iter().map(|idx| d.create_index(table, idx)));
        sql
    }

    /// `source` read as the target column's type, with NULLs replaced by
    /// the default when the target is NOT NULL.
    fn converted(&self, source: &str, target: &ColumnDef) -> String {
        let cast = self
            .dialect
            .cast(&self.dialect.quote_ident(source), &target.column_type);
        match (&target.default, target.nullable) {
            (Some(default), false) => format!("COALESCE({}, {})", cast, default),
            _ => cast,
        }
    }

    /// Create the target shape under a temporary name, copy rows across,
    /// drop the original and move the copy into place.
    fn rebuild(&self, diff: &SchemaDiff, columns: &[ColumnDef], indexes: &[IndexInfo]) -> Vec<String> {
        let d = &self.dialect;
        let table = diff.table.as_str();
        let temp = format!("{}{}", TEMP_PREFIX, table);
        let target = diff.apply_to(columns);
        let target_indexes = diff.apply_to_indexes(indexes);

        let origin: HashMap<&str, &str> = diff
            .renamed_columns
            .iter()
            .map(|r| (r.to.as_str(), r.from.as_str()))
            .collect();
        let added: HashSet<&str> = diff.added_columns.iter().map(|a| a.fieldname.as_str()).collect();
        let modified: HashSet<&str> = diff
            .modified_columns
            .iter()
            .map(|m| m.fieldname.as_str())
            .collect();

        let mut into = Vec::new();
        let mut select = Vec::new();
        for column in target.iter().filter(|c| !added.contains(c.name.as_str())) {
            let source = origin.get(column.name.as_str()).copied().unwrap_or(&column.name);
            into.push(d.quote_ident(&column.name));
            if modified.contains(column.name.as_str()) {
                select.push(self.converted(source, column));
            } else {
                select.push(d.quote_ident(source));
            }
        }

        let mut sql = vec![d.create_table(&temp, &target)];
        if !into.is_empty() {
            sql.push(format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                d.quote_ident(&temp),
                into.join(", "),
                select.join(", "),
                d.quote_ident(table)
            ));
        }
        sql.push(d.drop_table(table));
        sql.push(d.rename_table(&temp, table));
        sql.extend(
            target_indexes
                .iter()
                .filter(|idx| !is_backend_index(idx))
                .map(|idx| d.create_index(table, idx)),
        );
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgresDialect, SqliteDialect};
    use crate::schema::{AddedColumn, ColumnType, RemovedColumn, RenamedColumn};

    fn varchar(name: &str) -> ColumnDef {
        ColumnDef::new(name, ColumnType::Varchar { length: 140 })
    }

    fn sqlite(drop_column: bool) -> SqlGenerator {
        SqlGenerator::new(Arc::new(SqliteDialect::new(drop_column)))
    }

    #[test]
    fn test_fresh_table_is_one_create() {
        let mut diff = SchemaDiff::new("tabUser", false);
        diff.added_columns.push(AddedColumn {
            fieldname: "email".into(),
            column: varchar("email").not_null().with_default("''"),
        });
        diff.added_indexes
            .push(IndexInfo::new("unique_tabuser_email", ["email"], true));

        let generator = sqlite(true);
        let sql = generator.generate(&diff, &[], &[]);
        assert_eq!(
            sql,
            vec![
                r#"CREATE TABLE "tabUser" ("email" VARCHAR(140) NOT NULL DEFAULT '')"#.to_string(),
                r#"CREATE UNIQUE INDEX "unique_tabuser_email" ON "tabUser" ("email")"#.to_string(),
            ]
        );
        assert_eq!(
            generator.rollback(&diff, &[], &[]),
            vec![r#"DROP TABLE "tabUser""#.to_string()]
        );
    }

    #[test]
    fn test_statement_order() {
        let live = vec![varchar("mobile"), varchar("fax"), varchar("qty")];
        let live_indexes = vec![IndexInfo::new("idx_fax", ["fax"], false)];
        let mut diff = SchemaDiff::new("tabContact", true);
        diff.renamed_columns.push(RenamedColumn {
            from: "mobile".into(),
            to: "phone".into(),
        });
        diff.added_columns.push(AddedColumn {
            fieldname: "email".into(),
            column: varchar("email"),
        });
        diff.modified_columns.extend(ModifiedColumn::between(
            "qty",
            &varchar("qty"),
            &ColumnDef::new("qty", ColumnType::Integer),
        ));
        diff.removed_columns.push(RemovedColumn {
            name: "fax".into(),
            column: varchar("fax"),
        });
        diff.removed_indexes.push(live_indexes[0].clone());

        let sql = SqlGenerator::new(Arc::new(PostgresDialect)).generate(&diff, &live, &live_indexes);
        assert_eq!(
            sql,
            vec![
                r#"ALTER TABLE "tabContact" RENAME COLUMN "mobile" TO "phone""#.to_string(),
                r#"ALTER TABLE "tabContact" ADD COLUMN "email" VARCHAR(140)"#.to_string(),
                r#"ALTER TABLE "tabContact" ALTER COLUMN "qty" TYPE BIGINT USING CAST("qty" AS BIGINT)"#
                    .to_string(),
                r#"DROP INDEX IF EXISTS "idx_fax""#.to_string(),
                r#"ALTER TABLE "tabContact" DROP COLUMN "fax""#.to_string(),
            ]
        );
    }

    #[test]
    fn test_sqlite_swaps_modified_column() {
        let from = ColumnDef::new("qty", ColumnType::Text);
        let to = ColumnDef::new("qty", ColumnType::Integer).not_null().with_default("0");
        let mut diff = SchemaDiff::new("tabItem", true);
        diff.modified_columns.extend(ModifiedColumn::between("qty", &from, &to));

        let sql = sqlite(true).generate(&diff, &[from], &[]);
        assert_eq!(
            sql,
            vec![
                r#"ALTER TABLE "tabItem" ADD COLUMN "__tmp_qty" INTEGER NOT NULL DEFAULT 0"#.to_string(),
                r#"UPDATE "tabItem" SET "__tmp_qty" = COALESCE(CAST("qty" AS INTEGER), 0)"#.to_string(),
                r#"ALTER TABLE "tabItem" DROP COLUMN "qty""#.to_string(),
                r#"ALTER TABLE "tabItem" RENAME COLUMN "__tmp_qty" TO "qty""#.to_string(),
            ]
        );
    }

    #[test]
    fn test_postgres_backfills_before_not_null() {
        let from = varchar("status");
        let to = varchar("status").not_null().with_default("'Open'");
        let mut diff = SchemaDiff::new("tabTask", true);
        diff.modified_columns.extend(ModifiedColumn::between("status", &from, &to));

        let sql = SqlGenerator::new(Arc::new(PostgresDialect)).generate(&diff, &[from], &[]);
        assert_eq!(
            sql,
            vec![
                r#"ALTER TABLE "tabTask" ALTER COLUMN "status" SET DEFAULT 'Open'"#.to_string(),
                r#"UPDATE "tabTask" SET "status" = 'Open' WHERE "status" IS NULL"#.to_string(),
                r#"ALTER TABLE "tabTask" ALTER COLUMN "status" SET NOT NULL"#.to_string(),
            ]
        );
    }

    #[test]
    fn test_rebuild_without_drop_column() {
        let mut id = varchar("name");
        id.primary_key = true;
        let live = vec![id.clone(), varchar("email"), varchar("fax")];
        let mut diff = SchemaDiff::new("tabUser", true);
        diff.removed_columns.push(RemovedColumn {
            name: "fax".into(),
            column: varchar("fax"),
        });

        let sql = sqlite(false).generate(&diff, &live, &[]);
        assert_eq!(
            sql,
            vec![
                r#"CREATE TABLE "__tmp_tabUser" ("name" VARCHAR(140) PRIMARY KEY, "email" VARCHAR(140))"#
                    .to_string(),
                r#"INSERT INTO "__tmp_tabUser" ("name", "email") SELECT "name", "email" FROM "tabUser""#
                    .to_string(),
                r#"DROP TABLE "tabUser""#.to_string(),
                r#"ALTER TABLE "__tmp_tabUser" RENAME TO "tabUser""#.to_string(),
            ]
        );
    }

    #[test]
    fn test_reshaped_index_dropped_before_create() {
        let old = IndexInfo::new("idx_code", ["code"], false);
        let new = IndexInfo::new("idx_code", ["code"], true);
        let mut diff = SchemaDiff::new("tabItem", true);
        diff.removed_indexes.push(old.clone());
        diff.added_indexes.push(new);

        let sql = sqlite(true).generate(&diff, &[varchar("code")], &[old]);
        assert_eq!(
            sql,
            vec![
                r#"DROP INDEX IF EXISTS "idx_code""#.to_string(),
                r#"CREATE UNIQUE INDEX "idx_code" ON "tabItem" ("code")"#.to_string(),
            ]
        );
    }

    #[test]
    fn test_rollback_inverts_added_column() {
        let mut diff = SchemaDiff::new("tabUser", true);
        diff.added_columns.push(AddedColumn {
            fieldname: "phone".into(),
            column: varchar("phone"),
        });
        let rollback = sqlite(true).rollback(&diff, &[varchar("email")], &[]);
        assert_eq!(
            rollback,
            vec![r#"ALTER TABLE "tabUser" DROP COLUMN "phone""#.to_string()]
        );
    }
}
