//! SQL rendering per backend.
//!
//! A dialect knows how to spell column types and DDL statements, and which
//! `ALTER TABLE` forms the backend supports. Everything above this layer
//! works with [`ColumnType`] and [`ColumnDef`] only.

pub mod postgres;
pub mod sqlite;

pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use crate::config::{DialectKind, EngineConfig};
use crate::schema::{ColumnDef, ColumnType, IndexInfo};
use std::fmt::Debug;
use std::sync::Arc;

pub trait SqlDialect: Send + Sync + Debug {
    fn kind(&self) -> DialectKind;

    fn render_type(&self, ty: &ColumnType) -> String;

    /// Reads an introspected type name back into a [`ColumnType`].
    fn parse_type(&self, raw: &str) -> ColumnType;

    /// `ALTER TABLE .. ALTER COLUMN` for type, nullability and default.
    fn supports_alter_column(&self) -> bool;

    fn supports_drop_column(&self) -> bool;

    /// The type the backend will report after storing `ty`.
    fn canonical_type(&self, ty: &ColumnType) -> ColumnType {
        self.parse_type(&self.render_type(ty))
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn cast(&self, expr: &str, ty: &ColumnType) -> String {
        format!("CAST({} AS {})", expr, self.render_type(ty))
    }

    fn column_definition(&self, column: &ColumnDef) -> String {
        let mut sql = format!(
            "{} {}",
            self.quote_ident(&column.name),
            self.render_type(&column.column_type)
        );
        if column.primary_key {
            sql.push_str(" PRIMARY KEY");
        } else if !column.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }

    fn create_table(&self, table: &str, columns: &[ColumnDef]) -> String {
        let body = columns
            .iter()
            .map(|c| self.column_definition(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE {} ({})", self.quote_ident(table), body)
    }

    fn drop_table(&self, table: &str) -> String {
        format!("DROP TABLE {}", self.quote_ident(table))
    }

    fn rename_table(&self, from: &str, to: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote_ident(from),
            self.quote_ident(to)
        )
    }

    fn add_column(&self, table: &str, column: &ColumnDef) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote_ident(table),
            self.column_definition(column)
        )
    }

    fn drop_column(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote_ident(table),
            self.quote_ident(column)
        )
    }

    fn rename_column(&self, table: &str, from: &str, to: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            self.quote_ident(table),
            self.quote_ident(from),
            self.quote_ident(to)
        )
    }

    /// Native statements turning `from` into `to`. Empty when the backend
    /// has no `ALTER COLUMN`; callers then fall back to a column swap or
    /// a table rebuild.
    fn alter_column(&self, _table: &str, _from: &ColumnDef, _to: &ColumnDef) -> Vec<String> {
        Vec::new()
    }

    fn create_index(&self, table: &str, index: &IndexInfo) -> String {
        let columns = index
            .columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.quote_ident(&index.name),
            self.quote_ident(table),
            columns
        );
        if let Some(predicate) = &index.predicate {
            sql.push_str(" WHERE ");
            sql.push_str(predicate);
        }
        sql
    }

    fn drop_index(&self, index_name: &str) -> String {
        format!("DROP INDEX IF EXISTS {}", self.quote_ident(index_name))
    }
}

pub fn dialect_for(config: &EngineConfig) -> Arc<dyn SqlDialect> {
    match config.dialect {
        DialectKind::Sqlite => Arc::new(SqliteDialect::new(config.sqlite_drop_column)),
        DialectKind::Postgres => Arc::new(PostgresDialect),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_for_config() {
        let sqlite = dialect_for(&EngineConfig::new());
        assert_eq!(sqlite.kind(), DialectKind::Sqlite);
        assert!(sqlite.supports_drop_column());

        let rebuild = dialect_for(&EngineConfig::new().sqlite_drop_column(false));
        assert!(!rebuild.supports_drop_column());

        let pg = dialect_for(&EngineConfig::new().dialect(DialectKind::Postgres));
        assert!(pg.supports_alter_column());
    }

    #[test]
    fn test_shared_statement_shapes() {
        let d = SqliteDialect::new(true);
        let email = ColumnDef::new("email", ColumnType::Varchar { length: 140 })
            .not_null()
            .with_default("''");
        assert_eq!(
            d.add_column("tabUser", &email),
            r#"ALTER TABLE "tabUser" ADD COLUMN "email" VARCHAR(140) NOT NULL DEFAULT ''"#
        );
        assert_eq!(
            d.rename_column("tabUser", "mobile", "phone"),
            r#"ALTER TABLE "tabUser" RENAME COLUMN "mobile" TO "phone""#
        );
        let idx = IndexInfo::new("idx_tabuser_email", ["email"], true).with_predicate("\"email\" <> ''");
        assert_eq!(
            d.create_index("tabUser", &idx),
            r#"CREATE UNIQUE INDEX "idx_tabuser_email" ON "tabUser" ("email") WHERE "email" <> ''"#
        );
        assert_eq!(d.quote_ident("we\"ird"), r#""we""ird""#);
    }
}
