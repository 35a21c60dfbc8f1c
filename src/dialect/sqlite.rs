use super::SqlDialect;
use crate::config::DialectKind;
use crate::schema::ColumnType;

/// SQLite: booleans are stored as INTEGER, JSON as TEXT, and there is no
/// `ALTER COLUMN`. `DROP COLUMN` exists from 3.35 on and can be turned off
/// to force table rebuilds on older engines.
#[derive(Debug, Clone, Copy)]
pub struct SqliteDialect {
    drop_column: bool,
}

impl SqliteDialect {
    pub fn new(drop_column: bool) -> Self {
        Self { drop_column }
    }
}

impl Default for SqliteDialect {
    fn default() -> Self {
        Self::new(true)
    }
}

impl SqlDialect for SqliteDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn render_type(&self, ty: &ColumnType) -> String {
        match ty {
            ColumnType::Varchar { length } => format!("VARCHAR({})", length),
            ColumnType::Integer | ColumnType::Boolean => "INTEGER".to_string(),
            ColumnType::Decimal { precision, scale } => {
                format!("DECIMAL({},{})", precision, scale)
            }
            ColumnType::Float => "REAL".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Timestamp => "DATETIME".to_string(),
            ColumnType::Time => "TIME".to_string(),
            ColumnType::Text | ColumnType::Json => "TEXT".to_string(),
            ColumnType::Other { name } => name.clone(),
        }
    }

    fn parse_type(&self, raw: &str) -> ColumnType {
        match ColumnType::parse(raw) {
            ColumnType::Boolean => ColumnType::Integer,
            ColumnType::Json => ColumnType::Text,
            other => other,
        }
    }

    fn supports_alter_column(&self) -> bool {
        false
    }

    fn supports_drop_column(&self) -> bool {
        self.drop_column
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;

    #[test]
    fn test_boolean_is_integer() {
        let d = SqliteDialect::default();
        assert_eq!(d.render_type(&ColumnType::Boolean), "INTEGER");
        assert_eq!(d.canonical_type(&ColumnType::Boolean), ColumnType::Integer);
        assert_eq!(d.parse_type("BOOLEAN"), ColumnType::Integer);
        assert_eq!(d.canonical_type(&ColumnType::Json), ColumnType::Text);
    }

    #[test]
    fn test_no_native_alter() {
        let d = SqliteDialect::default();
        let from = ColumnDef::new("qty", ColumnType::Text);
        let to = ColumnDef::new("qty", ColumnType::Integer);
        assert!(d.alter_column("tabItem", &from, &to).is_empty());
        assert!(!d.supports_alter_column());
    }

    #[test]
    fn test_create_table() {
        let d = SqliteDialect::default();
        let mut id = ColumnDef::new("name", ColumnType::Varchar { length: 140 });
        id.primary_key = true;
        let enabled = ColumnDef::new("enabled", ColumnType::Boolean)
            .not_null()
            .with_default("0");
        assert_eq!(
            d.create_table("tabUser", &[id, enabled]),
            r#"CREATE TABLE "tabUser" ("name" VARCHAR(140) PRIMARY KEY, "enabled" INTEGER NOT NULL DEFAULT 0)"#
        );
    }
}
