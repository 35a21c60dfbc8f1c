use super::SqlDialect;
use crate::config::DialectKind;
use crate::schema::{ColumnDef, ColumnType, same_default};

/// PostgreSQL: full `ALTER COLUMN` support, booleans kept as SMALLINT so the
/// stored values stay 0/1 like on SQLite.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn render_type(&self, ty: &ColumnType) -> String {
        match ty {
            ColumnType::Varchar { length } => format!("VARCHAR({})", length),
            ColumnType::Integer => "BIGINT".to_string(),
            ColumnType::Boolean => "SMALLINT".to_string(),
            ColumnType::Decimal { precision, scale } => {
                format!("NUMERIC({},{})", precision, scale)
            }
            ColumnType::Float => "DOUBLE PRECISION".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Timestamp => "TIMESTAMP".to_string(),
            ColumnType::Time => "TIME".to_string(),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Json => "JSONB".to_string(),
            ColumnType::Other { name } => name.clone(),
        }
    }

    fn parse_type(&self, raw: &str) -> ColumnType {
        match ColumnType::parse(raw) {
            ColumnType::Boolean => ColumnType::Integer,
            other => other,
        }
    }

    fn supports_alter_column(&self) -> bool {
        true
    }

    fn supports_drop_column(&self) -> bool {
        true
    }

    fn alter_column(&self, table: &str, from: &ColumnDef, to: &ColumnDef) -> Vec<String> {
        let prefix = format!(
            "ALTER TABLE {} ALTER COLUMN {}",
            self.quote_ident(table),
            self.quote_ident(&to.name)
        );
        let default_changed = !same_default(from.default.as_deref(), to.default.as_deref());
        let type_changed = self.canonical_type(&from.column_type) != self.canonical_type(&to.column_type);
        let mut statements = Vec::new();

        // An old default may not cast to the new type.
        if from.default.is_some() && (default_changed || type_changed) {
            statements.push(format!("{} DROP DEFAULT", prefix));
        }
        if type_changed {
            let rendered = self.render_type(&to.column_type);
            statements.push(format!(
                "{} TYPE {} USING {}",
                prefix,
                rendered,
                self.cast(&self.quote_ident(&to.name), &to.column_type)
            ));
        }
        if let Some(default) = &to.default {
            if default_changed || type_changed {
                statements.push(format!("{} SET DEFAULT {}", prefix, default));
            }
        }
        if from.nullable && !to.nullable {
            statements.push(format!("{} SET NOT NULL", prefix));
        } else if !from.nullable && to.nullable {
            statements.push(format!("{} DROP NOT NULL", prefix));
        }
        statements
    }
}
