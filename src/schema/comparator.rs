use super::diff::{AddedColumn, ModifiedColumn, RemovedColumn, RenamedColumn, SchemaDiff};
use super::types::{ColumnDef, IndexInfo, LiveTable, TypeMapping};
use crate::config::EngineConfig;
use crate::dialect::SqlDialect;
use crate::meta::MergedMeta;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{Level, event};

fn sanitize_sql_identifier(input: &str) -> String {
    input
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Name of the implicit index backing a `search_index` field.
pub fn default_index_name(table: &str, fieldname: &str) -> String {
    format!(
        "idx_{}_{}",
        sanitize_sql_identifier(table),
        sanitize_sql_identifier(fieldname)
    )
}

/// Name of the implicit index backing a `unique` field.
pub fn unique_index_name(table: &str, fieldname: &str) -> String {
    format!(
        "unique_{}_{}",
        sanitize_sql_identifier(table),
        sanitize_sql_identifier(fieldname)
    )
}

/// Diffs effective metadata against an introspected table.
#[derive(Debug, Clone)]
pub struct SchemaComparator {
    dialect: Arc<dyn SqlDialect>,
    mapping: TypeMapping,
    table_prefix: String,
}

impl SchemaComparator {
    pub fn new(config: &EngineConfig, dialect: Arc<dyn SqlDialect>) -> Self {
        Self {
            dialect,
            mapping: TypeMapping::from_config(config),
            table_prefix: config.table_prefix.clone(),
        }
    }

    pub fn dialect(&self) -> &Arc<dyn SqlDialect> {
        &self.dialect
    }

    pub fn table_name(&self, doctype: &str) -> String {
        format!("{}{}", self.table_prefix, doctype)
    }

    /// One column per valid field, in field order.
    pub fn declared_columns(&self, meta: &MergedMeta) -> Vec<ColumnDef> {
        meta.get_valid_columns()
            .into_iter()
            .filter_map(|field| self.mapping.column_def(field))
            .collect()
    }

    /// Implicit field indexes followed by the DocType's declared indexes.
    pub fn declared_indexes(&self, meta: &MergedMeta) -> Vec<IndexInfo> {
        let table = self.table_name(meta.name());
        let mut indexes: Vec<IndexInfo> = Vec::new();

        for field in meta.get_valid_columns() {
            if field.unique {
                indexes.push(IndexInfo::new(
                    unique_index_name(&table, &field.fieldname),
                    [field.fieldname.as_str()],
                    true,
                ));
            } else if field.search_index {
                indexes.push(IndexInfo::new(
                    default_index_name(&table, &field.fieldname),
                    [field.fieldname.as_str()],
                    false,
                ));
            }
        }
        for index in &meta.doctype().indexes {
            if indexes.iter().any(|i| i.name == index.name) {
                continue;
            }
            let mut info = IndexInfo::new(index.name.clone(), index.columns.clone(), index.unique);
            if let Some(predicate) = &index.predicate {
                info = info.with_predicate(predicate.clone());
            }
            indexes.push(info);
        }
        indexes
    }

    /// Introspected columns with their types read through the dialect.
    pub fn live_columns(&self, live: &LiveTable) -> Vec<ColumnDef> {
        live.columns
            .iter()
            .map(|info| ColumnDef::from_info(info, self.dialect.parse_type(&info.data_type)))
            .collect()
    }

    pub fn compare(&self, meta: &MergedMeta, live: Option<&LiveTable>) -> SchemaDiff {
        let table = self.table_name(meta.name());
        let declared = self.declared_columns(meta);
        let declared_indexes = self.declared_indexes(meta);

        let Some(live) = live else {
            let mut diff = SchemaDiff::new(table, false);
            diff.added_columns = declared
                .into_iter()
                .map(|column| AddedColumn {
                    fieldname: column.name.clone(),
                    column,
                })
                .collect();
            diff.added_indexes = declared_indexes;
            return diff;
        };

        let mut diff = SchemaDiff::new(table, true);
        let live_columns = self.live_columns(live);
        let live_names: HashSet<&str> = live_columns.iter().map(|c| c.name.as_str()).collect();
        let declared_names: HashSet<&str> = declared.iter().map(|c| c.name.as_str()).collect();

        // Renames need an explicit annotation and an unambiguous source.
        for field in meta.get_valid_columns() {
            let Some(old) = field.old_fieldname.as_deref() else {
                continue;
            };
            if old != field.fieldname
                && !live_names.contains(field.fieldname.as_str())
                && live_names.contains(old)
                && !declared_names.contains(old)
                && !diff.renamed_columns.iter().any(|r| r.from == old)
            {
                diff.renamed_columns.push(RenamedColumn {
                    from: old.to_string(),
                    to: field.fieldname.clone(),
                });
            }
        }

        for column in &declared {
            let source = diff
                .renamed_columns
                .iter()
                .find(|r| r.to == column.name)
                .map(|r| r.from.as_str())
                .unwrap_or(column.name.as_str());

            let Some(existing) = live_columns.iter().find(|c| c.name == source) else {
                diff.added_columns.push(AddedColumn {
                    fieldname: column.name.clone(),
                    column: column.clone(),
                });
                continue;
            };
            if existing.primary_key {
                continue;
            }

            let canonical = ColumnDef {
                column_type: self.dialect.canonical_type(&column.column_type),
                ..column.clone()
            };
            if let Some(modified) =
                ModifiedColumn::between(&column.name, &existing.renamed(&column.name), &canonical)
            {
                diff.modified_columns.push(modified);
            }
        }

        for column in &live_columns {
            let renamed = diff.renamed_columns.iter().any(|r| r.from == column.name);
            if column.primary_key || renamed || declared_names.contains(column.name.as_str()) {
                continue;
            }
            diff.removed_columns.push(RemovedColumn {
                name: column.name.clone(),
                column: column.clone(),
            });
        }

        let primary: HashSet<&str> = live_columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect();

        for index in &declared_indexes {
            match live.indexes.iter().find(|l| l.name == index.name) {
                None => diff.added_indexes.push(index.clone()),
                Some(existing) if !existing.same_shape(index) => {
                    diff.removed_indexes.push(existing.clone());
                    diff.added_indexes.push(index.clone());
                }
                Some(_) => {}
            }
        }
        for index in &live.indexes {
            if is_implicit_index(index, &primary) {
                continue;
            }
            if !declared_indexes.iter().any(|d| d.name == index.name) {
                diff.removed_indexes.push(index.clone());
            }
        }

        event!(
            Level::DEBUG,
            table = %diff.table,
            changes = diff.change_count(),
            destructive = diff.is_destructive(),
            "schema compared"
        );
        diff
    }
}

/// Indexes the backend creates on its own for primary keys.
fn is_implicit_index(index: &IndexInfo, primary: &HashSet<&str>) -> bool {
    if index.name.starts_with("sqlite_autoindex_") || index.name.ends_with("_pkey") {
        return true;
    }
    !primary.is_empty()
        && index.columns.len() == primary.len()
        && index.columns.iter().all(|c| primary.contains(c.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgresDialect, SqliteDialect};
    use crate::model::{DocType, Field, FieldType, Index};
    use crate::schema::types::{ColumnInfo, ColumnType};

    fn comparator() -> SchemaComparator {
        SchemaComparator::new(&EngineConfig::new(), Arc::new(SqliteDialect::default()))
    }

    fn meta(doc: DocType) -> MergedMeta {
        MergedMeta::new(doc)
    }

    fn user() -> DocType {
        DocType::new("User", "Core")
            .with_field(Field::new("name", "Name", FieldType::Data).required())
            .with_field(Field::new("email", "Email", FieldType::Data).required().unique())
            .with_field(Field::new("sb", "More", FieldType::SectionBreak))
            .with_field(Field::new("enabled", "Enabled", FieldType::Check))
    }

    fn live_column(name: &str, ty: &str, nullable: bool, default: Option<&str>) -> ColumnInfo {
        let mut info = ColumnInfo::new(name, ty);
        info.nullable = nullable;
        info.default_value = default.map(str::to_string);
        info
    }

    #[test]
    fn test_fresh_table_adds_every_column() {
        let diff = comparator().compare(&meta(user()), None);
        assert!(!diff.table_exists);
        assert_eq!(diff.table, "tabUser");
        assert_eq!(diff.added_columns.len(), 3);
        assert!(diff.removed_columns.is_empty());
        assert!(diff.modified_columns.is_empty());
        assert_eq!(diff.added_indexes[0].name, "unique_tabuser_email");
        assert!(!diff.is_destructive());
    }

    #[test]
    fn test_empty_live_table_adds_every_column() {
        let diff = comparator().compare(&meta(user()), Some(&LiveTable::default()));
        assert!(diff.table_exists);
        assert_eq!(diff.added_columns.len(), 3);
        assert!(diff.removed_columns.is_empty());
        assert!(diff.modified_columns.is_empty());
    }

    #[test]
    fn test_in_sync_table_has_empty_diff() {
        let live = LiveTable {
            columns: vec![
                live_column("name", "VARCHAR(140)", false, Some("''")),
                live_column("email", "VARCHAR(140)", false, Some("''")),
                live_column("enabled", "INTEGER", false, Some("0")),
            ],
            indexes: vec![IndexInfo::new("unique_tabuser_email", ["email"], true)],
        };
        let diff = comparator().compare(&meta(user()), Some(&live));
        assert!(diff.is_empty(), "unexpected diff: {:?}", diff);
    }

    #[test]
    fn test_removed_and_modified_columns() {
        let live = LiveTable {
            columns: vec![
                live_column("name", "VARCHAR(140)", false, Some("''")),
                live_column("email", "VARCHAR(255)", true, None),
                live_column("enabled", "INTEGER", false, Some("0")),
                live_column("fax", "VARCHAR(140)", true, None),
            ],
            indexes: vec![
                IndexInfo::new("unique_tabuser_email", ["email"], true),
                IndexInfo::new("idx_fax", ["fax"], false),
            ],
        };
        let diff = comparator().compare(&meta(user()), Some(&live));
        assert_eq!(diff.removed_columns.len(), 1);
        assert_eq!(diff.removed_columns[0].name, "fax");
        assert_eq!(diff.modified_columns.len(), 1);
        assert_eq!(diff.modified_columns[0].fieldname, "email");
        assert!(diff.modified_columns[0].destructive);
        assert_eq!(diff.removed_indexes.len(), 1);
        assert_eq!(diff.removed_indexes[0].name, "idx_fax");
        assert!(diff.is_destructive());
    }

    #[test]
    fn test_primary_key_never_removed() {
        let mut id = ColumnInfo::new("id", "INTEGER");
        id.primary_key = true;
        let live = LiveTable {
            columns: vec![
                id,
                live_column("name", "VARCHAR(140)", false, Some("''")),
                live_column("email", "VARCHAR(140)", false, Some("''")),
                live_column("enabled", "INTEGER", false, Some("0")),
            ],
            indexes: vec![
                IndexInfo::new("sqlite_autoindex_tabUser_1", ["id"], true),
                IndexInfo::new("unique_tabuser_email", ["email"], true),
            ],
        };
        let diff = comparator().compare(&meta(user()), Some(&live));
        assert!(diff.is_empty(), "unexpected diff: {:?}", diff);
    }

    #[test]
    fn test_rename_requires_annotation() {
        let doc = DocType::new("Contact", "Crm")
            .with_field(Field::new("phone", "Phone", FieldType::Data).renamed_from("mobile"));
        let live = LiveTable {
            columns: vec![live_column("mobile", "VARCHAR(140)", true, None)],
            indexes: vec![],
        };
        let diff = comparator().compare(&meta(doc), Some(&live));
        assert_eq!(diff.renamed_columns.len(), 1);
        assert_eq!(diff.renamed_columns[0].from, "mobile");
        assert!(diff.added_columns.is_empty());
        assert!(diff.removed_columns.is_empty());
        assert!(!diff.is_destructive());

        let unannotated = DocType::new("Contact", "Crm")
            .with_field(Field::new("phone", "Phone", FieldType::Data));
        let diff = comparator().compare(&meta(unannotated), Some(&live));
        assert!(diff.renamed_columns.is_empty());
        assert_eq!(diff.added_columns.len(), 1);
        assert_eq!(diff.removed_columns.len(), 1);
    }

    #[test]
    fn test_declared_and_search_indexes() {
        let doc = DocType::new("Item", "Stock")
            .with_field(Field::new("item_code", "Item Code", FieldType::Data).search_index())
            .with_field(Field::new("brand", "Brand", FieldType::Link).options("Brand"))
            .with_index(Index::new("idx_item_brand_code", ["brand", "item_code"]));
        let indexes = comparator().declared_indexes(&meta(doc));
        let names: Vec<&str> = indexes.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["idx_tabitem_item_code", "idx_item_brand_code"]);
    }

    #[test]
    fn test_postgres_reads_live_types() {
        let cmp = SchemaComparator::new(&EngineConfig::new(), Arc::new(PostgresDialect));
        let doc = DocType::new("Note", "Desk")
            .with_field(Field::new("title", "Title", FieldType::Data))
            .with_field(Field::new("qty", "Qty", FieldType::Int));
        let live = LiveTable {
            columns: vec![
                live_column("title", "character varying(140)", true, None),
                live_column("qty", "text", true, None),
            ],
            indexes: vec![],
        };
        let diff = cmp.compare(&meta(doc), Some(&live));
        assert_eq!(diff.modified_columns.len(), 1);
        assert_eq!(diff.modified_columns[0].to.column_type, ColumnType::Integer);
        assert!(diff.requires_data_migration());
    }

    #[test]
    fn test_postgres_temporal_columns_in_sync() {
        let cmp = SchemaComparator::new(&EngineConfig::new(), Arc::new(PostgresDialect));
        let doc = DocType::new("Event", "Desk")
            .with_field(Field::new("at", "At", FieldType::Datetime))
            .with_field(Field::new("starts", "Starts", FieldType::Time))
            .with_field(Field::new("on", "On", FieldType::Date));
        let live = LiveTable {
            columns: vec![
                live_column("at", "timestamp without time zone", true, None),
                live_column("starts", "time without time zone", true, None),
                live_column("on", "date", true, None),
            ],
            indexes: vec![],
        };
        let diff = cmp.compare(&meta(doc), Some(&live));
        assert!(diff.is_empty(), "{:?}", diff.modified_columns);
        assert!(!diff.is_destructive());
    }

    #[test]
    fn test_partial_index_predicate_change() {
        let doc = user().with_index(Index::new("idx_tabuser_live_email", ["email"]).partial("enabled = 1"));
        let live_with = |predicate: &str| LiveTable {
            columns: vec![
                live_column("name", "VARCHAR(140)", false, Some("''")),
                live_column("email", "VARCHAR(140)", false, Some("''")),
                live_column("enabled", "INTEGER", false, Some("0")),
            ],
            indexes: vec![
                IndexInfo::new("unique_tabuser_email", ["email"], true),
                IndexInfo::new("idx_tabuser_live_email", ["email"], false).with_predicate(predicate),
            ],
        };

        let same = comparator().compare(&meta(doc.clone()), Some(&live_with("(enabled  =  1)")));
        assert!(same.is_empty(), "unexpected diff: {:?}", same);

        let changed = comparator().compare(&meta(doc), Some(&live_with("enabled = 0")));
        assert_eq!(changed.removed_indexes.len(), 1);
        assert_eq!(changed.removed_indexes[0].predicate.as_deref(), Some("enabled = 0"));
        assert_eq!(changed.added_indexes.len(), 1);
        assert_eq!(changed.added_indexes[0].predicate.as_deref(), Some("enabled = 1"));
    }
}
