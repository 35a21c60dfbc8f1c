use super::types::{CastSafety, ColumnDef, IndexInfo, same_default};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Column attribute that differs between live and declared shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnAttribute {
    Type,
    Nullable,
    Default,
}

impl fmt::Display for ColumnAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Type => "type",
            Self::Nullable => "nullable",
            Self::Default => "default",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnChange {
    pub attribute: ColumnAttribute,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddedColumn {
    pub fieldname: String,
    pub column: ColumnDef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedColumn {
    pub name: String,
    /// Last known shape, kept so the change can be reversed.
    pub column: ColumnDef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedColumn {
    pub fieldname: String,
    pub from: ColumnDef,
    pub to: ColumnDef,
    pub changes: Vec<ColumnChange>,
    pub requires_data_migration: bool,
    pub destructive: bool,
}

impl ModifiedColumn {
    /// Describes the change from `from` to `to`; `None` when the shapes match.
    pub fn between(fieldname: &str, from: &ColumnDef, to: &ColumnDef) -> Option<Self> {
        let mut changes = Vec::new();
        let cast = CastSafety::between(&from.column_type, &to.column_type);

        if cast != CastSafety::NoOp {
            changes.push(ColumnChange {
                attribute: ColumnAttribute::Type,
                from: from.column_type.to_string(),
                to: to.column_type.to_string(),
            });
        }
        if from.nullable != to.nullable {
            changes.push(ColumnChange {
                attribute: ColumnAttribute::Nullable,
                from: from.nullable.to_string(),
                to: to.nullable.to_string(),
            });
        }
        if !same_default(from.default.as_deref(), to.default.as_deref()) {
            changes.push(ColumnChange {
                attribute: ColumnAttribute::Default,
                from: from.default.clone().unwrap_or_else(|| "NULL".to_string()),
                to: to.default.clone().unwrap_or_else(|| "NULL".to_string()),
            });
        }
        if changes.is_empty() {
            return None;
        }

        let tightens_null = from.nullable && !to.nullable;
        Some(Self {
            fieldname: fieldname.to_string(),
            from: from.clone(),
            to: to.clone(),
            changes,
            requires_data_migration: cast == CastSafety::Incompatible,
            destructive: cast.is_destructive() || tightens_null,
        })
    }

    pub fn changes_type(&self) -> bool {
        self.changes
            .iter()
            .any(|c| c.attribute == ColumnAttribute::Type)
    }

    pub fn tightens_nullability(&self) -> bool {
        self.from.nullable && !self.to.nullable
    }

    /// Declared length is shorter than the live one.
    pub fn narrows_length(&self) -> Option<u32> {
        match (self.from.column_type.length(), self.to.column_type.length()) {
            (Some(from), Some(to)) if to < from => Some(to),
            (None, Some(to)) if self.from.column_type.is_textual() => Some(to),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenamedColumn {
    pub from: String,
    pub to: String,
}

/// Structural difference between a declared DocType and its live table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDiff {
    pub table: String,
    pub table_exists: bool,
    #[serde(default)]
    pub added_columns: Vec<AddedColumn>,
    #[serde(default)]
    pub removed_columns: Vec<RemovedColumn>,
    #[serde(default)]
    pub modified_columns: Vec<ModifiedColumn>,
    #[serde(default)]
    pub renamed_columns: Vec<RenamedColumn>,
    #[serde(default)]
    pub added_indexes: Vec<IndexInfo>,
    #[serde(default)]
    pub removed_indexes: Vec<IndexInfo>,
}

impl SchemaDiff {
    pub fn new(table: impl Into<String>, table_exists: bool) -> Self {
        Self {
            table: table.into(),
            table_exists,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added_columns.is_empty()
            && self.removed_columns.is_empty()
            && self.modified_columns.is_empty()
            && self.renamed_columns.is_empty()
            && self.added_indexes.is_empty()
            && self.removed_indexes.is_empty()
    }

    /// True if applying the diff can lose data.
    pub fn is_destructive(&self) -> bool {
        !self.removed_columns.is_empty()
            || !self.removed_indexes.is_empty()
            || self.modified_columns.iter().any(|m| m.destructive)
    }

    pub fn requires_data_migration(&self) -> bool {
        self.modified_columns
            .iter()
            .any(|m| m.requires_data_migration)
    }

    pub fn change_count(&self) -> usize {
        self.added_columns.len()
            + self.removed_columns.len()
            + self.modified_columns.len()
            + self.renamed_columns.len()
            + self.added_indexes.len()
            + self.removed_indexes.len()
    }

    /// One line description, e.g. `tabUser: +2 columns, -1 column`.
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return format!("{}: no changes", self.table);
        }
        fn part(out: &mut Vec<String>, sign: &str, count: usize, noun: (&str, &str)) {
            match count {
                0 => {}
                1 => out.push(format!("{}1 {}", sign, noun.0)),
                n => out.push(format!("{}{} {}", sign, n, noun.1)),
            }
        }

        const COLUMN: (&str, &str) = ("column", "columns");
        const INDEX: (&str, &str) = ("index", "indexes");

        let mut parts = Vec::new();
        if !self.table_exists {
            parts.push("create table".to_string());
        }
        part(&mut parts, "+", self.added_columns.len(), COLUMN);
        part(&mut parts, "-", self.removed_columns.len(), COLUMN);
        part(&mut parts, "~", self.modified_columns.len(), COLUMN);
        if !self.renamed_columns.is_empty() {
            parts.push(format!("{} renamed", self.renamed_columns.len()));
        }
        part(&mut parts, "+", self.added_indexes.len(), INDEX);
        part(&mut parts, "-", self.removed_indexes.len(), INDEX);
        format!("{}: {}", self.table, parts.join(", "))
    }

    /// Diff that undoes this one when applied to the post-migration table.
    ///
    /// Renames are undone first, so modified columns are addressed by
    /// their pre-rename names.
    pub fn inverse(&self) -> SchemaDiff {
        let back: HashMap<&str, &str> = self
            .renamed_columns
            .iter()
            .map(|r| (r.to.as_str(), r.from.as_str()))
            .collect();

        let modified_columns = self
            .modified_columns
            .iter()
            .filter_map(|m| {
                let name = back
                    .get(m.fieldname.as_str())
                    .copied()
                    .unwrap_or(m.fieldname.as_str());
                ModifiedColumn::between(name, &m.to.renamed(name), &m.from.renamed(name))
            })
            .collect();

        SchemaDiff {
            table: self.table.clone(),
            table_exists: true,
            added_columns: self
                .removed_columns
                .iter()
                .map(|r| AddedColumn {
                    fieldname: r.name.clone(),
                    column: r.column.clone(),
                })
                .collect(),
            removed_columns: self
                .added_columns
                .iter()
                .map(|a| RemovedColumn {
                    name: a.fieldname.clone(),
                    column: a.column.clone(),
                })
                .collect(),
            modified_columns,
            renamed_columns: self
                .renamed_columns
                .iter()
                .map(|r| RenamedColumn {
                    from: r.to.clone(),
                    to: r.from.clone(),
                })
                .collect(),
            added_indexes: self.removed_indexes.clone(),
            removed_indexes: self.added_indexes.clone(),
        }
    }

    /// Shape of the table after the diff is applied to `columns`.
    pub fn apply_to(&self, columns: &[ColumnDef]) -> Vec<ColumnDef> {
        let mut out: Vec<ColumnDef> = columns.to_vec();
        for rename in &self.renamed_columns {
            if let Some(col) = out.iter_mut().find(|c| c.name == rename.from) {
                col.name = rename.to.clone();
            }
        }
        for modified in &self.modified_columns {
            if let Some(col) = out.iter_mut().find(|c| c.name == modified.fieldname) {
                let primary_key = col.primary_key;
                *col = modified.to.renamed(&modified.fieldname);
                col.primary_key = primary_key;
            }
        }
        out.retain(|c| !self.removed_columns.iter().any(|r| r.name == c.name));
        out.extend(self.added_columns.iter().map(|a| a.column.clone()));
        out
    }

    /// Indexes on the table after the diff is applied to `indexes`.
    pub fn apply_to_indexes(&self, indexes: &[IndexInfo]) -> Vec<IndexInfo> {
        let renames: HashMap<&str, &str> = self
            .renamed_columns
            .iter()
            .map(|r| (r.from.as_str(), r.to.as_str()))
            .collect();
        let mut out: Vec<IndexInfo> = indexes
            .iter()
            .filter(|idx| !self.removed_indexes.iter().any(|r| r.name == idx.name))
            .filter(|idx| {
                !idx
                    .columns
                    .iter()
                    .any(|c| self.removed_columns.iter().any(|r| &r.name == c))
            })
            .cloned()
            .map(|mut idx| {
                for column in idx.columns.iter_mut() {
                    if let Some(to) = renames.get(column.as_str()) {
                        *column = to.to_string();
                    }
                }
                idx
            })
            .collect();
        out.extend(self.added_indexes.iter().cloned());
        out
    }
}

impl fmt::Display for SchemaDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}
