pub mod comparator;
pub mod diff;
pub mod types;

pub use comparator::{SchemaComparator, default_index_name, unique_index_name};
pub use diff::{
    AddedColumn, ColumnAttribute, ColumnChange, ModifiedColumn, RemovedColumn, RenamedColumn,
    SchemaDiff,
};
pub use types::{
    CastSafety, ColumnDef, ColumnInfo, ColumnType, IndexInfo, LiveTable, TypeCategory,
    TypeMapping, default_literal, quote_literal, same_default,
};
