use super::expr::{Expr, ExprConverter, object_name, unquote, unsupported};
use crate::core::{MetaError, Result, Value};
use crate::schema::{ColumnType, IndexInfo};
use sqlparser::ast as sql_ast;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

/// Column as stored by the in-memory engine.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ColumnSpec {
    pub name: String,
    /// Type exactly as declared; reported back by introspection.
    pub data_type: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub unique: bool,
    pub primary_key: bool,
    /// Default as a SQL literal.
    pub default: Option<String>,
}

impl ColumnSpec {
    pub fn default_value(&self) -> Value {
        self.default
            .as_deref()
            .map(Value::from_sql_literal)
            .unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ColumnAlter {
    SetNotNull,
    DropNotNull,
    SetDefault(String),
    DropDefault,
    SetType { data_type: String, using: Option<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Projection {
    Wildcard,
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SelectQuery {
    pub table: Option<String>,
    pub projection: Vec<Projection>,
    pub selection: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum InsertSource {
    Values(Vec<Vec<Expr>>),
    Select(SelectQuery),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    CreateTable {
        table: String,
        columns: Vec<ColumnSpec>,
        if_not_exists: bool,
    },
    DropTable {
        tables: Vec<String>,
        if_exists: bool,
    },
    RenameTable {
        from: String,
        to: String,
    },
    AddColumn {
        table: String,
        column: ColumnSpec,
    },
    DropColumn {
        table: String,
        column: String,
    },
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },
    AlterColumn {
        table: String,
        column: String,
        change: ColumnAlter,
    },
    CreateIndex {
        table: String,
        index: IndexInfo,
        predicate: Option<Expr>,
        if_not_exists: bool,
    },
    DropIndex {
        names: Vec<String>,
        if_exists: bool,
    },
    Insert {
        table: String,
        columns: Option<Vec<String>>,
        source: InsertSource,
    },
    Update {
        table: String,
        assignments: Vec<(String, Expr)>,
        selection: Option<Expr>,
    },
    Delete {
        table: String,
        selection: Option<Expr>,
    },
    Select(SelectQuery),
}

impl Command {
    /// Parses exactly one statement.
    pub fn parse(sql: &str, params: &[Value]) -> Result<Self> {
        let mut statements = Parser::parse_sql(&PostgreSqlDialect {}, sql)
            .map_err(|e| MetaError::Database(format!("syntax error: {}", e)))?;
        if statements.len() != 1 {
            return Err(MetaError::Database(format!(
                "expected one statement, got {}",
                statements.len()
            )));
        }
        let mut converter = ExprConverter::new(params);
        convert_statement(statements.remove(0), &mut converter)
    }

    pub fn is_query(&self) -> bool {
        matches!(self, Self::Select(_))
    }
}

fn convert_statement(stmt: sql_ast::Statement, conv: &mut ExprConverter<'_>) -> Result<Command> {
    match stmt {
        sql_ast::Statement::CreateTable(create) => Ok(Command::CreateTable {
            table: object_name(&create.name)?,
            columns: create
                .columns
                .into_iter()
                .map(convert_column_def)
                .collect::<Result<Vec<_>>>()?,
            if_not_exists: create.if_not_exists,
        }),
        sql_ast::Statement::CreateIndex(ci) => convert_create_index(ci, conv),
        sql_ast::Statement::AlterTable { name, operations, .. } => {
            let table = object_name(&name)?;
            let mut operations = operations.into_iter();
            match (operations.next(), operations.next()) {
                (Some(op), None) => convert_alter_table(table, op, conv),
                _ => Err(unsupported("ALTER TABLE with several operations")),
            }
        }
        sql_ast::Statement::Drop {
            object_type,
            names,
            if_exists,
            ..
        } => {
            let names = names
                .iter()
                .map(object_name)
                .collect::<Result<Vec<_>>>()?;
            match object_type {
                sql_ast::ObjectType::Table => Ok(Command::DropTable {
                    tables: names,
                    if_exists,
                }),
                sql_ast::ObjectType::Index => Ok(Command::DropIndex { names, if_exists }),
                other => Err(unsupported(format!("DROP {}", other))),
            }
        }
        sql_ast::Statement::Insert(insert) => {
            let table = unquote(&insert.table.to_string());
            let columns = if insert.columns.is_empty() {
                None
            } else {
                Some(insert.columns.into_iter().map(|id| id.value).collect())
            };
            let Some(source) = insert.source else {
                return Err(unsupported("INSERT without a source"));
            };
            let source = match *source.body {
                sql_ast::SetExpr::Values(values) => InsertSource::Values(
                    values
                        .rows
                        .into_iter()
                        .map(|row| {
                            row.into_iter()
                                .map(|e| conv.convert(e))
                                .collect::<Result<Vec<_>>>()
                        })
                        .collect::<Result<Vec<_>>>()?,
                ),
                sql_ast::SetExpr::Select(select) => InsertSource::Select(convert_select(*select, conv)?),
                other => return Err(unsupported(format!("INSERT source {}", other))),
            };
            Ok(Command::Insert {
                table,
                columns,
                source,
            })
        }
        sql_ast::Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => {
            let table = table_factor_name(&table.relation)?;
            let assignments = assignments
                .into_iter()
                .map(|assign| {
                    let column = match &assign.target {
                        sql_ast::AssignmentTarget::ColumnName(name) => object_name(name)?,
                        other => return Err(unsupported(format!("assignment to {}", other))),
                    };
                    Ok((column, conv.convert(assign.value)?))
                })
                .collect::<Result<Vec<_>>>()?;
            let selection = selection.map(|e| conv.convert(e)).transpose()?;
            Ok(Command::Update {
                table,
                assignments,
                selection,
            })
        }
        sql_ast::Statement::Delete(delete) => {
            let tables = match delete.from {
                sql_ast::FromTable::WithFromKeyword(tables) => tables,
                sql_ast::FromTable::WithoutKeyword(tables) => tables,
            };
            let table = tables
                .first()
                .map(|t| table_factor_name(&t.relation))
                .transpose()?
                .ok_or_else(|| unsupported("DELETE without a table"))?;
            let selection = delete.selection.map(|e| conv.convert(e)).transpose()?;
            Ok(Command::Delete { table, selection })
        }
        sql_ast::Statement::Query(query) => {
            let sql_ast::SetExpr::Select(select) = *query.body else {
                return Err(unsupported("query other than SELECT"));
            };
            Ok(Command::Select(convert_select(*select, conv)?))
        }
        other => Err(unsupported(format!("statement {}", other))),
    }
}

fn table_factor_name(factor: &sql_ast::TableFactor) -> Result<String> {
    match factor {
        sql_ast::TableFactor::Table { name, .. } => object_name(name),
        other => Err(unsupported(format!("table reference {}", other))),
    }
}

fn convert_select(select: sql_ast::Select, conv: &mut ExprConverter<'_>) -> Result<SelectQuery> {
    if select.from.len() > 1 || select.from.first().is_some_and(|t| !t.joins.is_empty()) {
        return Err(unsupported("joins"));
    }
    let table = select
        .from
        .first()
        .map(|t| table_factor_name(&t.relation))
        .transpose()?;
    let projection = select
        .projection
        .into_iter()
        .map(|item| match item {
            sql_ast::SelectItem::Wildcard(_) => Ok(Projection::Wildcard),
            sql_ast::SelectItem::UnnamedExpr(expr) => conv.convert(expr).map(Projection::Expr),
            sql_ast::SelectItem::ExprWithAlias { expr, .. } => {
                conv.convert(expr).map(Projection::Expr)
            }
            other => Err(unsupported(format!("select item {}", other))),
        })
        .collect::<Result<Vec<_>>>()?;
    let selection = select.selection.map(|e| conv.convert(e)).transpose()?;
    Ok(SelectQuery {
        table,
        projection,
        selection,
    })
}

fn convert_column_def(col: sql_ast::ColumnDef) -> Result<ColumnSpec> {
    let data_type = col.data_type.to_string();
    let mut spec = ColumnSpec {
        name: col.name.value,
        column_type: ColumnType::parse(&data_type),
        data_type,
        nullable: true,
        unique: false,
        primary_key: false,
        default: None,
    };
    for option in &col.options {
        match &option.option {
            sql_ast::ColumnOption::NotNull => spec.nullable = false,
            sql_ast::ColumnOption::Null => spec.nullable = true,
            sql_ast::ColumnOption::Default(expr) => spec.default = Some(expr.to_string()),
            other => {
                let rendered = other.to_string().to_ascii_uppercase();
                if rendered.starts_with("PRIMARY KEY") {
                    spec.primary_key = true;
                    spec.nullable = false;
                    spec.unique = true;
                } else if rendered.starts_with("UNIQUE") {
                    spec.unique = true;
                }
            }
        }
    }
    Ok(spec)
}

fn convert_create_index(ci: sql_ast::CreateIndex, conv: &mut ExprConverter<'_>) -> Result<Command> {
    let name = match &ci.name {
        Some(n) => object_name(n)?,
        None => return Err(MetaError::Database("index name is required".into())),
    };
    let table = object_name(&ci.table_name)?;
    let columns = ci
        .columns
        .iter()
        .map(|c| match &c.column.expr {
            sql_ast::Expr::Identifier(ident) => Ok(ident.value.clone()),
            other => Err(unsupported(format!("index on expression {}", other))),
        })
        .collect::<Result<Vec<_>>>()?;

    let mut index = IndexInfo::new(name, columns, ci.unique);
    let predicate = match ci.predicate {
        Some(expr) => {
            index = index.with_predicate(expr.to_string());
            Some(conv.convert(expr)?)
        }
        None => None,
    };
    Ok(Command::CreateIndex {
        table,
        index,
        predicate,
        if_not_exists: ci.if_not_exists,
    })
}

fn convert_alter_table(
    table: String,
    operation: sql_ast::AlterTableOperation,
    conv: &mut ExprConverter<'_>,
) -> Result<Command> {
    match operation {
        sql_ast::AlterTableOperation::AddColumn { column_def, .. } => Ok(Command::AddColumn {
            table,
            column: convert_column_def(column_def)?,
        }),
        sql_ast::AlterTableOperation::DropColumn { column_names, .. } => {
            let mut names = column_names.into_iter();
            match (names.next(), names.next()) {
                (Some(column), None) => Ok(Command::DropColumn {
                    table,
                    column: column.value,
                }),
                _ => Err(unsupported("dropping several columns at once")),
            }
        }
        sql_ast::AlterTableOperation::RenameColumn {
            old_column_name,
            new_column_name,
        } => Ok(Command::RenameColumn {
            table,
            from: old_column_name.value,
            to: new_column_name.value,
        }),
        sql_ast::AlterTableOperation::RenameTable { table_name } => {
            // Printed as `TO "name"` by newer parsers, plain by older ones.
            let rendered = table_name.to_string();
            let target = rendered
                .strip_prefix("TO ")
                .or_else(|| rendered.strip_prefix("AS "))
                .unwrap_or(&rendered);
            Ok(Command::RenameTable {
                from: table,
                to: unquote(target),
            })
        }
        sql_ast::AlterTableOperation::AlterColumn { column_name, op } => {
            let change = match op {
                sql_ast::AlterColumnOperation::SetNotNull => ColumnAlter::SetNotNull,
                sql_ast::AlterColumnOperation::DropNotNull => ColumnAlter::DropNotNull,
                sql_ast::AlterColumnOperation::SetDefault { value } => {
                    ColumnAlter::SetDefault(value.to_string())
                }
                sql_ast::AlterColumnOperation::DropDefault => ColumnAlter::DropDefault,
                sql_ast::AlterColumnOperation::SetDataType {
                    data_type, using, ..
                } => ColumnAlter::SetType {
                    data_type: data_type.to_string(),
                    using: using.map(|e| conv.convert(e)).transpose()?,
                },
                other => return Err(unsupported(format!("ALTER COLUMN {}", other))),
            };
            Ok(Command::AlterColumn {
                table,
                column: column_name.value,
                change,
            })
        }
        other => Err(unsupported(format!("ALTER TABLE {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_generated_ddl() {
        let cmd = Command::parse(
            r#"CREATE TABLE "tabUser" ("name" VARCHAR(140) PRIMARY KEY, "age" INTEGER NOT NULL DEFAULT 0)"#,
            &[],
        )
        .unwrap();
        let Command::CreateTable { table, columns, .. } = cmd else {
            panic!("expected CREATE TABLE");
        };
        assert_eq!(table, "tabUser");
        assert!(columns[0].primary_key);
        assert_eq!(columns[0].column_type, ColumnType::Varchar { length: 140 });
        assert!(!columns[1].nullable);
        assert_eq!(columns[1].default.as_deref(), Some("0"));
    }

    #[test]
    fn test_parse_alter_forms() {
        let cmd = Command::parse(
            r#"ALTER TABLE "tabItem" ALTER COLUMN "qty" TYPE BIGINT USING CAST("qty" AS BIGINT)"#,
            &[],
        )
        .unwrap();
        assert!(matches!(
            cmd,
            Command::AlterColumn { change: ColumnAlter::SetType { using: Some(_), .. }, .. }
        ));

        let cmd = Command::parse(r#"ALTER TABLE "tabItem__rebuild" RENAME TO "tabItem""#, &[]).unwrap();
        assert_eq!(
            cmd,
            Command::RenameTable {
                from: "tabItem__rebuild".into(),
                to: "tabItem".into()
            }
        );

        let cmd = Command::parse(r#"DROP INDEX IF EXISTS "idx_tabitem_qty""#, &[]).unwrap();
        assert_eq!(
            cmd,
            Command::DropIndex {
                names: vec!["idx_tabitem_qty".into()],
                if_exists: true
            }
        );
    }

    #[test]
    fn test_parse_partial_unique_index() {
        let cmd = Command::parse(
            r#"CREATE UNIQUE INDEX "u_email" ON "tabUser" ("email") WHERE "enabled" = 1"#,
            &[],
        )
        .unwrap();
        let Command::CreateIndex { index, predicate, .. } = cmd else {
            panic!("expected CREATE INDEX");
        };
        assert!(index.unique && index.partial);
        assert!(predicate.is_some());
    }
}
