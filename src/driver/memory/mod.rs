//! In-process SQL engine implementing [`Database`].
//!
//! Understands the DDL the migration generator emits plus plain
//! `INSERT`/`UPDATE`/`DELETE`/`SELECT` on single tables. Statements are
//! parsed with `sqlparser` (PostgreSQL grammar, `$n` placeholders) and run
//! against a private copy of the state, so a failing statement never leaves
//! partial changes behind. Transactions work on their own copy and publish
//! it on commit; only one transaction (or autocommit write) runs at a time.

mod expr;
mod statement;

use super::{Database, Transaction};
use crate::core::{MetaError, Result, Row, Value};
use crate::schema::{ColumnInfo, ColumnType, IndexInfo};
use async_trait::async_trait;
use expr::{Expr, cast, eval, truthy};
use statement::{ColumnAlter, ColumnSpec, Command, InsertSource, Projection, SelectQuery};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{Level, event};

#[derive(Debug, Clone, Default)]
struct Table {
    columns: Vec<ColumnSpec>,
    rows: Vec<Row>,
}

impl Table {
    fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == column)
    }

    fn require(&self, table: &str, column: &str) -> Result<usize> {
        self.position(column)
            .ok_or_else(|| db_error(format!("no such column: {}.{}", table, column)))
    }
}

#[derive(Debug, Clone)]
struct StoredIndex {
    table: String,
    info: IndexInfo,
    predicate: Option<Expr>,
}

#[derive(Debug, Clone, Default)]
struct State {
    tables: BTreeMap<String, Table>,
    indexes: BTreeMap<String, StoredIndex>,
}

#[derive(Debug, Default)]
struct Outcome {
    affected: u64,
    rows: Vec<Row>,
}

impl Outcome {
    fn affected(n: usize) -> Self {
        Self {
            affected: n as u64,
            rows: Vec::new(),
        }
    }
}

fn db_error(message: impl Into<String>) -> MetaError {
    MetaError::Database(message.into())
}

fn row_lookup<'a>(columns: &'a [ColumnSpec], row: &'a [Value]) -> impl Fn(&str) -> Option<Value> + 'a {
    move |name: &str| {
        columns
            .iter()
            .position(|c| c.name == name)
            .and_then(|i| row.get(i).cloned())
    }
}

/// Evaluates a WHERE clause; unknown counts as false.
fn matches(selection: Option<&Expr>, columns: &[ColumnSpec], row: &[Value]) -> Result<bool> {
    match selection {
        None => Ok(true),
        Some(expr) => Ok(truthy(&eval(expr, &row_lookup(columns, row))?) == Some(true)),
    }
}

impl State {
    fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| db_error(format!("no such table: {}", name)))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| db_error(format!("no such table: {}", name)))
    }

    fn indexes_of<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a StoredIndex> + 'a {
        self.indexes.values().filter(move |idx| idx.table == table)
    }

    fn apply(&mut self, command: Command) -> Result<Outcome> {
        match command {
            Command::CreateTable {
                table,
                columns,
                if_not_exists,
            } => {
                if self.tables.contains_key(&table) {
                    if if_not_exists {
                        return Ok(Outcome::default());
                    }
                    return Err(db_error(format!("table {} already exists", table)));
                }
                let mut seen = HashSet::new();
                if let Some(dup) = columns.iter().find(|c| !seen.insert(c.name.as_str())) {
                    return Err(db_error(format!("duplicate column name: {}", dup.name)));
                }
                self.tables.insert(
                    table,
                    Table {
                        columns,
                        rows: Vec::new(),
                    },
                );
                Ok(Outcome::default())
            }
            Command::DropTable { tables, if_exists } => {
                for table in tables {
                    if self.tables.remove(&table).is_none() {
                        if if_exists {
                            continue;
                        }
                        return Err(db_error(format!("no such table: {}", table)));
                    }
                    self.indexes.retain(|_, idx| idx.table != table);
                }
                Ok(Outcome::default())
            }
            Command::RenameTable { from, to } => {
                if self.tables.contains_key(&to) {
                    return Err(db_error(format!("there is already another table named {}", to)));
                }
                let moved = self
                    .tables
                    .remove(&from)
                    .ok_or_else(|| db_error(format!("no such table: {}", from)))?;
                self.tables.insert(to.clone(), moved);
                for idx in self.indexes.values_mut().filter(|idx| idx.table == from) {
                    idx.table = to.clone();
                }
                Ok(Outcome::default())
            }
            Command::AddColumn { table, column } => {
                let t = self.table_mut(&table)?;
                if t.position(&column.name).is_some() {
                    return Err(db_error(format!("duplicate column name: {}", column.name)));
                }
                if column.primary_key {
                    return Err(db_error("Cannot add a PRIMARY KEY column"));
                }
                let fill = cast(column.default_value(), &column.column_type)?;
                if !column.nullable && fill.is_null() && !t.rows.is_empty() {
                    return Err(db_error(format!(
                        "Cannot add a NOT NULL column with default value NULL: {}.{}",
                        table, column.name
                    )));
                }
                t.columns.push(column);
                for row in &mut t.rows {
                    row.push(fill.clone());
                }
                self.check_unique(&table)?;
                Ok(Outcome::default())
            }
            Command::DropColumn { table, column } => {
                let blocking = self
                    .indexes
                    .iter()
                    .find(|(_, idx)| idx.table == table && idx.info.covers(&column))
                    .map(|(name, _)| name.clone());
                let t = self.table_mut(&table)?;
                let pos = t.require(&table, &column)?;
                if t.columns[pos].primary_key {
                    return Err(db_error(format!("cannot drop PRIMARY KEY column: {}", column)));
                }
                if let Some(index) = blocking {
                    return Err(db_error(format!(
                        "cannot drop column \"{}\": used by index \"{}\"",
                        column, index
                    )));
                }
                t.columns.remove(pos);
                for row in &mut t.rows {
                    row.remove(pos);
                }
                Ok(Outcome::default())
            }
            Command::RenameColumn { table, from, to } => {
                let t = self.table_mut(&table)?;
                let pos = t.require(&table, &from)?;
                if t.position(&to).is_some() {
                    return Err(db_error(format!("duplicate column name: {}", to)));
                }
                t.columns[pos].name = to.clone();
                for idx in self.indexes.values_mut().filter(|idx| idx.table == table) {
                    for col in idx.info.columns.iter_mut().filter(|c| **c == from) {
                        *col = to.clone();
                    }
                }
                Ok(Outcome::default())
            }
            Command::AlterColumn {
                table,
                column,
                change,
            } => {
                self.alter_column(&table, &column, change)?;
                Ok(Outcome::default())
            }
            Command::CreateIndex {
                table,
                index,
                predicate,
                if_not_exists,
            } => {
                if self.indexes.contains_key(&index.name) {
                    if if_not_exists {
                        return Ok(Outcome::default());
                    }
                    return Err(db_error(format!("index {} already exists", index.name)));
                }
                let t = self.table(&table)?;
                for column in &index.columns {
                    t.require(&table, column)?;
                }
                self.indexes.insert(
                    index.name.clone(),
                    StoredIndex {
                        table: table.clone(),
                        info: index,
                        predicate,
                    },
                );
                self.check_unique(&table)?;
                Ok(Outcome::default())
            }
            Command::DropIndex { names, if_exists } => {
                for name in names {
                    if self.indexes.remove(&name).is_none() && !if_exists {
                        return Err(db_error(format!("no such index: {}", name)));
                    }
                }
                Ok(Outcome::default())
            }
            Command::Insert {
                table,
                columns,
                source,
            } => {
                let incoming = match source {
                    InsertSource::Values(rows) => rows
                        .iter()
                        .map(|row| {
                            row.iter()
                                .map(|e| eval(e, &|_: &str| None))
                                .collect::<Result<Vec<_>>>()
                        })
                        .collect::<Result<Vec<_>>>()?,
                    InsertSource::Select(query) => self.select(&query)?,
                };
                let count = incoming.len();
                self.insert(&table, columns, incoming)?;
                Ok(Outcome::affected(count))
            }
            Command::Update {
                table,
                assignments,
                selection,
            } => {
                let t = self.table_mut(&table)?;
                let targets = assignments
                    .iter()
                    .map(|(col, _)| t.require(&table, col))
                    .collect::<Result<Vec<_>>>()?;
                let mut affected = 0;
                for i in 0..t.rows.len() {
                    if !matches(selection.as_ref(), &t.columns, &t.rows[i])? {
                        continue;
                    }
                    let mut updated = t.rows[i].clone();
                    for ((_, expr), &pos) in assignments.iter().zip(&targets) {
                        let value = eval(expr, &row_lookup(&t.columns, &t.rows[i]))?;
                        let spec = &t.columns[pos];
                        let value = cast(value, &spec.column_type)?;
                        if value.is_null() && !spec.nullable {
                            return Err(db_error(format!(
                                "NOT NULL constraint failed: {}.{}",
                                table, spec.name
                            )));
                        }
                        updated[pos] = value;
                    }
                    t.rows[i] = updated;
                    affected += 1;
                }
                self.check_unique(&table)?;
                Ok(Outcome::affected(affected))
            }
            Command::Delete { table, selection } => {
                let t = self.table_mut(&table)?;
                let before = t.rows.len();
                let mut kept = Vec::with_capacity(before);
                for row in std::mem::take(&mut t.rows) {
                    if !matches(selection.as_ref(), &t.columns, &row)? {
                        kept.push(row);
                    }
                }
                t.rows = kept;
                Ok(Outcome::affected(before - t.rows.len()))
            }
            Command::Select(query) => Ok(Outcome {
                affected: 0,
                rows: self.select(&query)?,
            }),
        }
    }

    fn alter_column(&mut self, table: &str, column: &str, change: ColumnAlter) -> Result<()> {
        let t = self.table_mut(table)?;
        let pos = t.require(table, column)?;
        match change {
            ColumnAlter::SetNotNull => {
                if t.rows.iter().any(|row| row[pos].is_null()) {
                    return Err(db_error(format!(
                        "column \"{}\" of relation \"{}\" contains null values",
                        column, table
                    )));
                }
                t.columns[pos].nullable = false;
            }
            ColumnAlter::DropNotNull => {
                if t.columns[pos].primary_key {
                    return Err(db_error(format!("column \"{}\" is in a primary key", column)));
                }
                t.columns[pos].nullable = true;
            }
            ColumnAlter::SetDefault(literal) => t.columns[pos].default = Some(literal),
            ColumnAlter::DropDefault => t.columns[pos].default = None,
            ColumnAlter::SetType { data_type, using } => {
                let target = ColumnType::parse(&data_type);
                let mut converted = Vec::with_capacity(t.rows.len());
                for row in &t.rows {
                    let value = match &using {
                        Some(expr) => eval(expr, &row_lookup(&t.columns, row))?,
                        None => row[pos].clone(),
                    };
                    converted.push(cast(value, &target)?);
                }
                for (row, value) in t.rows.iter_mut().zip(converted) {
                    row[pos] = value;
                }
                t.columns[pos].data_type = data_type;
                t.columns[pos].column_type = target;
                self.check_unique(table)?;
            }
        }
        Ok(())
    }

    fn insert(&mut self, table: &str, columns: Option<Vec<String>>, incoming: Vec<Row>) -> Result<()> {
        let t = self.table_mut(table)?;
        let targets: Vec<usize> = match &columns {
            Some(names) => names
                .iter()
                .map(|name| t.require(table, name))
                .collect::<Result<Vec<_>>>()?,
            None => (0..t.columns.len()).collect(),
        };

        for values in incoming {
            if values.len() != targets.len() {
                return Err(db_error(format!(
                    "table {} has {} target columns but {} values were supplied",
                    table,
                    targets.len(),
                    values.len()
                )));
            }
            let mut row: Row = t.columns.iter().map(ColumnSpec::default_value).collect();
            for (value, &pos) in values.into_iter().zip(&targets) {
                row[pos] = value;
            }
            for (pos, spec) in t.columns.iter().enumerate() {
                let value = cast(std::mem::replace(&mut row[pos], Value::Null), &spec.column_type)?;
                if value.is_null() && !spec.nullable {
                    return Err(db_error(format!(
                        "NOT NULL constraint failed: {}.{}",
                        table, spec.name
                    )));
                }
                row[pos] = value;
            }
            t.rows.push(row);
        }
        self.check_unique(table)
    }

    /// Enforces unique indexes and UNIQUE/PRIMARY KEY columns of `table`.
    fn check_unique(&self, table: &str) -> Result<()> {
        let t = self.table(table)?;
        let mut constraints: Vec<(String, Vec<usize>, Option<&Expr>)> = Vec::new();
        for idx in self.indexes_of(table).filter(|idx| idx.info.unique) {
            let positions = idx
                .info
                .columns
                .iter()
                .map(|c| t.require(table, c))
                .collect::<Result<Vec<_>>>()?;
            constraints.push((idx.info.name.clone(), positions, idx.predicate.as_ref()));
        }
        for (pos, spec) in t.columns.iter().enumerate() {
            if spec.unique || spec.primary_key {
                constraints.push((format!("{}.{}", table, spec.name), vec![pos], None));
            }
        }

        for (name, positions, predicate) in constraints {
            let mut seen = HashSet::new();
            for row in &t.rows {
                if !matches(predicate, &t.columns, row)? {
                    continue;
                }
                let key: Vec<&Value> = positions.iter().map(|&p| &row[p]).collect();
                if key.iter().any(|v| v.is_null()) {
                    continue;
                }
                let rendered: Vec<String> = key.iter().map(|v| v.to_string()).collect();
                if !seen.insert(rendered) {
                    return Err(db_error(format!("UNIQUE constraint failed: {}", name)));
                }
            }
        }
        Ok(())
    }

    fn select(&self, query: &SelectQuery) -> Result<Vec<Row>> {
        let empty = [Vec::new()];
        let (columns, rows): (&[ColumnSpec], &[Row]) = match &query.table {
            Some(name) => {
                let t = self.table(name)?;
                (&t.columns, &t.rows)
            }
            None => (&[], &empty),
        };

        let mut filtered = Vec::new();
        for row in rows {
            if matches(query.selection.as_ref(), columns, row)? {
                filtered.push(row);
            }
        }

        let aggregate = query
            .projection
            .iter()
            .any(|p| matches!(p, Projection::Expr(e) if e.is_count()));
        if aggregate {
            let mut out = Vec::with_capacity(query.projection.len());
            for item in &query.projection {
                let Projection::Expr(Expr::Function { name, args }) = item else {
                    return Err(db_error("only COUNT may appear in an aggregate query"));
                };
                if name != "COUNT" {
                    return Err(db_error(format!("{} cannot be mixed with COUNT", name)));
                }
                let count = match args.first() {
                    None | Some(Expr::Wildcard) => filtered.len(),
                    Some(arg) => {
                        let mut n = 0;
                        for row in &filtered {
                            if !eval(arg, &row_lookup(columns, row))?.is_null() {
                                n += 1;
                            }
                        }
                        n
                    }
                };
                out.push(Value::Integer(count as i64));
            }
            return Ok(vec![out]);
        }

        filtered
            .into_iter()
            .map(|row| {
                let mut out = Vec::new();
                for item in &query.projection {
                    match item {
                        Projection::Wildcard => out.extend(row.iter().cloned()),
                        Projection::Expr(expr) => out.push(eval(expr, &row_lookup(columns, row))?),
                    }
                }
                Ok(out)
            })
            .collect()
    }

    fn column_infos(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let t = self.table(table)?;
        let uniquely_indexed: HashSet<&str> = self
            .indexes_of(table)
            .filter(|idx| idx.info.unique && !idx.info.partial && idx.info.columns.len() == 1)
            .map(|idx| idx.info.columns[0].as_str())
            .collect();
        Ok(t.columns
            .iter()
            .map(|spec| ColumnInfo {
                name: spec.name.clone(),
                data_type: spec.data_type.clone(),
                nullable: spec.nullable,
                unique: spec.unique || uniquely_indexed.contains(spec.name.as_str()),
                default_value: spec.default.clone(),
                primary_key: spec.primary_key,
            })
            .collect())
    }

    fn index_infos(&self, table: &str) -> Result<Vec<IndexInfo>> {
        self.table(table)?;
        Ok(self.indexes_of(table).map(|idx| idx.info.clone()).collect())
    }
}

/// Statements that fail on purpose, shared with open transactions.
#[derive(Debug, Default)]
struct FailureInjector {
    patterns: Mutex<Vec<String>>,
}

impl FailureInjector {
    fn check(&self, sql: &str) -> Result<()> {
        let patterns = self.patterns.lock()?;
        match patterns.iter().find(|p| sql.contains(p.as_str())) {
            Some(pattern) => Err(db_error(format!("injected failure on '{}'", pattern))),
            None => Ok(()),
        }
    }
}

/// Parses and runs one statement against a copy of `state`; the copy
/// replaces `state` only on success.
fn run(state: &mut State, injector: &FailureInjector, sql: &str, params: &[Value]) -> Result<Outcome> {
    injector.check(sql)?;
    let command = Command::parse(sql, params)?;
    if command.is_query() {
        return state.apply(command);
    }
    let mut next = state.clone();
    let outcome = next.apply(command)?;
    *state = next;
    Ok(outcome)
}

pub struct MemoryDatabase {
    committed: Arc<RwLock<State>>,
    write_gate: Arc<AsyncMutex<()>>,
    failures: Arc<FailureInjector>,
    log: Arc<Mutex<Vec<String>>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self {
            committed: Arc::new(RwLock::new(State::default())),
            write_gate: Arc::new(AsyncMutex::new(())),
            failures: Arc::new(FailureInjector::default()),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Makes every later statement containing `pattern` fail.
    pub fn fail_on(&self, pattern: impl Into<String>) {
        match self.failures.patterns.lock() {
            Ok(mut guard) => guard.push(pattern.into()),
            Err(poisoned) => poisoned.into_inner().push(pattern.into()),
        }
    }

    pub fn clear_failures(&self) {
        match self.failures.patterns.lock() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    /// Statements that took effect, in commit order.
    pub fn executed_statements(&self) -> Vec<String> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn table_names(&self) -> Result<Vec<String>> {
        Ok(self.committed.read()?.tables.keys().cloned().collect())
    }

    fn record(&self, statements: impl IntoIterator<Item = String>) -> Result<()> {
        self.log.lock()?.extend(statements);
        Ok(())
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDatabase")
            .field("tables", &self.table_names().unwrap_or_default())
            .finish()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.committed.read()?.tables.contains_key(table))
    }

    async fn introspect_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        self.committed.read()?.column_infos(table)
    }

    async fn introspect_indexes(&self, table: &str) -> Result<Vec<IndexInfo>> {
        self.committed.read()?.index_infos(table)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let _turn = self.write_gate.lock().await;
        let mut state = self.committed.read()?.clone();
        let outcome = run(&mut state, &self.failures, sql, params)?;
        *self.committed.write()? = state;
        self.record([sql.to_string()])?;
        event!(Level::DEBUG, sql = %sql, affected = outcome.affected, "statement executed");
        Ok(outcome.affected)
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.failures.check(sql)?;
        let Command::Select(select) = Command::parse(sql, params)? else {
            return Err(db_error("query() only runs SELECT; use execute()"));
        };
        self.committed.read()?.select(&select)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let turn = Arc::clone(&self.write_gate).lock_owned().await;
        let working = self.committed.read()?.clone();
        event!(Level::DEBUG, "transaction started");
        Ok(Box::new(MemoryTransaction {
            working,
            pending: Vec::new(),
            committed: Arc::clone(&self.committed),
            failures: Arc::clone(&self.failures),
            log: Arc::clone(&self.log),
            _turn: turn,
        }))
    }
}

pub struct MemoryTransaction {
    working: State,
    pending: Vec<String>,
    committed: Arc<RwLock<State>>,
    failures: Arc<FailureInjector>,
    log: Arc<Mutex<Vec<String>>>,
    _turn: OwnedMutexGuard<()>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let outcome = run(&mut self.working, &self.failures, sql, params)?;
        self.pending.push(sql.to_string());
        Ok(outcome.affected)
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let outcome = run(&mut self.working, &self.failures, sql, params)?;
        Ok(outcome.rows)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        *this.committed.write()? = this.working;
        let count = this.pending.len();
        this.log.lock()?.extend(this.pending);
        event!(Level::DEBUG, statements = count, "transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        event!(Level::DEBUG, discarded = self.pending.len(), "transaction rolled back");
        Ok(())
    }
}
