//! Minimal database capability interface.
//!
//! The engine never talks to a SQL backend directly. It introspects tables
//! and applies statements through [`Database`] and [`Transaction`], so any
//! backend with an async driver can be plugged in. [`MemoryDatabase`] is an
//! in-process implementation used by the tests and by dry environments.

pub mod memory;

pub use memory::MemoryDatabase;

use crate::core::{Result, Row, Value};
use crate::schema::{ColumnInfo, IndexInfo, LiveTable};
use async_trait::async_trait;

#[async_trait]
pub trait Database: Send + Sync {
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Columns of `table` in physical order.
    async fn introspect_columns(&self, table: &str) -> Result<Vec<ColumnInfo>>;

    async fn introspect_indexes(&self, table: &str) -> Result<Vec<IndexInfo>>;

    /// Runs one statement outside of any transaction; returns affected rows.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Opens a transaction. Statements run through it are invisible to
    /// other readers until [`Transaction::commit`].
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Full live shape of `table`, or `None` when it does not exist.
    async fn introspect(&self, table: &str) -> Result<Option<LiveTable>> {
        if !self.table_exists(table).await? {
            return Ok(None);
        }
        Ok(Some(LiveTable {
            columns: self.introspect_columns(table).await?,
            indexes: self.introspect_indexes(table).await?,
        }))
    }
}

#[async_trait]
pub trait Transaction: Send {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
