//! Backend transport.
//!
//! The primitives a store driver exposes to the gateway. Every call takes a
//! live connection checked out of the pool; the gateway is the only caller.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{AdapterError, AdapterResult};
use crate::query::ExecutableQuery;
use crate::value::Document;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Open a new connection.
    async fn connect(&self) -> AdapterResult<Self::Connection>;

    /// Tear a connection down. Must not block.
    fn close(&self, conn: Self::Connection);

    async fn list_tables(&self, conn: &mut Self::Connection, db: &str) -> AdapterResult<Vec<String>>;

    async fn create_table(&self, conn: &mut Self::Connection, db: &str, table: &str) -> AdapterResult<()>;

    async fn list_indexes(
        &self,
        conn: &mut Self::Connection,
        db: &str,
        table: &str,
    ) -> AdapterResult<Vec<String>>;

    async fn create_index(
        &self,
        conn: &mut Self::Connection,
        db: &str,
        table: &str,
        field: &str,
    ) -> AdapterResult<()>;

    async fn run_query(
        &self,
        conn: &mut Self::Connection,
        db: &str,
        query: &ExecutableQuery,
    ) -> AdapterResult<Vec<Document>>;

    /// Insert documents; with `upsert` an existing row with the same id is replaced.
    async fn insert(
        &self,
        conn: &mut Self::Connection,
        db: &str,
        table: &str,
        docs: Vec<Document>,
        upsert: bool,
    ) -> AdapterResult<WriteAck>;

    /// Merge `patch` into every row the query selects.
    async fn update(
        &self,
        conn: &mut Self::Connection,
        db: &str,
        query: &ExecutableQuery,
        patch: Document,
    ) -> AdapterResult<WriteAck>;

    async fn delete(
        &self,
        conn: &mut Self::Connection,
        db: &str,
        query: &ExecutableQuery,
    ) -> AdapterResult<WriteAck>;

    async fn count(
        &self,
        conn: &mut Self::Connection,
        db: &str,
        query: &ExecutableQuery,
    ) -> AdapterResult<u64>;
}

/// Write acknowledgment as reported by the store.
///
/// A write can succeed at the transport level and still carry row-level
/// errors; [`WriteAck::check`] turns those into `WriteConflict`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WriteAck {
    pub inserted: u64,
    pub replaced: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub deleted: u64,
    pub errors: u64,
    pub first_error: Option<String>,
    pub generated_keys: Vec<String>,
}

impl WriteAck {
    pub fn check(self) -> AdapterResult<Self> {
        if let Some(message) = &self.first_error {
            return Err(AdapterError::WriteConflict(message.clone()));
        }
        if self.errors > 0 {
            return Err(AdapterError::WriteConflict(format!(
                "{} row(s) failed to write",
                self.errors
            )));
        }
        Ok(self)
    }

    /// Rows touched by the write, whatever the kind of change.
    pub fn affected(&self) -> u64 {
        self.inserted + self.replaced + self.unchanged + self.deleted
    }
}
