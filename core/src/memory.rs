//! In-memory transport.
//!
//! Holds databases, tables and index names in process and evaluates
//! [`ExecutableQuery`] values directly. Used for embedding and as the backend
//! for tests, where injected latency and failures exercise the gateway's
//! timeout and error paths.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{AdapterError, AdapterResult};
use crate::query::{Access, Direction, ExecutableQuery};
use crate::schema::ID_FIELD;
use crate::transport::{Transport, WriteAck};
use crate::value::{Document, Value};

#[derive(Debug, Default)]
struct MemoryTable {
    rows: Vec<Document>,
    indexes: BTreeSet<String>,
}

impl MemoryTable {
    fn position(&self, id: &Value) -> Option<usize> {
        self.rows.iter().position(|row| {
            row.get(ID_FIELD)
                .is_some_and(|v| v.compare(id) == Some(Ordering::Equal))
        })
    }

    /// Positions of the rows a query selects, after ordering and pagination.
    fn select(&self, query: &ExecutableQuery) -> AdapterResult<Vec<usize>> {
        if let Access::Index(access) = &query.access
            && access.index() != ID_FIELD
            && !self.indexes.contains(access.index())
        {
            return Err(AdapterError::Transport(format!(
                "Index `{}` was not found on table `{}`",
                access.index(),
                query.table
            )));
        }

        let mut selected: Vec<usize> = self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| query.matches(row))
            .map(|(i, _)| i)
            .collect();

        selected.sort_by(|&a, &b| {
            for entry in &query.order {
                let left = self.rows[a].get(&entry.field).unwrap_or(&Value::Null);
                let right = self.rows[b].get(&entry.field).unwrap_or(&Value::Null);
                let ord = match entry.direction {
                    Direction::Asc => left.sort_cmp(right),
                    Direction::Desc => right.sort_cmp(left),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        let skip = query.skip.unwrap_or(0) as usize;
        let limit = query.limit.map_or(usize::MAX, |l| l as usize);
        Ok(selected.into_iter().skip(skip).take(limit).collect())
    }
}

/// Call counters, for asserting what the gateway and reconciler did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub connects: u64,
    pub closes: u64,
    pub tables_created: u64,
    pub indexes_created: u64,
    pub queries: u64,
    pub writes: u64,
}

impl MemoryStats {
    pub fn open_connections(&self) -> u64 {
        self.connects - self.closes
    }
}

#[derive(Debug)]
pub struct MemoryConnection {
    id: u64,
}

impl MemoryConnection {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Default)]
pub struct MemoryTransport {
    databases: Mutex<BTreeMap<String, BTreeMap<String, MemoryTable>>>,
    stats: Mutex<MemoryStats>,
    next_connection: AtomicU64,
    latency: Mutex<Option<Duration>>,
    failures: Mutex<Vec<(&'static str, AdapterError)>>,
    refuse_connections: Mutex<Option<String>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> MemoryStats {
        *self.stats.lock()
    }

    /// Delay every data call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Make the next call of `op` (a [`Transport`] method name) fail with `error`.
    pub fn fail_next(&self, op: &'static str, error: AdapterError) {
        self.failures.lock().push((op, error));
    }

    /// Refuse new connections with the given message, or accept them again.
    pub fn refuse_connections(&self, message: Option<&str>) {
        *self.refuse_connections.lock() = message.map(str::to_string);
    }

    /// Create a table outside of any connection, for fixtures.
    pub fn seed_table(&self, db: &str, table: &str, rows: Vec<Document>) {
        let mut databases = self.databases.lock();
        let entry = databases
            .entry(db.to_string())
            .or_default()
            .entry(table.to_string())
            .or_default();
        entry.rows.extend(rows);
    }

    pub fn seed_index(&self, db: &str, table: &str, field: &str) {
        self.databases
            .lock()
            .entry(db.to_string())
            .or_default()
            .entry(table.to_string())
            .or_default()
            .indexes
            .insert(field.to_string());
    }

    pub fn tables(&self, db: &str) -> Vec<String> {
        self.databases
            .lock()
            .get(db)
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn indexes(&self, db: &str, table: &str) -> Vec<String> {
        self.databases
            .lock()
            .get(db)
            .and_then(|tables| tables.get(table))
            .map(|t| t.indexes.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of a table's rows in insertion order.
    pub fn rows(&self, db: &str, table: &str) -> Vec<Document> {
        self.databases
            .lock()
            .get(db)
            .and_then(|tables| tables.get(table))
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    async fn enter(&self, op: &'static str) -> AdapterResult<()> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut failures = self.failures.lock();
        match failures.iter().position(|(name, _)| *name == op) {
            Some(pos) => Err(failures.remove(pos).1),
            None => Ok(()),
        }
    }

    fn with_table<R>(
        &self,
        db: &str,
        table: &str,
        f: impl FnOnce(&mut MemoryTable) -> AdapterResult<R>,
    ) -> AdapterResult<R> {
        let mut databases = self.databases.lock();
        let table_ref = databases
            .get_mut(db)
            .and_then(|tables| tables.get_mut(table))
            .ok_or_else(|| {
                AdapterError::Transport(format!("Table `{db}.{table}` does not exist"))
            })?;
        f(table_ref)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Connection = MemoryConnection;

    async fn connect(&self) -> AdapterResult<MemoryConnection> {
        if let Some(message) = self.refuse_connections.lock().clone() {
            return Err(AdapterError::Transport(message));
        }
        self.stats.lock().connects += 1;
        Ok(MemoryConnection {
            id: self.next_connection.fetch_add(1, AtomicOrdering::Relaxed),
        })
    }

    fn close(&self, _conn: MemoryConnection) {
        self.stats.lock().closes += 1;
    }

    async fn list_tables(&self, _conn: &mut MemoryConnection, db: &str) -> AdapterResult<Vec<String>> {
        self.enter("list_tables").await?;
        Ok(self.tables(db))
    }

    async fn create_table(
        &self,
        _conn: &mut MemoryConnection,
        db: &str,
        table: &str,
    ) -> AdapterResult<()> {
        self.enter("create_table").await?;
        let mut databases = self.databases.lock();
        let tables = databases.entry(db.to_string()).or_default();
        if tables.contains_key(table) {
            return Err(AdapterError::Transport(format!(
                "Table `{db}.{table}` already exists"
            )));
        }
        tables.insert(table.to_string(), MemoryTable::default());
        self.stats.lock().tables_created += 1;
        Ok(())
    }

    async fn list_indexes(
        &self,
        _conn: &mut MemoryConnection,
        db: &str,
        table: &str,
    ) -> AdapterResult<Vec<String>> {
        self.enter("list_indexes").await?;
        self.with_table(db, table, |t| Ok(t.indexes.iter().cloned().collect()))
    }

    async fn create_index(
        &self,
        _conn: &mut MemoryConnection,
        db: &str,
        table: &str,
        field: &str,
    ) -> AdapterResult<()> {
        self.enter("create_index").await?;
        if field == ID_FIELD {
            return Err(AdapterError::Transport(format!(
                "Index name conflict: `{ID_FIELD}` is the primary key of `{db}.{table}`"
            )));
        }
        self.with_table(db, table, |t| {
            if !t.indexes.insert(field.to_string()) {
                return Err(AdapterError::Transport(format!(
                    "Index `{field}` already exists on table `{db}.{table}`"
                )));
            }
            Ok(())
        })?;
        self.stats.lock().indexes_created += 1;
        Ok(())
    }

    async fn run_query(
        &self,
        _conn: &mut MemoryConnection,
        db: &str,
        query: &ExecutableQuery,
    ) -> AdapterResult<Vec<Document>> {
        self.enter("run_query").await?;
        self.stats.lock().queries += 1;
        self.with_table(db, &query.table, |t| {
            Ok(t.select(query)?
                .into_iter()
                .map(|i| t.rows[i].clone())
                .collect())
        })
    }

    async fn insert(
        &self,
        _conn: &mut MemoryConnection,
        db: &str,
        table: &str,
        docs: Vec<Document>,
        upsert: bool,
    ) -> AdapterResult<WriteAck> {
        self.enter("insert").await?;
        self.stats.lock().writes += 1;
        self.with_table(db, table, |t| {
            let mut ack = WriteAck::default();
            for mut doc in docs {
                let id = match doc.get(ID_FIELD) {
                    Some(id) if !id.is_null() => id.clone(),
                    _ => {
                        let key = uuid::Uuid::new_v4().to_string();
                        doc.insert(ID_FIELD.to_string(), Value::String(key.clone()));
                        ack.generated_keys.push(key.clone());
                        Value::String(key)
                    }
                };
                match t.position(&id) {
                    Some(pos) if upsert => {
                        if t.rows[pos] == doc {
                            ack.unchanged += 1;
                        } else {
                            t.rows[pos] = doc;
                            ack.replaced += 1;
                        }
                    }
                    Some(_) => {
                        ack.errors += 1;
                        ack.first_error
                            .get_or_insert_with(|| format!("Duplicate primary key `id`: {id:?}"));
                    }
                    None => {
                        t.rows.push(doc);
                        ack.inserted += 1;
                    }
                }
            }
            Ok(ack)
        })
    }

    async fn update(
        &self,
        _conn: &mut MemoryConnection,
        db: &str,
        query: &ExecutableQuery,
        patch: Document,
    ) -> AdapterResult<WriteAck> {
        self.enter("update").await?;
        self.stats.lock().writes += 1;
        self.with_table(db, &query.table, |t| {
            let mut ack = WriteAck::default();
            for pos in t.select(query)? {
                let row = &mut t.rows[pos];
                if let Some(new_id) = patch.get(ID_FIELD)
                    && row.get(ID_FIELD) != Some(new_id)
                {
                    ack.errors += 1;
                    ack.first_error
                        .get_or_insert_with(|| "Primary key `id` cannot be changed".to_string());
                    continue;
                }
                let before = row.clone();
                row.extend(patch.clone());
                if *row == before {
                    ack.unchanged += 1;
                } else {
                    ack.replaced += 1;
                }
            }
            Ok(ack)
        })
    }

    async fn delete(
        &self,
        _conn: &mut MemoryConnection,
        db: &str,
        query: &ExecutableQuery,
    ) -> AdapterResult<WriteAck> {
        self.enter("delete").await?;
        self.stats.lock().writes += 1;
        self.with_table(db, &query.table, |t| {
            let doomed: BTreeSet<usize> = t.select(query)?.into_iter().collect();
            let mut pos = 0;
            t.rows.retain(|_| {
                let keep = !doomed.contains(&pos);
                pos += 1;
                keep
            });
            Ok(WriteAck {
                deleted: doomed.len() as u64,
                ..WriteAck::default()
            })
        })
    }

    async fn count(
        &self,
        _conn: &mut MemoryConnection,
        db: &str,
        query: &ExecutableQuery,
    ) -> AdapterResult<u64> {
        self.enter("count").await?;
        self.stats.lock().queries += 1;
        self.with_table(db, &query.table, |t| Ok(t.select(query)?.len() as u64))
    }
}
