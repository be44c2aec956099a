//! Execution gateway.
//!
//! Every operation follows the same shape: resolve the model and compile
//! whatever needs compiling, then acquire one pooled connection, run the
//! transport calls, and release. The acquire-execute-release sequence runs
//! under the operation timeout; a connection abandoned by the timeout is
//! destroyed by its guard.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;

use crate::error::{AdapterError, AdapterResult};
use crate::pool::ConnectionPool;
use crate::query::{ExecutableQuery, Filter, QueryDescriptor, compile};
use crate::schema::{ID_FIELD, ModelSchema, SchemaRegistry};
use crate::transport::{Transport, WriteAck};
use crate::value::{Document, Value, from_epoch};

type OpFuture<'c, R> = BoxFuture<'c, AdapterResult<R>>;

pub struct Gateway<T: Transport> {
    pool: ConnectionPool<T>,
    registry: Arc<SchemaRegistry>,
    database: String,
    timeout: Duration,
}

impl<T: Transport> Clone for Gateway<T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            registry: Arc::clone(&self.registry),
            database: self.database.clone(),
            timeout: self.timeout,
        }
    }
}

impl<T: Transport> Gateway<T> {
    pub fn new(
        pool: ConnectionPool<T>,
        registry: Arc<SchemaRegistry>,
        database: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            pool,
            registry,
            database: database.into(),
            timeout,
        }
    }

    pub fn pool(&self) -> &ConnectionPool<T> {
        &self.pool
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    fn model(&self, name: &str) -> AdapterResult<&ModelSchema> {
        self.registry.get(name)
    }

    /// Run `f` on one pooled connection, under the operation timeout.
    pub(crate) async fn run<R, F>(&self, op: &'static str, model: &str, f: F) -> AdapterResult<R>
    where
        R: Send,
        F: for<'c> FnOnce(&'c T, &'c mut T::Connection, &'c str) -> OpFuture<'c, R> + Send,
    {
        let started = Instant::now();
        let pool = &self.pool;
        let database = self.database.as_str();

        let work = async move {
            let mut conn = pool.acquire().await?;
            conn.set_in_flight(true);
            let result = f(pool.transport(), &mut *conn, database).await;
            conn.set_in_flight(false);
            result
        };

        let result = match tokio::time::timeout(self.timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("{op} on {model} timed out after {} ms", self.timeout.as_millis());
                Err(AdapterError::Timeout(self.timeout.as_millis() as u64))
            }
        };

        let elapsed = started.elapsed().as_micros();
        match &result {
            Ok(_) => tracing::debug!("{op} on {model} completed in {elapsed}us"),
            Err(e) => tracing::debug!("{op} on {model} failed in {elapsed}us: {e}"),
        }
        result
    }

    /// Rows matching the descriptor, ordered and paginated.
    pub async fn all(&self, model: &str, descriptor: &QueryDescriptor) -> AdapterResult<Vec<Document>> {
        let schema = self.model(model)?;
        let query = descriptor.plan(schema)?;
        let rows = self
            .run("all", model, move |t, conn, db| {
                Box::pin(async move { t.run_query(conn, db, &query).await })
            })
            .await?;
        Ok(rows.into_iter().map(|row| from_store(schema, row)).collect())
    }

    pub async fn count(&self, model: &str, filter: &Filter) -> AdapterResult<u64> {
        let schema = self.model(model)?;
        let query = ExecutableQuery::table(model).with_predicate(compile(schema, filter)?);
        self.run("count", model, move |t, conn, db| {
            Box::pin(async move { t.count(conn, db, &query).await })
        })
        .await
    }

    /// Delete the rows a descriptor selects, honoring its order and pagination.
    /// Returns the number of rows deleted.
    pub async fn remove(&self, model: &str, descriptor: &QueryDescriptor) -> AdapterResult<u64> {
        let schema = self.model(model)?;
        let query = descriptor.plan(schema)?;
        let ack = self
            .run("remove", model, move |t, conn, db| {
                Box::pin(async move { t.delete(conn, db, &query).await })
            })
            .await?
            .check()?;
        Ok(ack.deleted)
    }

    pub async fn destroy_all(&self, model: &str, filter: &Filter) -> AdapterResult<u64> {
        self.remove(model, &QueryDescriptor::new().filter(filter.clone()))
            .await
    }

    /// Insert a new record. A missing or null id is left for the store to
    /// generate; the returned record carries the id either way.
    pub async fn create(&self, model: &str, data: Document) -> AdapterResult<Document> {
        self.insert_one("create", model, data, false).await
    }

    /// Insert or replace by id.
    pub async fn save(&self, model: &str, data: Document) -> AdapterResult<Document> {
        self.insert_one("save", model, data, true).await
    }

    /// Insert or replace by id; the payload is coerced field by field.
    pub async fn update_or_create(&self, model: &str, data: Document) -> AdapterResult<Document> {
        self.insert_one("update_or_create", model, data, true).await
    }

    async fn insert_one(
        &self,
        op: &'static str,
        model: &str,
        data: Document,
        upsert: bool,
    ) -> AdapterResult<Document> {
        let schema = self.model(model)?;
        let mut doc = to_store(schema, data)?;
        if doc.get(ID_FIELD).is_some_and(Value::is_null) {
            doc.remove(ID_FIELD);
        }
        let sent = doc.clone();
        let table = model.to_string();
        let ack = self
            .run(op, model, move |t, conn, db| {
                Box::pin(async move { t.insert(conn, db, &table, vec![sent], upsert).await })
            })
            .await?
            .check()?;
        Ok(from_store(schema, attach_generated_key(doc, &ack)))
    }

    /// Merge `data` into the row with the given id. Returns the payload with
    /// the id set.
    pub async fn update_attributes(
        &self,
        model: &str,
        id: impl Into<Value>,
        data: Document,
    ) -> AdapterResult<Document> {
        let schema = self.model(model)?;
        let id = id.into();
        let mut patch = to_store(schema, data)?;
        patch.insert(ID_FIELD.to_string(), id.clone());
        let sent = patch.clone();
        let query = ExecutableQuery::by_id(model, id);
        self.run("update_attributes", model, move |t, conn, db| {
            Box::pin(async move { t.update(conn, db, &query, sent).await })
        })
        .await?
        .check()?;
        Ok(from_store(schema, patch))
    }

    pub async fn find_by_id(&self, model: &str, id: impl Into<Value>) -> AdapterResult<Option<Document>> {
        let schema = self.model(model)?;
        let query = ExecutableQuery::by_id(model, id.into());
        let rows = self
            .run("find_by_id", model, move |t, conn, db| {
                Box::pin(async move { t.run_query(conn, db, &query).await })
            })
            .await?;
        Ok(rows.into_iter().next().map(|row| from_store(schema, row)))
    }

    pub async fn exists(&self, model: &str, id: impl Into<Value>) -> AdapterResult<bool> {
        self.model(model)?;
        let query = ExecutableQuery::by_id(model, id.into());
        let found = self
            .run("exists", model, move |t, conn, db| {
                Box::pin(async move { t.count(conn, db, &query).await })
            })
            .await?;
        Ok(found > 0)
    }

    /// Delete one row by id. Returns whether a row was deleted.
    pub async fn destroy(&self, model: &str, id: impl Into<Value>) -> AdapterResult<bool> {
        self.model(model)?;
        let query = ExecutableQuery::by_id(model, id.into());
        let ack = self
            .run("destroy", model, move |t, conn, db| {
                Box::pin(async move { t.delete(conn, db, &query).await })
            })
            .await?
            .check()?;
        Ok(ack.deleted > 0)
    }

    /// Drain the pool. Later operations fail with `PoolClosed`.
    pub fn disconnect(&self) {
        self.pool.close();
        tracing::info!("Disconnected from database {}", self.database);
    }
}

/// Write coercion, one field at a time, by declared type.
fn to_store(model: &ModelSchema, data: Document) -> AdapterResult<Document> {
    data.into_iter()
        .map(|(k, v)| {
            let v = model.to_native(&k, v)?;
            Ok((k, v))
        })
        .collect()
}

/// Read coercion: declared date fields come back from epoch seconds.
fn from_store(model: &ModelSchema, mut row: Document) -> Document {
    for (name, value) in row.iter_mut() {
        if model.is_date(name)
            && let Some(date) = value.as_f64().and_then(from_epoch)
        {
            *value = Value::Date(date);
        }
    }
    row
}

fn attach_generated_key(mut doc: Document, ack: &WriteAck) -> Document {
    if !doc.contains_key(ID_FIELD)
        && let Some(key) = ack.generated_keys.first()
    {
        doc.insert(ID_FIELD.to_string(), Value::String(key.clone()));
    }
    doc
}
