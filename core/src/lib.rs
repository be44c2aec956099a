//! rethink_core - document-store adapter core
//!
//! Translates backend-neutral model schemas, filters and CRUD requests into
//! native operations against a table/document store, executed through a
//! bounded connection pool.

pub mod adapter;
pub mod config;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod pool;
pub mod query;
pub mod reconcile;
pub mod schema;
pub mod transport;
pub mod value;

pub use adapter::Adapter;
pub use config::Settings;
pub use error::{AdapterError, AdapterResult};
pub use gateway::Gateway;
pub use memory::MemoryTransport;
pub use pool::{ConnectionPool, PoolConfig, PoolStatus, PooledConnection};
pub use query::{Filter, OrderBy, QueryDescriptor};
pub use reconcile::{Mode, ReconciliationPlan, Reconciler};
pub use schema::{FieldSchema, FieldType, ModelSchema, SchemaRegistry};
pub use transport::{Transport, WriteAck};
pub use value::{Document, Value};
