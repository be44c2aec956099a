//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rethink_core::pool::{ConnectionPool, PoolConfig};
use rethink_core::{Gateway, MemoryTransport, Reconciler, SchemaRegistry};

pub const DB: &str = "test";

/// Route library logs to the test harness; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn gateway(registry: SchemaRegistry) -> (Arc<MemoryTransport>, Gateway<MemoryTransport>) {
    gateway_with(registry, PoolConfig::default(), Duration::from_secs(2))
}

pub fn gateway_with(
    registry: SchemaRegistry,
    pool: PoolConfig,
    timeout: Duration,
) -> (Arc<MemoryTransport>, Gateway<MemoryTransport>) {
    init_tracing();
    let transport = Arc::new(MemoryTransport::new());
    let pool = ConnectionPool::new(Arc::clone(&transport), pool);
    (transport, Gateway::new(pool, Arc::new(registry), DB, timeout))
}

/// Gateway plus a reconciler over the same pool, with the schema already applied.
pub async fn migrated(
    registry: SchemaRegistry,
) -> (Arc<MemoryTransport>, Gateway<MemoryTransport>) {
    let (transport, gateway) = gateway(registry);
    Reconciler::new(gateway.clone()).autoupdate().await.unwrap();
    (transport, gateway)
}

pub fn ids(rows: &[rethink_core::Document]) -> Vec<String> {
    rows.iter()
        .map(|row| {
            row.get("id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        })
        .collect()
}
