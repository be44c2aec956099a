//! Adapter façade: one pool, one gateway and one reconciler per data source.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::error::AdapterResult;
use crate::gateway::Gateway;
use crate::pool::{ConnectionPool, PoolConfig};
use crate::reconcile::{ReconciliationPlan, Reconciler};
use crate::schema::SchemaRegistry;
use crate::transport::Transport;

pub struct Adapter<T: Transport> {
    settings: Settings,
    gateway: Gateway<T>,
    reconciler: Reconciler<T>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> Adapter<T> {
    /// Build the adapter without touching the store. The registry is frozen
    /// from here on.
    pub fn new(settings: Settings, registry: SchemaRegistry, transport: T) -> AdapterResult<Self> {
        let settings = settings.resolve()?;
        let pool = ConnectionPool::new(Arc::new(transport), PoolConfig::from(&settings));
        let gateway = Gateway::new(
            pool,
            Arc::new(registry),
            settings.database(),
            settings.operation_timeout(),
        );
        Ok(Self {
            reconciler: Reconciler::new(gateway.clone()),
            gateway,
            settings,
            reaper: Mutex::new(None),
        })
    }

    /// Build the adapter, open the idle floor and start reclaiming idle
    /// connections in the background.
    pub async fn connect(settings: Settings, registry: SchemaRegistry, transport: T) -> AdapterResult<Self> {
        let adapter = Self::new(settings, registry, transport)?;
        let pool = adapter.gateway.pool();
        pool.fill_idle().await?;
        *adapter.reaper.lock() = Some(pool.spawn_reaper(pool.config().idle_timeout));
        tracing::info!(
            "Connected to {}:{}/{}",
            adapter.settings.host,
            adapter.settings.port,
            adapter.settings.database()
        );
        Ok(adapter)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn gateway(&self) -> &Gateway<T> {
        &self.gateway
    }

    pub fn reconciler(&self) -> &Reconciler<T> {
        &self.reconciler
    }

    pub async fn autoupdate(&self) -> AdapterResult<()> {
        self.reconciler.autoupdate().await
    }

    pub async fn automigrate(&self) -> AdapterResult<()> {
        self.reconciler.automigrate().await
    }

    pub async fn is_actual(&self) -> AdapterResult<bool> {
        self.reconciler.is_actual().await
    }

    pub async fn plan(&self) -> AdapterResult<ReconciliationPlan> {
        self.reconciler.plan().await
    }

    /// Stop the reaper and drain the pool.
    pub fn disconnect(&self) {
        if let Some(reaper) = self.reaper.lock().take() {
            reaper.abort();
        }
        self.gateway.disconnect();
    }
}

impl<T: Transport> Drop for Adapter<T> {
    fn drop(&mut self) {
        if let Some(reaper) = self.reaper.get_mut().take() {
            reaper.abort();
        }
    }
}
