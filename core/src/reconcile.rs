//! Schema reconciliation.
//!
//! A pass lists the live tables once, then runs one pipeline per model
//! (table check, then index check) with all models in flight at once. Steps
//! within a model are sequential. The pass waits for every model before
//! reporting; a failing model does not cancel its siblings.

use std::collections::{BTreeMap, BTreeSet};

use futures::StreamExt;
use futures::stream::FuturesUnordered;

use crate::error::AdapterResult;
use crate::gateway::Gateway;
use crate::schema::ModelSchema;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Create whatever is missing.
    Converge,
    /// Report drift without touching the store.
    CheckOnly,
}

/// What a pass found missing. In converge mode this is what it created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    pub tables_to_create: BTreeSet<String>,
    pub indexes_to_create: BTreeMap<String, Vec<String>>,
}

impl ReconciliationPlan {
    pub fn is_empty(&self) -> bool {
        self.tables_to_create.is_empty() && self.indexes_to_create.is_empty()
    }

    fn record(&mut self, drift: ModelDrift) {
        if drift.table_missing {
            self.tables_to_create.insert(drift.model.clone());
        }
        if !drift.missing_indexes.is_empty() {
            self.indexes_to_create
                .insert(drift.model, drift.missing_indexes);
        }
    }
}

#[derive(Debug)]
struct ModelDrift {
    model: String,
    table_missing: bool,
    missing_indexes: Vec<String>,
}

pub struct Reconciler<T: Transport> {
    gateway: Gateway<T>,
}

impl<T: Transport> Reconciler<T> {
    pub fn new(gateway: Gateway<T>) -> Self {
        Self { gateway }
    }

    /// Create missing tables and indexes.
    pub async fn autoupdate(&self) -> AdapterResult<()> {
        self.pass(Mode::Converge).await.map(|_| ())
    }

    /// Same as [`Self::autoupdate`]; nothing is ever dropped.
    pub async fn automigrate(&self) -> AdapterResult<()> {
        self.autoupdate().await
    }

    /// Whether every declared table and index exists.
    pub async fn is_actual(&self) -> AdapterResult<bool> {
        self.reconcile(Mode::CheckOnly).await
    }

    /// Compute what a converge pass would create, without creating it.
    pub async fn plan(&self) -> AdapterResult<ReconciliationPlan> {
        self.pass(Mode::CheckOnly).await
    }

    /// Run one pass. Converge returns `true` once everything exists;
    /// check-only returns whether nothing was missing.
    pub async fn reconcile(&self, mode: Mode) -> AdapterResult<bool> {
        let plan = self.pass(mode).await?;
        Ok(match mode {
            Mode::Converge => true,
            Mode::CheckOnly => plan.is_empty(),
        })
    }

    async fn pass(&self, mode: Mode) -> AdapterResult<ReconciliationPlan> {
        let registry = self.gateway.registry();
        if registry.is_empty() {
            return Ok(ReconciliationPlan::default());
        }

        let live: BTreeSet<String> = self
            .gateway
            .run("list_tables", "*", |t, conn, db| t.list_tables(conn, db))
            .await?
            .into_iter()
            .collect();

        let mut pending: FuturesUnordered<_> = registry
            .models()
            .map(|model| self.reconcile_model(model, &live, mode))
            .collect();

        let mut plan = ReconciliationPlan::default();
        let mut first_error = None;
        while let Some(outcome) = pending.next().await {
            match outcome {
                Ok(drift) => plan.record(drift),
                Err(e) => {
                    tracing::error!("Reconciliation failed: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(plan),
        }
    }

    async fn reconcile_model(
        &self,
        model: &ModelSchema,
        live: &BTreeSet<String>,
        mode: Mode,
    ) -> AdapterResult<ModelDrift> {
        let name = model.name();
        let table_missing = !live.contains(name);
        let wanted: Vec<String> = model.index_fields().map(str::to_string).collect();

        if table_missing {
            if mode == Mode::CheckOnly {
                return Ok(ModelDrift {
                    model: name.to_string(),
                    table_missing,
                    missing_indexes: wanted,
                });
            }
            let table = name.to_string();
            self.gateway
                .run("create_table", name, move |t, conn, db| {
                    Box::pin(async move { t.create_table(conn, db, &table).await })
                })
                .await?;
            tracing::info!("Created table {name}");
        }

        let table = name.to_string();
        let existing: BTreeSet<String> = self
            .gateway
            .run("list_indexes", name, move |t, conn, db| {
                Box::pin(async move { t.list_indexes(conn, db, &table).await })
            })
            .await?
            .into_iter()
            .collect();

        let missing_indexes: Vec<String> = wanted
            .into_iter()
            .filter(|field| !existing.contains(field))
            .collect();

        if mode == Mode::Converge {
            for field in &missing_indexes {
                let (table, index) = (name.to_string(), field.clone());
                self.gateway
                    .run("create_index", name, move |t, conn, db| {
                        Box::pin(async move { t.create_index(conn, db, &table, &index).await })
                    })
                    .await?;
                tracing::info!("Created index {field} on {name}");
            }
        }

        Ok(ModelDrift {
            model: name.to_string(),
            table_missing,
            missing_indexes,
        })
    }
}
