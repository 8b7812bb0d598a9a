//! In-memory warehouse
//!
//! Same semantics as the Postgres backend: snapshot replace for rates and a
//! whole-table swap for rebuilds. Used by tests and local dry runs.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::error::WarehouseError;
use crate::models::rate::normalize_currency;
use crate::models::{PricedTable, RatePair, RateQuote};
use crate::services::enrichment::enrich_table;
use crate::services::warehouse::{RebuildPlan, RunLock, SourceProfile, TableRef, Warehouse};

#[derive(Default)]
struct State {
    priced: HashMap<TableRef, PricedTable>,
    rates: HashMap<TableRef, Vec<RateQuote>>,
    run_locks: HashMap<TableRef, Arc<Mutex<()>>>,
    unavailable: bool,
}

struct MemoryRunLock {
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl RunLock for MemoryRunLock {
    async fn release(self: Box<Self>) -> Result<(), WarehouseError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryWarehouse {
    state: RwLock<State>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_priced_table(&self, table: &TableRef, data: PricedTable) {
        self.state.write().await.priced.insert(table.clone(), data);
    }

    pub async fn put_rate_table(&self, table: &TableRef, quotes: Vec<RateQuote>) {
        self.state.write().await.rates.insert(table.clone(), quotes);
    }

    pub async fn priced_table(&self, table: &TableRef) -> Option<PricedTable> {
        self.state.read().await.priced.get(table).cloned()
    }

    pub async fn rate_table(&self, table: &TableRef) -> Option<Vec<RateQuote>> {
        self.state.read().await.rates.get(table).cloned()
    }

    /// Make every subsequent operation fail as if the database were down
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }
}

fn ensure_available(state: &State) -> Result<(), WarehouseError> {
    if state.unavailable {
        Err(WarehouseError::Unavailable("connection refused".to_string()))
    } else {
        Ok(())
    }
}

fn priced<'a>(state: &'a State, table: &TableRef) -> Result<&'a PricedTable, WarehouseError> {
    state
        .priced
        .get(table)
        .ok_or_else(|| WarehouseError::TableNotFound(table.to_string()))
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn lock_run(&self, rates: &TableRef) -> Result<Box<dyn RunLock>, WarehouseError> {
        let lock = {
            let mut state = self.state.write().await;
            ensure_available(&state)?;
            state.run_locks.entry(rates.clone()).or_default().clone()
        };

        // State lock is released before waiting, other runs keep reading
        let guard = lock.lock_owned().await;

        Ok(Box::new(MemoryRunLock { _guard: guard }))
    }

    async fn profile_source(&self, source: &TableRef) -> Result<SourceProfile, WarehouseError> {
        let state = self.state.read().await;
        ensure_available(&state)?;
        let table = priced(&state, source)?;

        Ok(SourceProfile {
            total_rows: table.len() as u64,
            missing_price_rows: table
                .rows
                .iter()
                .filter(|r| r.record.price.is_none())
                .count() as u64,
        })
    }

    async fn distinct_rate_pairs(
        &self,
        source: &TableRef,
    ) -> Result<Vec<RatePair>, WarehouseError> {
        let state = self.state.read().await;
        ensure_available(&state)?;
        let table = priced(&state, source)?;

        let pairs: BTreeSet<RatePair> = table
            .rows
            .iter()
            .filter(|r| r.record.price.is_some())
            .filter_map(|r| match (r.record.life_span_date, &r.record.currency) {
                (Some(date), Some(currency)) if !currency.trim().is_empty() => {
                    Some(RatePair::new(date, currency))
                }
                _ => None,
            })
            .collect();

        Ok(pairs.into_iter().collect())
    }

    async fn replace_rates(
        &self,
        table: &TableRef,
        quotes: &[RateQuote],
    ) -> Result<u64, WarehouseError> {
        let mut state = self.state.write().await;
        ensure_available(&state)?;

        state.rates.insert(table.clone(), quotes.to_vec());

        Ok(quotes.len() as u64)
    }

    async fn rebuild_enriched(&self, plan: &RebuildPlan) -> Result<u64, WarehouseError> {
        // Write lock for the whole rebuild: one rebuild at a time, readers never see a half table
        let mut state = self.state.write().await;
        ensure_available(&state)?;

        let source = priced(&state, &plan.source)?;
        let quotes = state
            .rates
            .get(&plan.rates)
            .ok_or_else(|| WarehouseError::TableNotFound(plan.rates.to_string()))?;

        let enriched = enrich_table(
            source,
            quotes,
            &normalize_currency(&plan.target_currency),
            &plan.derived_column,
        );
        let rows = enriched.len() as u64;

        state.priced.insert(plan.destination.clone(), enriched);

        Ok(rows)
    }
}
