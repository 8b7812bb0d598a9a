#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use fx_normalizer::config::FxConfig;
use fx_normalizer::error::{RateSourceError, WarehouseError};
use fx_normalizer::models::{RatePair, RateQuote};
use fx_normalizer::services::memory_warehouse::MemoryWarehouse;
use fx_normalizer::services::rate_resolver::RateSource;
use fx_normalizer::services::warehouse::{
    RebuildPlan, RunLock, SourceProfile, TableRef, Warehouse,
};
use sea_orm::{Database, DatabaseConnection, DbErr};
use std::collections::HashMap;
use std::env;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy)]
pub enum Scripted {
    Rate(f64),
    NoRate,
    Status(u16),
}

/// Rate source answering from a fixed script and recording every call
#[derive(Default)]
pub struct ScriptedRateSource {
    script: HashMap<(NaiveDate, String), Scripted>,
    calls: Mutex<Vec<(NaiveDate, String, String)>>,
}

impl ScriptedRateSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, date: NaiveDate, from: &str, answer: Scripted) -> Self {
        self.script.insert((date, from.to_string()), answer);
        self
    }

    pub fn with_rate(self, date: NaiveDate, from: &str, rate: f64) -> Self {
        self.with(date, from, Scripted::Rate(rate))
    }

    pub fn calls(&self) -> Vec<(NaiveDate, String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, from: &str) -> usize {
        self.calls().iter().filter(|(_, f, _)| f == from).count()
    }
}

#[async_trait]
impl RateSource for ScriptedRateSource {
    async fn historical_rate(
        &self,
        date: NaiveDate,
        from: &str,
        to: &str,
    ) -> Result<Option<f64>, RateSourceError> {
        self.calls
            .lock()
            .unwrap()
            .push((date, from.to_string(), to.to_string()));

        match self.script.get(&(date, from.to_string())) {
            Some(Scripted::Rate(rate)) => Ok(Some(*rate)),
            Some(Scripted::NoRate) | None => Ok(None),
            Some(Scripted::Status(status)) => Err(RateSourceError::Status {
                status: *status,
                body: "{\"message\":\"not found\"}".to_string(),
            }),
        }
    }
}

/// Memory warehouse whose rebuild step always fails
pub struct BrokenRebuildWarehouse {
    pub inner: Arc<MemoryWarehouse>,
}

#[async_trait]
impl Warehouse for BrokenRebuildWarehouse {
    async fn lock_run(&self, rates: &TableRef) -> Result<Box<dyn RunLock>, WarehouseError> {
        self.inner.lock_run(rates).await
    }

    async fn profile_source(&self, source: &TableRef) -> Result<SourceProfile, WarehouseError> {
        self.inner.profile_source(source).await
    }

    async fn distinct_rate_pairs(
        &self,
        source: &TableRef,
    ) -> Result<Vec<RatePair>, WarehouseError> {
        self.inner.distinct_rate_pairs(source).await
    }

    async fn replace_rates(
        &self,
        table: &TableRef,
        quotes: &[RateQuote],
    ) -> Result<u64, WarehouseError> {
        self.inner.replace_rates(table, quotes).await
    }

    async fn rebuild_enriched(&self, _plan: &RebuildPlan) -> Result<u64, WarehouseError> {
        Err(WarehouseError::Unavailable(
            "destination unreachable".to_string(),
        ))
    }
}

/// Set up test database connection
/// Uses TEST_DATABASE_URL environment variable or falls back to default
pub async fn setup_test_db() -> Result<DatabaseConnection, DbErr> {
    let database_url = env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgresql://fx_user@localhost:5432/fx_test".to_string());

    Database::connect(&database_url).await
}

/// Memory warehouse that pauses right after a rate snapshot is written,
/// until the test calls `resume`
pub struct GatedWarehouse {
    pub inner: Arc<MemoryWarehouse>,
    persisted: Notify,
    resume: Notify,
}

impl GatedWarehouse {
    pub fn new(inner: Arc<MemoryWarehouse>) -> Self {
        Self {
            inner,
            persisted: Notify::new(),
            resume: Notify::new(),
        }
    }

    pub async fn wait_persisted(&self) {
        self.persisted.notified().await;
    }

    pub fn resume(&self) {
        self.resume.notify_one();
    }
}

#[async_trait]
impl Warehouse for GatedWarehouse {
    async fn lock_run(&self, rates: &TableRef) -> Result<Box<dyn RunLock>, WarehouseError> {
        self.inner.lock_run(rates).await
    }

    async fn profile_source(&self, source: &TableRef) -> Result<SourceProfile, WarehouseError> {
        self.inner.profile_source(source).await
    }

    async fn distinct_rate_pairs(
        &self,
        source: &TableRef,
    ) -> Result<Vec<RatePair>, WarehouseError> {
        self.inner.distinct_rate_pairs(source).await
    }

    async fn replace_rates(
        &self,
        table: &TableRef,
        quotes: &[RateQuote],
    ) -> Result<u64, WarehouseError> {
        let written = self.inner.replace_rates(table, quotes).await?;
        self.persisted.notify_one();
        self.resume.notified().await;
        Ok(written)
    }

    async fn rebuild_enriched(&self, plan: &RebuildPlan) -> Result<u64, WarehouseError> {
        self.inner.rebuild_enriched(plan).await
    }
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Config with default tables and no request pacing
pub fn test_config(extra: &[(&str, &str)]) -> FxConfig {
    let mut vars: HashMap<String, String> = HashMap::new();
    vars.insert(
        "DATABASE_URL".to_string(),
        "postgresql://fx_user@localhost:5432/fx_test".to_string(),
    );
    vars.insert("FX_MIN_REQUEST_INTERVAL_MS".to_string(), "0".to_string());
    for (key, value) in extra {
        vars.insert(key.to_string(), value.to_string());
    }

    FxConfig::from_lookup(|key| vars.get(key).cloned()).expect("valid test config")
}

pub fn quote(date: NaiveDate, base: &str, target: &str, rate: f64) -> RateQuote {
    RateQuote {
        date,
        base_currency: base.to_string(),
        target_currency: target.to_string(),
        rate,
    }
}
