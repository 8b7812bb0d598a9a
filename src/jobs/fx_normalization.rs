//! FX normalization job
//!
//! distinct (date, currency) pairs -> rate resolution -> rate snapshot ->
//! rebuild of the priced table with a converted price column.
//!
//! The rebuild is the only step that touches the priced table and it is
//! skipped when there is nothing to convert with.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

use crate::config::FxConfig;
use crate::error::PipelineError;
use crate::models::{RateQuote, Resolution, UnavailableReason};
use crate::services::enrichment::EnrichmentEngine;
use crate::services::frankfurter::FrankfurterClient;
use crate::services::pacer::RequestPacer;
use crate::services::postgres_warehouse::PostgresWarehouse;
use crate::services::rate_resolver::{RateResolver, RateSource};
use crate::services::rate_store::{export_rates_csv, PersistOutcome, RateStore};
use crate::services::warehouse::{TableRef, Warehouse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Rates persisted and priced table rebuilt
    Completed,
    /// Source had no priced rows with a date and currency
    NoData,
    /// Nothing resolved, rate table and priced table left untouched
    NoRatesCollected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub source_rows: u64,
    pub missing_price_rows: u64,
    pub pairs: usize,
    pub identity: usize,
    pub fetched: usize,
    pub unsupported: usize,
    pub unavailable: usize,
    pub rates_persisted: u64,
    pub rows_rebuilt: u64,
}

impl RunReport {
    fn new() -> Self {
        Self {
            outcome: RunOutcome::NoData,
            source_rows: 0,
            missing_price_rows: 0,
            pairs: 0,
            identity: 0,
            fetched: 0,
            unsupported: 0,
            unavailable: 0,
            rates_persisted: 0,
            rows_rebuilt: 0,
        }
    }

    fn record(&mut self, resolution: &Resolution) {
        match resolution {
            Resolution::Identity => self.identity += 1,
            Resolution::Fetched(_) => self.fetched += 1,
            Resolution::Unavailable(UnavailableReason::UnsupportedCurrency) => {
                self.unsupported += 1
            }
            Resolution::Unavailable(_) => self.unavailable += 1,
        }
    }
}

pub struct FxNormalizationJob {
    warehouse: Arc<dyn Warehouse>,
    resolver: RateResolver,
    store: RateStore,
    engine: EnrichmentEngine,
    source: TableRef,
    destination: TableRef,
    rates_csv_path: Option<PathBuf>,
}

impl FxNormalizationJob {
    pub fn new(
        config: &FxConfig,
        warehouse: Arc<dyn Warehouse>,
        rate_source: Arc<dyn RateSource>,
    ) -> Self {
        let resolver = RateResolver::new(
            rate_source,
            &config.target_currency,
            config.unsupported_currencies.clone(),
            RequestPacer::new(config.min_request_interval),
            config.max_concurrency,
        );
        let store = RateStore::new(warehouse.clone(), config.rate_table.clone());
        let engine = EnrichmentEngine::new(
            warehouse.clone(),
            &config.target_currency,
            &config.derived_column(),
        );

        Self {
            warehouse,
            resolver,
            store,
            engine,
            source: config.source_table.clone(),
            destination: config.destination_table.clone(),
            rates_csv_path: config.rates_csv_path.clone(),
        }
    }

    /// Job wired to Postgres and the Frankfurter API
    pub async fn connect(config: &FxConfig) -> Result<Self, PipelineError> {
        let warehouse = PostgresWarehouse::connect(&config.database_url).await?;
        let client =
            FrankfurterClient::new(config.rate_api_base_url.clone(), config.request_timeout)?;

        Ok(Self::new(config, Arc::new(warehouse), Arc::new(client)))
    }

    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let target = self.resolver.target_currency().to_string();
        let mut report = RunReport::new();

        tracing::info!(
            "Starting FX normalization: {} -> {} ({})",
            self.source,
            self.destination,
            target
        );

        // 1. Profile and extract pairs
        let profile = self.warehouse.profile_source(&self.source).await?;
        report.source_rows = profile.total_rows;
        report.missing_price_rows = profile.missing_price_rows;

        tracing::info!(
            rows = profile.total_rows,
            missing_price = profile.missing_price_rows,
            "Loaded {} ({} rows without a price are excluded)",
            self.source,
            profile.missing_price_rows
        );

        let pairs = self.warehouse.distinct_rate_pairs(&self.source).await?;
        report.pairs = pairs.len();

        tracing::info!("Pairs to process: {}", pairs.len());

        if pairs.is_empty() {
            tracing::info!("No data found in {}, nothing to do", self.source);
            return Ok(report);
        }

        // 2. Resolve rates
        let resolved = self.resolver.resolve_all(&pairs).await;
        for item in &resolved {
            report.record(&item.resolution);
        }

        tracing::info!(
            pairs = report.pairs,
            fetched = report.fetched,
            identity = report.identity,
            unsupported = report.unsupported,
            unavailable = report.unavailable,
            "Rate resolution complete"
        );

        let quotes: Vec<RateQuote> = resolved
            .iter()
            .filter_map(|item| item.to_quote(&target))
            .collect();

        // 3-4. Persist and rebuild as one exclusive step per rate table
        let lock = self.warehouse.lock_run(self.store.table()).await?;
        let published = self.publish(&quotes, &mut report).await;
        let released = lock.release().await;
        published?;
        released?;

        if report.outcome != RunOutcome::Completed {
            return Ok(report);
        }

        tracing::info!(
            pairs = report.pairs,
            rates = report.rates_persisted,
            rows = report.rows_rebuilt,
            "FX normalization complete"
        );

        Ok(report)
    }

    /// Snapshot the quotes and rebuild the priced table. Caller holds the run lock.
    async fn publish(
        &self,
        quotes: &[RateQuote],
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        match self.store.persist(quotes).await? {
            PersistOutcome::Empty => {
                tracing::warn!(
                    "No rates collected, skipping rebuild of {}",
                    self.destination
                );
                report.outcome = RunOutcome::NoRatesCollected;
                return Ok(());
            }
            PersistOutcome::Replaced(count) => report.rates_persisted = count,
        }

        if let Some(path) = &self.rates_csv_path {
            if let Err(e) = export_rates_csv(path, quotes) {
                tracing::warn!("Failed to export rates to {}: {}", path.display(), e);
            }
        }

        report.rows_rebuilt = self
            .engine
            .rebuild(&self.source, self.store.table(), &self.destination)
            .await?;
        report.outcome = RunOutcome::Completed;

        Ok(())
    }
}

/// Run `job` every `every`, one run at a time. The first run starts immediately.
pub fn start_fx_normalization_job(
    job: Arc<FxNormalizationJob>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval(every);

        loop {
            interval.tick().await;
            tracing::info!("Starting scheduled FX normalization");

            match job.run().await {
                Ok(report) => {
                    tracing::info!("Scheduled FX normalization finished: {:?}", report.outcome)
                }
                Err(e) => tracing::error!("Failed to run FX normalization: {}", e),
            }
        }
    })
}
