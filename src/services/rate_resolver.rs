//! Rate resolution for (date, currency) pairs
//!
//! Policy per pair:
//! 1. unsupported currency -> unavailable, no request
//! 2. base == target -> 1.0, no request
//! 3. otherwise one paced request to the rate source; any failure -> unavailable
//!
//! There are no retries. A pair that fails stays unconverted for this run.

use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::stream::{self, StreamExt};
use moka::future::Cache;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::RateSourceError;
use crate::models::rate::normalize_currency;
use crate::models::{RatePair, Resolution, ResolvedPair, UnavailableReason};
use crate::services::pacer::RequestPacer;

/// External historical rate lookup
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Rate converting one unit of `from` into `to` on `date`.
    /// `Ok(None)` means the service answered without a rate for `to`.
    async fn historical_rate(
        &self,
        date: NaiveDate,
        from: &str,
        to: &str,
    ) -> Result<Option<f64>, RateSourceError>;
}

pub struct RateResolver {
    source: Arc<dyn RateSource>,
    target_currency: String,
    unsupported: BTreeSet<String>,
    pacer: RequestPacer,
    max_concurrency: usize,
    // Historical rates do not change, keep successful lookups across scheduled runs
    cache: Cache<RatePair, f64>,
}

impl RateResolver {
    pub fn new(
        source: Arc<dyn RateSource>,
        target_currency: &str,
        unsupported: BTreeSet<String>,
        pacer: RequestPacer,
        max_concurrency: usize,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(50_000)
            .time_to_live(Duration::from_secs(86400))
            .build();

        Self {
            source,
            target_currency: normalize_currency(target_currency),
            unsupported: unsupported
                .iter()
                .map(|c| normalize_currency(c))
                .collect(),
            pacer,
            max_concurrency: max_concurrency.max(1),
            cache,
        }
    }

    pub fn target_currency(&self) -> &str {
        &self.target_currency
    }

    pub async fn resolve(&self, pair: &RatePair) -> Resolution {
        let base = normalize_currency(&pair.base_currency);

        if self.unsupported.contains(&base) {
            tracing::debug!("{} is unsupported, skipping lookup", pair);
            return Resolution::Unavailable(UnavailableReason::UnsupportedCurrency);
        }

        if base == self.target_currency {
            return Resolution::Identity;
        }

        if let Some(rate) = self.cache.get(pair).await {
            tracing::debug!("Cache hit for {}", pair);
            return Resolution::Fetched(rate);
        }

        self.pacer.wait().await;

        let resolution = match self
            .source
            .historical_rate(pair.date, &base, &self.target_currency)
            .await
        {
            Ok(Some(rate)) if rate.is_finite() && rate > 0.0 => Resolution::Fetched(rate),
            Ok(Some(_)) => Resolution::Unavailable(UnavailableReason::InvalidRate),
            Ok(None) => Resolution::Unavailable(UnavailableReason::MissingRate),
            Err(RateSourceError::Status { status, .. }) => {
                Resolution::Unavailable(UnavailableReason::Status(status))
            }
            Err(e) => Resolution::Unavailable(UnavailableReason::Transport(e.to_string())),
        };

        match &resolution {
            Resolution::Fetched(rate) => {
                tracing::debug!("{} -> {} = {}", pair, self.target_currency, rate);
                self.cache.insert(pair.clone(), *rate).await;
            }
            Resolution::Unavailable(reason) => {
                tracing::debug!("No rate for {}: {}", pair, reason);
            }
            Resolution::Identity => {}
        }

        resolution
    }

    /// Resolve every pair with at most `max_concurrency` lookups in flight.
    /// Output is sorted by pair regardless of completion order.
    pub async fn resolve_all(&self, pairs: &[RatePair]) -> Vec<ResolvedPair> {
        let total = pairs.len();
        let mut resolved = Vec::with_capacity(total);

        let mut results = stream::iter(pairs.iter().cloned())
            .map(|pair| async move {
                let resolution = self.resolve(&pair).await;
                ResolvedPair { pair, resolution }
            })
            .buffer_unordered(self.max_concurrency);

        while let Some(item) = results.next().await {
            resolved.push(item);

            if resolved.len() % 50 == 0 {
                tracing::info!("Progress: {}/{} pairs resolved", resolved.len(), total);
            }
        }

        resolved.sort_by(|a, b| a.pair.cmp(&b.pair));
        resolved
    }
}
