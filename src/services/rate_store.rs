//! Snapshot persistence of resolved rates
//!
//! Every persist replaces the whole rate table. Quotes from earlier runs that
//! are not part of the current batch disappear.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{ExportError, WarehouseError};
use crate::models::{RateKey, RateQuote};
use crate::services::warehouse::{TableRef, Warehouse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Snapshot replaced with this many quotes
    Replaced(u64),
    /// Nothing to persist, rate table left untouched
    Empty,
}

pub struct RateStore {
    warehouse: Arc<dyn Warehouse>,
    table: TableRef,
}

impl RateStore {
    pub fn new(warehouse: Arc<dyn Warehouse>, table: TableRef) -> Self {
        Self { warehouse, table }
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub async fn persist(&self, quotes: &[RateQuote]) -> Result<PersistOutcome, WarehouseError> {
        let snapshot = dedupe_quotes(quotes);

        if snapshot.is_empty() {
            tracing::warn!("No rates collected, {} left untouched", self.table);
            return Ok(PersistOutcome::Empty);
        }

        if snapshot.len() < quotes.len() {
            tracing::warn!(
                "Dropped {} duplicate quotes before persisting",
                quotes.len() - snapshot.len()
            );
        }

        let written = self.warehouse.replace_rates(&self.table, &snapshot).await?;

        tracing::info!("Loaded {} rates to {}", written, self.table);

        Ok(PersistOutcome::Replaced(written))
    }
}

/// One quote per (date, base, target), last write wins, ordered by key
pub fn dedupe_quotes(quotes: &[RateQuote]) -> Vec<RateQuote> {
    let mut by_key: BTreeMap<RateKey, RateQuote> = BTreeMap::new();

    for quote in quotes {
        by_key.insert(quote.key(), quote.clone());
    }

    by_key.into_values().collect()
}

/// Write the snapshot as CSV for reporting tools
pub fn export_rates_csv(path: &Path, quotes: &[RateQuote]) -> Result<usize, ExportError> {
    let snapshot = dedupe_quotes(quotes);
    let mut writer = csv::Writer::from_path(path)?;

    for quote in &snapshot {
        writer.serialize(quote)?;
    }
    writer.flush()?;

    tracing::info!("Saved {} rates to {}", snapshot.len(), path.display());

    Ok(snapshot.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn quote(day: u32, base: &str, rate: f64) -> RateQuote {
        RateQuote {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            base_currency: base.to_string(),
            target_currency: "EUR".to_string(),
            rate,
        }
    }

    #[test]
    fn test_dedupe_last_write_wins() {
        let quotes = vec![
            quote(2, "USD", 0.91),
            quote(1, "USD", 0.92),
            quote(2, "USD", 0.93),
        ];

        let snapshot = dedupe_quotes(&quotes);

        assert_eq!(snapshot, vec![quote(1, "USD", 0.92), quote(2, "USD", 0.93)]);
    }

    #[test]
    fn test_export_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fx_rates.csv");

        let written = export_rates_csv(
            &path,
            &[quote(2, "EUR", 1.0), quote(1, "USD", 0.92)],
        )
        .unwrap();

        assert_eq!(written, 2);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "date,base_currency,target_currency,rate\n\
             2024-01-01,USD,EUR,0.92\n\
             2024-01-02,EUR,EUR,1.0\n"
        );
    }
}
