//! Enrichment of the priced table with a converted price column
//!
//! The authoritative table is rebuilt from scratch on every run: left join of
//! the catalog against the rate snapshot on (currency, date), written to a new
//! table and swapped in as the last step. Readers see either the old table or
//! the new one.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::error::WarehouseError;
use crate::models::rate::normalize_currency;
use crate::models::{EnrichedRecord, PricedTable, RateQuote};
use crate::services::warehouse::{
    quote_ident, validate_currency_code, validate_identifier, RebuildPlan, TableRef, Warehouse,
    CURRENCY_COLUMN, DATE_COLUMN, PRICE_COLUMN,
};

pub struct EnrichmentEngine {
    warehouse: Arc<dyn Warehouse>,
    target_currency: String,
    derived_column: String,
}

impl EnrichmentEngine {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        target_currency: &str,
        derived_column: &str,
    ) -> Self {
        Self {
            warehouse,
            target_currency: normalize_currency(target_currency),
            derived_column: derived_column.to_string(),
        }
    }

    pub fn plan(&self, source: &TableRef, rates: &TableRef, destination: &TableRef) -> RebuildPlan {
        RebuildPlan {
            source: source.clone(),
            rates: rates.clone(),
            destination: destination.clone(),
            target_currency: self.target_currency.clone(),
            derived_column: self.derived_column.clone(),
        }
    }

    /// Replace `destination` with `source` enriched by `rates`. Returns rows written.
    pub async fn rebuild(
        &self,
        source: &TableRef,
        rates: &TableRef,
        destination: &TableRef,
    ) -> Result<u64, WarehouseError> {
        let plan = self.plan(source, rates, destination);
        validate_identifier(&plan.derived_column)?;
        validate_currency_code(&plan.target_currency)?;

        tracing::info!(
            "Enriching {} with {} prices into {}",
            plan.source,
            plan.target_currency,
            plan.destination
        );

        let rows = self.warehouse.rebuild_enriched(&plan).await?;

        tracing::info!(
            "Recreated {} with '{}' column ({} rows)",
            plan.destination,
            plan.derived_column,
            rows
        );

        Ok(rows)
    }
}

/// Parse a rate the way Postgres casts float8 to numeric: shortest decimal form
pub fn rate_to_decimal(rate: f64) -> Option<Decimal> {
    Decimal::from_str(&rate.to_string())
        .ok()
        .or_else(|| Decimal::from_f64_retain(rate))
}

/// Left join of `source` rows against `quotes` for `target_currency`.
///
/// Any converted price already present on the source rows is discarded and
/// recomputed. Rows without a matching quote keep a null converted price.
pub fn enrich_table(
    source: &PricedTable,
    quotes: &[RateQuote],
    target_currency: &str,
    derived_column: &str,
) -> PricedTable {
    let rates: HashMap<(&str, NaiveDate), f64> = quotes
        .iter()
        .filter(|q| q.target_currency == target_currency)
        .map(|q| ((q.base_currency.as_str(), q.date), q.rate))
        .collect();

    let rows = source
        .rows
        .iter()
        .map(|row| {
            let record = &row.record;
            let converted_price = match (&record.currency, record.life_span_date, record.price) {
                (Some(currency), Some(date), Some(price)) => rates
                    .get(&(normalize_currency(currency).as_str(), date))
                    .and_then(|rate| rate_to_decimal(*rate))
                    .and_then(|rate| {
                        let converted = price.checked_mul(rate);
                        if converted.is_none() {
                            tracing::warn!(
                                "Converted price overflows for {} {} at rate {}",
                                price,
                                currency,
                                rate
                            );
                        }
                        converted
                    }),
                _ => None,
            };

            EnrichedRecord {
                record: record.clone(),
                converted_price,
            }
        })
        .collect();

    PricedTable {
        derived_column: Some(derived_column.to_string()),
        rows,
    }
}

/// `SELECT` feeding the CTAS rebuild.
///
/// `columns` are the source columns to carry through, already stripped of the
/// derived column. The target currency is inlined because Postgres does not
/// accept bind parameters in `CREATE TABLE AS`.
pub fn rebuild_select_sql(plan: &RebuildPlan, columns: &[String]) -> String {
    let projection = columns
        .iter()
        .map(|c| format!("p.{}", quote_ident(c)))
        .chain(std::iter::once(format!(
            "(p.{} * CAST(fx.{} AS NUMERIC)) AS {}",
            quote_ident(PRICE_COLUMN),
            quote_ident("rate"),
            quote_ident(&plan.derived_column)
        )))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "SELECT {projection} \
         FROM {source} p \
         LEFT JOIN {rates} fx \
         ON UPPER(TRIM(p.{currency})) = fx.{base} \
         AND fx.{target_col} = '{target}' \
         AND CAST(p.{date} AS DATE) = fx.{fx_date}",
        projection = projection,
        source = plan.source.qualified(),
        rates = plan.rates.qualified(),
        currency = quote_ident(CURRENCY_COLUMN),
        base = quote_ident("base_currency"),
        target_col = quote_ident("target_currency"),
        target = plan.target_currency,
        date = quote_ident(DATE_COLUMN),
        fx_date = quote_ident("date"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriceRecord;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn quote(d: u32, base: &str, target: &str, rate: f64) -> RateQuote {
        RateQuote {
            date: day(d),
            base_currency: base.to_string(),
            target_currency: target.to_string(),
            rate,
        }
    }

    #[test]
    fn test_rate_to_decimal_uses_shortest_form() {
        assert_eq!(rate_to_decimal(0.92), Some(dec!(0.92)));
        assert_eq!(rate_to_decimal(1.0), Some(dec!(1)));
        assert_eq!(rate_to_decimal(0.0000123), Some(dec!(0.0000123)));
    }

    #[test]
    fn test_left_join_keeps_every_row() {
        let source = PricedTable::raw(vec![
            PriceRecord::new("5711", Some(dec!(1000)), Some("USD"), Some(day(1))),
            PriceRecord::new("5712", Some(dec!(2000)), Some("EUR"), Some(day(2))),
            PriceRecord::new("5167", Some(dec!(300000)), Some("TWD"), Some(day(3))),
            PriceRecord::new("5980", Some(dec!(500)), Some("USD"), None),
            PriceRecord::new("3940", None, Some("USD"), Some(day(1))),
        ]);
        let quotes = vec![quote(1, "USD", "EUR", 0.92), quote(2, "EUR", "EUR", 1.0)];

        let enriched = enrich_table(&source, &quotes, "EUR", "price_eur");

        assert_eq!(enriched.derived_column.as_deref(), Some("price_eur"));
        assert_eq!(enriched.len(), 5);
        let converted: Vec<_> = enriched.rows.iter().map(|r| r.converted_price).collect();
        assert_eq!(
            converted,
            vec![Some(dec!(920)), Some(dec!(2000)), None, None, None]
        );
        for (before, after) in source.rows.iter().zip(&enriched.rows) {
            assert_eq!(before.record, after.record);
        }
    }

    #[test]
    fn test_stale_derived_values_are_recomputed() {
        let mut source = PricedTable::raw(vec![PriceRecord::new(
            "5711",
            Some(dec!(1000)),
            Some("USD"),
            Some(day(1)),
        )]);
        source.derived_column = Some("price_eur".to_string());
        source.rows[0].converted_price = Some(dec!(1));

        let enriched = enrich_table(&source, &[], "EUR", "price_eur");
        assert_eq!(enriched.rows[0].converted_price, None);

        let enriched = enrich_table(&source, &[quote(1, "USD", "EUR", 0.9)], "EUR", "price_eur");
        assert_eq!(enriched.rows[0].converted_price, Some(dec!(900)));
    }

    #[test]
    fn test_identity_rows_without_date_stay_null() {
        let source = PricedTable::raw(vec![
            PriceRecord::new("5712", Some(dec!(2000)), Some("EUR"), Some(day(2))),
            PriceRecord::new("5726", Some(dec!(3000)), Some("EUR"), None),
        ]);

        let enriched = enrich_table(&source, &[quote(2, "EUR", "EUR", 1.0)], "EUR", "price_eur");

        assert_eq!(enriched.rows[0].converted_price, Some(dec!(2000)));
        assert_eq!(enriched.rows[1].converted_price, None);
    }

    #[test]
    fn test_overflow_leaves_converted_price_null() {
        let source = PricedTable::raw(vec![
            PriceRecord::new("huge", Some(Decimal::MAX), Some("USD"), Some(day(1))),
            PriceRecord::new("5711", Some(dec!(1000)), Some("USD"), Some(day(1))),
        ]);

        let enriched = enrich_table(&source, &[quote(1, "USD", "EUR", 2.0)], "EUR", "price_eur");

        assert_eq!(enriched.rows[0].converted_price, None);
        assert_eq!(enriched.rows[1].converted_price, Some(dec!(2000)));
    }

    #[test]
    fn test_quotes_for_other_targets_are_ignored() {
        let source = PricedTable::raw(vec![PriceRecord::new(
            "5711",
            Some(dec!(1000)),
            Some("USD"),
            Some(day(1)),
        )]);

        let enriched = enrich_table(&source, &[quote(1, "USD", "CHF", 0.88)], "EUR", "price_eur");

        assert_eq!(enriched.rows[0].converted_price, None);
    }

    #[test]
    fn test_rebuild_sql() {
        let source = TableRef::new(Some("patek_data"), "patek").unwrap();
        let plan = RebuildPlan {
            rates: source.sibling("fx_rates").unwrap(),
            destination: source.clone(),
            source,
            target_currency: "EUR".to_string(),
            derived_column: "price_eur".to_string(),
        };

        let sql = rebuild_select_sql(
            &plan,
            &["reference_code".to_string(), "price".to_string()],
        );

        assert_eq!(
            sql,
            "SELECT p.\"reference_code\", p.\"price\", \
             (p.\"price\" * CAST(fx.\"rate\" AS NUMERIC)) AS \"price_eur\" \
             FROM \"patek_data\".\"patek\" p \
             LEFT JOIN \"patek_data\".\"fx_rates\" fx \
             ON UPPER(TRIM(p.\"currency\")) = fx.\"base_currency\" \
             AND fx.\"target_currency\" = 'EUR' \
             AND CAST(p.\"life_span_date\" AS DATE) = fx.\"date\""
        );
    }
}
