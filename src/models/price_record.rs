use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One row of the raw catalog.
///
/// `attributes` carries every other column (identifying key included) and is
/// passed through enrichment untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub attributes: BTreeMap<String, Value>,
    pub price: Option<Decimal>,
    pub currency: Option<String>,
    pub life_span_date: Option<NaiveDate>,
}

impl PriceRecord {
    pub fn new(
        key: &str,
        price: Option<Decimal>,
        currency: Option<&str>,
        life_span_date: Option<NaiveDate>,
    ) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert("reference_code".to_string(), Value::from(key));

        Self {
            attributes,
            price,
            currency: currency.map(str::to_string),
            life_span_date,
        }
    }

    pub fn with_attribute(mut self, name: &str, value: Value) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }
}

/// A catalog row plus the derived converted price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    #[serde(flatten)]
    pub record: PriceRecord,
    pub converted_price: Option<Decimal>,
}

/// Whole-table image of a priced table.
///
/// A freshly loaded catalog has no derived column; after a rebuild it carries
/// exactly one, named after the target currency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PricedTable {
    pub derived_column: Option<String>,
    pub rows: Vec<EnrichedRecord>,
}

impl PricedTable {
    pub fn raw(records: Vec<PriceRecord>) -> Self {
        Self {
            derived_column: None,
            rows: records
                .into_iter()
                .map(|record| EnrichedRecord {
                    record,
                    converted_price: None,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
