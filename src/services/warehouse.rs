//! Warehouse abstraction
//!
//! The pipeline only talks to storage through [`Warehouse`]. Production runs
//! use [`super::postgres_warehouse::PostgresWarehouse`]; tests substitute
//! [`super::memory_warehouse::MemoryWarehouse`].

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::fmt;

use crate::error::WarehouseError;
use crate::models::{RatePair, RateQuote};

pub const PRICE_COLUMN: &str = "price";
pub const CURRENCY_COLUMN: &str = "currency";
pub const DATE_COLUMN: &str = "life_span_date";

lazy_static! {
    static ref IDENTIFIER_REGEX: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").unwrap();
    static ref CURRENCY_REGEX: Regex = Regex::new(r"^[A-Z]{3}$").unwrap();
}

/// Reject anything that is not a plain SQL identifier
pub fn validate_identifier(ident: &str) -> Result<(), WarehouseError> {
    if IDENTIFIER_REGEX.is_match(ident) {
        Ok(())
    } else {
        Err(WarehouseError::InvalidIdentifier(ident.to_string()))
    }
}

/// Target currency gets inlined into DDL, so it must be a bare ISO code
pub fn validate_currency_code(code: &str) -> Result<(), WarehouseError> {
    if CURRENCY_REGEX.is_match(code) {
        Ok(())
    } else {
        Err(WarehouseError::InvalidCurrency(code.to_string()))
    }
}

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// A validated (schema, table) reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableRef {
    schema: Option<String>,
    name: String,
}

impl TableRef {
    pub fn new(schema: Option<&str>, name: &str) -> Result<Self, WarehouseError> {
        if let Some(schema) = schema {
            validate_identifier(schema)?;
        }
        validate_identifier(name)?;

        Ok(Self {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        })
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sibling table in the same schema
    pub fn sibling(&self, name: &str) -> Result<Self, WarehouseError> {
        Self::new(self.schema(), name)
    }

    /// Quoted, schema-qualified name for SQL
    pub fn qualified(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.name)),
            None => quote_ident(&self.name),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Row counts of the raw table, for status reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceProfile {
    pub total_rows: u64,
    /// Rows with a null price, excluded from rate resolution
    pub missing_price_rows: u64,
}

/// Everything a backend needs to rebuild the authoritative table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildPlan {
    pub source: TableRef,
    pub rates: TableRef,
    pub destination: TableRef,
    pub target_currency: String,
    pub derived_column: String,
}

/// Held for the persist + rebuild span of one run
#[async_trait]
pub trait RunLock: Send {
    async fn release(self: Box<Self>) -> Result<(), WarehouseError>;
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Exclusive claim on `rates` until the returned lock is released.
    /// Runs sharing a rate table must not interleave their persist and rebuild.
    async fn lock_run(&self, rates: &TableRef) -> Result<Box<dyn RunLock>, WarehouseError>;

    async fn profile_source(&self, source: &TableRef) -> Result<SourceProfile, WarehouseError>;

    /// Distinct non-null (date, currency) pairs over priced rows, sorted
    async fn distinct_rate_pairs(&self, source: &TableRef)
        -> Result<Vec<RatePair>, WarehouseError>;

    /// Replace the whole rate table with `quotes`. Returns rows written.
    async fn replace_rates(
        &self,
        table: &TableRef,
        quotes: &[RateQuote],
    ) -> Result<u64, WarehouseError>;

    /// Build the enriched table and swap it in atomically. Returns rows written.
    async fn rebuild_enriched(&self, plan: &RebuildPlan) -> Result<u64, WarehouseError>;
}
