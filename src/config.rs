//! Runtime configuration, read from the environment

use std::collections::BTreeSet;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::models::rate::normalize_currency;
use crate::services::warehouse::{validate_currency_code, TableRef};

/// Currencies with no public historical rate. Rows in these stay unconverted.
pub const UNSUPPORTED_CURRENCIES: &[&str] = &["TWD"];

pub const DEFAULT_TARGET_CURRENCY: &str = "EUR";
pub const DEFAULT_DATASET: &str = "patek_data";
pub const DEFAULT_SOURCE_TABLE: &str = "patek";
pub const DEFAULT_RATE_TABLE: &str = "fx_rates";
pub const DEFAULT_API_BASE_URL: &str = "https://api.frankfurter.app";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_MIN_REQUEST_INTERVAL_MS: u64 = 100;
pub const DEFAULT_MAX_CONCURRENCY: usize = 1;

#[derive(Debug, Clone)]
pub struct FxConfig {
    pub database_url: String,
    pub source_table: TableRef,
    pub destination_table: TableRef,
    pub rate_table: TableRef,
    pub target_currency: String,
    pub unsupported_currencies: BTreeSet<String>,
    pub rate_api_base_url: String,
    pub request_timeout: Duration,
    pub min_request_interval: Duration,
    pub max_concurrency: usize,
    pub rates_csv_path: Option<PathBuf>,
    pub sync_interval: Option<Duration>,
}

impl FxConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let dataset = get("FX_DATASET").unwrap_or_else(|| DEFAULT_DATASET.to_string());
        let source_name =
            get("FX_SOURCE_TABLE").unwrap_or_else(|| DEFAULT_SOURCE_TABLE.to_string());
        let destination_name = get("FX_DESTINATION_TABLE").unwrap_or_else(|| source_name.clone());
        let rate_name = get("FX_RATE_TABLE").unwrap_or_else(|| DEFAULT_RATE_TABLE.to_string());

        let source_table = table_ref("FX_SOURCE_TABLE", &dataset, &source_name)?;
        let destination_table = table_ref("FX_DESTINATION_TABLE", &dataset, &destination_name)?;
        let rate_table = table_ref("FX_RATE_TABLE", &dataset, &rate_name)?;

        if rate_table == source_table || rate_table == destination_table {
            return Err(ConfigError::Invalid {
                var: "FX_RATE_TABLE",
                reason: format!("{} is also the priced table", rate_table),
            });
        }

        let target_currency = normalize_currency(
            &get("FX_TARGET_CURRENCY").unwrap_or_else(|| DEFAULT_TARGET_CURRENCY.to_string()),
        );
        validate_currency_code(&target_currency).map_err(|e| ConfigError::Invalid {
            var: "FX_TARGET_CURRENCY",
            reason: e.to_string(),
        })?;

        let rate_api_base_url = get("FX_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let request_timeout = Duration::from_secs(parse_or(
            "FX_REQUEST_TIMEOUT_SECS",
            get("FX_REQUEST_TIMEOUT_SECS"),
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?);
        let min_request_interval = Duration::from_millis(parse_or(
            "FX_MIN_REQUEST_INTERVAL_MS",
            get("FX_MIN_REQUEST_INTERVAL_MS"),
            DEFAULT_MIN_REQUEST_INTERVAL_MS,
        )?);

        let max_concurrency = parse_or(
            "FX_MAX_CONCURRENCY",
            get("FX_MAX_CONCURRENCY"),
            DEFAULT_MAX_CONCURRENCY,
        )?;
        if max_concurrency == 0 {
            return Err(ConfigError::Invalid {
                var: "FX_MAX_CONCURRENCY",
                reason: "must be at least 1".to_string(),
            });
        }

        let sync_interval = match get("FX_SYNC_INTERVAL_SECS") {
            Some(raw) => {
                let secs: u64 = parse_or("FX_SYNC_INTERVAL_SECS", Some(raw), 0)?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => None,
        };

        Ok(Self {
            database_url,
            source_table,
            destination_table,
            rate_table,
            target_currency,
            unsupported_currencies: UNSUPPORTED_CURRENCIES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            rate_api_base_url,
            request_timeout,
            min_request_interval,
            max_concurrency,
            rates_csv_path: get("FX_RATES_CSV_PATH").map(PathBuf::from),
            sync_interval,
        })
    }

    /// Name of the derived column, e.g. `price_eur`
    pub fn derived_column(&self) -> String {
        format!("price_{}", self.target_currency.to_lowercase())
    }
}

fn table_ref(var: &'static str, dataset: &str, name: &str) -> Result<TableRef, ConfigError> {
    TableRef::new(Some(dataset), name).map_err(|e| ConfigError::Invalid {
        var,
        reason: e.to_string(),
    })
}

fn parse_or<T: std::str::FromStr>(
    var: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
