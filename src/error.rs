//! Error types for the normalization pipeline.
//!
//! Only faults that stop a run are errors. A pair whose rate cannot be
//! resolved is reported as [`crate::models::Resolution::Unavailable`] instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("Invalid currency code '{0}'")]
    InvalidCurrency(String),

    #[error("Table {0} does not exist")]
    TableNotFound(String),

    #[error("Table {table} is missing required column '{column}'")]
    MissingColumn { table: String, column: String },

    #[error("Warehouse unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum RateSourceError {
    #[error("Rate API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Rate API error {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),

    #[error("Rate client setup failed: {0}")]
    RateClient(#[from] RateSourceError),
}
