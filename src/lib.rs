// src/lib.rs

pub mod services {
    pub mod enrichment;
    pub mod frankfurter;
    pub mod memory_warehouse;
    pub mod pacer;
    pub mod postgres_warehouse;
    pub mod rate_resolver;
    pub mod rate_store;
    pub mod warehouse;
}

pub mod config;
pub mod error;
pub mod jobs;
pub mod models;
