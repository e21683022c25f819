pub mod aggregation;
pub mod api;
pub mod config;
pub mod hll;
pub mod identity;
pub mod ingest;
pub mod models;
pub mod storage;
