//! Storage module for persistent data storage
//!
//! Provides SQLite-based persistence for product records.

mod database;

pub use database::{BatchSummary, ProductDb, StoreStats};
