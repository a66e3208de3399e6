//! shipment-sync - Rate-limit-aware incremental shipment synchronization
//!
//! This crate discovers shipment identifiers through a paginated, rate-limited
//! list endpoint and then fetches the full detail of every discovered shipment,
//! keeping per-endpoint request budgets so the upstream limits are never exceeded.

pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod otel;
pub mod sync;
