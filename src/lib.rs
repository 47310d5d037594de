//! Idena ↔ BNB Smart Chain bridge
//!
//! Users create a swap over HTTP, pay into the bridge on the source chain and
//! attach that transaction; the reconciler then verifies it and pays out on
//! the other chain, or refunds.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod evm;
pub mod idena;
pub mod metrics;
pub mod oracle;
pub mod reconciler;
pub mod swaps;
pub mod types;
pub mod units;
