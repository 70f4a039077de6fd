//! Core types and configuration for the candle pipeline.
//!
//! This crate provides shared types used across all other crates:
//! - Market data types (trades, candles, candle batches, resolutions)
//! - Configuration structures
//! - Common error types
//! - The rendezvous channel connecting pipeline stages

pub mod config;
pub mod error;
pub mod rendezvous;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
