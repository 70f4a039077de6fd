//! Windowed candle aggregation for the candle pipeline.
//!
//! This crate handles:
//! - The daily session calendar (market-closed interval)
//! - Instrument allow-listing
//! - Per-instrument OHLC buckets
//! - The per-resolution window state machine and its pipeline stage

pub mod bucket;
pub mod filter;
pub mod session;
pub mod window;

pub use bucket::WindowBucket;
pub use filter::InstrumentFilter;
pub use session::SessionCalendar;
pub use window::{AggregatorStats, WindowAggregator};
