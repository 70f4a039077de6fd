//! Trade log ingestion for the candle pipeline.
//!
//! This crate handles:
//! - Trade line parsing and candle line rendering
//! - Streaming the trade log into the pipeline with cooperative cancellation

pub mod codec;
pub mod source;

pub use codec::{format_candle_line, parse_trade_bytes, parse_trade_line, FieldError, LineError, ParsedLine, TradeField};
pub use source::{SourceStats, TradeSource};
