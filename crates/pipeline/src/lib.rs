//! Streaming candle pipeline.
//!
//! This crate provides:
//! - Lockstep fan-out of one trade stream to several aggregators
//! - Per-resolution candle sinks
//! - The orchestrator that wires source, fan-out, aggregators and sinks under a
//!   single deadline

pub mod broadcast;
pub mod orchestrator;
pub mod sink;

pub use broadcast::{BroadcastStats, Broadcaster};
pub use orchestrator::{Pipeline, PipelineReport, ResolutionReport};
pub use sink::{CandleSink, SinkStats};
