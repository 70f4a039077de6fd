//! Per-resolution window aggregation.
//!
//! Each incoming trade is checked, in order, against:
//! 1. the session gap: emit what is pending, reopen the window at the session
//!    open of the trade's date and drop the trade;
//! 2. the window boundary: emit what is pending and advance the window;
//! 3. otherwise the trade is added to its instrument's bucket.
//!
//! The window start is set lazily from the first trade (or first session reset).

use std::collections::BTreeMap;

use candles_core::config::WindowAdvance;
use candles_core::rendezvous;
use candles_core::{CandleBatch, Config, Resolution, Timestamp, TradeRecord};
use chrono::TimeDelta;
use tracing::{debug, trace};

use crate::bucket::WindowBucket;
use crate::filter::InstrumentFilter;
use crate::session::SessionCalendar;

/// Counters for one aggregator run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    /// Trades received, tracked or not.
    pub trades_seen: u64,
    /// Trades for instruments outside the allow-list.
    pub trades_untracked: u64,
    /// Trades dropped because they fell in the market-closed interval.
    pub trades_in_gap: u64,
    /// Trades folded into buckets.
    pub trades_aggregated: u64,
    /// Batches emitted, including empty ones.
    pub batches_emitted: u64,
    /// Candles emitted across all batches.
    pub candles_emitted: u64,
}

/// Window state machine for one resolution.
pub struct WindowAggregator {
    resolution: Resolution,
    session: SessionCalendar,
    filter: InstrumentFilter,
    advance: WindowAdvance,
    /// Start of the open window; `None` until the first trade or reset.
    window_start: Option<Timestamp>,
    /// Open buckets keyed by instrument.
    buckets: BTreeMap<String, WindowBucket>,
    stats: AggregatorStats,
}

impl WindowAggregator {
    /// Create an aggregator.
    pub fn new(
        resolution: Resolution,
        session: SessionCalendar,
        filter: InstrumentFilter,
        advance: WindowAdvance,
    ) -> Self {
        Self {
            resolution,
            session,
            filter,
            advance,
            window_start: None,
            buckets: BTreeMap::new(),
            stats: AggregatorStats::default(),
        }
    }

    /// Create an aggregator for `resolution` from configuration.
    pub fn from_config(resolution: Resolution, config: &Config) -> Self {
        Self::new(
            resolution,
            SessionCalendar::from_config(&config.session),
            InstrumentFilter::from_config(&config.instruments),
            config.pipeline.window_advance,
        )
    }

    /// Resolution this aggregator produces.
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Start of the open window, if established.
    pub fn window_start(&self) -> Option<Timestamp> {
        self.window_start
    }

    /// Instruments with trades in the open window.
    pub fn pending_instrument_count(&self) -> usize {
        self.buckets.len()
    }

    /// Counters so far.
    pub fn stats(&self) -> &AggregatorStats {
        &self.stats
    }

    /// Process one trade, returning a batch if a session gap or boundary fired.
    pub fn on_trade(&mut self, trade: &TradeRecord) -> Option<CandleBatch> {
        self.stats.trades_seen += 1;
        if !self.filter.tracks(&trade.instrument) {
            self.stats.trades_untracked += 1;
            return None;
        }

        if self.session.is_closed(trade.timestamp) {
            self.stats.trades_in_gap += 1;
            let batch = self.take_batch();
            self.window_start = Some(self.session.reopen_at(trade.timestamp));
            return Some(batch);
        }

        let start = match self.window_start {
            Some(start) => start,
            None => {
                let start = self.initial_start(trade.timestamp);
                self.window_start = Some(start);
                start
            }
        };

        let step = self.resolution.step();
        let mut emitted = None;
        if trade.timestamp >= start + step {
            emitted = Some(self.take_batch());
            let next = match self.advance {
                WindowAdvance::SingleStep => start + step,
                WindowAdvance::CatchUp => align(start, trade.timestamp, step),
            };
            trace!(resolution = %self.resolution, from = %start, to = %next, "window advanced");
            self.window_start = Some(next);
        }

        self.buckets
            .entry(trade.instrument.clone())
            .or_default()
            .add_trade(trade);
        self.stats.trades_aggregated += 1;
        emitted
    }

    /// Emit whatever is pending. Used at end of input; may be empty.
    pub fn flush(&mut self) -> CandleBatch {
        self.take_batch()
    }

    /// First window of a run: the session open plus whole steps up to `ts`.
    fn initial_start(&self, ts: Timestamp) -> Timestamp {
        align(self.session.session_open(ts), ts, self.resolution.step())
    }

    /// Replace the bucket set and turn the old one into a batch.
    fn take_batch(&mut self) -> CandleBatch {
        let start = self.window_start.unwrap_or_default();
        let buckets = std::mem::take(&mut self.buckets);
        let candles = buckets
            .iter()
            .filter_map(|(instrument, bucket)| bucket.to_candle(instrument.as_str(), start))
            .collect();

        let batch = CandleBatch::new(self.resolution, start, candles);
        self.stats.batches_emitted += 1;
        self.stats.candles_emitted += batch.len() as u64;
        batch
    }

    /// Run as a pipeline stage until the input closes.
    ///
    /// Emits one final (possibly empty) batch at end of input, then drops the
    /// output. Stops early if the downstream receiver goes away.
    pub async fn run(
        mut self,
        mut input: rendezvous::Receiver<TradeRecord>,
        mut output: rendezvous::Sender<CandleBatch>,
    ) -> AggregatorStats {
        let resolution = self.resolution;
        debug!(resolution = %resolution, "aggregator started");

        while let Some(trade) = input.recv().await {
            if let Some(batch) = self.on_trade(&trade) {
                if output.send(batch).await.is_err() {
                    debug!(resolution = %resolution, "candle sink closed, stopping aggregator");
                    return self.stats;
                }
            }
        }

        let last = self.flush();
        if output.send(last).await.is_err() {
            debug!(resolution = %resolution, "candle sink closed before final batch");
        }
        debug!(
            resolution = %resolution,
            batches = self.stats.batches_emitted,
            candles = self.stats.candles_emitted,
            "aggregator finished"
        );
        self.stats
    }
}

/// `origin` plus the largest whole multiple of `step` not past `ts`.
fn align(origin: Timestamp, ts: Timestamp, step: TimeDelta) -> Timestamp {
    let step_secs = step.num_seconds();
    let elapsed_secs = (ts - origin).num_seconds();
    if step_secs <= 0 || elapsed_secs <= 0 {
        return origin;
    }
    origin + TimeDelta::seconds(elapsed_secs / step_secs * step_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};

    fn at(day: u32, h: u32, m: u32, s: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2019, 1, day, h, m, s).unwrap()
    }

    fn trade(instrument: &str, price: f64, ts: Timestamp) -> TradeRecord {
        TradeRecord {
            instrument: instrument.to_string(),
            price,
            quantity: 1,
            timestamp: ts,
        }
    }

    fn aggregator(minutes: u32) -> WindowAggregator {
        WindowAggregator::new(
            Resolution::from_minutes(minutes).unwrap(),
            SessionCalendar::default(),
            InstrumentFilter::All,
            WindowAdvance::SingleStep,
        )
    }

    #[test]
    fn test_example_scenario() {
        let mut agg = aggregator(5);
        assert!(agg.on_trade(&trade("X", 100.0, at(30, 7, 0, 1))).is_none());
        assert!(agg.on_trade(&trade("X", 105.0, at(30, 7, 0, 5))).is_none());

        let batch = agg.flush();
        assert_eq!(batch.len(), 1);
        let candle = &batch.candles()[0];
        assert_eq!(candle.instrument, "X");
        assert_eq!(candle.window_start, at(30, 7, 0, 0));
        assert_relative_eq!(candle.open, 100.0);
        assert_relative_eq!(candle.high, 105.0);
        assert_relative_eq!(candle.low, 100.0);
        assert_relative_eq!(candle.close, 105.0);
    }

    #[test]
    fn test_first_trade_aligns_to_session_open() {
        let mut agg = aggregator(30);
        agg.on_trade(&trade("SBER", 1.0, at(30, 8, 47, 0)));
        assert_eq!(agg.window_start(), Some(at(30, 8, 30, 0)));

        let mut agg = aggregator(240);
        agg.on_trade(&trade("SBER", 1.0, at(30, 12, 0, 0)));
        assert_eq!(agg.window_start(), Some(at(30, 11, 0, 0)));

        // After midnight the session is still the one that opened yesterday.
        let mut agg = aggregator(240);
        agg.on_trade(&trade("SBER", 1.0, at(31, 1, 0, 0)));
        assert_eq!(agg.window_start(), Some(at(30, 23, 0, 0)));
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let mut agg = aggregator(5);
        agg.on_trade(&trade("SBER", 10.0, at(30, 7, 1, 0)));
        agg.on_trade(&trade("SBER", 11.0, at(30, 7, 4, 59)));

        let batch = agg.on_trade(&trade("SBER", 12.0, at(30, 7, 5, 0))).unwrap();
        assert_eq!(batch.window_start, at(30, 7, 0, 0));
        assert_eq!(batch.len(), 1);
        assert_relative_eq!(batch.candles()[0].close, 11.0);
        assert_eq!(agg.window_start(), Some(at(30, 7, 5, 0)));

        let rest = agg.flush();
        assert_eq!(rest.window_start, at(30, 7, 5, 0));
        assert_relative_eq!(rest.candles()[0].open, 12.0);
    }

    #[test]
    fn test_session_gap_resets_window() {
        for minutes in [5, 30, 240] {
            let mut agg = aggregator(minutes);
            agg.on_trade(&trade("SBER", 10.0, at(30, 2, 50, 0)));

            let batch = agg.on_trade(&trade("SBER", 99.0, at(31, 3, 0, 0))).unwrap();
            assert_eq!(batch.len(), 1);
            assert_relative_eq!(batch.candles()[0].close, 10.0);
            assert_eq!(agg.window_start(), Some(at(31, 7, 0, 0)));
            assert_eq!(agg.pending_instrument_count(), 0);

            // The gap trade itself is discarded.
            let next = agg.on_trade(&trade("SBER", 20.0, at(31, 7, 0, 30)));
            assert!(next.is_none());
            let batch = agg.flush();
            assert_eq!(batch.window_start, at(31, 7, 0, 0));
            assert_relative_eq!(batch.candles()[0].open, 20.0);
            assert_eq!(agg.stats().trades_in_gap, 1);
        }
    }

    #[test]
    fn test_every_gap_trade_emits_a_batch() {
        let mut agg = aggregator(5);
        agg.on_trade(&trade("SBER", 10.0, at(30, 2, 59, 0)));

        let first = agg.on_trade(&trade("SBER", 11.0, at(30, 3, 0, 0))).unwrap();
        let second = agg.on_trade(&trade("SBER", 12.0, at(30, 4, 0, 0))).unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(second.window_start, at(30, 7, 0, 0));
    }

    #[test]
    fn test_gap_before_any_trade_emits_empty_batch() {
        let mut agg = aggregator(30);
        let batch = agg.on_trade(&trade("SBER", 1.0, at(30, 5, 0, 0))).unwrap();
        assert!(batch.is_empty());
        assert_eq!(agg.window_start(), Some(at(30, 7, 0, 0)));
    }

    #[test]
    fn test_single_step_advance_lags_behind_long_gaps() {
        let mut agg = aggregator(5);
        agg.on_trade(&trade("SBER", 1.0, at(30, 7, 1, 0)));

        // 20 minutes later: the window still moves by a single step.
        let batch = agg.on_trade(&trade("SBER", 2.0, at(30, 7, 21, 0))).unwrap();
        assert_eq!(batch.window_start, at(30, 7, 0, 0));
        assert_eq!(agg.window_start(), Some(at(30, 7, 5, 0)));

        // The next trade is still past the stale window and fires again.
        let batch = agg.on_trade(&trade("SBER", 3.0, at(30, 7, 22, 0))).unwrap();
        assert_eq!(batch.window_start, at(30, 7, 5, 0));
        assert_relative_eq!(batch.candles()[0].close, 2.0);
        assert_eq!(agg.window_start(), Some(at(30, 7, 10, 0)));
    }

    #[test]
    fn test_catch_up_advance_jumps_to_trade_window() {
        let mut agg = WindowAggregator::new(
            Resolution::from_minutes(5).unwrap(),
            SessionCalendar::default(),
            InstrumentFilter::All,
            WindowAdvance::CatchUp,
        );
        agg.on_trade(&trade("SBER", 1.0, at(30, 7, 1, 0)));

        let batch = agg.on_trade(&trade("SBER", 2.0, at(30, 7, 21, 0))).unwrap();
        assert_eq!(batch.window_start, at(30, 7, 0, 0));
        assert_eq!(agg.window_start(), Some(at(30, 7, 20, 0)));
        assert!(agg.on_trade(&trade("SBER", 3.0, at(30, 7, 22, 0))).is_none());
    }

    #[test]
    fn test_batch_sorted_by_low() {
        let mut agg = aggregator(5);
        agg.on_trade(&trade("A", 10.0, at(30, 7, 0, 10)));
        agg.on_trade(&trade("B", 5.0, at(30, 7, 0, 20)));
        agg.on_trade(&trade("C", 20.0, at(30, 7, 0, 30)));

        let batch = agg.flush();
        let order: Vec<&str> = batch.iter().map(|c| c.instrument.as_str()).collect();
        assert_eq!(order, vec!["B", "A", "C"]);
    }

    #[test]
    fn test_untracked_instruments_are_ignored() {
        let mut agg = WindowAggregator::new(
            Resolution::from_minutes(5).unwrap(),
            SessionCalendar::default(),
            InstrumentFilter::only(["SBER"]),
            WindowAdvance::SingleStep,
        );
        agg.on_trade(&trade("SBER", 10.0, at(30, 7, 0, 10)));
        // Untracked, even though it is far past the window.
        assert!(agg.on_trade(&trade("GAZP", 1.0, at(30, 9, 0, 0))).is_none());

        let batch = agg.flush();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.candles()[0].instrument, "SBER");
        assert_eq!(agg.stats().trades_untracked, 1);
    }

    #[test]
    fn test_buckets_replaced_after_emission() {
        let mut agg = aggregator(5);
        agg.on_trade(&trade("A", 10.0, at(30, 7, 0, 10)));
        agg.on_trade(&trade("B", 11.0, at(30, 7, 0, 20)));
        agg.on_trade(&trade("A", 12.0, at(30, 7, 6, 0)));

        assert_eq!(agg.pending_instrument_count(), 1);
        let batch = agg.flush();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.candles()[0].trade_count, 1);
        assert!(agg.flush().is_empty());
    }

    #[tokio::test]
    async fn test_run_emits_final_batch_and_closes() {
        let (mut trade_tx, trade_rx) = rendezvous::channel();
        let (batch_tx, mut batch_rx) = rendezvous::channel();
        let handle = tokio::spawn(aggregator(5).run(trade_rx, batch_tx));

        let feeder = tokio::spawn(async move {
            trade_tx.send(trade("X", 100.0, at(30, 7, 0, 1))).await.unwrap();
            trade_tx.send(trade("X", 101.0, at(30, 7, 5, 1))).await.unwrap();
        });

        let mut batches = Vec::new();
        while let Some(batch) = batch_rx.recv().await {
            batches.push(batch);
        }
        feeder.await.unwrap();
        let stats = handle.await.unwrap();

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].window_start, at(30, 7, 0, 0));
        assert_eq!(batches[1].window_start, at(30, 7, 5, 0));
        assert_eq!(stats.batches_emitted, 2);
        assert_eq!(stats.candles_emitted, 2);
    }

    #[tokio::test]
    async fn test_run_with_empty_input_sends_empty_batch() {
        let (trade_tx, trade_rx) = rendezvous::channel::<TradeRecord>();
        let (batch_tx, mut batch_rx) = rendezvous::channel();
        drop(trade_tx);
        let handle = tokio::spawn(aggregator(30).run(trade_rx, batch_tx));

        let batch = batch_rx.recv().await.unwrap();
        assert!(batch.is_empty());
        assert!(batch_rx.recv().await.is_none());
        assert_eq!(handle.await.unwrap().batches_emitted, 1);
    }
}
