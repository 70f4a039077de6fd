//! Per-instrument OHLC accumulation within one window.

use candles_core::{Candle, Quantity, Timestamp, TradeRecord};

/// Trades for one instrument since the last emitted boundary.
#[derive(Debug, Clone)]
pub struct WindowBucket {
    open: Option<f64>,
    high: f64,
    low: f64,
    close: f64,
    trade_count: u64,
    volume: Quantity,
}

impl WindowBucket {
    /// An empty bucket.
    pub fn new() -> Self {
        Self {
            open: None,
            high: f64::NEG_INFINITY,
            low: f64::INFINITY,
            close: 0.0,
            trade_count: 0,
            volume: 0,
        }
    }

    /// Fold a trade into the bucket. Trades must arrive in time order.
    pub fn add_trade(&mut self, trade: &TradeRecord) {
        if self.open.is_none() {
            self.open = Some(trade.price);
        }
        self.high = self.high.max(trade.price);
        self.low = self.low.min(trade.price);
        self.close = trade.price;
        self.trade_count += 1;
        self.volume = self.volume.saturating_add(trade.quantity);
    }

    /// True if no trade has been added.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.open.is_none()
    }

    /// Candle for this bucket, or `None` if it holds no trades.
    pub fn to_candle(&self, instrument: impl Into<String>, window_start: Timestamp) -> Option<Candle> {
        let open = self.open?;

        Some(Candle {
            instrument: instrument.into(),
            window_start,
            open,
            high: self.high,
            low: self.low,
            close: self.close,
            trade_count: self.trade_count,
            volume: self.volume,
        })
    }
}

impl Default for WindowBucket {
    fn default() -> Self {
        Self::new()
    }
}
