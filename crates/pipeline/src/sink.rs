//! Per-resolution candle output.

use std::path::{Path, PathBuf};

use candles_core::rendezvous::Receiver;
use candles_core::{CandleBatch, Error, Resolution, Result};
use candles_ingestion::format_candle_line;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, error};

/// Counters for one sink run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkStats {
    /// Non-empty batches written.
    pub batches_written: u64,
    /// Empty batches skipped.
    pub empty_batches: u64,
    /// Candle lines written.
    pub candles_written: u64,
}

/// Appends candle lines for one resolution, in emission order.
pub struct CandleSink<W> {
    writer: W,
    path: PathBuf,
    resolution: Resolution,
    stats: SinkStats,
}

impl CandleSink<File> {
    /// Create (or truncate) the output file for `resolution`.
    pub async fn create(path: impl AsRef<Path>, resolution: Resolution) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).await.map_err(|e| Error::output(path, e))?;
        Ok(Self::new(file, path, resolution))
    }
}

impl<W: AsyncWrite + Unpin> CandleSink<W> {
    /// Wrap any writer. `path` is only used in diagnostics.
    pub fn new(writer: W, path: impl Into<PathBuf>, resolution: Resolution) -> Self {
        Self {
            writer,
            path: path.into(),
            resolution,
            stats: SinkStats::default(),
        }
    }

    /// Resolution this sink persists.
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Output location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write every candle of `batch` as its own line. Empty batches are skipped.
    pub async fn write_batch(&mut self, batch: &CandleBatch) -> Result<()> {
        if batch.is_empty() {
            self.stats.empty_batches += 1;
            return Ok(());
        }
        for candle in batch.iter() {
            let line = format_candle_line(candle);
            self.writer
                .write_all(line.as_bytes())
                .await
                .map_err(|e| Error::output(&self.path, e))?;
            self.stats.candles_written += 1;
        }
        self.stats.batches_written += 1;
        Ok(())
    }

    /// Consume batches until the input closes, then flush.
    ///
    /// A write failure ends the sink; lines already written are left as they are.
    pub async fn run(mut self, mut input: Receiver<CandleBatch>) -> Result<SinkStats> {
        debug!(resolution = %self.resolution, path = %self.path.display(), "candle sink started");
        while let Some(batch) = input.recv().await {
            if let Err(e) = self.write_batch(&batch).await {
                error!(resolution = %self.resolution, error = %e, "candle sink failed");
                return Err(e);
            }
        }
        self.writer
            .flush()
            .await
            .map_err(|e| Error::output(&self.path, e))?;
        debug!(
            resolution = %self.resolution,
            candles = self.stats.candles_written,
            "candle sink finished"
        );
        Ok(self.stats)
    }
}
