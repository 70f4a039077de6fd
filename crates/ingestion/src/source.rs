//! Trade log source.
//!
//! Reads the trade log line by line and hands each record downstream over a
//! rendezvous channel, stopping as soon as the pipeline is cancelled.

use std::path::Path;

use candles_core::config::ParsePolicy;
use candles_core::rendezvous;
use candles_core::{Error, Result, TradeRecord};
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{parse_trade_bytes, LineError};

/// Counters collected while reading the trade log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Lines read from the input.
    pub lines_read: u64,
    /// Records accepted downstream.
    pub records_emitted: u64,
    /// Individual field parse failures.
    pub field_errors: u64,
    /// Lines that produced no record.
    pub skipped_lines: u64,
    /// True if cancellation stopped the source before end of input.
    pub cancelled: bool,
}

/// Lazily parses trade records from a buffered reader.
pub struct TradeSource<R> {
    reader: R,
    /// Bytes of the line being read; kept across a cancelled read.
    line: Vec<u8>,
    /// Name used in diagnostics (usually the file path).
    origin: String,
    policy: ParsePolicy,
    stats: SourceStats,
}

impl TradeSource<BufReader<File>> {
    /// Open a trade log on disk.
    pub async fn open(path: impl AsRef<Path>, policy: ParsePolicy) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).await.map_err(|e| Error::input(path, e))?;
        Ok(Self::new(BufReader::new(file), path.display().to_string(), policy))
    }
}

enum Step {
    Record(TradeRecord),
    Done,
    Cancelled,
}

impl<R: AsyncBufRead + Unpin> TradeSource<R> {
    /// Wrap any buffered reader.
    pub fn new(reader: R, origin: impl Into<String>, policy: ParsePolicy) -> Self {
        Self {
            reader,
            line: Vec::new(),
            origin: origin.into(),
            policy,
            stats: SourceStats::default(),
        }
    }

    /// Counters so far.
    pub fn stats(&self) -> &SourceStats {
        &self.stats
    }

    /// Read the next record, applying the parse policy. `None` at end of input.
    pub async fn next_record(&mut self) -> Result<Option<TradeRecord>> {
        loop {
            let read = self
                .reader
                .read_until(b'\n', &mut self.line)
                .await
                .map_err(|e| Error::input(&self.origin, e))?;
            if read == 0 && self.line.is_empty() {
                return Ok(None);
            }
            self.stats.lines_read += 1;
            let line_no = self.stats.lines_read;

            let parsed = parse_trade_bytes(&self.line);
            self.line.clear();
            let parsed = match parsed {
                Ok(parsed) => parsed,
                Err(LineError::Blank) => {
                    self.stats.skipped_lines += 1;
                    continue;
                }
                Err(e) => {
                    warn!(origin = %self.origin, line = line_no, error = %e, "skipping malformed trade line");
                    self.stats.skipped_lines += 1;
                    continue;
                }
            };

            for e in &parsed.field_errors {
                warn!(origin = %self.origin, line = line_no, error = %e, "trade field parse failure");
            }
            self.stats.field_errors += parsed.field_errors.len() as u64;

            if !parsed.is_clean() && self.policy == ParsePolicy::SkipRecord {
                self.stats.skipped_lines += 1;
                continue;
            }
            return Ok(Some(parsed.record));
        }
    }

    /// Stream every record into `out` until end of input or cancellation.
    ///
    /// The token is observed both while reading and while waiting for the
    /// hand-off; a record whose hand-off is interrupted is discarded. Dropping the
    /// sender on return closes the downstream channel.
    pub async fn run(
        mut self,
        mut out: rendezvous::Sender<TradeRecord>,
        cancel: CancellationToken,
    ) -> Result<SourceStats> {
        debug!(origin = %self.origin, "trade source started");
        loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                next = self.next_record() => match next? {
                    Some(record) => Step::Record(record),
                    None => Step::Done,
                },
            };
            let record = match step {
                Step::Record(record) => record,
                Step::Done => break,
                Step::Cancelled => {
                    self.stats.cancelled = true;
                    break;
                }
            };

            let delivered = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                sent = out.send(record) => Some(sent.is_ok()),
            };
            match delivered {
                Some(true) => self.stats.records_emitted += 1,
                Some(false) => {
                    debug!(origin = %self.origin, "downstream closed, stopping trade source");
                    break;
                }
                None => {
                    self.stats.cancelled = true;
                    break;
                }
            }
        }

        if self.stats.cancelled {
            info!(origin = %self.origin, emitted = self.stats.records_emitted, "Exit: pipeline timeout");
        } else {
            debug!(origin = %self.origin, emitted = self.stats.records_emitted, "trade source finished");
        }
        Ok(self.stats)
    }
}
