//! Pipeline orchestration.
//!
//! Wires source → broadcaster → one aggregator per resolution → one sink per
//! resolution, runs every stage as its own task and waits on the sinks. A single
//! deadline, measured from launch, cancels the source; the remaining stages drain
//! through channel closure and flush what they hold.

use std::path::Path;
use std::time::Duration;

use candles_aggregation::{AggregatorStats, WindowAggregator};
use candles_core::{rendezvous, Config, Error, Resolution, Result};
use candles_ingestion::{SourceStats, TradeSource};
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::{BroadcastStats, Broadcaster};
use crate::sink::{CandleSink, SinkStats};

/// Outcome for one resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionReport {
    pub resolution: Resolution,
    pub aggregator: AggregatorStats,
    pub sink: SinkStats,
}

/// Outcome of a full run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub source: SourceStats,
    pub broadcast: BroadcastStats,
    /// One entry per resolution, in configuration order.
    pub resolutions: Vec<ResolutionReport>,
    /// True if the deadline cut the run short.
    pub deadline_expired: bool,
    pub elapsed: Duration,
}

impl PipelineReport {
    /// Total candle lines written across all resolutions.
    pub fn candles_written(&self) -> u64 {
        self.resolutions.iter().map(|r| r.sink.candles_written).sum()
    }
}

/// The multi-resolution candle pipeline.
pub struct Pipeline {
    config: Config,
}

impl Pipeline {
    /// Create a pipeline from validated configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Configuration in use.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run over a trade log on disk, writing the configured output files.
    pub async fn run_file(&self, path: impl AsRef<Path>) -> Result<PipelineReport> {
        let source = TradeSource::open(path, self.config.ingestion.parse_policy).await?;
        self.run(source).await
    }

    /// Run over any trade source, writing the configured output files.
    ///
    /// Every output is created before any task starts.
    pub async fn run<R>(&self, source: TradeSource<R>) -> Result<PipelineReport>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let mut sinks = Vec::new();
        for resolution in self.config.resolutions()? {
            let path = self.config.output_path(resolution);
            sinks.push(CandleSink::create(&path, resolution).await?);
        }
        self.run_with_sinks(source, sinks).await
    }

    /// Run with caller-provided sinks, one aggregator per sink.
    pub async fn run_with_sinks<R, W>(
        &self,
        source: TradeSource<R>,
        sinks: Vec<CandleSink<W>>,
    ) -> Result<PipelineReport>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        if sinks.is_empty() {
            return Err(Error::config("pipeline needs at least one sink"));
        }

        let started = Instant::now();
        let cancel = CancellationToken::new();
        let deadline = self.config.pipeline.deadline();
        let watchdog = tokio::spawn(watch_deadline(deadline, cancel.clone()));

        let (trade_tx, trade_rx) = rendezvous::channel();
        let mut fan_outputs = Vec::with_capacity(sinks.len());
        let mut resolutions = Vec::with_capacity(sinks.len());
        let mut aggregators = Vec::with_capacity(sinks.len());
        let mut sink_tasks = JoinSet::new();

        for (index, sink) in sinks.into_iter().enumerate() {
            let resolution = sink.resolution();
            let (agg_tx, agg_rx) = rendezvous::channel();
            let (batch_tx, batch_rx) = rendezvous::channel();

            let aggregator = WindowAggregator::from_config(resolution, &self.config);
            aggregators.push(tokio::spawn(aggregator.run(agg_rx, batch_tx)));
            sink_tasks.spawn(async move { (index, sink.run(batch_rx).await) });

            fan_outputs.push(agg_tx);
            resolutions.push(resolution);
        }

        let broadcaster = tokio::spawn(Broadcaster::new(trade_rx, fan_outputs).run());
        let source_task = tokio::spawn(source.run(trade_tx, cancel.clone()));
        info!(
            resolutions = ?resolutions.iter().map(|r| r.label()).collect::<Vec<_>>(),
            deadline_ms = deadline.as_millis() as u64,
            "pipeline started"
        );

        // Barrier over the sinks. The first fatal error cancels the rest.
        let mut first_error: Option<Error> = None;
        let mut sink_stats: Vec<Option<SinkStats>> = vec![None; resolutions.len()];
        while let Some(joined) = sink_tasks.join_next().await {
            match joined.map_err(|e| task_failed("candle sink", e)) {
                Ok((index, Ok(stats))) => sink_stats[index] = Some(stats),
                Ok((_, Err(e))) | Err(e) => {
                    if first_error.is_none() {
                        warn!(error = %e, "fatal stage error, cancelling pipeline");
                        cancel.cancel();
                        first_error = Some(e);
                    }
                }
            }
        }

        let source_result = source_task.await.map_err(|e| task_failed("trade source", e))?;
        let broadcast = broadcaster.await.map_err(|e| task_failed("broadcaster", e))?;
        let mut aggregator_stats = Vec::with_capacity(aggregators.len());
        for handle in aggregators {
            aggregator_stats.push(handle.await.map_err(|e| task_failed("aggregator", e))?);
        }

        // Release the watchdog if the run finished first.
        cancel.cancel();
        let fired = watchdog.await.map_err(|e| task_failed("deadline", e))?;

        if let Some(e) = first_error {
            return Err(e);
        }
        let source = source_result?;
        let deadline_expired = fired && source.cancelled;

        let resolutions = resolutions
            .into_iter()
            .zip(aggregator_stats)
            .zip(sink_stats)
            .map(|((resolution, aggregator), sink)| ResolutionReport {
                resolution,
                aggregator,
                sink: sink.unwrap_or_default(),
            })
            .collect();

        let report = PipelineReport {
            source,
            broadcast,
            resolutions,
            deadline_expired,
            elapsed: started.elapsed(),
        };
        if report.deadline_expired {
            info!(elapsed_ms = report.elapsed.as_millis() as u64, "pipeline stopped at deadline");
        } else {
            debug!(elapsed_ms = report.elapsed.as_millis() as u64, "pipeline finished");
        }
        Ok(report)
    }
}

/// Cancel `cancel` once `deadline` elapses. Returns true if the deadline fired.
async fn watch_deadline(deadline: Duration, cancel: CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(deadline) => {
            cancel.cancel();
            true
        }
        _ = cancel.cancelled() => false,
    }
}

fn task_failed(stage: &str, e: JoinError) -> Error {
    Error::pipeline(format!("{stage} task failed: {e}"))
}
