//! `candles`: turn a trade log into 5, 30 and 240 minute candle files.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use candles_core::config::{ParsePolicy, WindowAdvance};
use candles_core::Config;
use candles_pipeline::{Pipeline, PipelineReport};

#[derive(Debug, Parser)]
#[command(name = "candles", about = "Build multi-resolution candles from a trade log")]
struct Cli {
    /// Trade log to read (`-file` is accepted too)
    #[arg(long, value_parser = non_empty_path)]
    file: PathBuf,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for the candle files
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Wall-clock budget for the run, in milliseconds
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// Window widths in minutes, comma separated
    #[arg(long, value_delimiter = ',')]
    resolutions: Option<Vec<u32>>,

    /// Instruments to track, comma separated (default: all)
    #[arg(long, value_delimiter = ',')]
    instruments: Option<Vec<String>>,

    /// What to do with a record whose fields fail to parse
    #[arg(long, value_enum)]
    parse_policy: Option<ParsePolicyArg>,

    /// How a window moves forward after a boundary
    #[arg(long, value_enum)]
    window_advance: Option<WindowAdvanceArg>,
}

/// Command-line spelling of [`ParsePolicy`]. `candles-core` does not depend on clap.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ParsePolicyArg {
    SubstituteDefault,
    SkipRecord,
}

impl From<ParsePolicyArg> for ParsePolicy {
    fn from(arg: ParsePolicyArg) -> Self {
        match arg {
            ParsePolicyArg::SubstituteDefault => ParsePolicy::SubstituteDefault,
            ParsePolicyArg::SkipRecord => ParsePolicy::SkipRecord,
        }
    }
}

/// Command-line spelling of [`WindowAdvance`].
#[derive(Debug, Clone, Copy, ValueEnum)]
enum WindowAdvanceArg {
    SingleStep,
    CatchUp,
}

impl From<WindowAdvanceArg> for WindowAdvance {
    fn from(arg: WindowAdvanceArg) -> Self {
        match arg {
            WindowAdvanceArg::SingleStep => WindowAdvance::SingleStep,
            WindowAdvanceArg::CatchUp => WindowAdvance::CatchUp,
        }
    }
}

fn non_empty_path(raw: &str) -> std::result::Result<PathBuf, String> {
    if raw.trim().is_empty() {
        return Err("input file path must not be empty".to_string());
    }
    Ok(PathBuf::from(raw))
}

/// Rewrite the single-dash `-file` spelling into the long form clap expects.
fn normalize_args<I>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    args.into_iter()
        .map(|arg| match arg.strip_prefix("-file") {
            Some(rest) if rest.is_empty() || rest.starts_with('=') => format!("--file{rest}"),
            _ => arg,
        })
        .collect()
}

impl Cli {
    /// Load the base configuration and apply command-line overrides.
    fn to_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(dir) = &self.output_dir {
            config.output.directory = dir.clone();
        }
        if let Some(ms) = self.deadline_ms {
            config.pipeline.deadline_ms = ms;
        }
        if let Some(resolutions) = &self.resolutions {
            config.pipeline.resolutions_minutes = resolutions.clone();
        }
        if let Some(instruments) = &self.instruments {
            config.instruments.tracked = instruments.clone();
        }
        if let Some(policy) = self.parse_policy {
            config.ingestion.parse_policy = policy.into();
        }
        if let Some(advance) = self.window_advance {
            config.pipeline.window_advance = advance.into();
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn log_report(report: &PipelineReport) {
    info!(
        lines = report.source.lines_read,
        trades = report.source.records_emitted,
        field_errors = report.source.field_errors,
        skipped = report.source.skipped_lines,
        deadline_expired = report.deadline_expired,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "run complete"
    );
    for entry in &report.resolutions {
        info!(
            resolution = %entry.resolution,
            batches = entry.aggregator.batches_emitted,
            candles = entry.sink.candles_written,
            "resolution summary"
        );
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.to_config()?;
    let pipeline = Pipeline::new(config)?;
    let report = pipeline
        .run_file(&cli.file)
        .await
        .with_context(|| format!("processing {}", cli.file.display()))?;
    log_report(&report);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse_from(normalize_args(std::env::args()));
    if let Err(e) = run(cli).await {
        error!(error = %format!("{e:#}"), "candle pipeline failed");
        return Err(e);
    }
    Ok(())
}
