//! Configuration structures for the candle pipeline.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Resolution;

/// Main configuration for the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Resolutions, deadline and windowing policy.
    pub pipeline: PipelineConfig,
    /// Daily market-closed interval.
    pub session: SessionConfig,
    /// Instrument allow-list.
    pub instruments: InstrumentConfig,
    /// Trade log parsing.
    pub ingestion: IngestionConfig,
    /// Candle output location.
    pub output: OutputConfig,
}

impl Config {
    /// Load configuration from a JSON file. Missing sections take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::input(path, e))?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let minutes = &self.pipeline.resolutions_minutes;
        if minutes.is_empty() {
            return Err(Error::config("at least one resolution is required"));
        }
        let mut seen = HashSet::new();
        for &m in minutes {
            Resolution::from_minutes(m)?;
            if !seen.insert(m) {
                return Err(Error::config(format!("duplicate resolution {m}m")));
            }
        }
        if self.pipeline.deadline_ms == 0 {
            return Err(Error::config("deadline_ms must be positive"));
        }
        if self.session.closed_from >= self.session.closed_until {
            return Err(Error::config(format!(
                "session closed_from ({}) must be before closed_until ({})",
                self.session.closed_from, self.session.closed_until
            )));
        }
        if self.output.file_prefix.is_empty() {
            return Err(Error::config("output file_prefix must not be empty"));
        }
        Ok(())
    }

    /// Configured resolutions, in declaration order.
    pub fn resolutions(&self) -> Result<Vec<Resolution>> {
        self.pipeline
            .resolutions_minutes
            .iter()
            .map(|&m| Resolution::from_minutes(m))
            .collect()
    }

    /// Output path for one resolution.
    pub fn output_path(&self, resolution: Resolution) -> PathBuf {
        self.output
            .directory
            .join(resolution.file_name(&self.output.file_prefix))
    }
}

/// How the window start moves when a trade lands past the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowAdvance {
    /// Advance by exactly one step, however far the trade is past the window.
    #[default]
    SingleStep,
    /// Advance by as many whole steps as needed to contain the trade.
    CatchUp,
}

/// What to do with a record whose field fails to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParsePolicy {
    /// Keep the record, using the zero value for the failed field.
    #[default]
    SubstituteDefault,
    /// Drop the record.
    SkipRecord,
}

/// Pipeline-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Window widths in minutes, one aggregator per entry.
    pub resolutions_minutes: Vec<u32>,
    /// Wall-clock budget for the whole run, from launch (ms).
    pub deadline_ms: u64,
    /// Window advance policy.
    pub window_advance: WindowAdvance,
}

impl PipelineConfig {
    /// Deadline as a duration.
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            resolutions_minutes: vec![5, 30, 240],
            deadline_ms: 5_000,
            window_advance: WindowAdvance::SingleStep,
        }
    }
}

/// Daily market-closed interval, `[closed_from, closed_until)` in trade-local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Start of the closed interval (inclusive).
    pub closed_from: NaiveTime,
    /// End of the closed interval (exclusive); also the session open.
    pub closed_until: NaiveTime,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            closed_from: NaiveTime::from_hms_opt(3, 0, 0).unwrap_or(NaiveTime::MIN),
            closed_until: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

/// Instrument allow-list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Tracked instrument identifiers. Empty tracks every instrument.
    pub tracked: Vec<String>,
}

/// Trade log parsing configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Field-level parse failure policy.
    pub parse_policy: ParsePolicy,
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory the candle files are created in.
    pub directory: PathBuf,
    /// File name prefix; files are named `<prefix>_<n>m.csv`.
    pub file_prefix: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            file_prefix: "candles".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pipeline.resolutions_minutes, vec![5, 30, 240]);
        assert_eq!(config.pipeline.deadline(), Duration::from_secs(5));
        assert_eq!(config.pipeline.window_advance, WindowAdvance::SingleStep);
        assert_eq!(config.ingestion.parse_policy, ParsePolicy::SubstituteDefault);
        assert_eq!(config.session.closed_from, NaiveTime::from_hms_opt(3, 0, 0).unwrap());
        assert_eq!(config.session.closed_until, NaiveTime::from_hms_opt(7, 0, 0).unwrap());
        assert!(config.instruments.tracked.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_output_paths() {
        let mut config = Config::default();
        config.output.directory = PathBuf::from("/data/out");
        let res = Resolution::from_minutes(30).unwrap();
        assert_eq!(config.output_path(res), PathBuf::from("/data/out/candles_30m.csv"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.pipeline.resolutions_minutes = vec![5, 5];
        assert!(config.validate().is_err());

        config.pipeline.resolutions_minutes = vec![0];
        assert!(config.validate().is_err());

        config.pipeline.resolutions_minutes = vec![];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pipeline.deadline_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.session.closed_from = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"pipeline": {{"resolutions_minutes": [1, 15], "window_advance": "catch_up"}},
                "instruments": {{"tracked": ["SBER", "AAPL"]}},
                "ingestion": {{"parse_policy": "skip_record"}}}}"#
        )
        .unwrap();

        let config = Config::from_json_file(file.path()).unwrap();
        assert_eq!(config.pipeline.resolutions_minutes, vec![1, 15]);
        assert_eq!(config.pipeline.deadline_ms, 5_000);
        assert_eq!(config.pipeline.window_advance, WindowAdvance::CatchUp);
        assert_eq!(config.instruments.tracked, vec!["SBER", "AAPL"]);
        assert_eq!(config.ingestion.parse_policy, ParsePolicy::SkipRecord);
        assert_eq!(config.output.file_prefix, "candles");
    }

    #[test]
    fn test_session_times_parse_from_json() {
        let json = r#"{"closed_from": "02:30:00", "closed_until": "06:00:00"}"#;
        let session: SessionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(session.closed_from, NaiveTime::from_hms_opt(2, 30, 0).unwrap());
        assert_eq!(session.closed_until, NaiveTime::from_hms_opt(6, 0, 0).unwrap());
    }
}
