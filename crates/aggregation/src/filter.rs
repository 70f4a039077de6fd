//! Instrument allow-list.

use std::collections::HashSet;

use candles_core::config::InstrumentConfig;

/// Which instruments an aggregator tracks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InstrumentFilter {
    /// Track every instrument.
    #[default]
    All,
    /// Track only the named instruments; everything else is ignored.
    Only(HashSet<String>),
}

impl InstrumentFilter {
    /// Allow-list of the given identifiers.
    pub fn only<I, S>(instruments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        InstrumentFilter::Only(instruments.into_iter().map(Into::into).collect())
    }

    /// Filter from configuration. An empty list tracks everything.
    pub fn from_config(config: &InstrumentConfig) -> Self {
        if config.tracked.is_empty() {
            InstrumentFilter::All
        } else {
            Self::only(config.tracked.iter().cloned())
        }
    }

    /// True if trades for `instrument` should be aggregated.
    #[inline]
    pub fn tracks(&self, instrument: &str) -> bool {
        match self {
            InstrumentFilter::All => true,
            InstrumentFilter::Only(set) => set.contains(instrument),
        }
    }
}
