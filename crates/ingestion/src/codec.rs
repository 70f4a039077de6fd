//! Line codecs for trades and candles.
//!
//! Trade lines are `instrument,price,quantity,<date> <time>`. Candle lines are
//! `instrument,timestamp,open,high,low,close`.

use std::fmt;

use candles_core::{Candle, Quantity, Timestamp, TradeRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

/// Number of comma-separated fields in a trade line.
pub const TRADE_FIELDS: usize = 4;

/// A trade field that can fail to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeField {
    Price,
    Quantity,
    Timestamp,
}

impl fmt::Display for TradeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TradeField::Price => "price",
            TradeField::Quantity => "quantity",
            TradeField::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// A single field of a trade line failed to parse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("can't parse {field} from {raw:?}: {reason}")]
pub struct FieldError {
    pub field: TradeField,
    pub raw: String,
    pub reason: String,
}

impl FieldError {
    fn new(field: TradeField, raw: &str, reason: impl fmt::Display) -> Self {
        Self {
            field,
            raw: raw.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// The line cannot form a trade record at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LineError {
    #[error("blank line")]
    Blank,
    #[error("expected 4 fields, found {0}")]
    FieldCount(usize),
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
    #[error("malformed CSV: {0}")]
    Malformed(String),
}

impl From<csv::Error> for LineError {
    fn from(e: csv::Error) -> Self {
        match e.kind() {
            csv::ErrorKind::Utf8 { .. } => LineError::InvalidUtf8,
            _ => LineError::Malformed(e.to_string()),
        }
    }
}

/// A trade record together with the fields that had to be defaulted.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    /// The record; failed fields hold their zero value.
    pub record: TradeRecord,
    /// Fields that failed to parse.
    pub field_errors: Vec<FieldError>,
}

impl ParsedLine {
    /// True when every field parsed.
    pub fn is_clean(&self) -> bool {
        self.field_errors.is_empty()
    }
}

/// Parse one trade line.
///
/// Field failures do not fail the line: the field takes its zero value (price 0,
/// quantity 0, Unix epoch) and the failure is listed in `field_errors`.
pub fn parse_trade_line(line: &str) -> Result<ParsedLine, LineError> {
    parse_trade_bytes(line.as_bytes())
}

/// Parse one raw trade line, as read from the log including its terminator.
///
/// Fields follow CSV quoting rules and are trimmed.
pub fn parse_trade_bytes(line: &[u8]) -> Result<ParsedLine, LineError> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Err(LineError::Blank);
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(line);
    let mut fields = csv::StringRecord::new();
    if !reader.read_record(&mut fields)? {
        return Err(LineError::Blank);
    }
    if fields.len() != TRADE_FIELDS {
        return Err(LineError::FieldCount(fields.len()));
    }

    let mut field_errors = Vec::new();

    let price = fields[1].parse::<f64>().unwrap_or_else(|e| {
        field_errors.push(FieldError::new(TradeField::Price, &fields[1], e));
        0.0
    });
    let quantity = fields[2].parse::<Quantity>().unwrap_or_else(|e| {
        field_errors.push(FieldError::new(TradeField::Quantity, &fields[2], e));
        0
    });
    let timestamp = parse_timestamp(&fields[3]).unwrap_or_else(|e| {
        field_errors.push(e);
        Timestamp::default()
    });

    Ok(ParsedLine {
        record: TradeRecord {
            instrument: fields[0].to_string(),
            price,
            quantity,
            timestamp,
        },
        field_errors,
    })
}

/// Parse a `<date> <time>` pair as the RFC 3339 instant `<date>T<time>Z`.
pub fn parse_timestamp(raw: &str) -> Result<Timestamp, FieldError> {
    let (date, time) = raw
        .split_once(' ')
        .ok_or_else(|| FieldError::new(TradeField::Timestamp, raw, "missing date/time separator"))?;
    let rfc3339 = format!("{date}T{time}Z");
    DateTime::parse_from_rfc3339(&rfc3339)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| FieldError::new(TradeField::Timestamp, raw, e))
}

/// Render a candle as one newline-terminated output line.
///
/// Prices use the shortest decimal that round-trips (`100`, `105.5`).
pub fn format_candle_line(candle: &Candle) -> String {
    format!(
        "{},{},{},{},{},{}\n",
        candle.instrument,
        candle.window_start.to_rfc3339_opts(SecondsFormat::Secs, true),
        candle.open,
        candle.high,
        candle.low,
        candle.close,
    )
}
