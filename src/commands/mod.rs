pub mod backtest;
pub mod compare;
pub mod consensus;
pub mod generate_data;
pub mod strategies;

use crate::candle_store::{CandleStore, DateRange};
use crate::models::Timeframe;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;

/// Parses `key=value` strategy parameters.
pub fn parse_parameters(entries: &[String]) -> Result<HashMap<String, f64>> {
    let mut parameters = HashMap::new();
    for entry in entries {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("Parameter '{}' must look like key=value", entry))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(anyhow!("Parameter '{}' has an empty name", entry));
        }
        let parsed = value
            .trim()
            .parse::<f64>()
            .with_context(|| format!("Parameter {} must be numeric (value: {})", key, value))?;
        parameters.insert(key.to_string(), parsed);
    }
    Ok(parameters)
}

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_date(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Unrecognized date '{}'", value))?;
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| anyhow!("Invalid date '{}'", value))
}

/// Fills a missing bound from the stored series.
pub fn resolve_range(
    store: &dyn CandleStore,
    symbol: &str,
    timeframe: Timeframe,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<DateRange> {
    if let (Some(start), Some(end)) = (start, end) {
        return Ok(DateRange::new(start, end));
    }
    let series = store.get_candles(symbol, timeframe, None)?;
    let (first, last) = match (series.first(), series.last()) {
        (Some(first), Some(last)) => (first.open_time, last.open_time),
        _ => {
            return Err(anyhow!(
                "No candles stored for {} {}; pass --start and --end or load more data",
                symbol,
                timeframe
            ))
        }
    };
    Ok(DateRange::new(start.unwrap_or(first), end.unwrap_or(last)))
}
