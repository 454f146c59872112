use crate::models::{Candle, Timeframe};
use std::collections::HashMap;

pub type SeriesKey = (String, Timeframe);

/// Normalizes a symbol by trimming whitespace and uppercasing.
pub fn normalize_symbol(value: &str) -> Option<String> {
    let normalized = value.trim().to_uppercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Sorts by open time and keeps the last candle seen for any repeated open time,
/// leaving a strictly increasing series.
pub fn sort_and_dedup(mut candles: Vec<Candle>) -> Vec<Candle> {
    candles.sort_by_key(|c| c.open_time);
    let mut deduped: Vec<Candle> = Vec::with_capacity(candles.len());
    for candle in candles {
        match deduped.last_mut() {
            Some(last) if last.open_time == candle.open_time => *last = candle,
            _ => deduped.push(candle),
        }
    }
    deduped
}

/// Groups owned candles by normalized symbol and timeframe, each series sorted
/// and de-duplicated. Candles with an empty symbol are dropped.
pub fn group_candles_by_series(candles: Vec<Candle>) -> HashMap<SeriesKey, Vec<Candle>> {
    let mut grouped: HashMap<SeriesKey, Vec<Candle>> = HashMap::new();
    for mut candle in candles {
        let Some(symbol) = normalize_symbol(&candle.symbol) else {
            continue;
        };
        candle.symbol = symbol.clone();
        grouped
            .entry((symbol, candle.timeframe))
            .or_default()
            .push(candle);
    }

    grouped
        .into_iter()
        .map(|(key, series)| (key, sort_and_dedup(series)))
        .collect()
}

pub fn is_strictly_increasing(candles: &[Candle]) -> bool {
    candles.windows(2).all(|w| w[0].open_time < w[1].open_time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn candle(symbol: &str, hour: i64, close: f64) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            timeframe: Timeframe::H1,
            open_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hour),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
        }
    }

    #[test]
    fn group_candles_normalizes_sorts_and_dedups() {
        let candles = vec![
            candle(" btcusdt", 2, 102.0),
            candle("BTCUSDT", 0, 100.0),
            candle("BTCUSDT", 2, 103.0),
            candle("ethusdt", 1, 50.0),
            candle("  ", 1, 1.0),
        ];

        let grouped = group_candles_by_series(candles);
        assert_eq!(grouped.len(), 2);

        let btc = &grouped[&("BTCUSDT".to_string(), Timeframe::H1)];
        assert_eq!(btc.len(), 2);
        assert!(is_strictly_increasing(btc));
        assert_eq!(btc[1].close, 103.0);
        assert_eq!(btc[0].symbol, "BTCUSDT");
    }

    #[test]
    fn normalize_rejects_blank_symbols() {
        assert_eq!(normalize_symbol(" solusdt "), Some("SOLUSDT".to_string()));
        assert_eq!(normalize_symbol("   "), None);
    }
}
