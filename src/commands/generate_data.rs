use crate::candle_store::InMemoryCandleStore;
use crate::context::AppContext;
use crate::models::Timeframe;
use crate::synthetic::{generate_candles, SyntheticSeries};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use log::info;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct GenerateDataArgs {
    pub output: PathBuf,
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
    pub start: DateTime<Utc>,
    pub count: usize,
    pub start_price: Option<f64>,
    pub seed: u64,
}

/// Open time of the first of `count` candles ending at `now`.
pub fn lookback_start(
    now: DateTime<Utc>,
    timeframe: Timeframe,
    count: usize,
) -> Result<DateTime<Utc>> {
    i32::try_from(count)
        .ok()
        .and_then(|n| timeframe.duration().checked_mul(n))
        .and_then(|span| now.checked_sub_signed(span))
        .ok_or_else(|| {
            anyhow!(
                "{} {} candles reach past the supported date range",
                count,
                timeframe
            )
        })
}

/// Writes a seeded synthetic candle snapshot. Each symbol gets its own seed offset.
pub async fn run(_app: &AppContext, args: GenerateDataArgs) -> Result<usize> {
    if args.symbols.is_empty() {
        return Err(anyhow!("At least one symbol is required"));
    }
    if args.count == 0 {
        return Err(anyhow!("Candle count must be positive"));
    }

    let store = InMemoryCandleStore::new();
    for (offset, symbol) in args.symbols.iter().enumerate() {
        let mut spec = SyntheticSeries::new(symbol, args.timeframe, args.start, args.count);
        spec.seed = args.seed.wrapping_add(offset as u64);
        if let Some(price) = args.start_price {
            spec.start_price = price;
        }
        let inserted = store.insert(generate_candles(&spec)?)?;
        info!(
            "Generated {} {} candles for {} (seed {})",
            inserted, args.timeframe, symbol, spec.seed
        );
    }

    store.save_snapshot(&args.output)?;
    info!(
        "Candle snapshot with {} candles written to {}",
        store.candle_count(),
        args.output.display()
    );
    Ok(store.candle_count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn lookback_start_rejects_counts_past_the_date_range() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(
            lookback_start(now, Timeframe::H1, 48).unwrap(),
            now - Duration::hours(48)
        );
        assert!(lookback_start(now, Timeframe::W1, usize::MAX).is_err());
        assert!(lookback_start(now, Timeframe::W1, i32::MAX as usize).is_err());
    }
}
