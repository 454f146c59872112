use crate::error::{EngineError, EngineResult};
use crate::models::{Candle, Timeframe};
use chrono::{DateTime, Utc};
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statrs::distribution::Normal;

/// Parameters for a seeded geometric random walk with regime shifts.
#[derive(Debug, Clone)]
pub struct SyntheticSeries {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start: DateTime<Utc>,
    pub count: usize,
    pub start_price: f64,
    /// Per-bar log drift before the regime multiplier.
    pub drift: f64,
    /// Per-bar log volatility.
    pub volatility: f64,
    pub base_volume: f64,
    pub seed: u64,
}

impl SyntheticSeries {
    pub fn new(symbol: &str, timeframe: Timeframe, start: DateTime<Utc>, count: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
            start,
            count,
            start_price: 100.0,
            drift: 0.0004,
            volatility: 0.012,
            base_volume: 1_000.0,
            seed: 42,
        }
    }
}

fn regime(bar: usize) -> f64 {
    match (bar / 120) % 3 {
        0 => 1.0,
        1 => -0.65,
        _ => 0.35,
    }
}

pub fn generate_candles(spec: &SyntheticSeries) -> EngineResult<Vec<Candle>> {
    if !(spec.start_price > 0.0) || !(spec.volatility >= 0.0) || !(spec.base_volume > 0.0) {
        return Err(EngineError::InvalidConfig(format!(
            "synthetic series needs positive price and volume and non-negative volatility \
             (price {}, volatility {}, volume {})",
            spec.start_price, spec.volatility, spec.base_volume
        )));
    }
    let normal = Normal::new(0.0, 1.0)
        .map_err(|err| EngineError::InvalidConfig(format!("normal distribution: {}", err)))?;
    let mut rng = StdRng::seed_from_u64(spec.seed);
    let step = spec.timeframe.duration();

    let mut candles = Vec::with_capacity(spec.count);
    let mut open = spec.start_price;
    for bar in 0..spec.count {
        let log_return = spec.drift * regime(bar) + spec.volatility * normal.sample(&mut rng);
        let close = open * log_return.exp();
        let upper = spec.volatility * 0.5 * normal.sample(&mut rng).abs();
        let lower = spec.volatility * 0.5 * normal.sample(&mut rng).abs();
        let high = open.max(close) * (1.0 + upper);
        let low = open.min(close) * (1.0 - lower).max(0.01);
        let spike = if rng.gen_bool(0.05) { 3.0 } else { 1.0 };
        let volume = spec.base_volume * (1.0 + 0.3 * normal.sample(&mut rng).abs()) * spike;

        candles.push(Candle {
            symbol: spec.symbol.clone(),
            timeframe: spec.timeframe,
            open_time: spec.start + step * bar as i32,
            open,
            high,
            low,
            close,
            volume,
        });
        open = close;
    }

    Ok(candles)
}
