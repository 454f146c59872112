use crate::error::{EngineError, EngineResult};
use crate::models::{Candle, Signal, SignalAction, Timeframe};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bias {
    Bullish,
    Bearish,
}

impl Bias {
    pub fn action(self) -> SignalAction {
        match self {
            Bias::Bullish => SignalAction::Buy,
            Bias::Bearish => SignalAction::Sell,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Bias::Bullish => "bullish",
            Bias::Bearish => "bearish",
        }
    }
}

/// Identity of the candle a signal is being built for.
pub struct SignalContext<'a> {
    pub strategy_id: &'a str,
    pub symbol: &'a str,
    pub timeframe: Timeframe,
    pub candle: &'a Candle,
}

impl<'a> SignalContext<'a> {
    pub fn new(
        strategy_id: &'a str,
        symbol: &'a str,
        timeframe: Timeframe,
        candles: &'a [Candle],
    ) -> EngineResult<Self> {
        let candle = candles
            .last()
            .ok_or(EngineError::InsufficientWarmupData {
                required: 1,
                available: 0,
            })?;
        Ok(Self {
            strategy_id,
            symbol,
            timeframe,
            candle,
        })
    }

    pub fn price(&self) -> f64 {
        self.candle.close
    }

    pub fn signal(
        &self,
        action: SignalAction,
        confidence: f64,
        stop_loss: f64,
        take_profit: f64,
        rationale: String,
    ) -> Signal {
        Signal {
            strategy_id: self.strategy_id.to_string(),
            symbol: self.symbol.to_string(),
            timeframe: self.timeframe,
            timestamp: self.candle.open_time,
            action,
            price: self.candle.close,
            confidence: clamp_confidence(confidence),
            stop_loss,
            take_profit,
            rationale,
            metadata: BTreeMap::new(),
        }
    }
}

pub fn with_metadata(mut signal: Signal, entries: &[(&str, f64)]) -> Signal {
    for (key, value) in entries {
        if value.is_finite() {
            signal.metadata.insert(key.to_string(), *value);
        }
    }
    signal
}

pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_finite() {
        confidence.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Check if confidence meets the minimum threshold
pub fn meets_confidence_threshold(confidence: f64, min_confidence: f64) -> bool {
    confidence >= min_confidence - 1e-6
}

pub fn require_warmup(candles: &[Candle], required: usize) -> EngineResult<()> {
    if candles.len() < required {
        return Err(EngineError::InsufficientWarmupData {
            required,
            available: candles.len(),
        });
    }
    Ok(())
}

pub fn require<T>(value: Option<T>, indicator: &str) -> EngineResult<T> {
    value.ok_or_else(|| EngineError::indicator(indicator))
}

/// Take-profit placed `ratio` times the stop distance away from entry.
pub fn risk_reward_target(entry: f64, stop: f64, ratio: f64) -> f64 {
    entry + (entry - stop) * ratio
}

pub fn recent_support(candles: &[Candle], lookback: usize) -> Option<f64> {
    let start = candles.len().checked_sub(lookback)?;
    candles[start..]
        .iter()
        .map(|c| c.low)
        .fold(None, |acc: Option<f64>, low| Some(acc.map_or(low, |a| a.min(low))))
}

pub fn recent_resistance(candles: &[Candle], lookback: usize) -> Option<f64> {
    let start = candles.len().checked_sub(lookback)?;
    candles[start..]
        .iter()
        .map(|c| c.high)
        .fold(None, |acc: Option<f64>, high| Some(acc.map_or(high, |a| a.max(high))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn candles(lows_highs: &[(f64, f64)]) -> Vec<Candle> {
        lows_highs
            .iter()
            .enumerate()
            .map(|(i, (low, high))| Candle {
                symbol: "SOLUSDT".to_string(),
                timeframe: Timeframe::H1,
                open_time: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
                    + Duration::hours(i as i64),
                open: (low + high) / 2.0,
                high: *high,
                low: *low,
                close: (low + high) / 2.0,
                volume: 1.0,
            })
            .collect()
    }

    #[test]
    fn risk_reward_target_works_for_both_sides() {
        assert_eq!(risk_reward_target(100.0, 95.0, 2.0), 110.0);
        assert_eq!(risk_reward_target(100.0, 105.0, 3.0), 85.0);
    }

    #[test]
    fn support_and_resistance_use_the_lookback_window() {
        let series = candles(&[(90.0, 120.0), (95.0, 105.0), (97.0, 104.0), (96.0, 103.0)]);
        assert_eq!(recent_support(&series, 3), Some(95.0));
        assert_eq!(recent_resistance(&series, 3), Some(105.0));
        assert_eq!(recent_support(&series, 4), Some(90.0));
        assert_eq!(recent_support(&series, 5), None);
    }

    #[test]
    fn signal_context_clamps_confidence_and_filters_metadata() {
        let series = candles(&[(99.0, 101.0)]);
        let ctx = SignalContext::new("rsi_volume", "SOLUSDT", Timeframe::H1, &series).unwrap();
        let signal = with_metadata(
            ctx.signal(SignalAction::Buy, 140.0, 98.0, 104.0, "test".to_string()),
            &[("rsi", 25.0), ("bad", f64::NAN)],
        );
        assert_eq!(signal.confidence, 100.0);
        assert_eq!(signal.price, 100.0);
        assert_eq!(signal.metadata.len(), 1);
        assert!(SignalContext::new("x", "y", Timeframe::H1, &[]).is_err());
    }

    #[test]
    fn warmup_shortage_is_a_no_signal_error() {
        let series = candles(&[(1.0, 2.0)]);
        let err = require_warmup(&series, 3).unwrap_err();
        assert!(err.is_no_signal());
        assert!(require::<f64>(None, "rsi").unwrap_err().is_no_signal());
    }
}
