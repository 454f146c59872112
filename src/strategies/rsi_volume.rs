use crate::error::EngineResult;
use crate::indicators;
use crate::models::*;
use crate::param_utils::{get_param_f64, get_param_f64_clamped, get_param_usize_at_least};
use crate::strategy_utils::{
    meets_confidence_threshold, recent_resistance, recent_support, require, require_warmup,
    risk_reward_target, with_metadata, SignalContext,
};
use std::collections::HashMap;

const BOLLINGER_PERIOD: usize = 20;
const BOLLINGER_WIDTH: f64 = 2.0;

/// Oversold/overbought RSI confirmed by a volume spike and candle colour.
#[derive(Debug, Clone)]
pub struct RsiVolumeStrategy {
    rsi_period: usize,
    oversold_level: f64,
    overbought_level: f64,
    volume_lookback: usize,
    volume_multiplier: f64,
    level_lookback: usize,
    level_buffer: f64,
    risk_reward: f64,
    min_confidence: f64,
}

impl RsiVolumeStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        Self {
            rsi_period: get_param_usize_at_least(parameters, "rsiPeriod", 14, 2),
            oversold_level: get_param_f64_clamped(parameters, "oversoldLevel", 30.0, 0.0, 50.0),
            overbought_level: get_param_f64_clamped(
                parameters,
                "overboughtLevel",
                70.0,
                50.0,
                100.0,
            ),
            volume_lookback: get_param_usize_at_least(parameters, "volumeLookback", 20, 1),
            volume_multiplier: get_param_f64(parameters, "volumeMultiplier", 1.5),
            level_lookback: get_param_usize_at_least(parameters, "levelLookback", 20, 2),
            level_buffer: get_param_f64_clamped(parameters, "levelBuffer", 0.001, 0.0, 0.1),
            risk_reward: get_param_f64(parameters, "riskReward", 2.0),
            min_confidence: get_param_f64(parameters, "minConfidence", 0.0),
        }
    }

    fn confidence(&self, rsi_extremity: f64, volume_ratio: f64) -> f64 {
        (50.0 + rsi_extremity * 1.5 + (volume_ratio - self.volume_multiplier) * 10.0).min(100.0)
    }
}

impl super::Strategy for RsiVolumeStrategy {
    fn info(&self) -> StrategyInfo {
        StrategyInfo {
            id: "rsi_volume",
            name: "RSI + Volume",
            description: "Mean reversion on RSI extremes confirmed by a volume spike",
            expected_win_rate: (55.0, 65.0),
        }
    }

    fn min_data_points(&self) -> usize {
        (self.rsi_period + 1)
            .max(self.volume_lookback + 1)
            .max(self.level_lookback)
    }

    fn evaluate(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> EngineResult<Option<Signal>> {
        require_warmup(candles, self.min_data_points())?;
        let ctx = SignalContext::new("rsi_volume", symbol, timeframe, candles)?;
        let price = ctx.price();

        let closes = indicators::closes(candles);
        let volumes = indicators::volumes(candles);
        let rsi = require(indicators::latest_rsi(&closes, self.rsi_period), "rsi")?;
        let volume_ratio = require(
            indicators::volume_ratio(&volumes, self.volume_lookback),
            "volume_ratio",
        )?;

        if volume_ratio < self.volume_multiplier {
            return Ok(None);
        }
        let percent_b = indicators::latest_bollinger(&closes, BOLLINGER_PERIOD, BOLLINGER_WIDTH)
            .map_or(f64::NAN, |bands| bands.percent_b(price));

        if rsi < self.oversold_level && ctx.candle.is_bullish() {
            let support = require(
                recent_support(candles, self.level_lookback),
                "support",
            )?;
            let stop_loss = support.min(price) * (1.0 - self.level_buffer);
            let confidence = self.confidence(self.oversold_level - rsi, volume_ratio);
            if !meets_confidence_threshold(confidence, self.min_confidence) {
                return Ok(None);
            }
            let signal = ctx.signal(
                SignalAction::Buy,
                confidence,
                stop_loss,
                risk_reward_target(price, stop_loss, self.risk_reward),
                format!(
                    "RSI {:.1} oversold with volume {:.2}x average on a bullish candle",
                    rsi, volume_ratio
                ),
            );
            return Ok(Some(with_metadata(
                signal,
                &[
                    ("rsi", rsi),
                    ("volumeRatio", volume_ratio),
                    ("support", support),
                    ("percentB", percent_b),
                ],
            )));
        }

        if rsi > self.overbought_level && ctx.candle.is_bearish() {
            let resistance = require(
                recent_resistance(candles, self.level_lookback),
                "resistance",
            )?;
            let stop_loss = resistance.max(price) * (1.0 + self.level_buffer);
            let confidence = self.confidence(rsi - self.overbought_level, volume_ratio);
            if !meets_confidence_threshold(confidence, self.min_confidence) {
                return Ok(None);
            }
            let signal = ctx.signal(
                SignalAction::Sell,
                confidence,
                stop_loss,
                risk_reward_target(price, stop_loss, self.risk_reward),
                format!(
                    "RSI {:.1} overbought with volume {:.2}x average on a bearish candle",
                    rsi, volume_ratio
                ),
            );
            return Ok(Some(with_metadata(
                signal,
                &[
                    ("rsi", rsi),
                    ("volumeRatio", volume_ratio),
                    ("resistance", resistance),
                    ("percentB", percent_b),
                ],
            )));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Strategy;
    use chrono::{Duration, TimeZone, Utc};

    fn bar(i: usize, open: f64, close: f64, volume: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::H1,
            open_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + Duration::hours(i as i64),
            open,
            high: open.max(close) + 0.5,
            low: open.min(close) - 0.5,
            close,
            volume,
        }
    }

    /// 29 falling bars then a bullish bar that still closes lower.
    fn capitulation(last_volume: f64) -> Vec<Candle> {
        let mut candles: Vec<Candle> = (0..29)
            .map(|i| {
                let close = 130.0 - i as f64;
                bar(i, close + 1.0, close, 100.0)
            })
            .collect();
        candles.push(bar(29, 100.0, 101.0, last_volume));
        candles
    }

    #[test]
    fn buys_oversold_bounce_on_volume_spike() {
        let strategy = RsiVolumeStrategy::new(&HashMap::new());
        let candles = capitulation(300.0);
        let signal = strategy
            .evaluate("BTCUSDT", Timeframe::H1, &candles)
            .unwrap()
            .expect("signal");
        assert_eq!(signal.action, SignalAction::Buy);
        assert_eq!(signal.confidence, 100.0);
        assert!(signal.stop_loss < signal.price);
        let risk = signal.price - signal.stop_loss;
        assert!((signal.take_profit - (signal.price + 2.0 * risk)).abs() < 1e-9);
        assert!(signal.metadata["volumeRatio"] >= 2.99);
    }

    #[test]
    fn ignores_oversold_without_volume() {
        let strategy = RsiVolumeStrategy::new(&HashMap::new());
        let candles = capitulation(100.0);
        assert!(strategy
            .evaluate("BTCUSDT", Timeframe::H1, &candles)
            .unwrap()
            .is_none());
    }

    #[test]
    fn sells_overbought_rejection() {
        let mut candles: Vec<Candle> = (0..29)
            .map(|i| {
                let close = 100.0 + i as f64;
                bar(i, close - 1.0, close, 100.0)
            })
            .collect();
        candles.push(bar(29, 131.0, 130.0, 400.0));
        let strategy = RsiVolumeStrategy::new(&HashMap::new());
        let signal = strategy
            .evaluate("BTCUSDT", Timeframe::H1, &candles)
            .unwrap()
            .expect("signal");
        assert_eq!(signal.action, SignalAction::Sell);
        assert!(signal.stop_loss > signal.price);
        assert!(signal.take_profit < signal.price);
    }

    #[test]
    fn short_window_is_warmup_error() {
        let strategy = RsiVolumeStrategy::new(&HashMap::new());
        let candles = capitulation(300.0);
        let err = strategy
            .evaluate("BTCUSDT", Timeframe::H1, &candles[..10])
            .unwrap_err();
        assert!(err.is_no_signal());
    }
}
