use crate::error::EngineResult;
use crate::indicators::{self, VolumeProfile};
use crate::models::*;
use crate::param_utils::{get_param_f64, get_param_f64_clamped, get_param_usize_at_least};
use crate::strategy_utils::{
    meets_confidence_threshold, require, require_warmup, risk_reward_target, with_metadata, Bias,
    SignalContext,
};
use std::collections::HashMap;

const ATR_PERIOD: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeReaction {
    /// High volume with a long rejection wick; the bias is the side that held.
    Absorption(Bias),
    /// High volume that went nowhere.
    Exhaustion,
}

#[derive(Debug, Clone)]
pub struct OrderFlowStrategy {
    profile_lookback: usize,
    profile_bins: usize,
    value_area_ratio: f64,
    delta_lookback: usize,
    volume_lookback: usize,
    high_volume_multiplier: f64,
    wick_ratio: f64,
    exhaustion_body_ratio: f64,
    risk_reward: f64,
    min_confidence: f64,
}

impl OrderFlowStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        Self {
            profile_lookback: get_param_usize_at_least(parameters, "profileLookback", 50, 5),
            profile_bins: get_param_usize_at_least(parameters, "profileBins", 50, 5),
            value_area_ratio: get_param_f64_clamped(parameters, "valueAreaRatio", 0.7, 0.1, 1.0),
            delta_lookback: get_param_usize_at_least(parameters, "deltaLookback", 20, 1),
            volume_lookback: get_param_usize_at_least(parameters, "volumeLookback", 20, 1),
            high_volume_multiplier: get_param_f64(parameters, "highVolumeMultiplier", 1.5),
            wick_ratio: get_param_f64_clamped(parameters, "wickRatio", 0.5, 0.0, 1.0),
            exhaustion_body_ratio: get_param_f64_clamped(
                parameters,
                "exhaustionBodyRatio",
                0.2,
                0.0,
                1.0,
            ),
            risk_reward: get_param_f64(parameters, "riskReward", 2.0),
            min_confidence: get_param_f64(parameters, "minConfidence", 0.0),
        }
    }

    pub fn classify(&self, candle: &Candle, volume_ratio: f64) -> Option<VolumeReaction> {
        let range = candle.range();
        if volume_ratio < self.high_volume_multiplier || range <= 0.0 {
            return None;
        }
        if candle.lower_wick() / range >= self.wick_ratio {
            Some(VolumeReaction::Absorption(Bias::Bullish))
        } else if candle.upper_wick() / range >= self.wick_ratio {
            Some(VolumeReaction::Absorption(Bias::Bearish))
        } else if candle.body() / range <= self.exhaustion_body_ratio {
            Some(VolumeReaction::Exhaustion)
        } else {
            None
        }
    }

    /// Nearest high-volume node beyond price, then the value-area edge, then a fixed R multiple.
    fn target(&self, profile: &VolumeProfile, bias: Bias, price: f64, stop: f64) -> f64 {
        let nodes = profile
            .high_volume_nodes()
            .into_iter()
            .map(|i| profile.bin_center(i));
        let node = match bias {
            Bias::Bullish => nodes.filter(|&p| p > price).reduce(f64::min),
            Bias::Bearish => nodes.filter(|&p| p < price).reduce(f64::max),
        };
        if let Some(node) = node {
            return node;
        }
        match bias {
            Bias::Bullish if profile.value_area_high > price => profile.value_area_high,
            Bias::Bearish if profile.value_area_low < price => profile.value_area_low,
            _ => risk_reward_target(price, stop, self.risk_reward),
        }
    }
}

impl super::Strategy for OrderFlowStrategy {
    fn info(&self) -> StrategyInfo {
        StrategyInfo {
            id: "order_flow",
            name: "Order Flow / Volume Profile",
            description: "Volume delta, point of control and absorption agreeing on direction",
            expected_win_rate: (55.0, 65.0),
        }
    }

    fn min_data_points(&self) -> usize {
        self.profile_lookback
            .max(self.delta_lookback)
            .max(self.volume_lookback + 1)
    }

    fn evaluate(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> EngineResult<Option<Signal>> {
        require_warmup(candles, self.min_data_points())?;
        let ctx = SignalContext::new("order_flow", symbol, timeframe, candles)?;
        let price = ctx.price();
        let n = candles.len();

        let window = &candles[n - self.profile_lookback..];
        let profile = require(
            indicators::calculate_volume_profile(window, self.profile_bins, self.value_area_ratio),
            "volume_profile",
        )?;
        let volume_ratio = require(
            indicators::volume_ratio(&indicators::volumes(candles), self.volume_lookback),
            "volume_ratio",
        )?;
        let delta_window = &candles[n - self.delta_lookback..];
        let delta = indicators::volume_delta(delta_window);
        let poc = profile.poc_price();

        let Some(VolumeReaction::Absorption(bias)) = self.classify(ctx.candle, volume_ratio) else {
            return Ok(None);
        };
        let agrees = match bias {
            Bias::Bullish => delta > 0.0 && price > poc,
            Bias::Bearish => delta < 0.0 && price < poc,
        };
        if !agrees {
            return Ok(None);
        }

        let half_bin = profile.bin_width / 2.0;
        let stop_loss = match bias {
            Bias::Bullish => poc - half_bin,
            Bias::Bearish => poc + half_bin,
        };
        let take_profit = self.target(&profile, bias, price, stop_loss);

        let window_volume: f64 = delta_window.iter().map(|c| c.volume).sum();
        let delta_share = if window_volume > 0.0 {
            delta.abs() / window_volume
        } else {
            0.0
        };
        let confidence = 60.0
            + (delta_share * 40.0).min(20.0)
            + ((volume_ratio - self.high_volume_multiplier) * 10.0).clamp(0.0, 20.0);
        if !meets_confidence_threshold(confidence, self.min_confidence) {
            return Ok(None);
        }

        let signal = ctx.signal(
            bias.action(),
            confidence,
            stop_loss,
            take_profit,
            format!(
                "{} absorption at {:.2}x volume, delta {:.0}, price {} POC {:.4}",
                bias.as_str(),
                volume_ratio,
                delta,
                if price > poc { "above" } else { "below" },
                poc
            ),
        );
        Ok(Some(with_metadata(
            signal,
            &[
                ("poc", poc),
                ("valueAreaHigh", profile.value_area_high),
                ("valueAreaLow", profile.value_area_low),
                ("delta", delta),
                ("volumeRatio", volume_ratio),
                (
                    "atr",
                    indicators::latest_atr(candles, ATR_PERIOD).unwrap_or(f64::NAN),
                ),
            ],
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Strategy;
    use chrono::{Duration, TimeZone, Utc};

    fn bar(i: usize, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            symbol: "ETHUSDT".to_string(),
            timeframe: Timeframe::H1,
            open_time: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
                + Duration::hours(i as i64),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Heavy trade near 108, a long base near 100, a grind higher, then a
    /// high-volume candle with a long lower wick.
    fn fixture(last_volume: f64, mirror: bool) -> Vec<Candle> {
        let mut raw = Vec::new();
        for i in 0..10 {
            let c = 108.2 - 0.04 * i as f64;
            raw.push((c + 0.3, c + 0.5, c - 0.5, c, 150.0));
        }
        for i in 0..25 {
            if i % 2 == 0 {
                raw.push((99.8, 100.4, 99.6, 100.2, 200.0));
            } else {
                raw.push((100.2, 100.4, 99.6, 99.8, 200.0));
            }
        }
        for i in 0..14 {
            let open = 100.2 + 0.28 * i as f64;
            let close = open + 0.28;
            raw.push((open, close + 0.1, open - 0.1, close, 100.0));
        }
        raw.push((104.0, 104.6, 102.5, 104.4, last_volume));

        raw.into_iter()
            .enumerate()
            .map(|(i, (o, h, l, c, v))| {
                if mirror {
                    bar(i, 210.0 - o, 210.0 - l, 210.0 - h, 210.0 - c, v)
                } else {
                    bar(i, o, h, l, c, v)
                }
            })
            .collect()
    }

    #[test]
    fn classifies_absorption_and_exhaustion() {
        let strategy = OrderFlowStrategy::new(&HashMap::new());
        let hammer = bar(0, 104.0, 104.6, 102.5, 104.4, 1.0);
        assert_eq!(
            strategy.classify(&hammer, 2.0),
            Some(VolumeReaction::Absorption(Bias::Bullish))
        );
        assert_eq!(strategy.classify(&hammer, 1.0), None);
        let doji = bar(0, 100.0, 100.5, 99.6, 100.1, 1.0);
        assert_eq!(
            strategy.classify(&doji, 3.0),
            Some(VolumeReaction::Exhaustion)
        );
    }

    #[test]
    fn buys_absorption_above_poc_with_positive_delta() {
        let strategy = OrderFlowStrategy::new(&HashMap::new());
        let candles = fixture(450.0, false);
        let signal = strategy
            .evaluate("ETHUSDT", Timeframe::H1, &candles)
            .unwrap()
            .expect("signal");
        assert_eq!(signal.action, SignalAction::Buy);
        let poc = signal.metadata["poc"];
        assert!(poc > 99.5 && poc < 101.0, "poc {poc}");
        assert!(signal.stop_loss < poc && signal.stop_loss > poc - 0.2);
        assert!(
            signal.take_profit > 107.5 && signal.take_profit < 108.5,
            "target {}",
            signal.take_profit
        );
        assert!(signal.metadata["delta"] > 0.0);
    }

    #[test]
    fn sells_mirrored_absorption_below_poc() {
        let strategy = OrderFlowStrategy::new(&HashMap::new());
        let candles = fixture(450.0, true);
        let signal = strategy
            .evaluate("ETHUSDT", Timeframe::H1, &candles)
            .unwrap()
            .expect("signal");
        assert_eq!(signal.action, SignalAction::Sell);
        assert!(signal.stop_loss > signal.metadata["poc"]);
        assert!(
            signal.take_profit > 101.5 && signal.take_profit < 102.5,
            "target {}",
            signal.take_profit
        );
    }

    #[test]
    fn ordinary_volume_is_ignored() {
        let strategy = OrderFlowStrategy::new(&HashMap::new());
        let candles = fixture(150.0, false);
        assert!(strategy
            .evaluate("ETHUSDT", Timeframe::H1, &candles)
            .unwrap()
            .is_none());
    }
}
