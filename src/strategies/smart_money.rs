use crate::error::EngineResult;
use crate::indicators;
use crate::models::*;
use crate::param_utils::{get_param_f64, get_param_f64_clamped, get_param_usize_at_least};
use crate::strategy_utils::{
    meets_confidence_threshold, require, require_warmup, risk_reward_target, with_metadata, Bias,
    SignalContext,
};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiquiditySweep {
    pub bias: Bias,
    /// The prior range boundary that was breached.
    pub level: f64,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderBlock {
    pub index: usize,
    pub high: f64,
    pub low: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FairValueGap {
    pub bias: Bias,
    pub top: f64,
    pub bottom: f64,
}

/// A candle in the last `sweep_window` that pierced the range formed by the
/// `range_lookback` candles before it and closed back inside. Latest wins.
pub fn detect_liquidity_sweep(
    candles: &[Candle],
    range_lookback: usize,
    sweep_window: usize,
) -> Option<LiquiditySweep> {
    let n = candles.len();
    if range_lookback == 0 || sweep_window == 0 || n < range_lookback + sweep_window {
        return None;
    }
    let range = &candles[n - sweep_window - range_lookback..n - sweep_window];
    let range_low = range.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    let range_high = range
        .iter()
        .map(|c| c.high)
        .fold(f64::NEG_INFINITY, f64::max);

    (n - sweep_window..n).rev().find_map(|index| {
        let candle = &candles[index];
        if candle.low < range_low && candle.close > range_low {
            Some(LiquiditySweep {
                bias: Bias::Bullish,
                level: range_low,
                index,
            })
        } else if candle.high > range_high && candle.close < range_high {
            Some(LiquiditySweep {
                bias: Bias::Bearish,
                level: range_high,
                index,
            })
        } else {
            None
        }
    })
}

/// Large candle against `bias` immediately followed by a bigger candle that
/// engulfs it in the `bias` direction.
pub fn detect_order_block(
    candles: &[Candle],
    window: usize,
    body_multiplier: f64,
    bias: Bias,
) -> Option<OrderBlock> {
    let n = candles.len();
    if window < 2 || n < window {
        return None;
    }
    let recent = &candles[n - window..];
    let average_body = recent.iter().map(Candle::body).sum::<f64>() / window as f64;
    if average_body <= 0.0 {
        return None;
    }

    (0..window - 1).rev().find_map(|i| {
        let block = &recent[i];
        let next = &recent[i + 1];
        let (opposite, continuation) = match bias {
            Bias::Bullish => (
                block.is_bearish(),
                next.is_bullish() && next.close > block.open,
            ),
            Bias::Bearish => (
                block.is_bullish(),
                next.is_bearish() && next.close < block.open,
            ),
        };
        let large = block.body() >= body_multiplier * average_body;
        (opposite && large && continuation && next.body() > block.body()).then_some(OrderBlock {
            index: n - window + i,
            high: block.high,
            low: block.low,
        })
    })
}

/// Most recent three-candle void within the last `window` candles.
pub fn detect_fair_value_gap(candles: &[Candle], window: usize) -> Option<FairValueGap> {
    let n = candles.len();
    if n < 3 {
        return None;
    }
    let start = n.saturating_sub(window);
    (start..=n - 3).rev().find_map(|i| {
        let first = &candles[i];
        let third = &candles[i + 2];
        if first.high < third.low {
            Some(FairValueGap {
                bias: Bias::Bullish,
                top: third.low,
                bottom: first.high,
            })
        } else if first.low > third.high {
            Some(FairValueGap {
                bias: Bias::Bearish,
                top: first.low,
                bottom: third.high,
            })
        } else {
            None
        }
    })
}

/// Level of the most recent confirmed swing against `bias`, if the last close
/// has broken through it.
pub fn detect_change_of_character(
    candles: &[Candle],
    lookback: usize,
    strength: usize,
    bias: Bias,
) -> Option<f64> {
    let n = candles.len();
    if strength == 0 || lookback < 2 * strength + 1 || n < lookback + 1 {
        return None;
    }
    let history = &candles[n - 1 - lookback..n - 1];
    let close = candles[n - 1].close;

    let swing = (strength..history.len() - strength).rev().find_map(|j| {
        let pivot = &history[j];
        let confirmed = (1..=strength).all(|k| match bias {
            Bias::Bullish => pivot.high > history[j - k].high && pivot.high > history[j + k].high,
            Bias::Bearish => pivot.low < history[j - k].low && pivot.low < history[j + k].low,
        });
        confirmed.then_some(match bias {
            Bias::Bullish => pivot.high,
            Bias::Bearish => pivot.low,
        })
    })?;

    let broken = match bias {
        Bias::Bullish => close > swing,
        Bias::Bearish => close < swing,
    };
    broken.then_some(swing)
}

/// Liquidity sweep, order block, change of character and a volume surge must all line up.
#[derive(Debug, Clone)]
pub struct SmartMoneyStrategy {
    range_lookback: usize,
    sweep_window: usize,
    order_block_window: usize,
    order_block_body_multiplier: f64,
    swing_lookback: usize,
    swing_strength: usize,
    fvg_window: usize,
    volume_lookback: usize,
    volume_multiplier: f64,
    stop_buffer: f64,
    risk_reward: f64,
    min_confidence: f64,
}

impl SmartMoneyStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        Self {
            range_lookback: get_param_usize_at_least(parameters, "rangeLookback", 20, 2),
            sweep_window: get_param_usize_at_least(parameters, "sweepWindow", 3, 1),
            order_block_window: get_param_usize_at_least(parameters, "orderBlockWindow", 10, 2),
            order_block_body_multiplier: get_param_f64(parameters, "orderBlockBodyMultiplier", 1.5),
            swing_lookback: get_param_usize_at_least(parameters, "swingLookback", 30, 5),
            swing_strength: get_param_usize_at_least(parameters, "swingStrength", 2, 1),
            fvg_window: get_param_usize_at_least(parameters, "fvgWindow", 10, 3),
            volume_lookback: get_param_usize_at_least(parameters, "volumeLookback", 20, 1),
            volume_multiplier: get_param_f64(parameters, "volumeMultiplier", 2.5),
            stop_buffer: get_param_f64_clamped(parameters, "stopBuffer", 0.001, 0.0, 0.1),
            risk_reward: get_param_f64(parameters, "riskReward", 3.0),
            min_confidence: get_param_f64(parameters, "minConfidence", 0.0),
        }
    }
}

impl super::Strategy for SmartMoneyStrategy {
    fn info(&self) -> StrategyInfo {
        StrategyInfo {
            id: "smart_money",
            name: "Smart Money Concepts",
            description: "Liquidity sweep into an order block confirmed by a change of character",
            expected_win_rate: (60.0, 70.0),
        }
    }

    fn min_data_points(&self) -> usize {
        (self.range_lookback + self.sweep_window)
            .max(self.swing_lookback + 1)
            .max(self.volume_lookback + 1)
            .max(self.order_block_window)
            .max(self.fvg_window)
    }

    fn evaluate(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> EngineResult<Option<Signal>> {
        require_warmup(candles, self.min_data_points())?;
        let ctx = SignalContext::new("smart_money", symbol, timeframe, candles)?;
        let price = ctx.price();

        let volume_ratio = require(
            indicators::volume_ratio(&indicators::volumes(candles), self.volume_lookback),
            "volume_ratio",
        )?;
        if volume_ratio < self.volume_multiplier {
            return Ok(None);
        }

        let Some(sweep) = detect_liquidity_sweep(candles, self.range_lookback, self.sweep_window)
        else {
            return Ok(None);
        };
        let bias = sweep.bias;
        let Some(block) = detect_order_block(
            candles,
            self.order_block_window,
            self.order_block_body_multiplier,
            bias,
        ) else {
            return Ok(None);
        };
        let Some(structure_level) =
            detect_change_of_character(candles, self.swing_lookback, self.swing_strength, bias)
        else {
            return Ok(None);
        };

        let stop_loss = match bias {
            Bias::Bullish => block.low * (1.0 - self.stop_buffer),
            Bias::Bearish => block.high * (1.0 + self.stop_buffer),
        };
        let stop_on_wrong_side = match bias {
            Bias::Bullish => stop_loss >= price,
            Bias::Bearish => stop_loss <= price,
        };
        if stop_on_wrong_side {
            return Ok(None);
        }

        let gap = detect_fair_value_gap(candles, self.fvg_window).filter(|g| g.bias == bias);
        let confidence = 70.0
            + if gap.is_some() { 10.0 } else { 0.0 }
            + ((volume_ratio - self.volume_multiplier) * 5.0).clamp(0.0, 15.0);
        if !meets_confidence_threshold(confidence, self.min_confidence) {
            return Ok(None);
        }

        let signal = ctx.signal(
            bias.action(),
            confidence,
            stop_loss,
            risk_reward_target(price, stop_loss, self.risk_reward),
            format!(
                "{} liquidity sweep of {:.4}, order block {:.4}-{:.4}, structure break at {:.4}, volume {:.2}x{}",
                bias.as_str(),
                sweep.level,
                block.low,
                block.high,
                structure_level,
                volume_ratio,
                if gap.is_some() { ", fair value gap" } else { "" }
            ),
        );
        let mut metadata = vec![
            ("sweepLevel", sweep.level),
            ("orderBlockHigh", block.high),
            ("orderBlockLow", block.low),
            ("structureLevel", structure_level),
            ("volumeRatio", volume_ratio),
        ];
        if let Some(gap) = gap {
            metadata.push(("fvgTop", gap.top));
            metadata.push(("fvgBottom", gap.bottom));
        }
        Ok(Some(with_metadata(signal, &metadata)))
    }
}
