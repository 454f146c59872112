use crate::error::EngineResult;
use crate::indicators;
use crate::models::*;
use crate::param_utils::{get_param_f64, get_param_f64_clamped, get_param_usize_at_least};
use crate::strategy_utils::{
    meets_confidence_threshold, require, require_warmup, with_metadata, SignalContext,
};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct MacdRsiStrategy {
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
    rsi_period: usize,
    buy_rsi_min: f64,
    buy_rsi_max: f64,
    sell_rsi_min: f64,
    sell_rsi_max: f64,
    stop_loss_ratio: f64,
    take_profit_ratio: f64,
    min_confidence: f64,
}

/// Minimum RSI width of a buy or sell band.
const MIN_RSI_BAND: f64 = 1.0;

/// Reads an RSI band kept inside 0..=100 with `max - min >= MIN_RSI_BAND`.
fn rsi_band(
    parameters: &HashMap<String, f64>,
    keys: (&str, &str),
    defaults: (f64, f64),
) -> (f64, f64) {
    let min = get_param_f64_clamped(parameters, keys.0, defaults.0, 0.0, 100.0 - MIN_RSI_BAND);
    let max = get_param_f64_clamped(parameters, keys.1, defaults.1, 0.0, 100.0);
    (min, max.max(min + MIN_RSI_BAND))
}

impl MacdRsiStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        let fast_period = get_param_usize_at_least(parameters, "fastPeriod", 12, 1);
        let slow_period =
            get_param_usize_at_least(parameters, "slowPeriod", 26, 2).max(fast_period + 1);
        let (buy_rsi_min, buy_rsi_max) =
            rsi_band(parameters, ("buyRsiMin", "buyRsiMax"), (30.0, 50.0));
        let (sell_rsi_min, sell_rsi_max) =
            rsi_band(parameters, ("sellRsiMin", "sellRsiMax"), (50.0, 70.0));
        Self {
            fast_period,
            slow_period,
            signal_period: get_param_usize_at_least(parameters, "signalPeriod", 9, 1),
            rsi_period: get_param_usize_at_least(parameters, "rsiPeriod", 14, 2),
            buy_rsi_min,
            buy_rsi_max,
            sell_rsi_min,
            sell_rsi_max,
            stop_loss_ratio: get_param_f64_clamped(parameters, "stopLossRatio", 0.025, 0.001, 0.5),
            take_profit_ratio: get_param_f64_clamped(
                parameters,
                "takeProfitRatio",
                0.05,
                0.001,
                5.0,
            ),
            min_confidence: get_param_f64(parameters, "minConfidence", 0.0),
        }
    }

    /// Up to 20 points for histogram acceleration (in basis points of price),
    /// up to 20 for how far RSI sits from the chase end of its band, 10 for a fresh cross.
    fn confidence(&self, macd: &indicators::MacdReading, price: f64, rsi_room: f64) -> f64 {
        let acceleration =
            ((macd.histogram - macd.previous_histogram).abs() / price * 10_000.0).min(20.0);
        let crossed = macd.histogram.signum() != macd.previous_histogram.signum();
        55.0 + acceleration + rsi_room.clamp(0.0, 1.0) * 20.0 + if crossed { 10.0 } else { 0.0 }
    }
}

impl super::Strategy for MacdRsiStrategy {
    fn info(&self) -> StrategyInfo {
        StrategyInfo {
            id: "macd_rsi",
            name: "MACD + RSI",
            description: "MACD histogram momentum filtered by an RSI band that avoids chasing",
            expected_win_rate: (50.0, 60.0),
        }
    }

    fn min_data_points(&self) -> usize {
        (self.slow_period + self.signal_period).max(self.rsi_period + 1)
    }

    fn evaluate(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> EngineResult<Option<Signal>> {
        require_warmup(candles, self.min_data_points())?;
        let ctx = SignalContext::new("macd_rsi", symbol, timeframe, candles)?;
        let price = ctx.price();
        let closes = indicators::closes(candles);

        let macd = require(
            indicators::latest_macd(
                &closes,
                self.fast_period,
                self.slow_period,
                self.signal_period,
            ),
            "macd",
        )?;
        let rsi = require(indicators::latest_rsi(&closes, self.rsi_period), "rsi")?;

        let bullish = macd.histogram > 0.0 && macd.histogram > macd.previous_histogram;
        let bearish = macd.histogram < 0.0 && macd.histogram < macd.previous_histogram;

        let (action, confidence, stop_loss, take_profit) =
            if bullish && rsi >= self.buy_rsi_min && rsi <= self.buy_rsi_max {
                let room = (self.buy_rsi_max - rsi) / (self.buy_rsi_max - self.buy_rsi_min);
                (
                    SignalAction::Buy,
                    self.confidence(&macd, price, room),
                    price * (1.0 - self.stop_loss_ratio),
                    price * (1.0 + self.take_profit_ratio),
                )
            } else if bearish && rsi >= self.sell_rsi_min && rsi <= self.sell_rsi_max {
                let room = (rsi - self.sell_rsi_min) / (self.sell_rsi_max - self.sell_rsi_min);
                (
                    SignalAction::Sell,
                    self.confidence(&macd, price, room),
                    price * (1.0 + self.stop_loss_ratio),
                    price * (1.0 - self.take_profit_ratio),
                )
            } else {
                return Ok(None);
            };

        if !meets_confidence_threshold(confidence, self.min_confidence) {
            return Ok(None);
        }

        let signal = ctx.signal(
            action,
            confidence,
            stop_loss,
            take_profit,
            format!(
                "MACD histogram {:.4} ({} from {:.4}) with RSI {:.1}",
                macd.histogram,
                if bullish { "rising" } else { "falling" },
                macd.previous_histogram,
                rsi
            ),
        );
        Ok(Some(with_metadata(
            signal,
            &[
                ("macd", macd.macd),
                ("macdSignal", macd.signal),
                ("histogram", macd.histogram),
                ("rsi", rsi),
            ],
        )))
    }
}
