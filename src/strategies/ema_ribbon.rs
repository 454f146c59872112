use crate::error::EngineResult;
use crate::indicators;
use crate::models::*;
use crate::param_utils::{get_param_f64, get_param_usize_at_least};
use crate::strategy_utils::{
    meets_confidence_threshold, require, require_warmup, risk_reward_target, with_metadata, Bias,
    SignalContext,
};
use std::collections::HashMap;

const DEFAULT_PERIODS: [usize; 5] = [5, 10, 20, 50, 200];
const PERIOD_KEYS: [&str; 5] = [
    "ema1Period",
    "ema2Period",
    "ema3Period",
    "ema4Period",
    "ema5Period",
];

/// Trend following on a five-EMA ribbon. Periods are kept sorted fastest first.
#[derive(Debug, Clone)]
pub struct EmaRibbonStrategy {
    periods: [usize; 5],
    /// Index into `periods` of the EMA used as the stop.
    stop_index: usize,
    risk_reward: f64,
    base_confidence: f64,
    spread_weight: f64,
    min_confidence: f64,
}

impl EmaRibbonStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        let mut periods = DEFAULT_PERIODS;
        for (slot, key) in periods.iter_mut().zip(PERIOD_KEYS) {
            *slot = get_param_usize_at_least(parameters, key, *slot, 1);
        }
        periods.sort_unstable();
        Self {
            periods,
            stop_index: 3,
            risk_reward: get_param_f64(parameters, "riskReward", 3.0),
            base_confidence: get_param_f64(parameters, "baseConfidence", 60.0),
            spread_weight: get_param_f64(parameters, "spreadWeight", 2.0),
            min_confidence: get_param_f64(parameters, "minConfidence", 0.0),
        }
    }

    fn alignment(ribbon: &[f64; 5], price: f64) -> Option<Bias> {
        let rising = ribbon.windows(2).all(|w| w[0] > w[1]);
        let falling = ribbon.windows(2).all(|w| w[0] < w[1]);
        if rising && price > ribbon[0] {
            Some(Bias::Bullish)
        } else if falling && price < ribbon[0] {
            Some(Bias::Bearish)
        } else {
            None
        }
    }
}

impl super::Strategy for EmaRibbonStrategy {
    fn info(&self) -> StrategyInfo {
        StrategyInfo {
            id: "ema_ribbon",
            name: "EMA Ribbon",
            description: "Trend following on full EMA 5/10/20/50/200 ribbon alignment",
            expected_win_rate: (45.0, 55.0),
        }
    }

    fn min_data_points(&self) -> usize {
        self.periods[4]
    }

    fn evaluate(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> EngineResult<Option<Signal>> {
        require_warmup(candles, self.min_data_points())?;
        let ctx = SignalContext::new("ema_ribbon", symbol, timeframe, candles)?;
        let price = ctx.price();
        let closes = indicators::closes(candles);

        let mut ribbon = [0.0; 5];
        for (value, period) in ribbon.iter_mut().zip(self.periods) {
            *value = require(indicators::latest_ema(&closes, period), "ema")?;
        }
        let stop_ema = ribbon[self.stop_index];
        let metadata = [
            ("ema1", ribbon[0]),
            ("ema2", ribbon[1]),
            ("ema3", ribbon[2]),
            ("ema4", ribbon[3]),
            ("ema5", ribbon[4]),
        ];

        let Some(bias) = Self::alignment(&ribbon, price) else {
            let signal = ctx.signal(
                SignalAction::Exit,
                50.0,
                stop_ema,
                price,
                "EMA ribbon alignment is mixed".to_string(),
            );
            return Ok(Some(with_metadata(signal, &metadata)));
        };

        let spread_percent = (ribbon[0] - ribbon[4]).abs() / ribbon[4] * 100.0;
        let confidence = (self.base_confidence + spread_percent * self.spread_weight).min(95.0);
        if !meets_confidence_threshold(confidence, self.min_confidence) {
            return Ok(None);
        }

        let signal = ctx.signal(
            bias.action(),
            confidence,
            stop_ema,
            risk_reward_target(price, stop_ema, self.risk_reward),
            format!(
                "EMA ribbon {} aligned with price confirmation, spread {:.2}%",
                bias.as_str(),
                spread_percent
            ),
        );
        Ok(Some(with_metadata(signal, &metadata)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Strategy;
    use chrono::{Duration, TimeZone, Utc};

    fn series(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                symbol: "ETHUSDT".to_string(),
                timeframe: Timeframe::H4,
                open_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                    + Duration::hours(4 * i as i64),
                open: close,
                high: close + 0.2,
                low: close - 0.2,
                close,
                volume: 10.0,
            })
            .collect()
    }

    #[test]
    fn rising_series_aligns_bullish() {
        let closes: Vec<f64> = (0..250).map(|i| 100.0 + 0.5 * i as f64).collect();
        let strategy = EmaRibbonStrategy::new(&HashMap::new());
        let signal = strategy
            .evaluate("ETHUSDT", Timeframe::H4, &series(&closes))
            .unwrap()
            .expect("signal");
        assert_eq!(signal.action, SignalAction::Buy);
        assert_eq!(signal.stop_loss, signal.metadata["ema4"]);
        let risk = signal.price - signal.stop_loss;
        assert!(risk > 0.0);
        assert!((signal.take_profit - (signal.price + 3.0 * risk)).abs() < 1e-9);
        assert!(signal.confidence >= 60.0 && signal.confidence <= 95.0);
    }

    #[test]
    fn falling_series_aligns_bearish() {
        let closes: Vec<f64> = (0..250).map(|i| 300.0 - 0.5 * i as f64).collect();
        let strategy = EmaRibbonStrategy::new(&HashMap::new());
        let signal = strategy
            .evaluate("ETHUSDT", Timeframe::H4, &series(&closes))
            .unwrap()
            .expect("signal");
        assert_eq!(signal.action, SignalAction::Sell);
        assert!(signal.stop_loss > signal.price);
        assert!(signal.take_profit < signal.price);
    }

    #[test]
    fn sharp_reversal_flags_exit() {
        let mut closes: Vec<f64> = (0..240).map(|i| 100.0 + 0.5 * i as f64).collect();
        let top = *closes.last().unwrap();
        closes.extend((1..=10).map(|i| top - 3.0 * i as f64));
        let strategy = EmaRibbonStrategy::new(&HashMap::new());
        let signal = strategy
            .evaluate("ETHUSDT", Timeframe::H4, &series(&closes))
            .unwrap()
            .expect("signal");
        assert_eq!(signal.action, SignalAction::Exit);
    }

    #[test]
    fn custom_periods_are_sorted() {
        let params: HashMap<String, f64> = [("ema1Period".to_string(), 300.0)].into();
        let strategy = EmaRibbonStrategy::new(&params);
        assert_eq!(strategy.min_data_points(), 300);
    }
}
