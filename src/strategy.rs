use crate::error::{EngineError, EngineResult};
use crate::models::{Candle, Signal, StrategyInfo, Timeframe};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub trait Strategy {
    fn info(&self) -> StrategyInfo;

    /// Candles needed before the evaluator can say anything.
    fn min_data_points(&self) -> usize;

    /// Evaluates the last candle of `candles`. `Ok(None)` means no signal;
    /// warm-up and indicator shortages come back as no-signal errors.
    fn evaluate(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> EngineResult<Option<Signal>>;
}

#[path = "strategies/rsi_volume.rs"]
pub mod rsi_volume;

pub use rsi_volume::RsiVolumeStrategy;

#[path = "strategies/ema_ribbon.rs"]
pub mod ema_ribbon;

pub use ema_ribbon::EmaRibbonStrategy;

#[path = "strategies/macd_rsi.rs"]
pub mod macd_rsi;

pub use macd_rsi::MacdRsiStrategy;

#[path = "strategies/smart_money.rs"]
pub mod smart_money;

pub use smart_money::SmartMoneyStrategy;

#[path = "strategies/order_flow.rs"]
pub mod order_flow;

pub use order_flow::OrderFlowStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyId {
    RsiVolume,
    EmaRibbon,
    MacdRsi,
    SmartMoney,
    OrderFlow,
}

impl StrategyId {
    pub const ALL: [StrategyId; 5] = [
        StrategyId::RsiVolume,
        StrategyId::EmaRibbon,
        StrategyId::MacdRsi,
        StrategyId::SmartMoney,
        StrategyId::OrderFlow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyId::RsiVolume => "rsi_volume",
            StrategyId::EmaRibbon => "ema_ribbon",
            StrategyId::MacdRsi => "macd_rsi",
            StrategyId::SmartMoney => "smart_money",
            StrategyId::OrderFlow => "order_flow",
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        StrategyId::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == normalized)
            .ok_or_else(|| EngineError::StrategyNotFound(s.trim().to_string()))
    }
}

/// The fixed set of evaluators, dispatched by variant.
#[derive(Debug, Clone)]
pub enum Evaluator {
    RsiVolume(RsiVolumeStrategy),
    EmaRibbon(EmaRibbonStrategy),
    MacdRsi(MacdRsiStrategy),
    SmartMoney(SmartMoneyStrategy),
    OrderFlow(OrderFlowStrategy),
}

impl Evaluator {
    pub fn new(id: StrategyId, parameters: &HashMap<String, f64>) -> Self {
        match id {
            StrategyId::RsiVolume => Evaluator::RsiVolume(RsiVolumeStrategy::new(parameters)),
            StrategyId::EmaRibbon => Evaluator::EmaRibbon(EmaRibbonStrategy::new(parameters)),
            StrategyId::MacdRsi => Evaluator::MacdRsi(MacdRsiStrategy::new(parameters)),
            StrategyId::SmartMoney => Evaluator::SmartMoney(SmartMoneyStrategy::new(parameters)),
            StrategyId::OrderFlow => Evaluator::OrderFlow(OrderFlowStrategy::new(parameters)),
        }
    }

    pub fn id(&self) -> StrategyId {
        match self {
            Evaluator::RsiVolume(_) => StrategyId::RsiVolume,
            Evaluator::EmaRibbon(_) => StrategyId::EmaRibbon,
            Evaluator::MacdRsi(_) => StrategyId::MacdRsi,
            Evaluator::SmartMoney(_) => StrategyId::SmartMoney,
            Evaluator::OrderFlow(_) => StrategyId::OrderFlow,
        }
    }

    fn as_strategy(&self) -> &dyn Strategy {
        match self {
            Evaluator::RsiVolume(s) => s,
            Evaluator::EmaRibbon(s) => s,
            Evaluator::MacdRsi(s) => s,
            Evaluator::SmartMoney(s) => s,
            Evaluator::OrderFlow(s) => s,
        }
    }
}

impl Strategy for Evaluator {
    fn info(&self) -> StrategyInfo {
        self.as_strategy().info()
    }

    fn min_data_points(&self) -> usize {
        self.as_strategy().min_data_points()
    }

    fn evaluate(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> EngineResult<Option<Signal>> {
        self.as_strategy().evaluate(symbol, timeframe, candles)
    }
}

pub fn create_strategy(
    strategy_id: &str,
    parameters: &HashMap<String, f64>,
) -> EngineResult<Evaluator> {
    let id: StrategyId = strategy_id.parse()?;
    Ok(Evaluator::new(id, parameters))
}

/// One evaluator per registered strategy, all sharing `parameters`.
pub fn all_strategies(parameters: &HashMap<String, f64>) -> Vec<Evaluator> {
    StrategyId::ALL
        .iter()
        .map(|id| Evaluator::new(*id, parameters))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_resolves_every_registered_id() {
        for id in StrategyId::ALL {
            let evaluator = create_strategy(id.as_str(), &HashMap::new()).unwrap();
            assert_eq!(evaluator.id(), id);
            assert_eq!(evaluator.info().id, id.as_str());
            assert!(evaluator.min_data_points() > 1);
        }
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let err = create_strategy("lightning", &HashMap::new()).unwrap_err();
        assert_eq!(err, EngineError::StrategyNotFound("lightning".to_string()));
        assert!(create_strategy(" EMA_RIBBON ", &HashMap::new()).is_ok());
    }

    #[test]
    fn evaluators_report_warmup_shortage_as_no_signal() {
        for evaluator in all_strategies(&HashMap::new()) {
            let err = evaluator
                .evaluate("BTCUSDT", Timeframe::H1, &[])
                .unwrap_err();
            assert!(err.is_no_signal(), "{} returned {err}", evaluator.id());
        }
    }
}
