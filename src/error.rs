use crate::models::{RunStatus, Timeframe};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum EngineError {
    #[error("no historical data for {symbol} {timeframe} in the requested range")]
    NoHistoricalData { symbol: String, timeframe: Timeframe },

    #[error("unknown strategy '{0}'")]
    StrategyNotFound(String),

    #[error("insufficient warm-up data: need {required} candles, have {available}")]
    InsufficientWarmupData { required: usize, available: usize },

    #[error("indicator {0} unavailable")]
    IndicatorUnavailable(String),

    #[error("backtest exceeded its {limit_ms} ms time limit")]
    Timeout { limit_ms: u64 },

    #[error("backtest cancelled")]
    Cancelled,

    #[error("invalid backtest config: {0}")]
    InvalidConfig(String),

    #[error("invalid candle data: {0}")]
    InvalidCandle(String),

    #[error("invalid run status transition from {from} to {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("candle store error: {0}")]
    Store(String),

    #[error("backtest aborted: {0}")]
    Aborted(String),
}

impl EngineError {
    /// Errors that mean "this evaluator has nothing to say yet" rather than a failure.
    pub fn is_no_signal(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientWarmupData { .. } | EngineError::IndicatorUnavailable(_)
        )
    }

    pub fn indicator(name: &str) -> Self {
        EngineError::IndicatorUnavailable(name.to_string())
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
