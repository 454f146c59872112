use crate::candle_store::CandleStore;
use crate::error::EngineResult;
use crate::models::{Candle, Signal, Timeframe};
use crate::strategy::Strategy;

/// Evaluates the last candle, folding warm-up and indicator shortages into `None`.
pub fn evaluate_signal<S: Strategy + ?Sized>(
    strategy: &S,
    symbol: &str,
    timeframe: Timeframe,
    candles: &[Candle],
) -> EngineResult<Option<Signal>> {
    match strategy.evaluate(symbol, timeframe, candles) {
        Ok(signal) => Ok(signal.filter(|s| s.confidence.is_finite() && s.price.is_finite())),
        Err(err) if err.is_no_signal() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Number of trailing candles to load for a live evaluation.
pub fn live_window<S: Strategy + ?Sized>(strategy: &S, lookback: usize) -> usize {
    lookback.max(strategy.min_data_points())
}

/// Evaluates the newest candle in the store.
pub fn evaluate_latest<S: Strategy + ?Sized>(
    strategy: &S,
    store: &dyn CandleStore,
    symbol: &str,
    timeframe: Timeframe,
    lookback: usize,
) -> EngineResult<Option<Signal>> {
    let candles = store.latest_candles(symbol, timeframe, live_window(strategy, lookback))?;
    evaluate_signal(strategy, symbol, timeframe, &candles)
}
