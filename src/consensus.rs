use crate::candle_store::CandleStore;
use crate::error::{EngineError, EngineResult};
use crate::models::*;
use crate::signals::{evaluate_signal, live_window};
use crate::strategy::{all_strategies, Evaluator, Strategy};
use log::{debug, warn};
use rayon::prelude::*;
use std::collections::HashMap;

/// Direction from vote counts over `strategy_count` evaluators.
pub fn resolve_direction(
    buy_count: usize,
    sell_count: usize,
    strategy_count: usize,
) -> ConsensusDirection {
    if strategy_count == 0 {
        return ConsensusDirection::Neutral;
    }
    if buy_count == strategy_count {
        ConsensusDirection::StrongBuy
    } else if sell_count == strategy_count {
        ConsensusDirection::StrongSell
    } else if buy_count * 2 > strategy_count {
        ConsensusDirection::Buy
    } else if sell_count * 2 > strategy_count {
        ConsensusDirection::Sell
    } else {
        ConsensusDirection::Neutral
    }
}

enum Vote {
    Signal(Signal),
    Silent,
    Abstain(StrategyAbstention),
}

/// Runs every evaluator over the same candles and folds the votes.
pub struct ConsensusAggregator<S = Evaluator> {
    evaluators: Vec<(String, S)>,
    lookback: usize,
}

impl ConsensusAggregator<Evaluator> {
    /// All registered strategies with shared parameters.
    pub fn with_all_strategies(parameters: &HashMap<String, f64>, lookback: usize) -> Self {
        let evaluators = all_strategies(parameters)
            .into_iter()
            .map(|e| (e.id().as_str().to_string(), e))
            .collect();
        Self {
            evaluators,
            lookback,
        }
    }
}

impl<S: Strategy + Sync> ConsensusAggregator<S> {
    pub fn new(evaluators: Vec<S>, lookback: usize) -> Self {
        let evaluators = evaluators
            .into_iter()
            .map(|e| (e.info().id.to_string(), e))
            .collect();
        Self {
            evaluators,
            lookback,
        }
    }

    pub fn strategy_count(&self) -> usize {
        self.evaluators.len()
    }

    /// Candles to load so every evaluator is past its warm-up.
    pub fn window(&self) -> usize {
        self.evaluators
            .iter()
            .map(|(_, e)| live_window(e, self.lookback))
            .max()
            .unwrap_or(self.lookback)
    }

    /// Pulls the newest window from the store and aggregates.
    pub fn consensus(
        &self,
        store: &dyn CandleStore,
        symbol: &str,
        timeframe: Timeframe,
    ) -> EngineResult<ConsensusResult> {
        let candles = store.latest_candles(symbol, timeframe, self.window())?;
        if candles.is_empty() {
            return Err(EngineError::NoHistoricalData {
                symbol: symbol.to_string(),
                timeframe,
            });
        }
        Ok(self.evaluate(symbol, timeframe, &candles))
    }

    /// Aggregates over an in-memory snapshot. Evaluator failures become abstentions
    /// and still count toward the strategy total.
    pub fn evaluate(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> ConsensusResult {
        let votes: Vec<Vote> = self
            .evaluators
            .par_iter()
            .map(|(id, evaluator)| {
                match evaluate_signal(evaluator, symbol, timeframe, candles) {
                    Ok(Some(signal)) => Vote::Signal(signal),
                    Ok(None) => Vote::Silent,
                    Err(error) => Vote::Abstain(StrategyAbstention {
                        strategy_id: id.clone(),
                        error,
                    }),
                }
            })
            .collect();

        let mut signals = Vec::new();
        let mut abstentions = Vec::new();
        for vote in votes {
            match vote {
                Vote::Signal(signal) => signals.push(signal),
                Vote::Silent => {}
                Vote::Abstain(abstention) => {
                    warn!(
                        "Strategy {} abstained on {} {}: {}",
                        abstention.strategy_id, symbol, timeframe, abstention.error
                    );
                    abstentions.push(abstention);
                }
            }
        }

        let strategy_count = self.evaluators.len();
        let buy_count = signals
            .iter()
            .filter(|s| s.action == SignalAction::Buy)
            .count();
        let sell_count = signals
            .iter()
            .filter(|s| s.action == SignalAction::Sell)
            .count();
        let directional: Vec<f64> = signals
            .iter()
            .filter(|s| matches!(s.action, SignalAction::Buy | SignalAction::Sell))
            .map(|s| s.confidence)
            .collect();
        let confidence = if directional.is_empty() {
            0.0
        } else {
            directional.iter().sum::<f64>() / directional.len() as f64
        };
        let agreement = if strategy_count == 0 {
            0.0
        } else {
            buy_count.max(sell_count) as f64 / strategy_count as f64
        };
        let direction = resolve_direction(buy_count, sell_count, strategy_count);

        debug!(
            "Consensus {} {}: {} ({} buy / {} sell of {}, confidence {:.1})",
            symbol,
            timeframe,
            direction.as_str(),
            buy_count,
            sell_count,
            strategy_count,
            confidence
        );

        ConsensusResult {
            symbol: symbol.to_string(),
            timeframe,
            evaluated_at: candles.last().map(|c| c.open_time),
            signals,
            direction,
            confidence,
            agreement,
            buy_count,
            sell_count,
            strategy_count,
            abstentions,
        }
    }
}
