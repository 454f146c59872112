use crate::consensus::ConsensusAggregator;
use crate::context::AppContext;
use crate::models::{ConsensusResult, Timeframe};
use anyhow::Result;
use log::info;
use std::collections::HashMap;
use std::path::Path;

/// Evaluates every registered strategy on the newest candles of one series.
pub async fn run(
    app: &AppContext,
    data_file: &Path,
    symbol: &str,
    timeframe: Timeframe,
    parameters: &HashMap<String, f64>,
    as_json: bool,
) -> Result<ConsensusResult> {
    let store = app.load_store(data_file).await?;
    let aggregator =
        ConsensusAggregator::with_all_strategies(parameters, app.settings().consensus_lookback);
    let result = aggregator.consensus(store.as_ref(), symbol, timeframe)?;

    info!(
        "Consensus for {} {}: {} (agreement {:.0}%, confidence {:.1})",
        result.symbol,
        result.timeframe,
        result.direction.as_str(),
        result.agreement * 100.0,
        result.confidence
    );

    if as_json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "{} {} @ {}: {}  buy {} / sell {} of {}  confidence {:.1}",
            result.symbol,
            result.timeframe,
            result
                .evaluated_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "n/a".to_string()),
            result.direction.as_str(),
            result.buy_count,
            result.sell_count,
            result.strategy_count,
            result.confidence
        );
        for signal in &result.signals {
            println!(
                "  {:<12} {:<4} conf {:>5.1}  stop {:.4}  target {:.4}  {}",
                signal.strategy_id,
                signal.action.as_str(),
                signal.confidence,
                signal.stop_loss,
                signal.take_profit,
                signal.rationale
            );
        }
        for abstention in &result.abstentions {
            println!("  {:<12} abstained: {}", abstention.strategy_id, abstention.error);
        }
    }
    Ok(result)
}
