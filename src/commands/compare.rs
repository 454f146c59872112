use crate::commands::resolve_range;
use crate::context::AppContext;
use crate::engine::RunOptions;
use crate::models::{BacktestConfig, RunStatus, Timeframe};
use crate::strategy::StrategyId;
use anyhow::Result;
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct CompareArgs {
    pub data_file: PathBuf,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub initial_capital: f64,
    pub parameters: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonRow {
    pub strategy_id: String,
    pub status: Option<RunStatus>,
    pub total_trades: usize,
    pub win_rate: f64,
    pub total_return_percent: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown_percent: f64,
    pub error: Option<String>,
}

fn sharpe_order(a: &ComparisonRow, b: &ComparisonRow) -> Ordering {
    let completed = |row: &ComparisonRow| row.status == Some(RunStatus::Completed);
    completed(b)
        .cmp(&completed(a))
        .then_with(|| b.sharpe_ratio.total_cmp(&a.sharpe_ratio))
        .then_with(|| a.strategy_id.cmp(&b.strategy_id))
}

/// Backtests every registered strategy over the same series and ranks them by Sharpe.
pub async fn run(app: &AppContext, args: CompareArgs) -> Result<Vec<ComparisonRow>> {
    let store = app.load_store(&args.data_file).await?;
    let range = resolve_range(
        store.as_ref(),
        &args.symbol,
        args.timeframe,
        args.start,
        args.end,
    )?;
    let settings = app.settings().clone();
    let configs: Vec<BacktestConfig> = StrategyId::ALL
        .iter()
        .map(|id| BacktestConfig {
            strategy_id: id.as_str().to_string(),
            parameters: args.parameters.clone(),
            symbol: args.symbol.clone(),
            timeframe: args.timeframe,
            start_date: range.start,
            end_date: range.end,
            initial_capital: args.initial_capital,
            fee_rate: settings.trade_fee_rate,
            slippage_rate: settings.trade_slippage_rate,
        })
        .collect();
    let ids: Vec<String> = configs.iter().map(|c| c.strategy_id.clone()).collect();

    let pb = ProgressBar::new(configs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    let scheduler = app.scheduler(store);
    let bar = pb.clone();
    let results = tokio::task::spawn_blocking(move || {
        scheduler.run_batch(configs, RunOptions::default(), |run| {
            bar.set_message(run.config.strategy_id.clone());
            bar.inc(1);
        })
    })
    .await?;
    pb.finish_and_clear();

    let mut rows: Vec<ComparisonRow> = ids
        .into_iter()
        .zip(results)
        .map(|(strategy_id, result)| match result {
            Ok(run) => {
                let metrics = run.metrics.clone().unwrap_or_default();
                ComparisonRow {
                    strategy_id,
                    status: Some(run.status),
                    total_trades: metrics.total_trades,
                    win_rate: metrics.win_rate,
                    total_return_percent: metrics.total_return_percent,
                    sharpe_ratio: metrics.sharpe_ratio,
                    max_drawdown_percent: metrics.max_drawdown_percent,
                    error: run.error.as_ref().map(|e| e.to_string()),
                }
            }
            Err(err) => ComparisonRow {
                strategy_id,
                status: None,
                total_trades: 0,
                win_rate: 0.0,
                total_return_percent: 0.0,
                sharpe_ratio: 0.0,
                max_drawdown_percent: 0.0,
                error: Some(err.to_string()),
            },
        })
        .collect();
    rows.sort_by(sharpe_order);

    info!(
        "Compared {} strategies on {} {}",
        rows.len(),
        args.symbol,
        args.timeframe
    );
    println!(
        "{:<4} {:<12} {:>7} {:>8} {:>10} {:>8} {:>9}",
        "rank", "strategy", "trades", "win %", "return %", "sharpe", "max dd %"
    );
    for (rank, row) in rows.iter().enumerate() {
        match &row.error {
            Some(error) => println!("{:<4} {:<12} {}", rank + 1, row.strategy_id, error),
            None => println!(
                "{:<4} {:<12} {:>7} {:>8.1} {:>10.2} {:>8.3} {:>9.2}",
                rank + 1,
                row.strategy_id,
                row.total_trades,
                row.win_rate,
                row.total_return_percent,
                row.sharpe_ratio,
                row.max_drawdown_percent
            ),
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, status: Option<RunStatus>, sharpe: f64) -> ComparisonRow {
        ComparisonRow {
            strategy_id: id.to_string(),
            status,
            total_trades: 0,
            win_rate: 0.0,
            total_return_percent: 0.0,
            sharpe_ratio: sharpe,
            max_drawdown_percent: 0.0,
            error: None,
        }
    }

    #[test]
    fn completed_runs_rank_first_by_sharpe() {
        let mut rows = vec![
            row("a", Some(RunStatus::Failed), 9.0),
            row("b", Some(RunStatus::Completed), 0.5),
            row("c", None, 0.0),
            row("d", Some(RunStatus::Completed), 1.5),
        ];
        rows.sort_by(sharpe_order);
        let order: Vec<&str> = rows.iter().map(|r| r.strategy_id.as_str()).collect();
        assert_eq!(order, vec!["d", "b", "a", "c"]);
    }
}
