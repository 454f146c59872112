use crate::commands::resolve_range;
use crate::context::AppContext;
use crate::engine::RunOptions;
use crate::models::{BacktestConfig, RunStatus, Timeframe};
use crate::report::{BacktestReport, DiagnosticsOptions};
use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct BacktestArgs {
    pub data_file: PathBuf,
    pub strategy_id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub initial_capital: f64,
    pub fee_rate: Option<f64>,
    pub slippage_rate: Option<f64>,
    pub parameters: HashMap<String, f64>,
    pub timeout: Option<Duration>,
    pub diagnostics: DiagnosticsOptions,
    pub output: Option<PathBuf>,
}

pub async fn run(app: &AppContext, args: BacktestArgs) -> Result<BacktestReport> {
    let store = app.load_store(&args.data_file).await?;
    let range = resolve_range(
        store.as_ref(),
        &args.symbol,
        args.timeframe,
        args.start,
        args.end,
    )?;
    let settings = app.settings();
    let config = BacktestConfig {
        strategy_id: args.strategy_id.clone(),
        parameters: args.parameters.clone(),
        symbol: args.symbol.clone(),
        timeframe: args.timeframe,
        start_date: range.start,
        end_date: range.end,
        initial_capital: args.initial_capital,
        fee_rate: args.fee_rate.unwrap_or(settings.trade_fee_rate),
        slippage_rate: args.slippage_rate.unwrap_or(settings.trade_slippage_rate),
    };

    let scheduler = app.scheduler(store);
    let job = scheduler.submit(
        config,
        RunOptions {
            timeout: args.timeout,
        },
    )?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let mut interrupted = false;
    let mut last_decile = 0usize;
    while !job.is_finished() {
        tokio::select! {
            _ = &mut ctrl_c, if !interrupted => {
                warn!("Interrupt received; cancelling backtest {}", job.id());
                interrupted = true;
                job.cancel();
            }
            _ = ticker.tick() => {
                let snapshot = job.progress();
                let decile = (snapshot.progress() * 10.0).floor() as usize;
                if decile > last_decile && decile < 10 {
                    last_decile = decile;
                    info!(
                        "Backtest {}: {}/{} candles",
                        job.id(),
                        snapshot.processed_steps,
                        snapshot.total_steps
                    );
                }
            }
        }
    }

    let run = tokio::task::spawn_blocking(move || job.join()).await??;
    let diagnostics_settings = settings.clone();
    let diagnostics = args.diagnostics;
    let report = tokio::task::spawn_blocking(move || {
        BacktestReport::build(run, &diagnostics_settings, diagnostics)
    })
    .await?;
    print_summary(&report);

    if let Some(output) = &args.output {
        report.write_json(output)?;
        info!("Backtest report written to {}", output.display());
    }
    Ok(report)
}

fn print_summary(report: &BacktestReport) {
    let run = &report.run;
    println!(
        "{} {} {} [{}]",
        run.config.strategy_id, run.config.symbol, run.config.timeframe, run.status
    );
    if run.status == RunStatus::Failed {
        if let Some(error) = &run.error {
            println!("  error: {}", error);
        }
        println!(
            "  {} candles processed, {} fills before stopping",
            run.equity_curve.len(),
            run.trades.len()
        );
        return;
    }

    if let Some(metrics) = &run.metrics {
        println!(
            "  trades {}  win rate {:.1}%  return {:.2}%  max drawdown {:.2}%",
            metrics.total_trades,
            metrics.win_rate,
            metrics.total_return_percent,
            metrics.max_drawdown_percent
        );
        println!(
            "  sharpe {:.3}  sortino {:.3}  calmar {:.3}  profit factor {:.2}  fees {:.2}",
            metrics.sharpe_ratio,
            metrics.sortino_ratio,
            metrics.calmar_ratio,
            metrics.profit_factor,
            metrics.total_fees
        );
    }
    if let Some(mc) = &report.monte_carlo {
        println!(
            "  monte carlo: p5 {:.2}  median {:.2}  p95 {:.2}  ruin {:.2}%",
            mc.percentile_5,
            mc.median,
            mc.percentile_95,
            mc.ruin_probability * 100.0
        );
    }
    if let Some(wf) = &report.walk_forward {
        println!(
            "  walk-forward: {} in / {} out  robustness {:.3}  efficiency {:.3}",
            wf.in_sample_trades, wf.out_sample_trades, wf.robustness_ratio, wf.efficiency
        );
    }
}
