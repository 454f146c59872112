use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::info;
use signal_engine::{
    commands::{
        backtest::{self, BacktestArgs},
        compare::{self, CompareArgs},
        consensus,
        generate_data::{self, lookback_start, GenerateDataArgs},
        parse_date, parse_parameters, strategies,
    },
    context::AppContext,
    models::Timeframe,
    report::DiagnosticsOptions,
};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CANDLE_FILE: &str = "data/candles.bin";

#[derive(Parser)]
#[command(name = "signal-engine")]
#[command(about = "Crypto strategy signals, consensus and backtesting")]
struct Cli {
    /// JSON settings file; values override environment variables
    #[arg(long, global = true, value_name = "PATH")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the registered strategies
    Strategies {
        #[arg(long)]
        json: bool,
    },
    /// Write a seeded synthetic candle snapshot
    GenerateData {
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
        /// Comma separated symbols
        #[arg(long, value_delimiter = ',', default_value = "BTCUSDT,ETHUSDT")]
        symbols: Vec<String>,
        #[arg(long, default_value = "1h")]
        timeframe: Timeframe,
        /// Number of candles per symbol
        #[arg(long, default_value_t = 2_000)]
        count: usize,
        /// First open time (YYYY-MM-DD or RFC 3339); defaults to `count` candles before now
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        start_price: Option<f64>,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Backtest one strategy over a stored series
    Backtest {
        strategy: String,
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value = "1h")]
        timeframe: Timeframe,
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(long, default_value_t = 10_000.0)]
        capital: f64,
        #[arg(long)]
        fee_rate: Option<f64>,
        #[arg(long)]
        slippage_rate: Option<f64>,
        /// Strategy parameter as key=value; repeatable
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        /// Fail the run if it takes longer than this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
        #[arg(long)]
        monte_carlo: bool,
        #[arg(long)]
        walk_forward: bool,
        /// Seed for reproducible Monte Carlo paths
        #[arg(long)]
        seed: Option<u64>,
        /// Write the full report as JSON
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Aggregate all strategies on the latest candles of a series
    Consensus {
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value = "1h")]
        timeframe: Timeframe,
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Backtest every strategy on the same series and rank by Sharpe
    Compare {
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value = "1h")]
        timeframe: Timeframe,
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(long, default_value_t = 10_000.0)]
        capital: f64,
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli { settings, command } = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app = AppContext::initialize(settings.as_deref()).await?;
    info!("Starting signal engine. Not financial advice.");

    match command {
        Commands::Strategies { json } => {
            strategies::run(&app, json).await?;
        }
        Commands::GenerateData {
            output,
            symbols,
            timeframe,
            count,
            start,
            start_price,
            seed,
        } => {
            let start = match start {
                Some(value) => parse_date(&value)?,
                None => lookback_start(Utc::now(), timeframe, count)?,
            };
            generate_data::run(
                &app,
                GenerateDataArgs {
                    output: resolve_candle_path(output),
                    symbols,
                    timeframe,
                    start,
                    count,
                    start_price,
                    seed,
                },
            )
            .await?;
        }
        Commands::Backtest {
            strategy,
            symbol,
            timeframe,
            data_file,
            start,
            end,
            capital,
            fee_rate,
            slippage_rate,
            params,
            timeout_secs,
            monte_carlo,
            walk_forward,
            seed,
            output,
        } => {
            backtest::run(
                &app,
                BacktestArgs {
                    data_file: resolve_candle_path(data_file),
                    strategy_id: strategy,
                    symbol,
                    timeframe,
                    start: start.as_deref().map(parse_date).transpose()?,
                    end: end.as_deref().map(parse_date).transpose()?,
                    initial_capital: capital,
                    fee_rate,
                    slippage_rate,
                    parameters: parse_parameters(&params)?,
                    timeout: timeout_secs.map(Duration::from_secs),
                    diagnostics: DiagnosticsOptions {
                        monte_carlo,
                        walk_forward,
                        seed,
                    },
                    output,
                },
            )
            .await?;
        }
        Commands::Consensus {
            symbol,
            timeframe,
            data_file,
            params,
            json,
        } => {
            consensus::run(
                &app,
                &resolve_candle_path(data_file),
                &symbol,
                timeframe,
                &parse_parameters(&params)?,
                json,
            )
            .await?;
        }
        Commands::Compare {
            symbol,
            timeframe,
            data_file,
            start,
            end,
            capital,
            params,
        } => {
            compare::run(
                &app,
                CompareArgs {
                    data_file: resolve_candle_path(data_file),
                    symbol,
                    timeframe,
                    start: start.as_deref().map(parse_date).transpose()?,
                    end: end.as_deref().map(parse_date).transpose()?,
                    initial_capital: capital,
                    parameters: parse_parameters(&params)?,
                },
            )
            .await?;
        }
    }

    Ok(())
}

fn resolve_candle_path(cli_value: Option<PathBuf>) -> PathBuf {
    cli_value.unwrap_or_else(|| PathBuf::from(DEFAULT_CANDLE_FILE))
}

