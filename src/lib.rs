//! Strategy signals, multi-strategy consensus and single-asset backtesting
//! over OHLCV candle series.

pub mod backtester;
pub mod candle_store;
pub mod candle_utils;
pub mod commands;
pub mod config;
pub mod consensus;
pub mod context;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod models;
pub mod monte_carlo;
pub mod param_utils;
pub mod performance;
pub mod report;
pub mod run_status;
pub mod signals;
pub mod strategy;
pub mod strategy_utils;
pub mod synthetic;
pub mod walk_forward;
