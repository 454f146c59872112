use crate::models::{BacktestMetrics, Trade};
use crate::performance::{MetricsParams, PerformanceCalculator};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkForwardResult {
    pub in_sample_ratio: f64,
    pub in_sample_trades: usize,
    pub out_sample_trades: usize,
    pub in_sample: BacktestMetrics,
    pub out_sample: BacktestMetrics,
    /// Out-of-sample Sharpe over in-sample Sharpe.
    pub robustness_ratio: f64,
    /// Out-of-sample return over in-sample return.
    pub efficiency: f64,
}

/// Index of the first out-of-sample trade.
pub fn split_index(trade_count: usize, in_sample_ratio: f64) -> usize {
    let ratio = in_sample_ratio.clamp(0.0, 1.0);
    ((trade_count as f64 * ratio + 1e-9).floor() as usize).min(trade_count)
}

fn ratio_or_zero(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 && denominator.is_finite() && numerator.is_finite() {
        numerator / denominator
    } else {
        0.0
    }
}

/// Splits realized trades chronologically and scores each half on its own.
pub fn walk_forward(
    trades: &[Trade],
    initial_capital: f64,
    in_sample_ratio: f64,
    params: &MetricsParams,
) -> WalkForwardResult {
    let mut closing: Vec<Trade> = trades.iter().filter(|t| t.is_closing()).cloned().collect();
    closing.sort_by_key(|t| t.timestamp);

    let split = split_index(closing.len(), in_sample_ratio);
    let (in_trades, out_trades) = closing.split_at(split);

    let in_sample =
        PerformanceCalculator::calculate_metrics(in_trades, &[], initial_capital, params);
    let out_sample =
        PerformanceCalculator::calculate_metrics(out_trades, &[], initial_capital, params);

    WalkForwardResult {
        in_sample_ratio,
        in_sample_trades: in_trades.len(),
        out_sample_trades: out_trades.len(),
        robustness_ratio: ratio_or_zero(out_sample.sharpe_ratio, in_sample.sharpe_ratio),
        efficiency: ratio_or_zero(
            out_sample.total_return_percent,
            in_sample.total_return_percent,
        ),
        in_sample,
        out_sample,
    }
}
