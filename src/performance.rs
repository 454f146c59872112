use crate::config::EngineSettings;
use crate::models::*;
use statrs::statistics::Statistics;

/// Inputs to the ratio calculations that are modeling choices rather than data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsParams {
    /// Annual risk-free rate in percent.
    pub risk_free_rate: f64,
    /// Periods per year used to annualize Sharpe and Sortino.
    pub annualization_factor: f64,
}

impl Default for MetricsParams {
    fn default() -> Self {
        Self {
            risk_free_rate: 2.0,
            annualization_factor: 252.0,
        }
    }
}

impl MetricsParams {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            risk_free_rate: settings.risk_free_rate,
            annualization_factor: settings.annualization_factor,
        }
    }

    /// Per-period risk-free rate in percent.
    pub fn period_risk_free(&self) -> f64 {
        if self.annualization_factor > 0.0 {
            self.risk_free_rate / self.annualization_factor
        } else {
            0.0
        }
    }
}

struct DrawdownInfo {
    max_drawdown: f64,
    max_drawdown_percent: f64,
}

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    /// Computes run metrics from the ledger and equity curve. Only closing trades
    /// count as trades; opening fills contribute their fees. When the curve is
    /// empty a curve is derived from initial capital plus cumulative realized pnl.
    pub fn calculate_metrics(
        trades: &[Trade],
        equity_curve: &[EquityPoint],
        initial_capital: f64,
        params: &MetricsParams,
    ) -> BacktestMetrics {
        let closing: Vec<&Trade> = trades.iter().filter(|t| t.is_closing()).collect();
        if closing.is_empty() {
            return BacktestMetrics::default();
        }

        let pnls: Vec<f64> = closing.iter().map(|t| t.pnl.unwrap_or(0.0)).collect();
        let returns: Vec<f64> = closing
            .iter()
            .map(|t| t.pnl_percent.unwrap_or(0.0))
            .collect();

        let total_trades = pnls.len();
        let wins: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = pnls.iter().copied().filter(|p| *p <= 0.0).collect();
        let winning_trades = wins.len();
        let losing_trades = losses.len();
        let win_rate = winning_trades as f64 / total_trades as f64 * 100.0;

        let total_pnl: f64 = pnls.iter().sum();
        let gross_profit: f64 = wins.iter().sum();
        let gross_loss: f64 = losses.iter().map(|p| -p).sum();
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let avg_win = Self::average(&wins);
        // Loss figures are magnitudes.
        let avg_loss = if losing_trades > 0 {
            gross_loss / losing_trades as f64
        } else {
            0.0
        };
        let largest_win = wins.iter().copied().fold(0.0, f64::max);
        let largest_loss = losses.iter().map(|p| -p).fold(0.0, f64::max);
        let expectancy = win_rate / 100.0 * avg_win - (1.0 - win_rate / 100.0) * avg_loss;

        let final_equity = equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(initial_capital + total_pnl);
        let total_return_percent = if initial_capital > 0.0 {
            (final_equity - initial_capital) / initial_capital * 100.0
        } else {
            0.0
        };

        let drawdown = if equity_curve.is_empty() {
            let mut equity = initial_capital;
            let derived: Vec<f64> = pnls
                .iter()
                .map(|pnl| {
                    equity += pnl;
                    equity
                })
                .collect();
            Self::calculate_max_drawdown(initial_capital, derived)
        } else {
            Self::calculate_max_drawdown(initial_capital, equity_curve.iter().map(|p| p.equity))
        };

        let calmar_ratio = if drawdown.max_drawdown_percent > 0.0 {
            total_return_percent / drawdown.max_drawdown_percent
        } else {
            0.0
        };

        let (longest_win_streak, longest_loss_streak) = Self::streaks(&pnls);

        BacktestMetrics {
            total_trades,
            winning_trades,
            losing_trades,
            win_rate,
            total_pnl,
            total_return_percent,
            gross_profit,
            gross_loss,
            profit_factor,
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            expectancy,
            sharpe_ratio: Self::calculate_sharpe_ratio(&returns, params),
            sortino_ratio: Self::calculate_sortino_ratio(&returns, params),
            calmar_ratio,
            max_drawdown: drawdown.max_drawdown,
            max_drawdown_percent: drawdown.max_drawdown_percent,
            longest_win_streak,
            longest_loss_streak,
            total_fees: trades.iter().map(|t| t.fee).sum(),
        }
    }

    fn average(values: &[f64]) -> f64 {
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }

    /// Sharpe over per-trade percent returns, annualized by the configured factor.
    pub fn calculate_sharpe_ratio(returns: &[f64], params: &MetricsParams) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let std_dev = returns.iter().std_dev();
        if !std_dev.is_finite() || std_dev == 0.0 {
            return 0.0;
        }
        let excess = returns.iter().mean() - params.period_risk_free();
        excess / std_dev * params.annualization_factor.sqrt()
    }

    pub fn calculate_sortino_ratio(returns: &[f64], params: &MetricsParams) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let threshold = params.period_risk_free();
        let excess = returns.iter().mean() - threshold;
        let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < threshold).collect();
        if downside.is_empty() {
            return if excess > 0.0 { f64::INFINITY } else { 0.0 };
        }

        let downside_dev = downside.iter().std_dev();
        if !downside_dev.is_finite() || downside_dev == 0.0 {
            return 0.0;
        }
        excess / downside_dev * params.annualization_factor.sqrt()
    }

    fn calculate_max_drawdown<I>(initial_capital: f64, equity: I) -> DrawdownInfo
    where
        I: IntoIterator<Item = f64>,
    {
        let mut peak = initial_capital;
        let mut max_drawdown = 0.0;
        let mut max_drawdown_percent = 0.0;

        for value in equity {
            if value > peak {
                peak = value;
                continue;
            }
            let drawdown = peak - value;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
            if peak > 0.0 {
                let percent = drawdown / peak * 100.0;
                if percent > max_drawdown_percent {
                    max_drawdown_percent = percent;
                }
            }
        }

        DrawdownInfo {
            max_drawdown,
            max_drawdown_percent,
        }
    }

    /// Longest runs of pnl > 0 and pnl <= 0.
    fn streaks(pnls: &[f64]) -> (usize, usize) {
        let mut longest_win = 0;
        let mut longest_loss = 0;
        let mut current_win = 0;
        let mut current_loss = 0;
        for pnl in pnls {
            if *pnl > 0.0 {
                current_win += 1;
                current_loss = 0;
            } else {
                current_loss += 1;
                current_win = 0;
            }
            longest_win = longest_win.max(current_win);
            longest_loss = longest_loss.max(current_loss);
        }
        (longest_win, longest_loss)
    }
}
