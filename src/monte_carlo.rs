use crate::config::EngineSettings;
use crate::models::Trade;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonteCarloConfig {
    pub simulations: usize,
    /// Trades drawn per path.
    pub horizon: usize,
    /// Fraction of initial capital at or below which a path is ruined.
    pub ruin_threshold: f64,
    /// Seeds path `i` with `seed + i` when set; paths draw from entropy otherwise.
    pub seed: Option<u64>,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            simulations: 10_000,
            horizon: 252,
            ruin_threshold: 0.2,
            seed: None,
        }
    }
}

impl MonteCarloConfig {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            simulations: settings.monte_carlo_simulations,
            horizon: settings.monte_carlo_horizon,
            ruin_threshold: settings.monte_carlo_ruin_threshold,
            seed: None,
        }
    }
}

/// Terminal equity distribution. All fields are zero when there was nothing to resample.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloResult {
    pub simulations: usize,
    pub horizon: usize,
    pub percentile_5: f64,
    pub percentile_25: f64,
    pub median: f64,
    pub percentile_75: f64,
    pub percentile_95: f64,
    pub mean_terminal_equity: f64,
    pub ruin_probability: f64,
    pub expected_return_percent: f64,
}

struct PathOutcome {
    terminal_equity: f64,
    ruined: bool,
}

fn simulate_path(
    returns: &[f64],
    initial_capital: f64,
    config: &MonteCarloConfig,
    mut rng: StdRng,
) -> PathOutcome {
    let ruin_level = initial_capital * config.ruin_threshold;
    let mut equity = initial_capital;
    for _ in 0..config.horizon {
        let pick = returns[rng.gen_range(0..returns.len())];
        equity *= 1.0 + pick / 100.0;
        if equity <= ruin_level {
            return PathOutcome {
                terminal_equity: equity,
                ruined: true,
            };
        }
    }
    PathOutcome {
        terminal_equity: equity,
        ruined: false,
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    let index = ((sorted.len() as f64 * p).floor() as usize).min(sorted.len() - 1);
    sorted[index]
}

/// Resamples realized per-trade percent returns with replacement and compounds them.
pub fn simulate(
    trades: &[Trade],
    initial_capital: f64,
    config: &MonteCarloConfig,
) -> MonteCarloResult {
    let returns: Vec<f64> = trades.iter().filter_map(|t| t.pnl_percent).collect();
    if returns.is_empty() || config.simulations == 0 || initial_capital <= 0.0 {
        return MonteCarloResult::default();
    }

    let outcomes: Vec<PathOutcome> = (0..config.simulations)
        .into_par_iter()
        .map(|path| {
            let rng = match config.seed {
                Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(path as u64)),
                None => StdRng::from_entropy(),
            };
            simulate_path(&returns, initial_capital, config, rng)
        })
        .collect();

    let ruined = outcomes.iter().filter(|o| o.ruined).count();
    let mut terminal: Vec<f64> = outcomes.iter().map(|o| o.terminal_equity).collect();
    terminal.sort_by(|a, b| a.total_cmp(b));

    let count = terminal.len() as f64;
    let mean_terminal_equity = terminal.iter().sum::<f64>() / count;

    MonteCarloResult {
        simulations: config.simulations,
        horizon: config.horizon,
        percentile_5: percentile(&terminal, 0.05),
        percentile_25: percentile(&terminal, 0.25),
        median: percentile(&terminal, 0.50),
        percentile_75: percentile(&terminal, 0.75),
        percentile_95: percentile(&terminal, 0.95),
        mean_terminal_equity,
        ruin_probability: ruined as f64 / count,
        expected_return_percent: (mean_terminal_equity - initial_capital) / initial_capital * 100.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TradeSide;
    use chrono::{TimeZone, Utc};

    fn closing(pnl_percent: f64) -> Trade {
        Trade {
            side: TradeSide::Sell,
            price: 100.0,
            quantity: 1.0,
            fee: 0.0,
            total: 100.0,
            balance: 0.0,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            rationale: String::new(),
            pnl: Some(pnl_percent),
            pnl_percent: Some(pnl_percent),
        }
    }

    fn seeded(simulations: usize, horizon: usize) -> MonteCarloConfig {
        MonteCarloConfig {
            simulations,
            horizon,
            ruin_threshold: 0.2,
            seed: Some(11),
        }
    }

    #[test]
    fn flat_trade_is_a_point_mass() {
        let result = simulate(&[closing(0.0)], 10_000.0, &seeded(500, 252));
        for value in [
            result.percentile_5,
            result.percentile_25,
            result.median,
            result.percentile_75,
            result.percentile_95,
            result.mean_terminal_equity,
        ] {
            assert_eq!(value, 10_000.0);
        }
        assert_eq!(result.ruin_probability, 0.0);
        assert_eq!(result.expected_return_percent, 0.0);
    }

    #[test]
    fn no_trades_gives_zero_result() {
        let opening = Trade {
            pnl: None,
            pnl_percent: None,
            ..closing(0.0)
        };
        assert_eq!(
            simulate(&[opening], 10_000.0, &MonteCarloConfig::default()),
            MonteCarloResult::default()
        );
        assert_eq!(
            simulate(&[], 10_000.0, &MonteCarloConfig::default()),
            MonteCarloResult::default()
        );
    }

    #[test]
    fn steady_losses_ruin_every_path_early() {
        let result = simulate(&[closing(-50.0)], 10_000.0, &seeded(200, 252));
        assert_eq!(result.ruin_probability, 1.0);
        // 10000 -> 5000 -> 2500 -> 1250 stops at the third draw.
        assert!((result.median - 1_250.0).abs() < 1e-9);
    }

    #[test]
    fn seeded_runs_repeat_and_percentiles_are_ordered() {
        let trades: Vec<Trade> = [4.0, -2.0, 1.5, -3.0, 6.0]
            .iter()
            .map(|&r| closing(r))
            .collect();
        let a = simulate(&trades, 5_000.0, &seeded(1_000, 50));
        let b = simulate(&trades, 5_000.0, &seeded(1_000, 50));
        assert_eq!(a, b);
        assert!(a.percentile_5 <= a.percentile_25);
        assert!(a.percentile_25 <= a.median);
        assert!(a.median <= a.percentile_75);
        assert!(a.percentile_75 <= a.percentile_95);
        assert!(a.ruin_probability >= 0.0 && a.ruin_probability <= 1.0);
        assert_eq!(a.simulations, 1_000);
    }
}
