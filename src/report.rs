use crate::config::EngineSettings;
use crate::models::{BacktestRun, RunStatus};
use crate::monte_carlo::{simulate, MonteCarloConfig, MonteCarloResult};
use crate::performance::MetricsParams;
use crate::walk_forward::{walk_forward, WalkForwardResult};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct DiagnosticsOptions {
    pub monte_carlo: bool,
    pub walk_forward: bool,
    pub seed: Option<u64>,
}

/// A run plus optional robustness diagnostics. Diagnostics never touch the run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestReport {
    pub run: BacktestRun,
    pub monte_carlo: Option<MonteCarloResult>,
    pub walk_forward: Option<WalkForwardResult>,
}

impl BacktestReport {
    /// Diagnostics are computed for completed runs only.
    pub fn build(
        run: BacktestRun,
        settings: &EngineSettings,
        options: DiagnosticsOptions,
    ) -> Self {
        let completed = run.status == RunStatus::Completed;
        let initial_capital = run.config.initial_capital;

        let monte_carlo = (completed && options.monte_carlo).then(|| {
            let config = MonteCarloConfig {
                seed: options.seed,
                ..MonteCarloConfig::from_settings(settings)
            };
            simulate(&run.trades, initial_capital, &config)
        });
        let walk_forward = (completed && options.walk_forward).then(|| {
            walk_forward(
                &run.trades,
                initial_capital,
                settings.walk_forward_in_sample_ratio,
                &MetricsParams::from_settings(settings),
            )
        });

        Self {
            run,
            monte_carlo,
            walk_forward,
        }
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        Ok(())
    }
}
