use crate::error::{EngineError, EngineResult};
use crate::models::BacktestConfig;
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const SETTING_KEYS: [&str; 11] = [
    "TRADE_FEE_RATE",
    "TRADE_SLIPPAGE_RATE",
    "MIN_INITIAL_CAPITAL",
    "RISK_FREE_RATE",
    "ANNUALIZATION_FACTOR",
    "MONTE_CARLO_SIMULATIONS",
    "MONTE_CARLO_HORIZON",
    "MONTE_CARLO_RUIN_THRESHOLD",
    "WALK_FORWARD_IN_SAMPLE_RATIO",
    "CONSENSUS_LOOKBACK",
    "POSITION_SIZE_RATIO",
];

/// Engine-wide tunables. Anything missing from the settings map takes its default.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    pub trade_fee_rate: f64,
    pub trade_slippage_rate: f64,
    pub min_initial_capital: f64,
    /// Annual, in percent.
    pub risk_free_rate: f64,
    pub annualization_factor: f64,
    pub monte_carlo_simulations: usize,
    pub monte_carlo_horizon: usize,
    pub monte_carlo_ruin_threshold: f64,
    pub walk_forward_in_sample_ratio: f64,
    pub consensus_lookback: usize,
    pub position_size_ratio: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            trade_fee_rate: 0.001,
            trade_slippage_rate: 0.0005,
            min_initial_capital: 100.0,
            risk_free_rate: 2.0,
            annualization_factor: 252.0,
            monte_carlo_simulations: 10_000,
            monte_carlo_horizon: 252,
            monte_carlo_ruin_threshold: 0.2,
            walk_forward_in_sample_ratio: 0.7,
            consensus_lookback: 300,
            position_size_ratio: 0.95,
        }
    }
}

impl EngineSettings {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            trade_fee_rate: setting_f64(
                settings,
                "TRADE_FEE_RATE",
                defaults.trade_fee_rate,
                Some(0.0),
                Some(0.1),
            )?,
            trade_slippage_rate: setting_f64(
                settings,
                "TRADE_SLIPPAGE_RATE",
                defaults.trade_slippage_rate,
                Some(0.0),
                Some(0.1),
            )?,
            min_initial_capital: setting_f64(
                settings,
                "MIN_INITIAL_CAPITAL",
                defaults.min_initial_capital,
                Some(0.0),
                None,
            )?,
            risk_free_rate: setting_f64(
                settings,
                "RISK_FREE_RATE",
                defaults.risk_free_rate,
                Some(-100.0),
                Some(100.0),
            )?,
            annualization_factor: setting_f64(
                settings,
                "ANNUALIZATION_FACTOR",
                defaults.annualization_factor,
                Some(1.0),
                None,
            )?,
            monte_carlo_simulations: setting_usize(
                settings,
                "MONTE_CARLO_SIMULATIONS",
                defaults.monte_carlo_simulations,
                1,
            )?,
            monte_carlo_horizon: setting_usize(
                settings,
                "MONTE_CARLO_HORIZON",
                defaults.monte_carlo_horizon,
                1,
            )?,
            monte_carlo_ruin_threshold: setting_f64(
                settings,
                "MONTE_CARLO_RUIN_THRESHOLD",
                defaults.monte_carlo_ruin_threshold,
                Some(0.0),
                Some(1.0),
            )?,
            walk_forward_in_sample_ratio: setting_f64(
                settings,
                "WALK_FORWARD_IN_SAMPLE_RATIO",
                defaults.walk_forward_in_sample_ratio,
                Some(0.0),
                Some(1.0),
            )?,
            consensus_lookback: setting_usize(
                settings,
                "CONSENSUS_LOOKBACK",
                defaults.consensus_lookback,
                1,
            )?,
            position_size_ratio: setting_f64(
                settings,
                "POSITION_SIZE_RATIO",
                defaults.position_size_ratio,
                Some(0.01),
                Some(1.0),
            )?,
        })
    }

    /// Rejects a backtest request before any run is created.
    pub fn validate_backtest(&self, config: &BacktestConfig) -> EngineResult<()> {
        if config.symbol.trim().is_empty() {
            return Err(EngineError::InvalidConfig("symbol is empty".to_string()));
        }
        if !config.initial_capital.is_finite() || config.initial_capital < self.min_initial_capital
        {
            return Err(EngineError::InvalidConfig(format!(
                "initial capital {} is below the minimum of {}",
                config.initial_capital, self.min_initial_capital
            )));
        }
        if config.end_date < config.start_date {
            return Err(EngineError::InvalidConfig(format!(
                "end date {} precedes start date {}",
                config.end_date, config.start_date
            )));
        }
        for (name, rate) in [
            ("fee rate", config.fee_rate),
            ("slippage rate", config.slippage_rate),
        ] {
            if !rate.is_finite() || !(0.0..1.0).contains(&rate) {
                return Err(EngineError::InvalidConfig(format!(
                    "{} must be in [0, 1) (value: {})",
                    name, rate
                )));
            }
        }
        Ok(())
    }
}

/// Settings from the process environment, overridden by an optional JSON file.
pub fn load_settings_map(path: Option<&Path>) -> Result<HashMap<String, String>> {
    let mut settings: HashMap<String, String> = SETTING_KEYS
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|value| (key.to_string(), value)))
        .collect();

    if let Some(path) = path {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        settings.extend(parse_settings_json(&raw).with_context(|| {
            format!("Failed to parse settings file {}", path.display())
        })?);
    }

    Ok(settings)
}

fn parse_settings_json(raw: &str) -> Result<HashMap<String, String>> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let object = value
        .as_object()
        .ok_or_else(|| anyhow!("Settings file must contain a JSON object"))?;

    let mut settings = HashMap::new();
    for (key, value) in object {
        let text = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            other => {
                return Err(anyhow!(
                    "Setting {} must be a string or number (value: {})",
                    key,
                    other
                ))
            }
        };
        settings.insert(key.clone(), text);
    }
    Ok(settings)
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    default: f64,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<f64> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(value)
}

fn setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    default: usize,
    min: usize,
) -> Result<usize> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            raw
        ));
    }
    if value < min as f64 {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value as usize)
}
