use crate::error::{EngineError, EngineResult};
use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 8] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
        Timeframe::W1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::M1 => Duration::minutes(1),
            Timeframe::M5 => Duration::minutes(5),
            Timeframe::M15 => Duration::minutes(15),
            Timeframe::M30 => Duration::minutes(30),
            Timeframe::H1 => Duration::hours(1),
            Timeframe::H4 => Duration::hours(4),
            Timeframe::D1 => Duration::days(1),
            Timeframe::W1 => Duration::weeks(1),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Timeframe::ALL
            .iter()
            .copied()
            .find(|tf| tf.as_str() == normalized)
            .ok_or_else(|| anyhow!("Unknown timeframe '{}'", s.trim()))
    }
}

/// One OHLCV bar. Series are ordered by strictly increasing `open_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    pub fn validate(&self) -> EngineResult<()> {
        let values = [self.open, self.high, self.low, self.close, self.volume];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::InvalidCandle(format!(
                "{} {} at {} has non-finite values",
                self.symbol, self.timeframe, self.open_time
            )));
        }
        if self.low > self.high || self.volume < 0.0 {
            return Err(EngineError::InvalidCandle(format!(
                "{} {} at {} has low {} above high {} or negative volume",
                self.symbol, self.timeframe, self.open_time, self.low, self.high
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalAction {
    Buy,
    Sell,
    /// Close any open position without taking the other side.
    Exit,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "buy",
            SignalAction::Sell => "sell",
            SignalAction::Exit => "exit",
        }
    }
}

impl FromStr for SignalAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(SignalAction::Buy),
            "sell" => Ok(SignalAction::Sell),
            "exit" => Ok(SignalAction::Exit),
            other => Err(anyhow!("Unknown signal action '{}'", other)),
        }
    }
}

/// A directional call from one evaluator for one candle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub strategy_id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub action: SignalAction,
    pub price: f64,
    /// 0..=100
    pub confidence: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub rationale: String,
    pub metadata: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsensusDirection {
    StrongBuy,
    Buy,
    Neutral,
    Sell,
    StrongSell,
}

impl ConsensusDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsensusDirection::StrongBuy => "STRONG_BUY",
            ConsensusDirection::Buy => "BUY",
            ConsensusDirection::Neutral => "NEUTRAL",
            ConsensusDirection::Sell => "SELL",
            ConsensusDirection::StrongSell => "STRONG_SELL",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyAbstention {
    pub strategy_id: String,
    pub error: EngineError,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusResult {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub evaluated_at: Option<DateTime<Utc>>,
    pub signals: Vec<Signal>,
    pub direction: ConsensusDirection,
    pub confidence: f64,
    pub agreement: f64,
    pub buy_count: usize,
    pub sell_count: usize,
    pub strategy_count: usize,
    /// Evaluators that failed; each counted as an abstention.
    pub abstentions: Vec<StrategyAbstention>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestConfig {
    pub strategy_id: String,
    #[serde(default)]
    pub parameters: HashMap<String, f64>,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub initial_capital: f64,
    pub fee_rate: f64,
    pub slippage_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

/// One simulated fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub side: TradeSide,
    pub price: f64,
    pub quantity: f64,
    pub fee: f64,
    /// Cash leaving the account on a buy, cash arriving on a sell.
    pub total: f64,
    pub balance: f64,
    pub timestamp: DateTime<Utc>,
    pub rationale: String,
    /// Realized P&L, set on closing fills only.
    pub pnl: Option<f64>,
    pub pnl_percent: Option<f64>,
}

impl Trade {
    pub fn is_closing(&self) -> bool {
        self.pnl.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub quantity: f64,
    pub entry_price: f64,
    /// Total cash spent opening the position, fee included.
    pub cost_basis: f64,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity * price
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub cash: f64,
    pub position_value: f64,
    pub position_quantity: f64,
    pub close_price: f64,
    pub cumulative_return_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawdownPoint {
    pub timestamp: DateTime<Utc>,
    pub peak: f64,
    pub equity: f64,
    pub drawdown: f64,
    pub drawdown_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Pending, RunStatus::Failed)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestMetrics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub total_return_percent: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub expectancy: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub max_drawdown: f64,
    pub max_drawdown_percent: f64,
    pub longest_win_streak: usize,
    pub longest_loss_streak: usize,
    pub total_fees: f64,
}

/// Aggregate root for one simulation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestRun {
    pub id: String,
    pub config: BacktestConfig,
    pub status: RunStatus,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub drawdown_curve: Vec<DrawdownPoint>,
    pub metrics: Option<BacktestMetrics>,
    pub final_equity: Option<f64>,
    pub error: Option<EngineError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BacktestRun {
    pub fn new(id: String, config: BacktestConfig) -> Self {
        Self {
            id,
            config,
            status: RunStatus::Pending,
            trades: Vec::new(),
            equity_curve: Vec::new(),
            drawdown_curve: Vec::new(),
            metrics: None,
            final_equity: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn transition(&mut self, next: RunStatus) -> EngineResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        match next {
            RunStatus::Running => self.started_at = Some(Utc::now()),
            RunStatus::Completed | RunStatus::Failed => self.finished_at = Some(Utc::now()),
            RunStatus::Pending => {}
        }
        self.status = next;
        Ok(())
    }

    pub fn fail(&mut self, error: EngineError) -> EngineResult<()> {
        self.transition(RunStatus::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    pub fn closing_trades(&self) -> Vec<&Trade> {
        self.trades.iter().filter(|t| t.is_closing()).collect()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// Expected win rate band in percent, metadata only.
    pub expected_win_rate: (f64, f64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_config() -> BacktestConfig {
        BacktestConfig {
            strategy_id: "rsi_volume".to_string(),
            parameters: HashMap::new(),
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::H1,
            start_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end_date: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
            initial_capital: 10_000.0,
            fee_rate: 0.001,
            slippage_rate: 0.0005,
        }
    }

    #[test]
    fn timeframe_round_trips_through_str() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.as_str().parse::<Timeframe>().unwrap(), tf);
        }
        assert!("2h".parse::<Timeframe>().is_err());
        assert_eq!(" 4H ".parse::<Timeframe>().unwrap(), Timeframe::H4);
    }

    #[test]
    fn run_status_is_monotonic() {
        let mut run = BacktestRun::new("r1".to_string(), sample_config());
        assert!(run.transition(RunStatus::Completed).is_err());
        run.transition(RunStatus::Running).unwrap();
        assert!(run.started_at.is_some());
        run.transition(RunStatus::Completed).unwrap();
        assert!(run.finished_at.is_some());
        let err = run.transition(RunStatus::Running).unwrap_err();
        assert_eq!(
            err,
            EngineError::InvalidTransition {
                from: RunStatus::Completed,
                to: RunStatus::Running
            }
        );
        assert!(run.fail(EngineError::Cancelled).is_err());
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn candle_validation_rejects_non_finite_values() {
        let candle = Candle {
            symbol: "ETHUSDT".to_string(),
            timeframe: Timeframe::M15,
            open_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            open: 10.0,
            high: 12.0,
            low: 9.0,
            close: f64::NAN,
            volume: 5.0,
        };
        assert!(matches!(
            candle.validate(),
            Err(EngineError::InvalidCandle(_))
        ));
    }

    #[test]
    fn candle_wicks_and_body() {
        let candle = Candle {
            symbol: "ETHUSDT".to_string(),
            timeframe: Timeframe::M15,
            open_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            open: 10.0,
            high: 12.0,
            low: 7.0,
            close: 11.0,
            volume: 5.0,
        };
        assert!(candle.is_bullish());
        assert!((candle.body() - 1.0).abs() < 1e-12);
        assert!((candle.upper_wick() - 1.0).abs() < 1e-12);
        assert!((candle.lower_wick() - 3.0).abs() < 1e-12);
        assert!((candle.range() - 5.0).abs() < 1e-12);
    }
}
