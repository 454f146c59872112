use crate::candle_store::{CandleStore, DateRange};
use crate::config::EngineSettings;
use crate::error::{EngineError, EngineResult};
use crate::models::*;
use crate::performance::{MetricsParams, PerformanceCalculator};
use crate::run_status::{NoopListener, RunListener};
use crate::strategy::{create_strategy, Evaluator, Strategy};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Caller-side limits for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub timeout: Option<Duration>,
}

impl RunOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Cancellation flag plus an optional time limit, checked once per candle step.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    cancelled: Arc<AtomicBool>,
    timeout: Option<Duration>,
}

impl RunControl {
    pub fn new(options: RunOptions) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            timeout: options.timeout,
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn deadline(&self, started: Instant) -> Option<Instant> {
        self.timeout.map(|limit| started + limit)
    }

    fn check(&self, deadline: Option<Instant>) -> EngineResult<()> {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                let limit_ms = self.timeout.map(|t| t.as_millis() as u64).unwrap_or(0);
                return Err(EngineError::Timeout { limit_ms });
            }
        }
        Ok(())
    }
}

enum CloseReason {
    Signal(SignalAction),
    EndOfData,
}

impl CloseReason {
    fn describe(&self, signal: Option<&Signal>) -> String {
        match (self, signal) {
            (CloseReason::Signal(SignalAction::Exit), Some(s)) => {
                format!("Exit flag: {}", s.rationale)
            }
            (CloseReason::Signal(_), Some(s)) => format!("Sell signal: {}", s.rationale),
            (CloseReason::Signal(_), None) => "Sell signal".to_string(),
            (CloseReason::EndOfData, _) => "End of data: position force-closed".to_string(),
        }
    }
}

/// Cash, the optional open position, and the running peak for one run.
struct Account {
    cash: f64,
    position: Option<Position>,
    peak_equity: f64,
}

/// Replays a candle series through one strategy. Single-threaded and stepwise;
/// the run it executes is owned exclusively for the duration.
pub struct BacktestSimulator<'a> {
    store: &'a dyn CandleStore,
    settings: &'a EngineSettings,
}

impl<'a> BacktestSimulator<'a> {
    pub fn new(store: &'a dyn CandleStore, settings: &'a EngineSettings) -> Self {
        Self { store, settings }
    }

    /// Validates the request and resolves its strategy. Nothing is created on failure.
    pub fn prepare(&self, config: BacktestConfig) -> EngineResult<(BacktestRun, Evaluator)> {
        let strategy = create_strategy(&config.strategy_id, &config.parameters)?;
        self.settings.validate_backtest(&config)?;
        Ok((BacktestRun::new(Uuid::new_v4().to_string(), config), strategy))
    }

    /// Prepare and execute with no time limit.
    pub fn run(&self, config: BacktestConfig) -> EngineResult<BacktestRun> {
        let (run, strategy) = self.prepare(config)?;
        Ok(self.execute(
            run,
            &strategy,
            &RunControl::default(),
            &NoopListener,
        ))
    }

    pub fn execute<S: Strategy + ?Sized>(
        &self,
        mut run: BacktestRun,
        strategy: &S,
        control: &RunControl,
        listener: &dyn RunListener,
    ) -> BacktestRun {
        if let Err(err) = run.transition(RunStatus::Running) {
            warn!("Backtest {} could not start: {}", run.id, err);
            return run;
        }
        listener.on_status(RunStatus::Running);
        let deadline = control.deadline(Instant::now());

        let config = run.config.clone();
        info!(
            "Backtest {} started: {} on {} {} from {} to {}",
            run.id,
            config.strategy_id,
            config.symbol,
            config.timeframe,
            config.start_date,
            config.end_date
        );

        let candles = match self.store.get_candles(
            &config.symbol,
            config.timeframe,
            Some(DateRange::new(config.start_date, config.end_date)),
        ) {
            Ok(candles) if candles.is_empty() => {
                return self.finish_failed(
                    run,
                    EngineError::NoHistoricalData {
                        symbol: config.symbol.clone(),
                        timeframe: config.timeframe,
                    },
                    listener,
                );
            }
            Ok(candles) => candles,
            Err(err) => return self.finish_failed(run, err, listener),
        };

        let warmup = strategy.min_data_points().max(1);
        let first_step = warmup - 1;
        let total_steps = candles.len().saturating_sub(first_step);
        if total_steps == 0 {
            info!(
                "Backtest {}: {} candles is shorter than the {}-candle warm-up; no trades",
                run.id,
                candles.len(),
                warmup
            );
        }
        listener.on_progress(0, total_steps);

        let mut account = Account {
            cash: config.initial_capital,
            position: None,
            peak_equity: config.initial_capital,
        };

        for index in first_step..candles.len() {
            if let Err(err) = control.check(deadline) {
                return self.finish_failed(run, err, listener);
            }

            let candle = &candles[index];
            if let Err(err) = candle.validate() {
                return self.finish_failed(run, err, listener);
            }

            let signal = match strategy.evaluate(
                &config.symbol,
                config.timeframe,
                &candles[..=index],
            ) {
                Ok(signal) => signal,
                Err(err) if err.is_no_signal() => None,
                Err(err) => return self.finish_failed(run, err, listener),
            };

            if let Some(signal) = &signal {
                match signal.action {
                    SignalAction::Buy if account.position.is_none() && account.cash > 0.0 => {
                        if let Some(trade) = self.open_position(&mut account, &config, candle, signal)
                        {
                            run.trades.push(trade);
                        }
                    }
                    SignalAction::Sell | SignalAction::Exit if account.position.is_some() => {
                        if let Some(trade) = self.close_position(
                            &mut account,
                            &config,
                            candle,
                            CloseReason::Signal(signal.action),
                            Some(signal),
                        ) {
                            run.trades.push(trade);
                        }
                    }
                    _ => {}
                }
            }

            if index == candles.len() - 1 && account.position.is_some() {
                if let Some(trade) =
                    self.close_position(&mut account, &config, candle, CloseReason::EndOfData, None)
                {
                    run.trades.push(trade);
                }
            }

            let (equity_point, drawdown_point) =
                Self::mark_to_market(&mut account, candle, config.initial_capital);
            run.equity_curve.push(equity_point);
            run.drawdown_curve.push(drawdown_point);
            listener.on_progress(index + 1 - first_step, total_steps);
        }

        let params = MetricsParams::from_settings(self.settings);
        let metrics = PerformanceCalculator::calculate_metrics(
            &run.trades,
            &run.equity_curve,
            config.initial_capital,
            &params,
        );
        let final_equity = run
            .equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(config.initial_capital);

        info!(
            "Backtest {} completed: {} trades, final equity {:.2}, return {:.2}%",
            run.id,
            run.trades.len(),
            final_equity,
            metrics.total_return_percent
        );
        run.metrics = Some(metrics);
        run.final_equity = Some(final_equity);
        if let Err(err) = run.transition(RunStatus::Completed) {
            warn!("Backtest {} could not complete: {}", run.id, err);
            return run;
        }
        listener.on_status(RunStatus::Completed);
        run
    }

    fn finish_failed(
        &self,
        mut run: BacktestRun,
        error: EngineError,
        listener: &dyn RunListener,
    ) -> BacktestRun {
        warn!(
            "Backtest {} failed after {} steps: {}",
            run.id,
            run.equity_curve.len(),
            error
        );
        listener.on_error(&error);
        if let Err(err) = run.fail(error) {
            warn!("Backtest {} could not be marked failed: {}", run.id, err);
            return run;
        }
        listener.on_status(RunStatus::Failed);
        run
    }

    /// Like `execute`, but a panicking strategy yields a FAILED run with an
    /// `Aborted` error instead of unwinding into the caller.
    pub fn execute_guarded<S: Strategy + ?Sized>(
        &self,
        run: BacktestRun,
        strategy: &S,
        control: &RunControl,
        listener: &dyn RunListener,
    ) -> BacktestRun {
        let fallback = BacktestRun::new(run.id.clone(), run.config.clone());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.execute(run, strategy, control, listener)
        }));
        match outcome {
            Ok(run) => run,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "strategy panicked".to_string());
                let mut run = fallback;
                if let Err(err) = run.transition(RunStatus::Running) {
                    warn!("Backtest {} could not be restarted: {}", run.id, err);
                }
                self.finish_failed(run, EngineError::Aborted(message), listener)
            }
        }
    }

    fn open_position(
        &self,
        account: &mut Account,
        config: &BacktestConfig,
        candle: &Candle,
        signal: &Signal,
    ) -> Option<Trade> {
        let fill = candle.close * (1.0 + config.slippage_rate);
        let budget = account.cash * self.settings.position_size_ratio;
        let quantity = budget / (fill * (1.0 + config.fee_rate));
        if !quantity.is_finite() || quantity <= 0.0 {
            debug!(
                "Skipping entry at {}: computed quantity {}",
                candle.open_time, quantity
            );
            return None;
        }

        let notional = quantity * fill;
        let fee = notional * config.fee_rate;
        let total = notional + fee;
        account.cash -= total;
        account.position = Some(Position {
            quantity,
            entry_price: fill,
            cost_basis: total,
            opened_at: candle.open_time,
        });
        debug!(
            "BUY {:.6} @ {:.4} on {} (fee {:.4})",
            quantity, fill, candle.open_time, fee
        );

        Some(Trade {
            side: TradeSide::Buy,
            price: fill,
            quantity,
            fee,
            total,
            balance: account.cash,
            timestamp: candle.open_time,
            rationale: signal.rationale.clone(),
            pnl: None,
            pnl_percent: None,
        })
    }

    fn close_position(
        &self,
        account: &mut Account,
        config: &BacktestConfig,
        candle: &Candle,
        reason: CloseReason,
        signal: Option<&Signal>,
    ) -> Option<Trade> {
        let position = account.position.take()?;
        let fill = candle.close * (1.0 - config.slippage_rate);
        let notional = position.quantity * fill;
        let fee = notional * config.fee_rate;
        let total = notional - fee;
        account.cash += total;

        let pnl = total - position.cost_basis;
        let pnl_percent = if position.cost_basis > 0.0 {
            pnl / position.cost_basis * 100.0
        } else {
            0.0
        };
        debug!(
            "SELL {:.6} @ {:.4} on {} pnl {:.4} ({:.2}%)",
            position.quantity, fill, candle.open_time, pnl, pnl_percent
        );

        Some(Trade {
            side: TradeSide::Sell,
            price: fill,
            quantity: position.quantity,
            fee,
            total,
            balance: account.cash,
            timestamp: candle.open_time,
            rationale: reason.describe(signal),
            pnl: Some(pnl),
            pnl_percent: Some(pnl_percent),
        })
    }

    fn mark_to_market(
        account: &mut Account,
        candle: &Candle,
        initial_capital: f64,
    ) -> (EquityPoint, DrawdownPoint) {
        let position_quantity = account.position.as_ref().map_or(0.0, |p| p.quantity);
        let position_value = account
            .position
            .as_ref()
            .map_or(0.0, |p| p.market_value(candle.close));
        let equity = account.cash + position_value;
        if equity > account.peak_equity {
            account.peak_equity = equity;
        }
        let drawdown = (account.peak_equity - equity).max(0.0);
        let drawdown_percent = if account.peak_equity > 0.0 {
            drawdown / account.peak_equity * 100.0
        } else {
            0.0
        };

        (
            EquityPoint {
                timestamp: candle.open_time,
                equity,
                cash: account.cash,
                position_value,
                position_quantity,
                close_price: candle.close,
                cumulative_return_percent: (equity - initial_capital) / initial_capital * 100.0,
            },
            DrawdownPoint {
                timestamp: candle.open_time,
                peak: account.peak_equity,
                equity,
                drawdown,
                drawdown_percent,
            },
        )
    }
}

/// Builds a config with the engine's default fee and slippage rates.
pub fn default_config(
    settings: &EngineSettings,
    strategy_id: &str,
    symbol: &str,
    timeframe: Timeframe,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    initial_capital: f64,
) -> BacktestConfig {
    BacktestConfig {
        strategy_id: strategy_id.to_string(),
        parameters: Default::default(),
        symbol: symbol.to_string(),
        timeframe,
        start_date,
        end_date,
        initial_capital,
        fee_rate: settings.trade_fee_rate,
        slippage_rate: settings.trade_slippage_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle_store::InMemoryCandleStore;
    use crate::run_status::RunStatusHandle;
    use crate::strategy::StrategyId;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::collections::HashMap;

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn store_with_closes(closes: &[f64]) -> InMemoryCandleStore {
        let candles = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                symbol: "BTCUSDT".to_string(),
                timeframe: Timeframe::H1,
                open_time: base_time() + ChronoDuration::hours(i as i64),
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 100.0,
            })
            .collect();
        InMemoryCandleStore::from_candles(candles).unwrap()
    }

    fn config(fee_rate: f64, slippage_rate: f64) -> BacktestConfig {
        BacktestConfig {
            strategy_id: "mock".to_string(),
            parameters: HashMap::new(),
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::H1,
            start_date: base_time(),
            end_date: base_time() + ChronoDuration::days(30),
            initial_capital: 10_000.0,
            fee_rate,
            slippage_rate,
        }
    }

    /// Emits scripted actions keyed by the index of the evaluated candle.
    struct MockStrategy {
        actions: HashMap<usize, SignalAction>,
        warmup: usize,
        fail_at: Option<usize>,
        cancel_at: Option<(usize, RunControl)>,
    }

    impl MockStrategy {
        fn new(actions: &[(usize, SignalAction)]) -> Self {
            Self {
                actions: actions.iter().copied().collect(),
                warmup: 1,
                fail_at: None,
                cancel_at: None,
            }
        }
    }

    impl Strategy for MockStrategy {
        fn info(&self) -> StrategyInfo {
            StrategyInfo {
                id: "mock",
                name: "Mock",
                description: "scripted",
                expected_win_rate: (0.0, 0.0),
            }
        }

        fn min_data_points(&self) -> usize {
            self.warmup
        }

        fn evaluate(
            &self,
            symbol: &str,
            timeframe: Timeframe,
            candles: &[Candle],
        ) -> EngineResult<Option<Signal>> {
            let index = candles.len() - 1;
            if let Some((at, control)) = &self.cancel_at {
                if *at == index {
                    control.cancel();
                }
            }
            if self.fail_at == Some(index) {
                return Err(EngineError::InvalidCandle("scripted failure".to_string()));
            }
            if index % 2 == 1 {
                return Err(EngineError::indicator("mock"));
            }
            Ok(self.actions.get(&index).map(|&action| {
                let candle = &candles[index];
                Signal {
                    strategy_id: "mock".to_string(),
                    symbol: symbol.to_string(),
                    timeframe,
                    timestamp: candle.open_time,
                    action,
                    price: candle.close,
                    confidence: 80.0,
                    stop_loss: candle.close * 0.9,
                    take_profit: candle.close * 1.2,
                    rationale: format!("scripted {}", action.as_str()),
                    metadata: Default::default(),
                }
            }))
        }
    }

    fn run_mock(
        store: &InMemoryCandleStore,
        config: BacktestConfig,
        strategy: &MockStrategy,
        control: &RunControl,
    ) -> BacktestRun {
        let settings = EngineSettings::default();
        let simulator = BacktestSimulator::new(store, &settings);
        let run = BacktestRun::new("test".to_string(), config);
        simulator.execute(run, strategy, control, &NoopListener)
    }

    fn assert_curve_invariants(run: &BacktestRun) {
        assert_eq!(run.equity_curve.len(), run.drawdown_curve.len());
        let mut last_peak = f64::MIN;
        for (equity, drawdown) in run.equity_curve.iter().zip(&run.drawdown_curve) {
            let expected = equity.cash + equity.position_quantity * equity.close_price;
            assert!((equity.equity - expected).abs() < 1e-6);
            assert!(drawdown.drawdown >= 0.0);
            assert!(drawdown.peak >= last_peak);
            assert!((drawdown.drawdown - (drawdown.peak - drawdown.equity).max(0.0)).abs() < 1e-9);
            last_peak = drawdown.peak;
        }
        assert!(run
            .trades
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn round_trip_without_costs_realizes_price_move() {
        let store = store_with_closes(&[100.0, 100.0, 100.0, 105.0, 110.0, 110.0]);
        let strategy = MockStrategy::new(&[(0, SignalAction::Buy), (4, SignalAction::Sell)]);
        let run = run_mock(&store, config(0.0, 0.0), &strategy, &RunControl::default());

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.trades.len(), 2);
        let buy = &run.trades[0];
        assert_eq!(buy.side, TradeSide::Buy);
        assert!((buy.quantity - 95.0).abs() < 1e-9);
        let sell = &run.trades[1];
        assert!((sell.pnl.unwrap() - 950.0).abs() < 1e-9);
        assert!((sell.pnl_percent.unwrap() - 10.0).abs() < 1e-9);
        assert!((run.final_equity.unwrap() - 10_950.0).abs() < 1e-9);

        let metrics = run.metrics.as_ref().unwrap();
        assert_eq!(metrics.total_trades, 1);
        assert_eq!(metrics.win_rate, 100.0);
        assert!((metrics.total_return_percent - 9.5).abs() < 1e-9);
        assert_eq!(run.equity_curve.len(), 6);
        assert!(run.started_at.is_some() && run.finished_at.is_some());
        assert_curve_invariants(&run);
    }

    #[test]
    fn fees_and_slippage_reduce_the_fill() {
        let store = store_with_closes(&[100.0, 100.0, 100.0]);
        let strategy = MockStrategy::new(&[(0, SignalAction::Buy), (2, SignalAction::Sell)]);
        let run = run_mock(&store, config(0.001, 0.0005), &strategy, &RunControl::default());

        let buy = &run.trades[0];
        assert!((buy.price - 100.05).abs() < 1e-9);
        assert!((buy.fee - buy.quantity * buy.price * 0.001).abs() < 1e-9);
        assert!((buy.total - 9_500.0).abs() < 1e-6);
        let sell = &run.trades[1];
        assert!((sell.price - 99.95).abs() < 1e-9);
        assert!(sell.pnl.unwrap() < 0.0);
        assert_curve_invariants(&run);
    }

    #[test]
    fn open_position_is_force_closed_on_last_candle() {
        let store = store_with_closes(&[100.0, 101.0, 102.0, 120.0]);
        let strategy = MockStrategy::new(&[(0, SignalAction::Buy)]);
        let run = run_mock(&store, config(0.0, 0.0), &strategy, &RunControl::default());

        assert_eq!(run.trades.len(), 2);
        let close = run.trades.last().unwrap();
        assert!(close.rationale.starts_with("End of data"));
        let last = run.equity_curve.last().unwrap();
        assert_eq!(last.position_quantity, 0.0);
        assert!((last.equity - last.cash).abs() < 1e-12);
        assert!((run.final_equity.unwrap() - 11_900.0).abs() < 1e-9);
    }

    #[test]
    fn exit_closes_but_never_opens() {
        let store = store_with_closes(&[100.0, 100.0, 100.0, 100.0, 100.0]);
        let strategy = MockStrategy::new(&[
            (0, SignalAction::Exit),
            (2, SignalAction::Buy),
            (4, SignalAction::Exit),
        ]);
        let run = run_mock(&store, config(0.0, 0.0), &strategy, &RunControl::default());
        assert_eq!(run.trades.len(), 2);
        assert_eq!(run.trades[0].side, TradeSide::Buy);
        assert!(run.trades[1].rationale.starts_with("Exit flag"));
    }

    #[test]
    fn no_data_in_range_fails() {
        let store = InMemoryCandleStore::new();
        let strategy = MockStrategy::new(&[]);
        let run = run_mock(&store, config(0.0, 0.0), &strategy, &RunControl::default());
        assert_eq!(run.status, RunStatus::Failed);
        assert!(matches!(
            run.error,
            Some(EngineError::NoHistoricalData { .. })
        ));
        assert!(run.metrics.is_none());
    }

    #[test]
    fn series_shorter_than_warmup_completes_without_trades() {
        let store = store_with_closes(&[100.0, 101.0, 102.0]);
        let mut strategy = MockStrategy::new(&[(0, SignalAction::Buy)]);
        strategy.warmup = 10;
        let run = run_mock(&store, config(0.0, 0.0), &strategy, &RunControl::default());
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.trades.is_empty());
        assert_eq!(run.metrics.as_ref().unwrap(), &BacktestMetrics::default());
        assert_eq!(run.final_equity, Some(10_000.0));
    }

    #[test]
    fn hard_evaluation_errors_fail_the_run_with_partial_results() {
        let store = store_with_closes(&[100.0, 100.0, 100.0, 100.0, 100.0]);
        let mut strategy = MockStrategy::new(&[(0, SignalAction::Buy)]);
        strategy.fail_at = Some(2);
        let run = run_mock(&store, config(0.0, 0.0), &strategy, &RunControl::default());
        assert_eq!(run.status, RunStatus::Failed);
        assert!(matches!(run.error, Some(EngineError::InvalidCandle(_))));
        assert_eq!(run.equity_curve.len(), 2);
        assert_eq!(run.trades.len(), 1);
        assert!(run.metrics.is_none());
    }

    #[test]
    fn cancellation_stops_at_the_next_step_boundary() {
        let store = store_with_closes(&[100.0; 10]);
        let control = RunControl::default();
        let mut strategy = MockStrategy::new(&[(0, SignalAction::Buy)]);
        strategy.cancel_at = Some((3, control.clone()));
        let run = run_mock(&store, config(0.0, 0.0), &strategy, &control);

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error, Some(EngineError::Cancelled));
        assert_eq!(run.equity_curve.len(), 4);
        assert!(run.metrics.is_none());
        assert_curve_invariants(&run);
    }

    #[test]
    fn zero_timeout_fails_with_timeout_kind() {
        let store = store_with_closes(&[100.0; 5]);
        let strategy = MockStrategy::new(&[]);
        let control = RunControl::new(RunOptions::with_timeout(Duration::ZERO));
        let run = run_mock(&store, config(0.0, 0.0), &strategy, &control);
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error, Some(EngineError::Timeout { limit_ms: 0 }));
        assert!(run.equity_curve.is_empty());
    }

    #[test]
    fn listener_sees_progress_and_terminal_status() {
        let store = store_with_closes(&[100.0; 8]);
        let mut strategy = MockStrategy::new(&[]);
        strategy.warmup = 3;
        let settings = EngineSettings::default();
        let simulator = BacktestSimulator::new(&store, &settings);
        let handle = RunStatusHandle::new();
        let run = simulator.execute(
            BacktestRun::new("progress".to_string(), config(0.0, 0.0)),
            &strategy,
            &RunControl::default(),
            &handle,
        );
        assert_eq!(run.equity_curve.len(), 6);
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.status, RunStatus::Completed);
        assert_eq!((snapshot.processed_steps, snapshot.total_steps), (6, 6));
    }

    #[test]
    fn failure_error_is_visible_before_the_failed_status() {
        struct OrderCheck(RunStatusHandle);

        impl RunListener for OrderCheck {
            fn on_status(&self, status: RunStatus) {
                if status == RunStatus::Failed {
                    assert!(self.0.snapshot().error.is_some());
                }
                self.0.on_status(status);
            }

            fn on_progress(&self, processed: usize, total: usize) {
                self.0.on_progress(processed, total);
            }

            fn on_error(&self, error: &EngineError) {
                self.0.on_error(error);
            }
        }

        let store = store_with_closes(&[100.0; 5]);
        let mut strategy = MockStrategy::new(&[]);
        strategy.fail_at = Some(2);
        let settings = EngineSettings::default();
        let simulator = BacktestSimulator::new(&store, &settings);
        let listener = OrderCheck(RunStatusHandle::new());
        let run = simulator.execute(
            BacktestRun::new("ordered".to_string(), config(0.0, 0.0)),
            &strategy,
            &RunControl::default(),
            &listener,
        );
        assert_eq!(run.status, RunStatus::Failed);
        let snapshot = listener.0.snapshot();
        assert_eq!(snapshot.status, RunStatus::Failed);
        assert_eq!(
            snapshot.error,
            Some(EngineError::InvalidCandle("scripted failure".to_string()).to_string())
        );
    }

    #[test]
    fn panicking_strategy_fails_the_run_instead_of_unwinding() {
        struct Panics;

        impl Strategy for Panics {
            fn info(&self) -> StrategyInfo {
                StrategyInfo {
                    id: "panics",
                    name: "Panics",
                    description: "always panics",
                    expected_win_rate: (0.0, 0.0),
                }
            }

            fn min_data_points(&self) -> usize {
                1
            }

            fn evaluate(
                &self,
                _symbol: &str,
                _timeframe: Timeframe,
                _candles: &[Candle],
            ) -> EngineResult<Option<Signal>> {
                panic!("window arithmetic overflowed")
            }
        }

        let store = store_with_closes(&[100.0; 4]);
        let settings = EngineSettings::default();
        let simulator = BacktestSimulator::new(&store, &settings);
        let handle = RunStatusHandle::new();
        let run = simulator.execute_guarded(
            BacktestRun::new("guarded".to_string(), config(0.0, 0.0)),
            &Panics,
            &RunControl::default(),
            &handle,
        );
        assert_eq!(run.id, "guarded");
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(
            run.error,
            Some(EngineError::Aborted("window arithmetic overflowed".to_string()))
        );
        assert_eq!(handle.snapshot().status, RunStatus::Failed);
        assert!(handle.snapshot().error.is_some());
    }

    #[test]
    fn oversized_window_parameters_complete_without_trades() {
        let store = store_with_closes(&[100.0; 40]);
        let settings = EngineSettings::default();
        let simulator = BacktestSimulator::new(&store, &settings);
        for id in StrategyId::ALL {
            let mut cfg = config(0.0, 0.0);
            cfg.strategy_id = id.as_str().to_string();
            for key in [
                "volumeLookback",
                "rsiPeriod",
                "slowPeriod",
                "signalPeriod",
                "profileLookback",
                "swingLookback",
                "levelLookback",
            ] {
                cfg.parameters.insert(key.to_string(), 1e30);
            }
            let run = simulator.run(cfg).unwrap();
            assert_eq!(run.status, RunStatus::Completed, "{}", id);
            assert!(run.trades.is_empty(), "{}", id);
            assert!(run.equity_curve.is_empty(), "{}", id);
        }
    }

    #[test]
    fn prepare_rejects_unknown_strategy_and_bad_config() {
        let store = InMemoryCandleStore::new();
        let settings = EngineSettings::default();
        let simulator = BacktestSimulator::new(&store, &settings);
        assert_eq!(
            simulator.prepare(config(0.0, 0.0)).unwrap_err(),
            EngineError::StrategyNotFound("mock".to_string())
        );

        let mut bad = config(0.0, 0.0);
        bad.strategy_id = "macd_rsi".to_string();
        bad.initial_capital = 1.0;
        assert!(matches!(
            simulator.prepare(bad),
            Err(EngineError::InvalidConfig(_))
        ));
    }
}
