use crate::candle_store::CandleStore;
use crate::config::EngineSettings;
use crate::engine::{BacktestSimulator, RunControl, RunOptions};
use crate::error::{EngineError, EngineResult};
use crate::models::{BacktestConfig, BacktestRun, RunStatus};
use crate::run_status::{NoopListener, RunStatusHandle, RunStatusSnapshot};
use crate::strategy::Evaluator;
use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// A backtest running on its own thread.
pub struct BacktestJob {
    id: String,
    status: RunStatusHandle,
    control: RunControl,
    handle: JoinHandle<BacktestRun>,
}

impl BacktestJob {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> RunStatus {
        self.status.snapshot().status
    }

    pub fn progress(&self) -> RunStatusSnapshot {
        self.status.snapshot()
    }

    /// Requests a stop at the next candle step.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> Result<BacktestRun> {
        self.handle
            .join()
            .map_err(|_| anyhow!("Backtest worker for {} panicked", self.id))
    }
}

struct BatchTask {
    index: usize,
    run: BacktestRun,
    strategy: Evaluator,
}

struct BatchResult {
    index: usize,
    run: BacktestRun,
}

/// Runs backtests off the caller's thread against a shared read-only store.
pub struct BacktestScheduler {
    store: Arc<dyn CandleStore>,
    settings: Arc<EngineSettings>,
}

impl BacktestScheduler {
    pub fn new(store: Arc<dyn CandleStore>, settings: EngineSettings) -> Self {
        Self {
            store,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn prepare(&self, config: BacktestConfig) -> EngineResult<(BacktestRun, Evaluator)> {
        BacktestSimulator::new(self.store.as_ref(), &self.settings).prepare(config)
    }

    /// Validates and starts one run. Unknown strategies and bad configs are
    /// rejected here, before any job exists.
    pub fn submit(&self, config: BacktestConfig, options: RunOptions) -> EngineResult<BacktestJob> {
        let (run, strategy) = self.prepare(config)?;
        let id = run.id.clone();
        let status = RunStatusHandle::new();
        let control = RunControl::new(options);

        let store = Arc::clone(&self.store);
        let settings = Arc::clone(&self.settings);
        let listener = status.clone();
        let job_control = control.clone();
        let handle = thread::spawn(move || {
            let simulator = BacktestSimulator::new(store.as_ref(), &settings);
            simulator.execute_guarded(run, &strategy, &job_control, &listener)
        });

        info!("Submitted backtest {}", id);
        Ok(BacktestJob {
            id,
            status,
            control,
            handle,
        })
    }

    /// Runs every config across worker threads and returns exactly one result per
    /// config, in input order. `on_complete` sees each run as it finishes, in
    /// completion order.
    pub fn run_batch<F>(
        &self,
        configs: Vec<BacktestConfig>,
        options: RunOptions,
        mut on_complete: F,
    ) -> Vec<EngineResult<BacktestRun>>
    where
        F: FnMut(&BacktestRun),
    {
        let total = configs.len();
        let mut results: Vec<Option<EngineResult<BacktestRun>>> =
            (0..total).map(|_| None).collect();
        let mut tasks = Vec::new();
        for (index, config) in configs.into_iter().enumerate() {
            match self.prepare(config) {
                Ok((run, strategy)) => tasks.push(BatchTask {
                    index,
                    run,
                    strategy,
                }),
                Err(err) => {
                    warn!("Rejected batch entry {}: {}", index, err);
                    results[index] = Some(Err(err));
                }
            }
        }

        let runnable = tasks.len();
        if runnable > 0 {
            let num_workers = std::cmp::min(runnable, std::cmp::max(1, num_cpus::get()));
            info!(
                "Running {} backtests on {} worker threads",
                runnable, num_workers
            );
            let started = Instant::now();

            let (task_tx, task_rx): (Sender<BatchTask>, Receiver<BatchTask>) = bounded(runnable);
            let (result_tx, result_rx): (Sender<BatchResult>, Receiver<BatchResult>) =
                bounded(runnable);

            let mut handles = Vec::with_capacity(num_workers);
            for _ in 0..num_workers {
                let rx = task_rx.clone();
                let result_tx = result_tx.clone();
                let store = Arc::clone(&self.store);
                let settings = Arc::clone(&self.settings);
                handles.push(thread::spawn(move || {
                    let simulator = BacktestSimulator::new(store.as_ref(), &settings);
                    while let Ok(task) = rx.recv() {
                        let control = RunControl::new(options);
                        let run = simulator.execute_guarded(
                            task.run,
                            &task.strategy,
                            &control,
                            &NoopListener,
                        );
                        if result_tx
                            .send(BatchResult {
                                index: task.index,
                                run,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                }));
            }
            drop(result_tx);

            for task in tasks {
                if let Err(err) = task_tx.send(task) {
                    warn!("Batch worker pool closed early: {}", err);
                    break;
                }
            }
            drop(task_tx);

            while let Ok(message) = result_rx.recv() {
                on_complete(&message.run);
                results[message.index] = Some(Ok(message.run));
            }

            for handle in handles {
                if handle.join().is_err() {
                    warn!("Backtest worker thread panicked");
                }
            }
            info!(
                "Finished {} backtests in {:.1}s",
                runnable,
                started.elapsed().as_secs_f64()
            );
        }

        results
            .into_iter()
            .enumerate()
            .map(|(index, result)| {
                result.unwrap_or_else(|| {
                    warn!("Batch entry {} produced no result", index);
                    Err(EngineError::Aborted(format!(
                        "batch entry {} was lost by its worker",
                        index
                    )))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle_store::InMemoryCandleStore;
    use crate::models::Timeframe;
    use crate::synthetic::{generate_candles, SyntheticSeries};
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::HashMap;

    fn scheduler() -> BacktestScheduler {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let candles =
            generate_candles(&SyntheticSeries::new("BTCUSDT", Timeframe::H1, start, 300)).unwrap();
        let store = InMemoryCandleStore::from_candles(candles).unwrap();
        BacktestScheduler::new(Arc::new(store), EngineSettings::default())
    }

    fn config(strategy_id: &str) -> BacktestConfig {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        BacktestConfig {
            strategy_id: strategy_id.to_string(),
            parameters: HashMap::new(),
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::H1,
            start_date: start,
            end_date: start + Duration::days(30),
            initial_capital: 10_000.0,
            fee_rate: 0.001,
            slippage_rate: 0.0005,
        }
    }

    #[test]
    fn submitted_job_completes_and_reports_progress() {
        let scheduler = scheduler();
        let job = scheduler
            .submit(config("macd_rsi"), RunOptions::default())
            .unwrap();
        assert!(!job.id().is_empty());
        let status = job.status.clone();
        let run = job.join().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        let snapshot = status.snapshot();
        assert_eq!(snapshot.status, RunStatus::Completed);
        assert_eq!(snapshot.progress(), 1.0);
        assert_eq!(run.equity_curve.len(), snapshot.total_steps);
    }

    #[test]
    fn zero_timeout_job_fails_with_timeout() {
        let scheduler = scheduler();
        let job = scheduler
            .submit(
                config("rsi_volume"),
                RunOptions::with_timeout(std::time::Duration::ZERO),
            )
            .unwrap();
        let status = job.status.clone();
        let run = job.join().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(matches!(run.error, Some(EngineError::Timeout { .. })));
        assert!(status.snapshot().error.is_some());
    }

    #[test]
    fn rejects_before_a_job_exists() {
        let scheduler = scheduler();
        assert!(matches!(
            scheduler.submit(config("unknown"), RunOptions::default()),
            Err(EngineError::StrategyNotFound(_))
        ));
    }

    #[test]
    fn batch_keeps_one_slot_per_config_with_oversized_parameters() {
        let scheduler = scheduler();
        let mut poisoned = config("rsi_volume");
        poisoned
            .parameters
            .insert("volumeLookback".to_string(), 1e30);
        let configs = vec![poisoned, config("macd_rsi"), config("order_flow")];
        let results = scheduler.run_batch(configs, RunOptions::default(), |_| {});
        assert_eq!(results.len(), 3);
        let ids: Vec<&str> = results
            .iter()
            .map(|r| r.as_ref().unwrap().config.strategy_id.as_str())
            .collect();
        assert_eq!(ids, vec!["rsi_volume", "macd_rsi", "order_flow"]);
        let first = results[0].as_ref().unwrap();
        assert_eq!(first.status, RunStatus::Completed);
        assert!(first.trades.is_empty());
        for run in results.iter().flatten() {
            assert_eq!(run.status, RunStatus::Completed);
        }
    }

    #[test]
    fn batch_preserves_input_order() {
        let scheduler = scheduler();
        let configs = vec![
            config("ema_ribbon"),
            config("nope"),
            config("order_flow"),
            config("smart_money"),
        ];
        let mut completed = 0;
        let results = scheduler.run_batch(configs, RunOptions::default(), |_| completed += 1);
        assert_eq!(completed, 3);
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].as_ref().unwrap().config.strategy_id, "ema_ribbon");
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap().config.strategy_id, "order_flow");
        assert_eq!(results[3].as_ref().unwrap().config.strategy_id, "smart_money");
        for run in results.iter().flatten() {
            assert_eq!(run.status, RunStatus::Completed);
        }
    }
}
