use crate::error::EngineError;
use crate::models::RunStatus;
use std::sync::{Arc, Mutex};

/// Receives status transitions and step progress from a running simulation.
pub trait RunListener: Send + Sync {
    fn on_status(&self, status: RunStatus);
    fn on_progress(&self, processed: usize, total: usize);
    /// Called before the FAILED status is published.
    fn on_error(&self, _error: &EngineError) {}
}

/// Listener that drops everything.
pub struct NoopListener;

impl RunListener for NoopListener {
    fn on_status(&self, _status: RunStatus) {}
    fn on_progress(&self, _processed: usize, _total: usize) {}
}

/// Pollable run status shared between a job thread and its owner.
#[derive(Clone)]
pub struct RunStatusHandle {
    inner: Arc<Mutex<RunStatusData>>,
}

struct RunStatusData {
    status: RunStatus,
    processed_steps: usize,
    total_steps: usize,
    error: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunStatusSnapshot {
    pub status: RunStatus,
    pub processed_steps: usize,
    pub total_steps: usize,
    pub error: Option<String>,
}

impl RunStatusSnapshot {
    pub fn progress(&self) -> f64 {
        if self.total_steps == 0 {
            if self.status.is_terminal() {
                1.0
            } else {
                0.0
            }
        } else {
            self.processed_steps as f64 / self.total_steps as f64
        }
    }
}

impl Default for RunStatusHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStatusHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RunStatusData {
                status: RunStatus::Pending,
                processed_steps: 0,
                total_steps: 0,
                error: None,
            })),
        }
    }

    pub fn set_error<S: Into<String>>(&self, error: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.error = Some(error.into());
        }
    }

    pub fn snapshot(&self) -> RunStatusSnapshot {
        if let Ok(data) = self.inner.lock() {
            RunStatusSnapshot {
                status: data.status,
                processed_steps: data.processed_steps,
                total_steps: data.total_steps,
                error: data.error.clone(),
            }
        } else {
            RunStatusSnapshot {
                status: RunStatus::Failed,
                processed_steps: 0,
                total_steps: 0,
                error: Some("Status unavailable".to_string()),
            }
        }
    }
}

impl RunListener for RunStatusHandle {
    fn on_status(&self, status: RunStatus) {
        if let Ok(mut data) = self.inner.lock() {
            data.status = status;
        }
    }

    fn on_progress(&self, processed: usize, total: usize) {
        if let Ok(mut data) = self.inner.lock() {
            data.processed_steps = processed;
            data.total_steps = total;
        }
    }

    fn on_error(&self, error: &EngineError) {
        self.set_error(error.to_string());
    }
}
