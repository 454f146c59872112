use crate::backtester::BacktestScheduler;
use crate::candle_store::{CandleStore, InMemoryCandleStore};
use crate::config::{load_settings_map, EngineSettings};
use anyhow::{anyhow, Result};
use log::info;
use std::path::Path;
use std::sync::Arc;

/// Process-wide settings shared by every command.
#[derive(Clone)]
pub struct AppContext {
    settings: EngineSettings,
}

impl AppContext {
    pub async fn initialize(settings_file: Option<&Path>) -> Result<Self> {
        let settings_map = load_settings_map(settings_file)?;
        let settings = EngineSettings::from_settings_map(&settings_map)?;
        if !settings_map.is_empty() {
            info!(
                "Loaded {} engine setting override(s){}",
                settings_map.len(),
                settings_file
                    .map(|p| format!(" (file {})", p.display()))
                    .unwrap_or_default()
            );
        }
        Ok(Self::with_settings(settings))
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Loads a candle snapshot written by `generate-data`.
    pub async fn load_store(&self, data_file: &Path) -> Result<Arc<InMemoryCandleStore>> {
        if tokio::fs::metadata(data_file).await.is_err() {
            return Err(anyhow!(
                "Candle snapshot not found at {}. Create one with `generate-data` first.",
                data_file.display()
            ));
        }
        let path = data_file.to_path_buf();
        let store = tokio::task::spawn_blocking(move || InMemoryCandleStore::load_snapshot(path))
            .await??;
        Ok(Arc::new(store))
    }

    pub fn scheduler(&self, store: Arc<dyn CandleStore>) -> BacktestScheduler {
        BacktestScheduler::new(store, self.settings.clone())
    }
}
