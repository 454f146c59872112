use crate::candle_utils::{group_candles_by_series, normalize_symbol, sort_and_dedup, SeriesKey};
use crate::error::{EngineError, EngineResult};
use crate::models::{Candle, Timeframe};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

const CANDLE_SNAPSHOT_VERSION: u32 = 1;

/// Inclusive open-time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Read side of candle storage. Results are ascending by open time with no gap filling.
pub trait CandleStore: Send + Sync {
    fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        range: Option<DateRange>,
    ) -> EngineResult<Vec<Candle>>;

    fn latest_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> EngineResult<Vec<Candle>>;
}

#[derive(Serialize, Deserialize)]
struct CandleSnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    candles: Vec<Candle>,
}

/// Candle series held in a sharded map; readers clone an `Arc` and never block writers for long.
#[derive(Default)]
pub struct InMemoryCandleStore {
    series: DashMap<SeriesKey, Arc<Vec<Candle>>>,
}

impl InMemoryCandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_candles(candles: Vec<Candle>) -> EngineResult<Self> {
        let store = Self::new();
        store.insert(candles)?;
        Ok(store)
    }

    /// Validates and merges candles into their series. Returns the number accepted.
    pub fn insert(&self, candles: Vec<Candle>) -> EngineResult<usize> {
        for candle in &candles {
            candle.validate()?;
        }
        let count = candles.len();
        for (key, incoming) in group_candles_by_series(candles) {
            let mut entry = self.series.entry(key).or_default();
            let mut merged: Vec<Candle> = (**entry).clone();
            merged.extend(incoming);
            *entry = Arc::new(sort_and_dedup(merged));
        }
        Ok(count)
    }

    pub fn series_keys(&self) -> Vec<SeriesKey> {
        let mut keys: Vec<SeriesKey> = self.series.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn candle_count(&self) -> usize {
        self.series.iter().map(|e| e.value().len()).sum()
    }

    fn series(&self, symbol: &str, timeframe: Timeframe) -> EngineResult<Arc<Vec<Candle>>> {
        let symbol = normalize_symbol(symbol)
            .ok_or_else(|| EngineError::Store("symbol is empty".to_string()))?;
        Ok(self
            .series
            .get(&(symbol, timeframe))
            .map(|entry| Arc::clone(entry.value()))
            .unwrap_or_default())
    }

    pub fn load_snapshot<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open candle snapshot at {}", path.display()))?;
        let reader = BufReader::new(file);
        let snapshot: CandleSnapshot =
            bincode::deserialize_from(reader).context("Snapshot decode failed")?;

        if snapshot.version != CANDLE_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Candle snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                CANDLE_SNAPSHOT_VERSION
            ));
        }

        let store = Self::from_candles(snapshot.candles)
            .with_context(|| format!("Invalid candle data in {}", path.display()))?;
        info!(
            "Loaded {} candles across {} series from snapshot generated at {}",
            store.candle_count(),
            store.series.len(),
            snapshot.generated_at
        );
        Ok(store)
    }

    pub fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path)
            .with_context(|| format!("Unable to create candle snapshot at {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        let candles: Vec<Candle> = self
            .series_keys()
            .into_iter()
            .filter_map(|key| self.series.get(&key).map(|e| Arc::clone(e.value())))
            .flat_map(|series| series.as_ref().clone())
            .collect();
        let snapshot = CandleSnapshot {
            version: CANDLE_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            candles,
        };
        bincode::serialize_into(&mut writer, &snapshot)
            .context("Failed to serialize candle snapshot")?;
        writer
            .flush()
            .context("Failed to flush candle snapshot to disk")?;
        Ok(())
    }
}

impl CandleStore for InMemoryCandleStore {
    fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        range: Option<DateRange>,
    ) -> EngineResult<Vec<Candle>> {
        let series = self.series(symbol, timeframe)?;
        Ok(match range {
            Some(range) => series
                .iter()
                .filter(|c| range.contains(c.open_time))
                .cloned()
                .collect(),
            None => series.as_ref().clone(),
        })
    }

    fn latest_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> EngineResult<Vec<Candle>> {
        let series = self.series(symbol, timeframe)?;
        let start = series.len().saturating_sub(count);
        Ok(series[start..].to_vec())
    }
}
