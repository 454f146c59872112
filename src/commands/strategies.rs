use crate::context::AppContext;
use crate::strategy::{all_strategies, Strategy};
use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyListing {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub expected_win_rate: (f64, f64),
    pub warmup_candles: usize,
}

pub async fn run(_app: &AppContext, as_json: bool) -> Result<Vec<StrategyListing>> {
    let listings: Vec<StrategyListing> = all_strategies(&HashMap::new())
        .iter()
        .map(|evaluator| {
            let info = evaluator.info();
            StrategyListing {
                id: info.id,
                name: info.name,
                description: info.description,
                expected_win_rate: info.expected_win_rate,
                warmup_candles: evaluator.min_data_points(),
            }
        })
        .collect();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&listings)?);
    } else {
        for listing in &listings {
            println!(
                "{:<12} {:<28} win {:>2.0}-{:<2.0}%  warm-up {:>3}  {}",
                listing.id,
                listing.name,
                listing.expected_win_rate.0,
                listing.expected_win_rate.1,
                listing.warmup_candles,
                listing.description
            );
        }
    }
    Ok(listings)
}
