//! REST access to the model catalog: the static metadata (names, colors,
//! providers) that decorates stream payloads carrying only ids and values.

use crate::error::TerminalError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn models_endpoint(base_url: &str) -> String {
    format!("{}/models/", base_url.trim_end_matches('/'))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: i64,
    pub display_name: String,
    pub code_name: String,
    #[serde(default)]
    pub account_value: Option<f64>,
    #[serde(default)]
    pub return_pct: Option<f64>,
    #[serde(default)]
    pub pnl: Option<f64>,
    #[serde(default)]
    pub trading_cost: Option<f64>,
    #[serde(default)]
    pub trades: Option<i64>,
    #[serde(default)]
    pub rank: Option<u32>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

impl ModelInfo {
    /// Models with a null account value have no trading data yet and are
    /// excluded from ranked views.
    pub fn has_trading_data(&self) -> bool {
        self.account_value.is_some()
    }
}

pub async fn fetch_models(client: &Client, base_url: &str) -> Result<Vec<ModelInfo>, TerminalError> {
    let endpoint = models_endpoint(base_url);
    let response = client.get(endpoint).send().await?.error_for_status()?;
    let models = response.json::<Vec<ModelInfo>>().await?;
    Ok(models)
}

/// Lookup from entity id (as the streams carry it, stringly) to the static
/// model metadata.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    by_id: HashMap<String, ModelInfo>,
}

impl ModelCatalog {
    pub fn from_models(models: Vec<ModelInfo>) -> Self {
        let by_id = models
            .into_iter()
            .map(|model| (model.id.to_string(), model))
            .collect();
        Self { by_id }
    }

    pub fn get(&self, entity_id: &str) -> Option<&ModelInfo> {
        self.by_id.get(entity_id)
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelInfo> {
        self.by_id.values()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }
}
