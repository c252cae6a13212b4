//! View-model adapters: thin consumers that subscribe to a channel, run the
//! reconciler, and hold UI-ready derived state. Each feed owns its view state
//! exclusively and rebuilds it on every push.

use crate::cache::{
    CachedSection, WarmCache, COMPLETED_TRADES_CACHE_KEY, MODELCHAT_CACHE_KEY, POSITIONS_CACHE_KEY,
};
use crate::catalog::ModelCatalog;
use crate::stream::bus::Subscription;
use crate::stream::channel::ConnectionChannel;
use crate::stream::reconcile::{
    build_latest_values, build_merged_series, merge_series_incremental, LatestValue, MergedSeries,
};
use crate::stream::types::{
    ChatRecord, DataPoint, EntityHistory, ModelDataPayload, ModelUpdate, PositionRecord,
    PricePayload, PriceTick, TradeRecord, UpdateSection,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;

pub const DEFAULT_TOP_PERFORMERS: usize = 6;

// ============================================================================
// Price board
// ============================================================================

/// Latest price per symbol, replaced wholesale on every price push.
pub struct PriceBoardFeed {
    board: Arc<RwLock<HashMap<String, PriceTick>>>,
    _subscription: Subscription,
}

impl PriceBoardFeed {
    pub fn attach(channel: &ConnectionChannel<PricePayload>) -> Self {
        let board = Arc::new(RwLock::new(HashMap::new()));
        let state = Arc::clone(&board);
        let subscription = channel.subscribe(move |payload: &PricePayload| {
            *state.write() = payload.data.clone();
        });
        Self {
            board,
            _subscription: subscription,
        }
    }

    pub fn price_for(&self, symbol: &str) -> Option<PriceTick> {
        self.board.read().get(symbol).cloned()
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.board.read().keys().cloned().collect();
        symbols.sort_unstable();
        symbols
    }
}

// ============================================================================
// Chart
// ============================================================================

/// Merged chart series over the model-data stream. Full-replacement payloads
/// swap the series out; append-style payloads merge into it, bounded to
/// `capacity` points.
pub struct ChartFeed {
    series: Arc<RwLock<MergedSeries>>,
    _subscription: Subscription,
}

impl ChartFeed {
    pub fn attach(channel: &ConnectionChannel<ModelDataPayload>, capacity: usize) -> Self {
        let series = Arc::new(RwLock::new(MergedSeries::default()));
        let state = Arc::clone(&series);
        let subscription = channel.subscribe(move |payload: &ModelDataPayload| {
            let mut writable = state.write();
            let next = if payload.kind.is_full_replacement() || writable.points.is_empty() {
                build_merged_series(payload)
            } else {
                merge_series_incremental(&writable, payload, capacity)
            };
            *writable = next;
        });
        Self {
            series,
            _subscription: subscription,
        }
    }

    pub fn snapshot(&self) -> MergedSeries {
        self.series.read().clone()
    }

    pub fn entity_names(&self) -> Vec<String> {
        self.series.read().entity_names.clone()
    }
}

// ============================================================================
// Summary
// ============================================================================

/// Latest-value projection per entity. Entities absent from a later payload
/// keep their previously seen values (last-value-wins client).
pub struct SummaryFeed {
    latest: Arc<RwLock<BTreeMap<String, LatestValue>>>,
    _subscription: Subscription,
}

impl SummaryFeed {
    pub fn attach(channel: &ConnectionChannel<ModelDataPayload>) -> Self {
        let latest = Arc::new(RwLock::new(BTreeMap::new()));
        let state = Arc::clone(&latest);
        let subscription = channel.subscribe(move |payload: &ModelDataPayload| {
            let fresh = build_latest_values(payload);
            state.write().extend(fresh);
        });
        Self {
            latest,
            _subscription: subscription,
        }
    }

    pub fn latest_values(&self) -> BTreeMap<String, LatestValue> {
        self.latest.read().clone()
    }

    pub fn top_performers(&self, limit: usize) -> Vec<(String, LatestValue)> {
        let mut entries: Vec<(String, LatestValue)> = self
            .latest
            .read()
            .iter()
            .map(|(id, value)| (id.clone(), value.clone()))
            .collect();
        entries.sort_by(|a, b| {
            let left = a.1.account_value.unwrap_or(0.0);
            let right = b.1.account_value.unwrap_or(0.0);
            right.total_cmp(&left)
        });
        entries.truncate(limit);
        entries
    }
}

// ============================================================================
// Leaderboard
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardRow {
    pub rank: u32,
    pub entity_id: String,
    pub display_name: String,
    pub code_name: Option<String>,
    pub account_value: f64,
    pub return_percent: f64,
    pub total_pnl: f64,
    pub fees: f64,
    pub trades: i64,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub provider: Option<String>,
}

/// Ranked models: static REST metadata decorated with the freshest stream
/// values. Rows re-rank on every read so live pushes reorder the board.
pub struct LeaderboardFeed {
    catalog: Arc<RwLock<ModelCatalog>>,
    latest: Arc<RwLock<BTreeMap<String, LatestValue>>>,
    _subscription: Subscription,
}

impl LeaderboardFeed {
    pub fn attach(channel: &ConnectionChannel<ModelDataPayload>) -> Self {
        let latest = Arc::new(RwLock::new(BTreeMap::new()));
        let state = Arc::clone(&latest);
        let subscription = channel.subscribe(move |payload: &ModelDataPayload| {
            let fresh = build_latest_values(payload);
            state.write().extend(fresh);
        });
        Self {
            catalog: Arc::new(RwLock::new(ModelCatalog::default())),
            latest,
            _subscription: subscription,
        }
    }

    pub fn set_catalog(&self, catalog: ModelCatalog) {
        *self.catalog.write() = catalog;
    }

    pub fn rows(&self) -> Vec<LeaderboardRow> {
        build_leaderboard(&self.catalog.read(), &self.latest.read())
    }
}

/// Builds the ranked board from catalog metadata overlaid with stream values.
/// Models without trading data are excluded; stream-only entities (not yet in
/// the catalog) still get a row so a stale catalog cannot hide live models.
pub fn build_leaderboard(
    catalog: &ModelCatalog,
    latest: &BTreeMap<String, LatestValue>,
) -> Vec<LeaderboardRow> {
    let mut rows: Vec<LeaderboardRow> = Vec::new();

    for model in catalog.models() {
        let entity_id = model.id.to_string();
        let live = latest.get(&entity_id);
        if !model.has_trading_data() && live.is_none() {
            continue;
        }

        rows.push(LeaderboardRow {
            rank: 0,
            entity_id,
            display_name: model.display_name.clone(),
            code_name: Some(model.code_name.clone()),
            account_value: live
                .and_then(|value| value.account_value)
                .or(model.account_value)
                .unwrap_or(0.0),
            return_percent: live
                .and_then(|value| value.return_value)
                .or(model.return_pct)
                .unwrap_or(0.0),
            total_pnl: live
                .and_then(|value| value.total_pnl)
                .or(model.pnl)
                .unwrap_or(0.0),
            fees: live
                .and_then(|value| value.fees)
                .or(model.trading_cost)
                .unwrap_or(0.0),
            trades: live
                .and_then(|value| value.trades)
                .or(model.trades)
                .unwrap_or(0),
            color: model.color.clone(),
            icon: model.icon.clone(),
            provider: model.provider.clone(),
        });
    }

    for (entity_id, value) in latest {
        if catalog.get(entity_id).is_some() {
            continue;
        }
        rows.push(LeaderboardRow {
            rank: 0,
            entity_id: entity_id.clone(),
            display_name: value.display_name.clone(),
            code_name: None,
            account_value: value.account_value.unwrap_or(0.0),
            return_percent: value.return_value.unwrap_or(0.0),
            total_pnl: value.total_pnl.unwrap_or(0.0),
            fees: value.fees.unwrap_or(0.0),
            trades: value.trades.unwrap_or(0),
            color: None,
            icon: None,
            provider: None,
        });
    }

    rows.sort_by(|a, b| b.account_value.total_cmp(&a.account_value));
    for (index, row) in rows.iter_mut().enumerate() {
        row.rank = index as u32 + 1;
    }
    rows
}

// ============================================================================
// Per-entity detail
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct EntityDetail {
    pub entity_id: String,
    pub display_name: String,
    pub latest: Option<LatestValue>,
    pub history: Vec<DataPoint>,
}

/// Per-entity drill-down: the full (time-sorted) history and latest point of
/// one tracked model.
pub struct DetailFeed {
    histories: Arc<RwLock<BTreeMap<String, EntityHistory>>>,
    latest: Arc<RwLock<BTreeMap<String, LatestValue>>>,
    _subscription: Subscription,
}

impl DetailFeed {
    pub fn attach(channel: &ConnectionChannel<ModelDataPayload>) -> Self {
        let histories = Arc::new(RwLock::new(BTreeMap::new()));
        let latest = Arc::new(RwLock::new(BTreeMap::new()));
        let history_state = Arc::clone(&histories);
        let latest_state = Arc::clone(&latest);
        let subscription = channel.subscribe(move |payload: &ModelDataPayload| {
            latest_state.write().extend(build_latest_values(payload));
            let mut writable = history_state.write();
            for (entity_id, history) in &payload.entities {
                writable.insert(entity_id.clone(), history.clone());
            }
        });
        Self {
            histories,
            latest,
            _subscription: subscription,
        }
    }

    pub fn detail_for(&self, entity_id: &str) -> Option<EntityDetail> {
        let history = self.histories.read().get(entity_id).cloned()?;
        let mut data_points = history.data_points;
        data_points.sort_by_key(|point| point.created_at);

        Some(EntityDetail {
            entity_id: entity_id.to_string(),
            display_name: history.display_name,
            latest: self.latest.read().get(entity_id).cloned(),
            history: data_points,
        })
    }

    pub fn entity_ids(&self) -> Vec<String> {
        self.histories.read().keys().cloned().collect()
    }
}

// ============================================================================
// Sidebar (positions / chat / completed trades)
// ============================================================================

/// Holds the sidebar sections carried by the model-update stream and mirrors
/// every accepted section into the warm cache so a restart before the next
/// push still has something to render.
pub struct SidebarFeed {
    positions: Arc<RwLock<Option<UpdateSection<PositionRecord>>>>,
    chat: Arc<RwLock<Option<UpdateSection<ChatRecord>>>>,
    trades: Arc<RwLock<Option<UpdateSection<TradeRecord>>>>,
    cache: Option<WarmCache>,
    _subscription: Subscription,
}

impl SidebarFeed {
    pub fn attach(channel: &ConnectionChannel<ModelUpdate>, cache: Option<WarmCache>) -> Self {
        let positions = Arc::new(RwLock::new(None));
        let chat = Arc::new(RwLock::new(None));
        let trades = Arc::new(RwLock::new(None));

        let positions_state = Arc::clone(&positions);
        let chat_state = Arc::clone(&chat);
        let trades_state = Arc::clone(&trades);
        let callback_cache = cache.clone();

        let subscription = channel.subscribe(move |update: &ModelUpdate| {
            if let Some(section) = &update.positions {
                *positions_state.write() = Some(section.clone());
                mirror_section(&callback_cache, POSITIONS_CACHE_KEY, section);
            }
            if let Some(section) = &update.chat {
                *chat_state.write() = Some(section.clone());
                mirror_section(&callback_cache, MODELCHAT_CACHE_KEY, section);
            }
            if let Some(section) = &update.trades {
                *trades_state.write() = Some(section.clone());
                mirror_section(&callback_cache, COMPLETED_TRADES_CACHE_KEY, section);
            }
        });

        Self {
            positions,
            chat,
            trades,
            cache,
            _subscription: subscription,
        }
    }

    /// Loads cached sections for anything that has not yet seen a live push.
    /// Live data always wins over the warm cache.
    pub async fn hydrate_from_cache(&self) {
        let Some(cache) = &self.cache else {
            return;
        };

        if self.positions.read().is_none() {
            if let Some(section) = cache.get::<PositionRecord>(POSITIONS_CACHE_KEY).await {
                let mut slot = self.positions.write();
                if slot.is_none() {
                    *slot = Some(UpdateSection {
                        data: section.data,
                        timestamp: section.timestamp,
                    });
                }
            }
        }
        if self.chat.read().is_none() {
            if let Some(section) = cache.get::<ChatRecord>(MODELCHAT_CACHE_KEY).await {
                let mut slot = self.chat.write();
                if slot.is_none() {
                    *slot = Some(UpdateSection {
                        data: section.data,
                        timestamp: section.timestamp,
                    });
                }
            }
        }
        if self.trades.read().is_none() {
            if let Some(section) = cache.get::<TradeRecord>(COMPLETED_TRADES_CACHE_KEY).await {
                let mut slot = self.trades.write();
                if slot.is_none() {
                    *slot = Some(UpdateSection {
                        data: section.data,
                        timestamp: section.timestamp,
                    });
                }
            }
        }
    }

    pub fn positions(&self) -> Option<UpdateSection<PositionRecord>> {
        self.positions.read().clone()
    }

    pub fn chat(&self) -> Option<UpdateSection<ChatRecord>> {
        self.chat.read().clone()
    }

    pub fn trades(&self) -> Option<UpdateSection<TradeRecord>> {
        self.trades.read().clone()
    }
}

fn mirror_section<T: Serialize + Clone + Send + Sync + 'static>(
    cache: &Option<WarmCache>,
    key: &'static str,
    section: &UpdateSection<T>,
) {
    let Some(cache) = cache else {
        return;
    };

    let cache = cache.clone();
    let cached = CachedSection {
        data: section.data.clone(),
        timestamp: section.timestamp.clone(),
    };

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(error) = cache.put(key, &cached).await {
                    warn!(key, %error, "warm cache write failed");
                }
            });
        }
        Err(_) => warn!(key, "no runtime available for warm cache write"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelInfo;
    use chrono::{TimeZone, Utc};

    fn latest(name: &str, minute: u32, account_value: f64) -> LatestValue {
        LatestValue {
            display_name: name.to_string(),
            timestamp: Utc
                .with_ymd_and_hms(2025, 11, 2, 10, minute, 0)
                .single()
                .expect("valid timestamp"),
            account_value: Some(account_value),
            return_value: Some(1.5),
            total_pnl: Some(account_value - 100.0),
            trades: Some(4),
            fees: Some(0.5),
        }
    }

    fn model(id: i64, name: &str, account_value: Option<f64>) -> ModelInfo {
        ModelInfo {
            id,
            display_name: name.to_string(),
            code_name: format!("{}-1", name.to_lowercase()),
            account_value,
            return_pct: Some(0.0),
            pnl: Some(0.0),
            trading_cost: Some(0.0),
            trades: Some(0),
            rank: None,
            color: Some("#22c55e".to_string()),
            icon: None,
            provider: Some("test".to_string()),
        }
    }

    #[test]
    fn leaderboard_sorts_by_account_value_and_assigns_ranks() {
        let catalog = ModelCatalog::from_models(vec![
            model(1, "Alpha", Some(100.0)),
            model(2, "Beta", Some(300.0)),
            model(3, "Gamma", Some(200.0)),
        ]);

        let rows = build_leaderboard(&catalog, &BTreeMap::new());

        let names: Vec<&str> = rows.iter().map(|row| row.display_name.as_str()).collect();
        assert_eq!(names, vec!["Beta", "Gamma", "Alpha"]);
        assert_eq!(rows[0].rank, 1);
        assert_eq!(rows[2].rank, 3);
    }

    #[test]
    fn leaderboard_excludes_models_without_trading_data() {
        let catalog = ModelCatalog::from_models(vec![
            model(1, "Alpha", Some(100.0)),
            model(2, "Pending", None),
        ]);

        let rows = build_leaderboard(&catalog, &BTreeMap::new());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].display_name, "Alpha");
    }

    #[test]
    fn leaderboard_overlays_live_values_over_catalog() {
        let catalog = ModelCatalog::from_models(vec![
            model(1, "Alpha", Some(100.0)),
            model(2, "Beta", Some(300.0)),
        ]);
        let mut live = BTreeMap::new();
        live.insert("1".to_string(), latest("Alpha", 5, 900.0));

        let rows = build_leaderboard(&catalog, &live);
        assert_eq!(rows[0].display_name, "Alpha");
        assert_eq!(rows[0].account_value, 900.0);
        assert_eq!(rows[0].rank, 1);
    }

    #[test]
    fn leaderboard_includes_stream_only_entities() {
        let catalog = ModelCatalog::from_models(vec![model(1, "Alpha", Some(100.0))]);
        let mut live = BTreeMap::new();
        live.insert("42".to_string(), latest("Newcomer", 5, 500.0));

        let rows = build_leaderboard(&catalog, &live);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].display_name, "Newcomer");
        assert!(rows[0].code_name.is_none());
    }
}
