use crate::error::TerminalError;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use simd_json::prelude::*;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

pub const DEFAULT_PRICE_STREAM_URL: &str = "wss://api.alphaarena.in/api/v1/ws/price-stream";
pub const DEFAULT_MODEL_UPDATES_URL: &str = "wss://api.alphaarena.in/api/v1/ws/model-updates";
pub const DEFAULT_MODEL_DATA_URL: &str = "wss://api.alphaarena.in/api/v1/ws/modeldata-stream";
pub const DEFAULT_API_BASE_URL: &str = "https://api.alphaarena.in/api/v1";

pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;
pub const DEFAULT_SERIES_CAPACITY: usize = 1_000;
pub const MIN_SERIES_CAPACITY: usize = 10;
pub const MAX_SERIES_CAPACITY: usize = 100_000;

/// Client configuration. URLs default to the production endpoints; tests and
/// alternative deployments override them before constructing the client.
#[derive(Debug, Clone)]
pub struct TerminalConfig {
    pub price_stream_url: String,
    pub model_updates_url: String,
    pub model_data_url: String,
    pub api_base_url: String,
    pub reconnect_delay_ms: u64,
    pub series_capacity: usize,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            price_stream_url: DEFAULT_PRICE_STREAM_URL.to_string(),
            model_updates_url: DEFAULT_MODEL_UPDATES_URL.to_string(),
            model_data_url: DEFAULT_MODEL_DATA_URL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            series_capacity: DEFAULT_SERIES_CAPACITY,
        }
    }
}

impl TerminalConfig {
    pub fn normalize(self) -> Result<Self, TerminalError> {
        for (name, url) in [
            ("priceStreamUrl", &self.price_stream_url),
            ("modelUpdatesUrl", &self.model_updates_url),
            ("modelDataUrl", &self.model_data_url),
        ] {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(TerminalError::InvalidArgument(format!(
                    "{name} must be a ws:// or wss:// url"
                )));
            }
        }

        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://"))
        {
            return Err(TerminalError::InvalidArgument(
                "apiBaseUrl must be an http:// or https:// url".to_string(),
            ));
        }

        if self.reconnect_delay_ms == 0 {
            return Err(TerminalError::InvalidArgument(
                "reconnectDelayMs must be positive".to_string(),
            ));
        }

        if !(MIN_SERIES_CAPACITY..=MAX_SERIES_CAPACITY).contains(&self.series_capacity) {
            return Err(TerminalError::InvalidArgument(format!(
                "seriesCapacity must be between {MIN_SERIES_CAPACITY} and {MAX_SERIES_CAPACITY}"
            )));
        }

        Ok(self)
    }
}

/// Parses the timestamps the backend emits: RFC 3339 with offset, or a naive
/// ISO 8601 datetime which is taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

// ============================================================================
// Price stream
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PriceDirection {
    Up,
    Down,
    #[default]
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub symbol: String,
    pub price: f64,
    #[serde(default)]
    pub change_percent: f64,
    #[serde(default)]
    pub change_direction: PriceDirection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PricePayload {
    pub data: HashMap<String, PriceTick>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Deserialize)]
struct PriceWire {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<HashMap<String, PriceTick>>,
    #[serde(default)]
    timestamp: Option<String>,
}

/// Only `price_update` messages carry data; every other type on this stream
/// is ignored without being treated as an error.
pub fn decode_price_message(payload: &mut [u8]) -> Result<Option<PricePayload>, TerminalError> {
    let wire: PriceWire = simd_json::serde::from_slice(payload)?;
    if wire.kind != "price_update" {
        debug!(kind = %wire.kind, "ignoring non-price message on price stream");
        return Ok(None);
    }
    let Some(data) = wire.data else {
        return Ok(None);
    };
    Ok(Some(PricePayload {
        data,
        timestamp: wire.timestamp,
    }))
}

// ============================================================================
// Model-update stream (positions / chat / completed trades)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub asset: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub percentage: f64,
    pub value: f64,
    #[serde(default)]
    pub pnl: Option<f64>,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub last_price: Option<f64>,
    pub code_name: String,
    #[serde(default)]
    pub ai_model_id: Option<i64>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    #[serde(default)]
    pub display_name: Option<String>,
    pub code_name: String,
    #[serde(default)]
    pub ai_model_id: Option<i64>,
    #[serde(default)]
    pub model_input_prompt: Option<String>,
    #[serde(default)]
    pub model_output_prompt: Option<String>,
    #[serde(default)]
    pub last_update_time: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    #[serde(default)]
    pub display_name: Option<String>,
    pub code_name: String,
    #[serde(default)]
    pub ai_model_id: Option<i64>,
    pub asset: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub price: f64,
    pub notional_value: f64,
    #[serde(default)]
    pub last_update_time: Option<String>,
}

/// One section of a model update: the record list plus the server timestamp
/// that accompanied it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateSection<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Canonical model-update event. The wire protocol grew several shapes over
/// time (a combined envelope plus standalone legacy types); all of them are
/// normalized into this one struct at the channel boundary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelUpdate {
    pub positions: Option<UpdateSection<PositionRecord>>,
    pub chat: Option<UpdateSection<ChatRecord>>,
    pub trades: Option<UpdateSection<TradeRecord>>,
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct SectionWire<T> {
    #[serde(default)]
    data: Option<Vec<T>>,
    #[serde(default)]
    timestamp: Option<String>,
}

impl<T> SectionWire<T> {
    fn into_section(self) -> Option<UpdateSection<T>> {
        self.data.map(|data| UpdateSection {
            data,
            timestamp: self.timestamp,
        })
    }
}

#[derive(Deserialize)]
struct CombinedWire {
    #[serde(default)]
    position_updates: Option<SectionWire<PositionRecord>>,
    #[serde(default)]
    modelchat_updates: Option<SectionWire<ChatRecord>>,
    #[serde(default)]
    trade_updates: Option<SectionWire<TradeRecord>>,
}

fn non_empty_trades(section: Option<UpdateSection<TradeRecord>>) -> Option<UpdateSection<TradeRecord>> {
    match section {
        Some(section) if section.data.is_empty() => {
            warn!("trade update carried an empty record list, keeping previous trades");
            None
        }
        other => other,
    }
}

/// Single adapter for every historical shape of the model-update stream.
/// Unrecognized types are dropped quietly; malformed known types are an error
/// so the channel can log and drop the message.
pub fn decode_model_update(payload: &mut [u8]) -> Result<Option<ModelUpdate>, TerminalError> {
    let value = simd_json::to_owned_value(payload)?;
    let kind = value
        .get("type")
        .and_then(|tag| tag.as_str())
        .unwrap_or_default()
        .to_string();

    match kind.as_str() {
        "combined_update" => {
            let wire: CombinedWire = simd_json::serde::from_owned_value(value)?;
            Ok(Some(ModelUpdate {
                positions: wire.position_updates.and_then(SectionWire::into_section),
                chat: wire.modelchat_updates.and_then(SectionWire::into_section),
                trades: non_empty_trades(
                    wire.trade_updates.and_then(SectionWire::into_section),
                ),
            }))
        }
        "position_updates" => {
            let wire: SectionWire<PositionRecord> = simd_json::serde::from_owned_value(value)?;
            Ok(Some(ModelUpdate {
                positions: wire.into_section(),
                ..ModelUpdate::default()
            }))
        }
        "modelchat_updates" => {
            let wire: SectionWire<ChatRecord> = simd_json::serde::from_owned_value(value)?;
            Ok(Some(ModelUpdate {
                chat: wire.into_section(),
                ..ModelUpdate::default()
            }))
        }
        "trade_updates" | "trades_updates" | "completed_trades" => {
            let wire: SectionWire<TradeRecord> = simd_json::serde::from_owned_value(value)?;
            Ok(Some(ModelUpdate {
                trades: non_empty_trades(wire.into_section()),
                ..ModelUpdate::default()
            }))
        }
        other => {
            debug!(kind = %other, "ignoring unrecognized model-update type");
            Ok(None)
        }
    }
}

// ============================================================================
// Model-data stream (per-entity performance history)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelDataKind {
    /// `initial_modeldata`: first full load after connecting.
    InitialSnapshot,
    /// `initial_modeldata_update`: follow-up backfill of the initial window.
    InitialRefresh,
    /// `modeldata_update`: the complete current window, replacing prior state.
    Refresh,
}

impl ModelDataKind {
    /// The sender pushes the complete current window under `modeldata_update`,
    /// so that kind replaces any previously held series instead of patching it.
    pub fn is_full_replacement(self) -> bool {
        matches!(self, Self::Refresh)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub created_at: DateTime<Utc>,
    pub account_value: Option<f64>,
    pub return_value: Option<f64>,
    pub total_pnl: Option<f64>,
    pub trades: Option<i64>,
    pub fees: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityHistory {
    pub display_name: String,
    pub data_points: Vec<DataPoint>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelDataPayload {
    pub kind: ModelDataKind,
    pub entities: BTreeMap<String, EntityHistory>,
    pub timestamp: Option<String>,
}

#[derive(Deserialize)]
struct ModelDataWire {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<HashMap<String, simd_json::OwnedValue>>,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Deserialize)]
struct EntityWire {
    display_name: String,
    #[serde(default)]
    data_points: Option<Vec<simd_json::OwnedValue>>,
}

#[derive(Deserialize)]
struct DataPointWire {
    created_at: String,
    #[serde(default)]
    account_value: Option<f64>,
    #[serde(default)]
    return_value: Option<f64>,
    #[serde(default)]
    total_pnl: Option<f64>,
    #[serde(default)]
    trades: Option<i64>,
    #[serde(default)]
    fees: Option<f64>,
}

fn decode_entity(entity_id: &str, value: simd_json::OwnedValue) -> Option<EntityHistory> {
    let wire: EntityWire = match simd_json::serde::from_owned_value(value) {
        Ok(wire) => wire,
        Err(error) => {
            warn!(entity = entity_id, %error, "skipping malformed entity entry");
            return None;
        }
    };

    let mut data_points = Vec::new();
    for point in wire.data_points.unwrap_or_default() {
        let point: DataPointWire = match simd_json::serde::from_owned_value(point) {
            Ok(point) => point,
            Err(error) => {
                warn!(entity = entity_id, %error, "skipping malformed data point");
                continue;
            }
        };
        let Some(created_at) = parse_timestamp(&point.created_at) else {
            warn!(
                entity = entity_id,
                created_at = %point.created_at,
                "skipping data point with unparseable timestamp"
            );
            continue;
        };
        data_points.push(DataPoint {
            created_at,
            account_value: point.account_value,
            return_value: point.return_value,
            total_pnl: point.total_pnl,
            trades: point.trades,
            fees: point.fees,
        });
    }

    Some(EntityHistory {
        display_name: wire.display_name,
        data_points,
    })
}

/// Decodes one model-data message. Entities that fail to decode are skipped
/// individually; the rest of the payload is still delivered.
pub fn decode_model_data(payload: &mut [u8]) -> Result<Option<ModelDataPayload>, TerminalError> {
    let wire: ModelDataWire = simd_json::serde::from_slice(payload)?;

    let kind = match wire.kind.as_str() {
        "initial_modeldata" => ModelDataKind::InitialSnapshot,
        "initial_modeldata_update" => ModelDataKind::InitialRefresh,
        "modeldata_update" => ModelDataKind::Refresh,
        other => {
            debug!(kind = %other, "ignoring unrecognized model-data type");
            return Ok(None);
        }
    };

    let mut entities = BTreeMap::new();
    for (entity_id, value) in wire.data.unwrap_or_default() {
        if let Some(history) = decode_entity(&entity_id, value) {
            entities.insert(entity_id, history);
        }
    }

    Ok(Some(ModelDataPayload {
        kind,
        entities,
        timestamp: wire.timestamp,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_data(json: &str) -> Option<ModelDataPayload> {
        let mut payload = json.as_bytes().to_vec();
        decode_model_data(&mut payload).expect("payload should decode")
    }

    #[test]
    fn normalizes_config_defaults() {
        let config = TerminalConfig::default()
            .normalize()
            .expect("defaults should be valid");
        assert_eq!(config.reconnect_delay_ms, DEFAULT_RECONNECT_DELAY_MS);
        assert_eq!(config.series_capacity, DEFAULT_SERIES_CAPACITY);
    }

    #[test]
    fn rejects_non_websocket_stream_url() {
        let result = TerminalConfig {
            price_stream_url: "https://api.alphaarena.in/ws".to_string(),
            ..TerminalConfig::default()
        }
        .normalize();
        assert!(result.is_err());
    }

    #[test]
    fn parses_rfc3339_and_naive_timestamps() {
        assert!(parse_timestamp("2025-11-02T10:15:00+05:30").is_some());
        assert!(parse_timestamp("2025-11-02T10:15:00.250").is_some());
        assert!(parse_timestamp("not a timestamp").is_none());
    }

    #[test]
    fn decodes_price_update_and_ignores_other_types() {
        let mut payload = br#"{"type":"price_update","data":{"BTC":{"symbol":"BTC","price":67000.5,"change_percent":1.2,"change_direction":"up"}},"timestamp":"2025-11-02T10:15:00"}"#.to_vec();
        let decoded = decode_price_message(&mut payload)
            .expect("payload should decode")
            .expect("price_update should produce a payload");
        assert_eq!(decoded.data["BTC"].price, 67000.5);
        assert_eq!(decoded.data["BTC"].change_direction, PriceDirection::Up);

        let mut heartbeat = br#"{"type":"heartbeat"}"#.to_vec();
        assert!(decode_price_message(&mut heartbeat)
            .expect("heartbeat should decode")
            .is_none());
    }

    #[test]
    fn decodes_combined_update_envelope() {
        let mut payload = br#"{
            "type": "combined_update",
            "position_updates": {"data": [{"asset":"BTC","percentage":40.0,"value":120000.0,"code_name":"alpha-1"}], "timestamp":"2025-11-02T10:00:00"},
            "modelchat_updates": {"data": [{"code_name":"alpha-1","model_output_prompt":"holding"}]},
            "trade_updates": {"data": [{"code_name":"alpha-1","asset":"BTC","side":"BUY","quantity":0.5,"price":60000.0,"notional_value":30000.0}]}
        }"#
        .to_vec();

        let update = decode_model_update(&mut payload)
            .expect("payload should decode")
            .expect("combined_update should produce an event");

        let positions = update.positions.expect("positions section expected");
        assert_eq!(positions.data[0].asset, "BTC");
        assert_eq!(positions.timestamp.as_deref(), Some("2025-11-02T10:00:00"));
        assert_eq!(
            update.chat.expect("chat section expected").data[0]
                .model_output_prompt
                .as_deref(),
            Some("holding")
        );
        assert_eq!(
            update.trades.expect("trades section expected").data[0].side,
            TradeSide::Buy
        );
    }

    #[test]
    fn normalizes_legacy_standalone_types() {
        for kind in ["trade_updates", "trades_updates", "completed_trades"] {
            let json = format!(
                r#"{{"type":"{kind}","data":[{{"code_name":"alpha-1","asset":"ETH","side":"SELL","quantity":2.0,"price":3000.0,"notional_value":6000.0}}],"timestamp":"2025-11-02T10:00:00"}}"#
            );
            let mut payload = json.into_bytes();
            let update = decode_model_update(&mut payload)
                .expect("payload should decode")
                .expect("legacy trade type should produce an event");
            assert!(update.positions.is_none());
            assert_eq!(update.trades.expect("trades expected").data.len(), 1);
        }
    }

    #[test]
    fn drops_empty_trade_sections() {
        let mut payload =
            br#"{"type":"trade_updates","data":[],"timestamp":"2025-11-02T10:00:00"}"#.to_vec();
        let update = decode_model_update(&mut payload)
            .expect("payload should decode")
            .expect("event expected");
        assert!(update.trades.is_none());
    }

    #[test]
    fn ignores_unknown_model_update_types() {
        let mut payload = br#"{"type":"server_notice","message":"maintenance"}"#.to_vec();
        assert!(decode_model_update(&mut payload)
            .expect("payload should decode")
            .is_none());
    }

    #[test]
    fn decodes_model_data_payload() {
        let decoded = decode_data(
            r#"{"type":"initial_modeldata","data":{"1":{"display_name":"Alpha","data_points":[{"created_at":"2025-11-02T10:00:00","account_value":100.0}]}},"timestamp":"2025-11-02T10:00:01"}"#,
        )
        .expect("known type should produce a payload");

        assert_eq!(decoded.kind, ModelDataKind::InitialSnapshot);
        let entity = &decoded.entities["1"];
        assert_eq!(entity.display_name, "Alpha");
        assert_eq!(entity.data_points[0].account_value, Some(100.0));
    }

    #[test]
    fn skips_malformed_entity_but_keeps_siblings() {
        let decoded = decode_data(
            r#"{"type":"modeldata_update","data":{
                "1":{"display_name":"Alpha","data_points":[{"created_at":"2025-11-02T10:00:00","account_value":100.0}]},
                "2":{"data_points":"not-an-array"},
                "3":{"display_name":"Gamma","data_points":"not-an-array"}
            }}"#,
        )
        .expect("payload expected");

        assert!(decoded.entities.contains_key("1"));
        assert!(!decoded.entities.contains_key("2"));
        assert!(!decoded.entities.contains_key("3"));
    }

    #[test]
    fn entity_without_data_points_is_kept_empty() {
        let decoded = decode_data(
            r#"{"type":"modeldata_update","data":{"1":{"display_name":"Alpha"}}}"#,
        )
        .expect("payload expected");
        assert!(decoded.entities["1"].data_points.is_empty());
    }

    #[test]
    fn full_replacement_only_for_refresh_kind() {
        assert!(ModelDataKind::Refresh.is_full_replacement());
        assert!(!ModelDataKind::InitialSnapshot.is_full_replacement());
        assert!(!ModelDataKind::InitialRefresh.is_full_replacement());
    }
}
