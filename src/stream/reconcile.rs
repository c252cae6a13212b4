//! Pure reconciliation of raw model-data payloads into chart-ready series and
//! latest-value projections. Network delivery order is not assumed to match
//! data-timestamp order, so time order is re-established here from the
//! `created_at` fields.

use crate::stream::types::{DataPoint, ModelDataPayload};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Per-entity metrics at one timestamp of the merged series. Absent fields
/// mean the entity reported no value there; they render as gaps, not zeros.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityPoint {
    pub account_value: Option<f64>,
    pub return_value: Option<f64>,
    pub total_pnl: Option<f64>,
    pub trades: Option<i64>,
    pub fees: Option<f64>,
}

impl EntityPoint {
    fn from_data_point(point: &DataPoint) -> Self {
        Self {
            account_value: point.account_value,
            return_value: point.return_value,
            total_pnl: point.total_pnl,
            trades: point.trades,
            fees: point.fees,
        }
    }

    /// Later points win per field; fields the later point leaves empty keep
    /// the earlier value.
    fn absorb(&mut self, later: &DataPoint) {
        if later.account_value.is_some() {
            self.account_value = later.account_value;
        }
        if later.return_value.is_some() {
            self.return_value = later.return_value;
        }
        if later.total_pnl.is_some() {
            self.total_pnl = later.total_pnl;
        }
        if later.trades.is_some() {
            self.trades = later.trades;
        }
        if later.fees.is_some() {
            self.fees = later.fees;
        }
    }
}

/// One point of the merged series: a timestamp and the values of every entity
/// that reported at exactly that timestamp, keyed by display name.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<String, EntityPoint>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedSeries {
    pub points: Vec<SeriesPoint>,
    pub entity_names: Vec<String>,
    pub last_update: Option<String>,
}

/// The most recent data point of one entity, as picked by maximum
/// `created_at` with ties broken by last-seen input order.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestValue {
    pub display_name: String,
    pub timestamp: DateTime<Utc>,
    pub account_value: Option<f64>,
    pub return_value: Option<f64>,
    pub total_pnl: Option<f64>,
    pub trades: Option<i64>,
    pub fees: Option<f64>,
}

fn sorted_points(points: &[DataPoint]) -> Vec<&DataPoint> {
    let mut sorted: Vec<&DataPoint> = points.iter().collect();
    // Stable sort: equal timestamps keep input order, so "last wins" ties
    // resolve to the last-seen point.
    sorted.sort_by_key(|point| point.created_at);
    sorted
}

/// Merges every entity's history onto one ascending timestamp axis. Entities
/// only contribute values at timestamps they actually reported; there is no
/// interpolation. An empty payload yields an empty series, which callers must
/// treat as "no data yet" rather than an error.
pub fn build_merged_series(payload: &ModelDataPayload) -> MergedSeries {
    let mut entity_names = Vec::with_capacity(payload.entities.len());
    let mut per_entity: Vec<(String, BTreeMap<DateTime<Utc>, EntityPoint>)> =
        Vec::with_capacity(payload.entities.len());
    let mut axis: BTreeSet<DateTime<Utc>> = BTreeSet::new();

    for history in payload.entities.values() {
        entity_names.push(history.display_name.clone());

        let mut by_timestamp: BTreeMap<DateTime<Utc>, EntityPoint> = BTreeMap::new();
        for point in sorted_points(&history.data_points) {
            axis.insert(point.created_at);
            by_timestamp
                .entry(point.created_at)
                .and_modify(|existing| existing.absorb(point))
                .or_insert_with(|| EntityPoint::from_data_point(point));
        }
        per_entity.push((history.display_name.clone(), by_timestamp));
    }

    let points = axis
        .into_iter()
        .map(|timestamp| {
            let values = per_entity
                .iter()
                .filter_map(|(name, by_timestamp)| {
                    by_timestamp
                        .get(&timestamp)
                        .map(|value| (name.clone(), value.clone()))
                })
                .collect();
            SeriesPoint { timestamp, values }
        })
        .collect();

    MergedSeries {
        points,
        entity_names,
        last_update: payload.timestamp.clone(),
    }
}

/// Latest-value projection: entity id to its maximum-`created_at` data point.
/// Entities with no data points are omitted rather than reported as empty.
pub fn build_latest_values(payload: &ModelDataPayload) -> BTreeMap<String, LatestValue> {
    let mut latest = BTreeMap::new();

    for (entity_id, history) in &payload.entities {
        let Some(point) = sorted_points(&history.data_points).pop() else {
            continue;
        };
        latest.insert(
            entity_id.clone(),
            LatestValue {
                display_name: history.display_name.clone(),
                timestamp: point.created_at,
                account_value: point.account_value,
                return_value: point.return_value,
                total_pnl: point.total_pnl,
                trades: point.trades,
                fees: point.fees,
            },
        );
    }

    latest
}

/// Appends a new payload onto an existing series for append-style updates.
/// Timestamps already present in `existing` are dropped from the new data, so
/// redelivery of the same payload cannot accumulate duplicate points. The
/// result is trimmed to the most recent `capacity` points.
pub fn merge_series_incremental(
    existing: &MergedSeries,
    payload: &ModelDataPayload,
    capacity: usize,
) -> MergedSeries {
    let incoming = build_merged_series(payload);
    if existing.points.is_empty() {
        return bounded(incoming, capacity);
    }

    let known: BTreeSet<DateTime<Utc>> = existing
        .points
        .iter()
        .map(|point| point.timestamp)
        .collect();

    let mut points = existing.points.clone();
    points.extend(
        incoming
            .points
            .into_iter()
            .filter(|point| !known.contains(&point.timestamp)),
    );
    points.sort_by_key(|point| point.timestamp);

    let mut entity_names = existing.entity_names.clone();
    for name in incoming.entity_names {
        if !entity_names.contains(&name) {
            entity_names.push(name);
        }
    }

    bounded(
        MergedSeries {
            points,
            entity_names,
            last_update: incoming.last_update.or_else(|| existing.last_update.clone()),
        },
        capacity,
    )
}

fn bounded(mut series: MergedSeries, capacity: usize) -> MergedSeries {
    if series.points.len() > capacity {
        let overflow = series.points.len() - capacity;
        series.points.drain(0..overflow);
    }
    series
}
