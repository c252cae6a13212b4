//! Best-effort warm cache: the last-known positions, model chat, and
//! completed trades are mirrored into key-scoped SQLite rows so a restart
//! before the next push still has something to render. Reads validate the
//! stored shape and fall back to "nothing cached" on any mismatch; the sync
//! core never depends on this data being present or valid.

use crate::error::TerminalError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

pub const POSITIONS_CACHE_KEY: &str = "positions_data";
pub const MODELCHAT_CACHE_KEY: &str = "modelchat_data";
pub const COMPLETED_TRADES_CACHE_KEY: &str = "completed_trades_data";

fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}

/// What one cache row holds: the record list plus the server timestamp that
/// accompanied it on the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSection<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Clone)]
pub struct WarmCache {
    pool: SqlitePool,
}

impl WarmCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn put<T: Serialize>(
        &self,
        key: &str,
        section: &CachedSection<T>,
    ) -> Result<(), TerminalError> {
        let payload_json = serde_json::to_string(section)?;

        sqlx::query(
            "INSERT INTO warm_cache (cache_key, payload_json, updated_at_ms) VALUES (?, ?, ?) \
             ON CONFLICT(cache_key) DO UPDATE SET payload_json=excluded.payload_json, updated_at_ms=excluded.updated_at_ms",
        )
        .bind(key)
        .bind(payload_json)
        .bind(now_unix_ms())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns the cached section for `key`, or `None` when nothing usable is
    /// stored. A row that fails shape validation is reported as absent rather
    /// than as an error.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<CachedSection<T>> {
        let row = match sqlx::query("SELECT payload_json FROM warm_cache WHERE cache_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(row) => row?,
            Err(error) => {
                warn!(key, %error, "warm cache read failed");
                return None;
            }
        };

        let payload_json: String = match row.try_get("payload_json") {
            Ok(payload_json) => payload_json,
            Err(error) => {
                warn!(key, %error, "warm cache row missing payload");
                return None;
            }
        };

        match serde_json::from_str(&payload_json) {
            Ok(section) => Some(section),
            Err(error) => {
                warn!(key, %error, "discarding warm cache entry with unexpected shape");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::in_memory_pool;
    use crate::stream::types::PositionRecord;

    fn position(asset: &str) -> PositionRecord {
        PositionRecord {
            asset: asset.to_string(),
            display_name: Some("Alpha".to_string()),
            percentage: 40.0,
            value: 120_000.0,
            pnl: Some(3_500.0),
            quantity: Some(2.0),
            last_price: Some(60_000.0),
            code_name: "alpha-1".to_string(),
            ai_model_id: Some(1),
            last_updated: None,
        }
    }

    #[tokio::test]
    async fn round_trips_a_cached_section() {
        let cache = WarmCache::new(in_memory_pool().await);
        let section = CachedSection {
            data: vec![position("BTC"), position("ETH")],
            timestamp: Some("2025-11-02T10:00:00".to_string()),
        };

        cache
            .put(POSITIONS_CACHE_KEY, &section)
            .await
            .expect("put should succeed");

        let loaded: CachedSection<PositionRecord> = cache
            .get(POSITIONS_CACHE_KEY)
            .await
            .expect("cached section should load");
        assert_eq!(loaded, section);
    }

    #[tokio::test]
    async fn put_overwrites_previous_value() {
        let cache = WarmCache::new(in_memory_pool().await);
        let first = CachedSection {
            data: vec![position("BTC")],
            timestamp: None,
        };
        let second = CachedSection {
            data: vec![position("SOL")],
            timestamp: Some("2025-11-02T11:00:00".to_string()),
        };

        cache.put(POSITIONS_CACHE_KEY, &first).await.expect("put");
        cache.put(POSITIONS_CACHE_KEY, &second).await.expect("put");

        let loaded: CachedSection<PositionRecord> = cache
            .get(POSITIONS_CACHE_KEY)
            .await
            .expect("cached section should load");
        assert_eq!(loaded.data[0].asset, "SOL");
    }

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let cache = WarmCache::new(in_memory_pool().await);
        let loaded: Option<CachedSection<PositionRecord>> = cache.get(MODELCHAT_CACHE_KEY).await;
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn malformed_row_is_treated_as_absent() {
        let pool = in_memory_pool().await;
        sqlx::query(
            "INSERT INTO warm_cache (cache_key, payload_json, updated_at_ms) VALUES (?, ?, ?)",
        )
        .bind(COMPLETED_TRADES_CACHE_KEY)
        .bind("{\"data\": \"not-a-list\"}")
        .bind(0_i64)
        .execute(&pool)
        .await
        .expect("seed row should insert");

        let cache = WarmCache::new(pool);
        let loaded: Option<CachedSection<PositionRecord>> =
            cache.get(COMPLETED_TRADES_CACHE_KEY).await;
        assert!(loaded.is_none());
    }
}
