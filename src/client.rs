//! Composition root. The terminal client is constructed explicitly (no
//! module-level singleton) so applications and tests wire in their own
//! transport and cache.

use crate::cache::WarmCache;
use crate::catalog::{fetch_models, ModelCatalog};
use crate::error::TerminalError;
use crate::stream::bus::Subscription;
use crate::stream::feeds::{
    ChartFeed, DetailFeed, LeaderboardFeed, PriceBoardFeed, SidebarFeed, SummaryFeed,
};
use crate::stream::manager::{ConnectionManager, OverallStatus};
use crate::stream::transport::{SocketTransport, TungsteniteTransport};
use crate::stream::types::TerminalConfig;
use std::sync::Arc;
use tracing::info;

pub struct TerminalClient {
    config: TerminalConfig,
    http: reqwest::Client,
    manager: ConnectionManager,
    prices: PriceBoardFeed,
    chart: ChartFeed,
    leaderboard: LeaderboardFeed,
    summary: SummaryFeed,
    detail: DetailFeed,
    sidebar: SidebarFeed,
}

impl TerminalClient {
    pub fn new(
        config: TerminalConfig,
        transport: Arc<dyn SocketTransport>,
        cache: Option<WarmCache>,
    ) -> Result<Self, TerminalError> {
        let config = config.normalize()?;
        let manager = ConnectionManager::new(&config, transport);

        let prices = PriceBoardFeed::attach(manager.price());
        let chart = ChartFeed::attach(manager.model_data(), config.series_capacity);
        let leaderboard = LeaderboardFeed::attach(manager.model_data());
        let summary = SummaryFeed::attach(manager.model_data());
        let detail = DetailFeed::attach(manager.model_data());
        let sidebar = SidebarFeed::attach(manager.model_updates(), cache);

        Ok(Self {
            config,
            http: reqwest::Client::new(),
            manager,
            prices,
            chart,
            leaderboard,
            summary,
            detail,
            sidebar,
        })
    }

    /// Client against the real websocket transport.
    pub fn with_live_transport(
        config: TerminalConfig,
        cache: Option<WarmCache>,
    ) -> Result<Self, TerminalError> {
        Self::new(config, Arc::new(TungsteniteTransport), cache)
    }

    pub fn connect(&self) {
        self.manager.connect_all();
    }

    pub fn disconnect(&self) {
        self.manager.disconnect_all();
    }

    /// Reaction to the environment coming back (page visible again, network
    /// online): reconnect whatever is not open. Safe to call redundantly.
    pub fn ensure_connected(&self) {
        self.manager.ensure_connected();
    }

    pub fn overall_status(&self) -> OverallStatus {
        self.manager.overall_status()
    }

    pub fn subscribe_status(
        &self,
        callback: impl Fn(&OverallStatus) + Send + Sync + 'static,
    ) -> Subscription {
        self.manager.subscribe_status(callback)
    }

    /// Fetches the model catalog over REST and hands it to the leaderboard.
    /// A failure here never touches the stream channels; callers surface it
    /// as an error state and retry on their own schedule.
    pub async fn refresh_catalog(&self) -> Result<usize, TerminalError> {
        let models = fetch_models(&self.http, &self.config.api_base_url).await?;
        let count = models.len();
        info!(count, "model catalog refreshed");
        self.leaderboard.set_catalog(ModelCatalog::from_models(models));
        Ok(count)
    }

    /// Restores sidebar sections from the warm cache for anything that has
    /// not yet seen a live push.
    pub async fn hydrate_from_cache(&self) {
        self.sidebar.hydrate_from_cache().await;
    }

    pub fn config(&self) -> &TerminalConfig {
        &self.config
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn prices(&self) -> &PriceBoardFeed {
        &self.prices
    }

    pub fn chart(&self) -> &ChartFeed {
        &self.chart
    }

    pub fn leaderboard(&self) -> &LeaderboardFeed {
        &self.leaderboard
    }

    pub fn summary(&self) -> &SummaryFeed {
        &self.summary
    }

    pub fn detail(&self) -> &DetailFeed {
        &self.detail
    }

    pub fn sidebar(&self) -> &SidebarFeed {
        &self.sidebar
    }
}
