use crate::stream::bus::{Subscription, SubscriptionBus};
use crate::stream::channel::{ChannelState, ConnectionChannel};
use crate::stream::transport::SocketTransport;
use crate::stream::types::{
    decode_model_data, decode_model_update, decode_price_message, ModelDataPayload, ModelUpdate,
    PricePayload, TerminalConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const PRICE_CHANNEL: &str = "price";
pub const MODEL_CHANNEL: &str = "model";
pub const MODEL_DATA_CHANNEL: &str = "model-data";

/// Aggregate status across the three stream channels. The precedence is fixed
/// because the UI connection indicator keys off it: fully connected beats
/// connecting, connecting beats partial, partial beats disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverallStatus {
    Connected,
    Connecting,
    Partial,
    Disconnected,
}

pub fn combine_status(states: [ChannelState; 3]) -> OverallStatus {
    if states.iter().all(|state| *state == ChannelState::Open) {
        return OverallStatus::Connected;
    }
    if states.iter().any(|state| *state == ChannelState::Connecting) {
        return OverallStatus::Connecting;
    }
    if states.iter().any(|state| *state == ChannelState::Open) {
        return OverallStatus::Partial;
    }
    OverallStatus::Disconnected
}

/// Owns the three named channels (price ticker, model updates, model-data
/// history) and recomputes the aggregate status whenever any of them moves.
pub struct ConnectionManager {
    price: ConnectionChannel<PricePayload>,
    model: ConnectionChannel<ModelUpdate>,
    model_data: ConnectionChannel<ModelDataPayload>,
    status_bus: SubscriptionBus<OverallStatus>,
    _child_subscriptions: Vec<Subscription>,
}

impl ConnectionManager {
    pub fn new(config: &TerminalConfig, transport: Arc<dyn SocketTransport>) -> Self {
        let reconnect_delay = Duration::from_millis(config.reconnect_delay_ms);

        let price = ConnectionChannel::new(
            PRICE_CHANNEL,
            config.price_stream_url.clone(),
            Arc::clone(&transport),
            decode_price_message,
            reconnect_delay,
        );
        let model = ConnectionChannel::new(
            MODEL_CHANNEL,
            config.model_updates_url.clone(),
            Arc::clone(&transport),
            decode_model_update,
            reconnect_delay,
        );
        let model_data = ConnectionChannel::new(
            MODEL_DATA_CHANNEL,
            config.model_data_url.clone(),
            transport,
            decode_model_data,
            reconnect_delay,
        );

        let status_bus = SubscriptionBus::new("connection-status");

        let recompute = {
            let price = price.clone();
            let model = model.clone();
            let model_data = model_data.clone();
            let status_bus = status_bus.clone();
            move || {
                status_bus.publish(combine_status([
                    price.state(),
                    model.state(),
                    model_data.state(),
                ]));
            }
        };

        let child_subscriptions = vec![
            price.subscribe_status({
                let recompute = recompute.clone();
                move |_state| recompute()
            }),
            model.subscribe_status({
                let recompute = recompute.clone();
                move |_state| recompute()
            }),
            model_data.subscribe_status({
                let recompute = recompute.clone();
                move |_state| recompute()
            }),
        ];

        // Prime the bus so status subscribers always get the current value
        // immediately, even before any channel has moved.
        status_bus.publish(combine_status([
            price.state(),
            model.state(),
            model_data.state(),
        ]));

        Self {
            price,
            model,
            model_data,
            status_bus,
            _child_subscriptions: child_subscriptions,
        }
    }

    pub fn connect_all(&self) {
        self.price.connect();
        self.model.connect();
        self.model_data.connect();
    }

    pub fn disconnect_all(&self) {
        self.price.disconnect();
        self.model.disconnect();
        self.model_data.disconnect();
    }

    /// Re-issues `connect` on any channel that is not open. Safe to call
    /// redundantly; used when the page becomes visible again or the network
    /// comes back online.
    pub fn ensure_connected(&self) {
        debug!(status = ?self.overall_status(), "ensuring stream connections");
        if !self.price.is_open() {
            self.price.connect();
        }
        if !self.model.is_open() {
            self.model.connect();
        }
        if !self.model_data.is_open() {
            self.model_data.connect();
        }
    }

    pub fn overall_status(&self) -> OverallStatus {
        combine_status([
            self.price.state(),
            self.model.state(),
            self.model_data.state(),
        ])
    }

    /// Subscribes to aggregate status changes; the current status is replayed
    /// to the listener immediately.
    pub fn subscribe_status(
        &self,
        callback: impl Fn(&OverallStatus) + Send + Sync + 'static,
    ) -> Subscription {
        self.status_bus.subscribe(callback)
    }

    pub fn price(&self) -> &ConnectionChannel<PricePayload> {
        &self.price
    }

    pub fn model_updates(&self) -> &ConnectionChannel<ModelUpdate> {
        &self.model
    }

    pub fn model_data(&self) -> &ConnectionChannel<ModelDataPayload> {
        &self.model_data
    }
}
