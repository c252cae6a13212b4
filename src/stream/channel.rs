use crate::error::TerminalError;
use crate::stream::bus::{Subscription, SubscriptionBus};
use crate::stream::transport::{SocketEvent, SocketTransport, CLOSE_NORMAL};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

pub type Decoder<T> = Arc<dyn Fn(&mut [u8]) -> Result<Option<T>, TerminalError> + Send + Sync>;

struct ChannelInner<T> {
    name: &'static str,
    url: String,
    reconnect_delay: Duration,
    transport: Arc<dyn SocketTransport>,
    decoder: Decoder<T>,
    state: Mutex<ChannelState>,
    // Cancelling this token is how the live socket task (if any) is torn down.
    socket_session: Mutex<Option<CancellationToken>>,
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
    data_bus: SubscriptionBus<T>,
    status_bus: SubscriptionBus<ChannelState>,
}

/// One independently managed stream connection: a socket task, its reconnect
/// timer, and the data/status buses its listeners hang off.
///
/// Invariant: at most one live socket per channel. A reconnect timer is armed
/// only when the socket dies unexpectedly, never after a caller-initiated
/// `disconnect`.
pub struct ConnectionChannel<T> {
    inner: Arc<ChannelInner<T>>,
}

impl<T> Clone for ConnectionChannel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> ConnectionChannel<T> {
    pub fn new(
        name: &'static str,
        url: String,
        transport: Arc<dyn SocketTransport>,
        decoder: impl Fn(&mut [u8]) -> Result<Option<T>, TerminalError> + Send + Sync + 'static,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                name,
                url,
                reconnect_delay,
                transport,
                decoder: Arc::new(decoder),
                state: Mutex::new(ChannelState::Disconnected),
                socket_session: Mutex::new(None),
                reconnect_timer: Mutex::new(None),
                data_bus: SubscriptionBus::new(name),
                status_bus: SubscriptionBus::new(name),
            }),
        }
    }

    /// Opens the socket. No-op while a connection attempt is in flight or the
    /// socket is already open, so redundant calls (visibility changes, network
    /// coming back online) are safe.
    pub fn connect(&self) {
        connect_inner(&self.inner);
    }

    /// Caller-initiated teardown: cancels any pending reconnect timer, then
    /// detaches and closes the socket. The cancelled socket task exits without
    /// touching channel state, so stale events from it cannot race this call.
    pub fn disconnect(&self) {
        self.inner.cancel_reconnect_timer();

        let session = self.inner.socket_session.lock().take();
        if let Some(session) = session {
            *self.inner.state.lock() = ChannelState::Closing;
            session.cancel();
        }

        self.inner.set_state(ChannelState::Disconnected);
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.state.lock()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Registers a data listener. If a payload has already been received, the
    /// listener is invoked with it immediately so late subscribers are not
    /// starved until the next push.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        self.inner.data_bus.subscribe(callback)
    }

    pub fn subscribe_status(
        &self,
        callback: impl Fn(&ChannelState) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.status_bus.subscribe(callback)
    }

    pub fn last_payload(&self) -> Option<T> {
        self.inner.data_bus.last_value()
    }
}

impl<T: Clone + Send + Sync + 'static> ChannelInner<T> {
    fn set_state(&self, next: ChannelState) {
        *self.state.lock() = next;
        self.status_bus.publish(next);
    }

    fn cancel_reconnect_timer(&self) {
        if let Some(timer) = self.reconnect_timer.lock().take() {
            timer.abort();
        }
    }

    fn handle_message(&self, text: String) {
        let mut raw = text.into_bytes();
        match (*self.decoder)(&mut raw) {
            Ok(Some(payload)) => self.data_bus.publish(payload),
            Ok(None) => {}
            Err(error) => {
                warn!(channel = self.name, %error, "dropping undecodable message");
            }
        }
    }
}

fn connect_inner<T: Clone + Send + Sync + 'static>(inner: &Arc<ChannelInner<T>>) {
    {
        let mut state = inner.state.lock();
        if matches!(*state, ChannelState::Connecting | ChannelState::Open) {
            return;
        }
        *state = ChannelState::Connecting;
    }
    inner.status_bus.publish(ChannelState::Connecting);

    let token = CancellationToken::new();
    let task_inner = Arc::clone(inner);
    let task_token = token.clone();
    tokio::spawn(async move {
        run_socket(task_inner, task_token).await;
    });

    let mut slot = inner.socket_session.lock();
    if let Some(stale) = slot.replace(token) {
        stale.cancel();
    }
}

fn arm_reconnect<T: Clone + Send + Sync + 'static>(
    inner: &Arc<ChannelInner<T>>,
    session: &CancellationToken,
) {
    if session.is_cancelled() {
        return;
    }

    let mut slot = inner.reconnect_timer.lock();
    if let Some(stale) = slot.take() {
        stale.abort();
    }

    let delay = inner.reconnect_delay;
    let timer_inner = Arc::clone(inner);
    let timer_session = session.clone();
    *slot = Some(tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if timer_session.is_cancelled() {
            return;
        }
        timer_inner.reconnect_timer.lock().take();
        connect_inner(&timer_inner);
    }));
}

async fn run_socket<T: Clone + Send + Sync + 'static>(
    inner: Arc<ChannelInner<T>>,
    token: CancellationToken,
) {
    let connected = tokio::select! {
        _ = token.cancelled() => return,
        result = inner.transport.connect(&inner.url) => result,
    };

    let mut stream = match connected {
        Ok(stream) => stream,
        Err(error) => {
            warn!(channel = inner.name, %error, "socket connect failed");
            if token.is_cancelled() {
                return;
            }
            inner.set_state(ChannelState::Disconnected);
            arm_reconnect(&inner, &token);
            return;
        }
    };

    if token.is_cancelled() {
        stream.close().await;
        return;
    }

    // An earlier reconnect timer may still be mid-flight.
    inner.cancel_reconnect_timer();
    inner.set_state(ChannelState::Open);
    info!(channel = inner.name, url = %inner.url, "socket open");

    loop {
        let event = tokio::select! {
            _ = token.cancelled() => {
                stream.close().await;
                return;
            }
            event = stream.next_event() => event,
        };

        match event {
            SocketEvent::Message(text) => inner.handle_message(text),
            SocketEvent::Closed { code } => {
                if token.is_cancelled() {
                    return;
                }
                inner.set_state(ChannelState::Disconnected);
                if code == CLOSE_NORMAL {
                    info!(channel = inner.name, "socket closed cleanly");
                } else {
                    warn!(
                        channel = inner.name,
                        code, "socket closed unexpectedly, reconnect scheduled"
                    );
                    arm_reconnect(&inner, &token);
                }
                return;
            }
        }
    }
}
