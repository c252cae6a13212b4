//! Scripted socket transport for exercising channel lifecycles without a
//! network. Each queued script entry answers one connect attempt.

use crate::error::TerminalError;
use crate::stream::transport::{SocketEvent, SocketStream, SocketTransport, CLOSE_NORMAL};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

enum ConnectScript {
    Fail,
    Open(mpsc::UnboundedReceiver<SocketEvent>),
}

pub struct FakeTransport {
    scripts: Mutex<VecDeque<ConnectScript>>,
    connect_count: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(VecDeque::new()),
            connect_count: AtomicUsize::new(0),
        })
    }

    /// The next connect attempt fails outright.
    pub fn push_failure(&self) {
        self.scripts.lock().push_back(ConnectScript::Fail);
    }

    /// The next connect attempt succeeds; the returned handle drives the
    /// session from the test.
    pub fn push_session(&self) -> SessionHandle {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.scripts.lock().push_back(ConnectScript::Open(receiver));
        SessionHandle { sender }
    }

    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SocketTransport for FakeTransport {
    async fn connect(&self, _url: &str) -> Result<Box<dyn SocketStream>, TerminalError> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().pop_front();
        match script {
            Some(ConnectScript::Fail) => Err(TerminalError::InvalidArgument(
                "scripted connect failure".to_string(),
            )),
            Some(ConnectScript::Open(receiver)) => Ok(Box::new(FakeStream { receiver })),
            // No script queued: park the attempt, like a connect that never
            // resolves at the transport level.
            None => futures_util::future::pending().await,
        }
    }
}

pub struct SessionHandle {
    sender: mpsc::UnboundedSender<SocketEvent>,
}

impl SessionHandle {
    pub fn send_message(&self, text: &str) {
        let _ = self
            .sender
            .send(SocketEvent::Message(text.to_string()));
    }

    pub fn close(&self, code: u16) {
        let _ = self.sender.send(SocketEvent::Closed { code });
    }
}

struct FakeStream {
    receiver: mpsc::UnboundedReceiver<SocketEvent>,
}

#[async_trait]
impl SocketStream for FakeStream {
    async fn next_event(&mut self) -> SocketEvent {
        match self.receiver.recv().await {
            Some(event) => event,
            None => SocketEvent::Closed { code: CLOSE_NORMAL },
        }
    }

    async fn close(&mut self) {
        self.receiver.close();
    }
}
