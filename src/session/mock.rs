//! Scripted session for tests and offline replay.

use crate::audio::codec::EncodedFrame;
use crate::error::{ParleyError, Result};
use crate::session::{RemoteSession, SessionConfig, SessionConnector, SessionEvent, SessionLink};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MockSessionState {
    sent: Mutex<Vec<EncodedFrame>>,
    closed: AtomicBool,
    fail_sends: AtomicBool,
}

/// Records every frame it is sent. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockSession {
    state: Arc<MockSessionState>,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `send` fails with a transmission fault.
    pub fn with_send_failures(self) -> Self {
        self.state.fail_sends.store(true, Ordering::SeqCst);
        self
    }

    fn sent_guard(&self) -> MutexGuard<'_, Vec<EncodedFrame>> {
        match self.state.sent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Frames accepted so far, in send order.
    pub fn sent(&self) -> Vec<EncodedFrame> {
        self.sent_guard().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent_guard().len()
    }
}

impl RemoteSession for MockSession {
    fn send(&self, frame: &EncodedFrame) -> Result<()> {
        if self.is_closed() {
            return Err(ParleyError::Transmission {
                message: "session is closed".to_string(),
            });
        }
        if self.state.fail_sends.load(Ordering::SeqCst) {
            return Err(ParleyError::Transmission {
                message: format!("mock send failure for frame {}", frame.sequence),
            });
        }
        self.sent_guard().push(frame.clone());
        Ok(())
    }

    fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }
}

/// Connector handing out one [`MockSession`]; events are injected with
/// [`MockConnector::emit`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    session: MockSession,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    open_failure: Option<String>,
    auto_open: bool,
    opens: Arc<AtomicUsize>,
}

impl MockConnector {
    /// Opens successfully and reports `Opened` right away.
    pub fn new() -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            session: MockSession::new(),
            events_tx,
            events_rx,
            open_failure: None,
            auto_open: true,
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// `open` fails with a session error.
    pub fn with_open_failure(mut self, message: &str) -> Self {
        self.open_failure = Some(message.to_string());
        self
    }

    /// Do not report `Opened`; the test decides when (or whether) it arrives.
    pub fn without_auto_open(mut self) -> Self {
        self.auto_open = false;
        self
    }

    /// Injects an event as if the remote had sent it.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn session(&self) -> MockSession {
        self.session.clone()
    }

    pub fn open_calls(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionConnector for MockConnector {
    async fn open(&self, config: &SessionConfig) -> Result<SessionLink> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.open_failure {
            return Err(ParleyError::Session {
                message: message.clone(),
            });
        }
        tracing::debug!(target: "parley::session", voice = %config.voice, "mock session opened");
        if self.auto_open {
            self.emit(SessionEvent::Opened);
        }
        Ok(SessionLink {
            session: Arc::new(self.session.clone()),
            events: self.events_rx.clone(),
        })
    }
}
