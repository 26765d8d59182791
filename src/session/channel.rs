//! A [`RemoteSession`] over a pair of text-message channels.
//!
//! Each message is one JSON document from [`super::wire`]. Whatever sits on
//! the other end of the channels (a websocket bridge, NDJSON on stdio, a test)
//! is the transport. `open` completes only after the remote's
//! `setupComplete`, so an opened link is immediately usable.

use crate::audio::codec::EncodedFrame;
use crate::defaults;
use crate::error::{ParleyError, Result};
use crate::session::wire::{audio_message, parse_server_message, setup_message};
use crate::session::{RemoteSession, SessionConfig, SessionConnector, SessionEvent, SessionLink};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;

/// How often the reader thread checks for local close while idle.
const READER_POLL: Duration = Duration::from_millis(50);

pub struct ChannelSession {
    outgoing: Sender<String>,
    closed: Arc<AtomicBool>,
}

impl RemoteSession for ChannelSession {
    fn send(&self, frame: &EncodedFrame) -> Result<()> {
        if self.is_closed() {
            return Err(ParleyError::Transmission {
                message: "session is closed".to_string(),
            });
        }
        let message = audio_message(frame)?;
        self.outgoing.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => ParleyError::Transmission {
                message: format!("outgoing queue full, dropped frame {}", frame.sequence),
            },
            TrySendError::Disconnected(_) => ParleyError::Transmission {
                message: "transport disconnected".to_string(),
            },
        })
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(target: "parley::session", "channel session closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Opens [`ChannelSession`]s on the given transport endpoints.
#[derive(Clone)]
pub struct ChannelConnector {
    outgoing: Sender<String>,
    incoming: Receiver<String>,
}

impl ChannelConnector {
    /// `outgoing` carries client messages to the transport; `incoming`
    /// delivers server messages from it.
    pub fn new(outgoing: Sender<String>, incoming: Receiver<String>) -> Self {
        Self { outgoing, incoming }
    }
}

/// Outcome of the setup handshake as seen by the reader thread.
type Handshake = oneshot::Sender<std::result::Result<(), String>>;

#[async_trait::async_trait]
impl SessionConnector for ChannelConnector {
    /// Sends `setup` and waits up to `config.open_timeout` for
    /// `setupComplete`.
    async fn open(&self, config: &SessionConfig) -> Result<SessionLink> {
        let setup = setup_message(config)?;
        self.outgoing.send(setup).map_err(|_| ParleyError::Session {
            message: "transport closed before setup".to_string(),
        })?;

        let closed = Arc::new(AtomicBool::new(false));
        let (events_tx, events_rx) = crossbeam_channel::bounded(defaults::SESSION_EVENT_BUFFER);
        let (ready_tx, ready_rx) = oneshot::channel();

        let incoming = self.incoming.clone();
        let reader_closed = Arc::clone(&closed);
        thread::Builder::new()
            .name("session-reader".to_string())
            .spawn(move || read_server_messages(incoming, events_tx, reader_closed, ready_tx))?;

        let failure = match tokio::time::timeout(config.open_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(reason))) => Some(reason),
            Ok(Err(_)) => Some("session reader stopped during setup".to_string()),
            Err(_) => Some(format!(
                "no setupComplete within {} ms",
                config.open_timeout.as_millis()
            )),
        };
        if let Some(message) = failure {
            closed.store(true, Ordering::SeqCst);
            return Err(ParleyError::Session { message });
        }

        tracing::info!(target: "parley::session", voice = %config.voice, "session opened");

        Ok(SessionLink {
            session: Arc::new(ChannelSession {
                outgoing: self.outgoing.clone(),
                closed,
            }),
            events: events_rx,
        })
    }
}

fn read_server_messages(
    incoming: Receiver<String>,
    events: Sender<SessionEvent>,
    closed: Arc<AtomicBool>,
    ready: Handshake,
) {
    let mut ready = Some(ready);
    loop {
        if closed.load(Ordering::SeqCst) {
            return;
        }
        let text = match incoming.recv_timeout(READER_POLL) {
            Ok(text) => text,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                match ready.take() {
                    Some(ready) => {
                        let _ = ready.send(Err("transport closed during setup".to_string()));
                    }
                    None if !closed.load(Ordering::SeqCst) => {
                        let _ = events.send(SessionEvent::Closed);
                    }
                    None => {}
                }
                return;
            }
        };

        let parsed = match parse_server_message(&text) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(target: "parley::session", error = %e, "ignoring server message");
                continue;
            }
        };

        for event in parsed {
            if let Some(pending) = ready.take() {
                match event {
                    SessionEvent::Opened => {
                        if events.send(SessionEvent::Opened).is_err() {
                            return;
                        }
                        let _ = pending.send(Ok(()));
                    }
                    SessionEvent::Error(reason) => {
                        let _ = pending.send(Err(reason));
                        return;
                    }
                    SessionEvent::Closed => {
                        let _ = pending.send(Err("remote closed during setup".to_string()));
                        return;
                    }
                    other => {
                        tracing::debug!(target: "parley::session", event = ?other, "event before setupComplete dropped");
                        ready = Some(pending);
                    }
                }
                continue;
            }
            if closed.load(Ordering::SeqCst) || events.send(event).is_err() {
                return;
            }
        }
    }
}
