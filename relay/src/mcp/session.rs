//! SSE session transport
//!
//! Each open SSE connection is a session with its own bounded outbound channel
//! and an inbound queue feeding its dispatch loop. Under the single policy a
//! new connection supersedes the current one: the old session gets a `close`
//! event, is marked dead, and its channels are dropped so its stream ends.
//!
//! The session table sits behind a `parking_lot::Mutex` that is never held
//! across an await point.

use futures::stream::Stream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::protocol::{decode_body, InboundFrame, JsonRpcResponse};
use crate::config::{SessionConfig, SessionPolicy};
use crate::{Error, Result};

pub type SessionId = String;

/// Event sent over SSE stream
#[derive(Clone, Debug, PartialEq)]
pub struct SseEvent {
    pub event_type: String,
    pub data: String,
}

impl SseEvent {
    /// Handshake announcing where the client must POST
    pub fn endpoint(path: &str) -> Self {
        Self {
            event_type: "endpoint".to_string(),
            data: path.to_string(),
        }
    }

    pub fn message(frame: &JsonRpcResponse) -> Result<Self> {
        Ok(Self {
            event_type: "message".to_string(),
            data: serde_json::to_string(frame)?,
        })
    }

    pub fn close(reason: &str) -> Self {
        Self {
            event_type: "close".to_string(),
            data: serde_json::json!({ "reason": reason }).to_string(),
        }
    }
}

/// Handle to an open session
#[derive(Clone, Debug)]
pub struct Session {
    pub id: SessionId,
    /// POST endpoint announced in the handshake
    pub endpoint: String,
    live: Arc<AtomicBool>,
}

impl Session {
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }
}

/// Everything the HTTP layer needs after `open`
pub struct OpenedSession {
    pub session: Session,
    /// Outbound events, starting with the handshake
    pub events: mpsc::Receiver<SseEvent>,
    /// Inbound frames for this session's dispatch loop
    pub inbox: mpsc::UnboundedReceiver<InboundFrame>,
}

struct SessionEntry {
    outbound: mpsc::Sender<SseEvent>,
    /// Slot held back from regular traffic for the supersede `close` event
    close_slot: Option<mpsc::OwnedPermit<SseEvent>>,
    inbox: mpsc::UnboundedSender<InboundFrame>,
    live: Arc<AtomicBool>,
    credential: Option<String>,
}

#[derive(Default)]
struct SessionTable {
    sessions: HashMap<SessionId, SessionEntry>,
    current: Option<SessionId>,
}

/// Owns every session's output channel and routes POSTed messages to them
pub struct SessionTransport {
    table: Mutex<SessionTable>,
    policy: SessionPolicy,
    max_sessions: usize,
    channel_capacity: usize,
    message_path: String,
}

impl SessionTransport {
    pub fn new(config: &SessionConfig, message_path: impl Into<String>) -> Self {
        Self {
            table: Mutex::new(SessionTable::default()),
            policy: config.policy,
            max_sessions: config.max_sessions.max(1),
            channel_capacity: config.channel_capacity.max(1),
            message_path: message_path.into(),
        }
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    /// Open a session and queue the handshake as its first event
    pub fn open(&self, credential: Option<String>) -> Result<OpenedSession> {
        let id = Uuid::new_v4().to_string();
        let endpoint = format!("{}?sessionId={}", self.message_path, id);
        let live = Arc::new(AtomicBool::new(true));

        // One extra slot is reserved up front so a slow reader can never
        // crowd out the close event
        let (outbound, events) = mpsc::channel(self.channel_capacity + 1);
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let close_slot = outbound.clone().try_reserve_owned().ok();

        // Fresh channel with a free slot left, so this cannot fail
        let _ = outbound.try_send(SseEvent::endpoint(&endpoint));

        let superseded = {
            let mut table = self.table.lock();

            let superseded = match self.policy {
                SessionPolicy::Single => match table.current.take() {
                    Some(old) => table.sessions.remove(&old).map(|entry| (old, entry)),
                    None => None,
                },
                SessionPolicy::Multi => {
                    if table.sessions.len() >= self.max_sessions {
                        return Err(Error::TooManySessions);
                    }
                    None
                }
            };

            table.sessions.insert(
                id.clone(),
                SessionEntry {
                    outbound,
                    close_slot,
                    inbox: inbox_tx,
                    live: live.clone(),
                    credential,
                },
            );
            table.current = Some(id.clone());
            superseded
        };

        if let Some((old_id, old)) = superseded {
            old.live.store(false, Ordering::Release);
            match old.close_slot {
                Some(permit) => {
                    let _ = permit.send(SseEvent::close("superseded"));
                }
                None => {
                    tracing::warn!(session = %old_id, "Could not deliver close event to superseded session");
                }
            }
            tracing::warn!(session = %old_id, replaced_by = %id, "SSE session superseded");
            // Dropping `old` releases its senders; the old stream ends once drained
        }

        metrics::counter!("relay_sessions_opened_total").increment(1);
        metrics::gauge!("relay_sessions_active").set(self.active_count() as f64);
        tracing::info!(session = %id, endpoint = %endpoint, "SSE session opened");

        Ok(OpenedSession {
            session: Session { id, endpoint, live },
            events,
            inbox,
        })
    }

    /// Serialize a frame and write it to the session's stream.
    ///
    /// Waits while the stream's buffer is full. Fails with `SessionClosed`
    /// once the session is closed or superseded; callers must not retry.
    pub async fn send(&self, session_id: &str, frame: &JsonRpcResponse) -> Result<()> {
        let event = SseEvent::message(frame)?;

        let sender = {
            let table = self.table.lock();
            table
                .sessions
                .get(session_id)
                .filter(|e| e.live.load(Ordering::Acquire))
                .map(|e| e.outbound.clone())
                .ok_or_else(|| Error::SessionClosed(session_id.to_string()))?
        };

        sender
            .send(event)
            .await
            .map_err(|_| Error::SessionClosed(session_id.to_string()))
    }

    /// Close a session. Returns false if it was already closed.
    pub fn close(&self, session_id: &str) -> bool {
        let removed = {
            let mut table = self.table.lock();
            if table.current.as_deref() == Some(session_id) {
                table.current = None;
            }
            table.sessions.remove(session_id)
        };

        match removed {
            Some(entry) => {
                entry.live.store(false, Ordering::Release);
                metrics::gauge!("relay_sessions_active").set(self.active_count() as f64);
                tracing::info!(session = %session_id, "SSE session closed");
                true
            }
            None => false,
        }
    }

    /// Decode a POST body into frames bound to the addressed session.
    ///
    /// With no session token the POST goes to the current session, which is
    /// only meaningful under the single policy.
    pub fn route_inbound(&self, session_id: Option<&str>, body: &[u8]) -> Result<Vec<InboundFrame>> {
        let session_id = self.resolve_target(session_id)?;
        let requests = decode_body(body)?;

        Ok(requests
            .into_iter()
            .map(|req| InboundFrame {
                session_id: session_id.clone(),
                id: req.id,
                method: req.method,
                params: req.params.unwrap_or(serde_json::Value::Null),
            })
            .collect())
    }

    /// Queue decoded frames onto their session's dispatch loop
    pub fn deliver(&self, frames: Vec<InboundFrame>) -> Result<usize> {
        let table = self.table.lock();
        let mut delivered = 0;
        for frame in frames {
            let entry = table
                .sessions
                .get(&frame.session_id)
                .ok_or_else(|| Error::SessionClosed(frame.session_id.clone()))?;
            entry
                .inbox
                .send(frame)
                .map_err(|e| Error::SessionClosed(e.0.session_id))?;
            delivered += 1;
        }
        Ok(delivered)
    }

    fn resolve_target(&self, session_id: Option<&str>) -> Result<SessionId> {
        let table = self.table.lock();
        match session_id {
            Some(id) => {
                let live = table
                    .sessions
                    .get(id)
                    .is_some_and(|e| e.live.load(Ordering::Acquire));
                if live {
                    Ok(id.to_string())
                } else {
                    Err(Error::UnknownSession(id.to_string()))
                }
            }
            None if self.policy == SessionPolicy::Single => {
                table.current.clone().ok_or(Error::NoSession)
            }
            None => Err(Error::NoSession),
        }
    }

    /// Replace the session's credential (called when a POST carries one)
    pub fn set_credential(&self, session_id: &str, credential: String) {
        if let Some(entry) = self.table.lock().sessions.get_mut(session_id) {
            entry.credential = Some(credential);
        }
    }

    pub fn credential(&self, session_id: &str) -> Option<String> {
        self.table
            .lock()
            .sessions
            .get(session_id)
            .and_then(|e| e.credential.clone())
    }

    pub fn current(&self) -> Option<SessionId> {
        self.table.lock().current.clone()
    }

    pub fn is_live(&self, session_id: &str) -> bool {
        self.table
            .lock()
            .sessions
            .get(session_id)
            .is_some_and(|e| e.live.load(Ordering::Acquire))
    }

    pub fn active_count(&self) -> usize {
        self.table.lock().sessions.len()
    }

    /// Turn a session's event receiver into a stream that closes the session
    /// when dropped (i.e. when the client disconnects)
    pub fn event_stream(
        self: &Arc<Self>,
        session_id: SessionId,
        mut events: mpsc::Receiver<SseEvent>,
    ) -> impl Stream<Item = SseEvent> {
        let guard = SessionGuard {
            transport: self.clone(),
            session_id,
        };

        async_stream::stream! {
            let _guard = guard;
            while let Some(event) = events.recv().await {
                yield event;
            }
        }
    }
}

/// Closes its session on drop
struct SessionGuard {
    transport: Arc<SessionTransport>,
    session_id: SessionId,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.transport.close(&self.session_id);
    }
}
