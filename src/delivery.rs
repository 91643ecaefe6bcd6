//! Session handles and message delivery.
//!
//! Every send is fire-and-forget over the connection's unbounded channel:
//! transport order is preserved per session, nothing is awaited, and a
//! closed channel just means the recipient is gone.

use std::collections::HashMap;

use hyper_tungstenite::tungstenite::Message;
use log::warn;
use tokio::sync::mpsc;

use crate::messages::ServerMessage;

pub type ConnId = String;
pub type WsSender = mpsc::UnboundedSender<Message>;

/// Opaque reference to a live transport session. Cheap to clone; equality
/// is connection identity, not channel identity.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    conn_id: ConnId,
    sender: WsSender,
}

impl SessionHandle {
    pub fn new(conn_id: ConnId, sender: WsSender) -> Self {
        Self { conn_id, sender }
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    /// Serialize and send. Returns false when the session is gone, which
    /// lets delivery chains fall through to the next strategy.
    pub fn send(&self, msg: &ServerMessage) -> bool {
        let json = match serde_json::to_string(msg) {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to serialize outbound message: {}", e);
                return false;
            }
        };
        self.sender.send(Message::Text(json)).is_ok()
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.conn_id == other.conn_id
    }
}

impl Eq for SessionHandle {}

/// Which delivery strategy ended up carrying a targeted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryRoute {
    /// The session handle captured when the request was made.
    CapturedSession,
    /// The target's currently registered session.
    RegisteredSession,
    /// Everyone; the target could not be resolved.
    Broadcast,
}

/// Send to every connected session. Serializes once.
pub fn broadcast(sessions: &HashMap<ConnId, SessionHandle>, msg: &ServerMessage) {
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            warn!("failed to serialize broadcast message: {}", e);
            return;
        }
    };
    for handle in sessions.values() {
        let _ = handle.sender.send(Message::Text(json.clone()));
    }
}

/// Targeted delivery with broadcast fallback.
///
/// The strategies are tried in order: the session captured at request time,
/// then the target's currently registered session, then a broadcast to all.
/// Request-time and delivery-time sessions can diverge across reconnects,
/// so the chain must stay a chain; collapsing it to a single lookup loses
/// messages.
pub fn deliver_with_fallback(
    sessions: &HashMap<ConnId, SessionHandle>,
    captured: Option<&SessionHandle>,
    registered: Option<&SessionHandle>,
    msg: &ServerMessage,
) -> DeliveryRoute {
    if let Some(handle) = captured {
        if handle.send(msg) {
            return DeliveryRoute::CapturedSession;
        }
    }
    if let Some(handle) = registered {
        if handle.send(msg) {
            return DeliveryRoute::RegisteredSession;
        }
    }
    broadcast(sessions, msg);
    DeliveryRoute::Broadcast
}

#[cfg(test)]
pub fn test_session(conn_id: &str) -> (SessionHandle, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SessionHandle::new(conn_id.to_string(), tx), rx)
}

#[cfg(test)]
pub fn recv_json(rx: &mut mpsc::UnboundedReceiver<Message>) -> serde_json::Value {
    match rx.try_recv() {
        Ok(Message::Text(json)) => serde_json::from_str(&json).expect("valid json on the wire"),
        other => panic!("expected a text frame, got {:?}", other),
    }
}
