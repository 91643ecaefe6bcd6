pub mod consultations;
pub mod presence;
pub mod rooms;
pub mod signals;

pub use consultations::ConsultationLedger;
pub use presence::PresenceRegistry;
pub use rooms::RoomDirectory;
pub use signals::SignalStore;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::delivery::{self, ConnId, SessionHandle};
use crate::messages::ServerMessage;

/// All shared mutable state, behind one lock so every mutation is
/// serialized. Load is tens to low hundreds of sessions; contention is
/// not a concern at that scale.
pub struct CallState {
    /// Every connected session, for broadcast delivery.
    pub sessions: HashMap<ConnId, SessionHandle>,
    pub presence: PresenceRegistry,
    pub consultations: ConsultationLedger,
    pub rooms: RoomDirectory,
    pub signals: SignalStore,
}

pub type SharedState = Arc<Mutex<CallState>>;

impl CallState {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            presence: PresenceRegistry::new(),
            consultations: ConsultationLedger::new(),
            rooms: RoomDirectory::new(),
            signals: SignalStore::new(),
        }
    }

    pub fn new_shared() -> SharedState {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Fire-and-forget send to every connected session.
    pub fn broadcast(&self, msg: &ServerMessage) {
        delivery::broadcast(&self.sessions, msg);
    }
}
