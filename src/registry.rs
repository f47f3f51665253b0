//! Session registry
//!
//! The only cross-connection shared mutable state in the process: a
//! concurrent map from session identifier to live session, with
//! lifecycle from process start to shutdown. Nothing is persisted.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::RngCore;

use crate::session::{Session, SessionChannels, SessionId};

/// Bytes of CSPRNG material per session id (256 bits, base64url)
const SESSION_ID_BYTES: usize = 32;

/// Generate an unguessable URL-safe session identifier
fn generate_session_id() -> SessionId {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Concurrent registry of live sessions
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Create and register a fresh session.
    ///
    /// The identifier is drawn from the CSPRNG and inserted through
    /// the entry API, so concurrent creates can never alias even if
    /// the draw collided.
    pub fn create(
        &self,
        inbound_capacity: usize,
        outbound_capacity: usize,
    ) -> (Arc<Session>, SessionChannels) {
        loop {
            let id = generate_session_id();
            match self.sessions.entry(id.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    let (session, channels) =
                        Session::new(id, inbound_capacity, outbound_capacity);
                    slot.insert(session.clone());
                    tracing::debug!(session_id = %session.id(), "session created");
                    return (session, channels);
                }
            }
        }
    }

    /// Look up a live session by identifier
    pub fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Deregister a session. Idempotent; identifiers are never reused.
    pub fn remove(&self, id: &str) {
        self.sessions.remove(id);
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
