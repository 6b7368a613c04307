//! Identifiers
//!
//! Session and connection identifiers shared by the game and network layers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Serialize, Deserialize};

/// Unique session identifier (UUID as bytes).
///
/// Distinguishes two sessions that happened to be minted with the same
/// room code at different times.
pub type SessionId = [u8; 16];

/// Mint a fresh session id.
pub fn new_session_id() -> SessionId {
    uuid::Uuid::new_v4().into_bytes()
}

/// Short hex form of a session id for log lines.
pub fn short_id(id: &SessionId) -> String {
    hex::encode(&id[..4])
}

/// Process-unique identifier of one client connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    /// Allocate the next connection id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}
