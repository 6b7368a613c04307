//! Room Registry
//!
//! Sole owner of the room-code → session mapping. Mints unique codes,
//! admits new sessions and evicts closed ones. All access to the map goes
//! through the registry's own lock.

use std::collections::BTreeMap;

use tokio::sync::{OwnedMutexGuard, RwLock};
use tracing::{debug, info};

use crate::core::ids::{new_session_id, short_id, ConnectionId, SessionId};
use crate::core::room_code::{RoomCode, DEFAULT_CODE_LENGTH};
use crate::game::events::DuelEvent;
use crate::game::state::{DuelConfig, DuelState, PlayerIdentity};
use crate::network::session::{DuelSession, SessionError, SessionHandle};

/// Random draws before a crowded code space is reported as exhausted.
const MAX_MINT_ATTEMPTS: usize = 64;

/// Registry tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Length of minted codes.
    pub code_length: usize,
    /// Maximum simultaneously open rooms.
    pub max_rooms: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            code_length: DEFAULT_CODE_LENGTH,
            max_rooms: 10_000,
        }
    }
}

impl RegistryConfig {
    /// Number of rooms that can be open at once.
    pub fn capacity(&self) -> usize {
        self.max_rooms.min(RoomCode::space(self.code_length))
    }
}

/// One open room.
#[derive(Debug, Clone)]
struct RoomEntry {
    id: SessionId,
    session: SessionHandle,
}

/// Map of open rooms.
#[derive(Debug)]
pub struct RoomRegistry {
    config: RegistryConfig,
    rooms: RwLock<BTreeMap<RoomCode, RoomEntry>>,
}

impl RoomRegistry {
    /// Create an empty registry.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            rooms: RwLock::new(BTreeMap::new()),
        }
    }

    /// Mint a free code and open a `Waiting` session with the host seated.
    ///
    /// The new session is returned already locked so the caller can announce
    /// the code before any other operation reaches it.
    pub async fn create_room(
        &self,
        host: PlayerIdentity,
        connection: ConnectionId,
        duel: DuelConfig,
    ) -> Result<OwnedMutexGuard<DuelSession>, SessionError> {
        let mut rooms = self.rooms.write().await;

        if rooms.len() >= self.config.capacity() {
            return Err(SessionError::RegistryExhausted);
        }

        let code = {
            let mut rng = rand::thread_rng();
            (0..MAX_MINT_ATTEMPTS)
                .map(|_| RoomCode::generate(&mut rng, self.config.code_length))
                .find(|code| !rooms.contains_key(code))
                .ok_or(SessionError::RegistryExhausted)?
        };

        Ok(Self::admit(&mut rooms, code, host, connection, duel).await)
    }

    /// Open a room under a fixed code, as if the mint had drawn it.
    #[cfg(test)]
    pub(crate) async fn create_room_with_code(
        &self,
        code: RoomCode,
        host: PlayerIdentity,
        connection: ConnectionId,
        duel: DuelConfig,
    ) -> Result<OwnedMutexGuard<DuelSession>, SessionError> {
        let mut rooms = self.rooms.write().await;
        if rooms.len() >= self.config.capacity() || rooms.contains_key(&code) {
            return Err(SessionError::RegistryExhausted);
        }
        Ok(Self::admit(&mut rooms, code, host, connection, duel).await)
    }

    /// Insert a fresh session under a code known to be free.
    async fn admit(
        rooms: &mut BTreeMap<RoomCode, RoomEntry>,
        code: RoomCode,
        host: PlayerIdentity,
        connection: ConnectionId,
        duel: DuelConfig,
    ) -> OwnedMutexGuard<DuelSession> {
        let id = new_session_id();
        let state = DuelState::new(id, code.clone(), host, connection, duel);
        let session = DuelSession::new(state).into_handle();
        let guard = session.clone().lock_owned().await;

        rooms.insert(code.clone(), RoomEntry { id, session });
        info!("Room {} created (session {}, {} open)", code, short_id(&id), rooms.len());

        guard
    }

    /// Seat a guest in the room named by `raw_code` (any case).
    ///
    /// Returns the locked session together with the committed join events.
    pub async fn join_room(
        &self,
        raw_code: &str,
        guest: PlayerIdentity,
        connection: ConnectionId,
    ) -> Result<(OwnedMutexGuard<DuelSession>, Vec<DuelEvent>), SessionError> {
        let code = RoomCode::parse(raw_code).map_err(|_| SessionError::RoomNotFound)?;
        let (_, mut session) = self.lock(&code, None).await?;

        let events = session.state_mut().join(guest, connection)?;
        debug!("Room {} joined by {}", code, connection);
        Ok((session, events))
    }

    /// Look up and lock a live session.
    ///
    /// When `expected` is given, a room that now belongs to a different
    /// session (the code was released and re-minted) is reported as not found.
    pub async fn lock(
        &self,
        code: &RoomCode,
        expected: Option<SessionId>,
    ) -> Result<(SessionId, OwnedMutexGuard<DuelSession>), SessionError> {
        let entry = {
            let rooms = self.rooms.read().await;
            rooms.get(code).cloned().ok_or(SessionError::RoomNotFound)?
        };

        if expected.is_some_and(|id| id != entry.id) {
            return Err(SessionError::RoomNotFound);
        }

        let session = entry.session.lock_owned().await;
        // Closed while we queued for the lock
        if !session.is_live() {
            return Err(SessionError::RoomNotFound);
        }

        Ok((entry.id, session))
    }

    /// Remove a room and free its code. Idempotent; only removes the entry
    /// if it still belongs to session `id`.
    pub async fn close_room(&self, code: &RoomCode, id: SessionId) -> bool {
        let mut rooms = self.rooms.write().await;
        match rooms.get(code) {
            Some(entry) if entry.id == id => {
                rooms.remove(code);
                info!("Room {} closed (session {}, {} open)", code, short_id(&id), rooms.len());
                true
            }
            _ => false,
        }
    }

    /// Whether `code` is open and still belongs to session `id`.
    pub async fn contains(&self, code: &RoomCode, id: SessionId) -> bool {
        self.rooms.read().await.get(code).is_some_and(|entry| entry.id == id)
    }

    /// Number of open rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}
