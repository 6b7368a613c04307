//! Session Coordinator
//!
//! Single entry point for every mutating operation on a session. Each
//! operation takes the session's lock, applies one transition, fans the
//! committed events out to both connections and only then releases the lock,
//! so relays reach each client in commit order.
//!
//! Operations on different sessions never share a lock beyond the brief
//! registry lookup.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, OwnedMutexGuard, RwLock};
use tracing::{debug, error, info, warn};

use crate::core::ids::{short_id, ConnectionId, SessionId};
use crate::core::room_code::RoomCode;
use crate::game::events::DuelEvent;
use crate::game::result::MatchResult;
use crate::game::state::{DuelConfig, PlayerIdentity, Slot, TransitionError};
use crate::network::protocol::ServerMessage;
use crate::network::registry::{RegistryConfig, RoomRegistry};
use crate::network::session::{Delivery, DuelSession, SessionError};
use crate::services::achievements::AchievementCatalog;
use crate::services::records::{MatchRecord, MatchRecordStore};

/// Mode label stored with online match records.
pub const ONLINE_MODE: &str = "online";

/// A connection's association with one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomTicket {
    /// Room code.
    pub code: RoomCode,
    /// Session the code belonged to when the ticket was issued.
    pub session_id: SessionId,
    /// Seat held.
    pub slot: Slot,
}

impl RoomTicket {
    /// Whether a client-supplied code names this room (any case).
    pub fn matches(&self, raw: &str) -> bool {
        self.code.matches(raw)
    }
}

/// Serializes operations per session and routes their results.
pub struct SessionCoordinator {
    registry: RoomRegistry,
    duel: DuelConfig,
    outbound: RwLock<BTreeMap<ConnectionId, mpsc::Sender<ServerMessage>>>,
    records: Option<Arc<dyn MatchRecordStore>>,
    achievements: Option<Arc<dyn AchievementCatalog>>,
}

impl SessionCoordinator {
    /// Coordinator without record or achievement collaborators.
    pub fn new(registry: RegistryConfig, duel: DuelConfig) -> Self {
        Self {
            registry: RoomRegistry::new(registry),
            duel,
            outbound: RwLock::new(BTreeMap::new()),
            records: None,
            achievements: None,
        }
    }

    /// Attach the match-record store and achievement catalog.
    pub fn with_services(
        mut self,
        records: Arc<dyn MatchRecordStore>,
        achievements: Arc<dyn AchievementCatalog>,
    ) -> Self {
        self.records = Some(records);
        self.achievements = Some(achievements);
        self
    }

    // =========================================================================
    // CONNECTIONS
    // =========================================================================

    /// Register the outbound channel of a connection.
    pub async fn register_connection(&self, connection: ConnectionId, sender: mpsc::Sender<ServerMessage>) {
        self.outbound.write().await.insert(connection, sender);
    }

    /// Forget a connection's outbound channel.
    pub async fn unregister_connection(&self, connection: ConnectionId) {
        self.outbound.write().await.remove(&connection);
    }

    // =========================================================================
    // OPERATIONS
    // =========================================================================

    /// Open a room with `connection` as host and announce its code.
    pub async fn create_room(
        &self,
        connection: ConnectionId,
        host: PlayerIdentity,
    ) -> Result<RoomTicket, SessionError> {
        let session = self.registry.create_room(host, connection, self.duel.clone()).await?;

        let ticket = RoomTicket {
            code: session.state().code().clone(),
            session_id: session.state().id(),
            slot: Slot::Host,
        };

        // Announced under the lock so `room_created` precedes any `joined`
        let created = ServerMessage::RoomCreated { code: ticket.code.to_string() };
        self.deliver(vec![(connection, created)]).await;
        drop(session);

        Ok(ticket)
    }

    /// Seat `connection` as guest in the room named by `raw_code`.
    pub async fn join_room(
        &self,
        connection: ConnectionId,
        raw_code: &str,
        guest: PlayerIdentity,
    ) -> Result<RoomTicket, SessionError> {
        let (session, events) = self.registry.join_room(raw_code, guest, connection).await?;

        let ticket = RoomTicket {
            code: session.state().code().clone(),
            session_id: session.state().id(),
            slot: Slot::Guest,
        };

        self.commit(session, events).await;
        Ok(ticket)
    }

    /// Host starts the countdown and schedules the end timer.
    pub async fn start_game(
        self: &Arc<Self>,
        connection: ConnectionId,
        ticket: &RoomTicket,
    ) -> Result<(), SessionError> {
        let (id, mut session) = self.registry.lock(&ticket.code, Some(ticket.session_id)).await?;

        let events = session.state_mut().start(connection, Instant::now(), Utc::now())?;
        let duration = session.state().config().match_duration;

        let coordinator = Arc::clone(self);
        let code = ticket.code.clone();
        session.set_timer(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            coordinator.expire(&code, id).await;
        }));

        info!("Room {} started ({:?})", ticket.code, duration);
        self.commit(session, events).await;
        Ok(())
    }

    /// Count one hit. Dropped hits produce nothing, not even an error.
    pub async fn hit(&self, connection: ConnectionId, ticket: &RoomTicket) {
        let Ok((_, mut session)) = self.registry.lock(&ticket.code, Some(ticket.session_id)).await else {
            return;
        };

        if let Some(event) = session.state_mut().hit(connection, Instant::now()) {
            self.commit(session, vec![event]).await;
        }
    }

    /// Leave or disconnect. A session that already ended is left as is.
    pub async fn leave(&self, connection: ConnectionId, ticket: &RoomTicket) {
        let Ok((_, mut session)) = self.registry.lock(&ticket.code, Some(ticket.session_id)).await else {
            return;
        };

        match session.state_mut().leave(connection) {
            Ok(events) => {
                debug!("{} left room {}", connection, ticket.code);
                self.commit(session, events).await;
            }
            Err(err) => debug!("Leave from {} ignored: {}", connection, err),
        }
    }

    /// End timer elapsed for session `id`.
    pub async fn expire(&self, code: &RoomCode, id: SessionId) {
        let Ok((_, mut session)) = self.registry.lock(code, Some(id)).await else {
            return;
        };

        // This task is the timer; nothing left to abort
        session.detach_timer();

        if let Some(event) = session.state_mut().expire() {
            self.commit(session, vec![event]).await;
        }
    }

    /// Whether the ticket still refers to a live session.
    pub async fn is_live(&self, ticket: &RoomTicket) -> bool {
        self.registry.contains(&ticket.code, ticket.session_id).await
    }

    /// The room registry.
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Per-session settings applied to new rooms.
    pub fn duel_config(&self) -> &DuelConfig {
        &self.duel
    }

    // =========================================================================
    // COMMIT / FAN-OUT
    // =========================================================================

    /// Check invariants, release the room on a terminal event, then fan
    /// out. Runs with the session lock held.
    async fn commit(&self, mut session: OwnedMutexGuard<DuelSession>, events: Vec<DuelEvent>) {
        if let Err(err) = session.state().check_invariants() {
            self.teardown(session, err).await;
            return;
        }

        let deliveries = session.deliveries(&events);

        // Code is free again before either side hears about the end
        if events.iter().any(DuelEvent::is_terminal) {
            self.finish(&mut session, &events).await;
        }

        self.deliver(deliveries).await;
    }

    /// Release a room that reached `Ended`.
    async fn finish(&self, session: &mut DuelSession, events: &[DuelEvent]) {
        session.cancel_timer();

        let code = session.state().code().clone();
        let id = session.state().id();
        self.registry.close_room(&code, id).await;

        let result = events.iter().find_map(|event| match event {
            DuelEvent::Finished(result) => Some(result.clone()),
            _ => None,
        });

        match result {
            Some(result) => {
                let winner = match result.outcome.winner() {
                    Some(slot) => result.score(slot).identity.display_name.as_str(),
                    None => "draw",
                };
                info!(
                    "Room {} finished {}-{} (winner: {}) after {:?}",
                    code, result.host.hits, result.guest.hits, winner, session.age()
                );
                self.record(result, session.state().config().match_duration);
            }
            None => info!("Room {} (session {}) ended early", code, short_id(&id)),
        }
    }

    /// Tear down a session whose invariants no longer hold. Only this
    /// session is affected.
    async fn teardown(&self, mut session: OwnedMutexGuard<DuelSession>, err: TransitionError) {
        let code = session.state().code().clone();
        let id = session.state().id();
        error!("Room {} (session {}) torn down: {}", code, short_id(&id), err);

        let notices = session.fault_notices(&err);
        session.poison();
        self.deliver(notices).await;
        self.registry.close_room(&code, id).await;
    }

    /// Push messages to their connections' outbound channels.
    async fn deliver(&self, deliveries: Vec<Delivery>) {
        if deliveries.is_empty() {
            return;
        }

        let targets: Vec<_> = {
            let outbound = self.outbound.read().await;
            deliveries
                .into_iter()
                .filter_map(|(conn, msg)| outbound.get(&conn).map(|tx| (conn, tx.clone(), msg)))
                .collect()
        };

        for (conn, tx, msg) in targets {
            if tx.send(msg).await.is_err() {
                debug!("Outbound channel for {} closed", conn);
            }
        }
    }

    /// Persist authenticated players' scores off the session path.
    fn record(&self, result: MatchResult, duration: Duration) {
        let Some(records) = self.records.clone() else {
            return;
        };
        let achievements = self.achievements.clone();

        tokio::spawn(async move {
            let played_at = Utc::now();

            for slot in [Slot::Host, Slot::Guest] {
                let score = result.score(slot);
                let Some(account) = score.identity.account.clone() else {
                    continue;
                };

                let record = MatchRecord {
                    account: account.clone(),
                    display_name: score.identity.display_name.clone(),
                    mode: ONLINE_MODE.to_string(),
                    score: score.hits,
                    duration_secs: duration.as_secs(),
                    played_at,
                };

                if let Err(e) = records.append(record).await {
                    warn!("Failed to record match for {}: {}", account, e);
                    continue;
                }

                if let Some(catalog) = &achievements {
                    match catalog.lookup(&account).await {
                        Ok(reached) => debug!(
                            "Account {} has {} achievement(s): {:?}",
                            account,
                            reached.len(),
                            reached.iter().map(|a| a.name).collect::<Vec<_>>()
                        ),
                        Err(e) => warn!("Achievement lookup failed for {}: {}", account, e),
                    }
                }
            }
        });
    }
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("registry", &self.registry)
            .field("duel", &self.duel)
            .field("records", &self.records.is_some())
            .field("achievements", &self.achievements.is_some())
            .finish()
    }
}
