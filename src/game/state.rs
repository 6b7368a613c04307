//! Duel State Machine
//!
//! The state of exactly one duel: two player slots, a hit counter per slot,
//! the countdown and the current phase.
//!
//! ```text
//!   Waiting ──join──▶ Ready ──start (host)──▶ Active ──timer──▶ Ended
//!      │                │                       │
//!      └──leave─────────┴──────leave────────────┴──────────────▶ Ended
//! ```
//!
//! Transitions never touch the clock or the network: callers pass `now` in
//! and receive the committed [`DuelEvent`]s back.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::ids::{ConnectionId, SessionId};
use crate::core::rate::{HitRateLimiter, DEFAULT_MIN_HIT_INTERVAL};
use crate::core::room_code::RoomCode;
use crate::game::events::DuelEvent;
use crate::game::result::{FinalScore, MatchResult};

/// Online match length.
///
/// Shorter than the 15 second single-player "easy" mode.
pub const DEFAULT_MATCH_DURATION: Duration = Duration::from_secs(10);

/// Longest accepted match length.
pub const MAX_MATCH_DURATION: Duration = Duration::from_secs(3600);

/// Longest display name kept; longer names are truncated.
pub const MAX_DISPLAY_NAME_LEN: usize = 32;

// =============================================================================
// PHASE / SLOT
// =============================================================================

/// Session phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Host present, guest slot empty.
    Waiting,
    /// Both present, not started.
    Ready,
    /// Countdown running, hits counted.
    Active,
    /// Terminal.
    Ended,
}

/// One of the two player positions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    /// Room creator.
    Host,
    /// Player who joined by code.
    Guest,
}

impl Slot {
    /// The opposite slot.
    pub fn other(self) -> Slot {
        match self {
            Slot::Host => Slot::Guest,
            Slot::Guest => Slot::Host,
        }
    }

    /// Fallback display name for a player who sent none.
    pub fn default_name(self) -> &'static str {
        match self {
            Slot::Host => "Player 1",
            Slot::Guest => "Player 2",
        }
    }
}

// =============================================================================
// PLAYER IDENTITY
// =============================================================================

/// Who occupies a slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerIdentity {
    /// Name shown to the opponent.
    pub display_name: String,
    /// Opaque account id from the credential check; `None` when anonymous.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

impl PlayerIdentity {
    /// Identity without a verified account.
    pub fn anonymous(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            account: None,
        }
    }

    /// Identity backed by a verified account.
    pub fn authenticated(display_name: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            account: Some(account.into()),
        }
    }

    /// Build an identity from raw client input: trims, truncates to
    /// [`MAX_DISPLAY_NAME_LEN`] characters and falls back to the slot's
    /// default name when empty.
    pub fn from_input(raw: &str, slot: Slot, account: Option<String>) -> Self {
        let trimmed = raw.trim();
        let display_name = if trimmed.is_empty() {
            slot.default_name().to_string()
        } else {
            trimmed.chars().take(MAX_DISPLAY_NAME_LEN).collect()
        };
        Self { display_name, account }
    }
}

// =============================================================================
// CONFIG / ERRORS
// =============================================================================

/// Per-session tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuelConfig {
    /// Countdown length once the host starts.
    pub match_duration: Duration,
    /// Minimum interval between two accepted hits from one player.
    pub min_hit_interval: Duration,
}

impl Default for DuelConfig {
    fn default() -> Self {
        Self {
            match_duration: DEFAULT_MATCH_DURATION,
            min_hit_interval: DEFAULT_MIN_HIT_INTERVAL,
        }
    }
}

/// Rejected transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// Guest slot taken or the room is past `Waiting`.
    #[error("room is full")]
    RoomFull,
    /// Session already ended.
    #[error("session has ended")]
    SessionEnded,
    /// Connection holds no slot in this session.
    #[error("connection is not in this room")]
    NotInRoom,
    /// Only the host may start.
    #[error("only the host can start the game")]
    NotHost,
    /// Command not valid in the current phase.
    #[error("expected phase {expected:?}, session is {actual:?}")]
    InvalidPhase {
        /// Phase the command needs.
        expected: Phase,
        /// Phase the session is in.
        actual: Phase,
    },
    /// Configured match length cannot be scheduled.
    #[error("match duration {0:?} is out of range")]
    DurationOutOfRange(Duration),
    /// Internal invariant violated; the session must be torn down.
    #[error("session invariant violated: {0}")]
    Corrupt(&'static str),
}

// =============================================================================
// DUEL STATE
// =============================================================================

/// One occupied slot.
#[derive(Debug, Clone)]
struct PlayerSlot {
    identity: PlayerIdentity,
    connection: ConnectionId,
    hits: u32,
    limiter: HitRateLimiter,
}

impl PlayerSlot {
    fn new(identity: PlayerIdentity, connection: ConnectionId, min_hit_interval: Duration) -> Self {
        Self {
            identity,
            connection,
            hits: 0,
            limiter: HitRateLimiter::new(min_hit_interval),
        }
    }
}

/// State machine for one duel.
#[derive(Debug, Clone)]
pub struct DuelState {
    id: SessionId,
    code: RoomCode,
    phase: Phase,
    host: Option<PlayerSlot>,
    guest: Option<PlayerSlot>,
    config: DuelConfig,
    started_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    deadline: Option<Instant>,
    result: Option<MatchResult>,
}

impl DuelState {
    /// New session in `Waiting` with the host slot occupied.
    pub fn new(
        id: SessionId,
        code: RoomCode,
        host: PlayerIdentity,
        host_connection: ConnectionId,
        config: DuelConfig,
    ) -> Self {
        let host = PlayerSlot::new(host, host_connection, config.min_hit_interval);
        Self {
            id,
            code,
            phase: Phase::Waiting,
            host: Some(host),
            guest: None,
            config,
            started_at: None,
            ends_at: None,
            deadline: None,
            result: None,
        }
    }

    /// Occupy the guest slot and advance to `Ready`.
    pub fn join(
        &mut self,
        guest: PlayerIdentity,
        connection: ConnectionId,
    ) -> Result<Vec<DuelEvent>, TransitionError> {
        if self.phase == Phase::Ended {
            return Err(TransitionError::SessionEnded);
        }
        if self.phase != Phase::Waiting || self.guest.is_some() {
            return Err(TransitionError::RoomFull);
        }
        let host = self.host.as_ref().ok_or(TransitionError::Corrupt("waiting room without host"))?;
        if host.connection == connection {
            return Err(TransitionError::RoomFull);
        }

        let host_identity = host.identity.clone();
        self.guest = Some(PlayerSlot::new(guest.clone(), connection, self.config.min_hit_interval));
        self.phase = Phase::Ready;

        Ok(vec![DuelEvent::GuestJoined {
            host: host_identity,
            guest,
        }])
    }

    /// Host starts the countdown. Zeroes both counters.
    pub fn start(
        &mut self,
        connection: ConnectionId,
        now: Instant,
        wall_clock: DateTime<Utc>,
    ) -> Result<Vec<DuelEvent>, TransitionError> {
        let slot = self.slot_of(connection).ok_or(TransitionError::NotInRoom)?;
        if self.phase != Phase::Ready {
            return Err(TransitionError::InvalidPhase {
                expected: Phase::Ready,
                actual: self.phase,
            });
        }
        if slot != Slot::Host {
            return Err(TransitionError::NotHost);
        }

        let duration = self.config.match_duration;
        let deadline = now
            .checked_add(duration)
            .ok_or(TransitionError::DurationOutOfRange(duration))?;
        let ends_at = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| wall_clock.checked_add_signed(d))
            .ok_or(TransitionError::DurationOutOfRange(duration))?;

        for player in [self.host.as_mut(), self.guest.as_mut()].into_iter().flatten() {
            player.hits = 0;
            player.limiter.reset();
        }

        self.started_at = Some(wall_clock);
        self.ends_at = Some(ends_at);
        self.deadline = Some(deadline);
        self.phase = Phase::Active;

        Ok(vec![DuelEvent::Started {
            started_at: wall_clock,
            ends_at,
            duration,
        }])
    }

    /// Count one hit for the sender.
    ///
    /// Returns `None` when the hit is dropped: wrong phase, unknown
    /// connection, past the deadline, or inside the rate limit.
    pub fn hit(&mut self, connection: ConnectionId, now: Instant) -> Option<DuelEvent> {
        if self.phase != Phase::Active {
            return None;
        }
        if self.deadline.is_some_and(|deadline| now >= deadline) {
            return None;
        }

        let slot = self.slot_of(connection)?;
        let player = self.slot_mut(slot)?;
        if !player.limiter.try_accept(now) {
            return None;
        }

        player.hits = player.hits.saturating_add(1);
        Some(DuelEvent::HitCommitted {
            slot,
            count: player.hits,
        })
    }

    /// End an active match because its countdown elapsed.
    ///
    /// Returns `None` if the session is not `Active` (already abandoned).
    pub fn expire(&mut self) -> Option<DuelEvent> {
        if self.phase != Phase::Active {
            return None;
        }

        let host = self.host.as_ref()?;
        let guest = self.guest.as_ref()?;
        let result = MatchResult::new(
            FinalScore { identity: host.identity.clone(), hits: host.hits },
            FinalScore { identity: guest.identity.clone(), hits: guest.hits },
        );

        self.phase = Phase::Ended;
        self.result = Some(result.clone());
        Some(DuelEvent::Finished(result))
    }

    /// A player left or disconnected. Vacates its slot and ends the session.
    pub fn leave(&mut self, connection: ConnectionId) -> Result<Vec<DuelEvent>, TransitionError> {
        let slot = self.slot_of(connection).ok_or(TransitionError::NotInRoom)?;
        let phase = self.phase;

        let events = match phase {
            Phase::Ended => return Ok(Vec::new()),
            Phase::Waiting => vec![DuelEvent::Closed],
            Phase::Ready | Phase::Active => vec![DuelEvent::Abandoned { leaver: slot, phase }],
        };

        match slot {
            Slot::Host => self.host = None,
            Slot::Guest => self.guest = None,
        }
        self.phase = Phase::Ended;

        Ok(events)
    }

    /// Verify structural invariants.
    pub fn check_invariants(&self) -> Result<(), TransitionError> {
        let host = self.host.is_some();
        let guest = self.guest.is_some();

        match self.phase {
            Phase::Ended => Ok(()),
            _ if !host && !guest => Err(TransitionError::Corrupt("both slots empty")),
            Phase::Waiting if guest => Err(TransitionError::Corrupt("guest present while waiting")),
            Phase::Waiting if !host => Err(TransitionError::Corrupt("waiting room without host")),
            Phase::Ready | Phase::Active if !(host && guest) => {
                Err(TransitionError::Corrupt("started room missing a player"))
            }
            Phase::Active if self.deadline.is_none() => {
                Err(TransitionError::Corrupt("active room without deadline"))
            }
            _ => Ok(()),
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Session id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Room code.
    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Session config.
    pub fn config(&self) -> &DuelConfig {
        &self.config
    }

    /// Which slot a connection holds, if any.
    pub fn slot_of(&self, connection: ConnectionId) -> Option<Slot> {
        if self.host.as_ref().is_some_and(|p| p.connection == connection) {
            Some(Slot::Host)
        } else if self.guest.as_ref().is_some_and(|p| p.connection == connection) {
            Some(Slot::Guest)
        } else {
            None
        }
    }

    /// Connection occupying a slot.
    pub fn connection(&self, slot: Slot) -> Option<ConnectionId> {
        self.slot_ref(slot).map(|p| p.connection)
    }

    /// Identity occupying a slot.
    pub fn identity(&self, slot: Slot) -> Option<&PlayerIdentity> {
        self.slot_ref(slot).map(|p| &p.identity)
    }

    /// Committed hit count for a slot (0 when empty).
    pub fn hits(&self, slot: Slot) -> u32 {
        self.slot_ref(slot).map(|p| p.hits).unwrap_or(0)
    }

    /// Wall-clock start, once `Active`.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Wall-clock end, once `Active`.
    pub fn ends_at(&self) -> Option<DateTime<Utc>> {
        self.ends_at
    }

    /// Final result, once finished by the timer.
    pub fn result(&self) -> Option<&MatchResult> {
        self.result.as_ref()
    }

    fn slot_ref(&self, slot: Slot) -> Option<&PlayerSlot> {
        match slot {
            Slot::Host => self.host.as_ref(),
            Slot::Guest => self.guest.as_ref(),
        }
    }

    fn slot_mut(&mut self, slot: Slot) -> Option<&mut PlayerSlot> {
        match slot {
            Slot::Host => self.host.as_mut(),
            Slot::Guest => self.guest.as_mut(),
        }
    }

    /// Empty both slots without changing phase.
    #[cfg(test)]
    pub(crate) fn corrupt_for_test(&mut self) {
        self.host = None;
        self.guest = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::result::Outcome;

    const HOST: ConnectionId = ConnectionId(1);
    const GUEST: ConnectionId = ConnectionId(2);
    const STRANGER: ConnectionId = ConnectionId(3);

    fn config() -> DuelConfig {
        DuelConfig {
            match_duration: Duration::from_secs(10),
            min_hit_interval: Duration::from_millis(50),
        }
    }

    fn waiting() -> DuelState {
        DuelState::new(
            [7; 16],
            RoomCode::parse("AB12").unwrap(),
            PlayerIdentity::anonymous("Ada"),
            HOST,
            config(),
        )
    }

    fn ready() -> DuelState {
        let mut state = waiting();
        state.join(PlayerIdentity::anonymous("Bo"), GUEST).unwrap();
        state
    }

    fn active(now: Instant) -> DuelState {
        let mut state = ready();
        state.start(HOST, now, Utc::now()).unwrap();
        state
    }

    #[test]
    fn test_new_session_is_waiting() {
        let state = waiting();
        assert_eq!(state.phase(), Phase::Waiting);
        assert_eq!(state.slot_of(HOST), Some(Slot::Host));
        assert!(state.connection(Slot::Guest).is_none());
        assert!(state.check_invariants().is_ok());
    }

    #[test]
    fn test_join_advances_to_ready() {
        let mut state = waiting();
        let events = state.join(PlayerIdentity::anonymous("Bo"), GUEST).unwrap();

        assert_eq!(state.phase(), Phase::Ready);
        assert_eq!(events, vec![DuelEvent::GuestJoined {
            host: PlayerIdentity::anonymous("Ada"),
            guest: PlayerIdentity::anonymous("Bo"),
        }]);
    }

    #[test]
    fn test_second_join_is_full() {
        let mut state = ready();
        let result = state.join(PlayerIdentity::anonymous("Cy"), STRANGER);
        assert_eq!(result, Err(TransitionError::RoomFull));
        assert_eq!(state.connection(Slot::Guest), Some(GUEST));
    }

    #[test]
    fn test_host_cannot_join_own_room() {
        let mut state = waiting();
        assert_eq!(state.join(PlayerIdentity::anonymous("Ada"), HOST), Err(TransitionError::RoomFull));
        assert_eq!(state.phase(), Phase::Waiting);
    }

    #[test]
    fn test_start_requires_ready() {
        let mut state = waiting();
        let result = state.start(HOST, Instant::now(), Utc::now());
        assert_eq!(result, Err(TransitionError::InvalidPhase {
            expected: Phase::Ready,
            actual: Phase::Waiting,
        }));
    }

    #[test]
    fn test_start_requires_host() {
        let mut state = ready();
        assert_eq!(state.start(GUEST, Instant::now(), Utc::now()), Err(TransitionError::NotHost));
        assert_eq!(state.start(STRANGER, Instant::now(), Utc::now()), Err(TransitionError::NotInRoom));
        assert_eq!(state.phase(), Phase::Ready);
    }

    #[test]
    fn test_start_sets_timestamps() {
        let mut state = ready();
        let wall = Utc::now();
        let events = state.start(HOST, Instant::now(), wall).unwrap();

        assert_eq!(state.phase(), Phase::Active);
        assert_eq!(state.started_at(), Some(wall));
        assert_eq!(state.ends_at(), Some(wall + chrono::Duration::seconds(10)));
        assert!(matches!(events[0], DuelEvent::Started { duration, .. } if duration == Duration::from_secs(10)));
    }

    #[test]
    fn test_second_start_is_invalid() {
        let now = Instant::now();
        let mut state = active(now);
        assert!(matches!(
            state.start(HOST, now, Utc::now()),
            Err(TransitionError::InvalidPhase { actual: Phase::Active, .. })
        ));
    }

    #[test]
    fn test_hits_count_per_slot() {
        let t0 = Instant::now();
        let mut state = active(t0);

        let e1 = state.hit(HOST, t0);
        let e2 = state.hit(GUEST, t0);
        let e3 = state.hit(HOST, t0 + Duration::from_millis(60));

        assert_eq!(e1, Some(DuelEvent::HitCommitted { slot: Slot::Host, count: 1 }));
        assert_eq!(e2, Some(DuelEvent::HitCommitted { slot: Slot::Guest, count: 1 }));
        assert_eq!(e3, Some(DuelEvent::HitCommitted { slot: Slot::Host, count: 2 }));
        assert_eq!(state.hits(Slot::Host), 2);
        assert_eq!(state.hits(Slot::Guest), 1);
    }

    #[test]
    fn test_rapid_hits_dropped() {
        let t0 = Instant::now();
        let mut state = active(t0);

        assert!(state.hit(HOST, t0).is_some());
        // Auto-clicker cadence (20ms) inside the 50ms interval
        assert!(state.hit(HOST, t0 + Duration::from_millis(20)).is_none());
        assert!(state.hit(HOST, t0 + Duration::from_millis(40)).is_none());
        assert_eq!(state.hits(Slot::Host), 1);
    }

    #[test]
    fn test_hits_outside_active_dropped() {
        let mut state = ready();
        assert!(state.hit(HOST, Instant::now()).is_none());

        let t0 = Instant::now();
        let mut state = active(t0);
        assert!(state.hit(STRANGER, t0).is_none());
        assert!(state.hit(HOST, t0 + Duration::from_secs(10)).is_none());
        assert_eq!(state.hits(Slot::Host), 0);
    }

    #[test]
    fn test_expire_computes_result() {
        let t0 = Instant::now();
        let mut state = active(t0);
        for i in 0..3 {
            state.hit(HOST, t0 + Duration::from_millis(i * 100));
        }

        let event = state.expire().unwrap();
        let DuelEvent::Finished(result) = event else {
            panic!("expected Finished");
        };
        assert_eq!(result.host.hits, 3);
        assert_eq!(result.guest.hits, 0);
        assert_eq!(result.outcome, Outcome::HostWins);
        assert_eq!(state.phase(), Phase::Ended);
        assert_eq!(state.result(), Some(&result));
    }

    #[test]
    fn test_expire_only_when_active() {
        let mut state = ready();
        assert!(state.expire().is_none());
        assert_eq!(state.phase(), Phase::Ready);
    }

    #[test]
    fn test_leave_while_waiting_closes_silently() {
        let mut state = waiting();
        assert_eq!(state.leave(HOST).unwrap(), vec![DuelEvent::Closed]);
        assert_eq!(state.phase(), Phase::Ended);
    }

    #[test]
    fn test_leave_while_ready_abandons() {
        let mut state = ready();
        let events = state.leave(GUEST).unwrap();
        assert_eq!(events, vec![DuelEvent::Abandoned { leaver: Slot::Guest, phase: Phase::Ready }]);
        assert_eq!(state.phase(), Phase::Ended);
        assert_eq!(state.connection(Slot::Host), Some(HOST));
    }

    #[test]
    fn test_leave_while_active_abandons() {
        let t0 = Instant::now();
        let mut state = active(t0);
        state.hit(GUEST, t0);

        let events = state.leave(HOST).unwrap();
        assert_eq!(events, vec![DuelEvent::Abandoned { leaver: Slot::Host, phase: Phase::Active }]);
        assert!(state.expire().is_none());
        assert!(state.hit(GUEST, t0 + Duration::from_secs(1)).is_none());
    }

    #[test]
    fn test_leave_twice_is_noop() {
        let mut state = ready();
        state.leave(GUEST).unwrap();
        assert_eq!(state.leave(HOST).unwrap(), Vec::new());
    }

    #[test]
    fn test_join_after_end() {
        let mut state = waiting();
        state.leave(HOST).unwrap();
        assert_eq!(
            state.join(PlayerIdentity::anonymous("Bo"), GUEST),
            Err(TransitionError::SessionEnded)
        );
    }

    #[test]
    fn test_counters_zero_on_start() {
        let state = active(Instant::now());
        assert_eq!(state.hits(Slot::Host), 0);
        assert_eq!(state.hits(Slot::Guest), 0);
    }

    #[test]
    fn test_unschedulable_duration_rejected() {
        let mut state = DuelState::new(
            [7; 16],
            RoomCode::parse("AB12").unwrap(),
            PlayerIdentity::anonymous("Ada"),
            HOST,
            DuelConfig {
                match_duration: Duration::from_secs(u64::MAX),
                min_hit_interval: Duration::from_millis(50),
            },
        );
        state.join(PlayerIdentity::anonymous("Bo"), GUEST).unwrap();

        let result = state.start(HOST, Instant::now(), Utc::now());
        assert_eq!(result, Err(TransitionError::DurationOutOfRange(Duration::from_secs(u64::MAX))));
        assert_eq!(state.phase(), Phase::Ready);
        assert!(state.started_at().is_none());
        assert!(state.check_invariants().is_ok());
    }

    #[test]
    fn test_longest_duration_schedules() {
        let mut state = ready();
        state.config.match_duration = MAX_MATCH_DURATION;
        let wall = Utc::now();

        state.start(HOST, Instant::now(), wall).unwrap();
        assert_eq!(state.ends_at(), Some(wall + chrono::Duration::hours(1)));
    }

    #[test]
    fn test_invariant_violation_detected() {
        let mut state = ready();
        state.corrupt_for_test();
        assert_eq!(state.check_invariants(), Err(TransitionError::Corrupt("both slots empty")));
    }

    #[test]
    fn test_identity_from_input() {
        let id = PlayerIdentity::from_input("   ", Slot::Guest, None);
        assert_eq!(id.display_name, "Player 2");

        let long = "x".repeat(100);
        let id = PlayerIdentity::from_input(&long, Slot::Host, Some("acct".into()));
        assert_eq!(id.display_name.len(), MAX_DISPLAY_NAME_LEN);
        assert_eq!(id.account.as_deref(), Some("acct"));

        let id = PlayerIdentity::from_input(" Ada ", Slot::Host, None);
        assert_eq!(id.display_name, "Ada");
    }
}
