//! Duel Events
//!
//! Committed state changes produced by the duel state machine.
//! The network layer turns each event into per-connection messages.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::game::result::MatchResult;
use crate::game::state::{Phase, PlayerIdentity, Slot};

/// A state change committed by a [`DuelState`](crate::game::state::DuelState) transition.
#[derive(Clone, Debug, PartialEq)]
pub enum DuelEvent {
    /// Second player occupied the guest slot.
    GuestJoined {
        /// Host identity.
        host: PlayerIdentity,
        /// Guest identity.
        guest: PlayerIdentity,
    },

    /// Host started the match; counters are zeroed.
    Started {
        /// Wall-clock start.
        started_at: DateTime<Utc>,
        /// Wall-clock end.
        ends_at: DateTime<Utc>,
        /// Countdown length.
        duration: Duration,
    },

    /// A hit was accepted and committed.
    HitCommitted {
        /// Who hit.
        slot: Slot,
        /// Sender's counter after the hit.
        count: u32,
    },

    /// Countdown elapsed.
    Finished(MatchResult),

    /// A player left while an opponent was present.
    Abandoned {
        /// Who left.
        leaver: Slot,
        /// Phase at the moment of leaving.
        phase: Phase,
    },

    /// The host left before anyone joined.
    Closed,
}

impl DuelEvent {
    /// Whether this event ends the session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DuelEvent::Finished(_) | DuelEvent::Abandoned { .. } | DuelEvent::Closed
        )
    }
}
