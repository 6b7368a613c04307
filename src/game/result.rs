//! Match Results
//!
//! End-of-match comparison. Computed once on the server from the committed
//! counters and delivered identically to both players.

use std::cmp::Ordering;

use serde::{Serialize, Deserialize};

use crate::game::state::{PlayerIdentity, Slot};

/// Outcome of a finished duel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Host finished with strictly more hits.
    HostWins,
    /// Guest finished with strictly more hits.
    GuestWins,
    /// Equal counters.
    Draw,
}

impl Outcome {
    /// Decide the outcome from the two final counters.
    pub fn decide(host_hits: u32, guest_hits: u32) -> Self {
        match host_hits.cmp(&guest_hits) {
            Ordering::Greater => Outcome::HostWins,
            Ordering::Less => Outcome::GuestWins,
            Ordering::Equal => Outcome::Draw,
        }
    }

    /// Winning slot, if any.
    pub fn winner(self) -> Option<Slot> {
        match self {
            Outcome::HostWins => Some(Slot::Host),
            Outcome::GuestWins => Some(Slot::Guest),
            Outcome::Draw => None,
        }
    }
}

/// One side's final tally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalScore {
    /// Player identity at match end.
    pub identity: PlayerIdentity,
    /// Final committed hit count.
    pub hits: u32,
}

/// Authoritative end-of-match result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Host's final tally.
    pub host: FinalScore,
    /// Guest's final tally.
    pub guest: FinalScore,
    /// Comparison of the two counters.
    pub outcome: Outcome,
}

impl MatchResult {
    /// Build a result from the final tallies.
    pub fn new(host: FinalScore, guest: FinalScore) -> Self {
        let outcome = Outcome::decide(host.hits, guest.hits);
        Self { host, guest, outcome }
    }

    /// Tally for one slot.
    pub fn score(&self, slot: Slot) -> &FinalScore {
        match slot {
            Slot::Host => &self.host,
            Slot::Guest => &self.guest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn score(name: &str, hits: u32) -> FinalScore {
        FinalScore {
            identity: PlayerIdentity::anonymous(name),
            hits,
        }
    }

    #[test]
    fn test_host_wins() {
        let result = MatchResult::new(score("Ada", 3), score("Bo", 0));
        assert_eq!(result.outcome, Outcome::HostWins);
        assert_eq!(result.outcome.winner(), Some(Slot::Host));
    }

    #[test]
    fn test_guest_wins() {
        assert_eq!(Outcome::decide(4, 9), Outcome::GuestWins);
    }

    #[test]
    fn test_draw() {
        let result = MatchResult::new(score("Ada", 7), score("Bo", 7));
        assert_eq!(result.outcome, Outcome::Draw);
        assert_eq!(result.outcome.winner(), None);
    }

    #[test]
    fn test_outcome_wire_names() {
        assert_eq!(serde_json::to_string(&Outcome::HostWins).unwrap(), "\"host_wins\"");
        assert_eq!(serde_json::to_string(&Outcome::Draw).unwrap(), "\"draw\"");
    }

    proptest! {
        #[test]
        fn prop_outcome_is_pure_comparison(a in any::<u32>(), b in any::<u32>()) {
            let outcome = Outcome::decide(a, b);
            prop_assert_eq!(outcome == Outcome::HostWins, a > b);
            prop_assert_eq!(outcome == Outcome::GuestWins, a < b);
            prop_assert_eq!(outcome == Outcome::Draw, a == b);
        }

        #[test]
        fn prop_outcome_antisymmetric(a in any::<u32>(), b in any::<u32>()) {
            let swapped = match Outcome::decide(b, a) {
                Outcome::HostWins => Outcome::GuestWins,
                Outcome::GuestWins => Outcome::HostWins,
                Outcome::Draw => Outcome::Draw,
            };
            prop_assert_eq!(Outcome::decide(a, b), swapped);
        }
    }
}
