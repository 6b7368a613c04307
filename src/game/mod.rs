//! Duel Logic Module
//!
//! Pure duel state machine. No I/O, no clocks, no locks.
//!
//! ## Module Structure
//!
//! - `state`: Phases, slots, identities and the `DuelState` transitions
//! - `events`: Committed state changes emitted by transitions
//! - `result`: End-of-match comparison

pub mod state;
pub mod events;
pub mod result;

// Re-export key types
pub use state::{DuelConfig, DuelState, MAX_MATCH_DURATION, Phase, PlayerIdentity, Slot, TransitionError};
pub use events::DuelEvent;
pub use result::{FinalScore, MatchResult, Outcome};
