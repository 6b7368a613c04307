//! Core primitives.
//!
//! Small value types shared by the duel logic and the network layer.

pub mod ids;
pub mod rate;
pub mod room_code;

// Re-export core types
pub use ids::{ConnectionId, SessionId};
pub use rate::HitRateLimiter;
pub use room_code::{RoomCode, RoomCodeError};
