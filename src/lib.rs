//! # Hit Duel Server
//!
//! Real-time two-player duel sessions: two clients meet in a room by code,
//! the host starts a short countdown, and every hit is counted by the server
//! and relayed to the opponent until the timer ends the match.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     HIT DUEL SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Primitives                               │
//! │  ├── room_code.rs - Short human-shareable room codes         │
//! │  ├── rate.rs      - Per-player hit rate limiter              │
//! │  └── ids.rs       - Session and connection ids               │
//! │                                                              │
//! │  game/            - Duel rules (pure, no I/O)                │
//! │  ├── state.rs     - Phases, slots and transitions            │
//! │  ├── events.rs    - Committed state changes                  │
//! │  └── result.rs    - End-of-match comparison                  │
//! │                                                              │
//! │  network/         - Concurrency and transport                │
//! │  ├── registry.rs  - Room code → session map                  │
//! │  ├── session.rs   - Locked session + end timer               │
//! │  ├── coordinator.rs - Serialized per-session operations      │
//! │  ├── connection.rs  - One client connection                  │
//! │  ├── server.rs    - WebSocket server                         │
//! │  ├── protocol.rs  - Message types                            │
//! │  └── auth.rs      - Credential check                         │
//! │                                                              │
//! │  services/        - Records and achievements                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ordering Guarantee
//!
//! Every mutation of one session (join, start, each hit, end) runs under
//! that session's lock, and the resulting messages are queued before the
//! lock is released. Each client therefore sees the opponent's counter
//! strictly in commit order, and both see the same final result.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod services;

// Re-export commonly used types
pub use core::{ConnectionId, HitRateLimiter, RoomCode, SessionId};
pub use game::{DuelConfig, DuelEvent, DuelState, MatchResult, Outcome, Phase, PlayerIdentity, Slot};
pub use network::{DuelServer, ServerConfig, SessionCoordinator};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
