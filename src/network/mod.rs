//! Network Layer
//!
//! WebSocket server, wire protocol and the concurrent session plumbing:
//! room registry, per-session locking, coordinator and connection handler.
//! All duel rules live in `game/`.

pub mod auth;
pub mod connection;
pub mod coordinator;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use auth::{AccountClaims, AuthConfig, AuthError, CredentialCheck, JwtCredentialCheck, VerifyingKey};
pub use connection::ConnectionHandler;
pub use coordinator::{RoomTicket, SessionCoordinator};
pub use protocol::{ClientMessage, ErrorCode, ServerMessage};
pub use registry::{RegistryConfig, RoomRegistry};
pub use server::{ConfigError, DuelServer, DuelServerError, ServerConfig};
pub use session::{DuelSession, SessionError, SessionHandle};
