//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame is a JSON object tagged by a snake_case `"type"` field.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::game::result::{FinalScore, MatchResult, Outcome};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open a new room as host.
    CreateRoom(CreateRoomRequest),

    /// Join an existing room as guest.
    JoinRoom(JoinRoomRequest),

    /// Host starts the match.
    StartGame {
        /// Room the command targets; defaults to the current room.
        #[serde(default, alias = "room_code")]
        code: Option<String>,
    },

    /// One hit on the target.
    Hit {
        /// Room the command targets; defaults to the current room.
        #[serde(default, alias = "room_code")]
        code: Option<String>,
    },

    /// Leave the current room.
    Leave {
        /// Room the command targets; defaults to the current room.
        #[serde(default, alias = "room_code")]
        code: Option<String>,
    },

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        #[serde(default)]
        timestamp: u64,
    },
}

/// Room creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    /// Display name.
    #[serde(default, alias = "username")]
    pub identity: String,
    /// Account token for the credential check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Room join request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRoomRequest {
    /// Room code, any case.
    #[serde(alias = "room_code")]
    pub code: String,
    /// Display name.
    #[serde(default, alias = "username")]
    pub identity: String,
    /// Account token for the credential check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Room created; share this code with the opponent.
    RoomCreated {
        /// Room code.
        code: String,
    },

    /// Both slots are occupied. Sent to each side with the other's name.
    Joined {
        /// Opponent's display name.
        opponent_identity: String,
    },

    /// Countdown started.
    GameStarted(GameStartInfo),

    /// Opponent's committed hit count.
    OpponentScore {
        /// Opponent's counter after the relayed hit.
        count: u32,
    },

    /// Opponent left or disconnected; the room is closed.
    OpponentLeft,

    /// Authoritative final result, identical for both sides.
    GameEnded(GameEndInfo),

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server time (Unix millis).
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Reason.
        reason: String,
    },
}

/// Information when the match starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStartInfo {
    /// Countdown length in milliseconds.
    pub duration_ms: u64,
    /// Wall-clock start.
    pub started_at: DateTime<Utc>,
    /// Wall-clock end.
    pub ends_at: DateTime<Utc>,
}

/// One side of the final result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerTally {
    /// Display name.
    pub identity: String,
    /// Final hit count.
    pub hits: u32,
}

impl From<&FinalScore> for PlayerTally {
    fn from(score: &FinalScore) -> Self {
        Self {
            identity: score.identity.display_name.clone(),
            hits: score.hits,
        }
    }
}

/// Match end information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEndInfo {
    /// Host tally.
    pub host: PlayerTally,
    /// Guest tally.
    pub guest: PlayerTally,
    /// Who won.
    pub outcome: Outcome,
}

impl From<&MatchResult> for GameEndInfo {
    fn from(result: &MatchResult) -> Self {
        Self {
            host: PlayerTally::from(&result.host),
            guest: PlayerTally::from(&result.guest),
            outcome: result.outcome,
        }
    }
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No live room with that code.
    RoomNotFound,
    /// Room already has two players or has started.
    RoomFull,
    /// No free room codes.
    RegistryExhausted,
    /// Command not valid in the room's current phase.
    InvalidPhase,
    /// Connection is not in the addressed room.
    NotInRoom,
    /// Only the host may start.
    NotHost,
    /// Connection is already in a live room.
    AlreadyInRoom,
    /// Token rejected by the credential check.
    Unauthorized,
    /// Frame could not be decoded.
    InvalidInput,
    /// Room torn down after an internal fault.
    InternalError,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Room code the command names explicitly, if any.
    pub fn target_code(&self) -> Option<&str> {
        match self {
            ClientMessage::StartGame { code }
            | ClientMessage::Hit { code }
            | ClientMessage::Leave { code } => code.as_deref(),
            _ => None,
        }
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Build an error message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError {
            code,
            message: message.into(),
        })
    }
}
