//! Duel Session
//!
//! A live session: the duel state machine plus its end timer, behind the
//! per-session lock. Also turns committed duel events into the messages each
//! connection should receive.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::core::ids::ConnectionId;
use crate::game::events::DuelEvent;
use crate::game::state::{DuelState, Phase, Slot, TransitionError};
use crate::network::protocol::{ErrorCode, GameEndInfo, GameStartInfo, ServerMessage};

/// Shared, serialized handle to one session.
///
/// `tokio::sync::Mutex` is fair, so operations on one session are applied
/// one at a time in the order they queued for the lock.
pub type SessionHandle = Arc<Mutex<DuelSession>>;

/// A message addressed to one connection.
pub type Delivery = (ConnectionId, ServerMessage);

/// A live duel session.
#[derive(Debug)]
pub struct DuelSession {
    state: DuelState,
    created_at: Instant,
    timer: Option<JoinHandle<()>>,
    poisoned: bool,
}

impl DuelSession {
    /// Wrap a freshly created state.
    pub fn new(state: DuelState) -> Self {
        Self {
            state,
            created_at: Instant::now(),
            timer: None,
            poisoned: false,
        }
    }

    /// Wrap into a shareable handle.
    pub fn into_handle(self) -> SessionHandle {
        Arc::new(Mutex::new(self))
    }

    /// Read the state machine.
    pub fn state(&self) -> &DuelState {
        &self.state
    }

    /// Mutate the state machine.
    pub fn state_mut(&mut self) -> &mut DuelState {
        &mut self.state
    }

    /// Attach the end timer task.
    pub fn set_timer(&mut self, handle: JoinHandle<()>) {
        self.cancel_timer();
        self.timer = Some(handle);
    }

    /// Abort the end timer, if any.
    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Forget the timer without aborting it. Used by the timer task itself.
    pub fn detach_timer(&mut self) {
        self.timer = None;
    }

    /// Messages each connection receives for a batch of committed events.
    pub fn deliveries(&self, events: &[DuelEvent]) -> Vec<Delivery> {
        let mut out = Vec::new();

        for event in events {
            match event {
                DuelEvent::GuestJoined { host, guest } => {
                    self.push(&mut out, Slot::Host, ServerMessage::Joined {
                        opponent_identity: guest.display_name.clone(),
                    });
                    self.push(&mut out, Slot::Guest, ServerMessage::Joined {
                        opponent_identity: host.display_name.clone(),
                    });
                }
                DuelEvent::Started { started_at, ends_at, duration } => {
                    let info = GameStartInfo {
                        duration_ms: duration.as_millis() as u64,
                        started_at: *started_at,
                        ends_at: *ends_at,
                    };
                    self.push_both(&mut out, ServerMessage::GameStarted(info));
                }
                DuelEvent::HitCommitted { slot, count } => {
                    // Never echoed back to the sender
                    self.push(&mut out, slot.other(), ServerMessage::OpponentScore { count: *count });
                }
                DuelEvent::Finished(result) => {
                    self.push_both(&mut out, ServerMessage::GameEnded(GameEndInfo::from(result)));
                }
                DuelEvent::Abandoned { leaver, .. } => {
                    self.push(&mut out, leaver.other(), ServerMessage::OpponentLeft);
                }
                DuelEvent::Closed => {}
            }
        }

        out
    }

    /// Error notices for whoever is still seated after an internal fault.
    pub fn fault_notices(&self, err: &TransitionError) -> Vec<Delivery> {
        let mut out = Vec::new();
        self.push_both(&mut out, ServerMessage::error(ErrorCode::InternalError, err.to_string()));
        out
    }

    /// Whether the session still accepts commands.
    pub fn is_live(&self) -> bool {
        !self.poisoned && self.state.phase() != Phase::Ended
    }

    /// Mark the session unusable after an invariant violation.
    pub fn poison(&mut self) {
        self.poisoned = true;
        self.cancel_timer();
    }

    /// Time since the room was opened.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn push(&self, out: &mut Vec<Delivery>, slot: Slot, msg: ServerMessage) {
        if let Some(conn) = self.state.connection(slot) {
            out.push((conn, msg));
        }
    }

    fn push_both(&self, out: &mut Vec<Delivery>, msg: ServerMessage) {
        self.push(out, Slot::Host, msg.clone());
        self.push(out, Slot::Guest, msg);
    }
}

/// Session errors. Every variant is caller-correctable and is reported to
/// the originating connection without closing it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No live room with that code.
    #[error("Room not found")]
    RoomNotFound,

    /// Guest slot taken or room already started.
    #[error("Room is full")]
    RoomFull,

    /// Code space saturated.
    #[error("No room codes available")]
    RegistryExhausted,

    /// Command not valid in the current phase.
    #[error("Invalid phase: expected {expected:?}, room is {actual:?}")]
    InvalidPhase {
        /// Phase the command needs.
        expected: Phase,
        /// Phase the room is in.
        actual: Phase,
    },

    /// Connection is not associated with the addressed room.
    #[error("Not in room")]
    NotInRoom,

    /// Guest tried to start.
    #[error("Only the host can start the game")]
    NotHost,

    /// Connection already holds a seat in a live room.
    #[error("Already in a room")]
    AlreadyInRoom,

    /// Credential check rejected the token.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Match length cannot be scheduled; the room is left as it was.
    #[error("Match duration {0:?} is out of range")]
    DurationOutOfRange(Duration),

    /// Session invariant violated; the session was torn down.
    #[error("Internal error: {0}")]
    Corrupt(&'static str),
}

impl SessionError {
    /// Wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::RoomNotFound => ErrorCode::RoomNotFound,
            SessionError::RoomFull => ErrorCode::RoomFull,
            SessionError::RegistryExhausted => ErrorCode::RegistryExhausted,
            SessionError::InvalidPhase { .. } => ErrorCode::InvalidPhase,
            SessionError::NotInRoom => ErrorCode::NotInRoom,
            SessionError::NotHost => ErrorCode::NotHost,
            SessionError::AlreadyInRoom => ErrorCode::AlreadyInRoom,
            SessionError::Unauthorized(_) => ErrorCode::Unauthorized,
            SessionError::DurationOutOfRange(_) | SessionError::Corrupt(_) => ErrorCode::InternalError,
        }
    }

    /// Wire error message.
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::error(self.code(), self.to_string())
    }
}

impl From<TransitionError> for SessionError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::RoomFull => SessionError::RoomFull,
            TransitionError::SessionEnded => SessionError::RoomNotFound,
            TransitionError::NotInRoom => SessionError::NotInRoom,
            TransitionError::NotHost => SessionError::NotHost,
            TransitionError::InvalidPhase { expected, actual } => {
                SessionError::InvalidPhase { expected, actual }
            }
            TransitionError::DurationOutOfRange(d) => SessionError::DurationOutOfRange(d),
            TransitionError::Corrupt(what) => SessionError::Corrupt(what),
        }
    }
}
