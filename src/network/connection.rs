//! Connection Handler
//!
//! Adapts one client connection to coordinator operations. Transport
//! agnostic: the server feeds it decoded frames and drains its outbound
//! channel into the socket.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::ids::ConnectionId;
use crate::game::state::{PlayerIdentity, Slot};
use crate::network::auth::CredentialCheck;
use crate::network::coordinator::{RoomTicket, SessionCoordinator};
use crate::network::protocol::{
    ClientMessage, CreateRoomRequest, ErrorCode, JoinRoomRequest, ServerMessage,
};
use crate::network::session::SessionError;

/// State of one client connection.
pub struct ConnectionHandler {
    id: ConnectionId,
    coordinator: Arc<SessionCoordinator>,
    credentials: Option<Arc<dyn CredentialCheck>>,
    outbound: mpsc::Sender<ServerMessage>,
    ticket: Option<RoomTicket>,
    closed: bool,
}

impl ConnectionHandler {
    /// Register a new connection with the coordinator.
    pub async fn open(
        id: ConnectionId,
        coordinator: Arc<SessionCoordinator>,
        credentials: Option<Arc<dyn CredentialCheck>>,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Self {
        coordinator.register_connection(id, outbound.clone()).await;
        debug!("{} opened", id);

        Self {
            id,
            coordinator,
            credentials,
            outbound,
            ticket: None,
            closed: false,
        }
    }

    /// Connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current room association, if any.
    pub fn ticket(&self) -> Option<&RoomTicket> {
        self.ticket.as_ref()
    }

    /// Decode and handle one text frame.
    pub async fn handle_text(&mut self, text: &str) {
        match ClientMessage::from_json(text) {
            Ok(msg) => self.handle(msg).await,
            Err(e) => {
                debug!("Invalid message from {}: {}", self.id, e);
                self.reply(ServerMessage::error(ErrorCode::InvalidInput, "Invalid message format"))
                    .await;
            }
        }
    }

    /// Handle one decoded message. Failures are reported to this connection
    /// only and never close it.
    pub async fn handle(&mut self, msg: ClientMessage) {
        if self.closed {
            return;
        }

        if let Err(err) = self.dispatch(msg).await {
            debug!("{} command rejected: {}", self.id, err);
            self.reply(err.to_message()).await;
        }
    }

    async fn dispatch(&mut self, msg: ClientMessage) -> Result<(), SessionError> {
        let target = msg.target_code().map(str::to_owned);

        match msg {
            ClientMessage::CreateRoom(req) => self.create_room(req).await,
            ClientMessage::JoinRoom(req) => self.join_room(req).await,
            ClientMessage::StartGame { .. } => {
                let ticket = self.ticket_for(target.as_deref())?;
                self.coordinator.start_game(self.id, &ticket).await
            }
            ClientMessage::Hit { .. } => {
                let ticket = self.ticket_for(target.as_deref())?;
                self.coordinator.hit(self.id, &ticket).await;
                Ok(())
            }
            ClientMessage::Leave { .. } => {
                let ticket = self.ticket_for(target.as_deref())?;
                self.coordinator.leave(self.id, &ticket).await;
                self.ticket = None;
                Ok(())
            }
            ClientMessage::Ping { timestamp } => {
                let server_time = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64;
                self.reply(ServerMessage::Pong { timestamp, server_time }).await;
                Ok(())
            }
        }
    }

    async fn create_room(&mut self, req: CreateRoomRequest) -> Result<(), SessionError> {
        self.ensure_unseated().await?;
        let account = self.resolve_account(req.token.as_deref()).await?;
        let identity = PlayerIdentity::from_input(&req.identity, Slot::Host, account);

        self.ticket = Some(self.coordinator.create_room(self.id, identity).await?);
        Ok(())
    }

    async fn join_room(&mut self, req: JoinRoomRequest) -> Result<(), SessionError> {
        self.ensure_unseated().await?;
        let account = self.resolve_account(req.token.as_deref()).await?;
        let identity = PlayerIdentity::from_input(&req.identity, Slot::Guest, account);

        self.ticket = Some(self.coordinator.join_room(self.id, &req.code, identity).await?);
        Ok(())
    }

    /// Reject create/join while seated in a live room; forget a stale seat.
    async fn ensure_unseated(&mut self) -> Result<(), SessionError> {
        if let Some(ticket) = &self.ticket {
            if self.coordinator.is_live(ticket).await {
                return Err(SessionError::AlreadyInRoom);
            }
            self.ticket = None;
        }
        Ok(())
    }

    /// The association a command addresses. An explicit code must match it.
    fn ticket_for(&self, code: Option<&str>) -> Result<RoomTicket, SessionError> {
        match (&self.ticket, code) {
            (Some(ticket), None) => Ok(ticket.clone()),
            (Some(ticket), Some(raw)) if ticket.matches(raw) => Ok(ticket.clone()),
            _ => Err(SessionError::NotInRoom),
        }
    }

    /// Account behind an optional token. Tokens are ignored when no
    /// credential check is configured.
    async fn resolve_account(&self, token: Option<&str>) -> Result<Option<String>, SessionError> {
        let (Some(check), Some(token)) = (&self.credentials, token) else {
            return Ok(None);
        };

        match check.verify(token).await {
            Ok(account) => Ok(Some(account)),
            Err(e) => {
                warn!("{} credential check failed: {}", self.id, e);
                Err(SessionError::Unauthorized(e.to_string()))
            }
        }
    }

    async fn reply(&self, msg: ServerMessage) {
        if self.outbound.send(msg).await.is_err() {
            debug!("{} outbound closed", self.id);
        }
    }

    /// Disconnect. Runs the leave policy for the current room exactly once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(ticket) = self.ticket.take() {
            self.coordinator.leave(self.id, &ticket).await;
        }
        self.coordinator.unregister_connection(self.id).await;
        debug!("{} closed", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::game::state::DuelConfig;
    use crate::network::auth::AuthError;
    use crate::network::registry::RegistryConfig;

    struct FixedCheck;

    #[async_trait]
    impl CredentialCheck for FixedCheck {
        async fn verify(&self, token: &str) -> Result<String, AuthError> {
            match token {
                "good" => Ok("acct-1".to_string()),
                _ => Err(AuthError::BadSignature),
            }
        }
    }

    fn coordinator() -> Arc<SessionCoordinator> {
        Arc::new(SessionCoordinator::new(
            RegistryConfig::default(),
            DuelConfig {
                match_duration: Duration::from_secs(10),
                min_hit_interval: Duration::ZERO,
            },
        ))
    }

    async fn open(
        coordinator: &Arc<SessionCoordinator>,
        credentials: Option<Arc<dyn CredentialCheck>>,
    ) -> (ConnectionHandler, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(64);
        let handler = ConnectionHandler::open(ConnectionId::next(), coordinator.clone(), credentials, tx).await;
        (handler, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn error_code(msgs: &[ServerMessage]) -> Option<ErrorCode> {
        msgs.iter().find_map(|m| match m {
            ServerMessage::Error(e) => Some(e.code),
            _ => None,
        })
    }

    async fn create(handler: &mut ConnectionHandler, rx: &mut mpsc::Receiver<ServerMessage>) -> String {
        handler.handle_text(r#"{"type":"create_room","identity":"Ada"}"#).await;
        match drain(rx).as_slice() {
            [ServerMessage::RoomCreated { code }] => code.clone(),
            other => panic!("expected room_created, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_commands_before_association_not_in_room() {
        let coordinator = coordinator();
        let (mut handler, mut rx) = open(&coordinator, None).await;

        for frame in [r#"{"type":"start_game"}"#, r#"{"type":"hit"}"#, r#"{"type":"leave"}"#] {
            handler.handle_text(frame).await;
            assert_eq!(error_code(&drain(&mut rx)), Some(ErrorCode::NotInRoom));
        }
        assert_eq!(coordinator.registry().room_count().await, 0);
    }

    #[tokio::test]
    async fn test_mismatched_code_not_in_room() {
        let coordinator = coordinator();
        let (mut handler, mut rx) = open(&coordinator, None).await;
        let code = create(&mut handler, &mut rx).await;

        handler.handle(ClientMessage::StartGame { code: Some("ZZZZZZ".into()) }).await;
        assert_eq!(error_code(&drain(&mut rx)), Some(ErrorCode::NotInRoom));

        // Same code in another case still addresses the room
        handler.handle(ClientMessage::StartGame { code: Some(code.to_ascii_lowercase()) }).await;
        assert_eq!(error_code(&drain(&mut rx)), Some(ErrorCode::InvalidPhase));
    }

    #[tokio::test]
    async fn test_invalid_frame_reports_invalid_input() {
        let coordinator = coordinator();
        let (mut handler, mut rx) = open(&coordinator, None).await;

        handler.handle_text("{not json").await;
        assert_eq!(error_code(&drain(&mut rx)), Some(ErrorCode::InvalidInput));
    }

    #[tokio::test]
    async fn test_join_unknown_room() {
        let coordinator = coordinator();
        let (mut handler, mut rx) = open(&coordinator, None).await;

        handler.handle_text(r#"{"type":"join_room","code":"NOPE42","identity":"Bo"}"#).await;
        assert_eq!(error_code(&drain(&mut rx)), Some(ErrorCode::RoomNotFound));
        assert!(handler.ticket().is_none());
    }

    #[tokio::test]
    async fn test_third_player_room_full() {
        let coordinator = coordinator();
        let (mut host, mut host_rx) = open(&coordinator, None).await;
        let (mut guest, _guest_rx) = open(&coordinator, None).await;
        let (mut third, mut third_rx) = open(&coordinator, None).await;

        let code = create(&mut host, &mut host_rx).await;
        guest.handle(ClientMessage::JoinRoom(JoinRoomRequest {
            code: code.clone(),
            identity: "Bo".into(),
            token: None,
        })).await;
        third.handle(ClientMessage::JoinRoom(JoinRoomRequest {
            code,
            identity: "Cy".into(),
            token: None,
        })).await;

        assert_eq!(error_code(&drain(&mut third_rx)), Some(ErrorCode::RoomFull));
    }

    #[tokio::test]
    async fn test_create_while_seated_rejected() {
        let coordinator = coordinator();
        let (mut handler, mut rx) = open(&coordinator, None).await;
        create(&mut handler, &mut rx).await;

        handler.handle_text(r#"{"type":"create_room","identity":"Ada"}"#).await;
        assert_eq!(error_code(&drain(&mut rx)), Some(ErrorCode::AlreadyInRoom));
        assert_eq!(coordinator.registry().room_count().await, 1);
    }

    #[tokio::test]
    async fn test_leave_then_create_again() {
        let coordinator = coordinator();
        let (mut handler, mut rx) = open(&coordinator, None).await;
        create(&mut handler, &mut rx).await;

        handler.handle_text(r#"{"type":"leave"}"#).await;
        assert!(drain(&mut rx).is_empty());
        assert!(handler.ticket().is_none());

        create(&mut handler, &mut rx).await;
        assert_eq!(coordinator.registry().room_count().await, 1);
    }

    #[tokio::test]
    async fn test_close_runs_leave_once() {
        let coordinator = coordinator();
        let (mut host, mut host_rx) = open(&coordinator, None).await;
        let (mut guest, mut guest_rx) = open(&coordinator, None).await;

        let code = create(&mut host, &mut host_rx).await;
        guest.handle_text(&format!(r#"{{"type":"join_room","code":"{}","identity":"Bo"}}"#, code)).await;
        drain(&mut host_rx);
        drain(&mut guest_rx);

        guest.close().await;
        guest.close().await;

        assert_eq!(drain(&mut host_rx), vec![ServerMessage::OpponentLeft]);
        assert_eq!(coordinator.registry().room_count().await, 0);

        // Commands after close are ignored
        guest.handle_text(r#"{"type":"hit"}"#).await;
        assert!(drain(&mut guest_rx).is_empty());
    }

    #[tokio::test]
    async fn test_default_names() {
        let coordinator = coordinator();
        let (mut host, mut host_rx) = open(&coordinator, None).await;
        let (mut guest, mut guest_rx) = open(&coordinator, None).await;

        host.handle_text(r#"{"type":"create_room"}"#).await;
        let Some(ServerMessage::RoomCreated { code }) = drain(&mut host_rx).pop() else {
            panic!("expected room_created");
        };
        guest.handle_text(&format!(r#"{{"type":"join_room","room_code":"{}"}}"#, code)).await;

        assert_eq!(drain(&mut host_rx), vec![ServerMessage::Joined { opponent_identity: "Player 2".into() }]);
        assert_eq!(drain(&mut guest_rx), vec![ServerMessage::Joined { opponent_identity: "Player 1".into() }]);
    }

    #[tokio::test]
    async fn test_bad_token_unauthorized() {
        let coordinator = coordinator();
        let check: Arc<dyn CredentialCheck> = Arc::new(FixedCheck);
        let (mut handler, mut rx) = open(&coordinator, Some(check)).await;

        handler.handle(ClientMessage::CreateRoom(CreateRoomRequest {
            identity: "Ada".into(),
            token: Some("bad".into()),
        })).await;
        assert_eq!(error_code(&drain(&mut rx)), Some(ErrorCode::Unauthorized));
        assert_eq!(coordinator.registry().room_count().await, 0);

        handler.handle(ClientMessage::CreateRoom(CreateRoomRequest {
            identity: "Ada".into(),
            token: Some("good".into()),
        })).await;
        assert!(matches!(drain(&mut rx).as_slice(), [ServerMessage::RoomCreated { .. }]));

        let ticket = handler.ticket().cloned().unwrap();
        let (_, session) = coordinator.registry().lock(&ticket.code, None).await.unwrap();
        let identity = session.state().identity(Slot::Host).cloned().unwrap();
        assert_eq!(identity.account.as_deref(), Some("acct-1"));
    }

    #[tokio::test]
    async fn test_token_ignored_without_credential_check() {
        let coordinator = coordinator();
        let (mut handler, mut rx) = open(&coordinator, None).await;

        handler.handle(ClientMessage::CreateRoom(CreateRoomRequest {
            identity: "Ada".into(),
            token: Some("anything".into()),
        })).await;
        assert!(matches!(drain(&mut rx).as_slice(), [ServerMessage::RoomCreated { .. }]));
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let coordinator = coordinator();
        let (mut handler, mut rx) = open(&coordinator, None).await;

        handler.handle_text(r#"{"type":"ping","timestamp":42}"#).await;
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ServerMessage::Pong { timestamp: 42, server_time }] if *server_time > 0
        ));
    }
}
