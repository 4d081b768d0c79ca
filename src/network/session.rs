//! Agent Session
//!
//! One session per agent connection. The session owns the write half of the
//! socket and drains two queues: its mailbox (commands from the server) and
//! the decoded frames produced by its reader task.
//!
//! ```text
//!   Connecting ──settings──► Established ──init complete──► Ready
//!        │                        │                          │
//!        └────────────────────────┴────── close ─────────────┴──► Closed
//! ```

use std::collections::BTreeSet;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::core::framing::{write_message, FrameError, FrameReader};
use crate::game::reservation::ClientId;
use crate::network::protocol::{
    ClientMessage, ConnectionSettings, ControllableTeamInfo, ServerMessage,
};
use crate::network::server::{MatchSource, ServerCommand};

/// Protocol state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for connection settings.
    Connecting,
    /// Settings received.
    Established,
    /// The agent finished initializing.
    Ready,
    /// Terminal.
    Closed,
}

/// Per-match permissions pushed by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchSettings {
    /// Render messages are forwarded.
    pub rendering: bool,
    /// State setting is allowed, including input for any index.
    pub state_setting: bool,
}

/// Commands from the server to a session.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Forward a pre-encoded frame.
    Send(Bytes),
    /// Reply to the session's connection settings.
    Established {
        /// Reservation made for the agent id, if any.
        controllables: Option<ControllableTeamInfo>,
        /// Permissions of the current match.
        settings: MatchSettings,
    },
    /// A reservation made after establishing, replacing any earlier one.
    Reserved(ControllableTeamInfo),
    /// A new roster has no entry for this session any more.
    Released,
    /// Permissions changed with a new match.
    MatchSettings(MatchSettings),
    /// Close the session. A forced close skips the disconnect notice.
    Close {
        /// Server-forced.
        forced: bool,
    },
}

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Connection settings that cannot be honoured.
    #[error("agent '{0}' must close between matches")]
    InvalidSettings(String),

    /// Framing or socket failure.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Socket failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the reader task saw.
enum Inbound {
    Message(ClientMessage),
    Eof,
    Error(FrameError),
}

/// Whether the session keeps running after a step.
enum Flow {
    Continue,
    Close { forced: bool },
}

/// One agent connection.
pub struct Session<W> {
    client_id: ClientId,
    state: SessionState,
    settings: ConnectionSettings,
    team: Option<u32>,
    owned: BTreeSet<u32>,
    match_settings: MatchSettings,
    writer: W,
    server: mpsc::UnboundedSender<ServerCommand>,
}

impl<W: AsyncWrite + Unpin + Send> Session<W> {
    /// Create a session around the write half of a connection.
    pub fn new(client_id: ClientId, writer: W, server: mpsc::UnboundedSender<ServerCommand>) -> Self {
        Self {
            client_id,
            state: SessionState::Connecting,
            settings: ConnectionSettings::default(),
            team: None,
            owned: BTreeSet::new(),
            match_settings: MatchSettings::default(),
            writer,
            server,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run until closed. The server is always told about the close.
    pub async fn run<R>(mut self, reader: R, mut mailbox: mpsc::UnboundedReceiver<SessionCommand>) -> Result<(), SessionError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (inbound_tx, mut inbound) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(read_frames(reader, inbound_tx));

        let result = loop {
            let step = tokio::select! {
                command = mailbox.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => Ok(Flow::Close { forced: true }),
                },
                event = inbound.recv() => match event {
                    Some(Inbound::Message(message)) => self.handle_message(message).await,
                    Some(Inbound::Eof) | None => {
                        debug!(client_id = self.client_id, "agent closed the connection");
                        Ok(Flow::Close { forced: false })
                    }
                    Some(Inbound::Error(e)) => {
                        warn!(client_id = self.client_id, error = %e, "protocol error");
                        Err(SessionError::Frame(e))
                    }
                },
            };

            match step {
                Ok(Flow::Continue) => continue,
                Ok(Flow::Close { forced }) => {
                    self.close(forced).await;
                    break Ok(());
                }
                Err(e) => {
                    self.close(false).await;
                    break Err(e);
                }
            }
        };

        reader_task.abort();
        let _ = self.server.send(ServerCommand::SessionClosed { client_id: self.client_id });
        info!(client_id = self.client_id, agent_id = %self.settings.agent_id, team = ?self.team, "session closed");
        result
    }

    async fn handle_command(&mut self, command: SessionCommand) -> Result<Flow, SessionError> {
        match command {
            SessionCommand::Send(frame) => {
                self.writer.write_all(&frame).await?;
                self.writer.flush().await?;
            }
            SessionCommand::Established { controllables, settings } => {
                self.match_settings = settings;
                if let Some(info) = controllables {
                    self.take_reservation(info).await?;
                }
            }
            SessionCommand::Reserved(info) => self.take_reservation(info).await?,
            SessionCommand::Released => {
                debug!(client_id = self.client_id, indices = ?self.owned, "reservation dropped by new roster");
                self.team = None;
                self.owned.clear();
            }
            SessionCommand::MatchSettings(settings) => self.match_settings = settings,
            SessionCommand::Close { forced } => return Ok(Flow::Close { forced }),
        }
        Ok(Flow::Continue)
    }

    async fn take_reservation(&mut self, info: ControllableTeamInfo) -> Result<(), SessionError> {
        self.team = Some(info.team);
        self.owned = info.controllables.iter().map(|c| c.index).collect();
        debug!(client_id = self.client_id, team = info.team, indices = ?self.owned, "reservation received");
        write_message(&mut self.writer, &ServerMessage::ControllableTeamInfo(info)).await?;
        Ok(())
    }

    async fn handle_message(&mut self, message: ClientMessage) -> Result<Flow, SessionError> {
        if self.state == SessionState::Closed {
            return Ok(Flow::Continue);
        }
        trace!(client_id = self.client_id, kind = message.kind(), "client message");

        match message {
            ClientMessage::ConnectionSettings(settings) => {
                if self.state != SessionState::Connecting {
                    debug!(client_id = self.client_id, "duplicate connection settings ignored");
                    return Ok(Flow::Continue);
                }
                if !settings.agent_id.is_empty() && !settings.close_between_matches {
                    warn!(client_id = self.client_id, agent_id = %settings.agent_id, "agents must close between matches");
                    return Err(SessionError::InvalidSettings(settings.agent_id));
                }

                info!(
                    client_id = self.client_id,
                    agent_id = %settings.agent_id,
                    ball_prediction = settings.wants_ball_predictions,
                    comms = settings.wants_comms,
                    "session established"
                );
                self.state = SessionState::Established;
                self.settings = settings.clone();
                self.notify(ServerCommand::SessionEstablished { client_id: self.client_id, settings });
            }
            ClientMessage::InitComplete => {
                if self.state == SessionState::Established {
                    self.state = SessionState::Ready;
                    self.notify(ServerCommand::SessionReady { client_id: self.client_id });
                } else {
                    debug!(client_id = self.client_id, state = ?self.state, "init complete ignored");
                }
            }
            ClientMessage::PlayerInput(input) => {
                if self.may_command(input.player_index) {
                    self.notify(ServerCommand::PlayerInput {
                        index: input.player_index,
                        controller: input.controller,
                    });
                } else {
                    warn!(client_id = self.client_id, index = input.player_index, "input for unowned index dropped");
                }
            }
            ClientMessage::SetLoadout(change) => {
                if self.may_command(change.index) {
                    self.notify(ServerCommand::SetLoadout { index: change.index, loadout: change.loadout });
                } else {
                    warn!(client_id = self.client_id, index = change.index, "loadout for unowned index dropped");
                }
            }
            ClientMessage::StartCommand { config_path } => {
                self.notify(ServerCommand::StartMatch(MatchSource::Path(config_path.into())));
            }
            ClientMessage::MatchConfiguration(config) => {
                self.notify(ServerCommand::StartMatch(MatchSource::Inline(config)));
            }
            ClientMessage::StopCommand { shutdown_server } => {
                self.notify(ServerCommand::StopMatch { shutdown_server });
            }
            ClientMessage::DesiredGameState(desired) => {
                if self.is_established() && self.match_settings.state_setting {
                    self.notify(ServerCommand::DesiredGameState(desired));
                } else {
                    debug!(client_id = self.client_id, "state setting disabled, request dropped");
                }
            }
            ClientMessage::RenderGroup(group) => {
                if self.is_established() && self.match_settings.rendering {
                    self.notify(ServerCommand::RenderGroup(group));
                }
            }
            ClientMessage::RemoveRenderGroup { id } => {
                if self.is_established() && self.match_settings.rendering {
                    self.notify(ServerCommand::RemoveRenderGroup(id));
                }
            }
            ClientMessage::MatchComm(comm) => {
                if self.is_established() {
                    self.notify(ServerCommand::MatchComm { from: self.client_id, comm });
                }
            }
            ClientMessage::DisconnectSignal => return Ok(Flow::Close { forced: false }),
        }

        Ok(Flow::Continue)
    }

    fn is_established(&self) -> bool {
        matches!(self.state, SessionState::Established | SessionState::Ready)
    }

    fn may_command(&self, index: u32) -> bool {
        self.is_established() && (self.owned.contains(&index) || self.match_settings.state_setting)
    }

    fn notify(&self, command: ServerCommand) {
        if self.server.send(command).is_err() {
            debug!(client_id = self.client_id, "server mailbox closed");
        }
    }

    async fn close(&mut self, forced: bool) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;

        if !forced {
            if let Err(e) = write_message(&mut self.writer, &ServerMessage::DisconnectSignal).await {
                debug!(client_id = self.client_id, error = %e, "disconnect notice not delivered");
            }
        }
        if let Err(e) = self.writer.shutdown().await {
            debug!(client_id = self.client_id, error = %e, "socket shutdown failed");
        }
    }
}

async fn read_frames<R: AsyncRead + Unpin>(reader: R, inbound: mpsc::UnboundedSender<Inbound>) {
    let mut frames = FrameReader::new(reader);
    loop {
        let event = match frames.next_message::<ClientMessage>().await {
            Ok(Some(message)) => Inbound::Message(message),
            Ok(None) => Inbound::Eof,
            Err(e) => Inbound::Error(e),
        };
        let done = !matches!(event, Inbound::Message(_));
        if inbound.send(event).is_err() || done {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::framing::encode;
    use crate::network::protocol::{ControllableInfo, ControllerState, PlayerInput};
    use tokio::io::{duplex, split, DuplexStream};

    struct Harness {
        client: FrameReader<tokio::io::ReadHalf<DuplexStream>>,
        client_tx: tokio::io::WriteHalf<DuplexStream>,
        mailbox: mpsc::UnboundedSender<SessionCommand>,
        server: mpsc::UnboundedReceiver<ServerCommand>,
        task: tokio::task::JoinHandle<Result<(), SessionError>>,
    }

    fn start(client_id: ClientId) -> Harness {
        let (client_end, server_end) = duplex(64 * 1024);
        let (server_read, server_write) = split(server_end);
        let (client_read, client_tx) = split(client_end);
        let (server_tx, server) = mpsc::unbounded_channel();
        let (mailbox, mailbox_rx) = mpsc::unbounded_channel();

        let session = Session::new(client_id, server_write, server_tx);
        let task = tokio::spawn(session.run(server_read, mailbox_rx));

        Harness {
            client: FrameReader::new(client_read),
            client_tx,
            mailbox,
            server,
            task,
        }
    }

    impl Harness {
        async fn send(&mut self, message: ClientMessage) {
            write_message(&mut self.client_tx, &message).await.unwrap();
        }

        /// Push settings and wait until the session has applied them.
        async fn apply_settings(&mut self, settings: MatchSettings) {
            self.mailbox.send(SessionCommand::MatchSettings(settings)).unwrap();
            let marker = encode(&ServerMessage::DisconnectSignal).unwrap();
            self.mailbox.send(SessionCommand::Send(marker)).unwrap();
            assert_eq!(
                self.client.next_message::<ServerMessage>().await.unwrap(),
                Some(ServerMessage::DisconnectSignal)
            );
        }

        async fn establish(&mut self, agent_id: &str) {
            self.send(ClientMessage::ConnectionSettings(ConnectionSettings {
                agent_id: agent_id.to_string(),
                close_between_matches: true,
                ..ConnectionSettings::default()
            }))
            .await;
            assert!(matches!(
                self.server.recv().await,
                Some(ServerCommand::SessionEstablished { .. })
            ));
        }
    }

    fn input(index: u32) -> ClientMessage {
        ClientMessage::PlayerInput(PlayerInput {
            player_index: index,
            controller: ControllerState::default(),
        })
    }

    #[tokio::test]
    async fn test_settings_establish_session() {
        let mut h = start(1);
        h.send(ClientMessage::ConnectionSettings(ConnectionSettings {
            agent_id: "bot/a".to_string(),
            wants_ball_predictions: true,
            close_between_matches: true,
            ..ConnectionSettings::default()
        }))
        .await;

        match h.server.recv().await {
            Some(ServerCommand::SessionEstablished { client_id, settings }) => {
                assert_eq!(client_id, 1);
                assert_eq!(settings.agent_id, "bot/a");
                assert!(settings.wants_ball_predictions);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_agent_must_close_between_matches() {
        let mut h = start(2);
        h.send(ClientMessage::ConnectionSettings(ConnectionSettings {
            agent_id: "bot/a".to_string(),
            close_between_matches: false,
            ..ConnectionSettings::default()
        }))
        .await;

        assert!(matches!(h.server.recv().await, Some(ServerCommand::SessionClosed { client_id: 2 })));
        assert!(matches!(h.task.await.unwrap(), Err(SessionError::InvalidSettings(_))));
        assert_eq!(
            h.client.next_message::<ServerMessage>().await.unwrap(),
            Some(ServerMessage::DisconnectSignal)
        );
    }

    #[tokio::test]
    async fn test_init_complete_once() {
        let mut h = start(3);
        h.send(ClientMessage::InitComplete).await;
        h.establish("").await;
        h.send(ClientMessage::InitComplete).await;
        h.send(ClientMessage::InitComplete).await;
        h.send(ClientMessage::DisconnectSignal).await;

        let mut readies = 0;
        while let Some(command) = h.server.recv().await {
            match command {
                ServerCommand::SessionReady { .. } => readies += 1,
                ServerCommand::SessionClosed { .. } => break,
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(readies, 1);
    }

    #[tokio::test]
    async fn test_input_only_for_owned_indices() {
        let mut h = start(4);
        h.send(input(0)).await;
        h.establish("bot/a").await;

        h.mailbox
            .send(SessionCommand::Established {
                controllables: Some(ControllableTeamInfo {
                    team: 1,
                    controllables: vec![ControllableInfo { index: 2, spawn_id: 77 }],
                }),
                settings: MatchSettings::default(),
            })
            .unwrap();
        assert!(matches!(
            h.client.next_message::<ServerMessage>().await.unwrap(),
            Some(ServerMessage::ControllableTeamInfo(info)) if info.team == 1
        ));

        h.send(input(0)).await;
        h.send(input(2)).await;
        h.send(ClientMessage::DisconnectSignal).await;

        let mut forwarded = Vec::new();
        while let Some(command) = h.server.recv().await {
            match command {
                ServerCommand::PlayerInput { index, .. } => forwarded.push(index),
                ServerCommand::SessionClosed { .. } => break,
                _ => {}
            }
        }
        assert_eq!(forwarded, vec![2]);
    }

    #[tokio::test]
    async fn test_released_claims_stop_input() {
        let mut h = start(12);
        h.establish("bot/a").await;
        h.mailbox
            .send(SessionCommand::Reserved(ControllableTeamInfo {
                team: 0,
                controllables: vec![ControllableInfo { index: 1, spawn_id: 5 }],
            }))
            .unwrap();
        assert!(matches!(
            h.client.next_message::<ServerMessage>().await.unwrap(),
            Some(ServerMessage::ControllableTeamInfo(_))
        ));

        h.mailbox.send(SessionCommand::Released).unwrap();
        h.apply_settings(MatchSettings::default()).await;
        h.send(input(1)).await;
        h.send(ClientMessage::DisconnectSignal).await;

        while let Some(command) = h.server.recv().await {
            match command {
                ServerCommand::PlayerInput { index, .. } => panic!("input for released index {} forwarded", index),
                ServerCommand::SessionClosed { .. } => break,
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn test_state_setting_allows_any_index() {
        let mut h = start(5);
        h.establish("").await;
        h.apply_settings(MatchSettings { rendering: false, state_setting: true }).await;
        h.send(input(6)).await;

        assert!(matches!(h.server.recv().await, Some(ServerCommand::PlayerInput { index: 6, .. })));
    }

    #[tokio::test]
    async fn test_forced_close_skips_notice() {
        let mut h = start(6);
        h.establish("").await;
        h.mailbox.send(SessionCommand::Close { forced: true }).unwrap();

        assert!(h.task.await.unwrap().is_ok());
        assert_eq!(h.client.next_message::<ServerMessage>().await.unwrap(), None);
        assert!(matches!(h.server.recv().await, Some(ServerCommand::SessionClosed { client_id: 6 })));
    }

    #[tokio::test]
    async fn test_graceful_close_sends_notice() {
        let mut h = start(7);
        h.establish("").await;
        h.mailbox.send(SessionCommand::Close { forced: false }).unwrap();

        assert_eq!(
            h.client.next_message::<ServerMessage>().await.unwrap(),
            Some(ServerMessage::DisconnectSignal)
        );
        assert!(h.task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_mailbox_closure_closes_session() {
        let h = start(8);
        drop(h.mailbox);
        assert!(h.task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_unknown_tag_closes_session() {
        let mut h = start(9);
        let mut frame = vec![0, 4];
        frame.extend_from_slice(&99u32.to_le_bytes());
        h.client_tx.write_all(&frame).await.unwrap();

        assert!(matches!(
            h.task.await.unwrap(),
            Err(SessionError::Frame(FrameError::UnknownTag(99)))
        ));
    }

    #[tokio::test]
    async fn test_forwarded_frames_reach_client() {
        let mut h = start(10);
        let frame = encode(&ServerMessage::DisconnectSignal).unwrap();
        h.mailbox.send(SessionCommand::Send(frame)).unwrap();

        assert_eq!(
            h.client.next_message::<ServerMessage>().await.unwrap(),
            Some(ServerMessage::DisconnectSignal)
        );
    }

    #[tokio::test]
    async fn test_render_needs_permission() {
        let mut h = start(11);
        h.establish("").await;
        h.send(ClientMessage::RemoveRenderGroup { id: 1 }).await;
        // socket order: once ready is reported, id 1 has been handled
        h.send(ClientMessage::InitComplete).await;
        assert!(matches!(h.server.recv().await, Some(ServerCommand::SessionReady { client_id: 11 })));

        h.apply_settings(MatchSettings { rendering: true, state_setting: false }).await;
        h.send(ClientMessage::RemoveRenderGroup { id: 2 }).await;

        assert!(matches!(h.server.recv().await, Some(ServerCommand::RemoveRenderGroup(2))));
    }
}
