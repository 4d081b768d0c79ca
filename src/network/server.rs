//! Agent Server
//!
//! Accepts agent connections, owns the agent reservation and relays traffic
//! between sessions and the game bridge.
//!
//! Three long-lived tasks: the accept loop, the bridge, and the orchestrator
//! loop that drains [`ServerCommand`]s. The session registry is the one
//! structure both the accept loop and the orchestrator touch, so it sits
//! behind a lock; everything else lives inside the orchestrator.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::game::config::{MatchConfiguration, PlayerLoadout};
use crate::game::external::{BallPredictor, MatchConfigProvider, ProcessLauncher};
use crate::game::reservation::{AgentReservation, ClientId};
use crate::game::state::{FieldInfo, GamePacket};
use crate::network::bridge::{Bridge, BridgeCommand, BridgeConfig, BridgeError};
use crate::network::protocol::{
    ConnectionSettings, ControllableInfo, ControllableTeamInfo, ControllerState, DesiredGameState,
    MatchComm, RenderGroup, ServerMessage,
};
use crate::network::session::{MatchSettings, Session, SessionCommand};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address agents connect to.
    pub agent_addr: SocketAddr,
    /// Address of the game process.
    pub game_addr: SocketAddr,
    /// Maximum concurrent agent connections.
    pub max_connections: usize,
    /// Delay between attempts to reach the game.
    pub game_retry_interval: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            agent_addr: SocketAddr::from(([127, 0, 0, 1], 23234)),
            game_addr: SocketAddr::from(([127, 0, 0, 1], 23233)),
            max_connections: 64,
            game_retry_interval: Duration::from_millis(250),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `AGENT_BRIDGE_*` environment variables.
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            agent_addr: env_var("AGENT_BRIDGE_ADDR").unwrap_or(defaults.agent_addr),
            game_addr: env_var("AGENT_BRIDGE_GAME_ADDR").unwrap_or(defaults.game_addr),
            max_connections: env_var("AGENT_BRIDGE_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            game_retry_interval: env_var("AGENT_BRIDGE_RETRY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.game_retry_interval),
            version: defaults.version,
        }
    }
}

fn env_var<T: FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(name, value = %value, "ignoring unparseable environment variable");
            None
        }
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind the agent listener.
    #[error("failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// The game bridge stopped with an error.
    #[error("bridge failed: {0}")]
    Bridge(#[from] BridgeError),

    /// A worker task panicked or was cancelled.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Where a match configuration comes from.
#[derive(Debug, Clone)]
pub enum MatchSource {
    /// Loaded through the configuration provider.
    Path(PathBuf),
    /// Sent inline by an agent.
    Inline(Box<MatchConfiguration>),
}

/// Messages drained by the orchestrator.
#[derive(Debug)]
pub enum ServerCommand {
    /// A session received its connection settings.
    SessionEstablished {
        /// Session.
        client_id: ClientId,
        /// What it asked for.
        settings: ConnectionSettings,
    },
    /// A session finished initializing.
    SessionReady {
        /// Session.
        client_id: ClientId,
    },
    /// A session ended.
    SessionClosed {
        /// Session.
        client_id: ClientId,
    },
    /// Start a match.
    StartMatch(MatchSource),
    /// Stop the match.
    StopMatch {
        /// Also stop the server.
        shutdown_server: bool,
    },
    /// Input for a player index.
    PlayerInput {
        /// Player index.
        index: u32,
        /// Controller.
        controller: ControllerState,
    },
    /// Loadout change.
    SetLoadout {
        /// Player index.
        index: u32,
        /// New loadout.
        loadout: PlayerLoadout,
    },
    /// State-setting request.
    DesiredGameState(DesiredGameState),
    /// Debug drawing.
    RenderGroup(RenderGroup),
    /// Debug drawing removal.
    RemoveRenderGroup(i32),
    /// Match comm to relay.
    MatchComm {
        /// Sending session.
        from: ClientId,
        /// Content.
        comm: MatchComm,
    },
    /// The bridge accepted a configuration.
    MatchConfigured(Box<MatchConfiguration>),
    /// A reduced game tick.
    GameTick(Box<GamePacket>),
    /// Field layout changed.
    FieldInfo(FieldInfo),
    /// The game ended the match.
    MatchEnded,
    /// A start request failed.
    MatchStartFailed {
        /// What went wrong.
        reason: String,
        /// The running match was stopped as well.
        stopped: bool,
    },
    /// The game connection is gone.
    BridgeLost,
    /// Stop everything.
    Shutdown,
}

/// External collaborators the server drives.
pub struct Services {
    /// Starts the game, bots and scripts.
    pub launcher: Box<dyn ProcessLauncher>,
    /// Ball trajectory prediction.
    pub predictor: Box<dyn BallPredictor>,
    /// Loads configuration files.
    pub provider: Box<dyn MatchConfigProvider>,
}

/// Registry entry for one connection.
struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionCommand>,
    join: JoinHandle<()>,
    settings: Option<ConnectionSettings>,
    team: Option<u32>,
    ready: bool,
    closing: bool,
}

impl SessionHandle {
    fn is_established(&self) -> bool {
        self.settings.is_some() && !self.closing
    }

    fn send(&self, command: SessionCommand) {
        // a closed mailbox means the session is already on its way out
        let _ = self.tx.send(command);
    }
}

type Registry = Arc<RwLock<BTreeMap<ClientId, SessionHandle>>>;

/// Cloneable handle for talking to a running server.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    tx: mpsc::UnboundedSender<ServerCommand>,
}

impl ServerHandle {
    /// Start a match.
    pub fn start_match(&self, source: MatchSource) {
        let _ = self.tx.send(ServerCommand::StartMatch(source));
    }

    /// Stop the server; the game is told to end the match first.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ServerCommand::Shutdown);
    }
}

/// The agent server.
pub struct AgentServer {
    config: ServerConfig,
    listener: TcpListener,
    services: Services,
    registry: Registry,
    shutdown_tx: broadcast::Sender<()>,
    tx: mpsc::UnboundedSender<ServerCommand>,
    rx: mpsc::UnboundedReceiver<ServerCommand>,
}

impl AgentServer {
    /// Bind the agent listener.
    pub async fn bind(config: ServerConfig, services: Services) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.agent_addr).await?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let (tx, rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            listener,
            services,
            registry: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
            tx,
            rx,
        })
    }

    /// Address agents connect to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for posting commands.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle { tx: self.tx.clone() }
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.len()
    }

    /// Run until shutdown. Returns the bridge's error if the game went away.
    #[instrument(skip(self), fields(addr = %self.config.agent_addr))]
    pub async fn run(self) -> Result<(), ServerError> {
        let AgentServer { config, listener, services, registry, shutdown_tx, tx, mut rx } = self;
        info!(version = %config.version, game = %config.game_addr, "agent server listening");

        let (bridge_tx, bridge_rx) = mpsc::unbounded_channel();
        let bridge = Bridge::new(
            BridgeConfig {
                game_addr: config.game_addr,
                retry_interval: config.game_retry_interval,
            },
            bridge_rx,
            tx.clone(),
            services.launcher,
        );
        let bridge_task = tokio::spawn(bridge.run());

        let accept_task = tokio::spawn(accept_loop(
            listener,
            registry.clone(),
            tx.clone(),
            shutdown_tx.subscribe(),
            config.max_connections,
        ));
        drop(tx);

        let mut orchestrator = Orchestrator {
            registry: registry.clone(),
            bridge: Some(bridge_tx),
            reservation: AgentReservation::new(),
            predictor: services.predictor,
            provider: services.provider,
            match_settings: MatchSettings::default(),
            config_frame: None,
            field_frame: None,
        };

        while let Some(command) = rx.recv().await {
            if !orchestrator.handle(command).await {
                break;
            }
        }

        info!("shutting down");
        let _ = shutdown_tx.send(());
        if let Err(e) = accept_task.await {
            warn!(error = %e, "accept loop did not stop cleanly");
        }

        orchestrator.bridge = None;
        let bridge_result = bridge_task.await;

        let sessions = std::mem::take(&mut *registry.write().await);
        for (client_id, handle) in sessions {
            drop(handle.tx);
            if let Err(e) = handle.join.await {
                warn!(client_id, error = %e, "session task failed");
            }
        }

        match bridge_result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(ServerError::Internal(e.to_string())),
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    registry: Registry,
    server: mpsc::UnboundedSender<ServerCommand>,
    mut shutdown_rx: broadcast::Receiver<()>,
    max_connections: usize,
) {
    let mut next_client_id: ClientId = 1;

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let mut sessions = registry.write().await;
                        if sessions.len() >= max_connections {
                            warn!(%addr, "connection limit reached, rejecting");
                            continue;
                        }
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(%addr, error = %e, "could not disable nagle");
                        }

                        let client_id = next_client_id;
                        next_client_id = next_client_id.wrapping_add(1).max(1);

                        let (read, write) = stream.into_split();
                        let (tx, rx) = mpsc::unbounded_channel();
                        let session = Session::new(client_id, write, server.clone());
                        let join = tokio::spawn(async move {
                            if let Err(e) = session.run(read, rx).await {
                                debug!(client_id, error = %e, "session ended with error");
                            }
                        });

                        // registered under the lock so the close can never overtake the insert
                        sessions.insert(client_id, SessionHandle {
                            tx,
                            join,
                            settings: None,
                            team: None,
                            ready: false,
                            closing: false,
                        });
                        info!(client_id, %addr, "agent connected");
                    }
                    Err(e) => {
                        error!(error = %e, "accept error");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("accept loop stopping");
                break;
            }
        }
    }
}

/// State owned by the orchestrator loop.
struct Orchestrator {
    registry: Registry,
    bridge: Option<mpsc::UnboundedSender<BridgeCommand>>,
    reservation: AgentReservation,
    predictor: Box<dyn BallPredictor>,
    provider: Box<dyn MatchConfigProvider>,
    match_settings: MatchSettings,
    config_frame: Option<Bytes>,
    field_frame: Option<Bytes>,
}

impl Orchestrator {
    /// Handle one command. `false` stops the server.
    async fn handle(&mut self, command: ServerCommand) -> bool {
        match command {
            ServerCommand::SessionEstablished { client_id, settings } => {
                self.on_established(client_id, settings).await;
            }
            ServerCommand::SessionReady { client_id } => {
                if let Some(handle) = self.registry.write().await.get_mut(&client_id) {
                    handle.ready = true;
                }
                self.announce_ready(client_id);
            }
            ServerCommand::SessionClosed { client_id } => {
                self.registry.write().await.remove(&client_id);
                let released = self.reservation.unreserve(client_id);
                if !released.is_empty() {
                    info!(client_id, indices = ?released, "reservation released");
                }
            }
            ServerCommand::StartMatch(source) => self.on_start(source).await,
            ServerCommand::StopMatch { shutdown_server } => {
                self.to_bridge(BridgeCommand::StopMatch);
                if shutdown_server {
                    info!("stop requested with server shutdown");
                    self.close_sessions(|_| true, false).await;
                    return false;
                }
                self.close_sessions(closes_between_matches, false).await;
            }
            ServerCommand::PlayerInput { index, controller } => {
                self.to_bridge(BridgeCommand::PlayerInput { index, controller });
            }
            ServerCommand::SetLoadout { index, loadout } => {
                self.to_bridge(BridgeCommand::SetLoadout { index, loadout });
            }
            ServerCommand::DesiredGameState(desired) => self.to_bridge(BridgeCommand::DesiredGameState(desired)),
            ServerCommand::RenderGroup(group) => self.to_bridge(BridgeCommand::RenderGroup(group)),
            ServerCommand::RemoveRenderGroup(id) => self.to_bridge(BridgeCommand::RemoveRenderGroup(id)),
            ServerCommand::MatchComm { from, comm } => self.relay_comm(from, comm).await,
            ServerCommand::MatchConfigured(config) => self.on_configured(*config).await,
            ServerCommand::GameTick(packet) => self.on_tick(&packet).await,
            ServerCommand::FieldInfo(info) => {
                self.field_frame = encode_frame(&ServerMessage::FieldInfo(info));
                if let Some(frame) = &self.field_frame {
                    self.broadcast(frame).await;
                }
            }
            ServerCommand::MatchEnded => info!("match ended"),
            ServerCommand::MatchStartFailed { reason, stopped } => {
                warn!(%reason, stopped, "match start failed");
                if stopped {
                    self.close_sessions(closes_between_matches, false).await;
                }
            }
            ServerCommand::BridgeLost => {
                self.close_sessions(|_| true, false).await;
                return false;
            }
            ServerCommand::Shutdown => return false,
        }
        true
    }

    fn to_bridge(&self, command: BridgeCommand) {
        let delivered = self.bridge.as_ref().is_some_and(|bridge| bridge.send(command).is_ok());
        if !delivered {
            debug!("bridge gone, command dropped");
        }
    }

    /// Count a ready session's claims towards the spawn gate. Sessions that
    /// hold nothing yet are counted when a later reservation lands.
    fn announce_ready(&mut self, client_id: ClientId) {
        if self.reservation.mark_ready(client_id) > 0 {
            let (ready, total) = self.reservation.ready_status();
            info!(client_id, ready, total, "agent ready");
            self.to_bridge(BridgeCommand::ConnectionReady);
        } else {
            debug!(client_id, "ready session holds no reservation yet");
        }
    }

    fn reserve(&mut self, client_id: ClientId, agent_id: &str) -> Option<ControllableTeamInfo> {
        let claimed = if self.reservation.is_hivemind(agent_id) {
            self.reservation.reserve_agents(client_id, agent_id)
        } else {
            self.reservation
                .reserve_agent(client_id, agent_id)
                .map(|(claim, team)| (vec![claim], team))
        };

        match claimed {
            Some((claims, team)) => {
                info!(client_id, agent_id, team, count = claims.len(), "agent reserved");
                Some(ControllableTeamInfo {
                    team,
                    controllables: claims
                        .into_iter()
                        .map(|(index, spawn_id)| ControllableInfo { index, spawn_id })
                        .collect(),
                })
            }
            None => {
                warn!(client_id, agent_id, "no unclaimed entry for agent");
                None
            }
        }
    }

    async fn on_established(&mut self, client_id: ClientId, settings: ConnectionSettings) {
        let controllables = if settings.agent_id.is_empty() {
            None
        } else {
            self.reserve(client_id, &settings.agent_id)
        };

        let mut sessions = self.registry.write().await;
        let Some(handle) = sessions.get_mut(&client_id) else {
            // closed before we got here; give the claims back
            self.reservation.unreserve(client_id);
            return;
        };

        handle.team = controllables.as_ref().map(|info| info.team);
        handle.settings = Some(settings);
        handle.send(SessionCommand::Established {
            controllables,
            settings: self.match_settings,
        });
        if let Some(frame) = &self.config_frame {
            handle.send(SessionCommand::Send(frame.clone()));
        }
        if let Some(frame) = &self.field_frame {
            handle.send(SessionCommand::Send(frame.clone()));
        }
    }

    async fn on_start(&mut self, source: MatchSource) {
        let config = match source {
            MatchSource::Path(path) => match self.provider.load(&path) {
                Ok(config) => config,
                Err(e) => {
                    error!(error = %e, "could not load match configuration");
                    return;
                }
            },
            MatchSource::Inline(config) => *config,
        };

        if let Err(findings) = config.validate() {
            for finding in &findings {
                warn!(%finding, "configuration rejected");
            }
            return;
        }

        self.close_sessions(closes_between_matches, true).await;
        self.to_bridge(BridgeCommand::StartMatch(Box::new(config)));
    }

    async fn on_configured(&mut self, config: MatchConfiguration) {
        self.reservation.set_agents(&config);
        self.predictor.set_mode(config.game_mode);
        self.match_settings = MatchSettings {
            rendering: config.enable_rendering,
            state_setting: config.enable_state_setting,
        };
        self.config_frame = encode_frame(&ServerMessage::MatchConfiguration(Box::new(config)));

        let registry = self.registry.clone();
        let mut sessions = registry.write().await;
        for (client_id, handle) in sessions.iter_mut() {
            if !handle.is_established() {
                continue;
            }
            handle.send(SessionCommand::MatchSettings(self.match_settings));
            if let Some(frame) = &self.config_frame {
                handle.send(SessionCommand::Send(frame.clone()));
            }

            // the new roster replaced every claim, so every agent re-reserves
            let agent_id = handle.settings.as_ref().map(|s| s.agent_id.clone()).unwrap_or_default();
            if agent_id.is_empty() {
                continue;
            }
            let had_claims = handle.team.take().is_some();
            match self.reserve(*client_id, &agent_id) {
                Some(info) => {
                    handle.team = Some(info.team);
                    handle.send(SessionCommand::Reserved(info));
                    if handle.ready {
                        self.announce_ready(*client_id);
                    }
                }
                None if had_claims => handle.send(SessionCommand::Released),
                None => {}
            }
        }
    }

    async fn on_tick(&mut self, packet: &GamePacket) {
        let Some(frame) = encode_frame(&ServerMessage::GamePacket(Box::new(packet.clone()))) else {
            return;
        };

        let sessions = self.registry.read().await;
        let wants_prediction = sessions
            .values()
            .any(|h| h.is_established() && h.settings.as_ref().is_some_and(|s| s.wants_ball_predictions));

        let prediction = match (wants_prediction, packet.ball.as_ref()) {
            (true, Some(ball)) => {
                let prediction = self.predictor.step(&ball.physics, packet.seconds_elapsed);
                encode_frame(&ServerMessage::BallPrediction(prediction))
            }
            _ => None,
        };

        for handle in sessions.values().filter(|h| h.is_established()) {
            handle.send(SessionCommand::Send(frame.clone()));
            let wants = handle.settings.as_ref().is_some_and(|s| s.wants_ball_predictions);
            if let (true, Some(prediction)) = (wants, &prediction) {
                handle.send(SessionCommand::Send(prediction.clone()));
            }
        }
    }

    async fn relay_comm(&self, from: ClientId, comm: MatchComm) {
        let team_only = comm.team_only;
        let team = comm.team;
        let Some(frame) = encode_frame(&ServerMessage::MatchComm(comm)) else {
            return;
        };

        let sessions = self.registry.read().await;
        for (client_id, handle) in sessions.iter() {
            if *client_id == from || !handle.is_established() {
                continue;
            }
            if !handle.settings.as_ref().is_some_and(|s| s.wants_comms) {
                continue;
            }
            if team_only && handle.team != Some(team) {
                continue;
            }
            handle.send(SessionCommand::Send(frame.clone()));
        }
    }

    async fn broadcast(&self, frame: &Bytes) {
        let sessions = self.registry.read().await;
        for handle in sessions.values().filter(|h| h.is_established()) {
            handle.send(SessionCommand::Send(frame.clone()));
        }
    }

    async fn close_sessions(&self, select: impl Fn(&SessionHandle) -> bool, forced: bool) {
        let mut sessions = self.registry.write().await;
        for (client_id, handle) in sessions.iter_mut() {
            if handle.closing || !select(handle) {
                continue;
            }
            debug!(client_id, forced, "closing session");
            handle.closing = true;
            handle.send(SessionCommand::Close { forced });
        }
    }
}

fn closes_between_matches(handle: &SessionHandle) -> bool {
    handle.settings.as_ref().is_some_and(|s| s.close_between_matches)
}

fn encode_frame(message: &ServerMessage) -> Option<Bytes> {
    match message.to_bytes() {
        Ok(frame) => Some(frame),
        Err(e) => {
            error!(error = %e, "could not encode server message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::config::{PlayerClass, PlayerConfiguration};
    use crate::game::external::{BallisticPredictor, CommandLauncher, JsonConfigProvider};

    fn services() -> Services {
        Services {
            launcher: Box::new(CommandLauncher::new(0)),
            predictor: Box::new(BallisticPredictor::default()),
            provider: Box::new(JsonConfigProvider),
        }
    }

    fn local_config() -> ServerConfig {
        ServerConfig {
            agent_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            game_addr: SocketAddr::from(([127, 0, 0, 1], 9)),
            game_retry_interval: Duration::from_millis(10),
            ..ServerConfig::default()
        }
    }

    fn bot(name: &str, agent_id: &str, team: u32) -> PlayerConfiguration {
        PlayerConfiguration {
            variety: PlayerClass::CustomBot,
            name: name.to_string(),
            team,
            root_dir: String::new(),
            run_command: String::new(),
            loadout: None,
            spawn_id: 0,
            agent_id: agent_id.to_string(),
            hivemind: false,
        }
    }

    fn roster(players: Vec<PlayerConfiguration>) -> Box<MatchConfiguration> {
        let mut config = MatchConfiguration {
            player_configurations: players,
            ..MatchConfiguration::default()
        };
        config.normalize();
        Box::new(config)
    }

    fn orchestrator() -> (Orchestrator, mpsc::UnboundedReceiver<BridgeCommand>) {
        let (bridge_tx, bridge_rx) = mpsc::unbounded_channel();
        let orchestrator = Orchestrator {
            registry: Arc::new(RwLock::new(BTreeMap::new())),
            bridge: Some(bridge_tx),
            reservation: AgentReservation::new(),
            predictor: Box::new(BallisticPredictor::default()),
            provider: Box::new(JsonConfigProvider),
            match_settings: MatchSettings::default(),
            config_frame: None,
            field_frame: None,
        };
        (orchestrator, bridge_rx)
    }

    /// Register a connection and establish it with `agent_id`.
    async fn connect(
        orchestrator: &mut Orchestrator,
        client_id: ClientId,
        agent_id: &str,
    ) -> mpsc::UnboundedReceiver<SessionCommand> {
        let (tx, rx) = mpsc::unbounded_channel();
        orchestrator.registry.write().await.insert(
            client_id,
            SessionHandle {
                tx,
                join: tokio::spawn(async {}),
                settings: None,
                team: None,
                ready: false,
                closing: false,
            },
        );
        let settings = ConnectionSettings {
            agent_id: agent_id.to_string(),
            close_between_matches: true,
            ..ConnectionSettings::default()
        };
        assert!(orchestrator.handle(ServerCommand::SessionEstablished { client_id, settings }).await);
        rx
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionCommand>) -> Vec<SessionCommand> {
        let mut commands = Vec::new();
        while let Ok(command) = rx.try_recv() {
            commands.push(command);
        }
        commands
    }

    fn reservation_in(commands: &[SessionCommand]) -> Option<ControllableTeamInfo> {
        commands.iter().find_map(|c| match c {
            SessionCommand::Reserved(info) => Some(info.clone()),
            SessionCommand::Established { controllables, .. } => controllables.clone(),
            _ => None,
        })
    }

    #[tokio::test]
    async fn test_new_roster_replaces_existing_claims() {
        let (mut orchestrator, _bridge) = orchestrator();
        orchestrator.handle(ServerCommand::MatchConfigured(roster(vec![bot("A", "a", 0)]))).await;

        let mut session = connect(&mut orchestrator, 1, "a").await;
        let first = reservation_in(&drain(&mut session)).unwrap();
        assert_eq!(first.team, 0);
        assert_eq!(first.controllables[0].index, 0);

        // same agent moves to the other team and index
        orchestrator
            .handle(ServerCommand::MatchConfigured(roster(vec![bot("Z", "z", 0), bot("A", "a", 1)])))
            .await;
        let second = reservation_in(&drain(&mut session)).unwrap();
        assert_eq!(second.team, 1);
        assert_eq!(second.controllables[0].index, 1);

        // dropped from the roster entirely
        orchestrator.handle(ServerCommand::MatchConfigured(roster(vec![bot("Z", "z", 0)]))).await;
        let commands = drain(&mut session);
        assert!(reservation_in(&commands).is_none());
        assert!(commands.iter().any(|c| matches!(c, SessionCommand::Released)));
    }

    #[tokio::test]
    async fn test_ready_before_reservation_counts_later() {
        let (mut orchestrator, mut bridge) = orchestrator();

        let mut session = connect(&mut orchestrator, 2, "b").await;
        assert!(reservation_in(&drain(&mut session)).is_none());

        orchestrator.handle(ServerCommand::SessionReady { client_id: 2 }).await;
        assert!(bridge.try_recv().is_err());

        orchestrator.handle(ServerCommand::MatchConfigured(roster(vec![bot("B", "b", 0)]))).await;
        assert!(reservation_in(&drain(&mut session)).is_some());
        assert!(matches!(bridge.try_recv(), Ok(BridgeCommand::ConnectionReady)));

        // a ready session is counted again against the next roster
        orchestrator.handle(ServerCommand::MatchConfigured(roster(vec![bot("B", "b", 1)]))).await;
        assert!(matches!(bridge.try_recv(), Ok(BridgeCommand::ConnectionReady)));
        assert!(bridge.try_recv().is_err());
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.agent_addr.port(), 23234);
        assert_eq!(config.game_addr.port(), 23233);
        assert_eq!(config.max_connections, 64);
    }

    #[test]
    fn test_server_config_from_env() {
        std::env::set_var("AGENT_BRIDGE_MAX_CONNECTIONS", "7");
        std::env::set_var("AGENT_BRIDGE_GAME_ADDR", "not an address");
        let config = ServerConfig::from_env();
        std::env::remove_var("AGENT_BRIDGE_MAX_CONNECTIONS");
        std::env::remove_var("AGENT_BRIDGE_GAME_ADDR");

        assert_eq!(config.max_connections, 7);
        assert_eq!(config.game_addr, ServerConfig::default().game_addr);
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = AgentServer::bind(local_config(), services()).await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert_eq!(server.connection_count().await, 0);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_run_future_is_send() {
        let server = AgentServer::bind(local_config(), services()).await.unwrap();
        let run = server.run();
        assert_send(&run);
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let server = AgentServer::bind(local_config(), services()).await.unwrap();
        server.handle().shutdown();
        assert!(server.run().await.is_ok());
    }

    #[tokio::test]
    async fn test_connection_registered() {
        let server = AgentServer::bind(local_config(), services()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let registry = server.registry.clone();
        let handle = server.handle();
        let task = tokio::spawn(server.run());

        let _client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut registered = 0;
        for _ in 0..100 {
            registered = registry.read().await.len();
            if registered == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(registered, 1);

        handle.shutdown();
        assert!(task.await.unwrap().is_ok());
        assert_eq!(registry.read().await.len(), 0);
    }
}
