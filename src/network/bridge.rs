//! Game Bridge
//!
//! Owns the single connection to the game process. The bridge is the only
//! writer of [`GameState`] and the only owner of the [`MatchStarter`]; the
//! server reaches both by posting [`BridgeCommand`]s.
//!
//! Every mailbox wake-up drains whatever is queued and then flushes the
//! outgoing command buffer as one frame, so bursts of input become a single
//! write. Losing the game connection ends the bridge; it is never retried.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::core::framing::{encode, FrameError, FrameReader};
use crate::game::config::{MatchConfiguration, PlayerLoadout};
use crate::game::external::ProcessLauncher;
use crate::game::state::GameState;
use crate::game::update::UpdateBatch;
use crate::lifecycle::match_starter::{MatchStarter, StartError, StarterEvent};
use crate::network::game_protocol::{GameInbound, OutgoingCommands};
use crate::network::protocol::{ControllerState, DesiredGameState, RenderGroup};
use crate::network::server::ServerCommand;

/// Where and how to reach the game.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Game process address.
    pub game_addr: SocketAddr,
    /// Delay between connection attempts while the game starts up.
    pub retry_interval: Duration,
}

/// Commands accepted by the bridge.
#[derive(Debug, Clone)]
pub enum BridgeCommand {
    /// Start (or reconfigure) a match.
    StartMatch(Box<MatchConfiguration>),
    /// Stop the current match.
    StopMatch,
    /// A session holding a reservation became ready.
    ConnectionReady,
    /// Controller input for a player index.
    PlayerInput {
        /// Player index.
        index: u32,
        /// Controller.
        controller: ControllerState,
    },
    /// Loadout change for a player index.
    SetLoadout {
        /// Player index.
        index: u32,
        /// New loadout.
        loadout: PlayerLoadout,
    },
    /// State-setting request.
    DesiredGameState(DesiredGameState),
    /// Add or replace a render group.
    RenderGroup(RenderGroup),
    /// Remove a render group.
    RemoveRenderGroup(i32),
}

/// Bridge errors. Each one ends the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The game closed the connection.
    #[error("game connection lost")]
    Disconnected,

    /// Reading or writing a frame failed.
    #[error("game connection failed: {0}")]
    Frame(#[from] FrameError),
}

enum LinkEvent {
    Connected(TcpStream),
    Batch(UpdateBatch),
    Closed(Option<FrameError>),
}

/// The game-facing actor.
pub struct Bridge {
    config: BridgeConfig,
    mailbox: mpsc::UnboundedReceiver<BridgeCommand>,
    server: mpsc::UnboundedSender<ServerCommand>,
    launcher: Box<dyn ProcessLauncher>,
    state: GameState,
    starter: MatchStarter,
    outgoing: OutgoingCommands,
    writer: Option<OwnedWriteHalf>,
}

impl Bridge {
    /// Create a bridge. Nothing happens until [`Bridge::run`].
    pub fn new(
        config: BridgeConfig,
        mailbox: mpsc::UnboundedReceiver<BridgeCommand>,
        server: mpsc::UnboundedSender<ServerCommand>,
        launcher: Box<dyn ProcessLauncher>,
    ) -> Self {
        Self {
            config,
            mailbox,
            server,
            launcher,
            state: GameState::new(),
            starter: MatchStarter::new(),
            outgoing: OutgoingCommands::new(),
            writer: None,
        }
    }

    /// Run until the mailbox closes (`Ok`) or the game goes away (`Err`).
    #[instrument(skip(self), fields(game_addr = %self.config.game_addr))]
    pub async fn run(mut self) -> Result<(), BridgeError> {
        let (link_tx, mut link) = mpsc::unbounded_channel();
        let connector = tokio::spawn(connect(self.config.clone(), link_tx.clone()));
        let mut reader: Option<JoinHandle<()>> = None;

        let result = loop {
            let step = tokio::select! {
                command = self.mailbox.recv() => match command {
                    Some(command) => {
                        self.handle_command(command);
                        while let Ok(command) = self.mailbox.try_recv() {
                            self.handle_command(command);
                        }
                        self.flush().await.map(|_| true)
                    }
                    None => Ok(false),
                },
                Some(event) = link.recv() => match event {
                    LinkEvent::Connected(stream) => {
                        let (read, write) = stream.into_split();
                        self.writer = Some(write);
                        reader = Some(tokio::spawn(read_updates(read, link_tx.clone())));
                        info!("connected to game");
                        self.on_connected();
                        self.flush().await.map(|_| true)
                    }
                    LinkEvent::Batch(batch) => {
                        self.on_batch(&batch);
                        self.flush().await.map(|_| true)
                    }
                    LinkEvent::Closed(cause) => {
                        match cause {
                            Some(e) => Err(BridgeError::Frame(e)),
                            None => Err(BridgeError::Disconnected),
                        }
                    }
                },
            };

            match step {
                Ok(true) => continue,
                Ok(false) => break Ok(()),
                Err(e) => {
                    error!(error = %e, "game connection lost, stopping");
                    self.notify(ServerCommand::BridgeLost);
                    break Err(e);
                }
            }
        };

        if result.is_ok() {
            self.starter.stop_match(&mut self.outgoing);
            if let Err(e) = self.flush().await {
                warn!(error = %e, "could not tell the game to stop");
            }
            if let Some(writer) = self.writer.as_mut() {
                let _ = writer.shutdown().await;
            }
        }

        connector.abort();
        if let Some(reader) = reader {
            reader.abort();
        }
        info!("bridge stopped");
        result
    }

    fn handle_command(&mut self, command: BridgeCommand) {
        match command {
            BridgeCommand::StartMatch(config) => {
                match self
                    .starter
                    .start_match(*config, self.launcher.as_mut(), &mut self.state, &mut self.outgoing)
                {
                    Ok(events) => self.forward(events),
                    Err(e) => {
                        let stopped = match &e {
                            StartError::Invalid(findings) => {
                                for finding in findings {
                                    warn!(%finding, "configuration rejected");
                                }
                                false
                            }
                            StartError::Launch(_) => true,
                        };
                        error!(error = %e, stopped, "match did not start");
                        self.notify(ServerCommand::MatchStartFailed {
                            reason: e.to_string(),
                            stopped,
                        });
                    }
                }
            }
            BridgeCommand::StopMatch => self.starter.stop_match(&mut self.outgoing),
            BridgeCommand::ConnectionReady => {
                let events = self.starter.connection_ready(&mut self.state, &mut self.outgoing);
                self.forward(events);
            }
            BridgeCommand::PlayerInput { index, controller } => {
                match self.state.mapping().actor_from_index(index) {
                    Some(actor) => self.outgoing.set_input(actor, controller),
                    None => debug!(index, "input for unmapped index dropped"),
                }
            }
            BridgeCommand::SetLoadout { index, loadout } => {
                self.starter.set_loadout(index, loadout, &mut self.state, &mut self.outgoing);
            }
            BridgeCommand::DesiredGameState(desired) => self.apply_desired_state(desired),
            BridgeCommand::RenderGroup(group) => self.outgoing.add_render_group(group),
            BridgeCommand::RemoveRenderGroup(id) => self.outgoing.remove_render_group(id),
        }
    }

    fn apply_desired_state(&mut self, desired: DesiredGameState) {
        if let Some(physics) = desired.ball {
            match self.state.ball() {
                Some(ball) if physics.is_finite() => self.outgoing.set_physics(ball.actor_id, physics),
                Some(_) => warn!("non-finite ball state dropped"),
                None => debug!("no ball to set"),
            }
        }

        for car in desired.cars {
            let Some(actor) = self.state.mapping().actor_from_index(car.index) else {
                debug!(index = car.index, "state for unmapped index dropped");
                continue;
            };
            if let Some(physics) = car.physics {
                if physics.is_finite() {
                    self.outgoing.set_physics(actor, physics);
                } else {
                    warn!(index = car.index, "non-finite car state dropped");
                }
            }
            if let Some(amount) = car.boost_amount {
                if amount.is_finite() {
                    self.outgoing.set_boost(actor, amount.clamp(0.0, 100.0));
                }
            }
        }

        for command in desired.console_commands {
            self.outgoing.console_command(command);
        }
    }

    fn on_connected(&mut self) {
        let events = self.starter.start_communication(&mut self.state, &mut self.outgoing);
        self.forward(events);
    }

    fn on_batch(&mut self, batch: &UpdateBatch) {
        let outcome = self.state.apply(batch);
        if outcome.dropped > 0 || outcome.rejected > 0 {
            trace!(dropped = outcome.dropped, rejected = outcome.rejected, "batch applied with skips");
        }
        for spawn in &outcome.spawned {
            debug!(
                index = spawn.index,
                actor = spawn.metadata.actor_id,
                expected = spawn.expected,
                "car spawned"
            );
        }

        let events = self.starter.on_batch(&outcome, &mut self.state, &mut self.outgoing);

        if outcome.field_info_changed {
            self.notify(ServerCommand::FieldInfo(self.state.field_info()));
        }
        self.notify(ServerCommand::GameTick(Box::new(self.state.packet())));
        self.forward(events);
    }

    fn forward(&self, events: Vec<StarterEvent>) {
        for event in events {
            match event {
                StarterEvent::ConfigAccepted(config) => self.notify(ServerCommand::MatchConfigured(config)),
                StarterEvent::CarsQueued => info!("all cars queued"),
                StarterEvent::MatchEnded => self.notify(ServerCommand::MatchEnded),
            }
        }
    }

    fn notify(&self, command: ServerCommand) {
        if self.server.send(command).is_err() {
            debug!("server mailbox closed");
        }
    }

    /// Send everything queued. Only socket errors are fatal; a batch that
    /// cannot be encoded is logged and skipped.
    async fn flush(&mut self) -> Result<(), BridgeError> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        let batches = self.outgoing.take_batches();
        if batches.is_empty() {
            return Ok(());
        }

        for batch in &batches {
            match encode(batch) {
                Ok(frame) => writer.write_all(&frame).await.map_err(FrameError::from)?,
                Err(e) => warn!(error = %e, "command batch not sent"),
            }
        }
        writer.flush().await.map_err(FrameError::from)?;
        Ok(())
    }
}

async fn connect(config: BridgeConfig, link: mpsc::UnboundedSender<LinkEvent>) {
    loop {
        match TcpStream::connect(config.game_addr).await {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, "could not disable nagle");
                }
                let _ = link.send(LinkEvent::Connected(stream));
                return;
            }
            Err(e) => {
                debug!(error = %e, "game not reachable yet");
                tokio::time::sleep(config.retry_interval).await;
            }
        }
    }
}

async fn read_updates(read: OwnedReadHalf, link: mpsc::UnboundedSender<LinkEvent>) {
    let mut frames = FrameReader::new(read);
    loop {
        let event = match frames.next_message::<GameInbound>().await {
            Ok(Some(GameInbound::Updates(batch))) => LinkEvent::Batch(batch),
            Ok(None) => LinkEvent::Closed(None),
            Err(e) => LinkEvent::Closed(Some(e)),
        };
        let closed = matches!(event, LinkEvent::Closed(_));
        if link.send(event).is_err() || closed {
            break;
        }
    }
}
