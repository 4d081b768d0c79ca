//! Match Starter
//!
//! The match lifecycle state machine:
//!
//! ```text
//!   Idle ──start──► MapLoading ──map loaded──► AwaitingConnections
//!    ▲                                              │ ready / forced
//!    │                                              ▼
//!    └──── match ended / stop ──── Running ◄── SpawningCars
//! ```
//!
//! The starter never touches a socket. Every method takes the game state it
//! reads and the command buffer it writes, and returns the events the caller
//! has to forward.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::game::config::{ConfigError, ExistingMatchBehavior, MatchConfiguration, PlayerClass, PlayerLoadout};
use crate::game::external::{LaunchError, ProcessLauncher};
use crate::game::mapping::SpawnTracker;
use crate::game::reservation::AgentReservation;
use crate::game::state::{ApplyOutcome, GameState, MatchPhase};
use crate::network::game_protocol::{BotDriver, OutgoingCommands};

/// Console command that moves the local human to the spectators.
pub const SPECTATE_COMMAND: &str = "spectate";

/// Lifecycle stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StarterStage {
    /// No match requested, or the last one ended.
    #[default]
    Idle,
    /// Map open requested, waiting for the game to report it.
    MapLoading,
    /// Map ready, waiting for agents before spawning.
    AwaitingConnections,
    /// Spawn commands being queued.
    SpawningCars,
    /// Every car queued.
    Running,
}

/// Something the owner of the starter has to act on.
#[derive(Clone, Debug, PartialEq)]
pub enum StarterEvent {
    /// A configuration was accepted (normalized); agents should receive it.
    ConfigAccepted(Box<MatchConfiguration>),
    /// Every configured car has been queued for spawning.
    CarsQueued,
    /// The game reported the end of the match.
    MatchEnded,
}

/// Why a match did not start.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    /// The configuration has validation findings.
    #[error("invalid match configuration ({} findings)", .0.len())]
    Invalid(Vec<ConfigError>),

    /// A process could not be launched.
    #[error("launch failed: {0}")]
    Launch(#[from] LaunchError),
}

fn bot_driver(variety: PlayerClass) -> Option<BotDriver> {
    match variety {
        PlayerClass::CustomBot => Some(BotDriver::Custom),
        PlayerClass::PsyonixBot { skill } => Some(BotDriver::Psyonix(skill)),
        PlayerClass::Human => None,
    }
}

/// Connections a configuration waits for before spawning.
pub fn expected_connections(config: &MatchConfiguration) -> usize {
    let mut roster = AgentReservation::new();
    roster.set_agents(config);
    roster.expected_connections()
}

/// Match lifecycle engine.
#[derive(Debug, Default)]
pub struct MatchStarter {
    stage: StarterStage,
    config: Option<MatchConfiguration>,
    loaded: Option<MatchConfiguration>,
    pending_start: bool,
    communication_established: bool,
    ready_connections: usize,
    expected_connections: usize,
    loadout_overrides: BTreeMap<u32, PlayerLoadout>,
}

impl MatchStarter {
    /// Idle starter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current stage.
    pub fn stage(&self) -> StarterStage {
        self.stage
    }

    /// Accepted configuration.
    pub fn config(&self) -> Option<&MatchConfiguration> {
        self.config.as_ref()
    }

    /// A start is waiting for the game connection.
    pub fn is_pending(&self) -> bool {
        self.pending_start
    }

    /// `(ready, expected)` connections.
    pub fn readiness(&self) -> (usize, usize) {
        (self.ready_connections, self.expected_connections)
    }

    /// Accept a configuration and start working towards it.
    pub fn start_match(
        &mut self,
        mut config: MatchConfiguration,
        launcher: &mut dyn ProcessLauncher,
        state: &mut GameState,
        out: &mut OutgoingCommands,
    ) -> Result<Vec<StarterEvent>, StartError> {
        config.validate().map_err(StartError::Invalid)?;
        config.normalize();

        if let Err(e) = Self::launch(&config, launcher) {
            warn!(error = %e, "launch failed, stopping the current match");
            self.stop_match(out);
            return Err(e.into());
        }

        self.ready_connections = 0;
        self.expected_connections = expected_connections(&config);
        self.loadout_overrides.clear();
        info!(
            map = %config.game_map_upk,
            players = config.player_configurations.len(),
            scripts = config.script_configurations.len(),
            expected_connections = self.expected_connections,
            "match accepted"
        );

        let mut events = vec![StarterEvent::ConfigAccepted(Box::new(config.clone()))];
        self.config = Some(config);

        if self.communication_established {
            events.extend(self.begin(state, out));
        } else {
            debug!("deferring match start until the game connects");
            self.pending_start = true;
        }
        Ok(events)
    }

    /// The game connection delivered its first update.
    pub fn start_communication(&mut self, state: &mut GameState, out: &mut OutgoingCommands) -> Vec<StarterEvent> {
        self.communication_established = true;
        if self.pending_start {
            self.begin(state, out)
        } else {
            Vec::new()
        }
    }

    /// React to a reduced update batch.
    pub fn on_batch(
        &mut self,
        outcome: &ApplyOutcome,
        state: &mut GameState,
        out: &mut OutgoingCommands,
    ) -> Vec<StarterEvent> {
        let mut events = Vec::new();

        if outcome.match_info_reset && self.stage == StarterStage::MapLoading {
            info!("map loaded");
            self.stage = StarterStage::AwaitingConnections;
            events.extend(self.try_spawn(state, out));
        }

        if outcome.match_ended() && self.stage != StarterStage::Idle {
            info!("match ended");
            self.stage = StarterStage::Idle;
            events.push(StarterEvent::MatchEnded);
        }

        events
    }

    /// A session holding a reservation finished initializing.
    pub fn connection_ready(&mut self, state: &mut GameState, out: &mut OutgoingCommands) -> Vec<StarterEvent> {
        self.ready_connections += 1;
        debug!(
            ready = self.ready_connections,
            expected = self.expected_connections,
            "connection ready"
        );
        self.try_spawn(state, out)
    }

    /// Change a player's loadout. Before spawning this overrides the
    /// configured loadout; afterwards the car is respawned, which needs
    /// state setting.
    pub fn set_loadout(
        &mut self,
        index: u32,
        loadout: PlayerLoadout,
        state: &mut GameState,
        out: &mut OutgoingCommands,
    ) {
        if self.stage != StarterStage::Running {
            self.loadout_overrides.insert(index, loadout);
            return;
        }

        let Some(config) = self.config.as_ref() else {
            return;
        };
        if !config.enable_state_setting {
            warn!(index, "loadout change after spawn ignored, state setting is off");
            return;
        }

        let Some((_, player)) = config.indexed_players().into_iter().find(|(i, _)| *i == index) else {
            warn!(index, "loadout change for unknown index");
            return;
        };
        let Some(driver) = bot_driver(player.variety) else {
            warn!(index, "loadout change for the human player ignored");
            return;
        };

        if let Some(actor) = state.mapping().actor_from_index(index) {
            out.despawn(actor);
        }
        let command_id = out.spawn_bot(&player.name, player.team, loadout, driver);
        state.mapping_mut().add_pending_spawn(SpawnTracker {
            command_id,
            spawn_id: player.spawn_id,
            desired_index: index,
            is_bot: true,
            is_custom_bot: player.variety.is_custom_bot(),
        });
        self.loadout_overrides.insert(index, loadout);
        info!(index, "respawning with new loadout");
    }

    /// Stop the current match.
    pub fn stop_match(&mut self, out: &mut OutgoingCommands) {
        if self.stage != StarterStage::Idle || self.pending_start {
            out.end_match();
        }
        self.stage = StarterStage::Idle;
        self.pending_start = false;
        self.loaded = None;
        info!("match stopped");
    }

    fn begin(&mut self, state: &mut GameState, out: &mut OutgoingCommands) -> Vec<StarterEvent> {
        self.pending_start = false;
        let Some(config) = self.config.clone() else {
            return Vec::new();
        };

        let reload = match &self.loaded {
            None => true,
            Some(_) if state.phase() == MatchPhase::Ended => true,
            Some(loaded) => match config.existing_match_behavior {
                ExistingMatchBehavior::Restart => true,
                ExistingMatchBehavior::RestartIfDifferent => config.differs_from(loaded),
                ExistingMatchBehavior::ContinueAndSpawn => false,
            },
        };

        state.set_respawn_seconds(config.mutators.respawn_time.seconds());
        let mut events = Vec::new();

        if reload {
            info!(command = %config.open_command(), "loading map");
            state.reset_for_map_load();
            out.open_match(config.open_command());
            self.stage = StarterStage::MapLoading;
        } else {
            info!("reusing running match");
            if let Some(loaded) = self.loaded.as_ref() {
                Self::despawn_changed(loaded, &config, state, out);
            }
            self.stage = StarterStage::AwaitingConnections;
            events.extend(self.try_spawn(state, out));
        }

        self.loaded = Some(config);
        events
    }

    fn try_spawn(&mut self, state: &mut GameState, out: &mut OutgoingCommands) -> Vec<StarterEvent> {
        if self.stage != StarterStage::AwaitingConnections {
            return Vec::new();
        }
        let Some(config) = self.config.clone() else {
            return Vec::new();
        };

        let agents_ready = self.ready_connections >= self.expected_connections;
        if config.auto_start_agents && config.wait_for_agents && !config.instant_start && !agents_ready {
            debug!(
                ready = self.ready_connections,
                expected = self.expected_connections,
                "waiting for agents before spawning"
            );
            return Vec::new();
        }

        self.stage = StarterStage::SpawningCars;
        self.spawn_cars(&config, state, out);
        self.stage = StarterStage::Running;
        vec![StarterEvent::CarsQueued]
    }

    fn spawn_cars(&self, config: &MatchConfiguration, state: &mut GameState, out: &mut OutgoingCommands) {
        for (index, player) in config.indexed_players() {
            match bot_driver(player.variety) {
                None => {
                    let human_present = state.mapping().players().any(|(_, p)| !p.is_bot);
                    if human_present || state.mapping().is_spawn_pending(0) {
                        continue;
                    }
                    let command_id = out.spawn_human(player.team);
                    state.mapping_mut().add_pending_spawn(SpawnTracker {
                        command_id,
                        spawn_id: 0,
                        desired_index: index,
                        is_bot: false,
                        is_custom_bot: false,
                    });
                }
                Some(driver) => {
                    let mapping = state.mapping();
                    if mapping.index_for_spawn_id(player.spawn_id).is_some()
                        || mapping.is_spawn_pending(player.spawn_id)
                    {
                        debug!(index, spawn_id = player.spawn_id, "already spawned");
                        continue;
                    }

                    let loadout = self
                        .loadout_overrides
                        .get(&index)
                        .copied()
                        .or(player.loadout)
                        .unwrap_or_default();
                    let command_id = out.spawn_bot(&player.name, player.team, loadout, driver);
                    state.mapping_mut().add_pending_spawn(SpawnTracker {
                        command_id,
                        spawn_id: player.spawn_id,
                        desired_index: index,
                        is_bot: true,
                        is_custom_bot: player.variety.is_custom_bot(),
                    });
                    debug!(index, name = %player.name, command_id, "spawn queued");
                }
            }
        }
    }

    /// Despawn every loaded player whose slot is gone or changed hands.
    fn despawn_changed(
        loaded: &MatchConfiguration,
        config: &MatchConfiguration,
        state: &GameState,
        out: &mut OutgoingCommands,
    ) {
        let slots: BTreeMap<u32, _> = config.indexed_players().into_iter().collect();

        for (index, old) in loaded.indexed_players() {
            if old.variety.is_human() {
                if config.human_count() == 0 {
                    info!("no human requested, moving human to spectators");
                    out.console_command(SPECTATE_COMMAND);
                }
                continue;
            }

            let unchanged = slots.get(&index).is_some_and(|new| {
                new.agent_id == old.agent_id && new.team == old.team && new.variety == old.variety
            });
            if unchanged {
                continue;
            }

            let actor = state
                .mapping()
                .index_for_spawn_id(old.spawn_id)
                .and_then(|i| state.mapping().actor_from_index(i));
            match actor {
                Some(actor) => {
                    info!(index, spawn_id = old.spawn_id, actor, "despawning replaced player");
                    out.despawn(actor);
                }
                None => debug!(index, spawn_id = old.spawn_id, "replaced player has no live car"),
            }
        }
    }

    fn launch(config: &MatchConfiguration, launcher: &mut dyn ProcessLauncher) -> Result<(), LaunchError> {
        if !launcher.is_game_running() {
            info!(launcher = ?config.launcher, "launching game");
            launcher.launch_game(config)?;
        }
        if config.auto_start_agents {
            Self::launch_agents(config, launcher)?;
        }
        Ok(())
    }

    fn launch_agents(config: &MatchConfiguration, launcher: &mut dyn ProcessLauncher) -> Result<(), LaunchError> {
        let mut hiveminds = BTreeSet::new();
        for player in &config.player_configurations {
            if !player.variety.is_custom_bot() {
                continue;
            }
            if player.hivemind && !hiveminds.insert((player.agent_id.as_str(), player.team)) {
                continue;
            }
            launcher.launch_bot(player)?;
        }
        for script in &config.script_configurations {
            launcher.launch_script(script)?;
        }
        Ok(())
    }
}
