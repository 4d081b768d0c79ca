//! Game Protocol Messages
//!
//! Wire format between the server and the game process. Outbound traffic is
//! one or more [`CommandBatch`]es per flush, each sized to fit a frame;
//! inbound traffic is an update batch per game tick. Same framing as the
//! agent protocol.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::framing::{WireMessage, MAX_PAYLOAD_SIZE, TAG_SIZE};
use crate::game::config::{PlayerLoadout, PsyonixSkill};
use crate::game::mapping::ActorId;
use crate::game::update::UpdateBatch;
use crate::network::protocol::{ControllerState, DesiredPhysics, RenderGroup};

/// Who drives a spawned bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotDriver {
    /// Driven through `SetInput` by an agent.
    Custom,
    /// Built-in game AI.
    Psyonix(PsyonixSkill),
}

/// One command for the game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GameCommand {
    /// Open a map (console `open ...`).
    OpenMatch {
        /// Full console command.
        command: String,
    },
    /// Arbitrary console command.
    ConsoleCommand(String),
    /// Spawn a bot car.
    SpawnBot {
        /// Correlation id echoed in the car-spawn event.
        command_id: u32,
        /// Display name.
        name: String,
        /// Team.
        team: u32,
        /// Cosmetics.
        loadout: PlayerLoadout,
        /// Driver.
        driver: BotDriver,
    },
    /// Put the local human into a team.
    SpawnHuman {
        /// Correlation id echoed in the car-spawn event.
        command_id: u32,
        /// Team.
        team: u32,
    },
    /// Remove an actor.
    Despawn {
        /// Actor.
        actor_id: ActorId,
    },
    /// Override physics.
    SetPhysics {
        /// Actor (car or ball).
        actor_id: ActorId,
        /// Fields to set.
        physics: DesiredPhysics,
    },
    /// Override boost.
    SetBoost {
        /// Car actor.
        actor_id: ActorId,
        /// Boost 0..=100.
        amount: f32,
    },
    /// Controller input for a car.
    SetInput {
        /// Car actor.
        actor_id: ActorId,
        /// Controller.
        controller: ControllerState,
    },
    /// Add or replace debug drawings.
    AddRenderGroup(RenderGroup),
    /// Remove debug drawings.
    RemoveRenderGroup {
        /// Group id.
        id: i32,
    },
    /// Stop the current match.
    EndMatch,
}

/// Commands sent together in one write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandBatch {
    /// Commands in order.
    pub commands: Vec<GameCommand>,
}

/// Server to game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GameOutbound {
    /// A command batch.
    Commands(CommandBatch),
}

impl WireMessage for GameOutbound {
    const TAG_COUNT: u32 = 1;
}

/// Game to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GameInbound {
    /// Updates for one tick.
    Updates(UpdateBatch),
}

impl WireMessage for GameInbound {
    const TAG_COUNT: u32 = 1;
}

/// Buffer of commands waiting for the next flush.
///
/// Enqueueing is idempotent where it can be: a second despawn of the same
/// actor is dropped and a newer input for a car replaces the older one.
#[derive(Debug, Clone)]
pub struct OutgoingCommands {
    commands: Vec<GameCommand>,
    next_command_id: u32,
}

impl Default for OutgoingCommands {
    fn default() -> Self {
        Self::new()
    }
}

impl OutgoingCommands {
    /// Empty buffer; correlation ids start at 1.
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            next_command_id: 1,
        }
    }

    fn allocate_command_id(&mut self) -> u32 {
        let id = self.next_command_id;
        self.next_command_id = self.next_command_id.wrapping_add(1).max(1);
        id
    }

    /// Queue a map open.
    pub fn open_match(&mut self, command: impl Into<String>) {
        self.commands.push(GameCommand::OpenMatch { command: command.into() });
    }

    /// Queue a console command.
    pub fn console_command(&mut self, command: impl Into<String>) {
        self.commands.push(GameCommand::ConsoleCommand(command.into()));
    }

    /// Queue a bot spawn. Returns its correlation id.
    pub fn spawn_bot(&mut self, name: &str, team: u32, loadout: PlayerLoadout, driver: BotDriver) -> u32 {
        let command_id = self.allocate_command_id();
        self.commands.push(GameCommand::SpawnBot {
            command_id,
            name: name.to_string(),
            team,
            loadout,
            driver,
        });
        command_id
    }

    /// Queue a human spawn. Returns its correlation id.
    pub fn spawn_human(&mut self, team: u32) -> u32 {
        let command_id = self.allocate_command_id();
        self.commands.push(GameCommand::SpawnHuman { command_id, team });
        command_id
    }

    /// Queue a despawn.
    pub fn despawn(&mut self, actor_id: ActorId) {
        let queued = self
            .commands
            .iter()
            .any(|c| matches!(c, GameCommand::Despawn { actor_id: a } if *a == actor_id));
        if !queued {
            self.commands.push(GameCommand::Despawn { actor_id });
        }
    }

    /// Queue a physics override.
    pub fn set_physics(&mut self, actor_id: ActorId, physics: DesiredPhysics) {
        self.commands.push(GameCommand::SetPhysics { actor_id, physics });
    }

    /// Queue a boost override.
    pub fn set_boost(&mut self, actor_id: ActorId, amount: f32) {
        self.commands.push(GameCommand::SetBoost { actor_id, amount });
    }

    /// Queue controller input, replacing any input already queued for the car.
    pub fn set_input(&mut self, actor_id: ActorId, controller: ControllerState) {
        for command in &mut self.commands {
            if let GameCommand::SetInput { actor_id: a, controller: c } = command {
                if *a == actor_id {
                    *c = controller;
                    return;
                }
            }
        }
        self.commands.push(GameCommand::SetInput { actor_id, controller });
    }

    /// Queue a render group.
    pub fn add_render_group(&mut self, group: RenderGroup) {
        self.commands.push(GameCommand::AddRenderGroup(group));
    }

    /// Queue a render group removal.
    pub fn remove_render_group(&mut self, id: i32) {
        self.commands.push(GameCommand::RemoveRenderGroup { id });
    }

    /// Queue a match stop.
    pub fn end_match(&mut self) {
        self.commands.push(GameCommand::EndMatch);
    }

    /// Nothing queued.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Queued commands.
    pub fn commands(&self) -> &[GameCommand] {
        &self.commands
    }

    /// Drain the buffer into messages that each fit in one frame.
    ///
    /// Commands keep their order across batches. A command too large for a
    /// frame on its own is logged and dropped.
    pub fn take_batches(&mut self) -> Vec<GameOutbound> {
        let mut batches = Vec::new();
        let mut current = Vec::new();
        let mut size = BATCH_OVERHEAD;

        for command in std::mem::take(&mut self.commands) {
            let command_size = match bincode::serialized_size(&command) {
                Ok(n) => n as usize,
                Err(e) => {
                    warn!(error = %e, "unencodable command dropped");
                    continue;
                }
            };
            if BATCH_OVERHEAD + command_size > MAX_PAYLOAD_SIZE {
                warn!(bytes = command_size, "command exceeds the frame limit, dropped");
                continue;
            }
            if size + command_size > MAX_PAYLOAD_SIZE {
                batches.push(GameOutbound::Commands(CommandBatch {
                    commands: std::mem::take(&mut current),
                }));
                size = BATCH_OVERHEAD;
            }
            size += command_size;
            current.push(command);
        }

        if !current.is_empty() {
            batches.push(GameOutbound::Commands(CommandBatch { commands: current }));
        }
        batches
    }
}

/// Payload bytes of an outbound batch before its first command: the variant
/// tag and the bincode vec length.
const BATCH_OVERHEAD: usize = TAG_SIZE + 8;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::framing::{decode, encode};

    #[test]
    fn test_spawn_ids_increment() {
        let mut out = OutgoingCommands::new();
        assert_eq!(out.spawn_bot("a", 0, PlayerLoadout::default(), BotDriver::Custom), 1);
        assert_eq!(out.spawn_human(1), 2);
        assert_eq!(out.commands().len(), 2);
    }

    #[test]
    fn test_despawn_is_idempotent() {
        let mut out = OutgoingCommands::new();
        out.despawn(7);
        out.despawn(7);
        out.despawn(8);
        assert_eq!(out.commands().len(), 2);
    }

    #[test]
    fn test_newer_input_replaces_queued() {
        let mut out = OutgoingCommands::new();
        out.set_input(3, ControllerState::default());
        out.set_input(3, ControllerState { throttle: 1.0, ..ControllerState::default() });
        out.set_input(4, ControllerState::default());

        assert_eq!(out.commands().len(), 2);
        assert!(matches!(
            out.commands()[0],
            GameCommand::SetInput { actor_id: 3, controller } if controller.throttle == 1.0
        ));
    }

    #[test]
    fn test_take_batches_drains() {
        let mut out = OutgoingCommands::new();
        assert!(out.take_batches().is_empty());

        out.console_command("Stat FPS");
        out.end_match();
        let batches = out.take_batches();
        assert!(out.is_empty());
        assert_eq!(batches.len(), 1);

        let frame = encode(&batches[0]).unwrap();
        let (decoded, _) = decode::<GameOutbound>(&frame).unwrap();
        assert_eq!(decoded, batches[0]);
    }

    #[test]
    fn test_large_flush_splits_into_frames() {
        let mut out = OutgoingCommands::new();
        let text = "x".repeat(30_000);
        out.console_command(text.clone());
        out.console_command(text.clone());
        out.console_command(text.clone());
        out.end_match();

        let batches = out.take_batches();
        assert_eq!(batches.len(), 2);

        let mut commands = Vec::new();
        for batch in &batches {
            let frame = encode(batch).unwrap();
            assert!(frame.len() <= MAX_PAYLOAD_SIZE + 2);
            let GameOutbound::Commands(batch) = batch;
            commands.extend(batch.commands.iter().cloned());
        }
        assert_eq!(commands.len(), 4);
        assert_eq!(commands[3], GameCommand::EndMatch);
    }

    #[test]
    fn test_command_larger_than_a_frame_is_dropped() {
        let mut out = OutgoingCommands::new();
        out.console_command("x".repeat(MAX_PAYLOAD_SIZE));
        out.end_match();

        let batches = out.take_batches();
        assert_eq!(batches, vec![GameOutbound::Commands(CommandBatch { commands: vec![GameCommand::EndMatch] })]);
    }

    #[test]
    fn test_command_ids_survive_flush() {
        let mut out = OutgoingCommands::new();
        out.spawn_human(0);
        out.take_batches();
        assert_eq!(out.spawn_human(0), 2);
    }
}
