//! Agent Protocol Messages
//!
//! Wire format between agents and the server. Every message travels in one
//! frame (see [`crate::core::framing`]); the bincode variant index of
//! [`ClientMessage`] / [`ServerMessage`] is the schema tag, so variants may
//! only ever be appended.

use serde::{Deserialize, Serialize};

use crate::core::framing::{self, FrameError, WireMessage};
use crate::core::math::{Rotator, Vector3};
use crate::game::config::{MatchConfiguration, PlayerLoadout};
use crate::game::external::BallPrediction;
use crate::game::state::{FieldInfo, GamePacket};

// =============================================================================
// SHARED TYPES
// =============================================================================

/// Controller state for one car.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerState {
    /// -1..=1
    pub throttle: f32,
    /// -1..=1
    pub steer: f32,
    /// -1..=1
    pub pitch: f32,
    /// -1..=1
    pub yaw: f32,
    /// -1..=1
    pub roll: f32,
    /// Jump held.
    pub jump: bool,
    /// Boost held.
    pub boost: bool,
    /// Handbrake held.
    pub handbrake: bool,
    /// Use item (rumble).
    pub use_item: bool,
}

/// Physics override; `None` fields are left alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredPhysics {
    /// Location.
    pub location: Option<Vector3>,
    /// Rotation.
    pub rotation: Option<Rotator>,
    /// Velocity.
    pub velocity: Option<Vector3>,
    /// Angular velocity.
    pub angular_velocity: Option<Vector3>,
}

impl DesiredPhysics {
    /// Every present value is finite.
    pub fn is_finite(&self) -> bool {
        self.location.map_or(true, Vector3::is_finite)
            && self.rotation.map_or(true, Rotator::is_finite)
            && self.velocity.map_or(true, Vector3::is_finite)
            && self.angular_velocity.map_or(true, Vector3::is_finite)
    }
}

/// Override for one car.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DesiredCarState {
    /// Player index.
    pub index: u32,
    /// Physics override.
    pub physics: Option<DesiredPhysics>,
    /// Boost override.
    pub boost_amount: Option<f32>,
}

/// State-setting request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredGameState {
    /// Ball override.
    pub ball: Option<DesiredPhysics>,
    /// Car overrides.
    pub cars: Vec<DesiredCarState>,
    /// Console commands to run.
    pub console_commands: Vec<String>,
}

/// RGBA color.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    /// Red
    pub r: u8,
    /// Green
    pub g: u8,
    /// Blue
    pub b: u8,
    /// Alpha
    pub a: u8,
}

/// One debug drawing primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RenderMessage {
    /// Line in world space.
    Line3D {
        /// Start.
        start: Vector3,
        /// End.
        end: Vector3,
        /// Color.
        color: Color,
    },
    /// Text in screen space.
    Text2D {
        /// Screen x (0..=1).
        x: f32,
        /// Screen y (0..=1).
        y: f32,
        /// Text.
        text: String,
        /// Scale.
        scale: f32,
        /// Color.
        color: Color,
    },
    /// Text anchored in world space.
    Text3D {
        /// Anchor.
        position: Vector3,
        /// Text.
        text: String,
        /// Scale.
        scale: f32,
        /// Color.
        color: Color,
    },
}

/// A named set of drawings; re-sending a group id replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderGroup {
    /// Group id.
    pub id: i32,
    /// Drawings.
    pub render_messages: Vec<RenderMessage>,
}

/// Chat-style message between agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchComm {
    /// Sender's player index.
    pub index: u32,
    /// Sender's team.
    pub team: u32,
    /// Only deliver to the sender's team.
    pub team_only: bool,
    /// Optional text shown in game.
    pub display: Option<String>,
    /// Opaque payload.
    pub content: Vec<u8>,
}

/// Session options sent right after connecting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Agent identifier to claim; empty for match managers.
    pub agent_id: String,
    /// Receive a ball prediction every tick.
    pub wants_ball_predictions: bool,
    /// Receive match comms.
    pub wants_comms: bool,
    /// Disconnect this session when a new match starts.
    pub close_between_matches: bool,
}

/// Input for one car.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerInput {
    /// Player index.
    pub player_index: u32,
    /// Controller.
    pub controller: ControllerState,
}

/// Loadout change for one car.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SetLoadout {
    /// Player index.
    pub index: u32,
    /// New loadout.
    pub loadout: PlayerLoadout,
}

/// An index/spawn id pair a session controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllableInfo {
    /// Player index (or script index).
    pub index: u32,
    /// Spawn id.
    pub spawn_id: i32,
}

/// What a session controls, sent after its reservation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllableTeamInfo {
    /// Team of the claimed entries.
    pub team: u32,
    /// Claimed entries.
    pub controllables: Vec<ControllableInfo>,
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from an agent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Handshake.
    ConnectionSettings(ConnectionSettings),

    /// Agent finished initializing.
    InitComplete,

    /// Controller input.
    PlayerInput(PlayerInput),

    /// Loadout change.
    SetLoadout(SetLoadout),

    /// Start a match from a configuration file.
    StartCommand {
        /// Configuration path.
        config_path: String,
    },

    /// Start a match from an inline configuration.
    MatchConfiguration(Box<MatchConfiguration>),

    /// Stop the match.
    StopCommand {
        /// Also shut the server down.
        shutdown_server: bool,
    },

    /// State-setting request.
    DesiredGameState(DesiredGameState),

    /// Add or replace a render group.
    RenderGroup(RenderGroup),

    /// Remove a render group.
    RemoveRenderGroup {
        /// Group id.
        id: i32,
    },

    /// Match comm to relay.
    MatchComm(MatchComm),

    /// The agent is leaving.
    DisconnectSignal,
}

impl WireMessage for ClientMessage {
    const TAG_COUNT: u32 = 12;
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from the server to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Current match configuration.
    MatchConfiguration(Box<MatchConfiguration>),

    /// Static field layout.
    FieldInfo(FieldInfo),

    /// Per-tick state.
    GamePacket(Box<GamePacket>),

    /// Ball prediction for the current tick.
    BallPrediction(BallPrediction),

    /// Indices the session controls.
    ControllableTeamInfo(ControllableTeamInfo),

    /// Relayed match comm.
    MatchComm(MatchComm),

    /// The server is closing this session.
    DisconnectSignal,
}

impl WireMessage for ServerMessage {
    const TAG_COUNT: u32 = 7;
}

// =============================================================================
// SERIALIZATION
// =============================================================================

impl ClientMessage {
    /// Encode as a frame.
    pub fn to_bytes(&self) -> Result<bytes::Bytes, FrameError> {
        framing::encode(self)
    }

    /// Decode a frame payload.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, FrameError> {
        framing::decode_payload(payload)
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::ConnectionSettings(_) => "connection_settings",
            ClientMessage::InitComplete => "init_complete",
            ClientMessage::PlayerInput(_) => "player_input",
            ClientMessage::SetLoadout(_) => "set_loadout",
            ClientMessage::StartCommand { .. } => "start_command",
            ClientMessage::MatchConfiguration(_) => "match_configuration",
            ClientMessage::StopCommand { .. } => "stop_command",
            ClientMessage::DesiredGameState(_) => "desired_game_state",
            ClientMessage::RenderGroup(_) => "render_group",
            ClientMessage::RemoveRenderGroup { .. } => "remove_render_group",
            ClientMessage::MatchComm(_) => "match_comm",
            ClientMessage::DisconnectSignal => "disconnect_signal",
        }
    }
}

impl ServerMessage {
    /// Encode as a frame.
    pub fn to_bytes(&self) -> Result<bytes::Bytes, FrameError> {
        framing::encode(self)
    }

    /// Decode a frame payload.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, FrameError> {
        framing::decode_payload(payload)
    }
}
