//! Game Update Events
//!
//! Low-level events streamed by the game process. The game groups them into
//! batches; order inside a batch is significant and the reducer in
//! [`crate::game::state`] applies them front to back.

use serde::{Deserialize, Serialize};

use crate::core::math::{BoxShape, CollisionShape, Physics, Vector3};
use crate::game::mapping::ActorId;
use crate::game::state::MatchPhase;

/// Discrete car state reported alongside physics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportedCarState {
    /// All wheels on a surface.
    OnGround,
    /// First jump held.
    Jumping,
    /// Second jump used.
    DoubleJumping,
    /// Flip in progress.
    Dodging,
    /// Airborne, no jump action in progress.
    InAir,
    /// Exploded, waiting to respawn.
    Demolished,
}

/// A car entered the world.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CarSpawn {
    /// Game actor id.
    pub actor_id: ActorId,
    /// Correlation id of the spawn command, if the server asked for it.
    pub command_id: Option<u32>,
    /// Display name.
    pub name: String,
    /// Team.
    pub team: u32,
    /// Collision box.
    pub hitbox: BoxShape,
}

/// Physics snapshot for one actor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhysicsUpdate {
    /// Game actor id (car or ball).
    pub actor_id: ActorId,
    /// Rigid body state.
    pub physics: Physics,
    /// Car state; `None` for the ball.
    pub car_state: Option<ReportedCarState>,
}

/// Per-player score breakdown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreInfo {
    /// Points
    pub score: u32,
    /// Goals
    pub goals: u32,
    /// Own goals
    pub own_goals: u32,
    /// Assists
    pub assists: u32,
    /// Saves
    pub saves: u32,
    /// Shots
    pub shots: u32,
    /// Demolitions
    pub demolitions: u32,
}

/// One event from the game.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GameUpdate {
    /// The simulation advanced.
    FrameAdvance {
        /// Physics frames since the previous advance.
        frames: u32,
        /// Game seconds since the previous advance.
        delta_seconds: f32,
        /// Clock shown in game.
        time_remaining: f32,
    },
    /// A car spawned.
    CarSpawn(CarSpawn),
    /// The ball spawned.
    BallSpawn {
        /// Game actor id.
        actor_id: ActorId,
        /// Collision shape.
        shape: CollisionShape,
    },
    /// An actor was destroyed.
    ActorDespawn {
        /// Game actor id.
        actor_id: ActorId,
    },
    /// Physics for a car or the ball.
    PhysicsUpdate(PhysicsUpdate),
    /// Car boost amount changed.
    BoostUpdate {
        /// Game actor id.
        actor_id: ActorId,
        /// Boost 0..=100.
        amount: f32,
    },
    /// A boost pad was picked up.
    BoostPadPickup {
        /// Position in the pad list.
        pad_index: u32,
    },
    /// Match phase changed.
    PhaseTransition {
        /// New phase.
        phase: MatchPhase,
        /// Overtime flag.
        is_overtime: bool,
    },
    /// Team score changed.
    ScoreUpdate {
        /// Team.
        team: u32,
        /// New score.
        score: u32,
    },
    /// A match was (re)loaded.
    MatchInfo {
        /// World gravity (negative is down).
        gravity_z: f32,
        /// Game speed multiplier.
        game_speed: f32,
    },
    /// A boost pad exists.
    BoostPadSpawn {
        /// Pad location.
        location: Vector3,
        /// 100-boost pad.
        is_full_boost: bool,
    },
    /// A goal exists.
    GoalSpawn {
        /// Defending team.
        team: u32,
        /// Goal center.
        location: Vector3,
        /// Facing direction.
        direction: Vector3,
        /// Width.
        width: f32,
        /// Height.
        height: f32,
    },
    /// Player statistics changed.
    PlayerStatsUpdate {
        /// Game actor id.
        actor_id: ActorId,
        /// New statistics.
        stats: ScoreInfo,
    },
}

impl GameUpdate {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            GameUpdate::FrameAdvance { .. } => "frame_advance",
            GameUpdate::CarSpawn(_) => "car_spawn",
            GameUpdate::BallSpawn { .. } => "ball_spawn",
            GameUpdate::ActorDespawn { .. } => "actor_despawn",
            GameUpdate::PhysicsUpdate(_) => "physics_update",
            GameUpdate::BoostUpdate { .. } => "boost_update",
            GameUpdate::BoostPadPickup { .. } => "boost_pad_pickup",
            GameUpdate::PhaseTransition { .. } => "phase_transition",
            GameUpdate::ScoreUpdate { .. } => "score_update",
            GameUpdate::MatchInfo { .. } => "match_info",
            GameUpdate::BoostPadSpawn { .. } => "boost_pad_spawn",
            GameUpdate::GoalSpawn { .. } => "goal_spawn",
            GameUpdate::PlayerStatsUpdate { .. } => "player_stats_update",
        }
    }
}

/// A batch of updates, applied in order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateBatch {
    /// Events in arrival order.
    pub updates: Vec<GameUpdate>,
}

impl UpdateBatch {
    /// Wrap a list of updates.
    pub fn new(updates: Vec<GameUpdate>) -> Self {
        Self { updates }
    }
}
