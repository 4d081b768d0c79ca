//! Game State Reducer
//!
//! Folds the game's update stream into a point-in-time snapshot.
//! Player entries are keyed by player index (BTreeMap for stable packet order)
//! and live exactly as long as the car they describe.
//!
//! Each event is applied on its own: a malformed event is logged and skipped,
//! the rest of the batch still lands.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::core::math::{BoxShape, CollisionShape, Physics, Vector3};
use crate::game::mapping::{ActorId, PlayerMapping, SpawnAssignment};
use crate::game::update::{CarSpawn, GameUpdate, PhysicsUpdate, ReportedCarState, ScoreInfo, UpdateBatch};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Physics frames per second.
pub const FRAME_RATE: f32 = 120.0;

/// Speed at which a car counts as supersonic (uu/s).
pub const SUPERSONIC_SPEED: f32 = 2200.0;

/// Time after the first jump during which a dodge is still possible.
pub const DODGE_WINDOW_SECONDS: f32 = 1.25;

/// Respawn time used until a configuration says otherwise.
pub const DEFAULT_RESPAWN_SECONDS: f32 = 3.0;

/// Timer value meaning "not applicable right now".
pub const UNAVAILABLE: f32 = -1.0;

/// Respawn time of a 100-boost pad.
pub const BIG_PAD_RESPAWN_SECONDS: f32 = 10.0;

/// Respawn time of a small pad.
pub const SMALL_PAD_RESPAWN_SECONDS: f32 = 4.0;

/// Number of teams that can score.
pub const TEAM_COUNT: usize = 2;

fn frames_to_seconds(frames: u32) -> f32 {
    frames as f32 / FRAME_RATE
}

// =============================================================================
// MATCH PHASE
// =============================================================================

/// Match phase as reported by the game.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchPhase {
    /// No match loaded.
    #[default]
    Inactive,
    /// Pre-kickoff countdown.
    Countdown,
    /// Waiting for the first touch.
    Kickoff,
    /// Ball in play.
    Active,
    /// Goal just scored.
    GoalScored,
    /// Goal replay.
    Replay,
    /// Paused.
    Paused,
    /// Match over.
    Ended,
}

impl MatchPhase {
    /// Cars are on the field and controllable.
    pub fn is_live(self) -> bool {
        matches!(self, MatchPhase::Countdown | MatchPhase::Kickoff | MatchPhase::Active)
    }
}

// =============================================================================
// CAR STATE
// =============================================================================

/// Jump/dodge state of a car.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AirState {
    /// Wheels down.
    #[default]
    OnGround,
    /// First jump.
    Jumping,
    /// Second jump.
    DoubleJumping,
    /// Flipping.
    Dodging,
    /// Airborne without an action in progress.
    InAir,
}

/// One car, as agents see it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CarState {
    /// Game actor driving the car.
    pub actor_id: ActorId,
    /// Display name.
    pub name: String,
    /// Team.
    pub team: u32,
    /// Spawn id (0 when the car was not requested by the server).
    pub spawn_id: i32,
    /// Any kind of bot.
    pub is_bot: bool,
    /// Driven by an agent connection.
    pub is_custom_bot: bool,
    /// Collision box.
    pub hitbox: BoxShape,
    /// Latest physics.
    pub physics: Physics,
    /// Boost 0..=100.
    pub boost: f32,
    /// Jump/dodge state.
    pub air_state: AirState,
    /// Velocity at or above [`SUPERSONIC_SPEED`].
    pub is_supersonic: bool,
    /// First jump used since touching the ground.
    pub has_jumped: bool,
    /// Second jump used.
    pub has_double_jumped: bool,
    /// Dodge used.
    pub has_dodged: bool,
    /// Seconds left to dodge, or [`UNAVAILABLE`].
    pub dodge_timeout: f32,
    /// Waiting to respawn.
    pub is_demolished: bool,
    /// Seconds until respawn, or [`UNAVAILABLE`].
    pub demolished_timeout: f32,
    /// Frame of the last first jump.
    pub last_jump_frame: Option<u32>,
    /// Frame the current demolition timer is measured from.
    pub demolished_frame: Option<u32>,
    /// Score breakdown.
    pub score_info: ScoreInfo,
}

impl CarState {
    fn spawned(spawn: &CarSpawn, assignment: &SpawnAssignment) -> Self {
        Self {
            actor_id: spawn.actor_id,
            name: spawn.name.clone(),
            team: spawn.team,
            spawn_id: assignment.metadata.spawn_id,
            is_bot: assignment.metadata.is_bot,
            is_custom_bot: assignment.metadata.is_custom_bot,
            hitbox: spawn.hitbox,
            physics: Physics::default(),
            boost: 0.0,
            air_state: AirState::OnGround,
            is_supersonic: false,
            has_jumped: false,
            has_double_jumped: false,
            has_dodged: false,
            dodge_timeout: UNAVAILABLE,
            is_demolished: false,
            demolished_timeout: UNAVAILABLE,
            last_jump_frame: None,
            demolished_frame: None,
            score_info: ScoreInfo::default(),
        }
    }

    /// Recompute derived flags and timers from a reported state.
    fn apply_reported_state(&mut self, reported: ReportedCarState, frame: u32, respawn_seconds: f32) {
        if reported != ReportedCarState::Demolished {
            self.is_demolished = false;
            self.demolished_frame = None;
            self.demolished_timeout = UNAVAILABLE;
        }

        match reported {
            ReportedCarState::OnGround => {
                self.air_state = AirState::OnGround;
                self.has_jumped = false;
                self.has_double_jumped = false;
                self.has_dodged = false;
                self.last_jump_frame = None;
                self.dodge_timeout = UNAVAILABLE;
            }
            ReportedCarState::Jumping => {
                self.air_state = AirState::Jumping;
                self.has_jumped = true;
                self.last_jump_frame = Some(frame);
                self.dodge_timeout = DODGE_WINDOW_SECONDS;
            }
            ReportedCarState::DoubleJumping => {
                self.air_state = AirState::DoubleJumping;
                self.has_double_jumped = true;
                self.last_jump_frame = None;
                self.dodge_timeout = UNAVAILABLE;
            }
            ReportedCarState::Dodging => {
                self.air_state = AirState::Dodging;
                self.has_dodged = true;
                self.last_jump_frame = None;
                self.dodge_timeout = UNAVAILABLE;
            }
            ReportedCarState::InAir => {
                self.air_state = AirState::InAir;
                self.dodge_timeout = match self.last_jump_frame {
                    Some(jumped) => {
                        let remaining = DODGE_WINDOW_SECONDS - frames_to_seconds(frame.saturating_sub(jumped));
                        if remaining > 0.0 {
                            remaining
                        } else {
                            UNAVAILABLE
                        }
                    }
                    None => UNAVAILABLE,
                };
            }
            ReportedCarState::Demolished => {
                self.is_demolished = true;
                self.dodge_timeout = UNAVAILABLE;
                let since = *self.demolished_frame.get_or_insert(frame);
                let elapsed = frames_to_seconds(frame.saturating_sub(since));
                // Re-arm only once the cap is exceeded; exactly at the cap reads 0.0.
                if elapsed > respawn_seconds {
                    self.demolished_frame = Some(frame);
                    self.demolished_timeout = respawn_seconds;
                } else {
                    self.demolished_timeout = respawn_seconds - elapsed;
                }
            }
        }
    }
}

// =============================================================================
// BALL / FIELD
// =============================================================================

/// The ball.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BallState {
    /// Game actor id.
    pub actor_id: ActorId,
    /// Latest physics.
    pub physics: Physics,
    /// Collision shape.
    pub shape: CollisionShape,
}

/// Static description of a boost pad.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoostPadInfo {
    /// Location.
    pub location: Vector3,
    /// 100-boost pad.
    pub is_full_boost: bool,
}

/// Dynamic state of a boost pad.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoostPadState {
    /// Can be picked up.
    pub is_active: bool,
    /// Seconds until the pad is back, 0 while active.
    pub timer: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct BoostPad {
    info: BoostPadInfo,
    picked_up_frame: Option<u32>,
}

impl BoostPad {
    fn respawn_seconds(&self) -> f32 {
        if self.info.is_full_boost {
            BIG_PAD_RESPAWN_SECONDS
        } else {
            SMALL_PAD_RESPAWN_SECONDS
        }
    }

    fn state(&self, frame: u32) -> BoostPadState {
        match self.picked_up_frame {
            Some(picked) => {
                let remaining = self.respawn_seconds() - frames_to_seconds(frame.saturating_sub(picked));
                if remaining > 0.0 {
                    BoostPadState { is_active: false, timer: remaining }
                } else {
                    BoostPadState { is_active: true, timer: 0.0 }
                }
            }
            None => BoostPadState { is_active: true, timer: 0.0 },
        }
    }
}

/// A goal.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GoalInfo {
    /// Defending team.
    pub team: u32,
    /// Center.
    pub location: Vector3,
    /// Facing direction.
    pub direction: Vector3,
    /// Width.
    pub width: f32,
    /// Height.
    pub height: f32,
}

/// Static field layout, sent once per map.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    /// Boost pads in game order.
    pub boost_pads: Vec<BoostPadInfo>,
    /// Goals.
    pub goals: Vec<GoalInfo>,
}

// =============================================================================
// PACKET
// =============================================================================

/// A car in a packet, with its player index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    /// Player index.
    pub index: u32,
    /// Car state.
    pub car: CarState,
}

/// Per-tick snapshot sent to every session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GamePacket {
    /// Physics frame.
    pub frame_num: u32,
    /// Seconds since the match loaded.
    pub seconds_elapsed: f32,
    /// Clock shown in game.
    pub game_time_remaining: f32,
    /// Overtime.
    pub is_overtime: bool,
    /// Phase.
    pub phase: MatchPhase,
    /// World gravity.
    pub world_gravity_z: f32,
    /// Game speed.
    pub game_speed: f32,
    /// Score per team.
    pub team_scores: [u32; TEAM_COUNT],
    /// Cars ordered by index.
    pub players: Vec<PlayerInfo>,
    /// Ball, once spawned.
    pub ball: Option<BallState>,
    /// Pad states in field-info order.
    pub boost_pads: Vec<BoostPadState>,
}

// =============================================================================
// ERRORS / OUTCOME
// =============================================================================

/// Why a single event was not applied.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UpdateError {
    /// Event names an actor the reducer does not know.
    #[error("unknown actor {0}")]
    UnknownActor(ActorId),

    /// A float field is NaN or infinite.
    #[error("non-finite value in {0}")]
    NonFinite(&'static str),

    /// Team outside the scoring teams.
    #[error("invalid team {0}")]
    InvalidTeam(u32),

    /// Pad index beyond the pad list.
    #[error("invalid boost pad {0}")]
    InvalidPad(u32),

    /// Clock went backwards.
    #[error("negative frame delta {0}")]
    NegativeDelta(f32),
}

/// Signals derived from one batch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ApplyOutcome {
    /// A match-info event reset the field.
    pub match_info_reset: bool,
    /// Pads or goals changed; field info must be re-sent.
    pub field_info_changed: bool,
    /// Last phase reported in the batch, if any.
    pub phase: Option<MatchPhase>,
    /// Cars that spawned in this batch.
    pub spawned: Vec<SpawnAssignment>,
    /// Events for unknown actors.
    pub dropped: usize,
    /// Malformed events.
    pub rejected: usize,
}

impl ApplyOutcome {
    /// The batch moved the match to [`MatchPhase::Ended`].
    pub fn match_ended(&self) -> bool {
        self.phase == Some(MatchPhase::Ended)
    }
}

// =============================================================================
// GAME STATE
// =============================================================================

/// Authoritative snapshot of the running match.
#[derive(Clone, Debug)]
pub struct GameState {
    frame_num: u32,
    seconds_elapsed: f32,
    game_time_remaining: f32,
    is_overtime: bool,
    phase: MatchPhase,
    world_gravity_z: f32,
    game_speed: f32,
    respawn_seconds: f32,
    team_scores: [u32; TEAM_COUNT],
    cars: BTreeMap<u32, CarState>,
    mapping: PlayerMapping,
    ball: Option<BallState>,
    boost_pads: Vec<BoostPad>,
    goals: Vec<GoalInfo>,
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

impl GameState {
    /// Empty state.
    pub fn new() -> Self {
        Self {
            frame_num: 0,
            seconds_elapsed: 0.0,
            game_time_remaining: 0.0,
            is_overtime: false,
            phase: MatchPhase::Inactive,
            world_gravity_z: -650.0,
            game_speed: 1.0,
            respawn_seconds: DEFAULT_RESPAWN_SECONDS,
            team_scores: [0; TEAM_COUNT],
            cars: BTreeMap::new(),
            mapping: PlayerMapping::new(),
            ball: None,
            boost_pads: Vec::new(),
            goals: Vec::new(),
        }
    }

    /// Apply a batch in order.
    pub fn apply(&mut self, batch: &UpdateBatch) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();

        for update in &batch.updates {
            match self.apply_one(update, &mut outcome) {
                Ok(()) => {}
                Err(UpdateError::UnknownActor(actor)) => {
                    trace!(actor, kind = update.kind(), "dropping update for unknown actor");
                    outcome.dropped += 1;
                }
                Err(e) => {
                    warn!(kind = update.kind(), error = %e, "rejecting malformed update");
                    outcome.rejected += 1;
                }
            }
        }

        outcome
    }

    fn apply_one(&mut self, update: &GameUpdate, outcome: &mut ApplyOutcome) -> Result<(), UpdateError> {
        match update {
            GameUpdate::FrameAdvance { frames, delta_seconds, time_remaining } => {
                if !delta_seconds.is_finite() || !time_remaining.is_finite() {
                    return Err(UpdateError::NonFinite("frame_advance"));
                }
                if *delta_seconds < 0.0 {
                    return Err(UpdateError::NegativeDelta(*delta_seconds));
                }
                self.frame_num = self.frame_num.saturating_add(*frames);
                self.seconds_elapsed += *delta_seconds;
                self.game_time_remaining = *time_remaining;
                Ok(())
            }

            GameUpdate::CarSpawn(spawn) => {
                let assignment = self.mapping.apply_car_spawn(spawn.actor_id, spawn.command_id);
                debug!(
                    actor = spawn.actor_id,
                    index = assignment.index,
                    expected = assignment.expected,
                    "car spawned"
                );
                self.cars
                    .entry(assignment.index)
                    .or_insert_with(|| CarState::spawned(spawn, &assignment));
                outcome.spawned.push(assignment);
                Ok(())
            }

            GameUpdate::BallSpawn { actor_id, shape } => {
                self.ball = Some(BallState {
                    actor_id: *actor_id,
                    physics: Physics::default(),
                    shape: *shape,
                });
                Ok(())
            }

            GameUpdate::ActorDespawn { actor_id } => {
                if self.ball.map(|b| b.actor_id) == Some(*actor_id) {
                    self.ball = None;
                    return Ok(());
                }
                let (index, _) = self
                    .mapping
                    .remove_actor(*actor_id)
                    .ok_or(UpdateError::UnknownActor(*actor_id))?;
                self.cars.remove(&index);
                debug!(actor = actor_id, index, "car despawned");
                Ok(())
            }

            GameUpdate::PhysicsUpdate(update) => self.apply_physics(update),

            GameUpdate::BoostUpdate { actor_id, amount } => {
                if !amount.is_finite() {
                    return Err(UpdateError::NonFinite("boost_update"));
                }
                let car = self.car_for_actor(*actor_id)?;
                car.boost = amount.clamp(0.0, 100.0);
                Ok(())
            }

            GameUpdate::BoostPadPickup { pad_index } => {
                let frame = self.frame_num;
                let pad = self
                    .boost_pads
                    .get_mut(*pad_index as usize)
                    .ok_or(UpdateError::InvalidPad(*pad_index))?;
                pad.picked_up_frame = Some(frame);
                Ok(())
            }

            GameUpdate::PhaseTransition { phase, is_overtime } => {
                self.phase = *phase;
                self.is_overtime = *is_overtime;
                outcome.phase = Some(*phase);
                Ok(())
            }

            GameUpdate::ScoreUpdate { team, score } => {
                let slot = self
                    .team_scores
                    .get_mut(*team as usize)
                    .ok_or(UpdateError::InvalidTeam(*team))?;
                *slot = *score;
                Ok(())
            }

            GameUpdate::MatchInfo { gravity_z, game_speed } => {
                if !gravity_z.is_finite() || !game_speed.is_finite() {
                    return Err(UpdateError::NonFinite("match_info"));
                }
                self.boost_pads.clear();
                self.frame_num = 0;
                self.seconds_elapsed = 0.0;
                self.world_gravity_z = *gravity_z;
                self.game_speed = *game_speed;
                outcome.match_info_reset = true;
                outcome.field_info_changed = true;
                Ok(())
            }

            GameUpdate::BoostPadSpawn { location, is_full_boost } => {
                if !location.is_finite() {
                    return Err(UpdateError::NonFinite("boost_pad_spawn"));
                }
                self.boost_pads.push(BoostPad {
                    info: BoostPadInfo { location: *location, is_full_boost: *is_full_boost },
                    picked_up_frame: None,
                });
                outcome.field_info_changed = true;
                Ok(())
            }

            GameUpdate::GoalSpawn { team, location, direction, width, height } => {
                if !location.is_finite() || !direction.is_finite() {
                    return Err(UpdateError::NonFinite("goal_spawn"));
                }
                if *team as usize >= TEAM_COUNT {
                    return Err(UpdateError::InvalidTeam(*team));
                }
                let goal = GoalInfo {
                    team: *team,
                    location: *location,
                    direction: *direction,
                    width: *width,
                    height: *height,
                };
                match self.goals.iter_mut().find(|g| g.team == *team) {
                    Some(existing) => *existing = goal,
                    None => self.goals.push(goal),
                }
                outcome.field_info_changed = true;
                Ok(())
            }

            GameUpdate::PlayerStatsUpdate { actor_id, stats } => {
                let car = self.car_for_actor(*actor_id)?;
                car.score_info = *stats;
                Ok(())
            }
        }
    }

    fn apply_physics(&mut self, update: &PhysicsUpdate) -> Result<(), UpdateError> {
        if !update.physics.is_finite() {
            return Err(UpdateError::NonFinite("physics_update"));
        }

        if let Some(ball) = self.ball.as_mut().filter(|b| b.actor_id == update.actor_id) {
            ball.physics = update.physics;
            return Ok(());
        }

        let frame = self.frame_num;
        let respawn = self.respawn_seconds;
        let car = self.car_for_actor(update.actor_id)?;
        car.physics = update.physics;
        car.is_supersonic = update.physics.velocity.length() >= SUPERSONIC_SPEED;
        if let Some(reported) = update.car_state {
            car.apply_reported_state(reported, frame, respawn);
        }
        Ok(())
    }

    fn car_for_actor(&mut self, actor_id: ActorId) -> Result<&mut CarState, UpdateError> {
        self.mapping
            .index_from_actor(actor_id)
            .and_then(|index| self.cars.get_mut(&index))
            .ok_or(UpdateError::UnknownActor(actor_id))
    }

    /// Forget everything tied to the current map. Called when a map (re)load is
    /// requested; the game re-announces every actor afterwards.
    pub fn reset_for_map_load(&mut self) {
        self.frame_num = 0;
        self.seconds_elapsed = 0.0;
        self.game_time_remaining = 0.0;
        self.is_overtime = false;
        self.phase = MatchPhase::Inactive;
        self.team_scores = [0; TEAM_COUNT];
        self.cars.clear();
        self.mapping.clear();
        self.ball = None;
        self.boost_pads.clear();
        self.goals.clear();
    }

    /// Respawn time used for demolition timers.
    pub fn set_respawn_seconds(&mut self, seconds: f32) {
        self.respawn_seconds = seconds;
    }

    /// Identity map.
    pub fn mapping(&self) -> &PlayerMapping {
        &self.mapping
    }

    /// Identity map, for registering outgoing spawns.
    pub fn mapping_mut(&mut self) -> &mut PlayerMapping {
        &mut self.mapping
    }

    /// Car at an index.
    pub fn car(&self, index: u32) -> Option<&CarState> {
        self.cars.get(&index)
    }

    /// Number of live cars.
    pub fn car_count(&self) -> usize {
        self.cars.len()
    }

    /// Ball, once spawned.
    pub fn ball(&self) -> Option<&BallState> {
        self.ball.as_ref()
    }

    /// Current frame.
    pub fn frame_num(&self) -> u32 {
        self.frame_num
    }

    /// Current phase.
    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    /// Snapshot for agents.
    pub fn packet(&self) -> GamePacket {
        GamePacket {
            frame_num: self.frame_num,
            seconds_elapsed: self.seconds_elapsed,
            game_time_remaining: self.game_time_remaining,
            is_overtime: self.is_overtime,
            phase: self.phase,
            world_gravity_z: self.world_gravity_z,
            game_speed: self.game_speed,
            team_scores: self.team_scores,
            players: self
                .cars
                .iter()
                .map(|(index, car)| PlayerInfo { index: *index, car: car.clone() })
                .collect(),
            ball: self.ball,
            boost_pads: self.boost_pads.iter().map(|p| p.state(self.frame_num)).collect(),
        }
    }

    /// Static field layout.
    pub fn field_info(&self) -> FieldInfo {
        FieldInfo {
            boost_pads: self.boost_pads.iter().map(|p| p.info).collect(),
            goals: self.goals.clone(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
