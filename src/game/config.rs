//! Match Configuration
//!
//! The description of a match as handed to the server: who plays, which
//! scripts run, mutators, and how the game should be launched. Loading it
//! from disk is someone else's job (see [`crate::game::external`]); this
//! module validates it and fills in the derived fields the rest of the
//! server relies on.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::core::hash::derive_spawn_id;

/// Blue team.
pub const BLUE_TEAM: u32 = 0;

/// Orange team.
pub const ORANGE_TEAM: u32 = 1;

/// Team reported for scripts, which have no car.
pub const SCRIPT_TEAM: u32 = 2;

// =============================================================================
// ENUMERATIONS
// =============================================================================

/// How the game process is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Launcher {
    /// Through the Steam client.
    #[default]
    Steam,
    /// Through the Epic launcher.
    Epic,
    /// Custom launch command (see `launcher_arg`).
    Custom,
    /// Never launch; assume the game is started by hand.
    NoLaunch,
}

/// Game mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GameMode {
    /// Standard soccer.
    #[default]
    Soccer,
    /// Hoops.
    Hoops,
    /// Dropshot.
    Dropshot,
    /// Snow day (puck).
    Hockey,
    /// Rumble.
    Rumble,
    /// Heatseeker.
    Heatseeker,
    /// Gridiron.
    Gridiron,
}

impl GameMode {
    /// Game info class requested in the open command.
    pub fn game_class(self) -> &'static str {
        match self {
            GameMode::Soccer => "TAGame.GameInfo_Soccar_TA",
            GameMode::Hoops => "TAGame.GameInfo_Basketball_TA",
            GameMode::Dropshot => "TAGame.GameInfo_Breakout_TA",
            GameMode::Hockey => "TAGame.GameInfo_Hockey_TA",
            GameMode::Rumble => "TAGame.GameInfo_Items_TA",
            GameMode::Heatseeker => "TAGame.GameInfo_GodBall_TA",
            GameMode::Gridiron => "TAGame.GameInfo_Football_TA",
        }
    }
}

/// What to do when a match is already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExistingMatchBehavior {
    /// Always reload the map.
    #[default]
    Restart,
    /// Reload only if roster, mutators, map or mode changed.
    RestartIfDifferent,
    /// Keep the running match; despawn and spawn the differences.
    ContinueAndSpawn,
}

/// Built-in bot difficulty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PsyonixSkill {
    /// Beginner
    Beginner,
    /// Rookie
    Rookie,
    /// Pro
    Pro,
    /// All-star
    #[default]
    AllStar,
}

/// Who drives a configured car.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerClass {
    /// An external agent process.
    CustomBot,
    /// The local human player.
    Human,
    /// A built-in game bot.
    PsyonixBot {
        /// Difficulty
        skill: PsyonixSkill,
    },
}

impl PlayerClass {
    /// Human-controlled.
    pub fn is_human(self) -> bool {
        matches!(self, PlayerClass::Human)
    }

    /// Driven by an agent connection.
    pub fn is_custom_bot(self) -> bool {
        matches!(self, PlayerClass::CustomBot)
    }
}

// =============================================================================
// MUTATORS
// =============================================================================

/// Match length mutator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MatchLength {
    /// 5 minutes
    #[default]
    FiveMinutes,
    /// 10 minutes
    TenMinutes,
    /// 20 minutes
    TwentyMinutes,
    /// No clock
    Unlimited,
}

/// Score limit mutator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MaxScore {
    /// No limit
    #[default]
    Unlimited,
    /// 1 goal
    OneGoal,
    /// 3 goals
    ThreeGoals,
    /// 5 goals
    FiveGoals,
    /// 7 goals
    SevenGoals,
}

/// Game speed mutator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GameSpeed {
    /// Normal
    #[default]
    Default,
    /// Slow motion
    SloMo,
    /// Time warp
    TimeWarp,
}

/// Gravity mutator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GravityOption {
    /// Normal
    #[default]
    Default,
    /// Low
    Low,
    /// High
    High,
    /// Super high
    SuperHigh,
}

/// Boost mutator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BoostAmount {
    /// Normal
    #[default]
    Default,
    /// Unlimited
    Unlimited,
    /// Slow recharge
    SlowRecharge,
    /// Fast recharge
    FastRecharge,
    /// No boost
    NoBoost,
}

/// Demolition respawn mutator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RespawnTime {
    /// 3 seconds
    #[default]
    ThreeSeconds,
    /// 2 seconds
    TwoSeconds,
    /// 1 second
    OneSecond,
    /// Goal reset disabled (respawn stays at 3 seconds)
    DisableGoalReset,
}

impl RespawnTime {
    /// Respawn duration in seconds.
    pub fn seconds(self) -> f32 {
        match self {
            RespawnTime::ThreeSeconds | RespawnTime::DisableGoalReset => 3.0,
            RespawnTime::TwoSeconds => 2.0,
            RespawnTime::OneSecond => 1.0,
        }
    }
}

/// All mutators of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MutatorSettings {
    /// Match length
    pub match_length: MatchLength,
    /// Score limit
    pub max_score: MaxScore,
    /// Game speed
    pub game_speed: GameSpeed,
    /// Gravity
    pub gravity: GravityOption,
    /// Boost
    pub boost_amount: BoostAmount,
    /// Respawn time
    pub respawn_time: RespawnTime,
}

impl MutatorSettings {
    /// Game tags for the open command, in a fixed order.
    pub fn game_tags(&self) -> Vec<&'static str> {
        let mut tags = Vec::new();

        match self.match_length {
            MatchLength::FiveMinutes => {}
            MatchLength::TenMinutes => tags.push("10Minutes"),
            MatchLength::TwentyMinutes => tags.push("20Minutes"),
            MatchLength::Unlimited => tags.push("UnlimitedTime"),
        }
        match self.max_score {
            MaxScore::Unlimited => {}
            MaxScore::OneGoal => tags.push("Max1"),
            MaxScore::ThreeGoals => tags.push("Max3"),
            MaxScore::FiveGoals => tags.push("Max5"),
            MaxScore::SevenGoals => tags.push("Max7"),
        }
        match self.game_speed {
            GameSpeed::Default => {}
            GameSpeed::SloMo => tags.push("SloMoGameSpeed"),
            GameSpeed::TimeWarp => tags.push("SloMoTimeWarp"),
        }
        match self.gravity {
            GravityOption::Default => {}
            GravityOption::Low => tags.push("LowGravity"),
            GravityOption::High => tags.push("HighGravity"),
            GravityOption::SuperHigh => tags.push("SuperGravity"),
        }
        match self.boost_amount {
            BoostAmount::Default => {}
            BoostAmount::Unlimited => tags.push("UnlimitedBooster"),
            BoostAmount::SlowRecharge => tags.push("SlowRecharge"),
            BoostAmount::FastRecharge => tags.push("RapidRecharge"),
            BoostAmount::NoBoost => tags.push("NoBooster"),
        }
        match self.respawn_time {
            RespawnTime::ThreeSeconds => {}
            RespawnTime::TwoSeconds => tags.push("TwoSecondsRespawn"),
            RespawnTime::OneSecond => tags.push("OneSecondsRespawn"),
            RespawnTime::DisableGoalReset => tags.push("DisableGoalDelay"),
        }

        tags
    }
}

// =============================================================================
// PLAYERS & SCRIPTS
// =============================================================================

/// Cosmetic loadout item ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerLoadout {
    /// Primary color
    pub team_color_id: u32,
    /// Accent color
    pub custom_color_id: u32,
    /// Car body
    pub car_id: u32,
    /// Decal
    pub decal_id: u32,
    /// Wheels
    pub wheels_id: u32,
    /// Boost trail
    pub boost_id: u32,
    /// Antenna
    pub antenna_id: u32,
    /// Topper
    pub hat_id: u32,
}

/// One configured car.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerConfiguration {
    /// Driver kind.
    pub variety: PlayerClass,
    /// Display name (deduplicated during normalization).
    pub name: String,
    /// Team (0 blue, 1 orange).
    pub team: u32,
    /// Working directory for launching the agent.
    #[serde(default)]
    pub root_dir: String,
    /// Command used to launch the agent.
    #[serde(default)]
    pub run_command: String,
    /// Car cosmetics.
    #[serde(default)]
    pub loadout: Option<PlayerLoadout>,
    /// Stable id; 0 means "derive one".
    #[serde(default)]
    pub spawn_id: i32,
    /// Agent identifier used to claim this car.
    #[serde(default)]
    pub agent_id: String,
    /// Claimed together with same-agent, same-team entries.
    #[serde(default)]
    pub hivemind: bool,
}

/// One configured script (an agent without a car).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptConfiguration {
    /// Display name.
    pub name: String,
    /// Working directory.
    #[serde(default)]
    pub root_dir: String,
    /// Launch command.
    #[serde(default)]
    pub run_command: String,
    /// Stable id; 0 means "derive one".
    #[serde(default)]
    pub spawn_id: i32,
    /// Agent identifier used to claim this script.
    pub agent_id: String,
}

// =============================================================================
// MATCH CONFIGURATION
// =============================================================================

/// A complete match description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfiguration {
    /// How to start the game.
    pub launcher: Launcher,
    /// Extra argument for the launcher.
    pub launcher_arg: String,
    /// Launch agents through the process launcher.
    pub auto_start_agents: bool,
    /// Hold car spawning until every expected agent is ready.
    pub wait_for_agents: bool,
    /// Map package name.
    pub game_map_upk: String,
    /// Cars.
    pub player_configurations: Vec<PlayerConfiguration>,
    /// Scripts.
    pub script_configurations: Vec<ScriptConfiguration>,
    /// Game mode.
    pub game_mode: GameMode,
    /// Skip goal replays.
    pub skip_replays: bool,
    /// Skip kickoff countdown and spawn without waiting.
    pub instant_start: bool,
    /// Mutators.
    pub mutators: MutatorSettings,
    /// What to do with a running match.
    pub existing_match_behavior: ExistingMatchBehavior,
    /// Allow agents to draw debug rendering.
    pub enable_rendering: bool,
    /// Allow agents to set game state.
    pub enable_state_setting: bool,
    /// Open the map in freeplay instead of an exhibition.
    pub freeplay: bool,
}

impl Default for MatchConfiguration {
    fn default() -> Self {
        Self {
            launcher: Launcher::Steam,
            launcher_arg: String::new(),
            auto_start_agents: true,
            wait_for_agents: true,
            game_map_upk: "Stadium_P".to_string(),
            player_configurations: Vec::new(),
            script_configurations: Vec::new(),
            game_mode: GameMode::Soccer,
            skip_replays: false,
            instant_start: false,
            mutators: MutatorSettings::default(),
            existing_match_behavior: ExistingMatchBehavior::Restart,
            enable_rendering: false,
            enable_state_setting: true,
            freeplay: false,
        }
    }
}

/// A validation finding. A configuration with any finding does not start.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// At most one human may play.
    #[error("{0} human players configured, at most one is allowed")]
    MultipleHumans(usize),

    /// Team outside {0, 1}.
    #[error("player '{name}' has invalid team {team}")]
    InvalidTeam {
        /// Player name.
        name: String,
        /// Offending team.
        team: u32,
    },

    /// Agent-driven entry without an agent id.
    #[error("'{name}' has no agent id")]
    MissingAgentId {
        /// Player or script name.
        name: String,
    },

    /// Empty map name.
    #[error("no map configured")]
    MissingMap,

    /// Two entries asked for the same explicit spawn id.
    #[error("spawn id {0} is used more than once")]
    DuplicateSpawnId(i32),
}

impl MatchConfiguration {
    /// Check the configuration, returning every finding.
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        if self.game_map_upk.trim().is_empty() {
            errors.push(ConfigError::MissingMap);
        }

        let humans = self.human_count();
        if humans > 1 {
            errors.push(ConfigError::MultipleHumans(humans));
        }

        let mut seen_spawn_ids: HashMap<i32, usize> = HashMap::new();

        for player in &self.player_configurations {
            if player.team != BLUE_TEAM && player.team != ORANGE_TEAM {
                errors.push(ConfigError::InvalidTeam {
                    name: player.name.clone(),
                    team: player.team,
                });
            }
            if player.variety.is_custom_bot() && player.agent_id.trim().is_empty() {
                errors.push(ConfigError::MissingAgentId { name: player.name.clone() });
            }
            if player.spawn_id != 0 {
                *seen_spawn_ids.entry(player.spawn_id).or_default() += 1;
            }
        }

        for script in &self.script_configurations {
            if script.agent_id.trim().is_empty() {
                errors.push(ConfigError::MissingAgentId { name: script.name.clone() });
            }
            if script.spawn_id != 0 {
                *seen_spawn_ids.entry(script.spawn_id).or_default() += 1;
            }
        }

        let mut duplicates: Vec<i32> = seen_spawn_ids
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(id, _)| id)
            .collect();
        duplicates.sort_unstable();
        errors.extend(duplicates.into_iter().map(ConfigError::DuplicateSpawnId));

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Number of configured humans.
    pub fn human_count(&self) -> usize {
        self.player_configurations
            .iter()
            .filter(|p| p.variety.is_human())
            .count()
    }

    /// Player index of every configured car, in configuration order.
    ///
    /// Non-human cars are numbered in order; the human takes the index after
    /// the last non-human car.
    pub fn player_indices(&self) -> Vec<u32> {
        let non_humans = (self.player_configurations.len() - self.human_count()) as u32;
        let mut next = 0;

        self.player_configurations
            .iter()
            .map(|player| {
                if player.variety.is_human() {
                    non_humans
                } else {
                    let index = next;
                    next += 1;
                    index
                }
            })
            .collect()
    }

    /// Cars paired with their player index, sorted by index.
    pub fn indexed_players(&self) -> Vec<(u32, &PlayerConfiguration)> {
        let mut players: Vec<_> = self
            .player_indices()
            .into_iter()
            .zip(self.player_configurations.iter())
            .collect();
        players.sort_by_key(|(index, _)| *index);
        players
    }

    /// Fill derived fields: unique names and spawn ids.
    pub fn normalize(&mut self) {
        let indices = self.player_indices();
        let mut taken: HashSet<String> = self.player_configurations.iter().map(|p| p.name.clone()).collect();
        let mut seen: HashSet<String> = HashSet::new();

        for (player, index) in self.player_configurations.iter_mut().zip(indices) {
            if !seen.insert(player.name.clone()) {
                let mut suffix = 2;
                let mut renamed = format!("{} ({})", player.name, suffix);
                while taken.contains(&renamed) {
                    suffix += 1;
                    renamed = format!("{} ({})", player.name, suffix);
                }
                taken.insert(renamed.clone());
                seen.insert(renamed.clone());
                player.name = renamed;
            }

            if player.spawn_id == 0 && !player.variety.is_human() {
                player.spawn_id = derive_spawn_id(&player.agent_id, player.team, index);
            }
        }

        for (index, script) in self.script_configurations.iter_mut().enumerate() {
            if script.spawn_id == 0 {
                script.spawn_id = derive_spawn_id(&script.agent_id, SCRIPT_TEAM, index as u32);
            }
        }
    }

    /// True when switching from `running` to `self` needs a map reload
    /// under [`ExistingMatchBehavior::RestartIfDifferent`].
    pub fn differs_from(&self, running: &MatchConfiguration) -> bool {
        let roster = |config: &MatchConfiguration| -> Vec<(PlayerClass, u32, String)> {
            config
                .player_configurations
                .iter()
                .map(|p| (p.variety, p.team, p.agent_id.clone()))
                .collect()
        };

        roster(self) != roster(running)
            || self.mutators != running.mutators
            || self.game_map_upk != running.game_map_upk
            || self.game_mode != running.game_mode
    }

    /// Console command that opens the configured map.
    pub fn open_command(&self) -> String {
        let mut tags = vec!["BotsNone"];
        tags.extend(self.mutators.game_tags());
        if self.skip_replays {
            tags.push("NoReplays");
        }

        let mode = if self.freeplay { "Freeplay" } else { "Playtest" };

        format!(
            "open {}?{}?game={}?GameTags={}",
            self.game_map_upk,
            mode,
            self.game_mode.game_class(),
            tags.join(",")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn human(team: u32) -> PlayerConfiguration {
        PlayerConfiguration {
            variety: PlayerClass::Human,
            name: "Human".to_string(),
            team,
            root_dir: String::new(),
            run_command: String::new(),
            loadout: None,
            spawn_id: 0,
            agent_id: String::new(),
            hivemind: false,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(MatchConfiguration::default().validate().is_ok());
    }

    #[test]
    fn test_validation_collects_all_findings() {
        let config = MatchConfiguration {
            game_map_upk: String::new(),
            player_configurations: vec![human(0), human(1), bot("NoId", "", 0), bot("Bad", "x", 5)],
            ..Default::default()
        };

        let errors = config.validate().unwrap_err();
        assert!(errors.contains(&ConfigError::MissingMap));
        assert!(errors.contains(&ConfigError::MultipleHumans(2)));
        assert!(errors.contains(&ConfigError::MissingAgentId { name: "NoId".to_string() }));
        assert!(errors.contains(&ConfigError::InvalidTeam { name: "Bad".to_string(), team: 5 }));
    }

    #[test]
    fn test_duplicate_spawn_ids_rejected() {
        let mut a = bot("A", "a", 0);
        a.spawn_id = 7;
        let mut b = bot("B", "b", 1);
        b.spawn_id = 7;

        let config = MatchConfiguration {
            player_configurations: vec![a, b],
            ..Default::default()
        };
        assert_eq!(config.validate().unwrap_err(), vec![ConfigError::DuplicateSpawnId(7)]);
    }

    #[test]
    fn test_human_gets_highest_index() {
        let config = MatchConfiguration {
            player_configurations: vec![bot("A", "a", 0), human(1), bot("B", "b", 1)],
            ..Default::default()
        };

        assert_eq!(config.player_indices(), vec![0, 2, 1]);

        let indexed: Vec<u32> = config.indexed_players().iter().map(|(i, _)| *i).collect();
        assert_eq!(indexed, vec![0, 1, 2]);
    }

    #[test]
    fn test_normalize_dedupes_names() {
        let mut config = MatchConfiguration {
            player_configurations: vec![bot("Nexto", "n", 0), bot("Nexto", "n", 1), bot("Nexto", "n", 1)],
            ..Default::default()
        };
        config.normalize();

        let names: Vec<&str> = config.player_configurations.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Nexto", "Nexto (2)", "Nexto (3)"]);
    }

    #[test]
    fn test_normalize_skips_names_already_taken() {
        let mut config = MatchConfiguration {
            player_configurations: vec![bot("Nexto", "n", 0), bot("Nexto", "n", 1), bot("Nexto (2)", "m", 1)],
            ..Default::default()
        };
        config.normalize();

        let names: Vec<&str> = config.player_configurations.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Nexto", "Nexto (3)", "Nexto (2)"]);
    }

    #[test]
    fn test_normalize_assigns_spawn_ids() {
        let mut explicit = bot("Kept", "k", 0);
        explicit.spawn_id = 42;

        let mut config = MatchConfiguration {
            player_configurations: vec![explicit, bot("Derived", "d", 1), human(0)],
            script_configurations: vec![ScriptConfiguration {
                name: "Script".to_string(),
                root_dir: String::new(),
                run_command: String::new(),
                spawn_id: 0,
                agent_id: "s".to_string(),
            }],
            ..Default::default()
        };
        config.normalize();

        assert_eq!(config.player_configurations[0].spawn_id, 42);
        assert_eq!(config.player_configurations[1].spawn_id, derive_spawn_id("d", 1, 1));
        assert_eq!(config.player_configurations[2].spawn_id, 0);
        assert_eq!(config.script_configurations[0].spawn_id, derive_spawn_id("s", SCRIPT_TEAM, 0));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let mut config = MatchConfiguration {
            player_configurations: vec![bot("A", "a", 0), bot("B", "b", 1)],
            ..Default::default()
        };
        config.normalize();
        let once = config.clone();
        config.normalize();
        assert_eq!(config, once);
    }

    #[test]
    fn test_differs_from() {
        let base = MatchConfiguration {
            player_configurations: vec![bot("A", "a", 0)],
            ..Default::default()
        };

        let mut renamed = base.clone();
        renamed.player_configurations[0].name = "Other".to_string();
        assert!(!renamed.differs_from(&base));

        let mut new_agent = base.clone();
        new_agent.player_configurations[0].agent_id = "b".to_string();
        assert!(new_agent.differs_from(&base));

        let mut new_map = base.clone();
        new_map.game_map_upk = "UtopiaStadium_P".to_string();
        assert!(new_map.differs_from(&base));

        let mut new_mutators = base.clone();
        new_mutators.mutators.max_score = MaxScore::OneGoal;
        assert!(new_mutators.differs_from(&base));
    }

    #[test]
    fn test_open_command() {
        let config = MatchConfiguration {
            game_map_upk: "Stadium_P".to_string(),
            mutators: MutatorSettings {
                max_score: MaxScore::ThreeGoals,
                respawn_time: RespawnTime::OneSecond,
                ..Default::default()
            },
            ..Default::default()
        };

        assert_eq!(
            config.open_command(),
            "open Stadium_P?Playtest?game=TAGame.GameInfo_Soccar_TA?GameTags=BotsNone,Max3,OneSecondsRespawn"
        );
    }

    #[test]
    fn test_respawn_seconds() {
        assert_eq!(RespawnTime::ThreeSeconds.seconds(), 3.0);
        assert_eq!(RespawnTime::OneSecond.seconds(), 1.0);
    }

    #[test]
    fn test_json_defaults() {
        let json = r#"{
            "game_map_upk": "Mannfield_P",
            "player_configurations": [
                { "variety": "CustomBot", "name": "A", "team": 0, "agent_id": "a" },
                { "variety": { "PsyonixBot": { "skill": "Pro" } }, "name": "P", "team": 1 }
            ]
        }"#;

        let config: MatchConfiguration = serde_json::from_str(json).unwrap();
        assert_eq!(config.player_configurations.len(), 2);
        assert_eq!(
            config.player_configurations[1].variety,
            PlayerClass::PsyonixBot { skill: PsyonixSkill::Pro }
        );
        assert!(config.auto_start_agents);
    }
}
