//! External Collaborators
//!
//! Interfaces the server consumes but does not own: starting processes,
//! predicting the ball, and loading match configurations from disk. Each
//! comes with a default implementation good enough to run the server.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::math::Physics;
use crate::game::config::{GameMode, Launcher, MatchConfiguration, PlayerConfiguration, ScriptConfiguration};

// =============================================================================
// PROCESS LAUNCHER
// =============================================================================

/// Failure to start a process.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// Nothing to run.
    #[error("no command configured for '{0}'")]
    NoCommand(String),

    /// Spawning the process failed.
    #[error("failed to start '{name}': {source}")]
    Spawn {
        /// What was being started.
        name: String,
        /// OS error.
        #[source]
        source: std::io::Error,
    },
}

/// Starts the game and agent processes.
pub trait ProcessLauncher: Send + Sync {
    /// Start the game with the configured launcher.
    fn launch_game(&mut self, config: &MatchConfiguration) -> Result<(), LaunchError>;

    /// Start a bot process.
    fn launch_bot(&mut self, player: &PlayerConfiguration) -> Result<(), LaunchError>;

    /// Start a script process.
    fn launch_script(&mut self, script: &ScriptConfiguration) -> Result<(), LaunchError>;

    /// The game is up (started by us or by hand).
    fn is_game_running(&self) -> bool;
}

/// Launcher backed by `std::process::Command`.
///
/// Commands are split on whitespace; there is no shell involved.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    game_port: u16,
    game_started: bool,
    assume_running: bool,
}

impl CommandLauncher {
    /// Launcher that points the game at `game_port`.
    pub fn new(game_port: u16) -> Self {
        Self {
            game_port,
            game_started: false,
            assume_running: false,
        }
    }

    /// Build the game command line for a launcher choice.
    pub fn game_command(&self, config: &MatchConfiguration) -> Option<Vec<String>> {
        let bridge_arg = format!("-AgentBridgePort={}", self.game_port);
        match config.launcher {
            Launcher::Steam => Some(vec![
                "steam".to_string(),
                "-applaunch".to_string(),
                "252950".to_string(),
                bridge_arg,
            ]),
            Launcher::Epic => Some(vec![
                "xdg-open".to_string(),
                format!("com.epicgames.launcher://apps/Sugar?action=launch&silent=true&args={}", bridge_arg),
            ]),
            Launcher::Custom => {
                let mut parts: Vec<String> = config.launcher_arg.split_whitespace().map(str::to_string).collect();
                if parts.is_empty() {
                    return None;
                }
                parts.push(bridge_arg);
                Some(parts)
            }
            Launcher::NoLaunch => None,
        }
    }

    fn spawn(name: &str, parts: &[String], dir: Option<&Path>) -> Result<(), LaunchError> {
        let (program, args) = parts.split_first().ok_or_else(|| LaunchError::NoCommand(name.to_string()))?;

        let mut command = Command::new(program);
        command.args(args);
        if let Some(dir) = dir.filter(|d| !d.as_os_str().is_empty()) {
            command.current_dir(dir);
        }

        command.spawn().map_err(|source| LaunchError::Spawn {
            name: name.to_string(),
            source,
        })?;
        info!(name, program = %program, "process started");
        Ok(())
    }

    fn split(command: &str) -> Vec<String> {
        command.split_whitespace().map(str::to_string).collect()
    }
}

impl ProcessLauncher for CommandLauncher {
    fn launch_game(&mut self, config: &MatchConfiguration) -> Result<(), LaunchError> {
        match self.game_command(config) {
            Some(parts) => {
                Self::spawn("game", &parts, None)?;
                self.game_started = true;
            }
            None => {
                warn!(launcher = ?config.launcher, "not launching the game, waiting for it to connect");
                self.assume_running = true;
            }
        }
        Ok(())
    }

    fn launch_bot(&mut self, player: &PlayerConfiguration) -> Result<(), LaunchError> {
        let dir = PathBuf::from(&player.root_dir);
        Self::spawn(&player.name, &Self::split(&player.run_command), Some(&dir))
    }

    fn launch_script(&mut self, script: &ScriptConfiguration) -> Result<(), LaunchError> {
        let dir = PathBuf::from(&script.root_dir);
        Self::spawn(&script.name, &Self::split(&script.run_command), Some(&dir))
    }

    fn is_game_running(&self) -> bool {
        self.game_started || self.assume_running
    }
}

// =============================================================================
// BALL PREDICTION
// =============================================================================

/// Ball state at a future time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionSlice {
    /// Game seconds at which this state holds.
    pub game_seconds: f32,
    /// Predicted physics.
    pub physics: Physics,
}

/// A sequence of future ball states.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BallPrediction {
    /// Slices in time order.
    pub slices: Vec<PredictionSlice>,
}

/// Predicts the ball's trajectory.
pub trait BallPredictor: Send + Sync {
    /// Configure for a game mode.
    fn set_mode(&mut self, mode: GameMode);

    /// Predict forward from the current ball state.
    fn step(&mut self, ball: &Physics, game_seconds: f32) -> BallPrediction;
}

/// Gravity and a bouncy floor, nothing else.
#[derive(Debug, Clone)]
pub struct BallisticPredictor {
    mode: GameMode,
    gravity_z: f32,
    horizon_seconds: f32,
    slices_per_second: u32,
}

const BALL_RADIUS: f32 = 92.75;
const PUCK_HEIGHT: f32 = 30.0;
const FLOOR_RESTITUTION: f32 = 0.6;

impl Default for BallisticPredictor {
    fn default() -> Self {
        Self {
            mode: GameMode::Soccer,
            gravity_z: -650.0,
            horizon_seconds: 6.0,
            slices_per_second: 120,
        }
    }
}

impl BallisticPredictor {
    /// Predictor with the given gravity.
    pub fn with_gravity(gravity_z: f32) -> Self {
        Self {
            gravity_z,
            ..Self::default()
        }
    }

    fn rest_height(&self) -> f32 {
        match self.mode {
            GameMode::Hockey => PUCK_HEIGHT,
            _ => BALL_RADIUS,
        }
    }
}

impl BallPredictor for BallisticPredictor {
    fn set_mode(&mut self, mode: GameMode) {
        self.mode = mode;
    }

    fn step(&mut self, ball: &Physics, game_seconds: f32) -> BallPrediction {
        let dt = 1.0 / self.slices_per_second as f32;
        let count = (self.horizon_seconds * self.slices_per_second as f32) as usize;
        let floor = self.rest_height();

        let mut physics = *ball;
        let mut slices = Vec::with_capacity(count);

        for i in 1..=count {
            physics.velocity.z += self.gravity_z * dt;
            physics.location = physics.location.add(physics.velocity.scale(dt));

            if physics.location.z < floor {
                physics.location.z = floor;
                physics.velocity.z = -physics.velocity.z * FLOOR_RESTITUTION;
            }

            slices.push(PredictionSlice {
                game_seconds: game_seconds + i as f32 * dt,
                physics,
            });
        }

        BallPrediction { slices }
    }
}

// =============================================================================
// CONFIGURATION PROVIDER
// =============================================================================

/// Failure to load a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    /// File could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// File.
        path: PathBuf,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// File is not a valid configuration.
    #[error("cannot parse {path}: {source}")]
    Parse {
        /// File.
        path: PathBuf,
        /// Parser error.
        #[source]
        source: serde_json::Error,
    },
}

/// Source of match configurations.
pub trait MatchConfigProvider: Send + Sync {
    /// Load the configuration at `path`.
    fn load(&self, path: &Path) -> Result<MatchConfiguration, ConfigLoadError>;
}

/// Reads match configurations from JSON files.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConfigProvider;

impl JsonConfigProvider {
    /// Parse a configuration from a JSON string.
    pub fn parse(path: &Path, text: &str) -> Result<MatchConfiguration, ConfigLoadError> {
        serde_json::from_str(text).map_err(|source| ConfigLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl MatchConfigProvider for JsonConfigProvider {
    fn load(&self, path: &Path) -> Result<MatchConfiguration, ConfigLoadError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::math::Vector3;

    #[test]
    fn test_prediction_covers_horizon() {
        let mut predictor = BallisticPredictor::default();
        let ball = Physics {
            location: Vector3::new(0.0, 0.0, 500.0),
            ..Physics::default()
        };

        let prediction = predictor.step(&ball, 10.0);
        assert_eq!(prediction.slices.len(), 720);
        assert!((prediction.slices[0].game_seconds - (10.0 + 1.0 / 120.0)).abs() < 1e-4);
        assert!(prediction.slices[0].physics.location.z < 500.0);
    }

    #[test]
    fn test_prediction_never_sinks_below_floor() {
        let mut predictor = BallisticPredictor::default();
        let ball = Physics {
            location: Vector3::new(0.0, 0.0, 1000.0),
            velocity: Vector3::new(500.0, 0.0, -1500.0),
            ..Physics::default()
        };

        let prediction = predictor.step(&ball, 0.0);
        assert!(prediction.slices.iter().all(|s| s.physics.location.z >= BALL_RADIUS));
    }

    #[test]
    fn test_hockey_rests_lower() {
        let mut predictor = BallisticPredictor::default();
        predictor.set_mode(GameMode::Hockey);
        let prediction = predictor.step(&Physics::default(), 0.0);
        assert_eq!(prediction.slices[0].physics.location.z, PUCK_HEIGHT);
    }

    #[test]
    fn test_custom_launcher_command() {
        let launcher = CommandLauncher::new(23233);
        let config = MatchConfiguration {
            launcher: Launcher::Custom,
            launcher_arg: "/opt/game/run --windowed".to_string(),
            ..MatchConfiguration::default()
        };

        let parts = launcher.game_command(&config).unwrap();
        assert_eq!(parts[0], "/opt/game/run");
        assert_eq!(parts.last().map(String::as_str), Some("-AgentBridgePort=23233"));
    }

    #[test]
    fn test_no_launch_assumes_running() {
        let mut launcher = CommandLauncher::new(23233);
        let config = MatchConfiguration {
            launcher: Launcher::NoLaunch,
            ..MatchConfiguration::default()
        };

        assert!(!launcher.is_game_running());
        launcher.launch_game(&config).unwrap();
        assert!(launcher.is_game_running());
    }

    #[test]
    fn test_empty_run_command() {
        let mut launcher = CommandLauncher::new(23233);
        let script = ScriptConfiguration {
            name: "s".to_string(),
            root_dir: String::new(),
            run_command: "  ".to_string(),
            spawn_id: 0,
            agent_id: "s".to_string(),
        };
        assert!(matches!(launcher.launch_script(&script), Err(LaunchError::NoCommand(_))));
    }

    #[test]
    fn test_json_provider_parse() {
        let config = JsonConfigProvider::parse(
            Path::new("match.json"),
            r#"{ "game_map_upk": "Mannfield", "instant_start": true }"#,
        )
        .unwrap();
        assert_eq!(config.game_map_upk, "Mannfield");
        assert!(config.instant_start);

        assert!(matches!(
            JsonConfigProvider::parse(Path::new("bad.json"), "{"),
            Err(ConfigLoadError::Parse { .. })
        ));
    }

    #[test]
    fn test_json_provider_missing_file() {
        let result = JsonConfigProvider.load(Path::new("/nonexistent/agent-bridge/match.json"));
        assert!(matches!(result, Err(ConfigLoadError::Io { .. })));
    }
}
