//! Game Model Module
//!
//! Everything the server knows about the match, with no sockets involved.
//!
//! ## Module Structure
//!
//! - `config`: Match configuration, validation, normalization
//! - `mapping`: Actor id / player index identity map
//! - `update`: Update events streamed by the game
//! - `state`: Game-state reducer and the per-tick packet
//! - `reservation`: Which connection owns which configured agent
//! - `external`: Process launcher, ball predictor, configuration provider

pub mod config;
pub mod mapping;
pub mod update;
pub mod state;
pub mod reservation;
pub mod external;

// Re-export key types
pub use config::{MatchConfiguration, PlayerClass, PlayerConfiguration, ScriptConfiguration};
pub use mapping::{ActorId, PlayerMapping, SpawnTracker};
pub use update::{GameUpdate, UpdateBatch};
pub use state::{FieldInfo, GamePacket, GameState, MatchPhase};
pub use reservation::{AgentReservation, ClientId};
