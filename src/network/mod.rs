//! Network Layer
//!
//! Sockets, wire protocols and the actors that own them. Nothing here keeps
//! match state of its own; the bridge owns [`crate::game::GameState`] and the
//! server owns the agent reservation.

pub mod protocol;
pub mod game_protocol;
pub mod bridge;
pub mod session;
pub mod server;

pub use protocol::{ClientMessage, ServerMessage, ConnectionSettings, ControllableTeamInfo};
pub use game_protocol::{GameCommand, GameInbound, GameOutbound, OutgoingCommands};
pub use bridge::{Bridge, BridgeCommand, BridgeConfig, BridgeError};
pub use session::{Session, SessionCommand, SessionError, SessionState};
pub use server::{AgentServer, MatchSource, ServerCommand, ServerConfig, ServerError, ServerHandle, Services};
