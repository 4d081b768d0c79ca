//! # Agent Bridge Server
//!
//! Control plane between agent processes (bots and scripts) and a running
//! car-soccer game. Agents observe the match and drive cars; the server keeps
//! every agent's view in sync and runs the match lifecycle.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    AGENT BRIDGE SERVER                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/             - Primitives                              │
//! │  ├── math.rs       - Vectors, rotators, physics              │
//! │  ├── hash.rs       - Spawn-id derivation                     │
//! │  └── framing.rs    - Length-prefixed frame codec             │
//! │                                                              │
//! │  game/             - Match model (no sockets)                │
//! │  ├── config.rs     - Match configuration                     │
//! │  ├── mapping.rs    - Actor id <-> player index               │
//! │  ├── update.rs     - Game update events                      │
//! │  ├── state.rs      - Game-state reducer                      │
//! │  ├── reservation.rs- Agent claims                            │
//! │  └── external.rs   - Launcher, predictor, config provider    │
//! │                                                              │
//! │  lifecycle/                                                  │
//! │  └── match_starter.rs - Map load / spawn state machine       │
//! │                                                              │
//! │  network/          - Actors and wire protocols               │
//! │  ├── protocol.rs   - Agent messages                          │
//! │  ├── game_protocol.rs - Game messages                        │
//! │  ├── bridge.rs     - Game connection                         │
//! │  ├── session.rs    - One agent connection                    │
//! │  └── server.rs     - Accept loop and orchestrator            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! Every stateful component is a task that owns its state and drains an
//! unbounded mailbox:
//!
//! ```text
//!   Session ──► Server ──► Bridge ──► game
//!      ▲          │          │
//!      └──────────┴──◄───────┘  (ticks, field info, lifecycle events)
//! ```
//!
//! The session registry shared by the accept loop and the orchestrator is the
//! only lock. Closing a mailbox is the shutdown signal.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod lifecycle;
pub mod network;

// Re-export commonly used types
pub use crate::core::framing::{FrameError, FrameReader};
pub use crate::game::config::MatchConfiguration;
pub use crate::game::state::{GamePacket, GameState};
pub use crate::lifecycle::match_starter::MatchStarter;
pub use crate::network::server::{AgentServer, ServerConfig, ServerHandle, Services};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
