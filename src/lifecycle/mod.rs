//! Match Lifecycle Module
//!
//! Drives a match from configuration to running game: map loading, waiting
//! for agents, spawning cars and ending the match.

pub mod match_starter;

pub use match_starter::{MatchStarter, StartError, StarterEvent, StarterStage};
