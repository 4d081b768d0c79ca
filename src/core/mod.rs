//! Core primitives.
//!
//! Game-space math, stable identifier hashing and the length-prefixed
//! frame codec shared by both TCP protocols.

pub mod math;
pub mod hash;
pub mod framing;

// Re-export core types
pub use math::{Vector3, Rotator, Physics, BoxShape, CollisionShape};
pub use hash::derive_spawn_id;
pub use framing::{FrameError, FrameReader, WireMessage};
