//! Player Identity Mapping
//!
//! The game names cars by transient actor ids; agents name them by player
//! index, which must stay stable for as long as the car exists. This module
//! keeps the two in step and decides which index a freshly spawned car gets.
//!
//! Index selection is a pure function ([`resolve_spawn`]) over the pending
//! spawn trackers and the current roster, so the conflict policy can be
//! tested without a game connection.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// Actor identifier assigned by the game process.
pub type ActorId = u32;

/// What the server knows about a mapped player.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerMetadata {
    /// Actor currently driving this index.
    pub actor_id: ActorId,
    /// Spawn id from the configuration (0 for unexpected spawns).
    pub spawn_id: i32,
    /// Any kind of bot.
    pub is_bot: bool,
    /// Driven by an agent connection.
    pub is_custom_bot: bool,
}

/// An outstanding spawn command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpawnTracker {
    /// Correlation id sent with the spawn command.
    pub command_id: u32,
    /// Spawn id of the configured player.
    pub spawn_id: i32,
    /// Index the player should get.
    pub desired_index: u32,
    /// Any kind of bot.
    pub is_bot: bool,
    /// Driven by an agent connection.
    pub is_custom_bot: bool,
}

/// Outcome of resolving a car spawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpawnAssignment {
    /// Index given to the car.
    pub index: u32,
    /// Metadata recorded for it.
    pub metadata: PlayerMetadata,
    /// False when no tracker matched (a human joined by themselves, etc).
    pub expected: bool,
}

/// Decide the index for a car spawn.
///
/// * A tracker with `command_id` exists: its desired index is used unless
///   the roster already holds it, in which case the lowest index that is
///   neither in the roster nor desired by another pending tracker is used.
/// * No tracker: the same lowest free index, and the car is treated as a
///   human.
///
/// Returns the assignment and the trackers that remain pending.
pub fn resolve_spawn(
    trackers: &[SpawnTracker],
    roster: &BTreeMap<u32, PlayerMetadata>,
    actor_id: ActorId,
    command_id: Option<u32>,
) -> (SpawnAssignment, Vec<SpawnTracker>) {
    let position = command_id.and_then(|id| trackers.iter().position(|t| t.command_id == id));

    let mut remaining = trackers.to_vec();
    let tracker = position.map(|p| remaining.remove(p));

    let reserved: BTreeSet<u32> = remaining.iter().map(|t| t.desired_index).collect();
    let lowest_free = || {
        (0..)
            .find(|i| !roster.contains_key(i) && !reserved.contains(i))
            .unwrap_or(u32::MAX)
    };

    let assignment = match tracker {
        Some(tracker) => {
            let index = if roster.contains_key(&tracker.desired_index) {
                lowest_free()
            } else {
                tracker.desired_index
            };

            SpawnAssignment {
                index,
                metadata: PlayerMetadata {
                    actor_id,
                    spawn_id: tracker.spawn_id,
                    is_bot: tracker.is_bot,
                    is_custom_bot: tracker.is_custom_bot,
                },
                expected: true,
            }
        }
        None => SpawnAssignment {
            index: lowest_free(),
            metadata: PlayerMetadata {
                actor_id,
                spawn_id: 0,
                is_bot: false,
                is_custom_bot: false,
            },
            expected: false,
        },
    };

    (assignment, remaining)
}

/// Bidirectional actor id / player index map.
#[derive(Clone, Debug, Default)]
pub struct PlayerMapping {
    actor_to_index: HashMap<ActorId, u32>,
    players: BTreeMap<u32, PlayerMetadata>,
    pending: Vec<SpawnTracker>,
}

impl PlayerMapping {
    /// Create an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a spawn command until its car appears.
    pub fn add_pending_spawn(&mut self, tracker: SpawnTracker) {
        self.pending.push(tracker);
    }

    /// Record a car spawn reported by the game.
    ///
    /// A repeated spawn for an actor that is already mapped returns the
    /// existing entry unchanged.
    pub fn apply_car_spawn(&mut self, actor_id: ActorId, command_id: Option<u32>) -> SpawnAssignment {
        if let Some(&index) = self.actor_to_index.get(&actor_id) {
            if let Some(metadata) = self.players.get(&index) {
                return SpawnAssignment {
                    index,
                    metadata: *metadata,
                    expected: true,
                };
            }
        }

        let (assignment, remaining) = resolve_spawn(&self.pending, &self.players, actor_id, command_id);
        self.pending = remaining;
        self.actor_to_index.insert(actor_id, assignment.index);
        self.players.insert(assignment.index, assignment.metadata);
        assignment
    }

    /// Forget an actor. Returns its index and metadata if it was mapped.
    pub fn remove_actor(&mut self, actor_id: ActorId) -> Option<(u32, PlayerMetadata)> {
        let index = self.actor_to_index.remove(&actor_id)?;
        let metadata = self.players.remove(&index)?;
        Some((index, metadata))
    }

    /// Index driven by an actor.
    pub fn index_from_actor(&self, actor_id: ActorId) -> Option<u32> {
        self.actor_to_index.get(&actor_id).copied()
    }

    /// Actor driving an index.
    pub fn actor_from_index(&self, index: u32) -> Option<ActorId> {
        self.players.get(&index).map(|p| p.actor_id)
    }

    /// Metadata of an index.
    pub fn get(&self, index: u32) -> Option<&PlayerMetadata> {
        self.players.get(&index)
    }

    /// Index of the live car spawned with `spawn_id`.
    pub fn index_for_spawn_id(&self, spawn_id: i32) -> Option<u32> {
        self.players
            .iter()
            .find(|(_, p)| p.spawn_id == spawn_id && spawn_id != 0)
            .map(|(index, _)| *index)
    }

    /// A spawn with this id was requested and has not appeared yet.
    pub fn is_spawn_pending(&self, spawn_id: i32) -> bool {
        self.pending.iter().any(|t| t.spawn_id == spawn_id)
    }

    /// Outstanding spawn commands.
    pub fn pending_spawns(&self) -> &[SpawnTracker] {
        &self.pending
    }

    /// Every mapped player, ordered by index.
    pub fn players(&self) -> impl Iterator<Item = (u32, &PlayerMetadata)> {
        self.players.iter().map(|(index, p)| (*index, p))
    }

    /// Number of mapped players.
    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// No mapped players.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Drop everything (map reload).
    pub fn clear(&mut self) {
        self.actor_to_index.clear();
        self.players.clear();
        self.pending.clear();
    }
}
