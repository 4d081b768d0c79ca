//! Agent Reservation
//!
//! Maps configured bots and scripts to the connection that claims them.
//! Only the orchestrator's message loop mutates the roster, so a claim is
//! a plain check-and-set with no locking.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::game::config::{MatchConfiguration, SCRIPT_TEAM};

/// Server-side connection identifier.
pub type ClientId = u32;

/// `(player index, spawn id)` pair handed to a claiming client.
pub type IndexClaim = (u32, i32);

/// What a roster entry drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentKind {
    /// A car.
    Bot,
    /// A script; `index` is its position in the script list.
    Script,
}

/// One claimable roster entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentMetadata {
    /// Player index (bots) or script index (scripts).
    pub index: u32,
    /// Team; [`SCRIPT_TEAM`] for scripts.
    pub team: u32,
    /// Display name.
    pub name: String,
    /// Agent identifier.
    pub agent_id: String,
    /// Spawn id.
    pub spawn_id: i32,
    /// Claiming client, if any.
    pub client_id: Option<ClientId>,
    /// Claiming client finished initializing.
    pub ready: bool,
    /// Claimed together with same agent/team entries.
    pub hivemind: bool,
    /// Bot or script.
    pub kind: AgentKind,
}

/// Roster of claimable agents.
#[derive(Clone, Debug, Default)]
pub struct AgentReservation {
    agents: Vec<AgentMetadata>,
}

impl AgentReservation {
    /// Empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the roster from a (normalized) configuration, dropping every
    /// previous claim.
    pub fn set_agents(&mut self, config: &MatchConfiguration) {
        self.agents.clear();

        for (index, player) in config.indexed_players() {
            if !player.variety.is_custom_bot() {
                continue;
            }
            self.agents.push(AgentMetadata {
                index,
                team: player.team,
                name: player.name.clone(),
                agent_id: player.agent_id.clone(),
                spawn_id: player.spawn_id,
                client_id: None,
                ready: false,
                hivemind: player.hivemind,
                kind: AgentKind::Bot,
            });
        }

        for (index, script) in config.script_configurations.iter().enumerate() {
            self.agents.push(AgentMetadata {
                index: index as u32,
                team: SCRIPT_TEAM,
                name: script.name.clone(),
                agent_id: script.agent_id.clone(),
                spawn_id: script.spawn_id,
                client_id: None,
                ready: false,
                hivemind: false,
                kind: AgentKind::Script,
            });
        }

        debug!(agents = self.agents.len(), "roster rebuilt");
    }

    /// Claim the first unclaimed entry with `agent_id`.
    pub fn reserve_agent(&mut self, client_id: ClientId, agent_id: &str) -> Option<(IndexClaim, u32)> {
        let agent = self
            .agents
            .iter_mut()
            .find(|a| a.client_id.is_none() && a.agent_id == agent_id)?;

        agent.client_id = Some(client_id);
        Some(((agent.index, agent.spawn_id), agent.team))
    }

    /// Claim the first unclaimed entry with `agent_id` plus every other
    /// unclaimed entry sharing its agent id and team.
    pub fn reserve_agents(&mut self, client_id: ClientId, agent_id: &str) -> Option<(Vec<IndexClaim>, u32)> {
        let (first, team) = self.reserve_agent(client_id, agent_id)?;
        let mut claims = vec![first];

        for agent in self
            .agents
            .iter_mut()
            .filter(|a| a.client_id.is_none() && a.agent_id == agent_id && a.team == team)
        {
            agent.client_id = Some(client_id);
            claims.push((agent.index, agent.spawn_id));
        }

        Some((claims, team))
    }

    /// Release everything `client_id` holds. Returns the released entries'
    /// indices.
    pub fn unreserve(&mut self, client_id: ClientId) -> Vec<u32> {
        let mut released = Vec::new();
        for agent in self.agents.iter_mut().filter(|a| a.client_id == Some(client_id)) {
            agent.client_id = None;
            agent.ready = false;
            released.push(agent.index);
        }
        released
    }

    /// Mark every entry held by `client_id` ready. Returns how many changed.
    pub fn mark_ready(&mut self, client_id: ClientId) -> usize {
        let mut changed = 0;
        for agent in self
            .agents
            .iter_mut()
            .filter(|a| a.client_id == Some(client_id) && !a.ready)
        {
            agent.ready = true;
            changed += 1;
        }
        changed
    }

    /// Every entry is claimed and ready.
    pub fn all_ready(&self) -> bool {
        self.agents.iter().all(|a| a.ready)
    }

    /// `(ready, total)` entries.
    pub fn ready_status(&self) -> (usize, usize) {
        (self.agents.iter().filter(|a| a.ready).count(), self.agents.len())
    }

    /// Any entry with `agent_id` is part of a hivemind.
    pub fn is_hivemind(&self, agent_id: &str) -> bool {
        self.agents.iter().any(|a| a.hivemind && a.agent_id == agent_id)
    }

    /// Connections the roster expects: one per plain bot, one per hivemind
    /// (agent id, team) group, one per script.
    pub fn expected_connections(&self) -> usize {
        let mut groups = BTreeSet::new();
        self.agents
            .iter()
            .filter(|a| !a.hivemind || groups.insert((a.agent_id.as_str(), a.team)))
            .count()
    }

    /// Roster entries.
    pub fn agents(&self) -> &[AgentMetadata] {
        &self.agents
    }

    /// Entries held by a client.
    pub fn claimed_by(&self, client_id: ClientId) -> impl Iterator<Item = &AgentMetadata> {
        self.agents.iter().filter(move |a| a.client_id == Some(client_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::config::{PlayerClass, PlayerConfiguration, ScriptConfiguration};

    fn bot(name: &str, agent_id: &str, team: u32, hivemind: bool) -> PlayerConfiguration {
        PlayerConfiguration {
            variety: PlayerClass::CustomBot,
            name: name.to_string(),
            team,
            root_dir: String::new(),
            run_command: String::new(),
            loadout: None,
            spawn_id: 0,
            agent_id: agent_id.to_string(),
            hivemind,
        }
    }

    fn human(team: u32) -> PlayerConfiguration {
        PlayerConfiguration {
            variety: PlayerClass::Human,
            agent_id: String::new(),
            ..bot("Human", "", team, false)
        }
    }

    fn roster(players: Vec<PlayerConfiguration>) -> AgentReservation {
        let mut config = MatchConfiguration {
            player_configurations: players,
            ..MatchConfiguration::default()
        };
        config.normalize();

        let mut reservation = AgentReservation::new();
        reservation.set_agents(&config);
        reservation
    }

    #[test]
    fn test_reserve_single_agent() {
        let mut reservation = roster(vec![bot("A", "A", 0, false), human(1)]);
        let spawn_id = reservation.agents()[0].spawn_id;

        assert_eq!(reservation.reserve_agent(5, "A"), Some(((0, spawn_id), 0)));
        assert_eq!(reservation.reserve_agent(6, "A"), None);
    }

    #[test]
    fn test_humans_are_not_claimable() {
        let reservation = roster(vec![human(0), bot("B", "B", 1, false)]);
        assert_eq!(reservation.agents().len(), 1);
        assert_eq!(reservation.agents()[0].index, 0);
    }

    #[test]
    fn test_reserve_unknown_agent() {
        let mut reservation = roster(vec![bot("A", "A", 0, false)]);
        assert!(reservation.reserve_agent(1, "nope").is_none());
        assert!(reservation.claimed_by(1).next().is_none());
    }

    #[test]
    fn test_duplicate_agents_claimed_one_at_a_time() {
        let mut reservation = roster(vec![bot("A", "A", 0, false), bot("A", "A", 0, false)]);
        assert_eq!(reservation.reserve_agent(1, "A").map(|(c, _)| c.0), Some(0));
        assert_eq!(reservation.reserve_agent(2, "A").map(|(c, _)| c.0), Some(1));
        assert!(reservation.reserve_agent(3, "A").is_none());
    }

    #[test]
    fn test_hivemind_claims_same_team_only() {
        let mut reservation = roster(vec![
            bot("H", "hive", 0, true),
            bot("H", "hive", 1, true),
            bot("H", "hive", 0, true),
        ]);
        assert!(reservation.is_hivemind("hive"));

        let (claims, team) = reservation.reserve_agents(1, "hive").unwrap();
        assert_eq!(team, 0);
        assert_eq!(claims.iter().map(|c| c.0).collect::<Vec<_>>(), vec![0, 2]);

        let (claims, team) = reservation.reserve_agents(2, "hive").unwrap();
        assert_eq!(team, 1);
        assert_eq!(claims.len(), 1);

        assert!(reservation.reserve_agents(3, "hive").is_none());
    }

    #[test]
    fn test_unreserve_releases_and_resets_ready() {
        let mut reservation = roster(vec![bot("A", "A", 0, false)]);
        reservation.reserve_agent(1, "A");
        assert_eq!(reservation.mark_ready(1), 1);
        assert!(reservation.all_ready());

        assert_eq!(reservation.unreserve(1), vec![0]);
        assert!(!reservation.all_ready());
        assert_eq!(reservation.ready_status(), (0, 1));
        assert!(reservation.reserve_agent(2, "A").is_some());
    }

    #[test]
    fn test_set_agents_replaces_claims() {
        let config = MatchConfiguration {
            player_configurations: vec![bot("A", "A", 0, false)],
            ..MatchConfiguration::default()
        };
        let mut reservation = AgentReservation::new();
        reservation.set_agents(&config);
        reservation.reserve_agent(1, "A");

        reservation.set_agents(&config);
        assert!(reservation.claimed_by(1).next().is_none());
        assert!(reservation.reserve_agent(2, "A").is_some());
    }

    #[test]
    fn test_scripts_use_script_team() {
        let mut config = MatchConfiguration {
            script_configurations: vec![ScriptConfiguration {
                name: "S".to_string(),
                root_dir: String::new(),
                run_command: String::new(),
                spawn_id: 0,
                agent_id: "script".to_string(),
            }],
            ..MatchConfiguration::default()
        };
        config.normalize();

        let mut reservation = AgentReservation::new();
        reservation.set_agents(&config);

        let ((index, spawn_id), team) = reservation.reserve_agent(9, "script").unwrap();
        assert_eq!((index, team), (0, SCRIPT_TEAM));
        assert_ne!(spawn_id, 0);
        assert_eq!(reservation.agents()[0].kind, AgentKind::Script);
    }

    #[test]
    fn test_expected_connections() {
        let reservation = roster(vec![
            bot("A", "A", 0, false),
            bot("A", "A", 0, false),
            bot("H", "hive", 1, true),
            bot("H", "hive", 1, true),
            bot("H", "hive", 0, true),
            human(1),
        ]);
        assert_eq!(reservation.expected_connections(), 4);
    }
}
