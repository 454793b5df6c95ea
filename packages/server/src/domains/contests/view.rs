//! The contest snapshot sent to agents.
//!
//! Players receive a view where every other player's private fields (score,
//! inventory, endpoint) are removed. Judges, the announcer and the arena agent
//! receive the full view.

use serde_json::{json, Value};

use super::models::{Arena, Contest, ContestRound, Feature, Participant, PlayerState};
use super::store::ContestStore;
use super::ContestResult;
use crate::common::ParticipantId;

const PRIVATE_PLAYER_FIELDS: &[&str] = &["score", "inventory"];

#[derive(Debug, Clone)]
pub struct ContestView {
    pub contest: Contest,
    pub arena: Option<Arena>,
    pub round: ContestRound,
    pub participants: Vec<Participant>,
    pub states: Vec<PlayerState>,
    pub features: Vec<Feature>,
}

impl ContestView {
    /// Snapshot `round` of `contest` from the store.
    pub async fn load(
        store: &dyn ContestStore,
        contest: &Contest,
        round: &ContestRound,
    ) -> ContestResult<Self> {
        Ok(Self {
            contest: contest.clone(),
            arena: store.find_arena(contest.arena_id).await?,
            round: round.clone(),
            participants: store.participants(contest.id).await?,
            states: store.player_states(round.id).await?,
            features: store.features(round.id).await?,
        })
    }

    /// Render the view, redacted for `viewer` when one is given.
    pub fn render(&self, viewer: Option<ParticipantId>) -> Value {
        let participants: Vec<Value> = self
            .participants
            .iter()
            .map(|p| {
                let mut entry = json!({
                    "id": p.id,
                    "name": p.name,
                    "role": p.role,
                    "endpoint": p.endpoint,
                });
                if viewer.is_some_and(|v| v != p.id) {
                    remove_keys(&mut entry, &["endpoint"]);
                }
                entry
            })
            .collect();

        let players: Vec<Value> = self
            .states
            .iter()
            .map(|state| {
                let name = self
                    .participants
                    .iter()
                    .find(|p| p.id == state.participant_id)
                    .map(|p| p.name.as_str())
                    .unwrap_or_default();
                let mut entry = json!({
                    "id": state.id,
                    "participantId": state.participant_id,
                    "name": name,
                    "position": state.position,
                    "health": state.health,
                    "score": state.score,
                    "inventory": state.inventory,
                });
                if viewer.is_some_and(|v| v != state.participant_id) {
                    remove_keys(&mut entry, PRIVATE_PLAYER_FIELDS);
                }
                entry
            })
            .collect();

        let arena = self.arena.as_ref().map(|a| {
            json!({
                "id": a.id,
                "name": a.name,
                "description": a.description,
                "width": a.width,
                "height": a.height,
            })
        });

        json!({
            "contest": {
                "id": self.contest.id,
                "name": self.contest.name,
                "state": self.contest.state,
                "currentRound": self.contest.current_round,
            },
            "arena": arena,
            "round": {
                "id": self.round.id,
                "roundNo": self.round.round_no,
                "narrative": self.round.narrative,
                "endingNarrative": self.round.ending_narrative,
                "state": self.round.state,
            },
            "participants": participants,
            "players": players,
            "features": self.features,
        })
    }
}

fn remove_keys(value: &mut Value, keys: &[&str]) {
    if let Value::Object(map) = value {
        for key in keys {
            map.remove(*key);
        }
    }
}
