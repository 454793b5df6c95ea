//! Setup machine: builds round 0 of a contest.
//!
//! ```text
//! idle ─► creating_round ─► adding_fixed_features ─► generating_features
//!   │                            ▲                          │
//!   └── round 0 exists ──────────┘                          ▼
//!                                   setup_complete ◄─ describing_setup
//!
//! any step error ─► setup_fail
//! ```
//!
//! The state is stored on round 0 after every transition, so a restarted
//! machine picks up at the step it was in. The terminal state is announced on
//! `arena.contest.<id>.setup.done`.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::{announce, first_with_role, notify_entity, persist_phase};
use crate::common::RoundId;
use crate::domains::contests::models::{
    with_role, Arena, Contest, ContestRound, Feature, FeatureOrigin, ParticipantRole,
    PlayerState, Position, RoundPhase, DEFAULT_POSITION,
};
use crate::domains::contests::view::ContestView;
use crate::domains::contests::{ContestError, ContestResult};
use crate::kernel::topics::{self, EntityAction};
use crate::kernel::{ArenaDeps, PromptType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupState {
    Idle,
    CreatingRound,
    AddingFixedFeatures,
    GeneratingFeatures,
    DescribingSetup,
    SetupComplete,
    SetupFail,
}

impl SetupState {
    pub fn phase(&self) -> RoundPhase {
        match self {
            SetupState::Idle => RoundPhase::Idle,
            SetupState::CreatingRound => RoundPhase::CreatingRound,
            SetupState::AddingFixedFeatures => RoundPhase::AddingFixedFeatures,
            SetupState::GeneratingFeatures => RoundPhase::GeneratingFeatures,
            SetupState::DescribingSetup => RoundPhase::DescribingSetup,
            SetupState::SetupComplete => RoundPhase::SetupComplete,
            SetupState::SetupFail => RoundPhase::SetupFail,
        }
    }

    /// The setup state stored as `phase`, or `None` for round phases.
    pub fn from_phase(phase: RoundPhase) -> Option<Self> {
        match phase {
            RoundPhase::Idle => Some(SetupState::Idle),
            RoundPhase::CreatingRound => Some(SetupState::CreatingRound),
            RoundPhase::AddingFixedFeatures => Some(SetupState::AddingFixedFeatures),
            RoundPhase::GeneratingFeatures => Some(SetupState::GeneratingFeatures),
            RoundPhase::DescribingSetup => Some(SetupState::DescribingSetup),
            RoundPhase::SetupComplete => Some(SetupState::SetupComplete),
            RoundPhase::SetupFail => Some(SetupState::SetupFail),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SetupState::SetupComplete | SetupState::SetupFail)
    }
}

impl std::fmt::Display for SetupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.phase().as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetupEvent {
    Start { round_exists: bool },
    Done,
    Failed,
}

fn transition(state: SetupState, event: SetupEvent) -> Option<SetupState> {
    use SetupEvent::*;
    use SetupState::*;

    match (state, event) {
        (Idle, Start { round_exists: true }) => Some(AddingFixedFeatures),
        (Idle, Start { round_exists: false }) => Some(CreatingRound),
        (CreatingRound, Done) => Some(AddingFixedFeatures),
        (AddingFixedFeatures, Done) => Some(GeneratingFeatures),
        (GeneratingFeatures, Done) => Some(DescribingSetup),
        (DescribingSetup, Done) => Some(SetupComplete),
        (s, Failed) if !s.is_terminal() => Some(SetupFail),
        _ => None,
    }
}

pub struct SetupMachine {
    deps: Arc<ArenaDeps>,
    contest: Contest,
    state: SetupState,
    round: Option<ContestRound>,
}

impl SetupMachine {
    pub fn new(deps: Arc<ArenaDeps>, contest: Contest) -> Self {
        Self {
            deps,
            contest,
            state: SetupState::Idle,
            round: None,
        }
    }

    pub fn state(&self) -> SetupState {
        self.state
    }

    /// Drive setup to a terminal state and announce it.
    pub async fn run(mut self) -> SetupState {
        let span = info_span!("setup", contest_id = %self.contest.id);
        async move {
            self.resume().await;

            while !self.state.is_terminal() {
                let event = match self.state {
                    SetupState::Idle => SetupEvent::Start {
                        round_exists: self.round.is_some(),
                    },
                    state => match self.step(state).await {
                        Ok(()) => SetupEvent::Done,
                        Err(e) => {
                            error!(state = %state, error = %e, "setup step failed");
                            SetupEvent::Failed
                        }
                    },
                };
                self.fire(event).await;
            }

            info!(state = %self.state, "setup finished");
            announce(&self.deps, topics::setup_done(self.contest.id), self.state.phase().as_str())
                .await;
            self.state
        }
        .instrument(span)
        .await
    }

    /// Load round 0 and continue from the step stored on it.
    async fn resume(&mut self) {
        match self.deps.contests.find_round(self.contest.id, 0).await {
            Ok(Some(round)) => {
                self.state = match SetupState::from_phase(round.state) {
                    // Round creation is already committed.
                    Some(SetupState::CreatingRound) | Some(SetupState::Idle) => SetupState::Idle,
                    Some(state) => state,
                    // Round 0 has been played, so setup finished long ago.
                    None => SetupState::SetupComplete,
                };
                if self.state != SetupState::Idle {
                    info!(state = %self.state, "resuming setup");
                }
                self.round = Some(round);
            }
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "failed to load round 0");
                self.fire(SetupEvent::Failed).await;
            }
        }
    }

    async fn fire(&mut self, event: SetupEvent) {
        let next = transition(self.state, event).unwrap_or_else(|| {
            warn!(state = %self.state, event = ?event, "invalid setup transition");
            SetupState::SetupFail
        });
        debug!(from = %self.state, to = %next, "setup transition");
        self.state = next;

        if let Err(e) = self.persist().await {
            error!(state = %next, error = %e, "failed to persist setup state");
            if !next.is_terminal() {
                self.state = SetupState::SetupFail;
                if let Err(e) = self.persist().await {
                    error!(error = %e, "failed to persist setup failure");
                }
            }
        }
    }

    async fn persist(&mut self) -> ContestResult<()> {
        let phase = self.state.phase();
        match self.round.as_mut() {
            Some(round) => persist_phase(&self.deps, round, phase).await,
            None => Ok(()),
        }
    }

    async fn step(&mut self, state: SetupState) -> ContestResult<()> {
        match state {
            SetupState::CreatingRound => self.create_round().await,
            SetupState::AddingFixedFeatures => self.add_fixed_features().await,
            SetupState::GeneratingFeatures => self.generate_features().await,
            SetupState::DescribingSetup => self.describe_setup().await,
            _ => Ok(()),
        }
    }

    fn round(&self) -> ContestResult<&ContestRound> {
        self.round
            .as_ref()
            .ok_or_else(|| ContestError::not_found("round", format!("{}/0", self.contest.id)))
    }

    async fn arena(&self) -> ContestResult<Arena> {
        self.deps
            .contests
            .find_arena(self.contest.arena_id)
            .await?
            .ok_or_else(|| ContestError::not_found("arena", self.contest.arena_id))
    }

    async fn create_round(&mut self) -> ContestResult<()> {
        let store = &self.deps.contests;
        let participants = store.participants(self.contest.id).await?;
        let players = with_role(&participants, ParticipantRole::Player);
        if players.is_empty() {
            return Err(ContestError::NoParticipant {
                contest_id: self.contest.id,
                role: ParticipantRole::Player,
            });
        }

        let round = ContestRound::new(self.contest.id, 0, RoundPhase::CreatingRound);
        let states: Vec<PlayerState> = players
            .iter()
            .enumerate()
            .map(|(seat, player)| {
                PlayerState::builder()
                    .round_id(round.id)
                    .participant_id(player.id)
                    .position(seed_position(self.contest.player_positions.get(seat)))
                    .inventory(
                        self.contest
                            .player_inventories
                            .get(seat)
                            .cloned()
                            .unwrap_or_default(),
                    )
                    .build()
            })
            .collect();

        let round = store.create_round(round, states, vec![]).await?;
        info!(round_id = %round.id, players = players.len(), "round 0 created");
        notify_entity(&self.deps, "round", round.id, EntityAction::Create, &round).await;
        self.round = Some(round);
        Ok(())
    }

    async fn add_fixed_features(&mut self) -> ContestResult<()> {
        let round_id = self.round()?.id;
        let arena = self.arena().await?;
        let store = &self.deps.contests;

        let existing = store.features(round_id).await?;
        let fixed: Vec<Feature> = store
            .arena_features(arena.id)
            .await?
            .iter()
            .filter(|f| f.origin == FeatureOrigin::Required)
            .filter(|f| {
                !existing
                    .iter()
                    .any(|e| e.name == f.name && e.position == f.position)
            })
            .map(|f| Feature::from_arena(round_id, f))
            .collect();

        debug!(count = fixed.len(), "adding fixed features");
        if !fixed.is_empty() {
            store.add_features(fixed).await?;
        }
        Ok(())
    }

    async fn generate_features(&mut self) -> ContestResult<()> {
        let round = self.round()?.clone();
        let arena = self.arena().await?;
        if arena.max_random_features <= 0 {
            info!("random features disabled, skipping generation");
            return Ok(());
        }

        let store = &self.deps.contests;
        let existing = store.features(round.id).await?;
        if existing.iter().any(|f| f.origin == FeatureOrigin::Random) {
            info!("random features already generated");
            return Ok(());
        }

        let participants = store.participants(self.contest.id).await?;
        let agent = first_with_role(&participants, self.contest.id, ParticipantRole::Arena)?;
        let view = ContestView::load(store.as_ref(), &self.contest, &round).await?;
        let body = json!({
            "contest": view.render(None),
            "maxFeatures": arena.max_random_features,
        });

        let reply = self
            .deps
            .agents
            .ask(agent.id, PromptType::GenerateFeatures, &body)
            .await?;
        let features = generated_features(round.id, &reply, &arena)?;

        info!(count = features.len(), "generated features");
        if !features.is_empty() {
            store.add_features(features).await?;
        }
        Ok(())
    }

    async fn describe_setup(&mut self) -> ContestResult<()> {
        let round = self.round()?.clone();
        let store = &self.deps.contests;
        let participants = store.participants(self.contest.id).await?;
        let announcer =
            first_with_role(&participants, self.contest.id, ParticipantRole::Announcer)?;
        let view = ContestView::load(store.as_ref(), &self.contest, &round).await?;

        let narrative = self
            .deps
            .agents
            .ask_text(announcer.id, PromptType::DescribeSetup, &view.render(None))
            .await?;

        if let Some(round) = self.round.as_mut() {
            round.narrative = narrative;
            self.deps.contests.update_round(round).await?;
        }
        Ok(())
    }
}

/// Normalize a seed position, falling back to the origin.
fn seed_position(seed: Option<&String>) -> String {
    match seed {
        Some(raw) => raw
            .parse::<Position>()
            .map(|p| p.to_string())
            .unwrap_or_else(|_| raw.clone()),
        None => DEFAULT_POSITION.to_string(),
    }
}

/// Features from a generation reply: a list, or an object with a `features`
/// list. An entry with an `endPosition` becomes one feature per cell of the
/// rectangle it spans, clipped to the arena. Entries placed off the arena are
/// skipped and no more than `max_random_features` cells are produced.
fn generated_features(round_id: RoundId, reply: &Value, arena: &Arena) -> ContestResult<Vec<Feature>> {
    let entries = match reply {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("features") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(ContestError::UnexpectedReply {
                    prompt: PromptType::GenerateFeatures,
                    detail: "no feature list".to_string(),
                })
            }
        },
        other => {
            return Err(ContestError::UnexpectedReply {
                prompt: PromptType::GenerateFeatures,
                detail: format!("expected a list, got {}", other),
            })
        }
    };

    let max = usize::try_from(arena.max_random_features).unwrap_or(0);
    let mut features = Vec::new();
    for entry in entries {
        if features.len() >= max {
            break;
        }
        let Some(start) = entry.get("position").and_then(Position::from_value) else {
            warn!(entry = %entry, "generated feature has no position, skipping");
            continue;
        };
        if !start.within(arena.width, arena.height) {
            warn!(entry = %entry, "generated feature is off the arena, skipping");
            continue;
        }
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("feature");
        let description = entry
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let end = entry
            .get("endPosition")
            .or_else(|| entry.get("end_position"))
            .and_then(Position::from_value)
            .map(|end| end.clamp_to(arena.width, arena.height))
            .unwrap_or(start);

        let room = max - features.len();
        features.extend(start.span(end).take(room).map(|cell| {
            Feature::builder()
                .round_id(round_id)
                .name(name)
                .description(description)
                .position(cell.to_string())
                .origin(FeatureOrigin::Random)
                .build()
        }));
    }
    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions() {
        use SetupEvent::*;
        use SetupState::*;

        assert_eq!(
            transition(Idle, Start { round_exists: false }),
            Some(CreatingRound)
        );
        assert_eq!(
            transition(Idle, Start { round_exists: true }),
            Some(AddingFixedFeatures)
        );
        assert_eq!(transition(DescribingSetup, Done), Some(SetupComplete));
        assert_eq!(transition(GeneratingFeatures, Failed), Some(SetupFail));
        assert_eq!(transition(SetupComplete, Failed), None);
        assert_eq!(transition(SetupFail, Done), None);
    }

    #[test]
    fn phases_round_trip() {
        for state in [
            SetupState::Idle,
            SetupState::AddingFixedFeatures,
            SetupState::SetupFail,
        ] {
            assert_eq!(SetupState::from_phase(state.phase()), Some(state));
        }
        assert_eq!(SetupState::from_phase(RoundPhase::JudgingActions), None);
    }

    fn arena(max_random_features: i32) -> Arena {
        Arena::builder()
            .name("Test Arena")
            .max_random_features(max_random_features)
            .build()
    }

    #[test]
    fn spans_expand_to_one_feature_per_cell() {
        let round_id = RoundId::new();
        let reply = json!({"features": [
            {"name": "wall", "position": "0,0", "endPosition": [2, 0]},
            {"name": "pond", "description": "cold", "position": {"x": 5, "y": 5}},
            {"name": "ghost"},
        ]});

        let features = generated_features(round_id, &reply, &arena(10)).unwrap();
        let positions: Vec<_> = features.iter().map(|f| f.position.as_str()).collect();
        assert_eq!(positions, vec!["0,0", "1,0", "2,0", "5,5"]);
        assert!(features.iter().all(|f| f.origin == FeatureOrigin::Random));
        assert_eq!(features[3].description, "cold");
    }

    #[test]
    fn generation_is_capped_at_the_maximum() {
        let reply = json!([
            {"name": "a", "position": "1,1"},
            {"name": "b", "position": "2,2"},
            {"name": "c", "position": "3,3"},
        ]);
        let features = generated_features(RoundId::new(), &reply, &arena(2)).unwrap();
        assert_eq!(features.len(), 2);
    }

    #[test]
    fn the_cap_counts_cells_not_entries() {
        let reply = json!([
            {"name": "wall", "position": "0,0", "endPosition": "9,9"},
            {"name": "rock", "position": "4,4"},
        ]);
        let features = generated_features(RoundId::new(), &reply, &arena(3)).unwrap();
        let positions: Vec<_> = features.iter().map(|f| f.position.as_str()).collect();
        assert_eq!(positions, vec!["0,0", "1,0", "2,0"]);
    }

    #[test]
    fn oversized_spans_are_clipped_to_the_arena() {
        let reply = json!([
            {"name": "sea", "position": [8, 8], "endPosition": [2147483647, 2147483647]},
            {"name": "void", "position": [-2147483648, -2147483648], "endPosition": [2147483647, 2147483647]},
        ]);
        let features = generated_features(RoundId::new(), &reply, &arena(i32::MAX)).unwrap();
        let positions: Vec<_> = features.iter().map(|f| f.position.as_str()).collect();
        assert_eq!(positions, vec!["8,8", "9,8", "8,9", "9,9"]);
    }

    #[test]
    fn disabled_generation_produces_nothing() {
        let reply = json!([{"name": "a", "position": "1,1"}]);
        assert!(generated_features(RoundId::new(), &reply, &arena(0)).unwrap().is_empty());
    }

    #[test]
    fn a_reply_without_a_list_is_rejected() {
        let err = generated_features(RoundId::new(), &json!({"ok": true}), &arena(3)).unwrap_err();
        assert!(matches!(err, ContestError::UnexpectedReply { .. }));
    }

    #[test]
    fn seed_positions_are_normalized() {
        assert_eq!(seed_position(Some(&"(3, 4)".to_string())), "3,4");
        assert_eq!(seed_position(None), "0,0");
    }
}
