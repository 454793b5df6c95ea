//! Round machine: plays one round of a contest.
//!
//! ```text
//! in_progress ─► round_prompting ─► judging_actions ─► applying_effects
//!                                                            │
//!                      round_complete ◄─ describing_results ◄┘
//!
//! any step error ─► round_fail
//! ```
//!
//! Steps are resumable: players who already acted are not prompted again and
//! actions already judged are not judged again. The terminal state is
//! announced on `arena.contest.<id>.round.<n>.done`.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::{announce, first_with_role, persist_phase};
use crate::domains::contests::models::{
    with_role, Contest, ContestRound, Feature, JudgeResult, ParticipantRole, PlayerAction,
    PlayerState, Position, RoundPhase,
};
use crate::domains::contests::view::ContestView;
use crate::domains::contests::{ContestError, ContestResult};
use crate::kernel::topics;
use crate::kernel::{ArenaDeps, PromptType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    InProgress,
    RoundPrompting,
    JudgingActions,
    ApplyingEffects,
    DescribingResults,
    RoundComplete,
    RoundFail,
}

impl RoundState {
    pub fn phase(&self) -> RoundPhase {
        match self {
            RoundState::InProgress => RoundPhase::InProgress,
            RoundState::RoundPrompting => RoundPhase::RoundPrompting,
            RoundState::JudgingActions => RoundPhase::JudgingActions,
            RoundState::ApplyingEffects => RoundPhase::ApplyingEffects,
            RoundState::DescribingResults => RoundPhase::DescribingResults,
            RoundState::RoundComplete => RoundPhase::RoundComplete,
            RoundState::RoundFail => RoundPhase::RoundFail,
        }
    }

    /// The round state stored as `phase`, or `None` for setup phases.
    pub fn from_phase(phase: RoundPhase) -> Option<Self> {
        match phase {
            RoundPhase::InProgress => Some(RoundState::InProgress),
            RoundPhase::RoundPrompting => Some(RoundState::RoundPrompting),
            RoundPhase::JudgingActions => Some(RoundState::JudgingActions),
            RoundPhase::ApplyingEffects => Some(RoundState::ApplyingEffects),
            RoundPhase::DescribingResults => Some(RoundState::DescribingResults),
            RoundPhase::RoundComplete => Some(RoundState::RoundComplete),
            RoundPhase::RoundFail => Some(RoundState::RoundFail),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RoundState::RoundComplete | RoundState::RoundFail)
    }
}

impl std::fmt::Display for RoundState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.phase().as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundEvent {
    Start,
    Done,
    Failed,
}

fn transition(state: RoundState, event: RoundEvent) -> Option<RoundState> {
    use RoundEvent::*;
    use RoundState::*;

    match (state, event) {
        (InProgress, Start) => Some(RoundPrompting),
        (RoundPrompting, Done) => Some(JudgingActions),
        (JudgingActions, Done) => Some(ApplyingEffects),
        (ApplyingEffects, Done) => Some(DescribingResults),
        (DescribingResults, Done) => Some(RoundComplete),
        (s, Failed) if !s.is_terminal() => Some(RoundFail),
        _ => None,
    }
}

pub struct RoundMachine {
    deps: Arc<ArenaDeps>,
    contest: Contest,
    round: ContestRound,
    state: RoundState,
}

impl RoundMachine {
    /// Machine for `round`, continuing from its stored state. Rounds still
    /// carrying a setup phase start at `in_progress`.
    pub fn new(deps: Arc<ArenaDeps>, contest: Contest, round: ContestRound) -> Self {
        let state = RoundState::from_phase(round.state).unwrap_or(RoundState::InProgress);
        Self {
            deps,
            contest,
            round,
            state,
        }
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    /// Drive the round to a terminal state and announce it.
    pub async fn run(mut self) -> RoundState {
        let span = info_span!(
            "round",
            contest_id = %self.contest.id,
            round_no = self.round.round_no
        );
        async move {
            if self.state != RoundState::InProgress {
                info!(state = %self.state, "resuming round");
            }

            while !self.state.is_terminal() {
                let event = match self.state {
                    RoundState::InProgress => RoundEvent::Start,
                    state => match self.step(state).await {
                        Ok(()) => RoundEvent::Done,
                        Err(e) => {
                            error!(state = %state, error = %e, "round step failed");
                            RoundEvent::Failed
                        }
                    },
                };
                self.fire(event).await;
            }

            info!(state = %self.state, "round finished");
            announce(
                &self.deps,
                topics::round_done(self.contest.id, self.round.round_no),
                self.state.phase().as_str(),
            )
            .await;
            self.state
        }
        .instrument(span)
        .await
    }

    async fn fire(&mut self, event: RoundEvent) {
        let next = transition(self.state, event).unwrap_or_else(|| {
            warn!(state = %self.state, event = ?event, "invalid round transition");
            RoundState::RoundFail
        });
        debug!(from = %self.state, to = %next, "round transition");
        self.state = next;

        if let Err(e) = persist_phase(&self.deps, &mut self.round, next.phase()).await {
            error!(state = %next, error = %e, "failed to persist round state");
            if !next.is_terminal() {
                self.state = RoundState::RoundFail;
                if let Err(e) =
                    persist_phase(&self.deps, &mut self.round, RoundPhase::RoundFail).await
                {
                    error!(error = %e, "failed to persist round failure");
                }
            }
        }
    }

    async fn step(&mut self, state: RoundState) -> ContestResult<()> {
        match state {
            RoundState::RoundPrompting => self.prompt_players().await,
            RoundState::JudgingActions => self.judge_actions().await,
            RoundState::ApplyingEffects => self.apply_effects().await,
            RoundState::DescribingResults => self.describe_results().await,
            _ => Ok(()),
        }
    }

    async fn view(&self) -> ContestResult<ContestView> {
        ContestView::load(self.deps.contests.as_ref(), &self.contest, &self.round).await
    }

    async fn prompt_players(&mut self) -> ContestResult<()> {
        let store = &self.deps.contests;
        let participants = store.participants(self.contest.id).await?;
        let players = with_role(&participants, ParticipantRole::Player);
        if players.is_empty() {
            return Err(ContestError::NoParticipant {
                contest_id: self.contest.id,
                role: ParticipantRole::Player,
            });
        }

        let acted: HashSet<_> = store
            .player_actions(self.round.id)
            .await?
            .into_iter()
            .map(|a| a.participant_id)
            .collect();
        let view = self.view().await?;

        for player in players.into_iter().filter(|p| !acted.contains(&p.id)) {
            let body = json!({
                "playerId": player.id,
                "contest": view.render(Some(player.id)),
            });
            let reply = self
                .deps
                .agents
                .ask(player.id, PromptType::PlayerAction, &body)
                .await?;

            let action = reply
                .get("action")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .ok_or(ContestError::MissingAction {
                    participant: player.id,
                })?
                .to_string();

            debug!(participant_id = %player.id, action = %action, "player acted");
            store
                .add_player_action(PlayerAction::new(self.round.id, player.id, action, reply))
                .await?;
        }
        Ok(())
    }

    async fn judge_actions(&mut self) -> ContestResult<()> {
        let store = &self.deps.contests;
        let participants = store.participants(self.contest.id).await?;
        let judge = first_with_role(&participants, self.contest.id, ParticipantRole::Judge)?;

        let judged: HashSet<_> = store
            .judge_results(self.round.id)
            .await?
            .into_iter()
            .map(|r| r.action_id)
            .collect();
        let view = self.view().await?.render(None);

        for action in store.player_actions(self.round.id).await? {
            if judged.contains(&action.id) {
                continue;
            }
            let body = json!({ "contest": view, "action": action });
            let verdict = self
                .deps
                .agents
                .ask(judge.id, PromptType::JudgeAction, &body)
                .await?;

            debug!(action_id = %action.id, "action judged");
            store
                .add_judge_result(JudgeResult::new(self.round.id, action.id, judge.id, verdict))
                .await?;
        }
        Ok(())
    }

    async fn apply_effects(&mut self) -> ContestResult<()> {
        let store = &self.deps.contests;
        let participants = store.participants(self.contest.id).await?;
        let judge = first_with_role(&participants, self.contest.id, ParticipantRole::Judge)?;

        let view = self.view().await?;
        let actions = store.player_actions(self.round.id).await?;
        let judgements = store.judge_results(self.round.id).await?;
        let body = json!({
            "contest": view.render(None),
            "actions": actions,
            "judgements": judgements,
        });
        let reply = self
            .deps
            .agents
            .ask(judge.id, PromptType::ApplyEffects, &body)
            .await?;
        if !reply.is_object() {
            return Err(ContestError::UnexpectedReply {
                prompt: PromptType::ApplyEffects,
                detail: format!("expected an object, got {}", reply),
            });
        }

        let players = merge_player_effects(&store.player_states(self.round.id).await?, &reply);
        let features = merge_feature_effects(&store.features(self.round.id).await?, &reply);
        info!(
            players = players.len(),
            features = features.len(),
            "applying effects"
        );
        if !players.is_empty() || !features.is_empty() {
            store.apply_effects(players, features).await?;
        }
        Ok(())
    }

    async fn describe_results(&mut self) -> ContestResult<()> {
        let store = &self.deps.contests;
        let participants = store.participants(self.contest.id).await?;
        let announcer =
            first_with_role(&participants, self.contest.id, ParticipantRole::Announcer)?;

        let view = self.view().await?;
        let judgements = store.judge_results(self.round.id).await?;
        let body = json!({
            "contest": view.render(None),
            "judgements": judgements,
        });
        let narrative = self
            .deps
            .agents
            .ask_text(announcer.id, PromptType::DescribeResults, &body)
            .await?;

        self.round.ending_narrative = narrative;
        store.update_round(&self.round).await?;
        Ok(())
    }
}

/// Id an effect entry refers to.
fn effect_id(entry: &Value) -> Option<String> {
    ["id", "participantId", "participant_id"]
        .iter()
        .find_map(|key| match entry.get(*key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        })
}

fn effect_entries<'a>(reply: &'a Value, key: &str) -> &'a [Value] {
    reply
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Player states changed by an effects reply. Entries are matched by
/// participant id or player state id; only supplied fields are merged.
fn merge_player_effects(states: &[PlayerState], reply: &Value) -> Vec<PlayerState> {
    let mut changed: Vec<PlayerState> = Vec::new();

    for entry in effect_entries(reply, "players") {
        let Some(id) = effect_id(entry) else {
            warn!(entry = %entry, "player effect without an id, skipping");
            continue;
        };
        let Some(state) = states
            .iter()
            .find(|s| s.participant_id.to_string() == id || s.id.to_string() == id)
        else {
            warn!(player = %id, "effect for unknown player, skipping");
            continue;
        };

        // Several entries for one player accumulate.
        let mut updated = changed
            .iter()
            .find(|s| s.id == state.id)
            .cloned()
            .unwrap_or_else(|| state.clone());

        if let Some(position) = entry.get("position").and_then(Position::from_value) {
            updated.position = position.to_string();
        }
        if let Some(health) = entry.get("health").and_then(as_i32) {
            updated.health = health;
        }
        if let Some(score) = entry.get("score").and_then(as_i32) {
            updated.score = score;
        }
        if let Some(items) = entry.get("inventory").and_then(Value::as_array) {
            updated.inventory = items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .collect();
        }

        match changed.iter_mut().find(|s| s.id == updated.id) {
            Some(existing) => *existing = updated,
            None => changed.push(updated),
        }
    }

    changed.retain(|c| states.iter().any(|s| s.id == c.id && s != c));
    changed
}

/// Features changed by an effects reply. Only description and position are
/// merged.
fn merge_feature_effects(features: &[Feature], reply: &Value) -> Vec<Feature> {
    let mut changed: Vec<Feature> = Vec::new();

    for entry in effect_entries(reply, "features") {
        let Some(id) = effect_id(entry) else {
            warn!(entry = %entry, "feature effect without an id, skipping");
            continue;
        };
        let Some(feature) = features.iter().find(|f| f.id.to_string() == id) else {
            warn!(feature = %id, "effect for unknown feature, skipping");
            continue;
        };

        let mut updated = changed
            .iter()
            .find(|f| f.id == feature.id)
            .cloned()
            .unwrap_or_else(|| feature.clone());
        if let Some(description) = entry.get("description").and_then(Value::as_str) {
            updated.description = description.to_string();
        }
        if let Some(position) = entry.get("position").and_then(Position::from_value) {
            updated.position = position.to_string();
        }

        match changed.iter_mut().find(|f| f.id == updated.id) {
            Some(existing) => *existing = updated,
            None => changed.push(updated),
        }
    }
    changed
}

fn as_i32(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .and_then(|n| i32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
