//! Contest machine: the top-level lifecycle.
//!
//! ```text
//! starting ─► role_call ─► setup_arena ─► in_round ─► check_end ─► complete
//!                 │             │            ▲  │          │
//!                 │             │            │  │          ▼
//!                 │             │     create_round ◄───────┘ (no winner)
//!                 ▼             ▼               ▼
//!                fail ◄─────────┴───────────────┘
//! ```
//!
//! One machine instance per contest runs as an actor: broker messages it is
//! waiting for are forwarded into its mailbox, and the mailbox is drained one
//! event at a time, so at most one transition runs per contest. Setup and
//! round machines run as child tasks and report back through their
//! completion subjects.
//!
//! After every transition the contest is persisted, then the new state is
//! broadcast on `...flow.<state>` and `...contestflow.<from>.<to>`.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::{notify_entity, RoundMachine, SetupMachine};
use crate::common::ContestId;
use crate::domains::contests::models::{
    Contest, ContestRound, ContestState, ParticipantRole, RoundPhase,
};
use crate::domains::contests::{ContestError, ContestResult};
use crate::kernel::jobs::{Job, JobMethod, ReplyEnvelope, ReplyState};
use crate::kernel::topics::{self, EntityAction};
use crate::kernel::{ArenaDeps, BrokerMessage};

/// Inputs that move a contest between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContestTrigger {
    Begin,
    RoleCallPassed,
    RoleCallFailed,
    SetupDone,
    SetupFailed,
    RoundCreated,
    RoundEnded,
    RoundFailed,
    WinnerFound,
    NoWinner,
    Abort,
}

fn transition(state: ContestState, trigger: ContestTrigger) -> Option<ContestState> {
    use ContestState::*;
    use ContestTrigger::*;

    match (state, trigger) {
        (Pending | Starting, Begin) => Some(RoleCall),
        (RoleCall, RoleCallPassed) => Some(SetupArena),
        (RoleCall, RoleCallFailed) => Some(Fail),
        (SetupArena, SetupDone) => Some(InRound),
        (SetupArena, SetupFailed) => Some(Fail),
        (CreateRound, RoundCreated) => Some(InRound),
        (InRound, RoundEnded) => Some(CheckEnd),
        (InRound, RoundFailed) => Some(Fail),
        (CheckEnd, WinnerFound) => Some(Complete),
        (CheckEnd, NoWinner) => Some(CreateRound),
        (s, Abort) if !s.is_terminal() => Some(Fail),
        _ => None,
    }
}

/// A completion subject the machine is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Listen {
    RoleCall,
    Setup,
    Round(i32),
}

#[derive(Debug)]
pub enum ContestEvent {
    Message { from: Listen, message: BrokerMessage },
    Abort,
}

pub struct ContestMachine {
    deps: Arc<ArenaDeps>,
    contest: Contest,
    state_tx: watch::Sender<ContestState>,
    mailbox_tx: mpsc::UnboundedSender<ContestEvent>,
    mailbox: mpsc::UnboundedReceiver<ContestEvent>,
    listeners: HashMap<Listen, JoinHandle<()>>,
    children: Vec<JoinHandle<()>>,
}

impl ContestMachine {
    /// Machine for a stored contest. A contest that was never started begins
    /// at `starting`.
    pub fn new(deps: Arc<ArenaDeps>, mut contest: Contest) -> Self {
        if contest.state == ContestState::Pending {
            contest.state = ContestState::Starting;
        }
        let (state_tx, _) = watch::channel(contest.state);
        let (mailbox_tx, mailbox) = mpsc::unbounded_channel();

        Self {
            deps,
            contest,
            state_tx,
            mailbox_tx,
            mailbox,
            listeners: HashMap::new(),
            children: Vec::new(),
        }
    }

    pub fn state(&self) -> ContestState {
        self.contest.state
    }

    /// Run the machine on its own task.
    pub fn spawn(deps: Arc<ArenaDeps>, contest: Contest) -> ContestHandle {
        let machine = Self::new(deps, contest);
        let contest_id = machine.contest.id;
        let state = machine.state_tx.subscribe();
        let mailbox = machine.mailbox_tx.clone();
        let join = tokio::spawn(machine.run());

        ContestHandle {
            contest_id,
            state,
            mailbox,
            join,
        }
    }

    /// Drive the contest until it reaches `complete` or `fail`.
    pub async fn run(mut self) -> ContestState {
        let span = info_span!("contest", contest_id = %self.contest.id);
        async move {
            match self.contest.state {
                ContestState::Starting => self.fire(ContestTrigger::Begin).await,
                state if state.is_terminal() => {}
                state => {
                    info!(state = %state, "resuming contest");
                    if let Some(trigger) = self.enter(state).await {
                        self.fire(trigger).await;
                    }
                }
            }

            while !self.contest.state.is_terminal() {
                let Some(event) = self.mailbox.recv().await else {
                    break;
                };
                self.handle(event).await;
            }

            self.stop_all();
            info!(state = %self.contest.state, winner_id = ?self.contest.winner_id, "contest machine stopped");
            self.contest.state
        }
        .instrument(span)
        .await
    }

    async fn handle(&mut self, event: ContestEvent) {
        match event {
            ContestEvent::Abort => {
                warn!(state = %self.contest.state, "contest aborted");
                self.fire(ContestTrigger::Abort).await;
            }
            ContestEvent::Message { from, message } => {
                let Some(trigger) = self.interpret(from, &message) else {
                    return;
                };
                self.stop_listening(from);
                self.fire(trigger).await;
            }
        }
    }

    /// Turn a completion message into a trigger, or `None` to keep waiting.
    fn interpret(&self, from: Listen, message: &BrokerMessage) -> Option<ContestTrigger> {
        let expected = match from {
            Listen::RoleCall => ContestState::RoleCall,
            Listen::Setup => ContestState::SetupArena,
            Listen::Round(_) => ContestState::InRound,
        };
        let stale = match from {
            Listen::Round(n) => n != self.contest.current_round,
            _ => false,
        };
        if self.contest.state != expected || stale {
            warn!(state = %self.contest.state, listen = ?from, subject = %message.subject, "ignoring stale completion");
            return None;
        }

        let text = message.text();
        match from {
            Listen::RoleCall => match ReplyEnvelope::parse(&text) {
                Some(envelope) if envelope.state == ReplyState::Pending => None,
                Some(envelope) if envelope.is_success() => {
                    info!("every participant answered the role call");
                    Some(ContestTrigger::RoleCallPassed)
                }
                Some(envelope) => {
                    let missing: Vec<String> = envelope
                        .child_data
                        .iter()
                        .flatten()
                        .filter(|child| !child.is_success())
                        .map(|child| child.channel.clone())
                        .collect();
                    warn!(message = %envelope.message, missing = ?missing, "role call failed");
                    Some(ContestTrigger::RoleCallFailed)
                }
                None => {
                    warn!(payload = %text, "unreadable role call response");
                    Some(ContestTrigger::RoleCallFailed)
                }
            },
            Listen::Setup => match completion_state(&text) {
                Some(RoundPhase::SetupComplete) => Some(ContestTrigger::SetupDone),
                Some(RoundPhase::SetupFail) => Some(ContestTrigger::SetupFailed),
                other => {
                    warn!(state = ?other, "unexpected setup completion");
                    None
                }
            },
            Listen::Round(_) => match completion_state(&text) {
                Some(RoundPhase::RoundComplete) => Some(ContestTrigger::RoundEnded),
                Some(RoundPhase::RoundFail) => Some(ContestTrigger::RoundFailed),
                other => {
                    warn!(state = ?other, "unexpected round completion");
                    None
                }
            },
        }
    }

    /// Apply `trigger` and every trigger produced by the entry actions that
    /// follow it.
    async fn fire(&mut self, trigger: ContestTrigger) {
        let mut pending = Some(trigger);

        while let Some(trigger) = pending.take() {
            let from = self.contest.state;
            let Some(to) = transition(from, trigger) else {
                warn!(state = %from, trigger = ?trigger, "ignoring invalid contest transition");
                return;
            };
            info!(from = %from, to = %to, "contest transition");
            self.contest.state = to;

            if let Err(e) = self.deps.contests.update_contest(&self.contest).await {
                error!(state = %to, error = %e, "failed to persist contest state");
                if !to.is_terminal() {
                    pending = Some(ContestTrigger::Abort);
                    continue;
                }
            }

            self.state_tx.send_replace(to);
            self.broadcast(from, to).await;

            if to.is_terminal() {
                self.stop_all();
                return;
            }
            pending = self.enter(to).await;
        }
    }

    /// Entry action for `state`. Errors abort the contest.
    async fn enter(&mut self, state: ContestState) -> Option<ContestTrigger> {
        let result = match state {
            ContestState::RoleCall => self.start_role_call().await.map(|_| None),
            ContestState::SetupArena => self.start_setup().await.map(|_| None),
            ContestState::CreateRound => self.create_round().await.map(Some),
            ContestState::InRound => self.start_round().await.map(|_| None),
            ContestState::CheckEnd => self.check_end().await.map(Some),
            _ => Ok(None),
        };

        result.unwrap_or_else(|e| {
            error!(state = %state, error = %e, "contest step failed");
            Some(ContestTrigger::Abort)
        })
    }

    async fn start_role_call(&mut self) -> ContestResult<()> {
        let id = self.contest.id;
        let participants = self.deps.contests.participants(id).await?;
        if participants.is_empty() {
            return Err(ContestError::NoParticipant {
                contest_id: id,
                role: ParticipantRole::Player,
            });
        }

        self.listen(Listen::RoleCall, topics::role_call(id)).await?;

        let checks = participants
            .iter()
            .map(|p| {
                Job::builder()
                    .channel(topics::role_call_child(id, p.id))
                    .method(JobMethod::Get)
                    .url(p.health_url())
                    .build()
            })
            .collect();
        let (batch, _) = self.deps.queue.add_batch(topics::role_call(id), checks).await?;
        info!(batch_id = %batch.id, participants = participants.len(), "role call sent");
        Ok(())
    }

    async fn start_setup(&mut self) -> ContestResult<()> {
        self.listen(Listen::Setup, topics::setup_done(self.contest.id))
            .await?;

        let machine = SetupMachine::new(self.deps.clone(), self.contest.clone());
        self.children.push(tokio::spawn(async move {
            machine.run().await;
        }));
        Ok(())
    }

    async fn create_round(&mut self) -> ContestResult<ContestTrigger> {
        let id = self.contest.id;
        let current = self.contest.current_round;
        let next = current + 1;
        let store = &self.deps.contests;

        if store.find_round(id, next).await?.is_some() {
            info!(round_no = next, "round already created");
            self.contest.current_round = next;
            return Ok(ContestTrigger::RoundCreated);
        }

        let previous = store
            .find_round(id, current)
            .await?
            .ok_or_else(|| ContestError::not_found("round", format!("{}/{}", id, current)))?;
        let round = ContestRound::new(id, next, RoundPhase::InProgress);
        let states = store
            .player_states(previous.id)
            .await?
            .iter()
            .map(|s| s.carry_to(round.id))
            .collect();
        let features = store
            .features(previous.id)
            .await?
            .iter()
            .map(|f| f.carry_to(round.id))
            .collect();

        let round = store.create_round(round, states, features).await?;
        self.contest.current_round = next;
        info!(round_no = next, round_id = %round.id, "round created");
        notify_entity(&self.deps, "round", round.id, EntityAction::Create, &round).await;
        Ok(ContestTrigger::RoundCreated)
    }

    async fn start_round(&mut self) -> ContestResult<()> {
        let id = self.contest.id;
        let round_no = self.contest.current_round;
        let round = self
            .deps
            .contests
            .find_round(id, round_no)
            .await?
            .ok_or_else(|| ContestError::not_found("round", format!("{}/{}", id, round_no)))?;

        self.listen(Listen::Round(round_no), topics::round_done(id, round_no))
            .await?;

        let machine = RoundMachine::new(self.deps.clone(), self.contest.clone(), round);
        self.children.push(tokio::spawn(async move {
            machine.run().await;
        }));
        Ok(())
    }

    async fn check_end(&mut self) -> ContestResult<ContestTrigger> {
        let id = self.contest.id;
        let round_no = self.contest.current_round;
        let store = &self.deps.contests;
        let round = store
            .find_round(id, round_no)
            .await?
            .ok_or_else(|| ContestError::not_found("round", format!("{}/{}", id, round_no)))?;
        let states = store.player_states(round.id).await?;

        let win_score = self.deps.agent.win_score;
        // Ties go to the earlier seat.
        let winner = states
            .iter()
            .rev()
            .filter(|s| s.score > win_score)
            .max_by_key(|s| s.score);

        match winner {
            Some(winner) => {
                info!(participant_id = %winner.participant_id, score = winner.score, "winner found");
                self.contest.winner_id = Some(winner.participant_id);
                Ok(ContestTrigger::WinnerFound)
            }
            None => {
                debug!(round_no, win_score, "no winner yet");
                Ok(ContestTrigger::NoWinner)
            }
        }
    }

    /// Forward messages on `subject` into the mailbox.
    async fn listen(&mut self, from: Listen, subject: String) -> ContestResult<()> {
        let mut subscription = self.deps.broker.subscribe(subject.clone()).await?;
        let mailbox = self.mailbox_tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(message) = subscription.next().await {
                if mailbox.send(ContestEvent::Message { from, message }).is_err() {
                    break;
                }
            }
        });

        if let Some(previous) = self.listeners.insert(from, forwarder) {
            previous.abort();
        }
        debug!(subject = %subject, "listening");
        Ok(())
    }

    fn stop_listening(&mut self, from: Listen) {
        if let Some(forwarder) = self.listeners.remove(&from) {
            forwarder.abort();
        }
    }

    fn stop_all(&mut self) {
        for (_, forwarder) in self.listeners.drain() {
            forwarder.abort();
        }
        for child in self.children.drain(..) {
            child.abort();
        }
    }

    async fn broadcast(&self, from: ContestState, to: ContestState) {
        let id = self.contest.id;
        let mut body = json!({ "contestState": to });

        if from == ContestState::SetupArena || to == ContestState::SetupArena {
            match self.deps.contests.find_round(id, 0).await {
                Ok(Some(round)) => body["setupState"] = json!(round.state),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "failed to load setup state"),
            }
        }

        let payload = Bytes::from(body.to_string());
        for subject in [
            topics::contest_flow(id, to.as_str()),
            topics::contest_transition(id, from.as_str(), to.as_str()),
        ] {
            if let Err(e) = self.deps.broker.publish(subject.clone(), payload.clone()).await {
                warn!(subject = %subject, error = %e, "failed to broadcast contest state");
            }
        }

        notify_entity(&self.deps, "contest", id, EntityAction::Update, &self.contest).await;
    }
}

fn completion_state(text: &str) -> Option<RoundPhase> {
    let value: Value = serde_json::from_str(text).ok()?;
    serde_json::from_value(value.get("state")?.clone()).ok()
}

/// Handle to a running contest machine.
pub struct ContestHandle {
    contest_id: ContestId,
    state: watch::Receiver<ContestState>,
    mailbox: mpsc::UnboundedSender<ContestEvent>,
    join: JoinHandle<ContestState>,
}

impl ContestHandle {
    pub fn contest_id(&self) -> ContestId {
        self.contest_id
    }

    /// Last state the machine committed.
    pub fn state(&self) -> ContestState {
        *self.state.borrow()
    }

    /// Receiver that observes every committed state.
    pub fn watch(&self) -> watch::Receiver<ContestState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Move the contest to `fail`.
    pub fn abort(&self) {
        if self.mailbox.send(ContestEvent::Abort).is_err() {
            debug!(contest_id = %self.contest_id, "contest machine already stopped");
        }
    }

    /// Wait for the machine to stop and return its final state.
    pub async fn join(self) -> anyhow::Result<ContestState> {
        self.join.await.context("contest machine task failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ContestState::*;
    use ContestTrigger::*;

    #[test]
    fn happy_path() {
        let mut state = Starting;
        for (trigger, expected) in [
            (Begin, RoleCall),
            (RoleCallPassed, SetupArena),
            (SetupDone, InRound),
            (RoundEnded, CheckEnd),
            (NoWinner, CreateRound),
            (RoundCreated, InRound),
            (RoundEnded, CheckEnd),
            (WinnerFound, Complete),
        ] {
            state = transition(state, trigger).unwrap();
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn failures_are_terminal() {
        assert_eq!(transition(RoleCall, RoleCallFailed), Some(Fail));
        assert_eq!(transition(SetupArena, SetupFailed), Some(Fail));
        assert_eq!(transition(InRound, RoundFailed), Some(Fail));
        assert_eq!(transition(CreateRound, Abort), Some(Fail));
        assert_eq!(transition(Fail, Abort), None);
        assert_eq!(transition(Complete, Begin), None);
    }

    #[test]
    fn out_of_order_triggers_are_rejected() {
        assert_eq!(transition(RoleCall, SetupDone), None);
        assert_eq!(transition(InRound, WinnerFound), None);
        assert_eq!(transition(CheckEnd, RoundEnded), None);
    }

    #[test]
    fn completion_payloads() {
        assert_eq!(
            completion_state(r#"{"state":"setup_complete"}"#),
            Some(RoundPhase::SetupComplete)
        );
        assert_eq!(
            completion_state(r#"{"state":"round_fail"}"#),
            Some(RoundPhase::RoundFail)
        );
        assert_eq!(completion_state(r#"{"state":"exploded"}"#), None);
        assert_eq!(completion_state("nope"), None);
    }
}
