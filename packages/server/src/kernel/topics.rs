//! Subject naming for everything the orchestrator publishes or listens on.
//!
//! ```text
//! arena.<entity>.<id>.<action>                   entity lifecycle
//! arena.contest.<id>.role_call[.<participant>]   health-check batch
//! arena.contest.<id>.flow.<state>                coarse flow broadcast
//! arena.contest.<id>.contestflow.<from>.<to>     transition broadcast
//! arena.contest.<id>.setup.done                  setup machine finished
//! arena.contest.<id>.round.<n>.done              round machine finished
//! agent.<participant>.<prompt>.request.<job>     agent request
//! agent.<participant>.<prompt>.response.<job>    agent reply
//! ```

use std::fmt::Display;

pub const NAMESPACE: &str = "arena";
pub const AGENT_NAMESPACE: &str = "agent";

/// Entity lifecycle actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityAction {
    Create,
    Update,
    Delete,
}

impl EntityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityAction::Create => "create",
            EntityAction::Update => "update",
            EntityAction::Delete => "delete",
        }
    }
}

pub fn entity(entity: &str, id: impl Display, action: EntityAction) -> String {
    format!("{}.{}.{}.{}", NAMESPACE, entity, id, action.as_str())
}

pub fn role_call(contest_id: impl Display) -> String {
    format!("{}.contest.{}.role_call", NAMESPACE, contest_id)
}

pub fn role_call_child(contest_id: impl Display, participant_id: impl Display) -> String {
    format!("{}.{}", role_call(contest_id), participant_id)
}

pub fn contest_flow(contest_id: impl Display, state: &str) -> String {
    format!("{}.contest.{}.flow.{}", NAMESPACE, contest_id, state)
}

pub fn contest_transition(contest_id: impl Display, from: &str, to: &str) -> String {
    format!("{}.contest.{}.contestflow.{}.{}", NAMESPACE, contest_id, from, to)
}

pub fn setup_done(contest_id: impl Display) -> String {
    format!("{}.contest.{}.setup.done", NAMESPACE, contest_id)
}

pub fn round_done(contest_id: impl Display, round_no: i32) -> String {
    format!("{}.contest.{}.round.{}.done", NAMESPACE, contest_id, round_no)
}

pub fn agent_request(participant_id: impl Display, prompt: &str, job_id: impl Display) -> String {
    format!(
        "{}.{}.{}.request.{}",
        AGENT_NAMESPACE, participant_id, prompt, job_id
    )
}

pub fn agent_response(participant_id: impl Display, prompt: &str, job_id: impl Display) -> String {
    format!(
        "{}.{}.{}.response.{}",
        AGENT_NAMESPACE, participant_id, prompt, job_id
    )
}

/// Response subject for a request subject, if it is one.
pub fn response_for(request_subject: &str) -> Option<String> {
    let tokens: Vec<&str> = request_subject.split('.').collect();
    match tokens.as_slice() {
        [ns, participant, prompt, "request", job] if *ns == AGENT_NAMESPACE => {
            Some(agent_response(participant, prompt, job))
        }
        _ => None,
    }
}

/// NATS-style wildcard match: `*` matches exactly one token, a trailing `>`
/// matches one or more remaining tokens.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut subject_tokens = subject.split('.');
    for pattern_token in pattern.split('.') {
        match (pattern_token, subject_tokens.next()) {
            (">", Some(_)) => return true,
            ("*", Some(_)) => {}
            (expected, Some(actual)) if expected == actual => {}
            _ => return false,
        }
    }
    subject_tokens.next().is_none()
}
