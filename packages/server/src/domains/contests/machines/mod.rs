//! Contest lifecycle machines.
//!
//! Each machine is an explicit transition table over its own state enum.
//! Entry actions run after the new state has been committed, and completion
//! is announced on the broker only after the commit:
//!
//! - [`SetupMachine`] builds round 0 and announces on `...setup.done`.
//! - [`RoundMachine`] plays one round and announces on `...round.<n>.done`.
//! - [`ContestMachine`] owns the lifecycle, waits for those announcements
//!   through its mailbox and spawns the sub-machines as child tasks.

pub mod contest;
pub mod round;
pub mod setup;

pub use contest::{ContestEvent, ContestHandle, ContestMachine, ContestTrigger, Listen};
pub use round::{RoundMachine, RoundState};
pub use setup::{SetupMachine, SetupState};

use std::fmt::Display;

use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use super::models::{ContestRound, Participant, ParticipantRole, RoundPhase};
use super::{ContestError, ContestResult};
use crate::common::ContestId;
use crate::kernel::topics::{self, EntityAction};
use crate::kernel::ArenaDeps;

/// Persist a new phase on `round`.
async fn persist_phase(
    deps: &ArenaDeps,
    round: &mut ContestRound,
    phase: RoundPhase,
) -> ContestResult<()> {
    round.state = phase;
    deps.contests.update_round(round).await?;
    Ok(())
}

/// Publish `{"state": ...}` on a completion subject. Failures are logged.
async fn announce(deps: &ArenaDeps, subject: String, state: &str) {
    let payload = json!({ "state": state }).to_string();
    if let Err(e) = deps.broker.publish(subject.clone(), Bytes::from(payload)).await {
        warn!(subject = %subject, error = %e, "failed to announce completion");
    }
}

/// Publish an entity lifecycle notification. Failures are logged.
async fn notify_entity<T: Serialize>(
    deps: &ArenaDeps,
    entity: &str,
    id: impl Display,
    action: EntityAction,
    body: &T,
) {
    let subject = topics::entity(entity, id, action);
    let payload = match serde_json::to_vec(body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(subject = %subject, error = %e, "failed to encode notification");
            return;
        }
    };
    if let Err(e) = deps.broker.publish(subject.clone(), Bytes::from(payload)).await {
        warn!(subject = %subject, error = %e, "failed to publish notification");
    }
}

/// First participant with `role`.
fn first_with_role(
    participants: &[Participant],
    contest_id: ContestId,
    role: ParticipantRole,
) -> ContestResult<Participant> {
    participants
        .iter()
        .find(|p| p.role == role)
        .cloned()
        .ok_or(ContestError::NoParticipant { contest_id, role })
}
