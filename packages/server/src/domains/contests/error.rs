use crate::common::{ContestId, ParticipantId};
use crate::kernel::{AgentError, PromptType};

use super::models::ParticipantRole;

#[derive(Debug, thiserror::Error)]
pub enum ContestError {
    #[error("contest {contest_id} has no {role} participant")]
    NoParticipant {
        contest_id: ContestId,
        role: ParticipantRole,
    },

    #[error("player {participant} replied without an action")]
    MissingAction { participant: ParticipantId },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("unexpected {prompt} reply: {detail}")]
    UnexpectedReply { prompt: PromptType, detail: String },

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ContestError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        ContestError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

pub type ContestResult<T> = Result<T, ContestError>;
