use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::common::{ParticipantId, PlayerActionId, RoundId};

/// What a player chose to do in a round.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerAction {
    pub id: PlayerActionId,
    pub round_id: RoundId,
    pub participant_id: ParticipantId,
    pub action: String,
    /// The decoded reply the action was taken from.
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl PlayerAction {
    pub fn new(
        round_id: RoundId,
        participant_id: ParticipantId,
        action: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: PlayerActionId::new(),
            round_id,
            participant_id,
            action: action.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}
