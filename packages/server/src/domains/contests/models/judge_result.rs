use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::common::{JudgeResultId, ParticipantId, PlayerActionId, RoundId};

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeResult {
    pub id: JudgeResultId,
    pub round_id: RoundId,
    pub action_id: PlayerActionId,
    pub judge_id: ParticipantId,
    pub verdict: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl JudgeResult {
    pub fn new(
        round_id: RoundId,
        action_id: PlayerActionId,
        judge_id: ParticipantId,
        verdict: serde_json::Value,
    ) -> Self {
        Self {
            id: JudgeResultId::new(),
            round_id,
            action_id,
            judge_id,
            verdict,
            created_at: Utc::now(),
        }
    }
}
