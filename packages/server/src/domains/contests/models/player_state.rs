use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::common::{ParticipantId, PlayerStateId, RoundId};

pub const STARTING_HEALTH: i32 = 100;
pub const DEFAULT_POSITION: &str = "0,0";

/// One player's standing in one round.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Eq)]
#[builder(field_defaults(setter(into)))]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    #[builder(default = PlayerStateId::new())]
    pub id: PlayerStateId,
    pub round_id: RoundId,
    pub participant_id: ParticipantId,
    #[builder(default = DEFAULT_POSITION.to_string())]
    pub position: String,
    #[builder(default)]
    pub inventory: Vec<String>,
    #[builder(default = STARTING_HEALTH)]
    pub health: i32,
    #[builder(default = 0)]
    pub score: i32,
}

impl PlayerState {
    /// Same standing, carried into another round.
    pub fn carry_to(&self, round_id: RoundId) -> Self {
        Self {
            id: PlayerStateId::new(),
            round_id,
            ..self.clone()
        }
    }
}
