use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::common::{ArenaId, ContestId, ParticipantId};

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "contest_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContestState {
    /// Created but never started. Treated as `Starting`.
    #[default]
    Pending,
    Starting,
    RoleCall,
    SetupArena,
    CreateRound,
    InRound,
    CheckEnd,
    Complete,
    Fail,
}

impl ContestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContestState::Pending => "pending",
            ContestState::Starting => "starting",
            ContestState::RoleCall => "role_call",
            ContestState::SetupArena => "setup_arena",
            ContestState::CreateRound => "create_round",
            ContestState::InRound => "in_round",
            ContestState::CheckEnd => "check_end",
            ContestState::Complete => "complete",
            ContestState::Fail => "fail",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ContestState::Complete | ContestState::Fail)
    }
}

impl std::fmt::Display for ContestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Contest Model
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
#[serde(rename_all = "camelCase")]
pub struct Contest {
    #[builder(default = ContestId::new())]
    pub id: ContestId,
    #[builder(default)]
    pub name: String,
    pub arena_id: ArenaId,
    #[builder(default = 0)]
    pub current_round: i32,

    /// Seed position per player, by seat.
    #[builder(default)]
    pub player_positions: Vec<String>,
    /// Seed inventory per player, by seat.
    #[builder(default)]
    #[sqlx(json)]
    pub player_inventories: Vec<Vec<String>>,

    #[builder(default)]
    pub state: ContestState,
    #[builder(default, setter(strip_option))]
    pub winner_id: Option<ParticipantId>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}
