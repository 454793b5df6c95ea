use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::common::{ContestId, RoundId};

/// Persisted progress of a round. Round 0 records the setup machine's
/// states, later rounds the round machine's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "round_phase", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    // setup
    #[default]
    Idle,
    CreatingRound,
    AddingFixedFeatures,
    GeneratingFeatures,
    DescribingSetup,
    SetupComplete,
    SetupFail,
    // round
    InProgress,
    RoundPrompting,
    JudgingActions,
    ApplyingEffects,
    DescribingResults,
    RoundComplete,
    RoundFail,
}

impl RoundPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundPhase::Idle => "idle",
            RoundPhase::CreatingRound => "creating_round",
            RoundPhase::AddingFixedFeatures => "adding_fixed_features",
            RoundPhase::GeneratingFeatures => "generating_features",
            RoundPhase::DescribingSetup => "describing_setup",
            RoundPhase::SetupComplete => "setup_complete",
            RoundPhase::SetupFail => "setup_fail",
            RoundPhase::InProgress => "in_progress",
            RoundPhase::RoundPrompting => "round_prompting",
            RoundPhase::JudgingActions => "judging_actions",
            RoundPhase::ApplyingEffects => "applying_effects",
            RoundPhase::DescribingResults => "describing_results",
            RoundPhase::RoundComplete => "round_complete",
            RoundPhase::RoundFail => "round_fail",
        }
    }
}

impl std::fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContestRound {
    pub id: RoundId,
    pub contest_id: ContestId,
    pub round_no: i32,
    pub narrative: String,
    pub ending_narrative: String,
    pub state: RoundPhase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContestRound {
    pub fn new(contest_id: ContestId, round_no: i32, state: RoundPhase) -> Self {
        let now = Utc::now();
        Self {
            id: RoundId::new(),
            contest_id,
            round_no,
            narrative: String::new(),
            ending_narrative: String::new(),
            state,
            created_at: now,
            updated_at: now,
        }
    }
}
