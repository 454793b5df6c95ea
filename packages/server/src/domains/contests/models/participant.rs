use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::common::ParticipantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "participant_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Player,
    Arena,
    Judge,
    Announcer,
}

impl std::fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ParticipantRole::Player => "player",
            ParticipantRole::Arena => "arena",
            ParticipantRole::Judge => "judge",
            ParticipantRole::Announcer => "announcer",
        })
    }
}

/// An addressable remote agent.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Participant {
    #[builder(default = ParticipantId::new())]
    pub id: ParticipantId,
    pub name: String,
    pub role: ParticipantRole,
    /// Base url; health checks go to `<endpoint>/health`.
    pub endpoint: String,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
}

impl Participant {
    pub fn health_url(&self) -> String {
        format!("{}/health", self.endpoint.trim_end_matches('/'))
    }
}

/// Participants with `role`, keeping their order.
pub fn with_role(participants: &[Participant], role: ParticipantRole) -> Vec<&Participant> {
    participants.iter().filter(|p| p.role == role).collect()
}
