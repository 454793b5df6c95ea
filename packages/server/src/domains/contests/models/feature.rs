use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::common::{ArenaId, FeatureId, RoundId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "feature_origin", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FeatureOrigin {
    /// Defined on the arena, copied into every contest.
    #[default]
    Required,
    /// Generated by the arena agent during setup.
    Random,
}

/// A feature defined on an arena.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct ArenaFeature {
    #[builder(default = FeatureId::new())]
    pub id: FeatureId,
    pub arena_id: ArenaId,
    pub name: String,
    #[builder(default)]
    pub description: String,
    pub position: String,
    #[builder(default)]
    pub origin: FeatureOrigin,
}

/// A feature on the map of one round.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    #[builder(default = FeatureId::new())]
    pub id: FeatureId,
    pub round_id: RoundId,
    pub name: String,
    #[builder(default)]
    pub description: String,
    pub position: String,
    #[builder(default)]
    pub origin: FeatureOrigin,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
}

impl Feature {
    /// Copy an arena feature onto a round.
    pub fn from_arena(round_id: RoundId, feature: &ArenaFeature) -> Self {
        Self::builder()
            .round_id(round_id)
            .name(feature.name.clone())
            .description(feature.description.clone())
            .position(feature.position.clone())
            .origin(feature.origin)
            .build()
    }

    /// Copy of this feature for the next round.
    pub fn carry_to(&self, round_id: RoundId) -> Self {
        Self {
            id: FeatureId::new(),
            round_id,
            created_at: Utc::now(),
            ..self.clone()
        }
    }
}
