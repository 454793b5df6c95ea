use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::common::ArenaId;

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Arena {
    #[builder(default = ArenaId::new())]
    pub id: ArenaId,
    pub name: String,
    #[builder(default)]
    pub description: String,
    #[builder(default = 10)]
    pub width: i32,
    #[builder(default = 10)]
    pub height: i32,
    /// Upper bound on generated features; `0` disables generation.
    #[builder(default = 0)]
    pub max_random_features: i32,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
}
