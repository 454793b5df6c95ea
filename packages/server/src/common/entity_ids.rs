//! Typed ID definitions for all persisted entities.
//!
//! The marker types are never instantiated; they only tag `Id<T>` so ids of
//! different entities cannot be mixed up.

pub use super::id::Id;

// ============================================================================
// Entity marker types
// ============================================================================

/// Marker for queued jobs.
pub struct JobEntity;

/// Marker for job history rows.
pub struct JobHistoryEntity;

/// Marker for contests.
pub struct ContestEntity;

/// Marker for contest rounds.
pub struct RoundEntity;

/// Marker for remote agents (players, judges, announcers, arena agents).
pub struct ParticipantEntity;

/// Marker for arenas.
pub struct ArenaEntity;

/// Marker for arena and round map features.
pub struct FeatureEntity;

/// Marker for per-round player states.
pub struct PlayerStateEntity;

/// Marker for player actions.
pub struct PlayerActionEntity;

/// Marker for judge results.
pub struct JudgeResultEntity;

// ============================================================================
// Type aliases - the primary API
// ============================================================================

pub type JobId = Id<JobEntity>;
pub type JobHistoryId = Id<JobHistoryEntity>;
pub type ContestId = Id<ContestEntity>;
pub type RoundId = Id<RoundEntity>;
pub type ParticipantId = Id<ParticipantEntity>;
pub type ArenaId = Id<ArenaEntity>;
pub type FeatureId = Id<FeatureEntity>;
pub type PlayerStateId = Id<PlayerStateEntity>;
pub type PlayerActionId = Id<PlayerActionEntity>;
pub type JudgeResultId = Id<JudgeResultEntity>;
