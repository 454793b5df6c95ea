mod action;
mod arena;
mod contest;
mod feature;
mod judge_result;
mod participant;
mod player_state;
mod position;
mod round;

pub use action::PlayerAction;
pub use arena::Arena;
pub use contest::{Contest, ContestState};
pub use feature::{ArenaFeature, Feature, FeatureOrigin};
pub use judge_result::JudgeResult;
pub use participant::{with_role, Participant, ParticipantRole};
pub use player_state::{PlayerState, DEFAULT_POSITION, STARTING_HEALTH};
pub use position::Position;
pub use round::{ContestRound, RoundPhase};
