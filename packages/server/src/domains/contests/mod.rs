//! Contests domain - arenas, participants, rounds and the lifecycle machines
//! that drive them.

pub mod error;
pub mod machines;
pub mod models;
pub mod store;
pub mod supervisor;
pub mod view;

pub use error::{ContestError, ContestResult};
pub use machines::{
    ContestHandle, ContestMachine, ContestTrigger, RoundMachine, RoundState, SetupMachine,
    SetupState,
};
pub use models::*;
pub use store::{ContestStore, MemoryContestStore, PostgresContestStore};
pub use supervisor::ContestSupervisor;
pub use view::ContestView;
