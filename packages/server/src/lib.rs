// Arena orchestrator - core library
//
// Runs multi-round contests between remote agents over a message bus, with a
// durable job queue underneath and every step persisted for resumption.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;
