//! Durable request queue.
//!
//! This module provides the kernel-level job infrastructure:
//! - [`Job`] / [`JobHistory`] - job model and its append-only transition log
//! - [`JobStore`] - persistence ([`PostgresJobStore`], [`MemoryJobStore`])
//! - [`QueueService`] - dequeue, state transitions, batch resolution
//! - [`RequestMachine`] - per-job request/reply protocol
//! - [`RequestService`] - interval poller driving request machines
//!
//! # Architecture
//!
//! ```text
//! RequestService
//!     │
//!     ├─► QueueService.get_next()          (idle → request, FIFO)
//!     ├─► RequestMachine.run()             (MESSAGE | FINAL | GET | POST)
//!     └─► QueueService.update_state()      (commit, then publish final response)
//!             └─► revalidate_batch(parent) (children settled → parent idle/fail)
//! ```

mod envelope;
mod job;
mod job_store;
mod queue;
mod request_machine;
mod worker;

pub use envelope::{ReplyEnvelope, ReplyState};
pub use job::{Job, JobHistory, JobMethod, JobState};
pub use job_store::{JobStore, MemoryJobStore, PostgresJobStore};
pub use queue::{QueueService, MAX_REQUEUE_DELAY_MS};
pub use request_machine::{
    classify, resolve_url, RequestContext, RequestError, RequestMachine, RequestOutcome,
    RequestState,
};
pub use worker::RequestService;
