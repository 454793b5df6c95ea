//! Orchestrator dependencies (using traits for testability)
//!
//! This module provides the central dependency container shared by the
//! request service and every contest machine. All external services use
//! trait abstractions to enable testing.

use std::path::PathBuf;
use std::sync::Arc;

use super::agents::AgentGateway;
use super::jobs::{JobStore, QueueService, RequestContext, RequestService};
use super::nats::MessageBroker;
use super::BaseHttpClient;
use crate::common::PayloadArchive;
use crate::config::{AgentConfig, SchedulerConfig};
use crate::domains::contests::ContestStore;

// =============================================================================
// ArenaDeps
// =============================================================================

#[derive(Clone)]
pub struct ArenaDeps {
    pub jobs: Arc<dyn JobStore>,
    pub contests: Arc<dyn ContestStore>,
    pub broker: Arc<dyn MessageBroker>,
    pub http: Arc<dyn BaseHttpClient>,
    pub queue: Arc<QueueService>,
    pub agents: Arc<AgentGateway>,
    pub archive: PayloadArchive,
    /// Substituted for `$ARENA$` in job urls.
    pub arena_base_url: String,
    pub scheduler: SchedulerConfig,
    pub agent: AgentConfig,
}

impl ArenaDeps {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: Arc<dyn JobStore>,
        contests: Arc<dyn ContestStore>,
        broker: Arc<dyn MessageBroker>,
        http: Arc<dyn BaseHttpClient>,
        arena_base_url: String,
        malformed_payload_dir: PathBuf,
        scheduler: SchedulerConfig,
        agent: AgentConfig,
    ) -> Self {
        let archive = PayloadArchive::new(malformed_payload_dir);
        let queue = Arc::new(QueueService::new(jobs.clone(), broker.clone()));
        let agents = Arc::new(AgentGateway::new(
            queue.clone(),
            broker.clone(),
            archive.clone(),
            agent.reply_timeout,
        ));

        Self {
            jobs,
            contests,
            broker,
            http,
            queue,
            agents,
            archive,
            arena_base_url,
            scheduler,
            agent,
        }
    }

    /// Build the polling service that executes queued jobs.
    pub fn request_service(&self) -> RequestService {
        let ctx = RequestContext {
            http: self.http.clone(),
            broker: self.broker.clone(),
            base_url: self.arena_base_url.clone(),
            archive: self.archive.clone(),
        };
        RequestService::new(self.queue.clone(), ctx, self.scheduler.clone())
    }
}
