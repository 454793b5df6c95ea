//! Queue service: dequeue, state transitions, batch resolution and final
//! responses.
//!
//! ```text
//! update_state(child, complete)
//!     ├─► commit job + history (compare-and-set on the previous state)
//!     ├─► publish final response on job.channel
//!     └─► revalidate_batch(parent)
//!             ├─► any child failed    → update_state(parent, fail)
//!             └─► all children done   → update_state(parent, idle)
//!                                         (picked up again, runs FINAL)
//! ```

use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info, warn};

use super::envelope::ReplyEnvelope;
use super::job::{Job, JobHistory, JobMethod, JobState};
use super::job_store::JobStore;
use crate::common::{now_millis, JobId};
use crate::kernel::nats::MessageBroker;

/// Longest delay a pending reply may ask for (one hour).
pub const MAX_REQUEUE_DELAY_MS: i64 = 60 * 60 * 1000;

pub struct QueueService {
    store: Arc<dyn JobStore>,
    broker: Arc<dyn MessageBroker>,
}

impl QueueService {
    pub fn new(store: Arc<dyn JobStore>, broker: Arc<dyn MessageBroker>) -> Self {
        Self { store, broker }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Enqueue a job. Only `idle` and `request` (batch parents) are accepted
    /// as initial states; anything else is reset to `idle`.
    pub async fn add(&self, mut job: Job) -> Result<Job> {
        job.started_at = 0;
        job.finished_at = 0;
        if job.state.is_terminal() {
            job.state = JobState::Idle;
        }
        let job = self.store.insert(job).await?;
        debug!(job_id = %job.id, method = job.method.as_str(), channel = %job.channel, "job added");
        Ok(job)
    }

    /// Enqueue a batch whose final response is published on `channel` once
    /// every child has finished. The parent starts in `request` so it is not
    /// picked up before then.
    pub async fn add_batch(
        &self,
        channel: impl Into<String>,
        children: Vec<Job>,
    ) -> Result<(Job, Vec<Job>)> {
        let batch = Job::builder()
            .channel(channel)
            .method(JobMethod::Final)
            .state(JobState::Request)
            .build();

        let children = children
            .into_iter()
            .map(|mut child| {
                child.parent_id = Some(batch.id);
                child.state = JobState::Idle;
                child.started_at = 0;
                child.finished_at = 0;
                child
            })
            .collect();

        let (batch, children) = self.store.insert_batch(batch, children).await?;
        info!(batch_id = %batch.id, children = children.len(), channel = %batch.channel, "batch added");
        Ok((batch, children))
    }

    /// Oldest due idle job, now in `request`. Never blocks.
    pub async fn get_next(&self) -> Result<Option<Job>> {
        self.store.claim_next(now_millis()).await
    }

    /// Move a job to `state`. Returns `None` if the job does not exist or
    /// was changed concurrently.
    pub async fn update_state(
        &self,
        job_id: JobId,
        state: JobState,
        message: &str,
        data: Option<String>,
        delay_ms: i64,
    ) -> Result<Option<Job>> {
        let Some(current) = self.store.find(job_id).await? else {
            debug!(job_id = %job_id, "update for unknown job ignored");
            return Ok(None);
        };

        let now = now_millis();
        let mut next = current.clone();
        next.state = state;
        match state {
            JobState::Complete | JobState::Fail => next.finished_at = now,
            JobState::Request if next.started_at == 0 => next.started_at = now,
            JobState::Idle => {
                next.send_at = now.saturating_add(delay_ms.clamp(0, MAX_REQUEUE_DELAY_MS))
            }
            JobState::Request => {}
        }

        let data = data.unwrap_or_default();
        let history = JobHistory::new(job_id, current.state, state, message, data.clone());

        let Some(job) = self
            .store
            .save_transition(&next, current.state, history)
            .await?
        else {
            debug!(job_id = %job_id, expected = %current.state, "job changed concurrently, update dropped");
            return Ok(None);
        };

        debug!(job_id = %job.id, from = %current.state, to = %job.state, "job state updated");

        if job.state.is_terminal() && job.has_reply_topic() {
            self.publish_final(&job, message, &data).await?;
        }

        if let Some(parent_id) = job.parent_id {
            self.revalidate_batch(parent_id).await?;
        }

        Ok(Some(job))
    }

    /// Put a job back to `idle`, due after `delay_ms`.
    pub async fn requeue(&self, job_id: JobId, message: &str, delay_ms: i64) -> Result<Option<Job>> {
        self.update_state(job_id, JobState::Idle, message, None, delay_ms)
            .await
    }

    /// Settle a batch from its children's states. A no-op unless the batch
    /// is still in `request`, so repeated calls are safe.
    pub fn revalidate_batch(&self, batch_id: JobId) -> BoxFuture<'_, Result<()>> {
        async move {
            let Some(batch) = self.store.find(batch_id).await? else {
                warn!(batch_id = %batch_id, "revalidate for unknown batch");
                return Ok(());
            };
            if batch.state != JobState::Request {
                return Ok(());
            }

            let children = self.store.children(batch_id).await?;
            if children.is_empty() {
                warn!(batch_id = %batch_id, "batch has no children, ignoring");
                return Ok(());
            }

            if children.iter().any(|c| c.state == JobState::Fail) {
                info!(batch_id = %batch_id, "batch child failed");
                self.update_state(batch_id, JobState::Fail, "child failed", None, 0)
                    .await?;
            } else if children.iter().all(|c| c.state == JobState::Complete) {
                info!(batch_id = %batch_id, "batch children complete");
                self.update_state(batch_id, JobState::Idle, "children complete", None, 0)
                    .await?;
            }
            Ok(())
        }
        .boxed()
    }

    async fn publish_final(&self, job: &Job, message: &str, data: &str) -> Result<()> {
        let mut envelope = ReplyEnvelope::for_job(job, message, data);

        if job.method == JobMethod::Final {
            let mut child_data = Vec::new();
            for child in self.store.children(job.id).await? {
                let latest = self.store.latest_history(child.id).await?;
                child_data.push(ReplyEnvelope::for_child(&child, latest.as_ref()));
            }
            envelope = envelope.with_children(child_data);
        }

        self.broker
            .publish(job.channel.clone(), Bytes::from(envelope.to_json()))
            .await?;
        debug!(job_id = %job.id, channel = %job.channel, state = %job.state, "final response published");
        Ok(())
    }
}
