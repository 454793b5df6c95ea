//! Request service: polls the queue and drives one request machine per job.
//!
//! ```text
//! RequestService (interval tick)
//!     │
//!     ├─► permit from the in-flight semaphore (skip tick if none)
//!     └─► spawned poll task
//!             ├─► queue.get_next()
//!             ├─► RequestMachine::run()
//!             └─► complete → update_state(complete, data)
//!                 fail     → update_state(fail)
//!                 waiting  → requeue(delay)
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use super::job::JobState;
use super::queue::QueueService;
use super::request_machine::{RequestContext, RequestMachine, RequestOutcome};
use crate::config::SchedulerConfig;

pub struct RequestService {
    queue: Arc<QueueService>,
    ctx: RequestContext,
    config: SchedulerConfig,
    permits: Arc<Semaphore>,
}

impl RequestService {
    pub fn new(queue: Arc<QueueService>, ctx: RequestContext, config: SchedulerConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            queue,
            ctx,
            config,
            permits,
        }
    }

    /// Run at most one due job. Returns `false` when nothing was due.
    pub async fn poll_once(&self) -> Result<bool> {
        let Some(job) = self.queue.get_next().await? else {
            return Ok(false);
        };

        let span = info_span!("job", job_id = %job.id, method = job.method.as_str());
        async {
            let outcome = RequestMachine::new(&job, &self.ctx).run().await;
            debug!(outcome = ?outcome, "request finished");

            match outcome {
                RequestOutcome::Complete { message, data } => {
                    self.queue
                        .update_state(job.id, JobState::Complete, &message, Some(data), 0)
                        .await?;
                }
                RequestOutcome::Fail { message } => {
                    self.queue
                        .update_state(job.id, JobState::Fail, &message, None, 0)
                        .await?;
                }
                RequestOutcome::Waiting { message, delay_ms } => {
                    self.queue.requeue(job.id, &message, delay_ms).await?;
                }
            }
            Ok::<_, anyhow::Error>(true)
        }
        .instrument(span)
        .await
    }

    /// Poll on an interval until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_in_flight = self.config.max_in_flight,
            "request service starting"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                continue;
            };

            let service = Arc::clone(&self);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                while !shutdown.is_cancelled() {
                    match service.poll_once().await {
                        Ok(true) => continue,
                        Ok(false) => break,
                        Err(e) => {
                            error!(error = %e, "poll failed");
                            break;
                        }
                    }
                }
                drop(permit);
            });
        }

        // Wait for in-flight polls to finish
        let max = self.config.max_in_flight.max(1) as u32;
        match tokio::time::timeout(Duration::from_secs(30), self.permits.acquire_many(max)).await {
            Ok(_) => {}
            Err(_) => info!("timed out waiting for in-flight polls"),
        }

        info!("request service stopped");
        Ok(())
    }
}
