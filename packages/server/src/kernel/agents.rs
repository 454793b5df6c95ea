//! Single-shot request/reply exchanges with remote agents.
//!
//! The outbound request is a `MESSAGE` job on
//! `agent.<participant>.<prompt>.request.<job>`, so it is persisted and sent
//! by the request service like every other job. The reply is awaited on the
//! matching `response` subject, which is subscribed before the job is queued.
//! If the request job itself fails the exchange ends without waiting out the
//! reply timeout.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use super::jobs::{Job, JobMethod, JobState, QueueService, ReplyEnvelope, ReplyState};
use super::nats::MessageBroker;
use super::topics;
use crate::common::{unwrap_payload, JobId, ParticipantId, PayloadArchive};

/// How often a pending exchange checks whether its request job failed.
const DELIVERY_CHECK_INTERVAL: Duration = Duration::from_millis(200);

/// What an agent is being asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptType {
    GenerateFeatures,
    DescribeSetup,
    PlayerAction,
    JudgeAction,
    ApplyEffects,
    DescribeResults,
}

impl PromptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptType::GenerateFeatures => "generate_features",
            PromptType::DescribeSetup => "describe_setup",
            PromptType::PlayerAction => "player_action",
            PromptType::JudgeAction => "judge_action",
            PromptType::ApplyEffects => "apply_effects",
            PromptType::DescribeResults => "describe_results",
        }
    }
}

impl std::fmt::Display for PromptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent {participant} did not answer {prompt} within {seconds}s")]
    Timeout {
        participant: ParticipantId,
        prompt: PromptType,
        seconds: u64,
    },

    #[error("agent {participant} failed {prompt}: {message}")]
    Rejected {
        participant: ParticipantId,
        prompt: PromptType,
        message: String,
    },

    #[error("{prompt} request to agent {participant} was not delivered: {message}")]
    Undelivered {
        participant: ParticipantId,
        prompt: PromptType,
        message: String,
    },

    #[error("agent {participant} sent an undecodable {prompt} reply")]
    Malformed {
        participant: ParticipantId,
        prompt: PromptType,
    },

    #[error("reply subscription closed")]
    Closed,

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

pub struct AgentGateway {
    queue: Arc<QueueService>,
    broker: Arc<dyn MessageBroker>,
    archive: PayloadArchive,
    reply_timeout: Duration,
}

impl AgentGateway {
    pub fn new(
        queue: Arc<QueueService>,
        broker: Arc<dyn MessageBroker>,
        archive: PayloadArchive,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            broker,
            archive,
            reply_timeout,
        }
    }

    /// Ask for a structured reply.
    pub async fn ask(
        &self,
        participant: ParticipantId,
        prompt: PromptType,
        body: &Value,
    ) -> Result<Value, AgentError> {
        let raw = self.exchange(participant, prompt, body).await?;
        match unwrap_payload(&raw) {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(participant_id = %participant, prompt = %prompt, reason = %e.reason, "malformed agent reply");
                self.archive
                    .store(&format!("{}-{}", prompt, participant), &raw)
                    .await;
                Err(AgentError::Malformed {
                    participant,
                    prompt,
                })
            }
        }
    }

    /// Ask for prose. Plain text replies are accepted as-is; structured
    /// replies are searched for a `narrative`, `text`, `description` or
    /// `content` field.
    pub async fn ask_text(
        &self,
        participant: ParticipantId,
        prompt: PromptType,
        body: &Value,
    ) -> Result<String, AgentError> {
        let raw = self.exchange(participant, prompt, body).await?;
        let text = match unwrap_payload(&raw) {
            Ok(Value::String(text)) => Some(text),
            Ok(Value::Object(map)) => ["narrative", "text", "description", "content"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .map(str::to_string),
            Ok(_) => None,
            Err(_) => Some(raw.trim().to_string()),
        };

        match text.filter(|t| !t.trim().is_empty()) {
            Some(text) => Ok(text),
            None => {
                self.archive
                    .store(&format!("{}-{}", prompt, participant), &raw)
                    .await;
                Err(AgentError::Malformed {
                    participant,
                    prompt,
                })
            }
        }
    }

    /// Send the request and return the raw reply (the envelope's `data` when
    /// the agent answered with an envelope).
    async fn exchange(
        &self,
        participant: ParticipantId,
        prompt: PromptType,
        body: &Value,
    ) -> Result<String, AgentError> {
        let job_id = JobId::new();
        let request = topics::agent_request(participant, prompt.as_str(), job_id);
        let response = topics::agent_response(participant, prompt.as_str(), job_id);

        let mut subscription = self.broker.subscribe(response).await?;

        let job = Job::builder()
            .id(job_id)
            .channel(request)
            .data(body.to_string())
            .method(JobMethod::Message)
            .build();
        self.queue.add(job).await?;
        debug!(job_id = %job_id, participant_id = %participant, prompt = %prompt, "agent request queued");

        let wait = async {
            loop {
                let Some(message) = subscription.next().await else {
                    return Err(AgentError::Closed);
                };
                let text = message.text();
                let Some(envelope) = ReplyEnvelope::parse(&text) else {
                    return Ok(text);
                };
                match envelope.state {
                    ReplyState::Pending => {
                        debug!(job_id = %job_id, "agent reply pending");
                        continue;
                    }
                    ReplyState::Fail => {
                        return Err(AgentError::Rejected {
                            participant,
                            prompt,
                            message: envelope.message,
                        })
                    }
                    ReplyState::Complete => return Ok(envelope.data),
                }
            }
        };

        let outcome = async {
            tokio::select! {
                reply = wait => reply,
                message = self.delivery_failure(job_id) => Err(AgentError::Undelivered {
                    participant,
                    prompt,
                    message,
                }),
            }
        };

        tokio::time::timeout(self.reply_timeout, outcome)
            .await
            .map_err(|_| AgentError::Timeout {
                participant,
                prompt,
                seconds: self.reply_timeout.as_secs(),
            })?
    }

    /// Resolves with the failure message once the request job has failed.
    /// Never resolves while the job is still queued or was sent.
    async fn delivery_failure(&self, job_id: JobId) -> String {
        let store = self.queue.store();
        let mut interval = tokio::time::interval(DELIVERY_CHECK_INTERVAL);
        loop {
            interval.tick().await;
            match store.find(job_id).await {
                Ok(Some(job)) if job.state == JobState::Fail => {
                    let history = store.latest_history(job_id).await.ok().flatten();
                    return history
                        .map(|h| h.message)
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| "request job failed".to_string());
                }
                Ok(Some(job)) if job.state == JobState::Complete => {
                    return std::future::pending().await;
                }
                Ok(_) => {}
                Err(e) => debug!(job_id = %job_id, error = %e, "delivery check failed"),
            }
        }
    }
}
