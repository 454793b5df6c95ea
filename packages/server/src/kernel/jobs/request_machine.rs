//! Per-job request protocol.
//!
//! ```text
//! idle ──dispatch──► request ──┬─ succeeded ─► complete
//!                              ├─ failed ────► fail
//!                              └─ pending ───► waiting   (requeue after delay)
//! ```
//!
//! `MESSAGE` jobs publish their data and complete. `FINAL` jobs (batch
//! parents) complete without I/O; the queue publishes the aggregated
//! response. `GET`/`POST` jobs perform one exchange and classify the reply
//! envelope.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use super::envelope::{ReplyEnvelope, ReplyState};
use super::job::{Job, JobMethod};
use crate::common::{JobId, PayloadArchive};
use crate::kernel::nats::MessageBroker;
use crate::kernel::{BaseHttpClient, HttpVerb};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Request,
    Complete,
    Fail,
    Waiting,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Complete | RequestState::Fail | RequestState::Waiting
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestEvent {
    Dispatch,
    Succeeded,
    Failed,
    Pending,
}

fn transition(state: RequestState, event: RequestEvent) -> Option<RequestState> {
    use RequestEvent::*;
    use RequestState::*;

    match (state, event) {
        (Idle, Dispatch) => Some(Request),
        (Request, Succeeded) => Some(Complete),
        (Request, Failed) => Some(Fail),
        (Request, Pending) => Some(Waiting),
        _ => None,
    }
}

/// Where a job run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    Complete { message: String, data: String },
    Fail { message: String },
    Waiting { message: String, delay_ms: i64 },
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unparseable reply")]
    Malformed { raw: String },
}

/// Collaborators a request needs.
#[derive(Clone)]
pub struct RequestContext {
    pub http: Arc<dyn BaseHttpClient>,
    pub broker: Arc<dyn MessageBroker>,
    /// Substituted for `$ARENA$`.
    pub base_url: String,
    pub archive: PayloadArchive,
}

pub struct RequestMachine<'a> {
    job: &'a Job,
    ctx: &'a RequestContext,
    state: RequestState,
}

impl<'a> RequestMachine<'a> {
    pub fn new(job: &'a Job, ctx: &'a RequestContext) -> Self {
        Self {
            job,
            ctx,
            state: RequestState::Idle,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    fn fire(&mut self, event: RequestEvent) {
        match transition(self.state, event) {
            Some(next) => {
                debug!(job_id = %self.job.id, from = ?self.state, to = ?next, "request transition");
                self.state = next;
            }
            None => {
                warn!(job_id = %self.job.id, state = ?self.state, event = ?event, "invalid request transition");
            }
        }
    }

    /// Drive the job to a terminal state.
    pub async fn run(mut self) -> RequestOutcome {
        self.fire(RequestEvent::Dispatch);

        match self.perform().await {
            Ok(outcome @ RequestOutcome::Complete { .. }) => {
                self.fire(RequestEvent::Succeeded);
                outcome
            }
            Ok(outcome @ RequestOutcome::Waiting { .. }) => {
                self.fire(RequestEvent::Pending);
                outcome
            }
            Ok(RequestOutcome::Fail { message }) => {
                self.fire(RequestEvent::Failed);
                RequestOutcome::Fail { message }
            }
            Err(RequestError::Malformed { raw }) => {
                self.ctx
                    .archive
                    .store(&format!("job-{}", self.job.id), &raw)
                    .await;
                self.fire(RequestEvent::Failed);
                RequestOutcome::Fail {
                    message: "unparseable reply".to_string(),
                }
            }
            Err(e) => {
                warn!(job_id = %self.job.id, url = %self.job.url, error = %e, "request failed");
                self.fire(RequestEvent::Failed);
                RequestOutcome::Fail {
                    message: e.to_string(),
                }
            }
        }
    }

    async fn perform(&self) -> Result<RequestOutcome, RequestError> {
        let verb = match self.job.method {
            JobMethod::Message => {
                self.ctx
                    .broker
                    .publish(self.job.channel.clone(), Bytes::from(self.job.data.clone()))
                    .await
                    .map_err(|e| RequestError::Transport(format!("{:#}", e)))?;
                return Ok(RequestOutcome::Complete {
                    message: "sent".to_string(),
                    data: String::new(),
                });
            }
            JobMethod::Final => {
                return Ok(RequestOutcome::Complete {
                    message: "batch complete".to_string(),
                    data: String::new(),
                });
            }
            JobMethod::Get => HttpVerb::Get,
            JobMethod::Post => HttpVerb::Post,
        };

        let url = resolve_url(&self.job.url, &self.ctx.base_url, self.job.id);
        let body = (verb == HttpVerb::Post).then_some(self.job.data.as_str());
        let reply = self
            .ctx
            .http
            .send(verb, &url, body)
            .await
            .map_err(|e| RequestError::Transport(format!("{:#}", e)))?;

        classify(&reply)
    }
}

/// Substitute `$ARENA$` then `$JOB$`.
pub fn resolve_url(url: &str, base_url: &str, job_id: JobId) -> String {
    url.replace("$ARENA$", base_url.trim_end_matches('/'))
        .replace("$JOB$", &job_id.to_string())
}

/// Map a reply body to an outcome.
pub fn classify(reply: &str) -> Result<RequestOutcome, RequestError> {
    let envelope = ReplyEnvelope::parse(reply).ok_or_else(|| RequestError::Malformed {
        raw: reply.to_string(),
    })?;

    Ok(match envelope.state {
        ReplyState::Complete => RequestOutcome::Complete {
            message: envelope.message,
            data: envelope.data,
        },
        ReplyState::Pending => RequestOutcome::Waiting {
            message: envelope.message,
            delay_ms: envelope.delay,
        },
        ReplyState::Fail => RequestOutcome::Fail {
            message: envelope.message,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::nats::TestBroker;
    use crate::kernel::test_dependencies::MockHttpClient;

    fn context(http: MockHttpClient, broker: Arc<TestBroker>, dir: &std::path::Path) -> RequestContext {
        RequestContext {
            http: Arc::new(http),
            broker,
            base_url: "http://arena.local/".to_string(),
            archive: PayloadArchive::new(dir),
        }
    }

    #[test]
    fn placeholders_are_substituted() {
        let id = JobId::new();
        assert_eq!(
            resolve_url("$ARENA$/jobs/$JOB$", "http://arena.local/", id),
            format!("http://arena.local/jobs/{}", id)
        );
    }

    #[test]
    fn only_legal_transitions() {
        assert_eq!(
            transition(RequestState::Idle, RequestEvent::Dispatch),
            Some(RequestState::Request)
        );
        assert_eq!(transition(RequestState::Idle, RequestEvent::Succeeded), None);
        assert_eq!(transition(RequestState::Complete, RequestEvent::Failed), None);
    }

    #[tokio::test]
    async fn message_jobs_publish_and_complete() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(TestBroker::new());
        let ctx = context(MockHttpClient::new(), broker.clone(), dir.path());
        let job = Job::message("agent.p1.player_action.request.j1", "{}");

        let outcome = RequestMachine::new(&job, &ctx).run().await;
        assert!(matches!(outcome, RequestOutcome::Complete { .. }));
        assert!(broker.was_published("agent.p1.player_action.request.j1"));
    }

    #[tokio::test]
    async fn reply_states_are_classified() {
        let dir = tempfile::tempdir().unwrap();
        let http = MockHttpClient::new()
            .with_response("/ok", r#"{"state":"complete","message":"fine","data":{"v":1}}"#)
            .with_response("/later", r#"{"state":"pending","delay":500}"#)
            .with_response("/no", r#"{"state":"fail","message":"refused"}"#)
            .with_response("/junk", "<html>oops</html>")
            .with_error("/down", "connection reset");
        let ctx = context(http, Arc::new(TestBroker::new()), dir.path());

        let run = |url: &str| {
            let job = Job::request(JobMethod::Get, url);
            let ctx = ctx.clone();
            async move { RequestMachine::new(&job, &ctx).run().await }
        };

        assert_eq!(
            run("http://a/ok").await,
            RequestOutcome::Complete {
                message: "fine".into(),
                data: r#"{"v":1}"#.into()
            }
        );
        assert_eq!(
            run("http://a/later").await,
            RequestOutcome::Waiting {
                message: String::new(),
                delay_ms: 500
            }
        );
        assert_eq!(
            run("http://a/no").await,
            RequestOutcome::Fail {
                message: "refused".into()
            }
        );
        assert!(matches!(run("http://a/down").await, RequestOutcome::Fail { .. }));
        assert!(matches!(run("http://a/junk").await, RequestOutcome::Fail { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn post_sends_job_data_to_resolved_url() {
        let dir = tempfile::tempdir().unwrap();
        let http = Arc::new(MockHttpClient::new().with_response("/hook", r#"{"state":"complete"}"#));
        let ctx = RequestContext {
            http: http.clone(),
            broker: Arc::new(TestBroker::new()),
            base_url: "http://arena.local".to_string(),
            archive: PayloadArchive::new(dir.path()),
        };
        let job = Job::builder()
            .method(JobMethod::Post)
            .url("$ARENA$/hook/$JOB$")
            .data(r#"{"x":1}"#)
            .build();

        RequestMachine::new(&job, &ctx).run().await;

        let calls = http.calls();
        assert_eq!(calls[0].url, format!("http://arena.local/hook/{}", job.id));
        assert_eq!(calls[0].body.as_deref(), Some(r#"{"x":1}"#));
    }
}
