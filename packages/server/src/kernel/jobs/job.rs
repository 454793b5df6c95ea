//! Job model for the request queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::common::{now_millis, JobHistoryId, JobId};

// ============================================================================
// Enums
// ============================================================================

/// How a job is dispatched when it is picked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_method", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum JobMethod {
    #[default]
    Get,
    Post,
    /// Publish `data` on `channel`, no reply expected.
    Message,
    /// Batch finalization, no I/O.
    Final,
}

impl JobMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobMethod::Get => "GET",
            JobMethod::Post => "POST",
            JobMethod::Message => "MESSAGE",
            JobMethod::Final => "FINAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Idle,
    Request,
    Complete,
    Fail,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Complete | JobState::Fail)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Request => "request",
            JobState::Complete => "complete",
            JobState::Fail => "fail",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Job Model
// ============================================================================

/// A unit of scheduled work. Timestamps other than `created_at` are epoch
/// milliseconds, with `0` meaning "not yet".
#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = JobId::new())]
    pub id: JobId,

    /// Owning batch, if this job is a batch child.
    #[builder(default, setter(strip_option))]
    pub parent_id: Option<JobId>,

    /// Reply / notify subject.
    #[builder(default)]
    pub channel: String,
    #[builder(default)]
    pub data: String,
    #[builder(default)]
    pub method: JobMethod,
    #[builder(default)]
    pub url: String,
    #[builder(default = 0)]
    pub priority: i32,

    /// Earliest dequeue time.
    #[builder(default = now_millis())]
    pub send_at: i64,
    #[builder(default)]
    pub state: JobState,
    #[builder(default = 0)]
    pub started_at: i64,
    #[builder(default = 0)]
    pub finished_at: i64,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Fire-and-forget publish of `data` on `channel`.
    pub fn message(channel: impl Into<String>, data: impl Into<String>) -> Self {
        Self::builder()
            .channel(channel)
            .data(data)
            .method(JobMethod::Message)
            .build()
    }

    /// HTTP-style request.
    pub fn request(method: JobMethod, url: impl Into<String>) -> Self {
        Self::builder().method(method).url(url).build()
    }

    /// Eligible for dequeue at `now`.
    pub fn is_due(&self, now: i64) -> bool {
        self.state == JobState::Idle && self.send_at <= now
    }

    /// Whether a final response can be published for this job.
    pub fn has_reply_topic(&self) -> bool {
        !self.channel.is_empty() && self.method != JobMethod::Message
    }
}

/// One row per job state transition.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct JobHistory {
    pub id: JobHistoryId,
    pub job_id: JobId,
    pub from_state: JobState,
    pub to_state: JobState,
    pub message: String,
    pub data: String,
    pub created_at: DateTime<Utc>,
}

impl JobHistory {
    pub fn new(
        job_id: JobId,
        from_state: JobState,
        to_state: JobState,
        message: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            id: JobHistoryId::new(),
            job_id,
            from_state,
            to_state,
            message: message.into(),
            data: data.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let job = Job::builder().url("http://x/1").build();
        assert_eq!(job.state, JobState::Idle);
        assert_eq!(job.method, JobMethod::Get);
        assert_eq!(job.started_at, 0);
        assert_eq!(job.finished_at, 0);
        assert!(job.parent_id.is_none());
        assert!(job.send_at > 0);
    }

    #[test]
    fn due_only_when_idle_and_past_send_at() {
        let mut job = Job::builder().send_at(100i64).build();
        assert!(!job.is_due(99));
        assert!(job.is_due(100));
        job.state = JobState::Request;
        assert!(!job.is_due(1000));
    }

    #[test]
    fn message_jobs_have_no_reply_topic() {
        assert!(!Job::message("a.b", "x").has_reply_topic());
        let batch = Job::builder()
            .channel("arena.contest.c1.role_call")
            .method(JobMethod::Final)
            .build();
        assert!(batch.has_reply_topic());
        assert!(!Job::request(JobMethod::Get, "http://x").has_reply_topic());
    }

    #[test]
    fn enums_serialize_like_the_database() {
        assert_eq!(serde_json::to_string(&JobMethod::Final).unwrap(), "\"FINAL\"");
        assert_eq!(serde_json::to_string(&JobState::Complete).unwrap(), "\"complete\"");
    }
}
