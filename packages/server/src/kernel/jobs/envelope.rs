//! Reply envelope exchanged with agents and published as a job's final
//! response.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::job::{Job, JobHistory, JobState};
use crate::common::payload::parse_text;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyState {
    Pending,
    Complete,
    Fail,
}

impl From<JobState> for ReplyState {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Complete => ReplyState::Complete,
            JobState::Fail => ReplyState::Fail,
            JobState::Idle | JobState::Request => ReplyState::Pending,
        }
    }
}

/// `{jobId, channel, state, message, data, delay, url, childData?}`.
///
/// `data` is always carried as a string; a reply that puts structured JSON
/// there is accepted and re-serialized. `delay` is in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyEnvelope {
    #[serde(default, deserialize_with = "lenient_string")]
    pub job_id: String,
    #[serde(default)]
    pub channel: String,
    pub state: ReplyState,
    #[serde(default, deserialize_with = "lenient_string")]
    pub message: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub data: String,
    #[serde(default, deserialize_with = "lenient_delay")]
    pub delay: i64,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_data: Option<Vec<ReplyEnvelope>>,
}

impl ReplyEnvelope {
    /// Final response for a finished job.
    pub fn for_job(job: &Job, message: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            job_id: job.id.to_string(),
            channel: job.channel.clone(),
            state: job.state.into(),
            message: message.into(),
            data: data.into(),
            delay: 0,
            url: job.url.clone(),
            child_data: None,
        }
    }

    /// A child's entry in a batch response, built from its latest history row.
    pub fn for_child(child: &Job, latest: Option<&JobHistory>) -> Self {
        let (message, data) = latest
            .map(|h| (h.message.clone(), h.data.clone()))
            .unwrap_or_default();
        Self::for_job(child, message, data)
    }

    pub fn with_children(mut self, children: Vec<ReplyEnvelope>) -> Self {
        self.child_data = Some(children);
        self
    }

    /// Parse a reply, tolerating fences and surrounding prose.
    pub fn parse(raw: &str) -> Option<Self> {
        if let Ok(envelope) = serde_json::from_str::<Self>(raw) {
            return Some(envelope);
        }
        parse_text(raw).and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn is_success(&self) -> bool {
        self.state == ReplyState::Complete
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

fn lenient_delay<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
    .max(0))
}
