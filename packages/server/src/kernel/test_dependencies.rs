// TestDependencies - mock implementations for testing
//
// Provides mock services that can be injected into ArenaDeps for tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use super::{ArenaDeps, BaseHttpClient, HttpVerb, TestBroker};
use crate::config::{AgentConfig, SchedulerConfig};
use crate::domains::contests::MemoryContestStore;
use crate::kernel::jobs::MemoryJobStore;

// =============================================================================
// Mock HTTP Client
// =============================================================================

/// A recorded request.
#[derive(Debug, Clone)]
pub struct HttpCall {
    pub verb: HttpVerb,
    pub url: String,
    pub body: Option<String>,
}

enum MockReply {
    Body(String),
    Error(String),
}

/// Scripted HTTP transport. Replies are matched on a url substring; the
/// first registered match wins. Unmatched urls fail like a refused
/// connection.
pub struct MockHttpClient {
    routes: Mutex<Vec<(String, MockReply)>>,
    calls: Mutex<Vec<HttpCall>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Reply with `body` to urls containing `pattern`
    pub fn with_response(self, pattern: &str, body: impl Into<String>) -> Self {
        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((pattern.to_string(), MockReply::Body(body.into())));
        self
    }

    /// Fail requests to urls containing `pattern`
    pub fn with_error(self, pattern: &str, error: impl Into<String>) -> Self {
        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((pattern.to_string(), MockReply::Error(error.into())));
        self
    }

    /// Answer every `/health` check with a complete envelope
    pub fn healthy(self) -> Self {
        self.with_response("/health", r#"{"state":"complete","message":"ok"}"#)
    }

    pub fn calls(&self) -> Vec<HttpCall> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn was_called_with(&self, text: &str) -> bool {
        self.calls().iter().any(|c| c.url.contains(text))
    }
}

impl Default for MockHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseHttpClient for MockHttpClient {
    async fn send(&self, verb: HttpVerb, url: &str, body: Option<&str>) -> Result<String> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(HttpCall {
                verb,
                url: url.to_string(),
                body: body.map(str::to_string),
            });

        let routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        match routes.iter().find(|(pattern, _)| url.contains(pattern.as_str())) {
            Some((_, MockReply::Body(body))) => Ok(body.clone()),
            Some((_, MockReply::Error(error))) => Err(anyhow!("{}", error)),
            None => Err(anyhow!("connection refused: {}", url)),
        }
    }
}

// =============================================================================
// TestDependencies - Builder for test dependencies
// =============================================================================

#[derive(Clone)]
pub struct TestDependencies {
    pub http: Arc<MockHttpClient>,
    pub broker: Arc<TestBroker>,
    pub jobs: Arc<MemoryJobStore>,
    pub contests: Arc<MemoryContestStore>,
    pub scheduler: SchedulerConfig,
    pub agent: AgentConfig,
    pub malformed_payload_dir: PathBuf,
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            http: Arc::new(MockHttpClient::new().healthy()),
            broker: Arc::new(TestBroker::new()),
            jobs: Arc::new(MemoryJobStore::new()),
            contests: Arc::new(MemoryContestStore::new()),
            scheduler: SchedulerConfig {
                poll_interval: std::time::Duration::from_millis(10),
                max_in_flight: 4,
            },
            agent: AgentConfig {
                reply_timeout: std::time::Duration::from_secs(5),
                ..AgentConfig::default()
            },
            malformed_payload_dir: std::env::temp_dir().join("arena-malformed-payloads"),
        }
    }

    /// Set a mock HTTP client
    pub fn mock_http(mut self, http: MockHttpClient) -> Self {
        self.http = Arc::new(http);
        self
    }

    /// Set a seeded contest store
    pub fn contests(mut self, contests: MemoryContestStore) -> Self {
        self.contests = Arc::new(contests);
        self
    }

    pub fn agent_config(mut self, agent: AgentConfig) -> Self {
        self.agent = agent;
        self
    }

    pub fn malformed_payload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.malformed_payload_dir = dir.into();
        self
    }

    /// Convert into ArenaDeps for testing
    pub fn into_deps(self) -> Arc<ArenaDeps> {
        Arc::new(ArenaDeps::new(
            self.jobs,
            self.contests,
            self.broker,
            self.http,
            "http://arena.test".to_string(),
            self.malformed_payload_dir,
            self.scheduler,
            self.agent,
        ))
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}
