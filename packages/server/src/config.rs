use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub nats_url: String,
    /// Substituted for `$ARENA$` in job urls.
    pub arena_base_url: String,
    pub http_timeout: Duration,
    pub malformed_payload_dir: PathBuf,
    pub scheduler: SchedulerConfig,
    pub agent: AgentConfig,
}

/// Polling loop settings for the request service.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    /// Upper bound on concurrently running poll executions.
    pub max_in_flight: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            max_in_flight: 4,
        }
    }
}

/// Settings for agent exchanges and contest rules.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub reply_timeout: Duration,
    /// A player must score strictly more than this to win.
    pub win_score: i32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(120),
            win_score: 100,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            nats_url: env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string()),
            arena_base_url: env::var("ARENA_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            http_timeout: Duration::from_secs(parse_var("HTTP_TIMEOUT_SECS", 30)?),
            malformed_payload_dir: env::var("MALFORMED_PAYLOAD_DIR")
                .unwrap_or_else(|_| "./malformed_payloads".to_string())
                .into(),
            scheduler: SchedulerConfig {
                poll_interval: Duration::from_millis(parse_var("SCHEDULER_POLL_INTERVAL_MS", 250)?),
                max_in_flight: parse_var("SCHEDULER_MAX_IN_FLIGHT", 4)?,
            },
            agent: AgentConfig {
                reply_timeout: Duration::from_secs(parse_var("AGENT_REPLY_TIMEOUT_SECS", 120)?),
                win_score: parse_var("WIN_SCORE", 100)?,
            },
        })
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .ok()
            .with_context(|| format!("{} must be a valid number", name)),
        Err(_) => Ok(default),
    }
}
