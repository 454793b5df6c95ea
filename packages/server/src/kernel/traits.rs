// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
//
// Naming convention: Base* for trait names (e.g., BaseHttpClient)

use anyhow::Result;
use async_trait::async_trait;

// =============================================================================
// HTTP Trait (Infrastructure - request/reply against agent endpoints)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVerb {
    Get,
    Post,
}

impl HttpVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVerb::Get => "GET",
            HttpVerb::Post => "POST",
        }
    }
}

#[async_trait]
pub trait BaseHttpClient: Send + Sync {
    /// Perform one request and return the response body.
    ///
    /// Connection errors and non-success statuses are errors.
    async fn send(&self, verb: HttpVerb, url: &str, body: Option<&str>) -> Result<String>;
}
