use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{BaseHttpClient, HttpVerb};

/// reqwest-backed HTTP transport for GET/POST jobs
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl BaseHttpClient for ReqwestHttpClient {
    async fn send(&self, verb: HttpVerb, url: &str, body: Option<&str>) -> Result<String> {
        let request = match verb {
            HttpVerb::Get => self.client.get(url),
            HttpVerb::Post => self
                .client
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.unwrap_or_default().to_string()),
        };

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send {} {}", verb.as_str(), url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} {} returned {}: {}", verb.as_str(), url, status, body);
        }

        response
            .text()
            .await
            .with_context(|| format!("Failed to read response from {}", url))
    }
}
