//! Client for the external analytics warehouse that holds the authoritative
//! record counts.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::config;
use crate::error::{Error, Result};

/// One `(site, uid)` group from the warehouse response.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ExpectedCountRow {
    pub site: i64,
    #[serde(alias = "SecondaryId")]
    pub uid: String,
    #[serde(alias = "expectedCount")]
    pub expected_count: i64,
}

#[async_trait]
pub trait AnalyticsService: Send + Sync {
    /// Run a SQL statement against the warehouse and return the grouped
    /// count rows.
    async fn expected_counts(&self, statement: &str) -> Result<Vec<ExpectedCountRow>>;
}

#[derive(Clone)]
pub struct HttpAnalyticsClient {
    http: Client,
    endpoint_url: String,
    token: String,
}

impl fmt::Debug for HttpAnalyticsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpAnalyticsClient")
            .field("endpoint_url", &self.endpoint_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    rows: Vec<ExpectedCountRow>,
}

impl HttpAnalyticsClient {
    pub fn from_config(cfg: &config::Analytics) -> Self {
        let http = Client::builder()
            .user_agent("muse-queue/0.1")
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client");
        Self {
            http,
            endpoint_url: cfg.endpoint_url.clone(),
            token: cfg.token.clone(),
        }
    }
}

#[async_trait]
impl AnalyticsService for HttpAnalyticsClient {
    async fn expected_counts(&self, statement: &str) -> Result<Vec<ExpectedCountRow>> {
        debug!(statement, "running warehouse statement");
        let res = self
            .http
            .post(&self.endpoint_url)
            .header("Authorization", format!("Bearer {}", self.token))
            .json(&json!({ "statement": statement }))
            .send()
            .await
            .map_err(|e| Error::Analytics(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(Error::Analytics(format!("warehouse returned {status}: {body}")));
        }

        let payload: QueryResponse = res
            .json()
            .await
            .map_err(|e| Error::Analytics(format!("invalid warehouse response: {e}")))?;
        Ok(payload.rows)
    }
}
