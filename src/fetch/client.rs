// src/fetch/client.rs

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};
use url::Url;

use super::{DataSource, DistributionQuery, ResultsQuery, TurnoutQuery};
use crate::config::Config;
use crate::error::{DashError, DashResult};
use crate::table::{DistributionTable, RawTable, ResultsTable, TurnoutTable};

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

struct Failure {
    error: DashError,
    retryable: bool,
}

/// HTTP client for the election results provider.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base: Url,
    retry: RetryPolicy,
}

impl ApiClient {
    /// `base` is the API stage root; endpoints are resolved relative to it.
    pub fn new(base: Url, timeout: Duration, retry: RetryPolicy) -> DashResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(DashError::config)?;
        Ok(Self {
            client,
            base: with_trailing_slash(base),
            retry,
        })
    }

    pub fn from_config(config: &Config) -> DashResult<Self> {
        Self::new(
            config.api_base()?,
            config.request_timeout(),
            config.retry_policy(),
        )
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Full request URL for `endpoint` with `params` as the query string.
    pub fn endpoint_url(&self, endpoint: &str, params: &[(&str, String)]) -> DashResult<Url> {
        let mut url = self
            .base
            .join(endpoint.trim_start_matches('/'))
            .map_err(|e| DashError::config(format!("bad endpoint {:?}: {}", endpoint, e)))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    async fn get_text_core(&self, url: &Url) -> Result<String, Failure> {
        debug!(%url, "GET");
        let resp = self.client.get(url.clone()).send().await.map_err(|e| {
            let reason = if e.is_timeout() {
                "timed out".to_string()
            } else {
                e.to_string()
            };
            Failure {
                error: DashError::network(url.as_str(), reason),
                retryable: true,
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Failure {
                error: DashError::network(url.as_str(), format!("HTTP {}", status)),
                retryable: is_transient(status),
            });
        }

        resp.text().await.map_err(|e| Failure {
            error: DashError::network(url.as_str(), format!("reading body: {}", e)),
            retryable: true,
        })
    }

    /// GET `url` as text, retrying transport errors and 5xx with backoff.
    pub async fn get_text(&self, url: &Url) -> DashResult<String> {
        let mut attempts = 0;
        loop {
            match self.get_text_core(url).await {
                Ok(text) => return Ok(text),
                Err(f) if f.retryable && attempts < self.retry.max_retries => {
                    attempts += 1;
                    let backoff = self.retry.backoff(attempts);
                    warn!(%url, attempt = attempts, delay_ms = backoff.as_millis() as u64, error = %f.error, "Retrying");
                    sleep(backoff).await;
                }
                Err(f) => {
                    error!(%url, attempts = attempts + 1, error = %f.error, "Giving up");
                    return Err(f.error);
                }
            }
        }
    }

    async fn get_table(
        &self,
        what: &str,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> DashResult<RawTable> {
        let url = self.endpoint_url(endpoint, params)?;
        let body = self.get_text(&url).await?;
        let table = RawTable::from_json(what, &body)?;
        debug!(
            endpoint,
            rows = table.len(),
            columns = table.headers.len(),
            "table fetched"
        );
        Ok(table)
    }
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[async_trait]
impl DataSource for ApiClient {
    #[instrument(level = "info", skip(self))]
    async fn fetch_results(&self, query: &ResultsQuery) -> DashResult<ResultsTable> {
        let raw = self
            .get_table("results table", "get_results", &query.params())
            .await?;
        ResultsTable::from_raw(raw)
    }

    #[instrument(level = "info", skip(self))]
    async fn fetch_turnout(&self, query: &TurnoutQuery) -> DashResult<TurnoutTable> {
        self.get_table("turnout table", "get_turnout", &query.params())
            .await
    }

    #[instrument(level = "debug", skip(self))]
    async fn fetch_distribution(&self, query: &DistributionQuery) -> DashResult<DistributionTable> {
        let what = format!("{} distribution", query.axis);
        let raw = self
            .get_table(&what, "get_distribution", &query.params())
            .await?;
        DistributionTable::from_raw(raw, query.axis, &query.metric)
    }
}
