//! ==============================================================================
//! poller.rs - result source fan-out
//! ==============================================================================
//!
//! one GET per configured source, all in flight at once, joined before the
//! batch moves on. every request carries the same timeout, so a cycle takes
//! about as long as the slowest source that answers in time.
//!
//! a source that fails (dial, status, timeout, bad json) is logged and adds
//! nothing; the others are unaffected.
//!
//! ==============================================================================

use futures::future::join_all;
use std::time::Duration;

use crate::config::{FurnaceConfig, SourceConfig};
use crate::domain::{ResultDocument, SampleResult};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("request error: {0}")]
    Status(reqwest::StatusCode),
    #[error("malformed result document: {0}")]
    Decode(#[from] serde_json::Error),
}

pub struct Poller {
    client: reqwest::Client,
    sources: Vec<SourceConfig>,
    furnace_names: Vec<String>,
}

impl Poller {
    pub fn new(
        sources: Vec<SourceConfig>,
        furnaces: &[FurnaceConfig],
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            sources,
            furnace_names: furnaces.iter().map(|f| f.name.clone()).collect(),
        })
    }

    /// Fetch every source and merge, newest first.
    ///
    /// `None` when every source failed, so the cycle can be skipped.
    pub async fn poll(&self) -> Option<Vec<SampleResult>> {
        let fetches = self.sources.iter().map(|source| async move {
            match self.fetch(source).await {
                Ok(results) => Some(results),
                Err(e) => {
                    tracing::warn!(
                        "failed getting results from spectro {} ({}): {}",
                        source.id, source.url, e
                    );
                    None
                }
            }
        });

        let outcomes = join_all(fetches).await;
        if !outcomes.is_empty() && outcomes.iter().all(Option::is_none) {
            return None;
        }

        let mut merged: Vec<SampleResult> = outcomes.into_iter().flatten().flatten().collect();
        merged.sort_by(|a, b| b.time_stamp.cmp(&a.time_stamp));
        Some(merged)
    }

    async fn fetch(&self, source: &SourceConfig) -> Result<Vec<SampleResult>, FetchError> {
        let mut query: Vec<(&str, &str)> = Vec::new();
        if source.furnace_filter {
            query.extend(self.furnace_names.iter().map(|n| ("f", n.as_str())));
        }
        if source.transfer_samples_only {
            query.push(("t", "true"));
        }

        let resp = self.client.get(&source.url).query(&query).send().await?;
        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status()));
        }

        let body = resp.bytes().await?;
        let docs: Vec<ResultDocument> = serde_json::from_slice(&body)?;
        Ok(docs.into_iter().map(|d| d.into_result(source.id)).collect())
    }
}
