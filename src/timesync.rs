//! ==============================================================================
//! timesync.rs - set the host clock from a time source
//! ==============================================================================
//!
//! the edge box has no rtc and often no ntp. a time source answers
//! `{"t": "<iso-8601>"}` and the clock is set with
//!
//!     date --set "2 Jan 2006 15:04:05"
//!
//! staleness math depends on the host clock, so this runs on its own timer.
//!
//! ==============================================================================

use chrono::{DateTime, FixedOffset};
use std::time::Duration;

use crate::domain::TimeDocument;

#[derive(Debug, thiserror::Error)]
pub enum TimeSyncError {
    #[error("time request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("time source answered {0}")]
    Status(reqwest::StatusCode),
    #[error("could not run date: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("date exited with {status}: {stderr}")]
    Date { status: std::process::ExitStatus, stderr: String },
}

pub struct TimeSync {
    client: reqwest::Client,
    url: String,
}

impl TimeSync {
    pub fn new(url: String, timeout: Duration) -> Result<Self, TimeSyncError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    pub async fn fetch(&self) -> Result<DateTime<FixedOffset>, TimeSyncError> {
        let resp = self.client.get(&self.url).send().await?;
        if !resp.status().is_success() {
            return Err(TimeSyncError::Status(resp.status()));
        }
        let doc: TimeDocument = resp.json().await?;
        Ok(doc.t)
    }

    /// Fetch the time and apply it.
    pub async fn sync(&self) -> Result<DateTime<FixedOffset>, TimeSyncError> {
        let t = self.fetch().await?;
        set_clock(&t).await?;
        Ok(t)
    }
}

/// the wall clock as `date --set` takes it, in the source's own offset
pub fn date_argument(t: &DateTime<FixedOffset>) -> String {
    t.format("%-d %b %Y %H:%M:%S").to_string()
}

async fn set_clock(t: &DateTime<FixedOffset>) -> Result<(), TimeSyncError> {
    let arg = date_argument(t);
    tracing::debug!("date --set {:?}", arg);

    let out = tokio::process::Command::new("date")
        .args(["--set", &arg])
        .output()
        .await?;
    if !out.status.success() {
        return Err(TimeSyncError::Date {
            status: out.status,
            stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        });
    }
    Ok(())
}
