use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::config::FurnaceConfig;
use crate::domain::SampleResult;

/// Elapsed time since each furnace's last result, as of the latest poll.
///
/// Written by the poll cycle, read by the light and display ticks. Entries are
/// only ever added or overwritten.
#[derive(Default)]
pub struct FurnaceLastResult {
    elapsed: RwLock<HashMap<String, Duration>>,
}

impl FurnaceLastResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the newest result of every configured furnace found in `batch`.
    ///
    /// `batch` is newest first, so the first match per furnace wins. Returns
    /// how many furnaces were updated.
    pub async fn record(
        &self,
        furnaces: &[FurnaceConfig],
        batch: &[SampleResult],
        now: DateTime<Utc>,
    ) -> usize {
        let updates: Vec<(String, Duration)> = furnaces
            .iter()
            .filter_map(|f| {
                batch
                    .iter()
                    .find(|r| r.furnace == f.name)
                    .map(|r| (f.name.clone(), elapsed_since(r.time_stamp, now)))
            })
            .collect();

        let count = updates.len();
        let mut map = self.elapsed.write().await;
        map.extend(updates);
        count
    }

    /// Elapsed per furnace in config order, `None` where nothing was seen yet.
    pub async fn snapshot(&self, furnaces: &[FurnaceConfig]) -> Vec<Option<Duration>> {
        let map = self.elapsed.read().await;
        furnaces.iter().map(|f| map.get(&f.name).copied()).collect()
    }
}

/// Results stamped in the future count as brand new.
fn elapsed_since(time_stamp: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - time_stamp).to_std().unwrap_or(Duration::ZERO)
}
