//! Per-query performance accounting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A process resource snapshot taken around a query run.
///
/// Keys follow the process sampler's column names; the ones used here are
/// `user_time`, `system_time` and `resident_size`. Values are decimal text.
pub type ResourceSample = BTreeMap<String, String>;

/// Running totals for one scheduled query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPerformance {
    /// Completed runs
    pub executions: u64,
    /// When the last completed run was recorded
    pub last_executed: Option<DateTime<Utc>>,
    /// Sum of reported run delays
    pub wall_time: u64,
    /// Sum of reported output sizes
    pub output_size: u64,
    /// Sum of positive user CPU deltas
    pub user_time: u64,
    /// Sum of positive system CPU deltas
    pub system_time: u64,
    /// Running average of positive resident memory deltas
    pub average_memory: u64,
    /// A start was recorded with no matching completion yet
    pub dirty: bool,
}

impl QueryPerformance {
    /// Fold one completed run into the totals and clear the dirty bit.
    pub fn record(
        &mut self,
        delay: u64,
        size: u64,
        before: &ResourceSample,
        after: &ResourceSample,
        now: DateTime<Utc>,
    ) {
        if let Some(diff) = positive_delta(before, after, "user_time") {
            self.user_time = self.user_time.saturating_add(diff);
        }
        if let Some(diff) = positive_delta(before, after, "system_time") {
            self.system_time = self.system_time.saturating_add(diff);
        }
        if let Some(diff) = positive_delta(before, after, "resident_size") {
            // Widened so the running average cannot overflow.
            let total = u128::from(self.average_memory) * u128::from(self.executions)
                + u128::from(diff);
            let average = total / (u128::from(self.executions) + 1);
            self.average_memory = u64::try_from(average).unwrap_or(u64::MAX);
        }

        self.wall_time = self.wall_time.saturating_add(delay);
        self.output_size = self.output_size.saturating_add(size);
        self.executions = self.executions.saturating_add(1);
        self.last_executed = Some(now);
        self.dirty = false;
    }
}

fn sample_value(sample: &ResourceSample, key: &str) -> Option<i64> {
    sample.get(key).and_then(|v| v.trim().parse().ok())
}

fn positive_delta(before: &ResourceSample, after: &ResourceSample, key: &str) -> Option<u64> {
    let diff = sample_value(after, key)?.checked_sub(sample_value(before, key)?)?;
    u64::try_from(diff).ok().filter(|diff| *diff > 0)
}
