use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
    pub id: String,
    pub user_id: String,
    pub task_id: Option<String>,
    pub start_time: DateTime<Utc>,
    /// `None` while the timer is running.
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i64>,
    pub description: Option<String>,
    pub is_manual: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TimeEntry {
    pub fn is_running(&self) -> bool {
        self.end_time.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntryView {
    pub id: String,
    pub user_id: String,
    pub user_name: Option<String>,
    pub task_id: Option<String>,
    pub task_title: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i64>,
    pub description: Option<String>,
    pub is_manual: bool,
    pub is_running: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualEntryRequest {
    pub task_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub description: Option<String>,
}

/// Inclusive instant range.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }
}

#[derive(Debug, Default, Clone)]
pub struct TimeEntryFilter {
    pub user_ids: Option<Vec<String>>,
    pub task_id: Option<String>,
    /// Matches on `start_time`.
    pub range: Option<DateRange>,
}
