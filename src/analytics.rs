// src/analytics.rs

//! Dashboard statistics. Everything here is a pure function of a task
//! snapshot, the user list and the date treated as "today".

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{Priority, Task, TaskStatus, User};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTaskStats {
    pub user_id: String,
    pub user_name: String,
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub pending_tasks: u64,
    pub in_progress_tasks: u64,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub pending_tasks: u64,
    pub on_time_completion_percent: f64,
    /// User name to completion rate.
    pub productivity_scores: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedDashboardSummary {
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub pending_tasks: u64,
    pub in_progress_tasks: u64,
    pub on_time_completion_percent: f64,
    pub productivity_scores: BTreeMap<String, f64>,
    pub user_stats: Vec<UserTaskStats>,
    pub overdue_tasks: u64,
    pub high_priority_tasks: u64,
}

impl From<EnhancedDashboardSummary> for DashboardSummary {
    fn from(summary: EnhancedDashboardSummary) -> Self {
        Self {
            total_tasks: summary.total_tasks,
            completed_tasks: summary.completed_tasks,
            pending_tasks: summary.pending_tasks,
            on_time_completion_percent: summary.on_time_completion_percent,
            productivity_scores: summary.productivity_scores,
        }
    }
}

/// `100 * part / whole`, or 0 when `whole` is 0.
pub fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

fn count_status(tasks: &[&Task], status: TaskStatus) -> u64 {
    tasks.iter().filter(|task| task.status == status).count() as u64
}

pub fn is_on_time(task: &Task) -> bool {
    match (task.completed_date, task.due_date) {
        (Some(completed), Some(due)) => task.is_completed() && completed <= due,
        _ => false,
    }
}

pub fn is_overdue(task: &Task, today: NaiveDate) -> bool {
    !task.is_completed() && task.due_date.is_some_and(|due| due < today)
}

pub fn user_stats(user: &User, tasks: &[Task]) -> UserTaskStats {
    let own: Vec<&Task> = tasks
        .iter()
        .filter(|task| task.assigned_to_id == user.id)
        .collect();
    let total = own.len() as u64;
    let completed = count_status(&own, TaskStatus::Completed);
    UserTaskStats {
        user_id: user.id.clone(),
        user_name: user.name.clone(),
        total_tasks: total,
        completed_tasks: completed,
        pending_tasks: count_status(&own, TaskStatus::Pending),
        in_progress_tasks: count_status(&own, TaskStatus::InProgress),
        completion_rate: percent(completed, total),
    }
}

/// Full dashboard over `tasks`, with one stats row per entry in `users`.
pub fn summarize(tasks: &[Task], users: &[User], today: NaiveDate) -> EnhancedDashboardSummary {
    let all: Vec<&Task> = tasks.iter().collect();
    let completed = count_status(&all, TaskStatus::Completed);
    let on_time = tasks.iter().filter(|task| is_on_time(task)).count() as u64;

    let user_stats: Vec<UserTaskStats> = users.iter().map(|user| user_stats(user, tasks)).collect();
    let productivity_scores = user_stats
        .iter()
        .map(|stats| (stats.user_name.clone(), stats.completion_rate))
        .collect();

    EnhancedDashboardSummary {
        total_tasks: all.len() as u64,
        completed_tasks: completed,
        pending_tasks: count_status(&all, TaskStatus::Pending),
        in_progress_tasks: count_status(&all, TaskStatus::InProgress),
        on_time_completion_percent: percent(on_time, completed),
        productivity_scores,
        user_stats,
        overdue_tasks: tasks.iter().filter(|task| is_overdue(task, today)).count() as u64,
        high_priority_tasks: tasks
            .iter()
            .filter(|task| task.priority == Priority::High && !task.is_completed())
            .count() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use chrono::Utc;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn user(id: &str, name: &str) -> User {
        User {
            id: id.to_string(),
            name: name.to_string(),
            email: format!("{}@example.com", id),
            password_hash: String::new(),
            role: Role::Employee,
            created_at: Utc::now(),
        }
    }

    fn task(
        assignee: &str,
        status: TaskStatus,
        priority: Priority,
        due: Option<&str>,
        completed: Option<&str>,
    ) -> Task {
        Task {
            id: format!("{}-{:?}-{:?}", assignee, status, due),
            title: "t".to_string(),
            description: None,
            status,
            priority,
            due_date: due.map(date),
            completed_date: completed.map(date),
            assigned_to_id: assignee.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn user_without_tasks_scores_zero() {
        let users = vec![user("a", "Ada"), user("b", "Bo")];
        let tasks = vec![task("a", TaskStatus::Completed, Priority::Low, None, Some("2024-01-01"))];
        let summary = summarize(&tasks, &users, date("2024-01-10"));
        assert_eq!(summary.productivity_scores["Bo"], 0.0);
        assert_eq!(summary.productivity_scores["Ada"], 100.0);
        assert_eq!(summary.user_stats[1].total_tasks, 0);
        assert_eq!(summary.user_stats[1].completion_rate, 0.0);
    }

    #[test]
    fn on_time_percent_is_zero_without_completed_tasks() {
        let tasks = vec![
            task("a", TaskStatus::Pending, Priority::Low, Some("2024-01-05"), None),
            task("a", TaskStatus::InProgress, Priority::Low, None, None),
        ];
        let summary = summarize(&tasks, &[], date("2024-01-01"));
        assert_eq!(summary.completed_tasks, 0);
        assert_eq!(summary.on_time_completion_percent, 0.0);
    }

    #[test]
    fn on_time_counts_only_tasks_with_both_dates() {
        let tasks = vec![
            task("a", TaskStatus::Completed, Priority::Low, Some("2024-01-05"), Some("2024-01-05")),
            task("a", TaskStatus::Completed, Priority::Low, Some("2024-01-05"), Some("2024-01-06")),
            task("a", TaskStatus::Completed, Priority::Low, None, Some("2024-01-01")),
            task("a", TaskStatus::Completed, Priority::Low, Some("2024-01-09"), Some("2024-01-02")),
        ];
        let summary = summarize(&tasks, &[], date("2024-02-01"));
        assert_eq!(summary.completed_tasks, 4);
        assert_eq!(summary.on_time_completion_percent, 50.0);
    }

    #[test]
    fn overdue_needs_open_status_and_a_past_due_date() {
        let today = date("2024-03-10");
        let overdue = task("a", TaskStatus::Pending, Priority::Low, Some("2024-03-09"), None);
        let due_today = task("a", TaskStatus::InProgress, Priority::Low, Some("2024-03-10"), None);
        let done_late = task("a", TaskStatus::Completed, Priority::Low, Some("2024-03-01"), Some("2024-03-05"));
        let undated = task("a", TaskStatus::Pending, Priority::Low, None, None);

        assert!(is_overdue(&overdue, today));
        assert!(!is_overdue(&due_today, today));
        assert!(!is_overdue(&done_late, today));
        assert!(!is_overdue(&undated, today));

        let tasks = vec![overdue, due_today, done_late, undated];
        let first = summarize(&tasks, &[], today);
        let second = summarize(&tasks, &[], today);
        assert_eq!(first.overdue_tasks, 1);
        assert_eq!(first.overdue_tasks, second.overdue_tasks);
        assert_eq!(summarize(&tasks, &[], date("2024-03-11")).overdue_tasks, 2);
    }

    #[test]
    fn counts_by_status_and_open_high_priority() {
        let tasks = vec![
            task("a", TaskStatus::Pending, Priority::High, None, None),
            task("a", TaskStatus::InProgress, Priority::High, None, None),
            task("b", TaskStatus::Completed, Priority::High, None, Some("2024-01-01")),
            task("b", TaskStatus::Pending, Priority::Medium, None, None),
        ];
        let users = vec![user("a", "Ada"), user("b", "Bo")];
        let summary = summarize(&tasks, &users, date("2024-01-02"));
        assert_eq!(summary.total_tasks, 4);
        assert_eq!(summary.pending_tasks, 2);
        assert_eq!(summary.in_progress_tasks, 1);
        assert_eq!(summary.high_priority_tasks, 2);
        assert_eq!(summary.productivity_scores["Bo"], 50.0);

        let basic = DashboardSummary::from(summary);
        assert_eq!(basic.total_tasks, 4);
        assert_eq!(basic.productivity_scores.len(), 2);
    }
}
