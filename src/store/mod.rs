// src/store/mod.rs

//! Entity store contract. Every read returns fully materialised records; every
//! uniqueness rule the services depend on is enforced here, at the write, so two
//! concurrent requests cannot both pass a read-then-write check.

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::models::{
    Activity, ActivityFilter, Attendance, DateRange, Group, LeaveFilter, LeaveRequest, Message,
    PageRequest, Project, ProjectMember, SortOrder, Task, TaskFilter, TimeEntry, TimeEntryFilter,
    User,
};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness rule rejected the write.
    #[error("{0}")]
    Duplicate(String),
    /// The row changed underneath a conditional write.
    #[error("{0}")]
    Conflict(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub const DUPLICATE_EMAIL: &str = "Email is already in use";
pub const DUPLICATE_MEMBER: &str = "User is already a member of this project";
pub const TIMER_ALREADY_RUNNING: &str = "You already have a running timer. Please stop it first.";
pub const DUPLICATE_ATTENDANCE: &str = "Attendance already recorded for today";

#[async_trait]
pub trait Store: Send + Sync {
    // users
    /// Fails with `Duplicate(DUPLICATE_EMAIL)` when the email is taken.
    async fn insert_user(&self, user: User) -> StoreResult<User>;
    async fn find_user(&self, id: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn list_users(&self) -> StoreResult<Vec<User>>;

    // tasks
    async fn insert_task(&self, task: Task) -> StoreResult<Task>;
    async fn update_task(&self, task: Task) -> StoreResult<Task>;
    async fn delete_task(&self, id: &str) -> StoreResult<bool>;
    async fn find_task(&self, id: &str) -> StoreResult<Option<Task>>;
    async fn list_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>>;
    /// Case-insensitive substring match on title or description.
    async fn search_tasks(&self, keyword: &str) -> StoreResult<Vec<Task>>;

    // projects, memberships and groups
    /// Writes the project, its group and its initial members as one unit.
    async fn create_project(
        &self,
        project: Project,
        group: Group,
        members: Vec<ProjectMember>,
    ) -> StoreResult<Project>;
    async fn update_project(&self, project: Project) -> StoreResult<Project>;
    /// Also removes the project's members, group and the group's messages.
    async fn delete_project(&self, id: &str) -> StoreResult<bool>;
    async fn find_project(&self, id: &str) -> StoreResult<Option<Project>>;
    async fn list_projects(&self) -> StoreResult<Vec<Project>>;
    /// Projects the user is a member of or manages.
    async fn list_projects_for_user(&self, user_id: &str) -> StoreResult<Vec<Project>>;
    /// Fails with `Duplicate(DUPLICATE_MEMBER)` when the pair already exists.
    async fn insert_member(&self, member: ProjectMember) -> StoreResult<ProjectMember>;
    async fn find_member(&self, project_id: &str, user_id: &str)
        -> StoreResult<Option<ProjectMember>>;
    async fn list_members(&self, project_id: &str) -> StoreResult<Vec<ProjectMember>>;
    async fn delete_member(&self, project_id: &str, user_id: &str) -> StoreResult<bool>;
    async fn find_group(&self, id: &str) -> StoreResult<Option<Group>>;
    async fn find_group_by_project(&self, project_id: &str) -> StoreResult<Option<Group>>;

    // messages
    async fn insert_message(&self, message: Message) -> StoreResult<Message>;
    async fn list_messages(&self, group_id: &str, order: SortOrder) -> StoreResult<Vec<Message>>;

    // time entries
    /// Inserts a running entry unless the user already has one, in which case
    /// it fails with `Conflict(TIMER_ALREADY_RUNNING)`.
    async fn start_timer(&self, entry: TimeEntry) -> StoreResult<TimeEntry>;
    async fn find_running_timer(&self, user_id: &str) -> StoreResult<Option<TimeEntry>>;
    /// Closes `entry` only if it is still running; otherwise returns `Ok(None)`.
    async fn close_timer(&self, entry: TimeEntry) -> StoreResult<Option<TimeEntry>>;
    async fn insert_time_entry(&self, entry: TimeEntry) -> StoreResult<TimeEntry>;
    async fn find_time_entry(&self, id: &str) -> StoreResult<Option<TimeEntry>>;
    async fn delete_time_entry(&self, id: &str) -> StoreResult<bool>;
    /// Ordered by `start_time`, newest first.
    async fn list_time_entries(&self, filter: &TimeEntryFilter) -> StoreResult<Vec<TimeEntry>>;
    /// Sum of `duration_minutes` over entries starting in `range`; running entries count 0.
    async fn total_minutes(&self, user_id: &str, range: &DateRange) -> StoreResult<i64>;

    // activities
    async fn insert_activity(&self, activity: Activity) -> StoreResult<Activity>;
    /// One page, newest first, plus the total number of matches.
    async fn page_activities(
        &self,
        filter: &ActivityFilter,
        page: &PageRequest,
    ) -> StoreResult<(Vec<Activity>, u64)>;
    async fn list_activities(
        &self,
        filter: &ActivityFilter,
        limit: Option<u64>,
    ) -> StoreResult<Vec<Activity>>;
    async fn count_activities(&self, user_id: &str, since: DateTime<Utc>) -> StoreResult<u64>;

    // leave and attendance
    async fn insert_leave(&self, leave: LeaveRequest) -> StoreResult<LeaveRequest>;
    async fn update_leave(&self, leave: LeaveRequest) -> StoreResult<LeaveRequest>;
    async fn find_leave(&self, id: &str) -> StoreResult<Option<LeaveRequest>>;
    /// Newest first.
    async fn list_leave(&self, filter: &LeaveFilter) -> StoreResult<Vec<LeaveRequest>>;
    /// Fails with `Duplicate(DUPLICATE_ATTENDANCE)` for a second row on the same day.
    async fn insert_attendance(&self, attendance: Attendance) -> StoreResult<Attendance>;
    async fn update_attendance(&self, attendance: Attendance) -> StoreResult<Attendance>;
    async fn find_attendance(&self, user_id: &str, date: NaiveDate)
        -> StoreResult<Option<Attendance>>;
    /// Ordered by date, newest first.
    async fn list_attendance(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<Vec<Attendance>>;
}
