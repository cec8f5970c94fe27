// src/store/memory.rs

//! In-process store. All tables sit behind one `RwLock`, so every
//! check-then-write below runs under a single write guard.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;

use super::{
    Store, StoreError, StoreResult, DUPLICATE_ATTENDANCE, DUPLICATE_EMAIL, DUPLICATE_MEMBER,
    TIMER_ALREADY_RUNNING,
};
use crate::models::{
    Activity, ActivityFilter, Attendance, DateRange, Group, LeaveFilter, LeaveRequest, Message,
    PageRequest, Project, ProjectMember, SortOrder, Task, TaskFilter, TimeEntry, TimeEntryFilter,
    User,
};

#[derive(Default)]
struct Tables {
    users: HashMap<String, User>,
    tasks: HashMap<String, Task>,
    projects: HashMap<String, Project>,
    members: Vec<ProjectMember>,
    groups: HashMap<String, Group>,
    messages: Vec<Message>,
    time_entries: HashMap<String, TimeEntry>,
    activities: Vec<Activity>,
    leave: HashMap<String, LeaveRequest>,
    attendance: Vec<Attendance>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn vanished(kind: &str, id: &str) -> StoreError {
    StoreError::Conflict(format!("{} {} no longer exists", kind, id))
}

fn matches_activity(activity: &Activity, filter: &ActivityFilter) -> bool {
    filter
        .user_ids
        .as_ref()
        .map_or(true, |ids| ids.contains(&activity.user_id))
        && filter.since.map_or(true, |since| activity.created_at >= since)
        && filter.until.map_or(true, |until| activity.created_at <= until)
}

fn newest_activities(tables: &Tables, filter: &ActivityFilter) -> Vec<Activity> {
    // Insertion order breaks ties between equal timestamps.
    let mut found: Vec<Activity> = tables
        .activities
        .iter()
        .rev()
        .filter(|a| matches_activity(a, filter))
        .cloned()
        .collect();
    found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    found
}

fn by_creation(tasks: impl Iterator<Item = Task>) -> Vec<Task> {
    let mut tasks: Vec<Task> = tasks.collect();
    tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    tasks
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: User) -> StoreResult<User> {
        let mut tables = self.tables.write().await;
        let taken = tables
            .users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email));
        if taken {
            return Err(StoreError::Duplicate(DUPLICATE_EMAIL.to_string()));
        }
        tables.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: &str) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.get(id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let tables = self.tables.read().await;
        let mut users: Vec<User> = tables.users.values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(users)
    }

    async fn insert_task(&self, task: Task) -> StoreResult<Task> {
        let mut tables = self.tables.write().await;
        tables.tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn update_task(&self, task: Task) -> StoreResult<Task> {
        let mut tables = self.tables.write().await;
        match tables.tasks.get_mut(&task.id) {
            Some(slot) => {
                *slot = task.clone();
                Ok(task)
            }
            None => Err(vanished("Task", &task.id)),
        }
    }

    async fn delete_task(&self, id: &str) -> StoreResult<bool> {
        Ok(self.tables.write().await.tasks.remove(id).is_some())
    }

    async fn find_task(&self, id: &str) -> StoreResult<Option<Task>> {
        Ok(self.tables.read().await.tasks.get(id).cloned())
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>> {
        let tables = self.tables.read().await;
        Ok(by_creation(
            tables
                .tasks
                .values()
                .filter(|t| {
                    filter
                        .assigned_to_id
                        .as_ref()
                        .map_or(true, |id| &t.assigned_to_id == id)
                        && filter.status.map_or(true, |s| t.status == s)
                })
                .cloned(),
        ))
    }

    async fn search_tasks(&self, keyword: &str) -> StoreResult<Vec<Task>> {
        let needle = keyword.to_lowercase();
        let tables = self.tables.read().await;
        Ok(by_creation(
            tables
                .tasks
                .values()
                .filter(|t| {
                    t.title.to_lowercase().contains(&needle)
                        || t
                            .description
                            .as_ref()
                            .map_or(false, |d| d.to_lowercase().contains(&needle))
                })
                .cloned(),
        ))
    }

    async fn create_project(
        &self,
        project: Project,
        group: Group,
        members: Vec<ProjectMember>,
    ) -> StoreResult<Project> {
        let mut tables = self.tables.write().await;
        // Validate the whole bundle before writing any of it.
        for (i, member) in members.iter().enumerate() {
            if members[..i].iter().any(|m| m.user_id == member.user_id) {
                return Err(StoreError::Duplicate(DUPLICATE_MEMBER.to_string()));
            }
        }
        tables.projects.insert(project.id.clone(), project.clone());
        tables.groups.insert(group.id.clone(), group);
        tables.members.extend(members);
        Ok(project)
    }

    async fn update_project(&self, project: Project) -> StoreResult<Project> {
        let mut tables = self.tables.write().await;
        match tables.projects.get_mut(&project.id) {
            Some(slot) => {
                *slot = project.clone();
                Ok(project)
            }
            None => Err(vanished("Project", &project.id)),
        }
    }

    async fn delete_project(&self, id: &str) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        if tables.projects.remove(id).is_none() {
            return Ok(false);
        }
        tables.members.retain(|m| m.project_id != id);
        let group_ids: Vec<String> = tables
            .groups
            .values()
            .filter(|g| g.project_id.as_deref() == Some(id))
            .map(|g| g.id.clone())
            .collect();
        for group_id in &group_ids {
            tables.groups.remove(group_id);
        }
        tables.messages.retain(|m| !group_ids.contains(&m.group_id));
        Ok(true)
    }

    async fn find_project(&self, id: &str) -> StoreResult<Option<Project>> {
        Ok(self.tables.read().await.projects.get(id).cloned())
    }

    async fn list_projects(&self) -> StoreResult<Vec<Project>> {
        let tables = self.tables.read().await;
        let mut projects: Vec<Project> = tables.projects.values().cloned().collect();
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(projects)
    }

    async fn list_projects_for_user(&self, user_id: &str) -> StoreResult<Vec<Project>> {
        let tables = self.tables.read().await;
        let mut projects: Vec<Project> = tables
            .projects
            .values()
            .filter(|p| {
                p.manager_id == user_id
                    || tables
                        .members
                        .iter()
                        .any(|m| m.project_id == p.id && m.user_id == user_id)
            })
            .cloned()
            .collect();
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(projects)
    }

    async fn insert_member(&self, member: ProjectMember) -> StoreResult<ProjectMember> {
        let mut tables = self.tables.write().await;
        let exists = tables
            .members
            .iter()
            .any(|m| m.project_id == member.project_id && m.user_id == member.user_id);
        if exists {
            return Err(StoreError::Duplicate(DUPLICATE_MEMBER.to_string()));
        }
        tables.members.push(member.clone());
        Ok(member)
    }

    async fn find_member(
        &self,
        project_id: &str,
        user_id: &str,
    ) -> StoreResult<Option<ProjectMember>> {
        let tables = self.tables.read().await;
        Ok(tables
            .members
            .iter()
            .find(|m| m.project_id == project_id && m.user_id == user_id)
            .cloned())
    }

    async fn list_members(&self, project_id: &str) -> StoreResult<Vec<ProjectMember>> {
        let tables = self.tables.read().await;
        Ok(tables
            .members
            .iter()
            .filter(|m| m.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn delete_member(&self, project_id: &str, user_id: &str) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.members.len();
        tables
            .members
            .retain(|m| !(m.project_id == project_id && m.user_id == user_id));
        Ok(tables.members.len() != before)
    }

    async fn find_group(&self, id: &str) -> StoreResult<Option<Group>> {
        Ok(self.tables.read().await.groups.get(id).cloned())
    }

    async fn find_group_by_project(&self, project_id: &str) -> StoreResult<Option<Group>> {
        let tables = self.tables.read().await;
        Ok(tables
            .groups
            .values()
            .find(|g| g.project_id.as_deref() == Some(project_id))
            .cloned())
    }

    async fn insert_message(&self, message: Message) -> StoreResult<Message> {
        self.tables.write().await.messages.push(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, group_id: &str, order: SortOrder) -> StoreResult<Vec<Message>> {
        let tables = self.tables.read().await;
        let mut messages: Vec<Message> = tables
            .messages
            .iter()
            .filter(|m| m.group_id == group_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        if order == SortOrder::Descending {
            messages.reverse();
        }
        Ok(messages)
    }

    async fn start_timer(&self, entry: TimeEntry) -> StoreResult<TimeEntry> {
        let mut tables = self.tables.write().await;
        let running = tables
            .time_entries
            .values()
            .any(|e| e.user_id == entry.user_id && e.is_running());
        if running {
            return Err(StoreError::Conflict(TIMER_ALREADY_RUNNING.to_string()));
        }
        tables.time_entries.insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    async fn find_running_timer(&self, user_id: &str) -> StoreResult<Option<TimeEntry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .time_entries
            .values()
            .find(|e| e.user_id == user_id && e.is_running())
            .cloned())
    }

    async fn close_timer(&self, entry: TimeEntry) -> StoreResult<Option<TimeEntry>> {
        let mut tables = self.tables.write().await;
        match tables.time_entries.get_mut(&entry.id) {
            Some(slot) if slot.is_running() => {
                *slot = entry.clone();
                Ok(Some(entry))
            }
            _ => Ok(None),
        }
    }

    async fn insert_time_entry(&self, entry: TimeEntry) -> StoreResult<TimeEntry> {
        let mut tables = self.tables.write().await;
        tables.time_entries.insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    async fn find_time_entry(&self, id: &str) -> StoreResult<Option<TimeEntry>> {
        Ok(self.tables.read().await.time_entries.get(id).cloned())
    }

    async fn delete_time_entry(&self, id: &str) -> StoreResult<bool> {
        Ok(self.tables.write().await.time_entries.remove(id).is_some())
    }

    async fn list_time_entries(&self, filter: &TimeEntryFilter) -> StoreResult<Vec<TimeEntry>> {
        let tables = self.tables.read().await;
        let mut entries: Vec<TimeEntry> = tables
            .time_entries
            .values()
            .filter(|e| {
                filter
                    .user_ids
                    .as_ref()
                    .map_or(true, |ids| ids.contains(&e.user_id))
                    && filter
                        .task_id
                        .as_ref()
                        .map_or(true, |id| e.task_id.as_ref() == Some(id))
                    && filter.range.map_or(true, |r| r.contains(e.start_time))
            })
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(entries)
    }

    async fn total_minutes(&self, user_id: &str, range: &DateRange) -> StoreResult<i64> {
        let tables = self.tables.read().await;
        Ok(tables
            .time_entries
            .values()
            .filter(|e| e.user_id == user_id && range.contains(e.start_time))
            .filter_map(|e| e.duration_minutes)
            .sum())
    }

    async fn insert_activity(&self, activity: Activity) -> StoreResult<Activity> {
        self.tables.write().await.activities.push(activity.clone());
        Ok(activity)
    }

    async fn page_activities(
        &self,
        filter: &ActivityFilter,
        page: &PageRequest,
    ) -> StoreResult<(Vec<Activity>, u64)> {
        let tables = self.tables.read().await;
        let found = newest_activities(&tables, filter);
        let total = found.len() as u64;
        let content = found
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.size() as usize)
            .collect();
        Ok((content, total))
    }

    async fn list_activities(
        &self,
        filter: &ActivityFilter,
        limit: Option<u64>,
    ) -> StoreResult<Vec<Activity>> {
        let tables = self.tables.read().await;
        let mut found = newest_activities(&tables, filter);
        if let Some(limit) = limit {
            found.truncate(limit as usize);
        }
        Ok(found)
    }

    async fn count_activities(&self, user_id: &str, since: DateTime<Utc>) -> StoreResult<u64> {
        let tables = self.tables.read().await;
        Ok(tables
            .activities
            .iter()
            .filter(|a| a.user_id == user_id && a.created_at >= since)
            .count() as u64)
    }

    async fn insert_leave(&self, leave: LeaveRequest) -> StoreResult<LeaveRequest> {
        let mut tables = self.tables.write().await;
        tables.leave.insert(leave.id.clone(), leave.clone());
        Ok(leave)
    }

    async fn update_leave(&self, leave: LeaveRequest) -> StoreResult<LeaveRequest> {
        let mut tables = self.tables.write().await;
        match tables.leave.get_mut(&leave.id) {
            Some(slot) => {
                *slot = leave.clone();
                Ok(leave)
            }
            None => Err(vanished("Leave request", &leave.id)),
        }
    }

    async fn find_leave(&self, id: &str) -> StoreResult<Option<LeaveRequest>> {
        Ok(self.tables.read().await.leave.get(id).cloned())
    }

    async fn list_leave(&self, filter: &LeaveFilter) -> StoreResult<Vec<LeaveRequest>> {
        let tables = self.tables.read().await;
        let mut found: Vec<LeaveRequest> = tables
            .leave
            .values()
            .filter(|l| {
                filter.user_id.as_ref().map_or(true, |id| &l.user_id == id)
                    && filter.status.map_or(true, |s| l.status == s)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn insert_attendance(&self, attendance: Attendance) -> StoreResult<Attendance> {
        let mut tables = self.tables.write().await;
        let exists = tables
            .attendance
            .iter()
            .any(|a| a.user_id == attendance.user_id && a.date == attendance.date);
        if exists {
            return Err(StoreError::Duplicate(DUPLICATE_ATTENDANCE.to_string()));
        }
        tables.attendance.push(attendance.clone());
        Ok(attendance)
    }

    async fn update_attendance(&self, attendance: Attendance) -> StoreResult<Attendance> {
        let mut tables = self.tables.write().await;
        match tables.attendance.iter_mut().find(|a| a.id == attendance.id) {
            Some(slot) => {
                *slot = attendance.clone();
                Ok(attendance)
            }
            None => Err(vanished("Attendance", &attendance.id)),
        }
    }

    async fn find_attendance(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> StoreResult<Option<Attendance>> {
        let tables = self.tables.read().await;
        Ok(tables
            .attendance
            .iter()
            .find(|a| a.user_id == user_id && a.date == date)
            .cloned())
    }

    async fn list_attendance(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<Vec<Attendance>> {
        let tables = self.tables.read().await;
        let mut found: Vec<Attendance> = tables
            .attendance
            .iter()
            .filter(|a| a.user_id == user_id && from <= a.date && a.date <= to)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GroupType, ProjectMemberRole, ProjectStatus};

    fn entry(id: &str, user_id: &str) -> TimeEntry {
        TimeEntry {
            id: id.to_string(),
            user_id: user_id.to_string(),
            task_id: None,
            start_time: Utc::now(),
            end_time: None,
            duration_minutes: None,
            description: None,
            is_manual: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn member(project_id: &str, user_id: &str) -> ProjectMember {
        ProjectMember {
            id: format!("{}-{}", project_id, user_id),
            project_id: project_id.to_string(),
            user_id: user_id.to_string(),
            role: ProjectMemberRole::Member,
            joined_at: Utc::now(),
        }
    }

    #[actix_web::test]
    async fn second_running_timer_is_refused() {
        let store = MemoryStore::new();
        store.start_timer(entry("a", "u")).await.unwrap();
        assert!(matches!(
            store.start_timer(entry("b", "u")).await,
            Err(StoreError::Conflict(_))
        ));
        // Other users are independent.
        store.start_timer(entry("c", "v")).await.unwrap();

        let mut closed = entry("a", "u");
        closed.end_time = Some(Utc::now());
        closed.duration_minutes = Some(0);
        assert!(store.close_timer(closed.clone()).await.unwrap().is_some());
        assert!(store.close_timer(closed).await.unwrap().is_none());
        store.start_timer(entry("d", "u")).await.unwrap();
    }

    #[actix_web::test]
    async fn deleting_a_project_cascades() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let project = Project {
            id: "p".to_string(),
            name: "Apollo".to_string(),
            description: None,
            status: ProjectStatus::Planning,
            start_date: None,
            end_date: None,
            budget: 0.0,
            revenue: 0.0,
            expenses: 0.0,
            manager_id: "m".to_string(),
            created_at: now,
            updated_at: now,
        };
        let group = Group {
            id: "g".to_string(),
            name: "Apollo Group".to_string(),
            group_type: GroupType::ProjectTeam,
            project_id: Some("p".to_string()),
            created_at: now,
        };
        store
            .create_project(project, group, vec![member("p", "m"), member("p", "e")])
            .await
            .unwrap();
        assert!(matches!(
            store.insert_member(member("p", "e")).await,
            Err(StoreError::Duplicate(_))
        ));
        store
            .insert_message(Message {
                id: "msg".to_string(),
                group_id: "g".to_string(),
                sender_id: "e".to_string(),
                content: "hi".to_string(),
                created_at: now,
            })
            .await
            .unwrap();

        assert!(store.delete_project("p").await.unwrap());
        assert!(store.list_members("p").await.unwrap().is_empty());
        assert!(store.find_group("g").await.unwrap().is_none());
        assert!(store.list_messages("g", SortOrder::Ascending).await.unwrap().is_empty());
        assert!(!store.delete_project("p").await.unwrap());
    }
}
