// src/store/mongo.rs

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::TryStreamExt;
use log::{info, warn};
use mongodb::{
    bson::{doc, from_document, to_document, Bson, Document},
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{ClientOptions, IndexOptions},
    Client, ClientSession, Collection, Database, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};

use super::{
    Store, StoreError, StoreResult, DUPLICATE_ATTENDANCE, DUPLICATE_EMAIL, DUPLICATE_MEMBER,
    TIMER_ALREADY_RUNNING,
};
use crate::models::{
    Activity, ActivityFilter, Attendance, DateRange, Group, LeaveFilter, LeaveRequest, Message,
    PageRequest, Project, ProjectMember, SortOrder, Task, TaskFilter, TimeEntry, TimeEntryFilter,
    User,
};

const USERS: &str = "users";
const TASKS: &str = "tasks";
const PROJECTS: &str = "projects";
const PROJECT_MEMBERS: &str = "project_members";
const GROUPS: &str = "groups";
const MESSAGES: &str = "messages";
const TIME_ENTRIES: &str = "time_entries";
const ACTIVITIES: &str = "activities";
const LEAVE_REQUESTS: &str = "leave_requests";
const ATTENDANCE: &str = "attendance";

const DUPLICATE_KEY: i32 = 11000;

/// MongoDB-backed store. Documents are the serde form of the models plus
/// millisecond sort keys (`createdMs`, `startMs`) and, for time entries, a
/// `running` flag that carries the partial unique index.
pub struct MongoStore {
    client: Client,
    db: Database,
}

fn backend(err: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn is_duplicate_key(err: &MongoError) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY,
        ErrorKind::Command(e) => e.code == DUPLICATE_KEY,
        _ => false,
    }
}

fn write_error(err: MongoError, duplicate: impl FnOnce() -> StoreError) -> StoreError {
    if is_duplicate_key(&err) {
        duplicate()
    } else {
        backend(err)
    }
}

fn encode<T: Serialize>(value: &T) -> StoreResult<Document> {
    to_document(value).map_err(backend)
}

fn decode<T: DeserializeOwned>(document: Document) -> StoreResult<T> {
    from_document(document).map_err(backend)
}

fn with_created(mut document: Document, created_at: DateTime<Utc>) -> Document {
    document.insert("createdMs", created_at.timestamp_millis());
    document
}

fn time_entry_document(entry: &TimeEntry) -> StoreResult<Document> {
    let mut document = encode(entry)?;
    document.insert("startMs", entry.start_time.timestamp_millis());
    document.insert("running", entry.is_running());
    Ok(document)
}

fn ms_range(since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Option<Document> {
    let mut range = Document::new();
    if let Some(since) = since {
        range.insert("$gte", since.timestamp_millis());
    }
    if let Some(until) = until {
        range.insert("$lte", until.timestamp_millis());
    }
    (!range.is_empty()).then_some(range)
}

fn activity_query(filter: &ActivityFilter) -> Document {
    let mut query = Document::new();
    if let Some(ids) = &filter.user_ids {
        query.insert("userId", doc! { "$in": ids.clone() });
    }
    if let Some(range) = ms_range(filter.since, filter.until) {
        query.insert("createdMs", range);
    }
    query
}

fn time_entry_query(filter: &TimeEntryFilter) -> Document {
    let mut query = Document::new();
    if let Some(ids) = &filter.user_ids {
        query.insert("userId", doc! { "$in": ids.clone() });
    }
    if let Some(task_id) = &filter.task_id {
        query.insert("taskId", task_id.as_str());
    }
    if let Some(range) = filter.range {
        if let Some(range) = ms_range(Some(range.start), Some(range.end)) {
            query.insert("startMs", range);
        }
    }
    query
}

impl MongoStore {
    pub async fn init(uri: &str, database_name: &str) -> StoreResult<Self> {
        let options = ClientOptions::parse(uri).await.map_err(backend)?;
        let client = Client::with_options(options).map_err(backend)?;
        let db = client.database(database_name);
        let store = MongoStore { client, db };
        store.ensure_indexes().await?;
        info!("Connected to MongoDB database {}", database_name);
        Ok(store)
    }

    fn coll(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }

    async fn ensure_indexes(&self) -> StoreResult<()> {
        let unique = || IndexOptions::builder().unique(true).build();
        for name in [
            USERS,
            TASKS,
            PROJECTS,
            PROJECT_MEMBERS,
            GROUPS,
            MESSAGES,
            TIME_ENTRIES,
            ACTIVITIES,
            LEAVE_REQUESTS,
            ATTENDANCE,
        ] {
            let model = IndexModel::builder()
                .keys(doc! { "id": 1 })
                .options(unique())
                .build();
            self.coll(name).create_index(model).await.map_err(backend)?;
        }

        let indexes = [
            (USERS, doc! { "email": 1 }, Some(unique())),
            (PROJECT_MEMBERS, doc! { "projectId": 1, "userId": 1 }, Some(unique())),
            (
                GROUPS,
                doc! { "projectId": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .partial_filter_expression(doc! { "projectId": { "$type": "string" } })
                        .build(),
                ),
            ),
            // At most one running timer per user.
            (
                TIME_ENTRIES,
                doc! { "userId": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .partial_filter_expression(doc! { "running": true })
                        .build(),
                ),
            ),
            (ATTENDANCE, doc! { "userId": 1, "date": 1 }, Some(unique())),
            (MESSAGES, doc! { "groupId": 1, "createdMs": 1 }, None),
            (ACTIVITIES, doc! { "userId": 1, "createdMs": -1 }, None),
            (TASKS, doc! { "assignedToId": 1 }, None),
        ];
        for (name, keys, options) in indexes {
            let model = IndexModel::builder().keys(keys).options(options).build();
            self.coll(name).create_index(model).await.map_err(backend)?;
        }
        Ok(())
    }

    async fn find_one<T: DeserializeOwned>(
        &self,
        collection: &str,
        filter: Document,
    ) -> StoreResult<Option<T>> {
        match self.coll(collection).find_one(filter).await.map_err(backend)? {
            Some(document) => decode(document).map(Some),
            None => Ok(None),
        }
    }

    async fn find_many<T: DeserializeOwned>(
        &self,
        collection: &str,
        filter: Document,
        sort: Document,
    ) -> StoreResult<Vec<T>> {
        let documents: Vec<Document> = self
            .coll(collection)
            .find(filter)
            .sort(sort)
            .await
            .map_err(backend)?
            .try_collect()
            .await
            .map_err(backend)?;
        documents.into_iter().map(decode).collect()
    }

    /// Replaces the document with the same `id` (and matching `guard`); false if none matched.
    async fn replace(
        &self,
        collection: &str,
        id: &str,
        guard: Document,
        replacement: Document,
    ) -> StoreResult<bool> {
        let mut filter = doc! { "id": id };
        filter.extend(guard);
        let result = self
            .coll(collection)
            .replace_one(filter, replacement)
            .await
            .map_err(backend)?;
        Ok(result.matched_count > 0)
    }

    async fn remove(&self, collection: &str, filter: Document) -> StoreResult<bool> {
        let result = self
            .coll(collection)
            .delete_one(filter)
            .await
            .map_err(backend)?;
        Ok(result.deleted_count > 0)
    }

    async fn write_project_bundle(
        &self,
        session: &mut ClientSession,
        project: &Project,
        group: &Group,
        members: &[ProjectMember],
    ) -> StoreResult<()> {
        self.coll(PROJECTS)
            .insert_one(with_created(encode(project)?, project.created_at))
            .session(&mut *session)
            .await
            .map_err(backend)?;
        self.coll(GROUPS)
            .insert_one(encode(group)?)
            .session(&mut *session)
            .await
            .map_err(backend)?;
        for member in members {
            self.coll(PROJECT_MEMBERS)
                .insert_one(encode(member)?)
                .session(&mut *session)
                .await
                .map_err(|e| write_error(e, || StoreError::Duplicate(DUPLICATE_MEMBER.into())))?;
        }
        Ok(())
    }

    /// Children go first so a partial failure never leaves them without a project.
    async fn remove_project_bundle(
        &self,
        session: &mut ClientSession,
        project_id: &str,
        group_ids: Vec<String>,
    ) -> StoreResult<bool> {
        if !group_ids.is_empty() {
            self.coll(MESSAGES)
                .delete_many(doc! { "groupId": { "$in": group_ids.clone() } })
                .session(&mut *session)
                .await
                .map_err(backend)?;
            self.coll(GROUPS)
                .delete_many(doc! { "id": { "$in": group_ids } })
                .session(&mut *session)
                .await
                .map_err(backend)?;
        }
        self.coll(PROJECT_MEMBERS)
            .delete_many(doc! { "projectId": project_id })
            .session(&mut *session)
            .await
            .map_err(backend)?;
        let result = self
            .coll(PROJECTS)
            .delete_one(doc! { "id": project_id })
            .session(&mut *session)
            .await
            .map_err(backend)?;
        Ok(result.deleted_count > 0)
    }
}

#[async_trait]
impl Store for MongoStore {
    async fn insert_user(&self, user: User) -> StoreResult<User> {
        self.coll(USERS)
            .insert_one(with_created(encode(&user)?, user.created_at))
            .await
            .map_err(|e| write_error(e, || StoreError::Duplicate(DUPLICATE_EMAIL.into())))?;
        Ok(user)
    }

    async fn find_user(&self, id: &str) -> StoreResult<Option<User>> {
        self.find_one(USERS, doc! { "id": id }).await
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.find_one(USERS, doc! { "email": email.to_lowercase() })
            .await
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        self.find_many(USERS, doc! {}, doc! { "createdMs": 1 }).await
    }

    async fn insert_task(&self, task: Task) -> StoreResult<Task> {
        self.coll(TASKS)
            .insert_one(with_created(encode(&task)?, task.created_at))
            .await
            .map_err(backend)?;
        Ok(task)
    }

    async fn update_task(&self, task: Task) -> StoreResult<Task> {
        let replacement = with_created(encode(&task)?, task.created_at);
        if self.replace(TASKS, &task.id, doc! {}, replacement).await? {
            Ok(task)
        } else {
            Err(StoreError::Conflict(format!("Task {} no longer exists", task.id)))
        }
    }

    async fn delete_task(&self, id: &str) -> StoreResult<bool> {
        self.remove(TASKS, doc! { "id": id }).await
    }

    async fn find_task(&self, id: &str) -> StoreResult<Option<Task>> {
        self.find_one(TASKS, doc! { "id": id }).await
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>> {
        let mut query = Document::new();
        if let Some(assignee) = &filter.assigned_to_id {
            query.insert("assignedToId", assignee.as_str());
        }
        if let Some(status) = filter.status {
            query.insert("status", status.as_str());
        }
        self.find_many(TASKS, query, doc! { "createdMs": 1 }).await
    }

    async fn search_tasks(&self, keyword: &str) -> StoreResult<Vec<Task>> {
        let pattern = regex::escape(keyword);
        let query = doc! {
            "$or": [
                { "title": { "$regex": &pattern, "$options": "i" } },
                { "description": { "$regex": &pattern, "$options": "i" } },
            ]
        };
        self.find_many(TASKS, query, doc! { "createdMs": 1 }).await
    }

    async fn create_project(
        &self,
        project: Project,
        group: Group,
        members: Vec<ProjectMember>,
    ) -> StoreResult<Project> {
        let mut session = self.client.start_session().await.map_err(backend)?;
        session.start_transaction().await.map_err(backend)?;
        match self
            .write_project_bundle(&mut session, &project, &group, &members)
            .await
        {
            Ok(()) => {
                session.commit_transaction().await.map_err(backend)?;
                Ok(project)
            }
            Err(err) => {
                if let Err(abort) = session.abort_transaction().await {
                    warn!("Aborting project {} transaction failed: {}", project.id, abort);
                }
                Err(err)
            }
        }
    }

    async fn update_project(&self, project: Project) -> StoreResult<Project> {
        let replacement = with_created(encode(&project)?, project.created_at);
        if self.replace(PROJECTS, &project.id, doc! {}, replacement).await? {
            Ok(project)
        } else {
            Err(StoreError::Conflict(format!("Project {} no longer exists", project.id)))
        }
    }

    async fn delete_project(&self, id: &str) -> StoreResult<bool> {
        let groups: Vec<Group> = self
            .find_many(GROUPS, doc! { "projectId": id }, doc! {})
            .await?;
        let group_ids: Vec<String> = groups.into_iter().map(|g| g.id).collect();

        let mut session = self.client.start_session().await.map_err(backend)?;
        session.start_transaction().await.map_err(backend)?;
        match self.remove_project_bundle(&mut session, id, group_ids).await {
            Ok(deleted) => {
                session.commit_transaction().await.map_err(backend)?;
                Ok(deleted)
            }
            Err(err) => {
                if let Err(abort) = session.abort_transaction().await {
                    warn!("Aborting project {} delete failed: {}", id, abort);
                }
                Err(err)
            }
        }
    }

    async fn find_project(&self, id: &str) -> StoreResult<Option<Project>> {
        self.find_one(PROJECTS, doc! { "id": id }).await
    }

    async fn list_projects(&self) -> StoreResult<Vec<Project>> {
        self.find_many(PROJECTS, doc! {}, doc! { "createdMs": -1 })
            .await
    }

    async fn list_projects_for_user(&self, user_id: &str) -> StoreResult<Vec<Project>> {
        let memberships: Vec<ProjectMember> = self
            .find_many(PROJECT_MEMBERS, doc! { "userId": user_id }, doc! {})
            .await?;
        let project_ids: Vec<String> = memberships.into_iter().map(|m| m.project_id).collect();
        let query = doc! {
            "$or": [
                { "id": { "$in": project_ids } },
                { "managerId": user_id },
            ]
        };
        self.find_many(PROJECTS, query, doc! { "createdMs": -1 }).await
    }

    async fn insert_member(&self, member: ProjectMember) -> StoreResult<ProjectMember> {
        self.coll(PROJECT_MEMBERS)
            .insert_one(encode(&member)?)
            .await
            .map_err(|e| write_error(e, || StoreError::Duplicate(DUPLICATE_MEMBER.into())))?;
        Ok(member)
    }

    async fn find_member(
        &self,
        project_id: &str,
        user_id: &str,
    ) -> StoreResult<Option<ProjectMember>> {
        self.find_one(
            PROJECT_MEMBERS,
            doc! { "projectId": project_id, "userId": user_id },
        )
        .await
    }

    async fn list_members(&self, project_id: &str) -> StoreResult<Vec<ProjectMember>> {
        self.find_many(
            PROJECT_MEMBERS,
            doc! { "projectId": project_id },
            doc! { "joinedAt": 1 },
        )
        .await
    }

    async fn delete_member(&self, project_id: &str, user_id: &str) -> StoreResult<bool> {
        self.remove(
            PROJECT_MEMBERS,
            doc! { "projectId": project_id, "userId": user_id },
        )
        .await
    }

    async fn find_group(&self, id: &str) -> StoreResult<Option<Group>> {
        self.find_one(GROUPS, doc! { "id": id }).await
    }

    async fn find_group_by_project(&self, project_id: &str) -> StoreResult<Option<Group>> {
        self.find_one(GROUPS, doc! { "projectId": project_id }).await
    }

    async fn insert_message(&self, message: Message) -> StoreResult<Message> {
        self.coll(MESSAGES)
            .insert_one(with_created(encode(&message)?, message.created_at))
            .await
            .map_err(backend)?;
        Ok(message)
    }

    async fn list_messages(&self, group_id: &str, order: SortOrder) -> StoreResult<Vec<Message>> {
        let direction = match order {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        };
        self.find_many(
            MESSAGES,
            doc! { "groupId": group_id },
            doc! { "createdMs": direction, "_id": direction },
        )
        .await
    }

    async fn start_timer(&self, entry: TimeEntry) -> StoreResult<TimeEntry> {
        self.coll(TIME_ENTRIES)
            .insert_one(time_entry_document(&entry)?)
            .await
            .map_err(|e| write_error(e, || StoreError::Conflict(TIMER_ALREADY_RUNNING.into())))?;
        Ok(entry)
    }

    async fn find_running_timer(&self, user_id: &str) -> StoreResult<Option<TimeEntry>> {
        self.find_one(TIME_ENTRIES, doc! { "userId": user_id, "running": true })
            .await
    }

    async fn close_timer(&self, entry: TimeEntry) -> StoreResult<Option<TimeEntry>> {
        let replacement = time_entry_document(&entry)?;
        let closed = self
            .replace(TIME_ENTRIES, &entry.id, doc! { "running": true }, replacement)
            .await?;
        Ok(closed.then_some(entry))
    }

    async fn insert_time_entry(&self, entry: TimeEntry) -> StoreResult<TimeEntry> {
        self.coll(TIME_ENTRIES)
            .insert_one(time_entry_document(&entry)?)
            .await
            .map_err(|e| write_error(e, || StoreError::Conflict(TIMER_ALREADY_RUNNING.into())))?;
        Ok(entry)
    }

    async fn find_time_entry(&self, id: &str) -> StoreResult<Option<TimeEntry>> {
        self.find_one(TIME_ENTRIES, doc! { "id": id }).await
    }

    async fn delete_time_entry(&self, id: &str) -> StoreResult<bool> {
        self.remove(TIME_ENTRIES, doc! { "id": id }).await
    }

    async fn list_time_entries(&self, filter: &TimeEntryFilter) -> StoreResult<Vec<TimeEntry>> {
        self.find_many(
            TIME_ENTRIES,
            time_entry_query(filter),
            doc! { "startMs": -1 },
        )
        .await
    }

    async fn total_minutes(&self, user_id: &str, range: &DateRange) -> StoreResult<i64> {
        let filter = TimeEntryFilter {
            user_ids: Some(vec![user_id.to_string()]),
            task_id: None,
            range: Some(*range),
        };
        let pipeline = vec![
            doc! { "$match": time_entry_query(&filter) },
            doc! {
                "$group": {
                    "_id": Bson::Null,
                    "total": { "$sum": { "$ifNull": ["$durationMinutes", 0_i64] } },
                }
            },
        ];
        let mut cursor = self
            .coll(TIME_ENTRIES)
            .aggregate(pipeline)
            .await
            .map_err(backend)?;
        let total = match cursor.try_next().await.map_err(backend)? {
            Some(row) => match row.get("total") {
                Some(Bson::Int64(n)) => *n,
                Some(Bson::Int32(n)) => i64::from(*n),
                Some(Bson::Double(n)) => *n as i64,
                _ => 0,
            },
            None => 0,
        };
        Ok(total)
    }

    async fn insert_activity(&self, activity: Activity) -> StoreResult<Activity> {
        self.coll(ACTIVITIES)
            .insert_one(with_created(encode(&activity)?, activity.created_at))
            .await
            .map_err(backend)?;
        Ok(activity)
    }

    async fn page_activities(
        &self,
        filter: &ActivityFilter,
        page: &PageRequest,
    ) -> StoreResult<(Vec<Activity>, u64)> {
        let query = activity_query(filter);
        let total = self
            .coll(ACTIVITIES)
            .count_documents(query.clone())
            .await
            .map_err(backend)?;
        let documents: Vec<Document> = self
            .coll(ACTIVITIES)
            .find(query)
            .sort(doc! { "createdMs": -1, "_id": -1 })
            .skip(page.offset())
            .limit(page.size() as i64)
            .await
            .map_err(backend)?
            .try_collect()
            .await
            .map_err(backend)?;
        let content = documents
            .into_iter()
            .map(decode)
            .collect::<StoreResult<Vec<Activity>>>()?;
        Ok((content, total))
    }

    async fn list_activities(
        &self,
        filter: &ActivityFilter,
        limit: Option<u64>,
    ) -> StoreResult<Vec<Activity>> {
        let coll = self.coll(ACTIVITIES);
        let mut find = coll
            .find(activity_query(filter))
            .sort(doc! { "createdMs": -1, "_id": -1 });
        if let Some(limit) = limit {
            find = find.limit(limit as i64);
        }
        let documents: Vec<Document> = find
            .await
            .map_err(backend)?
            .try_collect()
            .await
            .map_err(backend)?;
        documents.into_iter().map(decode).collect()
    }

    async fn count_activities(&self, user_id: &str, since: DateTime<Utc>) -> StoreResult<u64> {
        self.coll(ACTIVITIES)
            .count_documents(doc! {
                "userId": user_id,
                "createdMs": { "$gte": since.timestamp_millis() },
            })
            .await
            .map_err(backend)
    }

    async fn insert_leave(&self, leave: LeaveRequest) -> StoreResult<LeaveRequest> {
        self.coll(LEAVE_REQUESTS)
            .insert_one(with_created(encode(&leave)?, leave.created_at))
            .await
            .map_err(backend)?;
        Ok(leave)
    }

    async fn update_leave(&self, leave: LeaveRequest) -> StoreResult<LeaveRequest> {
        let replacement = with_created(encode(&leave)?, leave.created_at);
        if self.replace(LEAVE_REQUESTS, &leave.id, doc! {}, replacement).await? {
            Ok(leave)
        } else {
            Err(StoreError::Conflict(format!("Leave request {} no longer exists", leave.id)))
        }
    }

    async fn find_leave(&self, id: &str) -> StoreResult<Option<LeaveRequest>> {
        self.find_one(LEAVE_REQUESTS, doc! { "id": id }).await
    }

    async fn list_leave(&self, filter: &LeaveFilter) -> StoreResult<Vec<LeaveRequest>> {
        let mut query = Document::new();
        if let Some(user_id) = &filter.user_id {
            query.insert("userId", user_id.as_str());
        }
        if let Some(status) = filter.status {
            query.insert("status", mongodb::bson::to_bson(&status).map_err(backend)?);
        }
        self.find_many(LEAVE_REQUESTS, query, doc! { "createdMs": -1 })
            .await
    }

    async fn insert_attendance(&self, attendance: Attendance) -> StoreResult<Attendance> {
        self.coll(ATTENDANCE)
            .insert_one(encode(&attendance)?)
            .await
            .map_err(|e| write_error(e, || StoreError::Duplicate(DUPLICATE_ATTENDANCE.into())))?;
        Ok(attendance)
    }

    async fn update_attendance(&self, attendance: Attendance) -> StoreResult<Attendance> {
        if self
            .replace(ATTENDANCE, &attendance.id, doc! {}, encode(&attendance)?)
            .await?
        {
            Ok(attendance)
        } else {
            Err(StoreError::Conflict(format!(
                "Attendance {} no longer exists",
                attendance.id
            )))
        }
    }

    async fn find_attendance(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> StoreResult<Option<Attendance>> {
        self.find_one(
            ATTENDANCE,
            doc! { "userId": user_id, "date": date.to_string() },
        )
        .await
    }

    async fn list_attendance(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<Vec<Attendance>> {
        // ISO dates compare correctly as strings.
        self.find_many(
            ATTENDANCE,
            doc! {
                "userId": user_id,
                "date": { "$gte": from.to_string(), "$lte": to.to_string() },
            },
            doc! { "date": -1 },
        )
        .await
    }
}
