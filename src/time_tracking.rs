// src/time_tracking.rs

//! Timers and time entries. A user is either idle or has exactly one running
//! entry; the store rejects a second running entry, so two concurrent starts
//! cannot both succeed.

use std::collections::HashMap;

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::activity::{self, TIMER_STARTED, TIMER_STOPPED, TIME_ENTRY_CREATED, TIME_ENTRY_DELETED};
use crate::app_state::AppState;
use crate::auth::current_user;
use crate::error::{AppError, AppResult};
use crate::models::{
    ApiResponse, DateRange, ManualEntryRequest, Task, TimeEntry, TimeEntryFilter, TimeEntryView,
    User,
};
use crate::policy::{authorize_time_entry_delete, authorize_user_read, require_manager};
use crate::store::{Store, TIMER_ALREADY_RUNNING};

const ENTITY: &str = "TIME_ENTRY";
const NO_RUNNING_TIMER: &str = "No running timer found";

/// Whole minutes between `start` and `end`, rounded down.
pub fn duration_minutes(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_minutes().max(0)
}

async fn find_task(store: &dyn Store, id: &str) -> AppResult<Task> {
    store
        .find_task(id)
        .await?
        .ok_or_else(|| AppError::not_found("Task not found"))
}

async fn require_user(store: &dyn Store, id: &str) -> AppResult<User> {
    store
        .find_user(id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))
}

fn check_range(range: &DateRange) -> AppResult<()> {
    if range.end < range.start {
        Err(AppError::bad_request("End time cannot be before start time"))
    } else {
        Ok(())
    }
}

async fn views(store: &dyn Store, entries: Vec<TimeEntry>) -> AppResult<Vec<TimeEntryView>> {
    let names: HashMap<String, String> = store
        .list_users()
        .await?
        .into_iter()
        .map(|user| (user.id, user.name))
        .collect();
    let mut titles: HashMap<String, Option<String>> = HashMap::new();
    let mut views = Vec::with_capacity(entries.len());
    for entry in entries {
        let task_title = match &entry.task_id {
            Some(task_id) => {
                if !titles.contains_key(task_id) {
                    let title = store.find_task(task_id).await?.map(|task| task.title);
                    titles.insert(task_id.clone(), title);
                }
                titles.get(task_id).cloned().flatten()
            }
            None => None,
        };
        views.push(TimeEntryView {
            user_name: names.get(&entry.user_id).cloned(),
            is_running: entry.is_running(),
            id: entry.id,
            user_id: entry.user_id,
            task_id: entry.task_id,
            task_title,
            start_time: entry.start_time,
            end_time: entry.end_time,
            duration_minutes: entry.duration_minutes,
            description: entry.description,
            is_manual: entry.is_manual,
        });
    }
    Ok(views)
}

async fn view(store: &dyn Store, entry: TimeEntry) -> AppResult<TimeEntryView> {
    let mut views = views(store, vec![entry]).await?;
    views
        .pop()
        .ok_or_else(|| AppError::Internal("time entry view went missing".to_string()))
}

pub async fn start_timer(
    store: &dyn Store,
    actor: &User,
    task_id: Option<&str>,
    description: Option<String>,
    now: DateTime<Utc>,
) -> AppResult<TimeEntryView> {
    if store.find_running_timer(&actor.id).await?.is_some() {
        warn!("User {} tried to start a second timer", actor.id);
        return Err(AppError::bad_request(TIMER_ALREADY_RUNNING));
    }
    if let Some(task_id) = task_id {
        find_task(store, task_id).await?;
    }

    let entry = TimeEntry {
        id: Uuid::new_v4().to_string(),
        user_id: actor.id.clone(),
        task_id: task_id.map(str::to_string),
        start_time: now,
        end_time: None,
        duration_minutes: None,
        description,
        is_manual: false,
        created_at: now,
        updated_at: now,
    };
    // The store is the serialization point for the one-running-timer rule.
    let entry = store.start_timer(entry).await?;
    info!("Timer {} started for user {}", entry.id, actor.id);
    activity::record(
        store,
        &actor.id,
        TIMER_STARTED,
        ENTITY,
        Some(&entry.id),
        entry.task_id.as_ref().map(|task| format!("Task {}", task)),
        now,
    )
    .await;
    view(store, entry).await
}

pub async fn stop_timer(store: &dyn Store, actor: &User, now: DateTime<Utc>) -> AppResult<TimeEntryView> {
    let mut entry = store
        .find_running_timer(&actor.id)
        .await?
        .ok_or_else(|| AppError::not_found(NO_RUNNING_TIMER))?;
    entry.end_time = Some(now);
    entry.duration_minutes = Some(duration_minutes(entry.start_time, now));
    entry.updated_at = now;

    let entry = store
        .close_timer(entry)
        .await?
        .ok_or_else(|| AppError::not_found(NO_RUNNING_TIMER))?;
    info!(
        "Timer {} stopped for user {} after {} minutes",
        entry.id,
        actor.id,
        entry.duration_minutes.unwrap_or(0)
    );
    activity::record(
        store,
        &actor.id,
        TIMER_STOPPED,
        ENTITY,
        Some(&entry.id),
        entry.duration_minutes.map(|minutes| format!("{} minutes", minutes)),
        now,
    )
    .await;
    view(store, entry).await
}

pub async fn running_timer(store: &dyn Store, actor: &User) -> AppResult<Option<TimeEntryView>> {
    match store.find_running_timer(&actor.id).await? {
        Some(entry) => Ok(Some(view(store, entry).await?)),
        None => Ok(None),
    }
}

/// Back-filled entries are not checked for overlap with existing ones.
pub async fn manual_entry(
    store: &dyn Store,
    actor: &User,
    request: ManualEntryRequest,
    now: DateTime<Utc>,
) -> AppResult<TimeEntryView> {
    let (start, end) = match (request.start_time, request.end_time) {
        (Some(start), Some(end)) => (start, end),
        _ => return Err(AppError::bad_request("Start time and end time are required")),
    };
    check_range(&DateRange { start, end })?;
    if let Some(task_id) = &request.task_id {
        find_task(store, task_id).await?;
    }

    let entry = TimeEntry {
        id: Uuid::new_v4().to_string(),
        user_id: actor.id.clone(),
        task_id: request.task_id,
        start_time: start,
        end_time: Some(end),
        duration_minutes: Some(duration_minutes(start, end)),
        description: request.description,
        is_manual: true,
        created_at: now,
        updated_at: now,
    };
    let entry = store.insert_time_entry(entry).await?;
    info!("Manual time entry {} created for user {}", entry.id, actor.id);
    activity::record(
        store,
        &actor.id,
        TIME_ENTRY_CREATED,
        ENTITY,
        Some(&entry.id),
        entry.duration_minutes.map(|minutes| format!("{} minutes", minutes)),
        now,
    )
    .await;
    view(store, entry).await
}

pub async fn delete_entry(store: &dyn Store, actor: &User, id: &str, now: DateTime<Utc>) -> AppResult<()> {
    let entry = store
        .find_time_entry(id)
        .await?
        .ok_or_else(|| AppError::not_found("Time entry not found"))?;
    authorize_time_entry_delete(actor, &entry)?;
    if !store.delete_time_entry(&entry.id).await? {
        return Err(AppError::not_found("Time entry not found"));
    }
    info!("Time entry {} deleted by {}", entry.id, actor.id);
    activity::record(store, &actor.id, TIME_ENTRY_DELETED, ENTITY, Some(&entry.id), None, now).await;
    Ok(())
}

pub async fn user_entries(
    store: &dyn Store,
    actor: &User,
    user_id: &str,
    range: DateRange,
) -> AppResult<Vec<TimeEntryView>> {
    require_user(store, user_id).await?;
    authorize_user_read(actor, user_id)?;
    check_range(&range)?;
    let filter = TimeEntryFilter {
        user_ids: Some(vec![user_id.to_string()]),
        task_id: None,
        range: Some(range),
    };
    let entries = store.list_time_entries(&filter).await?;
    debug!("Found {} time entries for user {}", entries.len(), user_id);
    views(store, entries).await
}

pub async fn user_total(
    store: &dyn Store,
    actor: &User,
    user_id: &str,
    range: DateRange,
) -> AppResult<i64> {
    require_user(store, user_id).await?;
    authorize_user_read(actor, user_id)?;
    check_range(&range)?;
    Ok(store.total_minutes(user_id, &range).await?)
}

pub async fn team_entries(
    store: &dyn Store,
    actor: &User,
    user_ids: Vec<String>,
    range: DateRange,
) -> AppResult<Vec<TimeEntryView>> {
    require_manager(actor, "Only managers can view team time entries")?;
    check_range(&range)?;
    let filter = TimeEntryFilter {
        user_ids: Some(user_ids),
        task_id: None,
        range: Some(range),
    };
    let entries = store.list_time_entries(&filter).await?;
    views(store, entries).await
}

pub async fn task_entries(store: &dyn Store, actor: &User, task_id: &str) -> AppResult<Vec<TimeEntryView>> {
    find_task(store, task_id).await?;
    require_manager(actor, "Only managers can view time entries by task")?;
    let filter = TimeEntryFilter {
        task_id: Some(task_id.to_string()),
        ..Default::default()
    };
    let entries = store.list_time_entries(&filter).await?;
    views(store, entries).await
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartQuery {
    pub task_id: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamQuery {
    /// Comma-separated user ids.
    pub user_ids: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// POST /api/time-tracking/start?taskId=..&description=..
pub async fn start(
    req: HttpRequest,
    data: web::Data<AppState>,
    query: web::Query<StartQuery>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let query = query.into_inner();
    let entry = start_timer(
        data.store.as_ref(),
        &actor,
        query.task_id.as_deref(),
        query.description,
        Utc::now(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Timer started successfully", entry)))
}

/// POST /api/time-tracking/stop
pub async fn stop(req: HttpRequest, data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let entry = stop_timer(data.store.as_ref(), &actor, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Timer stopped successfully", entry)))
}

/// GET /api/time-tracking/running
pub async fn running(req: HttpRequest, data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let entry = running_timer(data.store.as_ref(), &actor).await?;
    let message = if entry.is_some() {
        "Running timer found"
    } else {
        "No running timer"
    };
    Ok(HttpResponse::Ok().json(ApiResponse {
        success: true,
        message: message.to_string(),
        data: entry,
    }))
}

/// POST /api/time-tracking/manual
pub async fn manual(
    req: HttpRequest,
    data: web::Data<AppState>,
    body: web::Json<ManualEntryRequest>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let entry = manual_entry(data.store.as_ref(), &actor, body.into_inner(), Utc::now()).await?;
    Ok(HttpResponse::Created().json(ApiResponse::ok("Time entry created successfully", entry)))
}

/// GET /api/time-tracking/user/{user_id}?start=..&end=..
pub async fn for_user(
    req: HttpRequest,
    data: web::Data<AppState>,
    user_id: web::Path<String>,
    range: web::Query<DateRange>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let entries = user_entries(data.store.as_ref(), &actor, &user_id, range.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Time entries retrieved successfully", entries)))
}

/// GET /api/time-tracking/user/{user_id}/total?start=..&end=..
pub async fn total(
    req: HttpRequest,
    data: web::Data<AppState>,
    user_id: web::Path<String>,
    range: web::Query<DateRange>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let minutes = user_total(data.store.as_ref(), &actor, &user_id, range.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(
        "Total time retrieved successfully",
        json!({ "totalMinutes": minutes }),
    )))
}

/// GET /api/time-tracking/team?userIds=a,b&start=..&end=..
pub async fn team(
    req: HttpRequest,
    data: web::Data<AppState>,
    query: web::Query<TeamQuery>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let query = query.into_inner();
    let user_ids = query
        .user_ids
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    let range = DateRange {
        start: query.start,
        end: query.end,
    };
    let entries = team_entries(data.store.as_ref(), &actor, user_ids, range).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Team time entries retrieved successfully", entries)))
}

/// GET /api/time-tracking/task/{task_id}
pub async fn for_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    task_id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let entries = task_entries(data.store.as_ref(), &actor, &task_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Task time entries retrieved successfully", entries)))
}

/// DELETE /api/time-tracking/{id}
pub async fn delete(
    req: HttpRequest,
    data: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    delete_entry(data.store.as_ref(), &actor, &id, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::message("Time entry deleted successfully")))
}
