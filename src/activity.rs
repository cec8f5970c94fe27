// src/activity.rs

use std::collections::HashMap;

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::current_user;
use crate::error::{AppError, AppResult};
use crate::models::{
    Activity, ActivityFilter, ActivityView, ApiResponse, DateRange, Page, PageRequest, User,
};
use crate::policy::{authorize_user_read, require_manager};
use crate::store::Store;

pub const TASK_CREATED: &str = "TASK_CREATED";
pub const TASK_UPDATED: &str = "TASK_UPDATED";
pub const TASK_COMPLETED: &str = "TASK_COMPLETED";
pub const TASK_DELETED: &str = "TASK_DELETED";
pub const TIMER_STARTED: &str = "TIMER_STARTED";
pub const TIMER_STOPPED: &str = "TIMER_STOPPED";
pub const TIME_ENTRY_CREATED: &str = "TIME_ENTRY_CREATED";
pub const TIME_ENTRY_DELETED: &str = "TIME_ENTRY_DELETED";
pub const LEAVE_REQUESTED: &str = "LEAVE_REQUESTED";
pub const LEAVE_APPROVED: &str = "LEAVE_APPROVED";
pub const LEAVE_REJECTED: &str = "LEAVE_REJECTED";
pub const LEAVE_CANCELLED: &str = "LEAVE_CANCELLED";

pub const DEFAULT_RECENT_LIMIT: u64 = 10;
pub const MAX_RECENT_LIMIT: u64 = 100;

/// Appends an audit record. A failed write is logged and otherwise ignored.
pub async fn record(
    store: &dyn Store,
    user_id: &str,
    action: &str,
    entity_type: &str,
    entity_id: Option<&str>,
    details: Option<String>,
    now: DateTime<Utc>,
) {
    let activity = Activity {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        action: action.to_string(),
        entity_type: entity_type.to_string(),
        entity_id: entity_id.map(str::to_string),
        details,
        created_at: now,
    };
    if let Err(e) = store.insert_activity(activity).await {
        error!("Failed to record {} for user {}: {}", action, user_id, e);
    }
}

async fn to_views(store: &dyn Store, activities: Vec<Activity>) -> AppResult<Vec<ActivityView>> {
    let users: HashMap<String, User> = store
        .list_users()
        .await?
        .into_iter()
        .map(|user| (user.id.clone(), user))
        .collect();
    Ok(activities
        .into_iter()
        .map(|activity| {
            let user = users.get(&activity.user_id);
            ActivityView {
                user_name: user.map(|u| u.name.clone()),
                user_email: user.map(|u| u.email.clone()),
                id: activity.id,
                user_id: activity.user_id,
                action: activity.action,
                entity_type: activity.entity_type,
                entity_id: activity.entity_id,
                details: activity.details,
                created_at: activity.created_at,
            }
        })
        .collect())
}

async fn require_user(store: &dyn Store, user_id: &str) -> AppResult<User> {
    store
        .find_user(user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))
}

async fn page_of(
    store: &dyn Store,
    filter: &ActivityFilter,
    request: &PageRequest,
) -> AppResult<Page<ActivityView>> {
    let (activities, total) = store.page_activities(filter, request).await?;
    debug!("Activity page {} holds {} of {}", request.page, activities.len(), total);
    Ok(Page::new(to_views(store, activities).await?, request, total))
}

pub async fn user_activities(
    store: &dyn Store,
    actor: &User,
    user_id: &str,
    request: &PageRequest,
) -> AppResult<Page<ActivityView>> {
    require_user(store, user_id).await?;
    authorize_user_read(actor, user_id)?;
    let filter = ActivityFilter {
        user_ids: Some(vec![user_id.to_string()]),
        ..Default::default()
    };
    page_of(store, &filter, request).await
}

pub async fn team_activities(
    store: &dyn Store,
    actor: &User,
    user_ids: Vec<String>,
    request: &PageRequest,
) -> AppResult<Page<ActivityView>> {
    require_manager(actor, "Only managers can view team activity")?;
    let filter = ActivityFilter {
        user_ids: Some(user_ids),
        ..Default::default()
    };
    page_of(store, &filter, request).await
}

pub async fn all_activities(
    store: &dyn Store,
    actor: &User,
    request: &PageRequest,
) -> AppResult<Page<ActivityView>> {
    require_manager(actor, "Only managers can view all activity")?;
    page_of(store, &ActivityFilter::default(), request).await
}

pub async fn activities_in_range(
    store: &dyn Store,
    actor: &User,
    user_id: &str,
    range: DateRange,
) -> AppResult<Vec<ActivityView>> {
    require_user(store, user_id).await?;
    authorize_user_read(actor, user_id)?;
    if range.end < range.start {
        return Err(AppError::bad_request("End time must be after start time"));
    }
    let filter = ActivityFilter {
        user_ids: Some(vec![user_id.to_string()]),
        since: Some(range.start),
        until: Some(range.end),
    };
    let activities = store.list_activities(&filter, None).await?;
    to_views(store, activities).await
}

pub async fn activity_count(
    store: &dyn Store,
    actor: &User,
    user_id: &str,
    since: DateTime<Utc>,
) -> AppResult<u64> {
    require_user(store, user_id).await?;
    authorize_user_read(actor, user_id)?;
    Ok(store.count_activities(user_id, since).await?)
}

/// Newest activity across everyone within the last `window_hours`.
pub async fn recent_activities(
    store: &dyn Store,
    actor: &User,
    limit: Option<u64>,
    window_hours: i64,
    now: DateTime<Utc>,
) -> AppResult<Vec<ActivityView>> {
    require_manager(actor, "Only managers can view recent activity")?;
    let limit = limit.unwrap_or(DEFAULT_RECENT_LIMIT).clamp(1, MAX_RECENT_LIMIT);
    let filter = ActivityFilter {
        since: Some(now - Duration::hours(window_hours)),
        ..Default::default()
    };
    let activities = store.list_activities(&filter, Some(limit)).await?;
    to_views(store, activities).await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamQuery {
    /// Comma-separated user ids.
    pub user_ids: String,
}

#[derive(Debug, Deserialize)]
pub struct SinceQuery {
    pub since: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<u64>,
}

/// GET /api/activities/user/{user_id}
pub async fn get_user_activities(
    req: HttpRequest,
    data: web::Data<AppState>,
    user_id: web::Path<String>,
    page: web::Query<PageRequest>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let page = user_activities(data.store.as_ref(), &actor, &user_id, &page).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("User activities retrieved successfully", page)))
}

/// GET /api/activities/team?userIds=a,b
pub async fn get_team_activities(
    req: HttpRequest,
    data: web::Data<AppState>,
    team: web::Query<TeamQuery>,
    page: web::Query<PageRequest>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let user_ids: Vec<String> = team
        .user_ids
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    info!("Fetching team activity for {} users", user_ids.len());
    let page = team_activities(data.store.as_ref(), &actor, user_ids, &page).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Team activities retrieved successfully", page)))
}

/// GET /api/activities/all
pub async fn get_all_activities(
    req: HttpRequest,
    data: web::Data<AppState>,
    page: web::Query<PageRequest>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let page = all_activities(data.store.as_ref(), &actor, &page).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("All activities retrieved successfully", page)))
}

/// GET /api/activities/user/{user_id}/range?start=..&end=..
pub async fn get_activities_in_range(
    req: HttpRequest,
    data: web::Data<AppState>,
    user_id: web::Path<String>,
    range: web::Query<DateRange>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let activities =
        activities_in_range(data.store.as_ref(), &actor, &user_id, range.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Activities retrieved successfully", activities)))
}

/// GET /api/activities/user/{user_id}/count?since=..
pub async fn get_activity_count(
    req: HttpRequest,
    data: web::Data<AppState>,
    user_id: web::Path<String>,
    query: web::Query<SinceQuery>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let count = activity_count(data.store.as_ref(), &actor, &user_id, query.since).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(
        "Activity count retrieved successfully",
        json!({ "count": count }),
    )))
}

/// GET /api/activities/recent?limit=..
pub async fn get_recent_activities(
    req: HttpRequest,
    data: web::Data<AppState>,
    query: web::Query<LimitQuery>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let activities = recent_activities(
        data.store.as_ref(),
        &actor,
        query.limit,
        data.config.recent_activity_hours,
        Utc::now(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Recent activities retrieved successfully", activities)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::store::MemoryStore;

    async fn seed_user(store: &MemoryStore, id: &str, role: Role) -> User {
        store
            .insert_user(User {
                id: id.to_string(),
                name: id.to_uppercase(),
                email: format!("{}@example.com", id),
                password_hash: String::new(),
                role,
                created_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    #[actix_web::test]
    async fn user_feed_is_paged_newest_first_with_names() {
        let store = MemoryStore::new();
        let employee = seed_user(&store, "e", Role::Employee).await;
        let start = Utc::now() - Duration::minutes(10);
        for minute in 0..3 {
            record(
                &store,
                "e",
                TASK_UPDATED,
                "TASK",
                Some("t1"),
                Some(format!("edit {}", minute)),
                start + Duration::minutes(minute),
            )
            .await;
        }

        let request = PageRequest { page: 0, size: 2 };
        let page = user_activities(&store, &employee, "e", &request).await.unwrap();
        assert_eq!(page.total_elements, 3);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.content.len(), 2);
        assert_eq!(page.content[0].details.as_deref(), Some("edit 2"));
        assert_eq!(page.content[0].user_name.as_deref(), Some("E"));
    }

    #[actix_web::test]
    async fn employees_cannot_read_other_feeds() {
        let store = MemoryStore::new();
        let employee = seed_user(&store, "e", Role::Employee).await;
        seed_user(&store, "f", Role::Employee).await;
        let request = PageRequest::default();
        assert!(matches!(
            user_activities(&store, &employee, "f", &request).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            user_activities(&store, &employee, "ghost", &request).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            all_activities(&store, &employee, &request).await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[actix_web::test]
    async fn recent_feed_respects_window_and_limit() {
        let store = MemoryStore::new();
        let manager = seed_user(&store, "m", Role::Manager).await;
        let now = Utc::now();
        record(&store, "m", TASK_CREATED, "TASK", None, None, now - Duration::hours(30)).await;
        for minute in 0..4 {
            record(&store, "m", TASK_CREATED, "TASK", None, None, now - Duration::minutes(minute)).await;
        }

        let recent = recent_activities(&store, &manager, Some(3), 24, now).await.unwrap();
        assert_eq!(recent.len(), 3);
        let all_recent = recent_activities(&store, &manager, None, 24, now).await.unwrap();
        assert_eq!(all_recent.len(), 4);
        assert_eq!(
            activity_count(&store, &manager, "m", now - Duration::hours(48)).await.unwrap(),
            5
        );
    }
}
