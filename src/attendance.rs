// src/attendance.rs

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::info;
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::current_user;
use crate::error::{AppError, AppResult};
use crate::models::{parse_enum_or_default, ApiResponse, Attendance, AttendanceStatus, CheckInRequest, User};
use crate::policy::require_manager;
use crate::store::Store;

const DEFAULT_WINDOW_DAYS: i64 = 30;

/// One check-in per user per calendar day (UTC).
pub async fn check_in(
    store: &dyn Store,
    actor: &User,
    request: CheckInRequest,
    now: DateTime<Utc>,
) -> AppResult<Attendance> {
    let attendance = Attendance {
        id: Uuid::new_v4().to_string(),
        user_id: actor.id.clone(),
        date: now.date_naive(),
        status: parse_enum_or_default(request.status.as_deref(), AttendanceStatus::Present),
        check_in: now,
        check_out: None,
        notes: request.notes,
    };
    let attendance = store.insert_attendance(attendance).await?;
    info!("User {} checked in for {}", actor.id, attendance.date);
    Ok(attendance)
}

pub async fn check_out(store: &dyn Store, actor: &User, now: DateTime<Utc>) -> AppResult<Attendance> {
    let mut attendance = store
        .find_attendance(&actor.id, now.date_naive())
        .await?
        .ok_or_else(|| AppError::not_found("No check-in found for today"))?;
    if attendance.check_out.is_some() {
        return Err(AppError::bad_request("Already checked out today"));
    }
    attendance.check_out = Some(now);
    let attendance = store.update_attendance(attendance).await?;
    info!("User {} checked out for {}", actor.id, attendance.date);
    Ok(attendance)
}

/// Defaults to the 30 days ending `today`.
fn window(from: Option<NaiveDate>, to: Option<NaiveDate>, today: NaiveDate) -> AppResult<(NaiveDate, NaiveDate)> {
    let to = to.unwrap_or(today);
    let from = from.unwrap_or(to - Duration::days(DEFAULT_WINDOW_DAYS));
    if to < from {
        return Err(AppError::bad_request("End date cannot be before start date"));
    }
    Ok((from, to))
}

pub async fn attendance_for(
    store: &dyn Store,
    actor: &User,
    user_id: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    today: NaiveDate,
) -> AppResult<Vec<Attendance>> {
    if user_id != actor.id {
        store
            .find_user(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))?;
        require_manager(actor, "Only managers can view other users' attendance")?;
    }
    let (from, to) = window(from, to, today)?;
    Ok(store.list_attendance(user_id, from, to).await?)
}

#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

/// POST /api/attendance/check-in
pub async fn post_check_in(
    req: HttpRequest,
    data: web::Data<AppState>,
    body: Option<web::Json<CheckInRequest>>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let request = body.map(web::Json::into_inner).unwrap_or_default();
    let attendance = check_in(data.store.as_ref(), &actor, request, Utc::now()).await?;
    Ok(HttpResponse::Created().json(ApiResponse::ok("Checked in successfully", attendance)))
}

/// POST /api/attendance/check-out
pub async fn post_check_out(req: HttpRequest, data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let attendance = check_out(data.store.as_ref(), &actor, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Checked out successfully", attendance)))
}

/// GET /api/attendance/mine?from=..&to=..
pub async fn mine(
    req: HttpRequest,
    data: web::Data<AppState>,
    query: web::Query<WindowQuery>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let records = attendance_for(
        data.store.as_ref(),
        &actor,
        &actor.id,
        query.from,
        query.to,
        Utc::now().date_naive(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Attendance retrieved successfully", records)))
}

/// GET /api/attendance/user/{user_id}?from=..&to=..
pub async fn for_user(
    req: HttpRequest,
    data: web::Data<AppState>,
    user_id: web::Path<String>,
    query: web::Query<WindowQuery>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let records = attendance_for(
        data.store.as_ref(),
        &actor,
        &user_id,
        query.from,
        query.to,
        Utc::now().date_naive(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Attendance retrieved successfully", records)))
}
