// src/leave.rs

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Deserialize;
use uuid::Uuid;

use crate::activity::{self, LEAVE_APPROVED, LEAVE_CANCELLED, LEAVE_REJECTED, LEAVE_REQUESTED};
use crate::app_state::AppState;
use crate::auth::current_user;
use crate::error::{AppError, AppResult};
use crate::models::{
    parse_enum, parse_enum_or_default, ApiResponse, LeaveFilter, LeaveRequest, LeaveStatus,
    LeaveType, ReviewLeaveRequest, SubmitLeaveRequest, User,
};
use crate::policy::require_manager;
use crate::store::Store;

const ENTITY: &str = "LEAVE_REQUEST";

async fn find_leave(store: &dyn Store, id: &str) -> AppResult<LeaveRequest> {
    store
        .find_leave(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Leave request not found with id: {}", id)))
}

pub async fn submit_leave(
    store: &dyn Store,
    actor: &User,
    request: SubmitLeaveRequest,
    now: DateTime<Utc>,
) -> AppResult<LeaveRequest> {
    if request.end_date < request.start_date {
        return Err(AppError::bad_request("End date cannot be before start date"));
    }
    let existing = store
        .list_leave(&LeaveFilter {
            user_id: Some(actor.id.clone()),
            status: None,
        })
        .await?;
    if existing
        .iter()
        .any(|leave| leave.blocks_dates() && leave.overlaps(request.start_date, request.end_date))
    {
        warn!("User {} requested leave overlapping an existing request", actor.id);
        return Err(AppError::bad_request(
            "You already have a leave request covering these dates",
        ));
    }

    let leave = LeaveRequest {
        id: Uuid::new_v4().to_string(),
        user_id: actor.id.clone(),
        leave_type: parse_enum_or_default(request.leave_type.as_deref(), LeaveType::CasualLeave),
        start_date: request.start_date,
        end_date: request.end_date,
        days_count: (request.end_date - request.start_date).num_days() + 1,
        reason: request.reason,
        status: LeaveStatus::Pending,
        reviewed_by_id: None,
        review_comment: None,
        created_at: now,
        updated_at: now,
    };
    let leave = store.insert_leave(leave).await?;
    info!("Leave request {} submitted by {} for {} days", leave.id, actor.id, leave.days_count);
    activity::record(
        store,
        &actor.id,
        LEAVE_REQUESTED,
        ENTITY,
        Some(&leave.id),
        Some(format!("{} to {}", leave.start_date, leave.end_date)),
        now,
    )
    .await;
    Ok(leave)
}

pub async fn my_leave(store: &dyn Store, actor: &User) -> AppResult<Vec<LeaveRequest>> {
    Ok(store
        .list_leave(&LeaveFilter {
            user_id: Some(actor.id.clone()),
            status: None,
        })
        .await?)
}

/// Unrecognised status strings mean no status filter.
pub async fn list_leave(
    store: &dyn Store,
    actor: &User,
    status: Option<&str>,
) -> AppResult<Vec<LeaveRequest>> {
    require_manager(actor, "Only managers can view all leave requests")?;
    Ok(store
        .list_leave(&LeaveFilter {
            user_id: None,
            status: status.and_then(parse_enum),
        })
        .await?)
}

pub async fn review_leave(
    store: &dyn Store,
    actor: &User,
    id: &str,
    review: ReviewLeaveRequest,
    now: DateTime<Utc>,
) -> AppResult<LeaveRequest> {
    let mut leave = find_leave(store, id).await?;
    require_manager(actor, "Only managers can review leave requests")?;
    if leave.status != LeaveStatus::Pending {
        return Err(AppError::bad_request("Only pending leave requests can be reviewed"));
    }
    let (status, action) = if review.approve {
        (LeaveStatus::Approved, LEAVE_APPROVED)
    } else {
        (LeaveStatus::Rejected, LEAVE_REJECTED)
    };
    leave.status = status;
    leave.reviewed_by_id = Some(actor.id.clone());
    leave.review_comment = review.comment;
    leave.updated_at = now;

    let leave = store.update_leave(leave).await?;
    info!("Leave request {} marked {:?} by {}", leave.id, leave.status, actor.id);
    activity::record(store, &actor.id, action, ENTITY, Some(&leave.id), leave.review_comment.clone(), now).await;
    Ok(leave)
}

pub async fn cancel_leave(
    store: &dyn Store,
    actor: &User,
    id: &str,
    now: DateTime<Utc>,
) -> AppResult<LeaveRequest> {
    let mut leave = find_leave(store, id).await?;
    if leave.user_id != actor.id {
        warn!("User {} tried to cancel leave request {}", actor.id, leave.id);
        return Err(AppError::forbidden("You can only cancel your own leave requests"));
    }
    if leave.status != LeaveStatus::Pending {
        return Err(AppError::bad_request("Only pending leave requests can be cancelled"));
    }
    leave.status = LeaveStatus::Cancelled;
    leave.updated_at = now;
    let leave = store.update_leave(leave).await?;
    info!("Leave request {} cancelled", leave.id);
    activity::record(store, &actor.id, LEAVE_CANCELLED, ENTITY, Some(&leave.id), None, now).await;
    Ok(leave)
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub status: Option<String>,
}

/// POST /api/leave-requests
pub async fn submit(
    req: HttpRequest,
    data: web::Data<AppState>,
    body: web::Json<SubmitLeaveRequest>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let leave = submit_leave(data.store.as_ref(), &actor, body.into_inner(), Utc::now()).await?;
    Ok(HttpResponse::Created().json(ApiResponse::ok("Leave request submitted successfully", leave)))
}

/// GET /api/leave-requests/mine
pub async fn mine(req: HttpRequest, data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let requests = my_leave(data.store.as_ref(), &actor).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Leave requests retrieved successfully", requests)))
}

/// GET /api/leave-requests?status=..
pub async fn list(
    req: HttpRequest,
    data: web::Data<AppState>,
    query: web::Query<StatusQuery>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let requests = list_leave(data.store.as_ref(), &actor, query.status.as_deref()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Leave requests retrieved successfully", requests)))
}

/// PUT /api/leave-requests/{id}/review
pub async fn review(
    req: HttpRequest,
    data: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<ReviewLeaveRequest>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let leave = review_leave(data.store.as_ref(), &actor, &id, body.into_inner(), Utc::now()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Leave request reviewed successfully", leave)))
}

/// PUT /api/leave-requests/{id}/cancel
pub async fn cancel(
    req: HttpRequest,
    data: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let leave = cancel_leave(data.store.as_ref(), &actor, &id, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Leave request cancelled successfully", leave)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::store::MemoryStore;
    use chrono::NaiveDate;

    fn user(id: &str, role: Role) -> User {
        User {
            id: id.to_string(),
            name: id.to_string(),
            email: format!("{}@example.com", id),
            password_hash: String::new(),
            role,
            created_at: Utc::now(),
        }
    }

    fn request(start: (u32, u32), end: (u32, u32)) -> SubmitLeaveRequest {
        SubmitLeaveRequest {
            leave_type: Some("sick leave".to_string()),
            start_date: NaiveDate::from_ymd_opt(2024, start.0, start.1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, end.0, end.1).unwrap(),
            reason: None,
        }
    }

    #[actix_web::test]
    async fn submit_counts_days_and_blocks_overlaps() {
        let store = MemoryStore::new();
        let employee = user("e", Role::Employee);
        let leave = submit_leave(&store, &employee, request((3, 4), (3, 8)), Utc::now())
            .await
            .unwrap();
        assert_eq!(leave.days_count, 5);
        assert_eq!(leave.leave_type, LeaveType::SickLeave);
        assert_eq!(leave.status, LeaveStatus::Pending);

        assert!(matches!(
            submit_leave(&store, &employee, request((3, 8), (3, 9)), Utc::now()).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            submit_leave(&store, &employee, request((3, 9), (3, 1)), Utc::now()).await,
            Err(AppError::BadRequest(_))
        ));

        cancel_leave(&store, &employee, &leave.id, Utc::now()).await.unwrap();
        // Cancelled leave no longer blocks its dates.
        assert!(submit_leave(&store, &employee, request((3, 8), (3, 9)), Utc::now()).await.is_ok());
    }

    #[actix_web::test]
    async fn only_managers_review_and_only_pending_requests() {
        let store = MemoryStore::new();
        let employee = user("e", Role::Employee);
        let manager = user("m", Role::Manager);
        let leave = submit_leave(&store, &employee, request((6, 1), (6, 1)), Utc::now())
            .await
            .unwrap();

        let approve = || ReviewLeaveRequest {
            approve: true,
            comment: Some("Enjoy".to_string()),
        };
        assert!(matches!(
            review_leave(&store, &employee, &leave.id, approve(), Utc::now()).await,
            Err(AppError::Forbidden(_))
        ));
        let approved = review_leave(&store, &manager, &leave.id, approve(), Utc::now())
            .await
            .unwrap();
        assert_eq!(approved.status, LeaveStatus::Approved);
        assert_eq!(approved.reviewed_by_id.as_deref(), Some("m"));

        assert!(matches!(
            review_leave(&store, &manager, &leave.id, approve(), Utc::now()).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            cancel_leave(&store, &employee, &leave.id, Utc::now()).await,
            Err(AppError::BadRequest(_))
        ));
        assert_eq!(list_leave(&store, &manager, Some("approved")).await.unwrap().len(), 1);
        assert_eq!(list_leave(&store, &manager, Some("pending")).await.unwrap().len(), 0);
    }
}
