// src/dashboard.rs

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{NaiveDate, Utc};
use log::{debug, info};

use crate::analytics::{summarize, DashboardSummary, EnhancedDashboardSummary};
use crate::app_state::AppState;
use crate::auth::current_user;
use crate::error::{AppError, AppResult};
use crate::models::{ApiResponse, TaskFilter, User};
use crate::store::Store;

/// The caller's own tasks, with only the caller in the per-user list.
pub async fn personal_dashboard(
    store: &dyn Store,
    actor: &User,
    today: NaiveDate,
) -> AppResult<EnhancedDashboardSummary> {
    let filter = TaskFilter {
        assigned_to_id: Some(actor.id.clone()),
        status: None,
    };
    let tasks = store.list_tasks(&filter).await?;
    debug!("Personal dashboard for {} over {} tasks", actor.id, tasks.len());
    Ok(summarize(&tasks, std::slice::from_ref(actor), today))
}

/// Team-wide for managers; everyone else gets their personal view.
pub async fn enhanced_dashboard(
    store: &dyn Store,
    actor: &User,
    today: NaiveDate,
) -> AppResult<EnhancedDashboardSummary> {
    if !actor.is_manager() {
        return personal_dashboard(store, actor, today).await;
    }
    let tasks = store.list_tasks(&TaskFilter::default()).await?;
    let users = store.list_users().await?;
    info!(
        "Generating dashboard summary over {} tasks and {} users",
        tasks.len(),
        users.len()
    );
    Ok(summarize(&tasks, &users, today))
}

pub async fn dashboard_summary(
    store: &dyn Store,
    actor: &User,
    today: NaiveDate,
) -> AppResult<DashboardSummary> {
    Ok(enhanced_dashboard(store, actor, today).await?.into())
}

/// GET /api/dashboard/summary
pub async fn summary(req: HttpRequest, data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let summary = dashboard_summary(data.store.as_ref(), &actor, Utc::now().date_naive()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Dashboard summary retrieved successfully", summary)))
}

/// GET /api/dashboard/enhanced
pub async fn enhanced(req: HttpRequest, data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let summary = enhanced_dashboard(data.store.as_ref(), &actor, Utc::now().date_naive()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Enhanced dashboard retrieved successfully", summary)))
}

/// GET /api/dashboard/personal
pub async fn personal(req: HttpRequest, data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let summary = personal_dashboard(data.store.as_ref(), &actor, Utc::now().date_naive()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Personal dashboard retrieved successfully", summary)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, Role, Task, TaskStatus};
    use crate::store::MemoryStore;

    async fn seed_user(store: &MemoryStore, id: &str, role: Role) -> User {
        store
            .insert_user(User {
                id: id.to_string(),
                name: format!("User {}", id),
                email: format!("{}@example.com", id),
                password_hash: String::new(),
                role,
                created_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    async fn seed_task(store: &MemoryStore, id: &str, assignee: &str, status: TaskStatus) {
        store
            .insert_task(Task {
                id: id.to_string(),
                title: id.to_string(),
                description: None,
                status,
                priority: Priority::High,
                due_date: NaiveDate::from_ymd_opt(2024, 1, 1),
                completed_date: (status == TaskStatus::Completed)
                    .then(|| NaiveDate::from_ymd_opt(2023, 12, 31))
                    .flatten(),
                assigned_to_id: assignee.to_string(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    #[actix_web::test]
    async fn managers_see_the_team_and_employees_see_themselves() {
        let store = MemoryStore::new();
        let manager = seed_user(&store, "m", Role::Manager).await;
        let employee = seed_user(&store, "e", Role::Employee).await;
        seed_task(&store, "t1", "e", TaskStatus::Completed).await;
        seed_task(&store, "t2", "e", TaskStatus::Pending).await;
        seed_task(&store, "t3", "f", TaskStatus::InProgress).await;
        let today = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();

        let team = enhanced_dashboard(&store, &manager, today).await.unwrap();
        assert_eq!(team.total_tasks, 3);
        assert_eq!(team.overdue_tasks, 2);
        assert_eq!(team.high_priority_tasks, 2);
        assert_eq!(team.on_time_completion_percent, 100.0);
        assert_eq!(team.user_stats.len(), 2);
        assert_eq!(team.productivity_scores["User m"], 0.0);
        assert_eq!(team.productivity_scores["User e"], 50.0);

        let own = dashboard_summary(&store, &employee, today).await.unwrap();
        assert_eq!(own.total_tasks, 2);
        assert_eq!(own.productivity_scores.len(), 1);
    }
}
