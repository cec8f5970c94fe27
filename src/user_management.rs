use actix_web::{web, HttpRequest, HttpResponse};
use log::debug;

use crate::analytics::{user_stats, UserTaskStats};
use crate::app_state::AppState;
use crate::auth::current_user;
use crate::error::{AppError, AppResult};
use crate::models::{ApiResponse, TaskFilter, User, UserView};
use crate::store::Store;

async fn find_user(store: &dyn Store, id: &str) -> AppResult<User> {
    store
        .find_user(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("User not found with id: {}", id)))
}

pub async fn list_users(store: &dyn Store) -> AppResult<Vec<UserView>> {
    let users = store.list_users().await?;
    debug!("Listing {} users", users.len());
    Ok(users.iter().map(UserView::from).collect())
}

pub async fn get_user(store: &dyn Store, id: &str) -> AppResult<UserView> {
    Ok(UserView::from(&find_user(store, id).await?))
}

pub async fn task_stats(store: &dyn Store, id: &str) -> AppResult<UserTaskStats> {
    let user = find_user(store, id).await?;
    let filter = TaskFilter {
        assigned_to_id: Some(user.id.clone()),
        status: None,
    };
    let tasks = store.list_tasks(&filter).await?;
    Ok(user_stats(&user, &tasks))
}

/// GET /api/users
pub async fn get_users(req: HttpRequest, data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    current_user(&req, &data).await?;
    let users = list_users(data.store.as_ref()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Users retrieved successfully", users)))
}

/// GET /api/users/me
pub async fn get_me(req: HttpRequest, data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(
        "Current user retrieved successfully",
        UserView::from(&actor),
    )))
}

/// GET /api/users/{id}
pub async fn get_user_by_id(
    req: HttpRequest,
    data: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    current_user(&req, &data).await?;
    let user = get_user(data.store.as_ref(), &id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("User retrieved successfully", user)))
}

/// GET /api/users/{id}/stats
pub async fn get_user_stats(
    req: HttpRequest,
    data: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    current_user(&req, &data).await?;
    let stats = task_stats(data.store.as_ref(), &id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("User stats retrieved successfully", stats)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::store::MemoryStore;
    use chrono::Utc;

    #[actix_web::test]
    async fn stats_for_a_user_without_tasks_are_zero() {
        let store = MemoryStore::new();
        store
            .insert_user(User {
                id: "e".to_string(),
                name: "Eve".to_string(),
                email: "eve@example.com".to_string(),
                password_hash: "hash".to_string(),
                role: Role::Employee,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let stats = task_stats(&store, "e").await.unwrap();
        assert_eq!(stats.total_tasks, 0);
        assert_eq!(stats.completion_rate, 0.0);
        assert!(matches!(task_stats(&store, "nobody").await, Err(AppError::NotFound(_))));

        let listed = serde_json::to_value(list_users(&store).await.unwrap()).unwrap();
        assert!(listed[0].get("passwordHash").is_none());
        assert_eq!(listed[0]["role"], "EMPLOYEE");
    }
}
