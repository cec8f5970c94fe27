// src/task.rs

use std::collections::HashMap;

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Deserialize;
use validator::Validate;

use crate::activity::{self, TASK_COMPLETED, TASK_CREATED, TASK_DELETED, TASK_UPDATED};
use crate::app_state::AppState;
use crate::auth::current_user;
use crate::error::{AppError, AppResult};
use crate::models::{
    parse_enum, parse_enum_or_default, ApiResponse, CreateTaskRequest, Priority, Task, TaskFilter,
    TaskStatus, TaskView, UpdateTaskRequest, User, UserSummary,
};
use crate::policy::{
    authorize_task_completion, authorize_task_read, authorize_task_update, require_manager,
};
use crate::store::Store;

const ENTITY: &str = "TASK";

async fn find_task(store: &dyn Store, id: &str) -> AppResult<Task> {
    store
        .find_task(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Task not found with id: {}", id)))
}

async fn find_assignee(store: &dyn Store, id: &str) -> AppResult<User> {
    store
        .find_user(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("User not found with id: {}", id)))
}

async fn view(store: &dyn Store, task: Task) -> AppResult<TaskView> {
    let assigned_to = store
        .find_user(&task.assigned_to_id)
        .await?
        .map(|user| UserSummary::from(&user));
    Ok(TaskView { task, assigned_to })
}

async fn views(store: &dyn Store, tasks: Vec<Task>) -> AppResult<Vec<TaskView>> {
    let users: HashMap<String, UserSummary> = store
        .list_users()
        .await?
        .iter()
        .map(|user| (user.id.clone(), UserSummary::from(user)))
        .collect();
    Ok(tasks
        .into_iter()
        .map(|task| TaskView {
            assigned_to: users.get(&task.assigned_to_id).cloned(),
            task,
        })
        .collect())
}

pub async fn create_task(
    store: &dyn Store,
    actor: &User,
    mut request: CreateTaskRequest,
    now: DateTime<Utc>,
) -> AppResult<TaskView> {
    request.title = request.title.trim().to_string();
    request.assigned_to_id = request.assigned_to_id.trim().to_string();
    request.validate()?;
    find_assignee(store, &request.assigned_to_id).await?;
    require_manager(actor, "Only managers can create tasks")?;

    let task = Task {
        id: uuid::Uuid::new_v4().to_string(),
        title: request.title,
        description: request.description,
        status: TaskStatus::Pending,
        priority: parse_enum_or_default(request.priority.as_deref(), Priority::Medium),
        due_date: request.due_date,
        completed_date: None,
        assigned_to_id: request.assigned_to_id,
        created_at: now,
        updated_at: now,
    };
    let task = store.insert_task(task).await?;
    info!("Task {} created by {} for {}", task.id, actor.id, task.assigned_to_id);
    activity::record(
        store,
        &actor.id,
        TASK_CREATED,
        ENTITY,
        Some(&task.id),
        Some(format!("Created task '{}'", task.title)),
        now,
    )
    .await;
    view(store, task).await
}

/// Employees only ever see their own tasks, whatever filter they ask for.
pub async fn list_tasks(
    store: &dyn Store,
    actor: &User,
    assigned_to: Option<String>,
    status: Option<&str>,
) -> AppResult<Vec<TaskView>> {
    let assigned_to_id = if !actor.is_manager() {
        Some(actor.id.clone())
    } else if let Some(id) = assigned_to {
        Some(find_assignee(store, &id).await?.id)
    } else {
        None
    };
    let filter = TaskFilter {
        assigned_to_id,
        status: status.and_then(parse_enum),
    };
    let tasks = store.list_tasks(&filter).await?;
    debug!("Listing {} tasks for {}", tasks.len(), actor.id);
    views(store, tasks).await
}

pub async fn get_task(store: &dyn Store, actor: &User, id: &str) -> AppResult<TaskView> {
    let task = find_task(store, id).await?;
    authorize_task_read(actor, &task)?;
    view(store, task).await
}

pub async fn search_tasks(store: &dyn Store, actor: &User, keyword: &str) -> AppResult<Vec<TaskView>> {
    let keyword = keyword.trim();
    let mut tasks = if keyword.is_empty() {
        store.list_tasks(&TaskFilter::default()).await?
    } else {
        store.search_tasks(keyword).await?
    };
    if !actor.is_manager() {
        tasks.retain(|task| task.assigned_to_id == actor.id);
    }
    info!("Found {} tasks matching keyword: {}", tasks.len(), keyword);
    views(store, tasks).await
}

/// Unrecognised status or priority strings leave the field unchanged.
pub async fn update_task(
    store: &dyn Store,
    actor: &User,
    id: &str,
    mut request: UpdateTaskRequest,
    now: DateTime<Utc>,
) -> AppResult<TaskView> {
    let mut task = find_task(store, id).await?;
    if let Some(assignee) = &request.assigned_to_id {
        find_assignee(store, assignee).await?;
    }
    authorize_task_update(actor, &task, &request)?;
    request.title = request.title.map(|title| title.trim().to_string());
    request.validate()?;

    if let Some(title) = request.title {
        task.title = title;
    }
    if let Some(description) = request.description {
        task.description = Some(description);
    }
    if let Some(priority) = request.priority.as_deref().and_then(parse_enum) {
        task.priority = priority;
    }
    if let Some(due_date) = request.due_date {
        task.due_date = Some(due_date);
    }
    if let Some(assignee) = request.assigned_to_id {
        task.assigned_to_id = assignee;
    }
    if let Some(status) = request.status.as_deref().and_then(parse_enum::<TaskStatus>) {
        task.set_status(status, now.date_naive());
    }
    task.updated_at = now;

    let task = store.update_task(task).await?;
    info!("Task {} updated by {}", task.id, actor.id);
    activity::record(
        store,
        &actor.id,
        TASK_UPDATED,
        ENTITY,
        Some(&task.id),
        Some(format!("Status is {}", task.status.as_str())),
        now,
    )
    .await;
    view(store, task).await
}

/// Forces COMPLETED and stamps today, whatever the previous state.
pub async fn complete_task(
    store: &dyn Store,
    actor: &User,
    id: &str,
    now: DateTime<Utc>,
) -> AppResult<TaskView> {
    let mut task = find_task(store, id).await?;
    authorize_task_completion(actor, &task)?;
    task.status = TaskStatus::Completed;
    task.completed_date = Some(now.date_naive());
    task.updated_at = now;

    let task = store.update_task(task).await?;
    info!("Task {} completed by {}", task.id, actor.id);
    activity::record(
        store,
        &actor.id,
        TASK_COMPLETED,
        ENTITY,
        Some(&task.id),
        Some(format!("Completed task '{}'", task.title)),
        now,
    )
    .await;
    view(store, task).await
}

pub async fn delete_task(
    store: &dyn Store,
    actor: &User,
    id: &str,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let task = find_task(store, id).await?;
    require_manager(actor, "Only managers can delete tasks")?;
    if !store.delete_task(&task.id).await? {
        return Err(AppError::not_found(format!("Task not found with id: {}", id)));
    }
    info!("Task {} deleted by {}", task.id, actor.id);
    activity::record(
        store,
        &actor.id,
        TASK_DELETED,
        ENTITY,
        Some(&task.id),
        Some(format!("Deleted task '{}'", task.title)),
        now,
    )
    .await;
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQuery {
    pub assigned_to: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub keyword: String,
}

/// POST /api/tasks
pub async fn create(
    req: HttpRequest,
    data: web::Data<AppState>,
    body: web::Json<CreateTaskRequest>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let task = create_task(data.store.as_ref(), &actor, body.into_inner(), Utc::now()).await?;
    Ok(HttpResponse::Created().json(ApiResponse::ok("Task created successfully", task)))
}

/// GET /api/tasks?assignedTo=..&status=..
pub async fn list(
    req: HttpRequest,
    data: web::Data<AppState>,
    query: web::Query<TaskQuery>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let query = query.into_inner();
    let tasks = list_tasks(
        data.store.as_ref(),
        &actor,
        query.assigned_to,
        query.status.as_deref(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Tasks retrieved successfully", tasks)))
}

/// GET /api/tasks/search?keyword=..
pub async fn search(
    req: HttpRequest,
    data: web::Data<AppState>,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let tasks = search_tasks(data.store.as_ref(), &actor, &query.keyword).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Search completed successfully", tasks)))
}

/// GET /api/tasks/{id}
pub async fn get(
    req: HttpRequest,
    data: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let task = get_task(data.store.as_ref(), &actor, &id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Task retrieved successfully", task)))
}

/// PUT /api/tasks/{id}
pub async fn update(
    req: HttpRequest,
    data: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<UpdateTaskRequest>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let task = update_task(data.store.as_ref(), &actor, &id, body.into_inner(), Utc::now()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Task updated successfully", task)))
}

/// PUT /api/tasks/{id}/complete
pub async fn complete(
    req: HttpRequest,
    data: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let task = complete_task(data.store.as_ref(), &actor, &id, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Task marked as completed", task)))
}

/// DELETE /api/tasks/{id}
pub async fn delete(
    req: HttpRequest,
    data: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    delete_task(data.store.as_ref(), &actor, &id, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::message("Task deleted successfully")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivityFilter, Role};
    use crate::store::MemoryStore;
    use chrono::NaiveDate;

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

    fn new_task(title: &str, assignee: &str) -> CreateTaskRequest {
        CreateTaskRequest {
            title: title.to_string(),
            description: Some("Quarterly numbers".to_string()),
            priority: Some("high".to_string()),
            due_date: NaiveDate::from_ymd_opt(2030, 1, 1),
            assigned_to_id: assignee.to_string(),
        }
    }

    #[actix_web::test]
    async fn employee_can_change_status_but_not_title() {
        let store = MemoryStore::new();
        let manager = seed_user(&store, "m", Role::Manager).await;
        let employee = seed_user(&store, "e", Role::Employee).await;
        let task = create_task(&store, &manager, new_task("Write report", "e"), Utc::now())
            .await
            .unwrap();
        assert_eq!(task.task.priority, Priority::High);

        let retitle = UpdateTaskRequest {
            title: Some("Something else".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            update_task(&store, &employee, &task.task.id, retitle, Utc::now()).await,
            Err(AppError::Forbidden(_))
        ));

        let status_only = UpdateTaskRequest {
            status: Some("IN_PROGRESS".to_string()),
            ..Default::default()
        };
        let updated = update_task(&store, &employee, &task.task.id, status_only, Utc::now())
            .await
            .unwrap();
        assert_eq!(updated.task.status, TaskStatus::InProgress);
        assert_eq!(updated.task.title, "Write report");
    }

    #[actix_web::test]
    async fn completion_stamps_today_and_reopening_clears_it() {
        let store = MemoryStore::new();
        let manager = seed_user(&store, "m", Role::Manager).await;
        let employee = seed_user(&store, "e", Role::Employee).await;
        let task = create_task(&store, &manager, new_task("Ship", "e"), Utc::now())
            .await
            .unwrap();

        let now = Utc::now();
        let done = complete_task(&store, &employee, &task.task.id, now).await.unwrap();
        assert_eq!(done.task.status, TaskStatus::Completed);
        assert_eq!(done.task.completed_date, Some(now.date_naive()));

        let reopen = UpdateTaskRequest {
            status: Some("pending".to_string()),
            ..Default::default()
        };
        let reopened = update_task(&store, &manager, &task.task.id, reopen, now).await.unwrap();
        assert_eq!(reopened.task.completed_date, None);

        let actions: Vec<String> = store
            .list_activities(&ActivityFilter::default(), None)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.action)
            .collect();
        assert!(actions.contains(&TASK_COMPLETED.to_string()));
        assert!(actions.contains(&TASK_CREATED.to_string()));
    }

    #[actix_web::test]
    async fn lookups_fail_before_authorization() {
        let store = MemoryStore::new();
        let employee = seed_user(&store, "e", Role::Employee).await;
        assert!(matches!(
            create_task(&store, &employee, new_task("x", "nobody"), Utc::now()).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            create_task(&store, &employee, new_task("x", "e"), Utc::now()).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            delete_task(&store, &employee, "missing", Utc::now()).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[actix_web::test]
    async fn employees_list_and_search_only_their_own() {
        let store = MemoryStore::new();
        let manager = seed_user(&store, "m", Role::Manager).await;
        let alice = seed_user(&store, "a", Role::Employee).await;
        seed_user(&store, "b", Role::Employee).await;
        create_task(&store, &manager, new_task("Report A", "a"), Utc::now()).await.unwrap();
        create_task(&store, &manager, new_task("Report B", "b"), Utc::now()).await.unwrap();

        let mine = list_tasks(&store, &alice, Some("b".to_string()), None).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].task.assigned_to_id, "a");
        assert_eq!(
            mine[0].assigned_to.as_ref().map(|u| u.name.as_str()),
            Some("User a")
        );

        assert_eq!(search_tasks(&store, &manager, "report").await.unwrap().len(), 2);
        assert_eq!(search_tasks(&store, &alice, "REPORT").await.unwrap().len(), 1);
        assert_eq!(search_tasks(&store, &manager, "  ").await.unwrap().len(), 2);

        let unknown_status = list_tasks(&store, &manager, None, Some("archived")).await.unwrap();
        assert_eq!(unknown_status.len(), 2);
    }

    #[actix_web::test]
    async fn filtering_by_an_unknown_assignee_is_not_found() {
        let store = MemoryStore::new();
        let manager = seed_user(&store, "m", Role::Manager).await;
        seed_user(&store, "b", Role::Employee).await;
        create_task(&store, &manager, new_task("Report B", "b"), Utc::now()).await.unwrap();

        assert!(matches!(
            list_tasks(&store, &manager, Some("ghost".to_string()), None).await,
            Err(AppError::NotFound(_))
        ));
        let for_b = list_tasks(&store, &manager, Some("b".to_string()), None).await.unwrap();
        assert_eq!(for_b.len(), 1);
    }
}
