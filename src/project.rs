// src/project.rs

use std::collections::HashSet;

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::app_state::AppState;
use crate::auth::current_user;
use crate::error::{AppError, AppResult};
use crate::models::{
    parse_enum, parse_enum_or_default, AddMemberRequest, ApiResponse, CreateProjectRequest,
    FinancialsRequest, Group, GroupType, Project, ProjectMember, ProjectMemberRole,
    ProjectMemberView, ProjectStatus, ProjectView, UpdateProjectRequest, User, UserSummary,
};
use crate::policy::{authorize_project_read, require_manager};
use crate::store::Store;

const MANAGERS_ONLY: &str = "Only managers can modify projects";

pub(crate) async fn find_project(store: &dyn Store, id: &str) -> AppResult<Project> {
    store
        .find_project(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Project not found with id: {}", id)))
}

async fn find_user(store: &dyn Store, id: &str) -> AppResult<User> {
    store
        .find_user(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("User not found with id: {}", id)))
}

pub(crate) async fn is_member(store: &dyn Store, project_id: &str, user_id: &str) -> AppResult<bool> {
    Ok(store.find_member(project_id, user_id).await?.is_some())
}

async fn view(store: &dyn Store, project: Project) -> AppResult<ProjectView> {
    let manager = store
        .find_user(&project.manager_id)
        .await?
        .map(|user| UserSummary::from(&user));
    let group_id = store
        .find_group_by_project(&project.id)
        .await?
        .map(|group| group.id);
    Ok(ProjectView {
        profit: project.revenue - project.expenses,
        project,
        manager,
        group_id,
    })
}

fn check_dates(project: &Project) -> AppResult<()> {
    match (project.start_date, project.end_date) {
        (Some(start), Some(end)) if end < start => {
            Err(AppError::bad_request("End date must not be before start date"))
        }
        _ => Ok(()),
    }
}

async fn member_view(store: &dyn Store, member: ProjectMember) -> AppResult<ProjectMemberView> {
    let user = find_user(store, &member.user_id).await?;
    Ok(ProjectMemberView {
        id: member.id,
        project_id: member.project_id,
        user_id: member.user_id,
        user_name: user.name,
        user_email: user.email,
        role: member.role,
        joined_at: member.joined_at,
    })
}

/// Creates the project, its chat group, the creator's OWNER row and a MEMBER
/// row per requested id. Unknown ids and the creator's own id are skipped.
pub async fn create_project(
    store: &dyn Store,
    actor: &User,
    mut request: CreateProjectRequest,
    now: DateTime<Utc>,
) -> AppResult<ProjectView> {
    request.name = request.name.trim().to_string();
    request.validate()?;
    require_manager(actor, MANAGERS_ONLY)?;

    let project = Project {
        id: Uuid::new_v4().to_string(),
        name: request.name,
        description: request.description,
        status: parse_enum_or_default(request.status.as_deref(), ProjectStatus::Planning),
        start_date: request.start_date,
        end_date: request.end_date,
        budget: request.budget.unwrap_or(0.0),
        revenue: request.revenue.unwrap_or(0.0),
        expenses: request.expenses.unwrap_or(0.0),
        manager_id: actor.id.clone(),
        created_at: now,
        updated_at: now,
    };
    check_dates(&project)?;

    let group = Group {
        id: Uuid::new_v4().to_string(),
        name: format!("{} Group", project.name),
        group_type: GroupType::ProjectTeam,
        project_id: Some(project.id.clone()),
        created_at: now,
    };

    let membership = |user_id: &str, role| ProjectMember {
        id: Uuid::new_v4().to_string(),
        project_id: project.id.clone(),
        user_id: user_id.to_string(),
        role,
        joined_at: now,
    };
    let mut members = vec![membership(&actor.id, ProjectMemberRole::Owner)];
    let mut seen: HashSet<&str> = HashSet::from([actor.id.as_str()]);
    for user_id in &request.member_ids {
        if !seen.insert(user_id.as_str()) {
            continue;
        }
        if store.find_user(user_id).await?.is_none() {
            debug!("Skipping unknown member {} for project {}", user_id, project.id);
            continue;
        }
        members.push(membership(user_id, ProjectMemberRole::Member));
    }

    let member_count = members.len();
    let project = store.create_project(project, group, members).await?;
    info!(
        "Project {} created by {} with {} members",
        project.id, actor.id, member_count
    );
    view(store, project).await
}

pub async fn list_projects(store: &dyn Store, actor: &User) -> AppResult<Vec<ProjectView>> {
    let projects = if actor.is_manager() {
        store.list_projects().await?
    } else {
        store.list_projects_for_user(&actor.id).await?
    };
    let mut views = Vec::with_capacity(projects.len());
    for project in projects {
        views.push(view(store, project).await?);
    }
    Ok(views)
}

pub async fn get_project(store: &dyn Store, actor: &User, id: &str) -> AppResult<ProjectView> {
    let project = find_project(store, id).await?;
    let member = is_member(store, id, &actor.id).await?;
    authorize_project_read(actor, &project, member)?;
    view(store, project).await
}

/// Unrecognised status strings keep the current status.
pub async fn update_project(
    store: &dyn Store,
    actor: &User,
    id: &str,
    mut request: UpdateProjectRequest,
    now: DateTime<Utc>,
) -> AppResult<ProjectView> {
    let mut project = find_project(store, id).await?;
    require_manager(actor, MANAGERS_ONLY)?;
    request.name = request.name.map(|name| name.trim().to_string());
    request.validate()?;

    if let Some(name) = request.name {
        project.name = name;
    }
    if let Some(description) = request.description {
        project.description = Some(description);
    }
    if let Some(status) = request.status.as_deref().and_then(parse_enum) {
        project.status = status;
    }
    if request.start_date.is_some() {
        project.start_date = request.start_date;
    }
    if request.end_date.is_some() {
        project.end_date = request.end_date;
    }
    if let Some(budget) = request.budget {
        project.budget = budget;
    }
    if let Some(revenue) = request.revenue {
        project.revenue = revenue;
    }
    if let Some(expenses) = request.expenses {
        project.expenses = expenses;
    }
    check_dates(&project)?;
    project.updated_at = now;

    let project = store.update_project(project).await?;
    info!("Project {} updated by {}", project.id, actor.id);
    view(store, project).await
}

pub async fn update_financials(
    store: &dyn Store,
    actor: &User,
    id: &str,
    request: FinancialsRequest,
    now: DateTime<Utc>,
) -> AppResult<ProjectView> {
    let mut project = find_project(store, id).await?;
    require_manager(actor, MANAGERS_ONLY)?;
    if let Some(revenue) = request.revenue {
        project.revenue = revenue;
    }
    if let Some(expenses) = request.expenses {
        project.expenses = expenses;
    }
    project.updated_at = now;
    let project = store.update_project(project).await?;
    info!("Project {} financials updated by {}", project.id, actor.id);
    view(store, project).await
}

pub async fn delete_project(store: &dyn Store, actor: &User, id: &str) -> AppResult<()> {
    let project = find_project(store, id).await?;
    require_manager(actor, MANAGERS_ONLY)?;
    if !store.delete_project(&project.id).await? {
        return Err(AppError::not_found(format!("Project not found with id: {}", id)));
    }
    info!("Project {} deleted by {}", project.id, actor.id);
    Ok(())
}

pub async fn list_members(
    store: &dyn Store,
    actor: &User,
    project_id: &str,
) -> AppResult<Vec<ProjectMemberView>> {
    let project = find_project(store, project_id).await?;
    let member = is_member(store, project_id, &actor.id).await?;
    authorize_project_read(actor, &project, member)?;

    let mut views = Vec::new();
    for member in store.list_members(project_id).await? {
        match member_view(store, member).await {
            Ok(view) => views.push(view),
            Err(AppError::NotFound(message)) => warn!("Dangling membership: {}", message),
            Err(e) => return Err(e),
        }
    }
    Ok(views)
}

/// Fails with `BadRequest` when the user already belongs to the project.
pub async fn add_member(
    store: &dyn Store,
    actor: &User,
    project_id: &str,
    request: AddMemberRequest,
    now: DateTime<Utc>,
) -> AppResult<ProjectMemberView> {
    find_project(store, project_id).await?;
    find_user(store, &request.user_id).await?;
    require_manager(actor, MANAGERS_ONLY)?;

    let member = ProjectMember {
        id: Uuid::new_v4().to_string(),
        project_id: project_id.to_string(),
        user_id: request.user_id,
        role: parse_enum_or_default(request.role.as_deref(), ProjectMemberRole::Member),
        joined_at: now,
    };
    let member = store.insert_member(member).await.map_err(|e| {
        warn!("Adding member to project {} failed: {}", project_id, e);
        AppError::from(e)
    })?;
    info!("User {} added to project {} by {}", member.user_id, project_id, actor.id);
    member_view(store, member).await
}

pub async fn remove_member(
    store: &dyn Store,
    actor: &User,
    project_id: &str,
    user_id: &str,
) -> AppResult<()> {
    find_project(store, project_id).await?;
    if store.find_member(project_id, user_id).await?.is_none() {
        return Err(AppError::not_found("User is not a member of this project"));
    }
    require_manager(actor, MANAGERS_ONLY)?;
    if !store.delete_member(project_id, user_id).await? {
        return Err(AppError::not_found("User is not a member of this project"));
    }
    info!("User {} removed from project {} by {}", user_id, project_id, actor.id);
    Ok(())
}

pub async fn check_membership(store: &dyn Store, project_id: &str, user_id: &str) -> AppResult<bool> {
    find_project(store, project_id).await?;
    is_member(store, project_id, user_id).await
}

/// POST /api/projects
pub async fn create(
    req: HttpRequest,
    data: web::Data<AppState>,
    body: web::Json<CreateProjectRequest>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    debug!("Received create_project request from {}: {:?}", actor.id, body);
    let project = create_project(data.store.as_ref(), &actor, body.into_inner(), Utc::now()).await?;
    Ok(HttpResponse::Created().json(ApiResponse::ok("Project created successfully", project)))
}

/// GET /api/projects
pub async fn list(req: HttpRequest, data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let projects = list_projects(data.store.as_ref(), &actor).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Projects retrieved successfully", projects)))
}

/// GET /api/projects/{id}
pub async fn get(
    req: HttpRequest,
    data: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let project = get_project(data.store.as_ref(), &actor, &id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Project retrieved successfully", project)))
}

/// PUT /api/projects/{id}
pub async fn update(
    req: HttpRequest,
    data: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<UpdateProjectRequest>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let project =
        update_project(data.store.as_ref(), &actor, &id, body.into_inner(), Utc::now()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Project updated successfully", project)))
}

/// PUT /api/projects/{id}/financials
pub async fn financials(
    req: HttpRequest,
    data: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<FinancialsRequest>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let project =
        update_financials(data.store.as_ref(), &actor, &id, body.into_inner(), Utc::now()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Project financials updated successfully", project)))
}

/// DELETE /api/projects/{id}
pub async fn delete(
    req: HttpRequest,
    data: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    delete_project(data.store.as_ref(), &actor, &id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::message("Project deleted successfully")))
}

/// GET /api/projects/{id}/members
pub async fn members(
    req: HttpRequest,
    data: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let members = list_members(data.store.as_ref(), &actor, &id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Project members retrieved successfully", members)))
}

/// POST /api/projects/{id}/members
pub async fn add(
    req: HttpRequest,
    data: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<AddMemberRequest>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let member = add_member(data.store.as_ref(), &actor, &id, body.into_inner(), Utc::now()).await?;
    Ok(HttpResponse::Created().json(ApiResponse::ok("Member added successfully", member)))
}

/// DELETE /api/projects/{id}/members/{user_id}
pub async fn remove(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let (project_id, user_id) = path.into_inner();
    remove_member(data.store.as_ref(), &actor, &project_id, &user_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::message("Member removed successfully")))
}

/// GET /api/projects/{id}/members/{user_id}/check
pub async fn check(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    current_user(&req, &data).await?;
    let (project_id, user_id) = path.into_inner();
    let member = check_membership(data.store.as_ref(), &project_id, &user_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(
        "Membership checked",
        json!({ "isMember": member }),
    )))
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
                name: format!("User {}", id),
                email: format!("{}@example.com", id),
                password_hash: String::new(),
                role,
                created_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    fn request(name: &str, member_ids: &[&str]) -> CreateProjectRequest {
        CreateProjectRequest {
            name: name.to_string(),
            description: None,
            status: Some("launching".to_string()),
            start_date: None,
            end_date: None,
            budget: Some(1000.0),
            revenue: Some(500.0),
            expenses: Some(200.0),
            member_ids: member_ids.iter().map(|id| id.to_string()).collect(),
        }
    }

    #[actix_web::test]
    async fn create_builds_group_owner_and_members() {
        let store = MemoryStore::new();
        let manager = seed_user(&store, "m", Role::Manager).await;
        seed_user(&store, "e", Role::Employee).await;

        let created = create_project(&store, &manager, request("Apollo", &["e", "m", "ghost"]), Utc::now())
            .await
            .unwrap();
        assert_eq!(created.project.status, ProjectStatus::Planning);
        assert_eq!(created.profit, 300.0);

        let group = store
            .find_group_by_project(&created.project.id)
            .await
            .unwrap()
            .expect("group created with project");
        assert_eq!(group.name, "Apollo Group");
        assert_eq!(group.group_type, GroupType::ProjectTeam);
        assert_eq!(created.group_id.as_deref(), Some(group.id.as_str()));

        let members = store.list_members(&created.project.id).await.unwrap();
        assert_eq!(members.len(), 2);
        let owner = members.iter().find(|m| m.user_id == "m").unwrap();
        let member = members.iter().find(|m| m.user_id == "e").unwrap();
        assert_eq!(owner.role, ProjectMemberRole::Owner);
        assert_eq!(member.role, ProjectMemberRole::Member);
    }

    #[actix_web::test]
    async fn blank_names_fail_validation_before_anything_is_written() {
        let store = MemoryStore::new();
        let manager = seed_user(&store, "m", Role::Manager).await;

        match create_project(&store, &manager, request("   ", &[]), Utc::now()).await {
            Err(AppError::Validation(fields)) => {
                assert_eq!(fields["name"], "Project name is required");
            }
            other => panic!("expected validation failure, got {:?}", other.map(|p| p.project.id)),
        }
        assert!(store.list_projects().await.unwrap().is_empty());
    }

    #[actix_web::test]
    async fn adding_the_same_member_twice_is_rejected() {
        let store = MemoryStore::new();
        let manager = seed_user(&store, "m", Role::Manager).await;
        seed_user(&store, "e", Role::Employee).await;
        let project = create_project(&store, &manager, request("Apollo", &[]), Utc::now())
            .await
            .unwrap();
        let id = project.project.id;

        let add = || AddMemberRequest {
            user_id: "e".to_string(),
            role: Some("wizard".to_string()),
        };
        let first = add_member(&store, &manager, &id, add(), Utc::now()).await.unwrap();
        assert_eq!(first.role, ProjectMemberRole::Member);
        assert_eq!(store.list_members(&id).await.unwrap().len(), 2);

        let second = add_member(&store, &manager, &id, add(), Utc::now()).await;
        assert!(matches!(second, Err(AppError::BadRequest(_))));
        assert_eq!(store.list_members(&id).await.unwrap().len(), 2);
    }

    #[actix_web::test]
    async fn visibility_follows_membership() {
        let store = MemoryStore::new();
        let manager = seed_user(&store, "m", Role::Manager).await;
        let member = seed_user(&store, "e", Role::Employee).await;
        let outsider = seed_user(&store, "x", Role::Employee).await;
        let project = create_project(&store, &manager, request("Apollo", &["e"]), Utc::now())
            .await
            .unwrap();
        let id = project.project.id;

        assert!(get_project(&store, &member, &id).await.is_ok());
        assert!(matches!(
            get_project(&store, &outsider, &id).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            get_project(&store, &outsider, "missing").await,
            Err(AppError::NotFound(_))
        ));
        assert_eq!(list_projects(&store, &member).await.unwrap().len(), 1);
        assert!(list_projects(&store, &outsider).await.unwrap().is_empty());
        assert!(matches!(
            delete_project(&store, &member, &id).await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[actix_web::test]
    async fn delete_cascades_to_members_and_group() {
        let store = MemoryStore::new();
        let manager = seed_user(&store, "m", Role::Manager).await;
        seed_user(&store, "e", Role::Employee).await;
        let project = create_project(&store, &manager, request("Apollo", &["e"]), Utc::now())
            .await
            .unwrap();
        let id = project.project.id;

        remove_member(&store, &manager, &id, "e").await.unwrap();
        assert!(!check_membership(&store, &id, "e").await.unwrap());
        assert!(matches!(
            remove_member(&store, &manager, &id, "e").await,
            Err(AppError::NotFound(_))
        ));

        delete_project(&store, &manager, &id).await.unwrap();
        assert!(store.find_group_by_project(&id).await.unwrap().is_none());
        assert!(store.list_members(&id).await.unwrap().is_empty());
    }
}
