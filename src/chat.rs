// File: chat.rs

use std::collections::HashMap;

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use log::{debug, info};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::current_user;
use crate::error::{AppError, AppResult};
use crate::models::{ApiResponse, Group, Message, MessageView, SortOrder, User, UserSummary};
use crate::policy::authorize_chat;
use crate::project::{find_project, is_member};
use crate::store::Store;

async fn find_group(store: &dyn Store, id: &str) -> AppResult<Group> {
    store
        .find_group(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Group not found with id: {}", id)))
}

/// Applies the chat rule for `group`: project groups admit the project's
/// members and its manager, other groups are open.
async fn gate(store: &dyn Store, actor: &User, group: &Group) -> AppResult<()> {
    match &group.project_id {
        Some(project_id) => {
            let project = find_project(store, project_id).await?;
            let member = is_member(store, project_id, &actor.id).await?;
            authorize_chat(actor, Some(&project), member)
        }
        None => authorize_chat(actor, None, false),
    }
}

fn to_view(message: Message, sender: Option<UserSummary>) -> MessageView {
    MessageView {
        id: message.id,
        group_id: message.group_id,
        content: message.content,
        created_at: message.created_at,
        sender,
    }
}

/// Group metadata is visible to any caller; only messages sit behind the gate.
pub async fn group_for_project(store: &dyn Store, project_id: &str) -> AppResult<Group> {
    find_project(store, project_id).await?;
    store
        .find_group_by_project(project_id)
        .await?
        .ok_or_else(|| AppError::not_found("Group not found for this project"))
}

pub async fn get_group(store: &dyn Store, group_id: &str) -> AppResult<Group> {
    find_group(store, group_id).await
}

/// Oldest first.
pub async fn list_messages(
    store: &dyn Store,
    actor: &User,
    group_id: &str,
) -> AppResult<Vec<MessageView>> {
    let group = find_group(store, group_id).await?;
    gate(store, actor, &group).await?;

    let messages = store.list_messages(&group.id, SortOrder::Ascending).await?;
    debug!("Group {} has {} messages", group.id, messages.len());
    let senders: HashMap<String, UserSummary> = store
        .list_users()
        .await?
        .iter()
        .map(|user| (user.id.clone(), UserSummary::from(user)))
        .collect();
    Ok(messages
        .into_iter()
        .map(|message| {
            let sender = senders.get(&message.sender_id).cloned();
            to_view(message, sender)
        })
        .collect())
}

pub async fn send_message(
    store: &dyn Store,
    actor: &User,
    group_id: &str,
    content: &str,
    now: DateTime<Utc>,
) -> AppResult<MessageView> {
    let group = find_group(store, group_id).await?;
    gate(store, actor, &group).await?;
    if content.trim().is_empty() {
        return Err(AppError::bad_request("Message content cannot be empty"));
    }

    let message = Message {
        id: Uuid::new_v4().to_string(),
        group_id: group.id,
        sender_id: actor.id.clone(),
        content: content.to_string(),
        created_at: now,
    };
    let message = store.insert_message(message).await?;
    info!("User {} posted message {} in group {}", actor.id, message.id, message.group_id);
    Ok(to_view(message, Some(UserSummary::from(actor))))
}

/// GET /api/chat/project/{project_id}/group
pub async fn project_group(
    req: HttpRequest,
    data: web::Data<AppState>,
    project_id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    current_user(&req, &data).await?;
    let group = group_for_project(data.store.as_ref(), &project_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Group retrieved successfully", group)))
}

/// GET /api/chat/groups/{group_id}
pub async fn group(
    req: HttpRequest,
    data: web::Data<AppState>,
    group_id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    current_user(&req, &data).await?;
    let group = get_group(data.store.as_ref(), &group_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Group retrieved successfully", group)))
}

/// GET /api/chat/groups/{group_id}/messages
pub async fn get_messages(
    req: HttpRequest,
    data: web::Data<AppState>,
    group_id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let messages = list_messages(data.store.as_ref(), &actor, &group_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Messages retrieved successfully", messages)))
}

/// POST /api/chat/groups/{group_id}/messages, body is the raw message text.
pub async fn create_message(
    req: HttpRequest,
    data: web::Data<AppState>,
    group_id: web::Path<String>,
    body: String,
) -> Result<HttpResponse, AppError> {
    let actor = current_user(&req, &data).await?;
    let message = send_message(data.store.as_ref(), &actor, &group_id, &body, Utc::now()).await?;
    Ok(HttpResponse::Created().json(ApiResponse::ok("Message sent successfully", message)))
}
