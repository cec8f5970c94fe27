// src/policy.rs

//! Access rules. Each check takes the acting user plus the facts about the
//! resource that the caller has already resolved, and either passes or
//! returns `Forbidden`. Lookups happen before these run, so a missing id is
//! always reported as `NotFound` first.

use log::warn;

use crate::error::{AppError, AppResult};
use crate::models::{Project, Task, TimeEntry, UpdateTaskRequest, User};

fn refuse(user: &User, message: &str) -> AppError {
    warn!("Refused user {}: {}", user.id, message);
    AppError::forbidden(message)
}

/// Project mutation, task creation/deletion, team-wide reads.
pub fn require_manager(user: &User, message: &str) -> AppResult<()> {
    if user.is_manager() {
        Ok(())
    } else {
        Err(refuse(user, message))
    }
}

pub fn can_view_project(user: &User, project: &Project, is_member: bool) -> bool {
    user.is_manager() || project.manager_id == user.id || is_member
}

pub fn authorize_project_read(user: &User, project: &Project, is_member: bool) -> AppResult<()> {
    if can_view_project(user, project, is_member) {
        Ok(())
    } else {
        Err(refuse(user, "You do not have access to this project"))
    }
}

pub fn authorize_task_read(user: &User, task: &Task) -> AppResult<()> {
    if user.is_manager() || task.assigned_to_id == user.id {
        Ok(())
    } else {
        Err(refuse(user, "You can only view your own tasks"))
    }
}

/// Managers may change anything. The assignee may change the status and nothing else.
pub fn authorize_task_update(user: &User, task: &Task, request: &UpdateTaskRequest) -> AppResult<()> {
    if user.is_manager() {
        return Ok(());
    }
    if task.assigned_to_id != user.id {
        return Err(refuse(user, "You can only update your own tasks"));
    }
    if request.touches_more_than_status() {
        return Err(refuse(user, "Employees can only update task status"));
    }
    Ok(())
}

pub fn authorize_task_completion(user: &User, task: &Task) -> AppResult<()> {
    if user.is_manager() || task.assigned_to_id == user.id {
        Ok(())
    } else {
        Err(refuse(user, "You can only complete your own tasks"))
    }
}

pub fn authorize_time_entry_delete(user: &User, entry: &TimeEntry) -> AppResult<()> {
    if user.is_manager() || entry.user_id == user.id {
        Ok(())
    } else {
        Err(refuse(user, "You can only delete your own time entries"))
    }
}

/// Reading another user's time entries, totals or activity feed.
pub fn authorize_user_read(user: &User, target_user_id: &str) -> AppResult<()> {
    if user.is_manager() || user.id == target_user_id {
        Ok(())
    } else {
        Err(refuse(user, "You can only view your own records"))
    }
}

/// Groups tied to a project admit its members and its manager. Other groups are open.
pub fn authorize_chat(user: &User, project: Option<&Project>, is_member: bool) -> AppResult<()> {
    match project {
        Some(project) if !(is_member || project.manager_id == user.id) => {
            Err(refuse(user, "You are not a member of this project"))
        }
        _ => Ok(()),
    }
}
