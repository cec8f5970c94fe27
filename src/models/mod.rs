// src/models/mod.rs

pub mod activity;
pub mod leave;
pub mod message;
pub mod project;
pub mod task;
pub mod time_entry;
pub mod user;

pub use activity::*;
pub use leave::*;
pub use message::*;
pub use project::*;
pub use task::*;
pub use time_entry::*;
pub use user::*;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;

/// Parses a wire value into one of the SCREAMING_SNAKE_CASE enums.
/// Case, surrounding whitespace, dashes and spaces are forgiven ("in progress" -> IN_PROGRESS).
pub fn parse_enum<T: DeserializeOwned>(raw: &str) -> Option<T> {
    let normalized = raw.trim().to_ascii_uppercase().replace([' ', '-'], "_");
    serde_json::from_value(serde_json::Value::String(normalized)).ok()
}

/// Lenient enum parsing: a missing or unrecognised value yields `default` instead of an error.
///
/// Used for project status on create (PLANNING), member role on add (MEMBER),
/// user role on register (EMPLOYEE), leave type (CASUAL_LEAVE) and attendance status (PRESENT).
pub fn parse_enum_or_default<T: DeserializeOwned>(raw: Option<&str>, default: T) -> T {
    raw.and_then(parse_enum).unwrap_or(default)
}

/// Success envelope shared by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }
}

/// Zero-based page selector, clamped to `MAX_PAGE_SIZE`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub size: u64,
}

fn default_page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 0,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn size(&self) -> u64 {
        self.size.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> u64 {
        self.page.saturating_mul(self.size())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page: u64,
    pub size: u64,
    pub total_elements: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, request: &PageRequest, total_elements: u64) -> Self {
        let size = request.size();
        Self {
            content,
            page: request.page,
            size,
            total_elements,
            total_pages: total_elements.div_ceil(size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenient_parse_accepts_loose_spelling() {
        assert_eq!(parse_enum::<TaskStatus>("in progress"), Some(TaskStatus::InProgress));
        assert_eq!(parse_enum::<TaskStatus>(" completed "), Some(TaskStatus::Completed));
        assert_eq!(parse_enum::<Priority>("High"), Some(Priority::High));
        assert_eq!(parse_enum::<TaskStatus>("archived"), None);
    }

    #[test]
    fn unknown_values_fall_back_to_default() {
        let status = parse_enum_or_default(Some("launching"), ProjectStatus::Planning);
        assert_eq!(status, ProjectStatus::Planning);
        let role = parse_enum_or_default(None, ProjectMemberRole::Member);
        assert_eq!(role, ProjectMemberRole::Member);
        let role = parse_enum_or_default(Some("owner"), ProjectMemberRole::Member);
        assert_eq!(role, ProjectMemberRole::Owner);
    }

    #[test]
    fn page_math_clamps_and_rounds_up() {
        let request = PageRequest { page: 2, size: 500 };
        assert_eq!(request.size(), MAX_PAGE_SIZE);
        assert_eq!(request.offset(), 200);

        let page = Page::new(vec![1, 2, 3], &PageRequest { page: 0, size: 2 }, 3);
        assert_eq!(page.total_pages, 2);
    }
}
