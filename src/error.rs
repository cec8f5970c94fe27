// src/error.rs

use std::collections::BTreeMap;

use actix_web::{
    body::{BoxBody, MessageBody},
    dev::ServiceResponse,
    http::StatusCode,
    HttpRequest, HttpResponse, ResponseError,
};
use log::error;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::ValidationErrors;

use crate::store::StoreError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("Validation failed: {}", describe_fields(.0))]
    Validation(BTreeMap<String, String>),
    /// The detail is logged, never sent to the client.
    #[error("Internal server error")]
    Internal(String),
}

fn describe_fields(fields: &BTreeMap<String, String>) -> String {
    fields
        .iter()
        .map(|(field, problem)| format!("{}: {}", field, problem))
        .collect::<Vec<_>>()
        .join(", ")
}

impl AppError {
    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        AppError::BadRequest(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        AppError::Forbidden(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        AppError::Unauthorized(message.into())
    }

    pub fn invalid_field(field: &str, problem: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(field.to_string(), problem.into());
        AppError::Validation(fields)
    }

    /// Reason phrase used in the `error` member of the body.
    pub fn reason(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "Not Found",
            AppError::BadRequest(_) => "Bad Request",
            AppError::Forbidden(_) => "Forbidden",
            AppError::Unauthorized(_) => "Unauthorized",
            AppError::Validation(_) => "Validation Failed",
            AppError::Internal(_) => "Internal Server Error",
        }
    }

    pub fn body(&self, path: &str) -> ErrorBody {
        ErrorBody {
            status: self.status_code().as_u16(),
            error: self.reason().to_string(),
            message: self.to_string(),
            path: path.to_string(),
            fields: match self {
                AppError::Validation(fields) => Some(fields.clone()),
                _ => None,
            },
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse<BoxBody> {
        // `path` is filled in by `stamp_path` once the request is known.
        HttpResponse::build(self.status_code()).json(self.body(""))
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(message) | StoreError::Conflict(message) => {
                AppError::BadRequest(message)
            }
            StoreError::Backend(detail) => {
                error!("Store failure: {}", detail);
                AppError::Internal(detail)
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: u16,
    pub error: String,
    pub message: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, String>>,
}

/// Rebuilds the body of an `AppError` response with the request path.
pub fn stamp_path<B>(res: ServiceResponse<B>) -> ServiceResponse<BoxBody>
where
    B: MessageBody + 'static,
{
    let body = res
        .response()
        .error()
        .and_then(|err| err.as_error::<AppError>())
        .map(|err| err.body(res.request().path()));

    match body {
        Some(body) => {
            let status = res.status();
            res.into_response(HttpResponse::build(status).json(body))
        }
        None => res.map_into_boxed_body(),
    }
}

/// Error response for requests rejected before reaching a handler.
pub fn reject(req: &HttpRequest, err: AppError) -> HttpResponse<BoxBody> {
    HttpResponse::build(err.status_code()).json(err.body(req.path()))
}

/// Field names on the wire are camelCase, like the request bodies.
fn wire_name(field: &str) -> String {
    let mut name = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            name.extend(c.to_uppercase());
            upper = false;
        } else {
            name.push(c);
        }
    }
    name
}

/// Keeps the first problem reported for each field.
impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        let fields = errors
            .field_errors()
            .into_iter()
            .filter_map(|(field, problems)| {
                let problem = problems.first()?;
                let message = problem
                    .message
                    .as_ref()
                    .map(|message| message.to_string())
                    .unwrap_or_else(|| problem.code.to_string());
                Some((wire_name(&field), message))
            })
            .collect();
        AppError::Validation(fields)
    }
}

/// Routes extractor failures (bad JSON, query strings, path segments) into `Validation`.
pub fn extractor_error(source: &str, err: impl std::fmt::Display) -> actix_web::Error {
    AppError::invalid_field(source, err.to_string()).into()
}
