use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use strum_macros::{AsRefStr, Display};
use thiserror::Error;

use crate::store::StoreError;

/// Stable reason codes reported with a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ConflictCode {
    DuplicateIdentity,
    DuplicateRecord,
    NoMatchingRecord,
    DeadlineClosed,
}

#[derive(Debug, Error)]
pub enum AttendanceError {
    /// Rejected before any transaction opened.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict ({code}): {message}")]
    Conflict { code: ConflictCode, message: String },

    /// A collaborator failed; `operation` names the call that was running.
    #[error("{operation} failed: {source}")]
    Dependency {
        operation: &'static str,
        #[source]
        source: StoreError,
    },
}

impl AttendanceError {
    pub fn conflict(code: ConflictCode, message: impl Into<String>) -> Self {
        AttendanceError::Conflict {
            code,
            message: message.into(),
        }
    }

    /// Wraps a store failure with the name of the failing operation. Duplicate
    /// keys surface as conflicts rather than dependency failures.
    pub fn store(operation: &'static str) -> impl FnOnce(StoreError) -> AttendanceError {
        move |source| {
            tracing::error!(operation, error = %source, "store call failed");
            match source {
                StoreError::Duplicate(detail) => {
                    AttendanceError::conflict(ConflictCode::DuplicateRecord, detail)
                }
                other => AttendanceError::Dependency {
                    operation,
                    source: other,
                },
            }
        }
    }

    pub fn conflict_code(&self) -> Option<ConflictCode> {
        match self {
            AttendanceError::Conflict { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl ResponseError for AttendanceError {
    fn status_code(&self) -> StatusCode {
        match self {
            AttendanceError::Validation(_) => StatusCode::BAD_REQUEST,
            AttendanceError::Conflict { .. } => StatusCode::CONFLICT,
            AttendanceError::Dependency { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            AttendanceError::Validation(message) => HttpResponse::BadRequest().json(json!({
                "code": "validation",
                "message": message
            })),
            AttendanceError::Conflict { code, message } => HttpResponse::Conflict().json(json!({
                "code": code.as_ref(),
                "message": message
            })),
            AttendanceError::Dependency { .. } => {
                HttpResponse::InternalServerError().json(json!({
                    "message": "Internal Server Error"
                }))
            }
        }
    }
}
