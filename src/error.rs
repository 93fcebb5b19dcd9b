use actix::MailboxError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::Serialize;
use thiserror::Error;

/// Failure taxonomy shared by the REST handlers, the chat bot and the schedulers.
///
/// Validation and authorization variants are raised before any durable state is
/// touched. Store and mailbox variants are infrastructure faults: they are logged
/// and reported to synchronous callers as a plain 500.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("store error: {0}")]
    Store(#[from] DieselError),
    #[error("database actor unavailable: {0}")]
    Mailbox(#[from] MailboxError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        AppError::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, AppError::Store(_) | AppError::Mailbox(_) | AppError::Io(_))
    }

    /// Maps a unique-constraint violation onto a conflict, leaving other store errors as faults.
    pub fn conflict_on_unique(err: DieselError, msg: impl Into<String>) -> Self {
        match err {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => AppError::Conflict(msg.into()),
            other => AppError::Store(other),
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody<'a> {
    pub status: &'static str,
    pub error: &'a str,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Store(_) | AppError::Mailbox(_) | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = if self.is_fault() {
            tracing::error!(error = %self, "request failed");
            "internal server error".to_owned()
        } else {
            self.to_string()
        };

        HttpResponse::build(self.status_code()).json(ErrorBody { status: "error", error: &message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faults_hide_details_from_clients() {
        let err = AppError::Store(DieselError::NotFound);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.is_fault());

        let err = AppError::validation("price must be numeric");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_fault());
    }

    #[test]
    fn unique_violation_becomes_conflict() {
        let err = DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, Box::new("dup".to_owned()));
        assert!(matches!(AppError::conflict_on_unique(err, "exists"), AppError::Conflict(_)));
        assert!(matches!(AppError::conflict_on_unique(DieselError::NotFound, "exists"), AppError::Store(_)));
    }
}
