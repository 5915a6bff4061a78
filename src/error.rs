use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

pub type Result<T> = std::result::Result<T, ApiError>;

/// ApiError
///
/// Every failure a request can end with. Handlers return it and let
/// `IntoResponse` pick the status and body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// User-correctable input problems, one message per violated rule.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ApiError::Validation(vec![message.into()])
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::Validation(errors) => json!({ "errors": errors }),
            ApiError::Unauthorized => json!({ "error": "unauthorized" }),
            ApiError::Forbidden => json!({ "error": "forbidden" }),
            ApiError::NotFound => json!({ "error": "not found" }),
            ApiError::Conflict(message) => json!({ "error": message }),
            ApiError::Database(err) => {
                tracing::error!("database error: {:?}", err);
                json!({ "error": "internal server error" })
            }
            ApiError::Internal(message) => {
                tracing::error!("internal error: {}", message);
                json!({ "error": "internal server error" })
            }
        };
        (status, Json(body)).into_response()
    }
}

/// RepoError
///
/// Failures surfaced by a `Repository` implementation.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// A unique constraint (the user email) was violated.
    #[error("email already in use")]
    Conflict,

    /// The VM was soft-deleted between authorization and the write.
    #[error("vm is deleted")]
    VmDeleted,

    #[error(transparent)]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::Conflict,
            _ => RepoError::Database(err),
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Conflict => ApiError::Conflict("email already in use".to_string()),
            RepoError::VmDeleted => ApiError::invalid("cannot edit a deleted VM"),
            RepoError::Database(err) => ApiError::Database(err),
        }
    }
}

impl From<argon2::password_hash::Error> for ApiError {
    fn from(err: argon2::password_hash::Error) -> Self {
        ApiError::Internal(format!("password hashing failed: {err}"))
    }
}
