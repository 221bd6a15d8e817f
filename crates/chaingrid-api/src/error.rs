use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use chaingrid_types::api::ErrorResponse;

use crate::validation::ValidationErrors;

/// Everything a ChainGrid endpoint can fail with.
///
/// Collaborator failures (database, staging store) are logged when the error
/// is built; the client only sees their detail when debug mode is on.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The body was not JSON, or not the shape the endpoint expects.
    #[error("Malformed request body: {reason}")]
    BadRequest { status: StatusCode, reason: String },

    #[error("The given data was invalid.")]
    Validation(ValidationErrors),

    /// The staged registration is gone: never existed, expired or already used.
    #[error("Registration session expired or not found. Please register again.")]
    ExpiredOrMissingSession,

    #[error("Invalid OTP. {remaining} attempt(s) remaining.")]
    InvalidOtp { remaining: u32 },

    #[error("Too many invalid OTP attempts. Please register again.")]
    TooManyAttempts,

    /// Someone claimed the email or username between staging and commit.
    #[error("The {field} has already been taken. Please register again.")]
    Conflict { field: String },

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Could not start registration. Please try again later.")]
    Staging { detail: Option<String> },

    #[error("Something went wrong. Please try again later.")]
    Internal { detail: Option<String> },
}

impl ApiError {
    pub fn staging(err: anyhow::Error, debug: bool) -> Self {
        error!("Staging store failure: {:#}", err);
        ApiError::Staging {
            detail: debug.then(|| format!("{:#}", err)),
        }
    }

    pub fn internal(err: anyhow::Error, debug: bool) -> Self {
        error!("Internal error: {:#}", err);
        ApiError::Internal {
            detail: debug.then(|| format!("{:#}", err)),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { status, .. } => *status,
            ApiError::Validation(_)
            | ApiError::ExpiredOrMissingSession
            | ApiError::InvalidOtp { .. }
            | ApiError::TooManyAttempts => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::InvalidCredentials | ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Staging { .. } | ApiError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest {
            status: rejection.status(),
            reason: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        let (errors, error) = match self {
            ApiError::Validation(fields) => (Some(fields.into_map()), None),
            ApiError::Staging { detail } | ApiError::Internal { detail } => {
                (None, Some(detail.unwrap_or_else(|| "Internal server error".to_string())))
            }
            _ => (None, None),
        };

        let body = ErrorResponse {
            success: false,
            message,
            errors,
            error,
        };

        (status, Json(body)).into_response()
    }
}
