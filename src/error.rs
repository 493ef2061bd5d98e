use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;
use utoipa::ToSchema;

use crate::auth_service::AuthError;
use crate::repository::RepoError;
use crate::session::SessionError;

/// ErrorResponse
///
/// Body of every non-2xx JSON response.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ErrorResponse {
    pub message: String,
}

/// AppError
///
/// The HTTP boundary error. Every handler returns `Result<_, AppError>`; each
/// kind maps to a status code and a message that is safe to show the user.
/// Store and driver details are logged, never sent.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Repository(#[from] RepoError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("{0}")]
    BadRequest(String),
    #[error("forbidden")]
    Forbidden,
    // The session was destroyed while handling the request.
    #[error("session ended")]
    SessionEnded,
}

const INTERNAL_MESSAGE: &str = "Something went wrong. Please try again.";
const INVALID_LOGIN_MESSAGE: &str = "Invalid account or password.";

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Auth(e) => match e {
                AuthError::InvalidCredentials | AuthError::UserNotFound => StatusCode::UNAUTHORIZED,
                AuthError::UserInactive => StatusCode::FORBIDDEN,
                AuthError::CurrentPasswordIncorrect
                | AuthError::PasswordTooShort { .. }
                | AuthError::PasswordSameAsOld => StatusCode::BAD_REQUEST,
                AuthError::Hashing(_) => StatusCode::INTERNAL_SERVER_ERROR,
                AuthError::Repository(e) => repo_status(e),
            },
            AppError::Repository(e) => repo_status(e),
            AppError::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::SessionEnded => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            AppError::Auth(e) => match e {
                // Same text for both so the response does not reveal which accounts exist.
                AuthError::InvalidCredentials | AuthError::UserNotFound => {
                    INVALID_LOGIN_MESSAGE.to_string()
                }
                AuthError::UserInactive => {
                    "Your account is not active. Please contact your administrator.".to_string()
                }
                AuthError::CurrentPasswordIncorrect => "Current password is incorrect.".to_string(),
                AuthError::PasswordTooShort { min } => {
                    format!("New password must be at least {min} characters.")
                }
                AuthError::PasswordSameAsOld => {
                    "New password must be different from the current password.".to_string()
                }
                AuthError::Hashing(_) => INTERNAL_MESSAGE.to_string(),
                AuthError::Repository(e) => repo_message(e),
            },
            AppError::Repository(e) => repo_message(e),
            AppError::Session(_) => "Session error. Please log in again.".to_string(),
            AppError::BadRequest(message) => message.clone(),
            AppError::Forbidden => "You do not have access to this page.".to_string(),
            AppError::SessionEnded => "Your session has ended. Please log in again.".to_string(),
        }
    }
}

fn repo_status(err: &RepoError) -> StatusCode {
    match err {
        RepoError::NotFound => StatusCode::NOT_FOUND,
        RepoError::ProtectedColumn(_) | RepoError::EmptyCondition | RepoError::InvalidFields => {
            StatusCode::BAD_REQUEST
        }
        RepoError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        RepoError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        RepoError::MissingActor | RepoError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn repo_message(err: &RepoError) -> String {
    match err {
        RepoError::NotFound => "Record not found.".to_string(),
        RepoError::ProtectedColumn(column) => format!("Field `{column}` cannot be changed."),
        RepoError::EmptyCondition => "At least one condition is required.".to_string(),
        RepoError::InvalidFields => "Invalid field data.".to_string(),
        RepoError::Cancelled => "The request was cancelled.".to_string(),
        RepoError::DeadlineExceeded => "The request took too long.".to_string(),
        RepoError::MissingActor | RepoError::Store(_) => INTERNAL_MESSAGE.to_string(),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }

        let body = ErrorResponse {
            message: self.user_message(),
        };
        (status, Json(body)).into_response()
    }
}
