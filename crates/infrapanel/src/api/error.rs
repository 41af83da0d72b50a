use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use infrapanel_config::LogType;
use infrapanel_server_manager::ServerManagerError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Manager(#[from] ServerManagerError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Manager(e) => match e {
                ServerManagerError::NotFound(_) | ServerManagerError::LogNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                ServerManagerError::AlreadyRunning(_)
                | ServerManagerError::InvalidState(_)
                | ServerManagerError::StdinUnavailable(_)
                | ServerManagerError::Ambiguous(_) => StatusCode::CONFLICT,
                ServerManagerError::InvalidCommand(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(log_type = LogType::Http.as_str(), "Request failed: {}", self);
        }

        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ServerManagerError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ServerManagerError::LogNotFound("x".into()), StatusCode::NOT_FOUND),
            (ServerManagerError::AlreadyRunning("x".into()), StatusCode::CONFLICT),
            (ServerManagerError::invalid_state("x"), StatusCode::CONFLICT),
            (ServerManagerError::StdinUnavailable("x".into()), StatusCode::CONFLICT),
            (ServerManagerError::Ambiguous("x".into()), StatusCode::CONFLICT),
            (ServerManagerError::InvalidCommand("x".into()), StatusCode::BAD_REQUEST),
            (ServerManagerError::SpawnFailed("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (ServerManagerError::ArtifactMissing("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status_code(), expected);
        }
        assert_eq!(
            ApiError::BadRequest("offset".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
