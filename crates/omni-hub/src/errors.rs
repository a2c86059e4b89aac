//! API error wrapper: every failing call yields `{error, message}` with a
//! stable short key, mapped onto the right HTTP status.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use omni_data::DataError;
use omni_proto::ErrorBody;

/// Structured API error.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: &'static str,
    message: String,
}

impl ApiError {
    const fn new(status: StatusCode, error: &'static str, message: String) -> Self {
        Self {
            status,
            error,
            message,
        }
    }

    /// 400 with a caller-supplied detail.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message.into())
    }

    /// 401 for refused credentials.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message.into())
    }

    /// 403 for unauthorized server identities.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message.into())
    }

    /// 404 for unknown entities.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message.into())
    }

    /// 409 for lost races and refused transitions.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "conflict", message.into())
    }

    /// 500 for unexpected failures.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            message.into(),
        )
    }

    /// The HTTP status this error maps to.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<DataError> for ApiError {
    fn from(err: DataError) -> Self {
        match &err {
            DataError::NotFound { entity } => Self::not_found(format!("{entity} not found")),
            DataError::Conflict { reason } => Self::conflict((*reason).to_string()),
            DataError::UnknownStatus { value } => {
                Self::bad_request(format!("unknown status label: {value}"))
            }
            DataError::Database { operation, .. } => {
                tracing::error!(error = %err, operation, "database operation failed");
                Self::internal("database operation failed")
            }
            DataError::Migrate { .. } => {
                tracing::error!(error = %err, "migration failure surfaced in a handler");
                Self::internal("database schema error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.error.to_string(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Convenience alias for handler results.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_errors_map_to_stable_keys() {
        let not_found: ApiError = DataError::NotFound { entity: "server" }.into();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let conflict: ApiError = DataError::Conflict {
            reason: "claim_held_elsewhere",
        }
        .into();
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
    }
}
