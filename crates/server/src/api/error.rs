//! Mapping of core errors onto HTTP responses.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use provisioner_core::{AuditError, OrchestratorError, SchedulerError, StoreError};

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// An error returned by a handler.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    retry_after_secs: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        let status = match e {
            OrchestratorError::Conflict { .. } => StatusCode::CONFLICT,
            OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchestratorError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            OrchestratorError::ExternalOperation(_) => StatusCode::BAD_GATEWAY,
            OrchestratorError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            OrchestratorError::InvalidState(_) => StatusCode::UNPROCESSABLE_ENTITY,
            OrchestratorError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let retry_after_secs = match e {
            OrchestratorError::RateLimited { retry_after_secs } => Some(retry_after_secs),
            _ => None,
        };
        Self {
            status,
            message: e.to_string(),
            retry_after_secs,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let status = match e {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            StoreError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::NotRunning => Self::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
            SchedulerError::DuplicateJob(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }
}

impl From<AuditError> for ApiError {
    fn from(e: AuditError) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to query audit events: {}", e),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
            retry_after_secs: self.retry_after_secs,
        });
        let mut response = (self.status, body).into_response();
        if let Some(secs) = self.retry_after_secs {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestrator_error_status() {
        let cases = [
            (
                OrchestratorError::Conflict {
                    attendee_id: "a-1".to_string(),
                },
                StatusCode::CONFLICT,
            ),
            (
                OrchestratorError::NotFound("attendee a-1".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (
                OrchestratorError::InvalidState("completed".to_string()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (OrchestratorError::Timeout(240), StatusCode::GATEWAY_TIMEOUT),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status(), expected);
        }
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ApiError::from(OrchestratorError::RateLimited {
            retry_after_secs: 12,
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "12");
    }

    #[test]
    fn test_scheduler_not_running_is_unavailable() {
        assert_eq!(
            ApiError::from(SchedulerError::NotRunning).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
