//! Tagged error kind that every handler returns instead of branching on
//! exceptions; the HTTP layer maps each variant to the §6/§7 envelope.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::domain::{ApiErrorBody, ApiErrorEnvelope};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    /// A write landed on a non-leader replica. Carries a hint to the leader's
    /// endpoint when one is known, surfaced as a `Leader-Endpoint` header
    /// rather than a body field (spec.md §9 redesign flag).
    #[error("not the leader")]
    NotLeader { leader_endpoint: Option<String> },

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotLeader { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::NotLeader { .. } => "leader not found".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ApiErrorEnvelope {
            error: ApiErrorBody {
                code: status.as_u16(),
                message: self.message(),
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let AppError::NotLeader {
            leader_endpoint: Some(endpoint),
        } = &self
        {
            if let Ok(value) = HeaderValue::from_str(endpoint) {
                response.headers_mut().insert("Leader-Endpoint", value);
            }
        }
        response
    }
}

/// Internal errors (I/O, serialization, peer errors that escape a handler)
/// are logged and translated to a generic 500, per spec.md §7.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        log::error!("internal error: {err:#}");
        AppError::Internal("internal server error".to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        log::error!("upstream request failed: {err}");
        AppError::Internal("internal server error".to_string())
    }
}
