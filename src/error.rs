// Domain errors callers must tell apart, plus their HTTP mapping.
// Store internals and wiring stay on anyhow.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::models::{DeploymentType, ResourceType};

#[derive(Debug, Error)]
pub enum MeterError {
    /// No pricing rate covers this lookup. Never substituted with a
    /// zero price.
    #[error("no {} rate for {} deployments at {at}", resource_type.as_str(), deployment_type.as_str())]
    RateNotFound {
        resource_type: ResourceType,
        deployment_type: DeploymentType,
        at: i64,
    },

    #[error("deployment {0} is not registered")]
    DeploymentNotFound(String),

    #[error("deployment {0} is already registered")]
    DeploymentExists(String),

    /// Snapshot arrived for an hour that is already finalized; the
    /// only way into a finalized hour is an explicit recompute.
    #[error("snapshot for deployment {deployment_id} is late: hour {hour_start} is finalized")]
    LateSnapshot {
        deployment_id: String,
        hour_start: i64,
    },

    #[error("{0}")]
    InvalidRequest(String),

    #[error("billing store failure: {0}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl MeterError {
    fn status(&self) -> StatusCode {
        match self {
            MeterError::RateNotFound { .. } => StatusCode::NOT_FOUND,
            MeterError::DeploymentNotFound(_) => StatusCode::NOT_FOUND,
            MeterError::DeploymentExists(_) => StatusCode::CONFLICT,
            MeterError::LateSnapshot { .. } => StatusCode::CONFLICT,
            MeterError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            MeterError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for MeterError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type MeterResult<T> = Result<T, MeterError>;
