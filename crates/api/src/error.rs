use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use engine::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Another run of this workflow is still active in the same chat.
    #[error("workflow run {run_id} is still in progress")]
    RunInProgress { run_id: Uuid },

    #[error("{0}")]
    NotFound(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RunInProgress { .. } => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Engine(e) => match e {
                EngineError::InvalidDag(_) | EngineError::InvalidEdit(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                EngineError::WorkflowNotFound(_)
                | EngineError::NoVersion(_)
                | EngineError::VersionNotFound(_)
                | EngineError::ProposalNotFound(_) => StatusCode::NOT_FOUND,
                EngineError::VersionMismatch { .. } | EngineError::ProposalNotPending { .. } => {
                    StatusCode::CONFLICT
                }
                EngineError::ProposalExpired(_) => StatusCode::GONE,
                EngineError::Provider(_) => StatusCode::BAD_GATEWAY,
                EngineError::ExecutionFailed { .. }
                | EngineError::InvalidDefinition(_)
                | EngineError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Engine(e) => e.code(),
            Self::RunInProgress { .. } => "run_in_progress",
            Self::NotFound(_) => "not_found",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if matches!(self, Self::Engine(EngineError::Database(_))) {
            error!("database error: {self}");
            "internal error".to_string()
        } else {
            self.to_string()
        };

        let body = json!({ "error": { "code": self.code(), "message": message } });
        (status, Json(body)).into_response()
    }
}
