use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::AppState;
use crate::ApiError;
use db::models::{StepRunRow, WorkflowRunRow};
use db::DbError;
use engine::{EngineError, RunOutcome, RunRequest};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRunDto {
    pub chat_id: Uuid,
    pub trigger_message_id: Uuid,
    pub user_message: String,
    pub model_id: String,
    #[serde(default)]
    pub version_id: Option<Uuid>,
}

/// Start a run, unless one is already active for this workflow and chat.
pub async fn trigger(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<TriggerRunDto>,
) -> Result<Json<RunOutcome>, ApiError> {
    if let Some(active) = state
        .runs
        .find_running_run(id, payload.chat_id)
        .await
        .map_err(EngineError::from)?
    {
        info!(workflow_id = %id, run_id = %active.id, "rejecting trigger, run in progress");
        return Err(ApiError::RunInProgress { run_id: active.id });
    }

    let outcome = state
        .runner
        .run(RunRequest {
            workflow_id: id,
            chat_id: payload.chat_id,
            trigger_message_id: payload.trigger_message_id,
            user_message: payload.user_message,
            model_id: payload.model_id,
            version_id: payload.version_id,
        })
        .await?;

    Ok(Json(outcome))
}

#[derive(Debug, Serialize)]
pub struct RunView {
    pub run: WorkflowRunRow,
    pub steps: Vec<StepRunRow>,
}

pub async fn get(
    Path(run_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<RunView>, ApiError> {
    let run = match state.runs.get_run(run_id).await {
        Ok(run) => run,
        Err(DbError::NotFound) => return Err(ApiError::NotFound(format!("run '{run_id}' not found"))),
        Err(e) => return Err(EngineError::from(e).into()),
    };
    let steps = state
        .runs
        .list_step_runs(run_id)
        .await
        .map_err(EngineError::from)?;

    Ok(Json(RunView { run, steps }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{chain, fixture};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use db::models::{NewWorkflowRun, RunStatus};
    use db::{RunStore, WorkflowStore};

    fn dto(chat_id: Uuid) -> TriggerRunDto {
        TriggerRunDto {
            chat_id,
            trigger_message_id: Uuid::new_v4(),
            user_message: "go".into(),
            model_id: "test-model".into(),
            version_id: None,
        }
    }

    #[tokio::test]
    async fn trigger_runs_the_workflow() {
        let f = fixture().await;
        let workflow_id = f.workflow(&chain(2)).await;

        let Json(outcome) = trigger(Path(workflow_id), State(f.state.clone()), Json(dto(Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(outcome.content, "Mock response");

        let Json(view) = get(Path(outcome.workflow_run_id), State(f.state)).await.unwrap();
        assert_eq!(view.run.status, RunStatus::Passed);
        assert_eq!(view.steps.len(), 2);
    }

    #[tokio::test]
    async fn second_trigger_in_same_chat_is_rejected() {
        let f = fixture().await;
        let workflow_id = f.workflow(&chain(1)).await;
        let chat_id = Uuid::new_v4();
        let version_id = f
            .store
            .get_workflow(workflow_id)
            .await
            .unwrap()
            .latest_version_id
            .unwrap();
        f.store
            .create_run(NewWorkflowRun {
                id: Uuid::new_v4(),
                workflow_id,
                version_id,
                chat_id,
                trigger_message_id: Uuid::new_v4(),
            })
            .await
            .unwrap();

        let err = trigger(Path(workflow_id), State(f.state.clone()), Json(dto(chat_id)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "run_in_progress");
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);

        // Other chats are not blocked.
        assert!(trigger(Path(workflow_id), State(f.state), Json(dto(Uuid::new_v4())))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn unknown_run_is_404() {
        let f = fixture().await;
        let err = get(Path(Uuid::new_v4()), State(f.state)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
