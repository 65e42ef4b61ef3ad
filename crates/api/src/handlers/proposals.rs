use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use super::AppState;
use crate::ApiError;
use engine::modifier::generate_step_id;
use engine::{DagToolCall, EngineError, Proposal, ProposalDraft, WorkflowVersion};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProposalDto {
    pub tool_calls: Vec<DagToolCall>,
    pub user_message: String,
    pub model_id: String,
}

/// The workflow's current pending proposal, or `null`.
pub async fn pending(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Option<Proposal>>, ApiError> {
    let proposal = state.proposals.get_pending_proposal(id, Utc::now()).await?;
    Ok(Json(proposal))
}

pub async fn create(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<CreateProposalDto>,
) -> Result<(StatusCode, Json<Proposal>), ApiError> {
    let available_tools = state
        .catalog
        .cached_tools(false)
        .await
        .map_err(EngineError::from)?;

    let proposal = state
        .proposals
        .create_proposal(
            ProposalDraft {
                workflow_id: id,
                tool_calls: payload.tool_calls,
                user_message: payload.user_message,
                model_id: payload.model_id,
                available_tools,
            },
            generate_step_id,
            Utc::now(),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(proposal)))
}

pub async fn get(
    Path((id, proposal_id)): Path<(Uuid, Uuid)>,
    State(state): State<AppState>,
) -> Result<Json<Proposal>, ApiError> {
    let proposal = state.proposals.get_proposal(proposal_id, Utc::now()).await?;
    if proposal.workflow_id != id {
        return Err(EngineError::ProposalNotFound(proposal_id).into());
    }
    Ok(Json(proposal))
}

pub async fn apply(
    Path((id, proposal_id)): Path<(Uuid, Uuid)>,
    State(state): State<AppState>,
) -> Result<Json<WorkflowVersion>, ApiError> {
    let version = state
        .proposals
        .apply_proposal(id, proposal_id, Utc::now())
        .await?;
    Ok(Json(version))
}

pub async fn reject(
    Path((id, proposal_id)): Path<(Uuid, Uuid)>,
    State(state): State<AppState>,
) -> Result<Json<Proposal>, ApiError> {
    let proposal = state
        .proposals
        .reject_proposal(id, proposal_id, Utc::now())
        .await?;
    Ok(Json(proposal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{chain, fixture};
    use db::WorkflowStore;
    use serde_json::json;

    fn add_step_dto() -> CreateProposalDto {
        CreateProposalDto {
            tool_calls: vec![DagToolCall::new(
                "add_step",
                json!({ "name": "Review", "instruction": "proofread", "position": "end" }),
            )],
            user_message: "add a review".into(),
            model_id: "test-model".into(),
        }
    }

    #[tokio::test]
    async fn create_then_apply_proposal() {
        let f = fixture().await;
        let id = f.workflow(&chain(2)).await;

        let (status, Json(created)) = create(Path(id), State(f.state.clone()), Json(add_step_dto()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let Json(pending_now) = pending(Path(id), State(f.state.clone())).await.unwrap();
        assert_eq!(pending_now.map(|p| p.id), Some(created.id));

        let Json(version) = apply(Path((id, created.id)), State(f.state.clone())).await.unwrap();
        assert_eq!(version.dag.steps.len(), 3);

        let Json(none_left) = pending(Path(id), State(f.state)).await.unwrap();
        assert!(none_left.is_none());
    }

    #[tokio::test]
    async fn stale_proposal_conflicts() {
        let f = fixture().await;
        let id = f.workflow(&chain(1)).await;
        let (_, Json(created)) = create(Path(id), State(f.state.clone()), Json(add_step_dto()))
            .await
            .unwrap();
        f.store.create_version(id, chain(2).to_definition()).await.unwrap();

        let err = apply(Path((id, created.id)), State(f.state)).await.unwrap_err();

        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "version_mismatch");
    }

    #[tokio::test]
    async fn invalid_edit_is_unprocessable() {
        let f = fixture().await;
        let id = f.workflow(&chain(1)).await;
        let dto = CreateProposalDto {
            tool_calls: vec![DagToolCall::new("explode", json!({}))],
            ..add_step_dto()
        };

        let err = create(Path(id), State(f.state), Json(dto)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn reject_then_get_shows_status() {
        let f = fixture().await;
        let id = f.workflow(&chain(1)).await;
        let (_, Json(created)) = create(Path(id), State(f.state.clone()), Json(add_step_dto()))
            .await
            .unwrap();

        reject(Path((id, created.id)), State(f.state.clone())).await.unwrap();
        let Json(stored) = get(Path((id, created.id)), State(f.state)).await.unwrap();

        assert_eq!(stored.status, engine::models::ProposalStatus::Rejected);
    }
}
