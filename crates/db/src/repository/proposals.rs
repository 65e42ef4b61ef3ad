//! Workflow proposal queries.

use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    DbError,
    models::{NewProposal, ProposalRow, ProposalStatus},
};

const PROPOSAL_COLUMNS: &str = "id, workflow_id, base_version_id, proposed_definition, \
     tool_calls, user_message, model_id, created_at, expires_at, status";

pub async fn create_proposal(pool: &PgPool, proposal: NewProposal) -> Result<ProposalRow, DbError> {
    let row = sqlx::query_as::<_, ProposalRow>(&format!(
        "INSERT INTO workflow_proposals ({PROPOSAL_COLUMNS})
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
         RETURNING {PROPOSAL_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(proposal.workflow_id)
    .bind(proposal.base_version_id)
    .bind(proposal.proposed_definition)
    .bind(proposal.tool_calls)
    .bind(proposal.user_message)
    .bind(proposal.model_id)
    .bind(proposal.created_at)
    .bind(proposal.expires_at)
    .bind(ProposalStatus::Pending)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

pub async fn get_proposal(pool: &PgPool, id: Uuid) -> Result<ProposalRow, DbError> {
    sqlx::query_as::<_, ProposalRow>(&format!(
        "SELECT {PROPOSAL_COLUMNS} FROM workflow_proposals WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Proposals of a workflow, newest first.
pub async fn list_proposals(pool: &PgPool, workflow_id: Uuid) -> Result<Vec<ProposalRow>, DbError> {
    let rows = sqlx::query_as::<_, ProposalRow>(&format!(
        "SELECT {PROPOSAL_COLUMNS} FROM workflow_proposals
         WHERE workflow_id = $1
         ORDER BY created_at DESC"
    ))
    .bind(workflow_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

pub async fn update_proposal_status(
    pool: &PgPool,
    id: Uuid,
    status: ProposalStatus,
) -> Result<(), DbError> {
    let result = sqlx::query("UPDATE workflow_proposals SET status = $1 WHERE id = $2")
        .bind(status)
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}
