//! Workflow-run and step-run queries.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    DbError,
    models::{NewWorkflowRun, RunStatus, StepRunRow, StepRunStatus, StepRunUpdate, WorkflowRunRow},
};

const RUN_COLUMNS: &str =
    "id, workflow_id, version_id, chat_id, trigger_message_id, status, started_at, completed_at";

const STEP_COLUMNS: &str =
    "id, run_id, step_id, status, output, error, logs, tool_calls, started_at, completed_at";

/// Insert a run in `RUNNING` status.  Re-inserting the same id returns the
/// stored row unchanged.
pub async fn create_run(pool: &PgPool, run: NewWorkflowRun) -> Result<WorkflowRunRow, DbError> {
    sqlx::query(
        r#"
        INSERT INTO workflow_runs
            (id, workflow_id, version_id, chat_id, trigger_message_id, status, started_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(run.id)
    .bind(run.workflow_id)
    .bind(run.version_id)
    .bind(run.chat_id)
    .bind(run.trigger_message_id)
    .bind(RunStatus::Running)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    get_run(pool, run.id).await
}

/// Update the status of a run; terminal statuses stamp `completed_at`.
pub async fn update_run_status(pool: &PgPool, id: Uuid, status: RunStatus) -> Result<(), DbError> {
    let completed_at = status.is_terminal().then(Utc::now);
    let result = sqlx::query(
        r#"
        UPDATE workflow_runs
        SET status = $1, completed_at = COALESCE($2, completed_at)
        WHERE id = $3
        "#,
    )
    .bind(status)
    .bind(completed_at)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

pub async fn get_run(pool: &PgPool, id: Uuid) -> Result<WorkflowRunRow, DbError> {
    sqlx::query_as::<_, WorkflowRunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM workflow_runs WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

pub async fn find_running_run(
    pool: &PgPool,
    workflow_id: Uuid,
    chat_id: Uuid,
) -> Result<Option<WorkflowRunRow>, DbError> {
    let row = sqlx::query_as::<_, WorkflowRunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM workflow_runs
         WHERE workflow_id = $1 AND chat_id = $2 AND status = $3
         ORDER BY started_at DESC
         LIMIT 1"
    ))
    .bind(workflow_id)
    .bind(chat_id)
    .bind(RunStatus::Running)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Insert a step run in `RUNNING` status (idempotent by id).
pub async fn create_step_run(
    pool: &PgPool,
    id: Uuid,
    run_id: Uuid,
    step_id: &str,
) -> Result<StepRunRow, DbError> {
    sqlx::query(
        r#"
        INSERT INTO step_runs (id, run_id, step_id, status, started_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(id)
    .bind(run_id)
    .bind(step_id)
    .bind(StepRunStatus::Running)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    sqlx::query_as::<_, StepRunRow>(&format!(
        "SELECT {STEP_COLUMNS} FROM step_runs WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

pub async fn update_step_run(pool: &PgPool, id: Uuid, update: StepRunUpdate) -> Result<(), DbError> {
    let completed_at = update.status.is_terminal().then(Utc::now);
    let result = sqlx::query(
        r#"
        UPDATE step_runs
        SET status = $1, output = $2, error = $3, logs = $4, tool_calls = $5,
            completed_at = COALESCE($6, completed_at)
        WHERE id = $7
        "#,
    )
    .bind(update.status)
    .bind(update.output)
    .bind(update.error)
    .bind(update.logs)
    .bind(update.tool_calls)
    .bind(completed_at)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

pub async fn list_step_runs(pool: &PgPool, run_id: Uuid) -> Result<Vec<StepRunRow>, DbError> {
    let rows = sqlx::query_as::<_, StepRunRow>(&format!(
        "SELECT {STEP_COLUMNS} FROM step_runs WHERE run_id = $1 ORDER BY started_at ASC"
    ))
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
