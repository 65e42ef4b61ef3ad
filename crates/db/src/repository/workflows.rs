//! Workflow and workflow-version queries.

use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    DbError,
    models::{WorkflowRow, WorkflowVersionRow},
};

/// Insert a new workflow without any version.
pub async fn create_workflow(pool: &PgPool, name: &str) -> Result<WorkflowRow, DbError> {
    let row = sqlx::query_as::<_, WorkflowRow>(
        r#"
        INSERT INTO workflows (id, name, latest_version_id, created_at)
        VALUES ($1, $2, NULL, $3)
        RETURNING id, name, latest_version_id, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetch a single workflow by its primary key.
pub async fn get_workflow(pool: &PgPool, id: Uuid) -> Result<WorkflowRow, DbError> {
    sqlx::query_as::<_, WorkflowRow>(
        r#"SELECT id, name, latest_version_id, created_at FROM workflows WHERE id = $1"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Fetch a single workflow version by its primary key.
pub async fn get_version(pool: &PgPool, id: Uuid) -> Result<WorkflowVersionRow, DbError> {
    sqlx::query_as::<_, WorkflowVersionRow>(
        r#"SELECT id, workflow_id, definition, created_at FROM workflow_versions WHERE id = $1"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Insert a version and point the workflow's `latest_version_id` at it,
/// both in one transaction.
pub async fn create_version(
    pool: &PgPool,
    workflow_id: Uuid,
    definition: serde_json::Value,
) -> Result<WorkflowVersionRow, DbError> {
    let mut tx = pool.begin().await?;

    let row = insert_version(&mut tx, workflow_id, definition).await?;
    let updated = sqlx::query("UPDATE workflows SET latest_version_id = $1 WHERE id = $2")
        .bind(row.id)
        .bind(workflow_id)
        .execute(&mut *tx)
        .await?;

    if updated.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(DbError::NotFound);
    }

    tx.commit().await?;
    Ok(row)
}

/// Same as [`create_version`], but the pointer only moves while it still
/// equals `expected_latest`.  Otherwise the transaction is rolled back and
/// `DbError::VersionConflict` carries the current latest version.
pub async fn create_version_if_latest(
    pool: &PgPool,
    workflow_id: Uuid,
    expected_latest: Option<Uuid>,
    definition: serde_json::Value,
) -> Result<WorkflowVersionRow, DbError> {
    let mut tx = pool.begin().await?;

    let row = insert_version(&mut tx, workflow_id, definition).await?;
    let updated = sqlx::query(
        r#"
        UPDATE workflows SET latest_version_id = $1
        WHERE id = $2 AND latest_version_id IS NOT DISTINCT FROM $3
        "#,
    )
    .bind(row.id)
    .bind(workflow_id)
    .bind(expected_latest)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        tx.rollback().await?;
        let current = get_workflow(pool, workflow_id).await?;
        return Err(DbError::VersionConflict {
            actual: current.latest_version_id,
        });
    }

    tx.commit().await?;
    Ok(row)
}

async fn insert_version(
    tx: &mut Transaction<'_, Postgres>,
    workflow_id: Uuid,
    definition: serde_json::Value,
) -> Result<WorkflowVersionRow, DbError> {
    let row = sqlx::query_as::<_, WorkflowVersionRow>(
        r#"
        INSERT INTO workflow_versions (id, workflow_id, definition, created_at)
        VALUES ($1, $2, $3, $4)
        RETURNING id, workflow_id, definition, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(workflow_id)
    .bind(definition)
    .bind(Utc::now())
    .fetch_one(&mut **tx)
    .await?;

    Ok(row)
}
