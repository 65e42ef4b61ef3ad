//! Loading and committing workflow versions through a [`WorkflowStore`],
//! with store errors mapped onto engine errors.

use uuid::Uuid;

use db::{DbError, WorkflowStore};

use crate::models::{Dag, WorkflowVersion};
use crate::EngineError;

/// Load `version_id`, or the latest version of `workflow_id` when `None`.
pub(crate) async fn load_version(
    workflows: &dyn WorkflowStore,
    workflow_id: Uuid,
    version_id: Option<Uuid>,
) -> Result<WorkflowVersion, EngineError> {
    let workflow = workflows
        .get_workflow(workflow_id)
        .await
        .map_err(|e| match e {
            DbError::NotFound => EngineError::WorkflowNotFound(workflow_id),
            other => other.into(),
        })?;

    let version_id = match version_id {
        Some(id) => id,
        None => workflow
            .latest_version_id
            .ok_or(EngineError::NoVersion(workflow_id))?,
    };

    let row = workflows.get_version(version_id).await.map_err(|e| match e {
        DbError::NotFound => EngineError::VersionNotFound(version_id),
        other => other.into(),
    })?;
    if row.workflow_id != workflow_id {
        return Err(EngineError::VersionNotFound(version_id));
    }

    Ok(WorkflowVersion::try_from(row)?)
}

/// Store `dag` as the new latest version, provided the latest version is
/// still `base_version_id`.
///
/// # Errors
/// [`EngineError::VersionMismatch`] when another version landed first.
pub(crate) async fn commit_version(
    workflows: &dyn WorkflowStore,
    workflow_id: Uuid,
    base_version_id: Uuid,
    dag: &Dag,
) -> Result<WorkflowVersion, EngineError> {
    let row = workflows
        .create_version_if_latest(workflow_id, Some(base_version_id), dag.to_definition())
        .await
        .map_err(|e| match e {
            DbError::NotFound => EngineError::WorkflowNotFound(workflow_id),
            DbError::VersionConflict { actual } => EngineError::VersionMismatch {
                expected: base_version_id,
                actual,
            },
            other => other.into(),
        })?;

    Ok(WorkflowVersion::try_from(row)?)
}
