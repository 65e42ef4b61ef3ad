//! Store traits: the persistence contracts the engine depends on.
//!
//! Implemented by [`crate::MemoryStore`] and [`crate::PgStore`].  Inserts
//! keyed by a caller-supplied id are idempotent: repeating one returns the
//! existing row.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    NewProposal, NewWorkflowRun, ProposalRow, ProposalStatus, RunStatus, StepRunRow,
    StepRunUpdate, WorkflowRow, WorkflowRunRow, WorkflowVersionRow,
};
use crate::DbError;

/// Workflows and their immutable versions.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn create_workflow(&self, name: &str) -> Result<WorkflowRow, DbError>;

    /// Returns `DbError::NotFound` if the workflow does not exist.
    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError>;

    /// Returns `DbError::NotFound` if the version does not exist.
    async fn get_version(&self, id: Uuid) -> Result<WorkflowVersionRow, DbError>;

    /// Store a new version and make it the workflow's latest.
    async fn create_version(
        &self,
        workflow_id: Uuid,
        definition: serde_json::Value,
    ) -> Result<WorkflowVersionRow, DbError>;

    /// Like [`WorkflowStore::create_version`], but only while the workflow's
    /// latest version is still `expected_latest`.  The compare and the write
    /// happen atomically; a lost race returns `DbError::VersionConflict`
    /// and writes nothing.
    async fn create_version_if_latest(
        &self,
        workflow_id: Uuid,
        expected_latest: Option<Uuid>,
        definition: serde_json::Value,
    ) -> Result<WorkflowVersionRow, DbError>;
}

/// Workflow runs and their step runs.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a run in `RUNNING` status.
    async fn create_run(&self, run: NewWorkflowRun) -> Result<WorkflowRunRow, DbError>;

    /// Set the run status; terminal statuses also stamp `completed_at`.
    async fn update_run_status(&self, id: Uuid, status: RunStatus) -> Result<(), DbError>;

    async fn get_run(&self, id: Uuid) -> Result<WorkflowRunRow, DbError>;

    /// The run still `RUNNING` for this workflow and chat, if any.
    async fn find_running_run(
        &self,
        workflow_id: Uuid,
        chat_id: Uuid,
    ) -> Result<Option<WorkflowRunRow>, DbError>;

    /// Insert a step run in `RUNNING` status.
    async fn create_step_run(
        &self,
        id: Uuid,
        run_id: Uuid,
        step_id: &str,
    ) -> Result<StepRunRow, DbError>;

    async fn update_step_run(&self, id: Uuid, update: StepRunUpdate) -> Result<(), DbError>;

    /// Step runs of a run, in creation order.
    async fn list_step_runs(&self, run_id: Uuid) -> Result<Vec<StepRunRow>, DbError>;
}

/// Pending DAG edits.
#[async_trait]
pub trait ProposalStore: Send + Sync {
    /// Insert a proposal in `pending` status.
    async fn create_proposal(&self, proposal: NewProposal) -> Result<ProposalRow, DbError>;

    async fn get_proposal(&self, id: Uuid) -> Result<ProposalRow, DbError>;

    /// All proposals of a workflow, newest first.
    async fn list_proposals(&self, workflow_id: Uuid) -> Result<Vec<ProposalRow>, DbError>;

    async fn update_proposal_status(
        &self,
        id: Uuid,
        status: ProposalStatus,
    ) -> Result<(), DbError>;
}
