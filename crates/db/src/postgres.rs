//! Postgres-backed implementation of the store traits.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    NewProposal, NewWorkflowRun, ProposalRow, ProposalStatus, RunStatus, StepRunRow,
    StepRunUpdate, WorkflowRow, WorkflowRunRow, WorkflowVersionRow,
};
use crate::repository::{proposals, runs, workflows};
use crate::store::{ProposalStore, RunStore, WorkflowStore};
use crate::{DbError, DbPool};

/// Thin adapter from the store traits onto the repository functions.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl WorkflowStore for PgStore {
    async fn create_workflow(&self, name: &str) -> Result<WorkflowRow, DbError> {
        workflows::create_workflow(&self.pool, name).await
    }

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError> {
        workflows::get_workflow(&self.pool, id).await
    }

    async fn get_version(&self, id: Uuid) -> Result<WorkflowVersionRow, DbError> {
        workflows::get_version(&self.pool, id).await
    }

    async fn create_version(
        &self,
        workflow_id: Uuid,
        definition: serde_json::Value,
    ) -> Result<WorkflowVersionRow, DbError> {
        workflows::create_version(&self.pool, workflow_id, definition).await
    }

    async fn create_version_if_latest(
        &self,
        workflow_id: Uuid,
        expected_latest: Option<Uuid>,
        definition: serde_json::Value,
    ) -> Result<WorkflowVersionRow, DbError> {
        workflows::create_version_if_latest(&self.pool, workflow_id, expected_latest, definition)
            .await
    }
}

#[async_trait]
impl RunStore for PgStore {
    async fn create_run(&self, run: NewWorkflowRun) -> Result<WorkflowRunRow, DbError> {
        runs::create_run(&self.pool, run).await
    }

    async fn update_run_status(&self, id: Uuid, status: RunStatus) -> Result<(), DbError> {
        runs::update_run_status(&self.pool, id, status).await
    }

    async fn get_run(&self, id: Uuid) -> Result<WorkflowRunRow, DbError> {
        runs::get_run(&self.pool, id).await
    }

    async fn find_running_run(
        &self,
        workflow_id: Uuid,
        chat_id: Uuid,
    ) -> Result<Option<WorkflowRunRow>, DbError> {
        runs::find_running_run(&self.pool, workflow_id, chat_id).await
    }

    async fn create_step_run(
        &self,
        id: Uuid,
        run_id: Uuid,
        step_id: &str,
    ) -> Result<StepRunRow, DbError> {
        runs::create_step_run(&self.pool, id, run_id, step_id).await
    }

    async fn update_step_run(&self, id: Uuid, update: StepRunUpdate) -> Result<(), DbError> {
        runs::update_step_run(&self.pool, id, update).await
    }

    async fn list_step_runs(&self, run_id: Uuid) -> Result<Vec<StepRunRow>, DbError> {
        runs::list_step_runs(&self.pool, run_id).await
    }
}

#[async_trait]
impl ProposalStore for PgStore {
    async fn create_proposal(&self, proposal: NewProposal) -> Result<ProposalRow, DbError> {
        proposals::create_proposal(&self.pool, proposal).await
    }

    async fn get_proposal(&self, id: Uuid) -> Result<ProposalRow, DbError> {
        proposals::get_proposal(&self.pool, id).await
    }

    async fn list_proposals(&self, workflow_id: Uuid) -> Result<Vec<ProposalRow>, DbError> {
        proposals::list_proposals(&self.pool, workflow_id).await
    }

    async fn update_proposal_status(
        &self,
        id: Uuid,
        status: ProposalStatus,
    ) -> Result<(), DbError> {
        proposals::update_proposal_status(&self.pool, id, status).await
    }
}
