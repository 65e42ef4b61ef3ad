//! In-memory store used by tests and by `serve` when no database is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    NewProposal, NewWorkflowRun, ProposalRow, ProposalStatus, RunStatus, StepRunRow,
    StepRunStatus, StepRunUpdate, WorkflowRow, WorkflowRunRow, WorkflowVersionRow,
};
use crate::store::{ProposalStore, RunStore, WorkflowStore};
use crate::DbError;

#[derive(Default)]
struct Tables {
    workflows: HashMap<Uuid, WorkflowRow>,
    versions: HashMap<Uuid, WorkflowVersionRow>,
    runs: HashMap<Uuid, WorkflowRunRow>,
    /// Insertion order is preserved so listing matches creation order.
    step_runs: Vec<StepRunRow>,
    proposals: Vec<ProposalRow>,
}

/// A process-local store implementing every store trait.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn create_workflow(&self, name: &str) -> Result<WorkflowRow, DbError> {
        let row = WorkflowRow {
            id: Uuid::new_v4(),
            name: name.to_string(),
            latest_version_id: None,
            created_at: Utc::now(),
        };
        self.tables.write().await.workflows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError> {
        self.tables
            .read()
            .await
            .workflows
            .get(&id)
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn get_version(&self, id: Uuid) -> Result<WorkflowVersionRow, DbError> {
        self.tables
            .read()
            .await
            .versions
            .get(&id)
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn create_version(
        &self,
        workflow_id: Uuid,
        definition: serde_json::Value,
    ) -> Result<WorkflowVersionRow, DbError> {
        let mut tables = self.tables.write().await;
        insert_version(&mut tables, workflow_id, None, definition)
    }

    async fn create_version_if_latest(
        &self,
        workflow_id: Uuid,
        expected_latest: Option<Uuid>,
        definition: serde_json::Value,
    ) -> Result<WorkflowVersionRow, DbError> {
        let mut tables = self.tables.write().await;
        insert_version(&mut tables, workflow_id, Some(expected_latest), definition)
    }
}

/// Insert a version under the caller's write lock.  With `expected` set,
/// the workflow's latest version must still match it.
fn insert_version(
    tables: &mut Tables,
    workflow_id: Uuid,
    expected: Option<Option<Uuid>>,
    definition: serde_json::Value,
) -> Result<WorkflowVersionRow, DbError> {
    let workflow = tables.workflows.get_mut(&workflow_id).ok_or(DbError::NotFound)?;
    if let Some(expected) = expected {
        if workflow.latest_version_id != expected {
            return Err(DbError::VersionConflict {
                actual: workflow.latest_version_id,
            });
        }
    }

    let row = WorkflowVersionRow {
        id: Uuid::new_v4(),
        workflow_id,
        definition,
        created_at: Utc::now(),
    };
    workflow.latest_version_id = Some(row.id);
    tables.versions.insert(row.id, row.clone());
    Ok(row)
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn create_run(&self, run: NewWorkflowRun) -> Result<WorkflowRunRow, DbError> {
        let mut tables = self.tables.write().await;
        let row = tables.runs.entry(run.id).or_insert_with(|| WorkflowRunRow {
            id: run.id,
            workflow_id: run.workflow_id,
            version_id: run.version_id,
            chat_id: run.chat_id,
            trigger_message_id: run.trigger_message_id,
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
        });
        Ok(row.clone())
    }

    async fn update_run_status(&self, id: Uuid, status: RunStatus) -> Result<(), DbError> {
        let mut tables = self.tables.write().await;
        let run = tables.runs.get_mut(&id).ok_or(DbError::NotFound)?;
        run.status = status;
        if status.is_terminal() {
            run.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<WorkflowRunRow, DbError> {
        self.tables
            .read()
            .await
            .runs
            .get(&id)
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn find_running_run(
        &self,
        workflow_id: Uuid,
        chat_id: Uuid,
    ) -> Result<Option<WorkflowRunRow>, DbError> {
        Ok(self
            .tables
            .read()
            .await
            .runs
            .values()
            .find(|r| {
                r.workflow_id == workflow_id && r.chat_id == chat_id && r.status == RunStatus::Running
            })
            .cloned())
    }

    async fn create_step_run(
        &self,
        id: Uuid,
        run_id: Uuid,
        step_id: &str,
    ) -> Result<StepRunRow, DbError> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.step_runs.iter().find(|s| s.id == id) {
            return Ok(existing.clone());
        }

        let row = StepRunRow {
            id,
            run_id,
            step_id: step_id.to_string(),
            status: StepRunStatus::Running,
            output: None,
            error: None,
            logs: None,
            tool_calls: None,
            started_at: Some(Utc::now()),
            completed_at: None,
        };
        tables.step_runs.push(row.clone());
        Ok(row)
    }

    async fn update_step_run(&self, id: Uuid, update: StepRunUpdate) -> Result<(), DbError> {
        let mut tables = self.tables.write().await;
        let step = tables
            .step_runs
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(DbError::NotFound)?;

        step.status = update.status;
        step.output = update.output;
        step.error = update.error;
        step.logs = update.logs;
        step.tool_calls = update.tool_calls;
        if update.status.is_terminal() {
            step.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn list_step_runs(&self, run_id: Uuid) -> Result<Vec<StepRunRow>, DbError> {
        Ok(self
            .tables
            .read()
            .await
            .step_runs
            .iter()
            .filter(|s| s.run_id == run_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ProposalStore for MemoryStore {
    async fn create_proposal(&self, proposal: NewProposal) -> Result<ProposalRow, DbError> {
        let row = ProposalRow {
            id: Uuid::new_v4(),
            workflow_id: proposal.workflow_id,
            base_version_id: proposal.base_version_id,
            proposed_definition: proposal.proposed_definition,
            tool_calls: proposal.tool_calls,
            user_message: proposal.user_message,
            model_id: proposal.model_id,
            created_at: proposal.created_at,
            expires_at: proposal.expires_at,
            status: ProposalStatus::Pending,
        };
        self.tables.write().await.proposals.push(row.clone());
        Ok(row)
    }

    async fn get_proposal(&self, id: Uuid) -> Result<ProposalRow, DbError> {
        self.tables
            .read()
            .await
            .proposals
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn list_proposals(&self, workflow_id: Uuid) -> Result<Vec<ProposalRow>, DbError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<ProposalRow> = tables
            .proposals
            .iter()
            .filter(|p| p.workflow_id == workflow_id)
            .cloned()
            .collect();
        // Stable sort keeps later inserts first among equal timestamps.
        rows.reverse();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn update_proposal_status(
        &self,
        id: Uuid,
        status: ProposalStatus,
    ) -> Result<(), DbError> {
        let mut tables = self.tables.write().await;
        let proposal = tables
            .proposals
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(DbError::NotFound)?;
        proposal.status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[tokio::test]
    async fn create_version_moves_latest_pointer() {
        let store = MemoryStore::new();
        let wf = store.create_workflow("wf").await.unwrap();

        let v1 = store.create_version(wf.id, json!({ "steps": [] })).await.unwrap();
        let v2 = store.create_version(wf.id, json!({ "steps": [] })).await.unwrap();

        let reloaded = store.get_workflow(wf.id).await.unwrap();
        assert_ne!(v1.id, v2.id);
        assert_eq!(reloaded.latest_version_id, Some(v2.id));
    }

    #[tokio::test]
    async fn conditional_version_write_requires_expected_latest() {
        let store = MemoryStore::new();
        let wf = store.create_workflow("wf").await.unwrap();
        let v1 = store
            .create_version_if_latest(wf.id, None, json!({ "steps": [] }))
            .await
            .unwrap();

        let stale = store
            .create_version_if_latest(wf.id, None, json!({ "steps": [] }))
            .await;
        assert!(matches!(
            stale,
            Err(DbError::VersionConflict { actual }) if actual == Some(v1.id)
        ));

        let v2 = store
            .create_version_if_latest(wf.id, Some(v1.id), json!({ "steps": [] }))
            .await
            .unwrap();
        let reloaded = store.get_workflow(wf.id).await.unwrap();
        assert_eq!(reloaded.latest_version_id, Some(v2.id));
        assert_eq!(store.tables.read().await.versions.len(), 2);
    }

    #[tokio::test]
    async fn create_run_is_idempotent_by_id() {
        let store = MemoryStore::new();
        let new_run = NewWorkflowRun {
            id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            version_id: Uuid::new_v4(),
            chat_id: Uuid::new_v4(),
            trigger_message_id: Uuid::new_v4(),
        };

        let first = store.create_run(new_run.clone()).await.unwrap();
        store.update_run_status(first.id, RunStatus::Failed).await.unwrap();
        let again = store.create_run(new_run).await.unwrap();

        assert_eq!(again.status, RunStatus::Failed);
        assert!(again.completed_at.is_some());
    }

    #[tokio::test]
    async fn find_running_run_ignores_finished_runs() {
        let store = MemoryStore::new();
        let (workflow_id, chat_id) = (Uuid::new_v4(), Uuid::new_v4());
        let run = store
            .create_run(NewWorkflowRun {
                id: Uuid::new_v4(),
                workflow_id,
                version_id: Uuid::new_v4(),
                chat_id,
                trigger_message_id: Uuid::new_v4(),
            })
            .await
            .unwrap();

        assert!(store.find_running_run(workflow_id, chat_id).await.unwrap().is_some());
        store.update_run_status(run.id, RunStatus::Passed).await.unwrap();
        assert!(store.find_running_run(workflow_id, chat_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn proposals_list_newest_first() {
        let store = MemoryStore::new();
        let workflow_id = Uuid::new_v4();
        let now = Utc::now();

        for offset in [0, 5, 2] {
            store
                .create_proposal(NewProposal {
                    workflow_id,
                    base_version_id: Uuid::new_v4(),
                    proposed_definition: json!({ "steps": [] }),
                    tool_calls: json!([]),
                    user_message: format!("edit {offset}"),
                    model_id: "m".into(),
                    created_at: now + Duration::seconds(offset),
                    expires_at: now + Duration::minutes(15),
                })
                .await
                .unwrap();
        }

        let listed = store.list_proposals(workflow_id).await.unwrap();
        let messages: Vec<&str> = listed.iter().map(|p| p.user_message.as_str()).collect();
        assert_eq!(messages, vec!["edit 5", "edit 2", "edit 0"]);
    }
}
