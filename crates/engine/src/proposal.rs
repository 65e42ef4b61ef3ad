//! Proposal lifecycle.
//!
//! A proposal is an edited DAG waiting for the user's decision.  It is
//! computed against the workflow's latest version and may only be applied
//! while that version is still the latest (optimistic concurrency) and
//! before it expires.  Expiry is lazy: a stale pending proposal becomes
//! `expired` the first time it is read.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use db::models::NewProposal;
use db::{DbError, ProposalStore, WorkflowStore};
use providers::ToolRecord;

use crate::config::EngineConfig;
use crate::dag::validate_dag;
use crate::modifier::{apply_tool_calls_to_dag, DagToolCall, ModifyRequest};
use crate::models::{Proposal, ProposalStatus, ToolRef, WorkflowVersion};
use crate::versions::{commit_version, load_version};
use crate::EngineError;

/// Everything needed to compute a proposal.
#[derive(Debug, Clone)]
pub struct ProposalDraft {
    pub workflow_id: Uuid,
    pub tool_calls: Vec<DagToolCall>,
    pub user_message: String,
    pub model_id: String,
    /// Catalog snapshot; also the allow-list the edited DAG must satisfy.
    pub available_tools: Vec<ToolRecord>,
}

pub struct ProposalManager {
    workflows: Arc<dyn WorkflowStore>,
    proposals: Arc<dyn ProposalStore>,
    config: EngineConfig,
}

impl ProposalManager {
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        proposals: Arc<dyn ProposalStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            workflows,
            proposals,
            config,
        }
    }

    /// Apply `draft.tool_calls` to the latest version and store the result
    /// as a pending proposal.
    #[instrument(skip(self, draft, id_generator), fields(workflow_id = %draft.workflow_id))]
    pub async fn create_proposal(
        &self,
        draft: ProposalDraft,
        mut id_generator: impl FnMut() -> String + Send,
        now: DateTime<Utc>,
    ) -> Result<Proposal, EngineError> {
        let base = load_version(self.workflows.as_ref(), draft.workflow_id, None).await?;

        let proposed = apply_tool_calls_to_dag(ModifyRequest {
            dag: &base.dag,
            tool_calls: &draft.tool_calls,
            available_tools: &draft.available_tools,
            id_generator: &mut id_generator,
        })?;
        let allowed: Vec<ToolRef> = draft.available_tools.iter().map(ToolRef::from).collect();
        validate_dag(&proposed, Some(allowed.as_slice()))?;

        let row = self
            .proposals
            .create_proposal(NewProposal {
                workflow_id: draft.workflow_id,
                base_version_id: base.id,
                proposed_definition: proposed.to_definition(),
                tool_calls: serde_json::to_value(&draft.tool_calls)?,
                user_message: draft.user_message,
                model_id: draft.model_id,
                created_at: now,
                expires_at: now + self.config.proposal_ttl,
            })
            .await?;

        info!(proposal_id = %row.id, base_version_id = %base.id, "proposal created");
        Ok(Proposal::try_from(row)?)
    }

    /// Read a proposal, expiring it first if it is pending and stale.
    ///
    /// # Errors
    /// [`EngineError::ProposalExpired`] once `now` reaches `expires_at`.
    pub async fn get_proposal(&self, id: Uuid, now: DateTime<Utc>) -> Result<Proposal, EngineError> {
        let row = self.proposals.get_proposal(id).await.map_err(|e| match e {
            DbError::NotFound => EngineError::ProposalNotFound(id),
            other => other.into(),
        })?;
        let proposal = Proposal::try_from(row)?;

        match proposal.status {
            ProposalStatus::Expired => Err(EngineError::ProposalExpired(id)),
            ProposalStatus::Pending if proposal.is_past_expiry(now) => {
                self.expire(id).await?;
                Err(EngineError::ProposalExpired(id))
            }
            _ => Ok(proposal),
        }
    }

    /// The newest pending proposal of a workflow that has not expired.
    pub async fn get_pending_proposal(
        &self,
        workflow_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Proposal>, EngineError> {
        for row in self.proposals.list_proposals(workflow_id).await? {
            if row.status != ProposalStatus::Pending {
                continue;
            }
            let proposal = Proposal::try_from(row)?;
            if proposal.is_past_expiry(now) {
                self.expire(proposal.id).await?;
                continue;
            }
            return Ok(Some(proposal));
        }
        Ok(None)
    }

    /// Commit the proposal's DAG as the workflow's new latest version.
    ///
    /// # Errors
    /// - [`EngineError::ProposalExpired`] if the proposal is past its window.
    /// - [`EngineError::ProposalNotPending`] if it was already decided.
    /// - [`EngineError::VersionMismatch`] if the workflow moved on since the
    ///   proposal was computed, including a concurrent apply that won the
    ///   race.  Nothing is written in that case.
    #[instrument(skip(self, now))]
    pub async fn apply_proposal(
        &self,
        workflow_id: Uuid,
        proposal_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<WorkflowVersion, EngineError> {
        let proposal = self.pending_for(workflow_id, proposal_id, now).await?;

        validate_dag(&proposal.proposed_dag, None)?;
        let version = commit_version(
            self.workflows.as_ref(),
            workflow_id,
            proposal.base_version_id,
            &proposal.proposed_dag,
        )
        .await?;
        self.proposals
            .update_proposal_status(proposal.id, ProposalStatus::Applied)
            .await?;

        info!(version_id = %version.id, "proposal applied");
        Ok(version)
    }

    /// Decline a pending proposal.
    #[instrument(skip(self, now))]
    pub async fn reject_proposal(
        &self,
        workflow_id: Uuid,
        proposal_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Proposal, EngineError> {
        let mut proposal = self.pending_for(workflow_id, proposal_id, now).await?;
        self.proposals
            .update_proposal_status(proposal.id, ProposalStatus::Rejected)
            .await?;
        proposal.status = ProposalStatus::Rejected;
        Ok(proposal)
    }

    async fn pending_for(
        &self,
        workflow_id: Uuid,
        proposal_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Proposal, EngineError> {
        let proposal = self.get_proposal(proposal_id, now).await?;
        if proposal.workflow_id != workflow_id {
            return Err(EngineError::ProposalNotFound(proposal_id));
        }
        if proposal.status != ProposalStatus::Pending {
            return Err(EngineError::ProposalNotPending {
                id: proposal_id,
                status: proposal.status,
            });
        }
        Ok(proposal)
    }

    async fn expire(&self, id: Uuid) -> Result<(), EngineError> {
        debug!(proposal_id = %id, "expiring stale proposal");
        self.proposals
            .update_proposal_status(id, ProposalStatus::Expired)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use db::MemoryStore;
    use serde_json::json;

    use crate::models::{Dag, Step};

    struct Fixture {
        store: Arc<MemoryStore>,
        manager: ProposalManager,
        workflow_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let workflow = store.create_workflow("report").await.unwrap();
        let dag = Dag::new(vec![
            Step::new("step_1", "Research", "find facts"),
            Step::new("step_2", "Write", "write it up").after(&["step_1"]),
        ]);
        store
            .create_version(workflow.id, dag.to_definition())
            .await
            .unwrap();

        let manager = ProposalManager::new(store.clone(), store.clone(), EngineConfig::default());
        Fixture {
            store,
            manager,
            workflow_id: workflow.id,
        }
    }

    fn add_review_step(workflow_id: Uuid) -> ProposalDraft {
        ProposalDraft {
            workflow_id,
            tool_calls: vec![DagToolCall::new(
                "add_step",
                json!({ "name": "Review", "instruction": "proofread", "position": "end" }),
            )],
            user_message: "add a review step".into(),
            model_id: "test-model".into(),
            available_tools: Vec::new(),
        }
    }

    async fn propose(f: &Fixture, now: DateTime<Utc>) -> Proposal {
        f.manager
            .create_proposal(add_review_step(f.workflow_id), || "step_review".to_string(), now)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_proposal_stores_edited_dag_against_latest_version() {
        let f = fixture().await;
        let now = Utc::now();
        let proposal = propose(&f, now).await;

        let latest = f.store.get_workflow(f.workflow_id).await.unwrap().latest_version_id;
        assert_eq!(Some(proposal.base_version_id), latest);
        assert_eq!(proposal.status, ProposalStatus::Pending);
        assert_eq!(proposal.expires_at, now + Duration::minutes(15));
        assert_eq!(
            proposal.proposed_dag.step("step_review").map(|s| s.depends_on.clone()),
            Some(vec!["step_2".to_string()])
        );
        assert_eq!(proposal.tool_calls.len(), 1);
    }

    #[tokio::test]
    async fn create_proposal_rejects_bad_edits() {
        let f = fixture().await;
        let mut draft = add_review_step(f.workflow_id);
        draft.tool_calls = vec![DagToolCall::new("delete_step", json!({ "stepId": "ghost" }))];

        let result = f.manager.create_proposal(draft, || "unused".to_string(), Utc::now()).await;
        assert!(matches!(result, Err(EngineError::InvalidEdit(_))));
    }

    #[tokio::test]
    async fn apply_creates_new_latest_version() {
        let f = fixture().await;
        let now = Utc::now();
        let proposal = propose(&f, now).await;

        let version = f
            .manager
            .apply_proposal(f.workflow_id, proposal.id, now)
            .await
            .unwrap();

        let workflow = f.store.get_workflow(f.workflow_id).await.unwrap();
        assert_eq!(workflow.latest_version_id, Some(version.id));
        assert_eq!(version.dag, proposal.proposed_dag);
        let stored = f.manager.get_proposal(proposal.id, now).await.unwrap();
        assert_eq!(stored.status, ProposalStatus::Applied);
    }

    #[tokio::test]
    async fn apply_fails_on_version_mismatch_without_writing() {
        let f = fixture().await;
        let now = Utc::now();
        let proposal = propose(&f, now).await;

        // Someone else saved a version in the meantime.
        let concurrent = f
            .store
            .create_version(f.workflow_id, json!({ "steps": [] }))
            .await
            .unwrap();

        let result = f.manager.apply_proposal(f.workflow_id, proposal.id, now).await;

        assert!(matches!(
            &result,
            Err(EngineError::VersionMismatch { expected, actual })
                if *expected == proposal.base_version_id && *actual == Some(concurrent.id)
        ));
        assert_eq!(result.unwrap_err().code(), "version_mismatch");
        let workflow = f.store.get_workflow(f.workflow_id).await.unwrap();
        assert_eq!(workflow.latest_version_id, Some(concurrent.id));
        let stored = f.manager.get_proposal(proposal.id, now).await.unwrap();
        assert_eq!(stored.status, ProposalStatus::Pending);
    }

    /// Holds every conditional version write at a barrier so two applies
    /// read the same base before either commits.
    struct LockstepStore {
        inner: Arc<MemoryStore>,
        barrier: tokio::sync::Barrier,
    }

    #[async_trait::async_trait]
    impl WorkflowStore for LockstepStore {
        async fn create_workflow(&self, name: &str) -> Result<db::models::WorkflowRow, DbError> {
            self.inner.create_workflow(name).await
        }

        async fn get_workflow(&self, id: Uuid) -> Result<db::models::WorkflowRow, DbError> {
            self.inner.get_workflow(id).await
        }

        async fn get_version(&self, id: Uuid) -> Result<db::models::WorkflowVersionRow, DbError> {
            self.inner.get_version(id).await
        }

        async fn create_version(
            &self,
            workflow_id: Uuid,
            definition: serde_json::Value,
        ) -> Result<db::models::WorkflowVersionRow, DbError> {
            self.inner.create_version(workflow_id, definition).await
        }

        async fn create_version_if_latest(
            &self,
            workflow_id: Uuid,
            expected_latest: Option<Uuid>,
            definition: serde_json::Value,
        ) -> Result<db::models::WorkflowVersionRow, DbError> {
            self.barrier.wait().await;
            self.inner
                .create_version_if_latest(workflow_id, expected_latest, definition)
                .await
        }
    }

    #[tokio::test]
    async fn concurrent_applies_on_same_base_commit_once() {
        let f = fixture().await;
        let now = Utc::now();
        let first = propose(&f, now).await;
        let second = propose(&f, now).await;
        assert_eq!(first.base_version_id, second.base_version_id);

        let lockstep = Arc::new(LockstepStore {
            inner: f.store.clone(),
            barrier: tokio::sync::Barrier::new(2),
        });
        let manager = Arc::new(ProposalManager::new(
            lockstep,
            f.store.clone(),
            EngineConfig::default(),
        ));

        let tasks = [first.id, second.id].map(|id| {
            let manager = manager.clone();
            let workflow_id = f.workflow_id;
            tokio::spawn(async move { manager.apply_proposal(workflow_id, id, now).await })
        });
        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap());
        }

        let committed: Vec<&WorkflowVersion> =
            results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(committed.len(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(EngineError::VersionMismatch { .. })))
                .count(),
            1
        );

        let workflow = f.store.get_workflow(f.workflow_id).await.unwrap();
        assert_eq!(workflow.latest_version_id, Some(committed[0].id));
        let mut statuses = Vec::new();
        for id in [first.id, second.id] {
            statuses.push(f.store.get_proposal(id).await.unwrap().status);
        }
        statuses.sort_by_key(|s| s.to_string());
        assert_eq!(statuses, vec![ProposalStatus::Applied, ProposalStatus::Pending]);
    }

    #[tokio::test]
    async fn apply_after_expiry_fails_and_marks_expired() {
        let f = fixture().await;
        let created = Utc::now();
        let proposal = propose(&f, created).await;
        let later = created + Duration::minutes(16);

        let result = f.manager.apply_proposal(f.workflow_id, proposal.id, later).await;
        assert!(matches!(result, Err(EngineError::ProposalExpired(id)) if id == proposal.id));

        let row = f.store.get_proposal(proposal.id).await.unwrap();
        assert_eq!(row.status, ProposalStatus::Expired);
        // Still expired when read "before" the deadline afterwards.
        assert!(matches!(
            f.manager.get_proposal(proposal.id, created).await,
            Err(EngineError::ProposalExpired(_))
        ));
    }

    #[tokio::test]
    async fn pending_proposal_is_newest_unexpired() {
        let f = fixture().await;
        let now = Utc::now();
        let stale = propose(&f, now - Duration::hours(1)).await;
        let older = propose(&f, now - Duration::minutes(2)).await;
        let newest = propose(&f, now - Duration::minutes(1)).await;

        let pending = f.manager.get_pending_proposal(f.workflow_id, now).await.unwrap();

        assert_eq!(pending.map(|p| p.id), Some(newest.id));
        assert_ne!(older.id, newest.id);
        // The scan stopped before reaching the stale one.
        assert_eq!(
            f.store.get_proposal(stale.id).await.unwrap().status,
            ProposalStatus::Pending
        );
    }

    #[tokio::test]
    async fn pending_scan_expires_stale_proposals() {
        let f = fixture().await;
        let now = Utc::now();
        let stale = propose(&f, now - Duration::hours(1)).await;

        let pending = f.manager.get_pending_proposal(f.workflow_id, now).await.unwrap();

        assert!(pending.is_none());
        assert_eq!(
            f.store.get_proposal(stale.id).await.unwrap().status,
            ProposalStatus::Expired
        );
    }

    #[tokio::test]
    async fn rejected_proposal_cannot_be_applied() {
        let f = fixture().await;
        let now = Utc::now();
        let proposal = propose(&f, now).await;

        let rejected = f
            .manager
            .reject_proposal(f.workflow_id, proposal.id, now)
            .await
            .unwrap();
        assert_eq!(rejected.status, ProposalStatus::Rejected);

        let result = f.manager.apply_proposal(f.workflow_id, proposal.id, now).await;
        assert!(matches!(result, Err(EngineError::ProposalNotPending { .. })));
    }

    #[tokio::test]
    async fn proposal_of_another_workflow_is_not_found() {
        let f = fixture().await;
        let now = Utc::now();
        let proposal = propose(&f, now).await;

        let result = f.manager.apply_proposal(Uuid::new_v4(), proposal.id, now).await;
        assert!(matches!(result, Err(EngineError::ProposalNotFound(_))));
    }
}
