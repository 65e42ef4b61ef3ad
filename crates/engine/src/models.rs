//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow DAG looks like
//! in memory.  They serialise to/from the JSONB `definition` column of the
//! `workflow_versions` table in the shape `{ "steps": [...] }`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use db::models::{ProposalRow, WorkflowVersionRow};
use providers::ToolRecord;

pub use db::models::{ProposalStatus, RunStatus, StepRunStatus};

use crate::modifier::DagToolCall;

// ---------------------------------------------------------------------------
// ToolRef
// ---------------------------------------------------------------------------

/// Reference to an externally registered tool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolRef {
    pub id: String,
    /// Unversioned references match any published version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ToolRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), version: None }
    }

    pub fn versioned(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: Some(version.into()),
        }
    }

    /// Whether this reference resolves to `record`.
    pub fn matches(&self, record: &ToolRecord) -> bool {
        self.id == record.id
            && self.version.as_deref().map_or(true, |v| v == record.version)
    }

    /// Whether this reference is covered by an allow-list entry.
    pub fn allowed_by(&self, allowed: &ToolRef) -> bool {
        self.id == allowed.id && (self.version.is_none() || self.version == allowed.version)
    }
}

impl From<&ToolRecord> for ToolRef {
    fn from(record: &ToolRecord) -> Self {
        Self::versioned(&record.id, &record.version)
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// A single unit of work in the DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Unique identifier within the DAG (referenced by `depends_on`).
    pub id: String,
    pub name: String,
    /// What the model is asked to do for this step.
    pub instruction: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub tools: Vec<ToolRef>,
}

impl Step {
    /// Convenience constructor, mostly for tests.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            instruction: instruction.into(),
            depends_on: Vec::new(),
            tools: Vec::new(),
        }
    }

    pub fn after(mut self, ids: &[&str]) -> Self {
        self.depends_on = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_tool(mut self, tool: ToolRef) -> Self {
        self.tools.push(tool);
        self
    }
}

// ---------------------------------------------------------------------------
// Dag
// ---------------------------------------------------------------------------

/// The versioned automation plan of a workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dag {
    pub steps: Vec<Step>,
}

impl Dag {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Decode a stored JSON definition.
    pub fn from_definition(definition: &Value) -> Result<Self, serde_json::Error> {
        Dag::deserialize(definition)
    }

    pub fn to_definition(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Null)
    }
}

// ---------------------------------------------------------------------------
// WorkflowVersion
// ---------------------------------------------------------------------------

/// An immutable DAG snapshot belonging to a workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowVersion {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub dag: Dag,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<WorkflowVersionRow> for WorkflowVersion {
    type Error = serde_json::Error;

    fn try_from(row: WorkflowVersionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            workflow_id: row.workflow_id,
            dag: Dag::from_definition(&row.definition)?,
            created_at: row.created_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Proposal
// ---------------------------------------------------------------------------

/// A pending, not-yet-committed edit to a workflow's DAG.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Latest version id at the time the edit was computed.
    pub base_version_id: Uuid,
    pub proposed_dag: Dag,
    pub tool_calls: Vec<DagToolCall>,
    pub user_message: String,
    pub model_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ProposalStatus,
}

impl Proposal {
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl TryFrom<ProposalRow> for Proposal {
    type Error = serde_json::Error;

    fn try_from(row: ProposalRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            workflow_id: row.workflow_id,
            base_version_id: row.base_version_id,
            proposed_dag: Dag::from_definition(&row.proposed_definition)?,
            tool_calls: Vec::<DagToolCall>::deserialize(&row.tool_calls)?,
            user_message: row.user_message,
            model_id: row.model_id,
            created_at: row.created_at,
            expires_at: row.expires_at,
            status: row.status,
        })
    }
}
