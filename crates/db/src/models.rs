//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models: they carry no domain behaviour.
//! Domain types live in the `engine` crate; DAGs are stored as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// workflows / workflow_versions
// ---------------------------------------------------------------------------

/// A persisted workflow row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub name: String,
    /// The most recently created version, if any.
    pub latest_version_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// An immutable DAG definition belonging to a workflow.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowVersionRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Full JSON DAG definition (`{ "steps": [...] }`).
    pub definition: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// workflow_runs
// ---------------------------------------------------------------------------

/// Possible statuses for a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Passed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running   => write!(f, "RUNNING"),
            Self::Passed    => write!(f, "PASSED"),
            Self::Failed    => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// A persisted workflow run row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRunRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub version_id: Uuid,
    pub chat_id: Uuid,
    pub trigger_message_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Insert payload for a workflow run.  The id is chosen by the caller so
/// retried inserts are idempotent.
#[derive(Debug, Clone)]
pub struct NewWorkflowRun {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub version_id: Uuid,
    pub chat_id: Uuid,
    pub trigger_message_id: Uuid,
}

// ---------------------------------------------------------------------------
// step_runs
// ---------------------------------------------------------------------------

/// Possible statuses for a single step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepRunStatus {
    Queued,
    Running,
    Passed,
    Failed,
    Cancelled,
}

impl StepRunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Passed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for StepRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued    => write!(f, "QUEUED"),
            Self::Running   => write!(f, "RUNNING"),
            Self::Passed    => write!(f, "PASSED"),
            Self::Failed    => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// A persisted step run row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StepRunRow {
    pub id: Uuid,
    pub run_id: Uuid,
    pub step_id: String,
    pub status: StepRunStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    /// Tool call / tool result trace captured during generation.
    pub logs: Option<serde_json::Value>,
    pub tool_calls: Option<serde_json::Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The single mutation applied to a step run when it finishes.
#[derive(Debug, Clone)]
pub struct StepRunUpdate {
    pub status: StepRunStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub logs: Option<serde_json::Value>,
    pub tool_calls: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// workflow_proposals
// ---------------------------------------------------------------------------

/// Lifecycle of a proposed DAG edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Applied,
    Rejected,
    Expired,
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending  => write!(f, "pending"),
            Self::Applied  => write!(f, "applied"),
            Self::Rejected => write!(f, "rejected"),
            Self::Expired  => write!(f, "expired"),
        }
    }
}

/// A persisted proposal row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProposalRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Version the edit was computed against.
    pub base_version_id: Uuid,
    pub proposed_definition: serde_json::Value,
    /// The raw edit operations that produced `proposed_definition`.
    pub tool_calls: serde_json::Value,
    pub user_message: String,
    pub model_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ProposalStatus,
}

/// Insert payload for a proposal.
#[derive(Debug, Clone)]
pub struct NewProposal {
    pub workflow_id: Uuid,
    pub base_version_id: Uuid,
    pub proposed_definition: serde_json::Value,
    pub tool_calls: serde_json::Value,
    pub user_message: String,
    pub model_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
