//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

use db::models::ProposalStatus;

// ---------------------------------------------------------------------------
// Structural errors
// ---------------------------------------------------------------------------

/// A DAG failed structural validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DagError {
    /// Two or more steps share the same ID.
    #[error("duplicate step ID: '{0}'")]
    DuplicateStepId(String),

    /// A `depends_on` entry names a step that doesn't exist.
    #[error("step '{step_id}' depends on unknown step '{dependency}'")]
    UnknownDependency {
        step_id: String,
        dependency: String,
    },

    /// The dependency relation is not acyclic.
    #[error("dependency cycle among steps: {}", .step_ids.join(", "))]
    CycleDetected {
        /// Steps that could not be ordered, in DAG order.
        step_ids: Vec<String>,
    },

    /// A step references a tool outside the allow-list.
    #[error("step '{step_id}' references unknown tool '{}'", tool_label(.tool_id, .version.as_deref()))]
    UnknownTool {
        step_id: String,
        tool_id: String,
        version: Option<String>,
    },
}

fn tool_label(id: &str, version: Option<&str>) -> String {
    match version {
        Some(v) => format!("{id}@{v}"),
        None => id.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Edit errors
// ---------------------------------------------------------------------------

/// An edit operation could not be applied.
#[derive(Debug, Error)]
pub enum EditError {
    /// The tool call named an operation we don't support.
    #[error("unknown edit operation '{0}'")]
    UnknownOperation(String),

    /// The operation's arguments don't match its schema.
    #[error("invalid arguments for '{operation}': {source}")]
    InvalidArguments {
        operation: String,
        #[source]
        source: serde_json::Error,
    },

    /// The operation references a step that doesn't exist.
    #[error("{operation}: step '{step_id}' does not exist")]
    StepNotFound {
        operation: &'static str,
        step_id: String,
    },

    #[error("delete_step: manual rewiring of '{step_id}' requires rewireToStepId")]
    MissingRewireTarget { step_id: String },

    #[error("add_step: position '{position}' requires anchorStepId")]
    MissingAnchor { position: &'static str },

    #[error("reorder_steps: {0}")]
    InvalidReorder(String),
}

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Errors produced by the workflow engine (validation, edits, runs, proposals).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid DAG: {0}")]
    InvalidDag(#[from] DagError),

    #[error("invalid edit: {0}")]
    InvalidEdit(#[from] EditError),

    #[error("workflow '{0}' not found")]
    WorkflowNotFound(Uuid),

    #[error("workflow '{0}' has no version")]
    NoVersion(Uuid),

    #[error("workflow version '{0}' not found")]
    VersionNotFound(Uuid),

    /// A stored DAG or proposal payload does not decode.
    #[error("stored definition is malformed: {0}")]
    InvalidDefinition(#[from] serde_json::Error),

    /// A run failed while executing.  The cause is recorded on the failed
    /// step run and in the logs, never in this error.
    #[error("workflow execution failed")]
    ExecutionFailed { run_id: Uuid },

    #[error("proposal '{0}' not found")]
    ProposalNotFound(Uuid),

    #[error("proposal '{0}' has expired")]
    ProposalExpired(Uuid),

    /// The workflow moved on since the proposal was computed.
    #[error("proposal is based on version {expected} but the latest version is {}", display_version(.actual))]
    VersionMismatch {
        expected: Uuid,
        actual: Option<Uuid>,
    },

    #[error("proposal '{id}' is already {status}")]
    ProposalNotPending { id: Uuid, status: ProposalStatus },

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),

    /// A collaborator call outside of a run failed (e.g. reading the tool catalog).
    #[error("provider error: {0}")]
    Provider(#[from] providers::ProviderError),
}

fn display_version(version: &Option<Uuid>) -> String {
    version.map_or_else(|| "<none>".to_string(), |v| v.to_string())
}

impl EngineError {
    /// Stable identifier callers can branch on.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidDag(_) => "invalid_dag",
            Self::InvalidEdit(_) => "invalid_edit",
            Self::WorkflowNotFound(_) => "workflow_not_found",
            Self::NoVersion(_) => "no_version",
            Self::VersionNotFound(_) => "version_not_found",
            Self::InvalidDefinition(_) => "invalid_definition",
            Self::ExecutionFailed { .. } => "workflow_execution_failed",
            Self::ProposalNotFound(_) => "proposal_not_found",
            Self::ProposalExpired(_) => "proposal_expired",
            Self::VersionMismatch { .. } => "version_mismatch",
            Self::ProposalNotPending { .. } => "proposal_not_pending",
            Self::Database(_) => "database",
            Self::Provider(_) => "provider",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_failure_hides_its_cause() {
        let err = EngineError::ExecutionFailed { run_id: Uuid::new_v4() };
        assert_eq!(err.to_string(), "workflow execution failed");
    }

    #[test]
    fn unknown_tool_message_includes_version() {
        let err = DagError::UnknownTool {
            step_id: "s1".into(),
            tool_id: "search".into(),
            version: Some("2".into()),
        };
        assert_eq!(err.to_string(), "step 's1' references unknown tool 'search@2'");
    }

    #[test]
    fn codes_distinguish_concurrency_and_expiry() {
        let mismatch = EngineError::VersionMismatch {
            expected: Uuid::new_v4(),
            actual: None,
        };
        let expired = EngineError::ProposalExpired(Uuid::new_v4());

        assert_eq!(mismatch.code(), "version_mismatch");
        assert_eq!(expired.code(), "proposal_expired");
    }
}
