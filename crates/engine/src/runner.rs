//! Workflow runner.
//!
//! `WorkflowRunner` executes one run of a workflow version end-to-end:
//! 1. Loads the latest (or a requested) version and validates its DAG.
//! 2. Sorts the steps and records a `RUNNING` workflow run.
//! 3. Resolves every declared tool against the catalog, refreshing it once
//!    on a miss.
//! 4. Runs the steps strictly one after another, one generation call each,
//!    feeding dependency outputs into the prompt.
//! 5. Marks the run `PASSED` and returns the last step's output, or marks
//!    the active step and the run `FAILED` and returns
//!    [`EngineError::ExecutionFailed`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use db::models::{NewWorkflowRun, StepRunUpdate};
use db::{DbError, RunStore, WorkflowStore};
use providers::{
    BoundTool, GenerateRequest, ProviderError, TextGenerator, ToolCatalog, ToolExecutor,
    ToolRecord,
};

use crate::dag::{sort_steps, validate_dag};
use crate::models::{RunStatus, Step, StepRunStatus, ToolRef};
use crate::versions::load_version;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

/// A trigger for one workflow run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub workflow_id: Uuid,
    pub chat_id: Uuid,
    pub trigger_message_id: Uuid,
    pub user_message: String,
    pub model_id: String,
    /// Run this version instead of the workflow's latest.
    pub version_id: Option<Uuid>,
}

/// The result of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub workflow_run_id: Uuid,
    /// Output of the last step in execution order.
    pub content: String,
}

// ---------------------------------------------------------------------------
// Internal failure bookkeeping
// ---------------------------------------------------------------------------

/// Why a run stopped.  Recorded on the failed step run, never returned.
#[derive(Debug, Error)]
enum StepFailure {
    #[error("tool '{}' is not registered, even after refreshing the catalog", label(.0))]
    UnresolvedTool(ToolRef),

    #[error("step '{step_id}' declares {declared} tools but {bound} were bound")]
    UnboundTool {
        step_id: String,
        declared: usize,
        bound: usize,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("persisting run progress failed: {0}")]
    Persistence(#[from] DbError),
}

fn label(tool: &ToolRef) -> String {
    match &tool.version {
        Some(v) => format!("{}@{v}", tool.id),
        None => tool.id.clone(),
    }
}

/// The step run currently in flight, used to attribute a failure.
#[derive(Debug, Clone)]
struct ActiveStep {
    step_id: String,
    step_run_id: Uuid,
}

// ---------------------------------------------------------------------------
// WorkflowRunner
// ---------------------------------------------------------------------------

pub struct WorkflowRunner {
    workflows: Arc<dyn WorkflowStore>,
    runs: Arc<dyn RunStore>,
    catalog: Arc<dyn ToolCatalog>,
    tools: Arc<dyn ToolExecutor>,
    generator: Arc<dyn TextGenerator>,
}

impl WorkflowRunner {
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        runs: Arc<dyn RunStore>,
        catalog: Arc<dyn ToolCatalog>,
        tools: Arc<dyn ToolExecutor>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        Self {
            workflows,
            runs,
            catalog,
            tools,
            generator,
        }
    }

    /// Run the workflow and return the final step's output.
    ///
    /// The runner assumes it is the only execution for the run it creates;
    /// admission control across runs belongs to the caller.
    ///
    /// # Errors
    /// Loading and validation problems are returned as-is, before any run
    /// is recorded.  Everything that goes wrong once the run exists is
    /// reported as [`EngineError::ExecutionFailed`].
    #[instrument(skip(self, request), fields(workflow_id = %request.workflow_id, chat_id = %request.chat_id))]
    pub async fn run(&self, request: RunRequest) -> Result<RunOutcome, EngineError> {
        let version = load_version(
            self.workflows.as_ref(),
            request.workflow_id,
            request.version_id,
        )
        .await?;

        validate_dag(&version.dag, None)?;
        let steps = sort_steps(&version.dag.steps);
        info!(
            version_id = %version.id,
            "DAG validated, executing {} steps in order: {:?}",
            steps.len(),
            steps.iter().map(|s| s.id.as_str()).collect::<Vec<_>>()
        );

        let run = self
            .runs
            .create_run(NewWorkflowRun {
                id: Uuid::new_v4(),
                workflow_id: version.workflow_id,
                version_id: version.id,
                chat_id: request.chat_id,
                trigger_message_id: request.trigger_message_id,
            })
            .await?;

        let mut active: Option<ActiveStep> = None;
        let result = match self.execute(run.id, &request, &steps, &mut active).await {
            Ok(content) => self
                .runs
                .update_run_status(run.id, RunStatus::Passed)
                .await
                .map(|()| content)
                .map_err(StepFailure::from),
            Err(failure) => Err(failure),
        };

        match result {
            Ok(content) => {
                info!(run_id = %run.id, "workflow run passed");
                Ok(RunOutcome {
                    workflow_run_id: run.id,
                    content,
                })
            }
            Err(failure) => {
                error!(run_id = %run.id, "workflow run failed: {failure}");
                self.record_failure(run.id, active, &failure).await;
                Err(EngineError::ExecutionFailed { run_id: run.id })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internal: the step loop.
    // -----------------------------------------------------------------------

    async fn execute(
        &self,
        run_id: Uuid,
        request: &RunRequest,
        steps: &[Step],
        active: &mut Option<ActiveStep>,
    ) -> Result<String, StepFailure> {
        let catalog = self.resolve_tools(steps).await?;

        let mut outputs: HashMap<&str, String> = HashMap::new();
        let mut content = String::new();

        for step in steps {
            let step_run = self
                .runs
                .create_step_run(Uuid::new_v4(), run_id, &step.id)
                .await?;
            *active = Some(ActiveStep {
                step_id: step.id.clone(),
                step_run_id: step_run.id,
            });

            let bound = bind_tools(step, &catalog, &self.tools)?;

            let prompt = build_prompt(&request.user_message, step, &outputs, &bound);
            let generation = self
                .generator
                .generate(GenerateRequest::new(&request.model_id, prompt).with_tools(bound))
                .await?;

            let tool_calls = json!(generation.tool_calls);
            self.runs
                .update_step_run(
                    step_run.id,
                    StepRunUpdate {
                        status: StepRunStatus::Passed,
                        output: Some(generation.text.clone()),
                        error: None,
                        logs: Some(json!({
                            "toolCalls": tool_calls,
                            "toolResults": generation.tool_results,
                        })),
                        tool_calls: Some(tool_calls),
                    },
                )
                .await?;
            *active = None;

            info!(step_id = %step.id, "step passed");
            content.clone_from(&generation.text);
            outputs.insert(step.id.as_str(), generation.text);
        }

        Ok(content)
    }

    /// Look up every declared tool; one forced refresh is allowed on a miss.
    async fn resolve_tools(&self, steps: &[Step]) -> Result<Vec<ToolRecord>, StepFailure> {
        let refs: Vec<&ToolRef> = steps.iter().flat_map(|s| s.tools.iter()).collect();
        if refs.is_empty() {
            return Ok(Vec::new());
        }

        let cached = self.catalog.cached_tools(false).await?;
        let Some(missing) = first_unresolved(&refs, &cached) else {
            return Ok(cached);
        };

        warn!(tool = %label(missing), "tool not in cache, refreshing catalog");
        let refreshed = self.catalog.cached_tools(true).await?;
        match first_unresolved(&refs, &refreshed) {
            Some(missing) => Err(StepFailure::UnresolvedTool(missing.clone())),
            None => Ok(refreshed),
        }
    }

    /// Best effort: the run already failed, so persistence errors here are
    /// only logged.
    async fn record_failure(&self, run_id: Uuid, active: Option<ActiveStep>, failure: &StepFailure) {
        if let Some(step) = active {
            warn!(step_id = %step.step_id, "marking step run failed");
            let update = StepRunUpdate {
                status: StepRunStatus::Failed,
                output: None,
                error: Some(failure.to_string()),
                logs: None,
                tool_calls: None,
            };
            if let Err(e) = self.runs.update_step_run(step.step_run_id, update).await {
                error!(step_run_id = %step.step_run_id, "could not mark step run failed: {e}");
            }
        }

        if let Err(e) = self.runs.update_run_status(run_id, RunStatus::Failed).await {
            error!(run_id = %run_id, "could not mark run failed: {e}");
        }
    }
}

/// Bind each tool the step declares to its catalog record.
fn bind_tools(
    step: &Step,
    catalog: &[ToolRecord],
    executor: &Arc<dyn ToolExecutor>,
) -> Result<Vec<BoundTool>, StepFailure> {
    let bound: Vec<BoundTool> = step
        .tools
        .iter()
        .filter_map(|r| catalog.iter().find(|t| r.matches(t)))
        .map(|record| BoundTool::new(record.clone(), executor.clone()))
        .collect();
    if bound.len() != step.tools.len() {
        return Err(StepFailure::UnboundTool {
            step_id: step.id.clone(),
            declared: step.tools.len(),
            bound: bound.len(),
        });
    }
    Ok(bound)
}

fn first_unresolved<'a>(refs: &[&'a ToolRef], catalog: &[ToolRecord]) -> Option<&'a ToolRef> {
    refs.iter()
        .copied()
        .find(|r| !catalog.iter().any(|t| r.matches(t)))
}

/// Prompt for one step: the user's request, the step itself, the outputs
/// of its dependencies and the names of the tools it may call.
pub fn build_prompt(
    user_message: &str,
    step: &Step,
    outputs: &HashMap<&str, String>,
    tools: &[BoundTool],
) -> String {
    let mut prompt = format!(
        "User request:\n{user_message}\n\nStep: {}\n{}",
        step.name, step.instruction
    );

    for dep in &step.depends_on {
        if let Some(output) = outputs.get(dep.as_str()) {
            prompt.push_str(&format!("\n\nOutput from `{dep}`:\n{output}"));
        }
    }

    if !tools.is_empty() {
        let names: Vec<&str> = tools.iter().map(BoundTool::display_name).collect();
        prompt.push_str(&format!("\n\nAvailable tools: {}", names.join(", ")));
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use providers::mock::{tool_record, MockToolService};

    #[test]
    fn prompt_labels_dependency_outputs_and_lists_tools() {
        let step = Step::new("s2", "Write", "write it up").after(&["s1"]);
        let outputs = HashMap::from([("s1", "facts".to_string())]);
        let mut record = tool_record("search", "1");
        record.name = "Web search".to_string();
        let tools = vec![BoundTool::new(record, Arc::new(MockToolService::new()))];

        let prompt = build_prompt("tell me", &step, &outputs, &tools);

        assert!(prompt.contains("tell me"));
        assert!(prompt.contains("write it up"));
        assert!(prompt.contains("Output from `s1`:\nfacts"));
        assert!(prompt.ends_with("Available tools: Web search"));
    }

    #[test]
    fn binding_fails_when_a_declared_tool_has_no_record() {
        let mut step = Step::new("s1", "Research", "find facts");
        step.tools = vec![ToolRef::new("search"), ToolRef::versioned("fetch", "2")];
        let executor: Arc<dyn ToolExecutor> = Arc::new(MockToolService::new());
        let catalog = vec![tool_record("search", "1"), tool_record("fetch", "1")];

        let err = bind_tools(&step, &catalog, &executor).unwrap_err();
        assert!(matches!(
            err,
            StepFailure::UnboundTool { ref step_id, declared: 2, bound: 1 } if step_id == "s1"
        ));
        assert_eq!(err.to_string(), "step 's1' declares 2 tools but 1 were bound");

        let catalog = vec![tool_record("search", "1"), tool_record("fetch", "2")];
        let bound = bind_tools(&step, &catalog, &executor).unwrap();
        let names: Vec<&str> = bound.iter().map(BoundTool::name).collect();
        assert_eq!(names, vec!["search", "fetch"]);
    }

    #[test]
    fn prompt_omits_empty_sections() {
        let step = Step::new("s1", "Research", "find facts");
        let prompt = build_prompt("tell me", &step, &HashMap::new(), &[]);

        assert!(!prompt.contains("Output from"));
        assert!(!prompt.contains("Available tools"));
    }
}
