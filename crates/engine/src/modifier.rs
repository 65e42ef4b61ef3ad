//! DAG modifier: applies a batch of LLM-emitted edit operations to a DAG.
//!
//! Each tool call is decoded into a [`DagOperation`] and applied in order
//! against the evolving copy of the DAG.  The first failing operation aborts
//! the whole batch; the input DAG is never touched.
//!
//! The result is *not* validated here: callers run [`crate::validate_dag`]
//! on it before storing or executing anything.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use providers::ToolRecord;

use crate::models::{Dag, Step, ToolRef};
use crate::EditError;

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// A structured edit as produced by the model: operation name + JSON arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl DagToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// Where `add_step` places the new step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPosition {
    /// Depend on the DAG's current tail.
    #[default]
    End,
    /// Become a new root that the previous roots depend on.
    Start,
    /// Sit between the anchor and the anchor's dependents.
    After,
    /// Take over the anchor's dependencies; the anchor then depends on it.
    Before,
}

impl StepPosition {
    fn as_str(self) -> &'static str {
        match self {
            Self::End => "end",
            Self::Start => "start",
            Self::After => "after",
            Self::Before => "before",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddStep {
    pub name: String,
    pub instruction: String,
    #[serde(default)]
    pub position: StepPosition,
    #[serde(default)]
    pub anchor_step_id: Option<String>,
    /// Overrides the dependencies the position would assign.
    #[serde(default)]
    pub depends_on: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStep {
    pub step_id: String,
    #[serde(default)]
    pub instruction: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Tool ids to attach; ids unknown to the catalog are dropped.
    #[serde(default)]
    pub add_tools: Vec<String>,
    #[serde(default)]
    pub remove_tools: Vec<String>,
}

/// How dependents of a deleted step are reattached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewireStrategy {
    /// Dependents inherit the deleted step's own dependencies.
    #[default]
    Automatic,
    /// Dependents are pointed at `rewire_to_step_id`.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteStep {
    pub step_id: String,
    #[serde(default)]
    pub rewire_strategy: RewireStrategy,
    #[serde(default)]
    pub rewire_to_step_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderSteps {
    /// Listed steps move to the front in this order; the rest keep theirs.
    pub step_ids: Vec<String>,
}

/// The closed set of edit operations.
#[derive(Debug, Clone, PartialEq)]
pub enum DagOperation {
    AddStep(AddStep),
    UpdateStep(UpdateStep),
    DeleteStep(DeleteStep),
    ReorderSteps(ReorderSteps),
}

impl DagOperation {
    pub const ADD_STEP: &'static str = "add_step";
    pub const UPDATE_STEP: &'static str = "update_step";
    pub const DELETE_STEP: &'static str = "delete_step";
    pub const REORDER_STEPS: &'static str = "reorder_steps";

    pub fn name(&self) -> &'static str {
        match self {
            Self::AddStep(_) => Self::ADD_STEP,
            Self::UpdateStep(_) => Self::UPDATE_STEP,
            Self::DeleteStep(_) => Self::DELETE_STEP,
            Self::ReorderSteps(_) => Self::REORDER_STEPS,
        }
    }
}

impl TryFrom<&DagToolCall> for DagOperation {
    type Error = EditError;

    fn try_from(call: &DagToolCall) -> Result<Self, Self::Error> {
        fn args<T: for<'de> Deserialize<'de>>(call: &DagToolCall) -> Result<T, EditError> {
            T::deserialize(&call.arguments).map_err(|source| EditError::InvalidArguments {
                operation: call.name.clone(),
                source,
            })
        }

        match call.name.as_str() {
            Self::ADD_STEP => args(call).map(Self::AddStep),
            Self::UPDATE_STEP => args(call).map(Self::UpdateStep),
            Self::DELETE_STEP => args(call).map(Self::DeleteStep),
            Self::REORDER_STEPS => args(call).map(Self::ReorderSteps),
            other => Err(EditError::UnknownOperation(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Applying a batch
// ---------------------------------------------------------------------------

/// Input of [`apply_tool_calls_to_dag`].
pub struct ModifyRequest<'a> {
    pub dag: &'a Dag,
    pub tool_calls: &'a [DagToolCall],
    /// Catalog used to resolve `update_step.addTools`; `update_step` also
    /// drops existing tools of the edited step that it no longer lists.
    pub available_tools: &'a [ToolRecord],
    /// Produces ids for steps created by `add_step`.
    pub id_generator: &'a mut dyn FnMut() -> String,
}

/// Default step id generator.
pub fn generate_step_id() -> String {
    format!("step_{}", Uuid::new_v4().simple())
}

/// Apply every tool call in order and return the edited DAG.
///
/// # Errors
/// The first [`EditError`] encountered; nothing is applied in that case.
pub fn apply_tool_calls_to_dag(request: ModifyRequest<'_>) -> Result<Dag, EditError> {
    let ModifyRequest {
        dag,
        tool_calls,
        available_tools,
        id_generator,
    } = request;

    let mut steps = dag.steps.clone();
    for call in tool_calls {
        let operation = DagOperation::try_from(call)?;
        debug!(operation = operation.name(), "applying DAG edit");

        match operation {
            DagOperation::AddStep(op) => add_step(&mut steps, op, id_generator)?,
            DagOperation::UpdateStep(op) => update_step(&mut steps, op, available_tools)?,
            DagOperation::DeleteStep(op) => delete_step(&mut steps, op)?,
            DagOperation::ReorderSteps(op) => reorder_steps(&mut steps, op)?,
        }
    }

    Ok(Dag::new(steps))
}

fn position_of(steps: &[Step], id: &str) -> Option<usize> {
    steps.iter().position(|s| s.id == id)
}

/// The terminal step: the last one (in DAG order) nothing depends on.
fn tail_step_id(steps: &[Step]) -> Option<String> {
    steps
        .iter()
        .rev()
        .find(|candidate| {
            !steps
                .iter()
                .any(|s| s.depends_on.iter().any(|d| *d == candidate.id))
        })
        .map(|s| s.id.clone())
}

fn add_step(
    steps: &mut Vec<Step>,
    op: AddStep,
    id_generator: &mut dyn FnMut() -> String,
) -> Result<(), EditError> {
    let anchor = match op.position {
        StepPosition::After | StepPosition::Before => {
            let anchor_id = op.anchor_step_id.as_deref().ok_or(EditError::MissingAnchor {
                position: op.position.as_str(),
            })?;
            let index = position_of(steps, anchor_id).ok_or_else(|| EditError::StepNotFound {
                operation: DagOperation::ADD_STEP,
                step_id: anchor_id.to_string(),
            })?;
            Some(index)
        }
        StepPosition::End | StepPosition::Start => None,
    };

    let id = id_generator();
    let mut step = Step::new(id.clone(), op.name, op.instruction);

    let insert_at = match (op.position, anchor) {
        (StepPosition::After, Some(a)) => {
            step.depends_on = vec![steps[a].id.clone()];
            let anchor_id = steps[a].id.clone();
            for other in steps.iter_mut() {
                for dep in other.depends_on.iter_mut() {
                    if *dep == anchor_id {
                        *dep = id.clone();
                    }
                }
            }
            a + 1
        }
        (StepPosition::Before, Some(a)) => {
            step.depends_on = std::mem::replace(&mut steps[a].depends_on, vec![id.clone()]);
            a
        }
        (StepPosition::Start, _) => {
            for root in steps.iter_mut().filter(|s| s.depends_on.is_empty()) {
                root.depends_on.push(id.clone());
            }
            0
        }
        _ => {
            step.depends_on = tail_step_id(steps).into_iter().collect();
            steps.len()
        }
    };

    if let Some(explicit) = op.depends_on {
        step.depends_on = explicit;
    }

    steps.insert(insert_at, step);
    Ok(())
}

fn update_step(
    steps: &mut [Step],
    op: UpdateStep,
    available_tools: &[ToolRecord],
) -> Result<(), EditError> {
    let step = steps
        .iter_mut()
        .find(|s| s.id == op.step_id)
        .ok_or_else(|| EditError::StepNotFound {
            operation: DagOperation::UPDATE_STEP,
            step_id: op.step_id.clone(),
        })?;

    if let Some(name) = op.name {
        step.name = name;
    }
    if let Some(instruction) = op.instruction {
        step.instruction = instruction;
    }

    step.tools.retain(|t| {
        let known = available_tools.iter().any(|record| t.matches(record));
        if !known {
            debug!(tool_id = %t.id, "dropping tool missing from the catalog");
        }
        known
    });
    for tool_id in &op.add_tools {
        match available_tools.iter().find(|t| t.id == *tool_id) {
            Some(record) if !step.tools.iter().any(|t| t.id == record.id) => {
                step.tools.push(ToolRef::from(record));
            }
            Some(_) => {}
            None => debug!(tool_id = %tool_id, "dropping unknown tool from update_step"),
        }
    }
    step.tools.retain(|t| !op.remove_tools.contains(&t.id));

    Ok(())
}

fn delete_step(steps: &mut Vec<Step>, op: DeleteStep) -> Result<(), EditError> {
    let index = position_of(steps, &op.step_id).ok_or_else(|| EditError::StepNotFound {
        operation: DagOperation::DELETE_STEP,
        step_id: op.step_id.clone(),
    })?;

    let replacement = match op.rewire_strategy {
        RewireStrategy::Automatic => steps[index].depends_on.clone(),
        RewireStrategy::Manual => {
            let target = op.rewire_to_step_id.ok_or_else(|| EditError::MissingRewireTarget {
                step_id: op.step_id.clone(),
            })?;
            if target == op.step_id || position_of(steps, &target).is_none() {
                return Err(EditError::StepNotFound {
                    operation: DagOperation::DELETE_STEP,
                    step_id: target,
                });
            }
            vec![target]
        }
    };

    steps.remove(index);

    for step in steps.iter_mut() {
        if !step.depends_on.contains(&op.step_id) {
            continue;
        }
        let mut rewired: Vec<String> = Vec::with_capacity(step.depends_on.len());
        for dep in step.depends_on.drain(..) {
            let expanded = if dep == op.step_id {
                replacement.clone()
            } else {
                vec![dep]
            };
            for id in expanded {
                if id != step.id && !rewired.contains(&id) {
                    rewired.push(id);
                }
            }
        }
        step.depends_on = rewired;
    }

    Ok(())
}

fn reorder_steps(steps: &mut Vec<Step>, op: ReorderSteps) -> Result<(), EditError> {
    let mut front: Vec<Step> = Vec::with_capacity(op.step_ids.len());
    for id in &op.step_ids {
        if front.iter().any(|s| s.id == *id) {
            return Err(EditError::InvalidReorder(format!("step '{id}' listed twice")));
        }
        let index = position_of(steps, id).ok_or_else(|| EditError::StepNotFound {
            operation: DagOperation::REORDER_STEPS,
            step_id: id.clone(),
        })?;
        front.push(steps.remove(index));
    }

    front.append(steps);
    *steps = front;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tool schemas offered to the model
// ---------------------------------------------------------------------------

/// Function definitions describing the edit operations, in the shape
/// chat-completions APIs expect for `tools`.
pub fn operation_tool_definitions() -> Vec<Value> {
    let string_list = json!({ "type": "array", "items": { "type": "string" } });
    vec![
        json!({
            "name": DagOperation::ADD_STEP,
            "description": "Add a new step to the workflow.",
            "parameters": {
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "instruction": { "type": "string" },
                    "position": { "type": "string", "enum": ["end", "start", "after", "before"] },
                    "anchorStepId": { "type": "string", "description": "Required for after/before." },
                    "dependsOn": string_list,
                },
                "required": ["name", "instruction", "position"],
            },
        }),
        json!({
            "name": DagOperation::UPDATE_STEP,
            "description": "Change a step's name, instruction or tools.",
            "parameters": {
                "type": "object",
                "properties": {
                    "stepId": { "type": "string" },
                    "name": { "type": "string" },
                    "instruction": { "type": "string" },
                    "addTools": string_list,
                    "removeTools": string_list,
                },
                "required": ["stepId"],
            },
        }),
        json!({
            "name": DagOperation::DELETE_STEP,
            "description": "Remove a step and reattach the steps that depended on it.",
            "parameters": {
                "type": "object",
                "properties": {
                    "stepId": { "type": "string" },
                    "rewireStrategy": { "type": "string", "enum": ["automatic", "manual"] },
                    "rewireToStepId": { "type": "string" },
                },
                "required": ["stepId"],
            },
        }),
        json!({
            "name": DagOperation::REORDER_STEPS,
            "description": "Move the listed steps to the front, in order. Dependencies are unchanged.",
            "parameters": {
                "type": "object",
                "properties": { "stepIds": string_list },
                "required": ["stepIds"],
            },
        }),
    ]
}
