//! DAG validation and ordering: run validation before persisting or
//! executing a workflow.
//!
//! Rules enforced by [`validate_dag`], in order:
//! 1. Step IDs must be unique within the DAG.
//! 2. Every `depends_on` entry must reference an existing step.
//! 3. The dependency relation must be acyclic.
//! 4. With an allow-list, every tool reference must be on it.
//!
//! [`sort_steps`] produces the execution order.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::models::{Dag, Step, ToolRef};
use crate::DagError;

/// Check the structure of `dag`.
///
/// # Errors
/// - [`DagError::DuplicateStepId`] if two steps share an ID.
/// - [`DagError::UnknownDependency`] if a step depends on a missing step.
/// - [`DagError::CycleDetected`] if the dependency relation has a cycle.
/// - [`DagError::UnknownTool`] if `valid_tools` is given and a step
///   references a tool not on it.
pub fn validate_dag(dag: &Dag, valid_tools: Option<&[ToolRef]>) -> Result<(), DagError> {
    // -----------------------------------------------------------------------
    // 1. Ensure step IDs are unique
    // -----------------------------------------------------------------------
    let mut seen_ids: HashSet<&str> = HashSet::new();
    for step in &dag.steps {
        if !seen_ids.insert(step.id.as_str()) {
            return Err(DagError::DuplicateStepId(step.id.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // 2. Validate dependency references
    // -----------------------------------------------------------------------
    for step in &dag.steps {
        if let Some(missing) = step
            .depends_on
            .iter()
            .find(|dep| !seen_ids.contains(dep.as_str()))
        {
            return Err(DagError::UnknownDependency {
                step_id: step.id.clone(),
                dependency: missing.clone(),
            });
        }
    }

    // -----------------------------------------------------------------------
    // 3. Acyclicity: every step must drain out of Kahn's algorithm
    // -----------------------------------------------------------------------
    let (order, leftover) = kahn_order(&dag.steps);
    if !leftover.is_empty() {
        return Err(DagError::CycleDetected {
            step_ids: leftover.iter().map(|&i| dag.steps[i].id.clone()).collect(),
        });
    }
    debug_assert_eq!(order.len(), dag.steps.len());

    // -----------------------------------------------------------------------
    // 4. Tool allow-list
    // -----------------------------------------------------------------------
    if let Some(allowed) = valid_tools {
        for step in &dag.steps {
            for tool in &step.tools {
                if !allowed.iter().any(|a| tool.allowed_by(a)) {
                    return Err(DagError::UnknownTool {
                        step_id: step.id.clone(),
                        tool_id: tool.id.clone(),
                        version: tool.version.clone(),
                    });
                }
            }
        }
    }

    Ok(())
}

/// Order `steps` so every step comes after all of its dependencies.
///
/// Independent steps keep their input order.  If a cycle keeps some steps
/// from ever becoming ready, the input order is returned unchanged rather
/// than a partial ordering.
pub fn sort_steps(steps: &[Step]) -> Vec<Step> {
    let (order, leftover) = kahn_order(steps);
    if !leftover.is_empty() {
        return steps.to_vec();
    }
    order.into_iter().map(|i| steps[i].clone()).collect()
}

/// Kahn's algorithm over step indices with a FIFO ready-queue seeded in
/// input order.  Returns the ordered indices and the indices that never
/// reached zero in-degree.  Dependencies on unknown IDs are ignored.
fn kahn_order(steps: &[Step]) -> (Vec<usize>, Vec<usize>) {
    let mut index_of: HashMap<&str, usize> = HashMap::new();
    for (i, step) in steps.iter().enumerate() {
        index_of.entry(step.id.as_str()).or_insert(i);
    }

    // dependents[i] lists the steps that depend on step i.
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    let mut in_degree: Vec<usize> = vec![0; steps.len()];

    for (i, step) in steps.iter().enumerate() {
        for dep in &step.depends_on {
            if let Some(&d) = index_of.get(dep.as_str()) {
                dependents[d].push(i);
                in_degree[i] += 1;
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..steps.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order: Vec<usize> = Vec::with_capacity(steps.len());

    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &next in &dependents[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    let leftover = (0..steps.len()).filter(|&i| in_degree[i] > 0).collect();
    (order, leftover)
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, deps: &[&str]) -> Step {
        Step::new(id, id.to_uppercase(), format!("do {id}")).after(deps)
    }

    fn ids(steps: &[Step]) -> Vec<&str> {
        steps.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn valid_linear_dag_passes() {
        let dag = Dag::new(vec![step("a", &[]), step("b", &["a"]), step("c", &["b"])]);
        assert_eq!(validate_dag(&dag, None), Ok(()));
    }

    #[test]
    fn duplicate_step_id_is_rejected() {
        let dag = Dag::new(vec![step("a", &[]), step("a", &[])]);
        assert_eq!(
            validate_dag(&dag, None),
            Err(DagError::DuplicateStepId("a".into()))
        );
    }

    #[test]
    fn dependency_on_missing_step_is_rejected() {
        let dag = Dag::new(vec![step("a", &["ghost"])]);
        assert!(matches!(
            validate_dag(&dag, None),
            Err(DagError::UnknownDependency { dependency, .. }) if dependency == "ghost"
        ));
    }

    #[test]
    fn cycle_is_detected() {
        // a → b → c → a
        let dag = Dag::new(vec![step("a", &["c"]), step("b", &["a"]), step("c", &["b"])]);
        assert!(matches!(
            validate_dag(&dag, None),
            Err(DagError::CycleDetected { step_ids }) if step_ids == vec!["a", "b", "c"]
        ));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let dag = Dag::new(vec![step("a", &[]), step("b", &["b"])]);
        assert!(matches!(
            validate_dag(&dag, None),
            Err(DagError::CycleDetected { step_ids }) if step_ids == vec!["b"]
        ));
    }

    #[test]
    fn unknown_tool_is_rejected_when_allow_list_given() {
        let dag = Dag::new(vec![
            step("a", &[]).with_tool(ToolRef::versioned("search", "1")),
        ]);
        let allowed = vec![ToolRef::versioned("fetch", "1")];

        assert!(matches!(
            validate_dag(&dag, Some(allowed.as_slice())),
            Err(DagError::UnknownTool { tool_id, .. }) if tool_id == "search"
        ));
        // Without an allow-list tools are not checked.
        assert_eq!(validate_dag(&dag, None), Ok(()));
    }

    #[test]
    fn tool_version_must_match_allow_list() {
        let dag = Dag::new(vec![
            step("a", &[]).with_tool(ToolRef::versioned("search", "2")),
        ]);
        let allowed = vec![ToolRef::versioned("search", "1")];
        assert!(validate_dag(&dag, Some(allowed.as_slice())).is_err());
    }

    #[test]
    fn allow_listed_tool_passes() {
        let dag = Dag::new(vec![
            step("a", &[]).with_tool(ToolRef::versioned("search", "1")),
            step("b", &["a"]).with_tool(ToolRef::new("search")),
        ]);
        let allowed = vec![ToolRef::versioned("search", "1")];
        assert_eq!(validate_dag(&dag, Some(allowed.as_slice())), Ok(()));
    }

    #[test]
    fn sort_keeps_input_order_for_independent_steps() {
        let sorted = sort_steps(&[step("b", &[]), step("a", &[]), step("c", &["a"])]);
        assert_eq!(ids(&sorted), vec!["b", "a", "c"]);
    }

    #[test]
    fn sort_moves_dependencies_first() {
        let sorted = sort_steps(&[step("c", &["b"]), step("b", &["a"]), step("a", &[])]);
        assert_eq!(ids(&sorted), vec!["a", "b", "c"]);
    }

    #[test]
    fn sort_diamond() {
        //   a
        //  / \
        // b   c
        //  \ /
        //   d
        let sorted = sort_steps(&[
            step("d", &["b", "c"]),
            step("c", &["a"]),
            step("b", &["a"]),
            step("a", &[]),
        ]);
        assert_eq!(ids(&sorted), vec!["a", "c", "b", "d"]);
    }

    #[test]
    fn sort_returns_input_order_on_cycle() {
        let input = [step("1", &["2"]), step("2", &["1"])];
        assert_eq!(ids(&sort_steps(&input)), vec!["1", "2"]);
    }

    #[test]
    fn sort_discards_partial_progress_on_cycle() {
        // "z" is orderable but the cycle between x and y is not.
        let input = [step("x", &["y"]), step("y", &["x"]), step("z", &[])];
        assert_eq!(ids(&sort_steps(&input)), vec!["x", "y", "z"]);
    }

    #[test]
    fn every_step_follows_its_dependencies() {
        let input = [
            step("e", &["c", "d"]),
            step("d", &["a"]),
            step("c", &["b"]),
            step("b", &["a"]),
            step("a", &[]),
            step("f", &[]),
        ];
        let sorted = sort_steps(&input);
        let position: HashMap<&str, usize> =
            sorted.iter().enumerate().map(|(i, s)| (s.id.as_str(), i)).collect();

        assert_eq!(sorted.len(), input.len());
        for s in &sorted {
            for dep in &s.depends_on {
                assert!(position[dep.as_str()] < position[s.id.as_str()]);
            }
        }
    }

    #[test]
    fn empty_dag_is_valid_and_sorts_to_nothing() {
        assert_eq!(validate_dag(&Dag::default(), None), Ok(()));
        assert!(sort_steps(&[]).is_empty());
    }
}
