use std::sync::Arc;

use db::{MemoryStore, WorkflowStore};
use engine::{Dag, EngineConfig, Step};
use providers::mock::{MockGenerator, MockToolService};
use uuid::Uuid;

use super::AppState;

pub(crate) struct Fixture {
    pub store: Arc<MemoryStore>,
    pub state: AppState,
}

impl Fixture {
    pub async fn workflow(&self, dag: &Dag) -> Uuid {
        let workflow = self.store.create_workflow("test").await.unwrap();
        self.store
            .create_version(workflow.id, dag.to_definition())
            .await
            .unwrap();
        workflow.id
    }
}

pub(crate) async fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let tools = Arc::new(MockToolService::new());
    let state = AppState::new(
        store.clone(),
        store.clone(),
        store.clone(),
        tools.clone(),
        tools,
        Arc::new(MockGenerator::new()),
        EngineConfig::default(),
    );
    Fixture { store, state }
}

/// step_1 → step_2 → … → step_n
pub(crate) fn chain(n: usize) -> Dag {
    let mut steps: Vec<Step> = Vec::new();
    for i in 1..=n {
        let step = Step::new(format!("step_{i}"), format!("Step {i}"), format!("do {i}"));
        let step = match steps.last() {
            Some(prev) => step.after(&[prev.id.as_str()]),
            None => step,
        };
        steps.push(step);
    }
    Dag::new(steps)
}
