//! `api` crate: HTTP REST API around the workflow engine.
//!
//! Exposes:
//!   POST   /api/v1/workflows/{id}/runs
//!   GET    /api/v1/runs/{run_id}
//!   GET    /api/v1/workflows/{id}/proposal
//!   POST   /api/v1/workflows/{id}/proposals
//!   GET    /api/v1/workflows/{id}/proposals/{proposal_id}
//!   POST   /api/v1/workflows/{id}/proposals/{proposal_id}/apply
//!   POST   /api/v1/workflows/{id}/proposals/{proposal_id}/reject
//!   POST   /api/v1/dags/validate
//!   GET    /api/v1/dag-operations

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use db::{ProposalStore, RunStore, WorkflowStore};
use engine::{EngineConfig, ProposalManager, WorkflowRunner};
use providers::{TextGenerator, ToolCatalog, ToolExecutor};

pub use error::ApiError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<WorkflowRunner>,
    pub proposals: Arc<ProposalManager>,
    pub runs: Arc<dyn RunStore>,
    pub catalog: Arc<dyn ToolCatalog>,
}

impl AppState {
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        runs: Arc<dyn RunStore>,
        proposals: Arc<dyn ProposalStore>,
        catalog: Arc<dyn ToolCatalog>,
        tools: Arc<dyn ToolExecutor>,
        generator: Arc<dyn TextGenerator>,
        config: EngineConfig,
    ) -> Self {
        let runner = WorkflowRunner::new(
            workflows.clone(),
            runs.clone(),
            catalog.clone(),
            tools,
            generator,
        );
        let proposals = ProposalManager::new(workflows, proposals, config);
        Self {
            runner: Arc::new(runner),
            proposals: Arc::new(proposals),
            runs,
            catalog,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/workflows/:id/runs", post(handlers::runs::trigger))
        .route("/api/v1/runs/:run_id", get(handlers::runs::get))
        .route("/api/v1/workflows/:id/proposal", get(handlers::proposals::pending))
        .route("/api/v1/workflows/:id/proposals", post(handlers::proposals::create))
        .route(
            "/api/v1/workflows/:id/proposals/:proposal_id",
            get(handlers::proposals::get),
        )
        .route(
            "/api/v1/workflows/:id/proposals/:proposal_id/apply",
            post(handlers::proposals::apply),
        )
        .route(
            "/api/v1/workflows/:id/proposals/:proposal_id/reject",
            post(handlers::proposals::reject),
        )
        .route("/api/v1/dags/validate", post(handlers::dags::validate))
        .route("/api/v1/dag-operations", get(handlers::dags::operations))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `addr` and serve the API until the process stops.
pub async fn serve(addr: &str, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await
}
