//! `engine` crate: workflow DAG model, validation, editing, execution and
//! the proposal lifecycle.
//!
//! Callers use:
//! - [`validate_dag`] / [`sort_steps`] to check and order a DAG,
//! - [`apply_tool_calls_to_dag`] to apply LLM-emitted edits,
//! - [`WorkflowRunner::run`] to execute a workflow version,
//! - [`ProposalManager`] to create, read, apply and reject proposals.

pub mod config;
pub mod dag;
pub mod error;
pub mod models;
pub mod modifier;
pub mod proposal;
pub mod runner;
mod versions;

pub use config::EngineConfig;
pub use dag::{sort_steps, validate_dag};
pub use error::{DagError, EditError, EngineError};
pub use models::{Dag, Proposal, Step, ToolRef, WorkflowVersion};
pub use modifier::{apply_tool_calls_to_dag, DagOperation, DagToolCall, ModifyRequest};
pub use proposal::{ProposalDraft, ProposalManager};
pub use runner::{RunOutcome, RunRequest, WorkflowRunner};
