//! `db` crate: pure persistence layer.
//!
//! Provides typed row structs, the store traits the engine persists through,
//! an in-memory implementation for tests and local runs, and a Postgres
//! implementation backed by repository functions.  No business logic lives here.

pub mod error;
pub mod memory;
pub mod models;
pub mod pool;
pub mod postgres;
pub mod repository;
pub mod store;

pub use error::DbError;
pub use memory::MemoryStore;
pub use pool::DbPool;
pub use postgres::PgStore;
pub use store::{ProposalStore, RunStore, WorkflowStore};
