//! `providers` crate: the collaborators the workflow engine calls out to.
//!
//! The engine never talks to an LLM or a tool service directly.  It goes
//! through the traits defined here:
//!
//! - [`TextGenerator`]: one text-generation call, optionally with callable tools.
//! - [`ToolCatalog`]: the cached list of externally registered tools.
//! - [`ToolExecutor`]: runs one tool invocation on the tool service.
//!
//! `mock` holds scripted doubles for tests, `http` the real clients.

pub mod error;
pub mod traits;
pub mod mock;
pub mod http;

pub use error::ProviderError;
pub use traits::{
    BoundTool, GenerateRequest, Generation, TextGenerator, ToolCallRecord, ToolCatalog,
    ToolChoice, ToolExecutor, ToolInvocation, ToolRecord, ToolResultRecord,
};
