//! Provider-level error type.

use thiserror::Error;

/// Errors returned by generation and tool-service collaborators.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The generation call itself failed.
    #[error("generation failed: {0}")]
    Generation(String),

    /// The tool service rejected or failed a tool invocation.
    #[error("tool '{tool_id}' failed: {message}")]
    ToolExecution {
        tool_id: String,
        message: String,
    },

    /// The model asked for a tool that was not bound to the request.
    #[error("tool '{0}' is not bound to this request")]
    ToolNotFound(String),

    /// Transport failure talking to a remote service.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A remote service answered with something we could not interpret.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}
