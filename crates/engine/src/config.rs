//! Engine tuning knobs.

use chrono::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a proposal stays applicable after it is created.
    pub proposal_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            proposal_ttl: Duration::minutes(15),
        }
    }
}

impl EngineConfig {
    pub fn with_proposal_ttl_secs(secs: i64) -> Self {
        Self {
            proposal_ttl: Duration::seconds(secs),
        }
    }
}
