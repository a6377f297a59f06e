//! Error types for the agent.

use thiserror::Error;

/// Errors surfaced by the watch, enrichment and routing subsystems.
///
/// Only `Config` is fatal, and only during startup. Everything else is
/// recoverable: watchers log the error and keep (or restart) their stream.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("owner lookup failed for {kind} {namespace}/{name}")]
    OwnerLookupFailed {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("owner reference graph deeper than {limit} levels starting at {name}")]
    OwnerGraphTooDeep { name: String, limit: usize },

    #[error("unexpected object shape: {0}")]
    CastFailed(String),

    #[error("failed to initialize destination client for DSN {dsn}: {reason}")]
    ClientInitFailed { dsn: String, reason: String },

    #[error("watch stream terminated: {0}")]
    WatchTerminated(String),

    #[error("unsupported object kind: {0}")]
    UnsupportedKind(String),

    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
}

/// Result type alias used throughout the agent library.
pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_lookup_error_names_the_object() {
        let err = AgentError::OwnerLookupFailed {
            kind: "ReplicaSet".to_string(),
            namespace: "default".to_string(),
            name: "worker-rs".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "owner lookup failed for ReplicaSet default/worker-rs"
        );
    }

    #[test]
    fn config_error_is_transparent() {
        let err = AgentError::Config("no namespaces specified".to_string());
        assert!(err.to_string().contains("no namespaces specified"));
    }
}
