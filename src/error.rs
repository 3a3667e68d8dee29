//! Error handling for the execution engine
//!
//! Every public operation returns [`Result`]. Failures raised by
//! collaborators (expression evaluation, service handlers, decisions) pass
//! through unchanged as [`EngineError::Collaborator`].

use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// The targeted execution cannot accept the requested transition,
    /// e.g. signaling an execution that already ended.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The graph cannot be executed as defined, e.g. an exclusive gateway
    /// with no satisfied condition and no default flow.
    #[error("Graph definition error: {0}")]
    GraphDefinition(String),

    /// An id has no counterpart in the live definitions.
    #[error("Lookup error: {0}")]
    Lookup(String),

    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Definition document error: {0}")]
    Document(#[from] serde_yaml::Error),
}

impl EngineError {
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn graph(message: impl Into<String>) -> Self {
        Self::GraphDefinition(message.into())
    }

    pub fn lookup(message: impl Into<String>) -> Self {
        Self::Lookup(message.into())
    }
}

/// Result alias used across the crate
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collaborator_errors_keep_their_message() {
        let err: EngineError = anyhow::anyhow!("decision table Dish not deployed").into();
        assert_eq!(err.to_string(), "decision table Dish not deployed");
        assert!(matches!(err, EngineError::Collaborator(_)));
    }

    #[test]
    fn taxonomy_messages_are_prefixed() {
        assert_eq!(
            EngineError::lookup("step `Task_9` not found").to_string(),
            "Lookup error: step `Task_9` not found"
        );
    }
}
