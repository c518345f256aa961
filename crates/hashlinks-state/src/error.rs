use thiserror::Error;

/// Errors from the state store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("no state for block: {0}")]
    NotFound(String),

    /// A registered schema rejected the new value. Nothing was committed.
    #[error("state for {id} failed validation: {}", violations.join("; "))]
    Validation { id: String, violations: Vec<String> },

    /// A listener tried to mutate an id whose listener pass is still running.
    #[error("state mutation for {0} is already in progress")]
    MutationInProgress(String),

    #[error("block state capacity of {max} reached and every state is persistent")]
    CapacityExceeded { max: usize },

    #[error("message hop limit of {limit} exceeded")]
    MessageHopLimit { limit: usize },

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type StateResult<T> = Result<T, StateError>;
