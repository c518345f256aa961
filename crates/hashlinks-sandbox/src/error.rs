use hashlinks_crypto::IntegrityError;
use hashlinks_types::CollaboratorError;
use thiserror::Error;

/// Faults while loading, instantiating or calling an action module.
///
/// None of these escape the executor; they become
/// [`ExecutionResult::Failure`](crate::ExecutionResult::Failure).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SandboxError {
    #[error("action not found: {0}")]
    ActionNotFound(String),

    #[error("action {0} has no wrapper module; raw module invocation is not supported")]
    MissingWrapper(String),

    #[error("failed to fetch {reference}: {source}")]
    Fetch {
        reference: String,
        #[source]
        source: CollaboratorError,
    },

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error("invalid binding descriptor: {0}")]
    InvalidBinding(String),

    #[error("unsupported module ABI `{0}`")]
    UnsupportedAbi(String),

    #[error("module does not export {0}")]
    MissingExport(String),

    #[error("module compilation failed: {0}")]
    Compile(String),

    #[error("module instantiation failed: {0}")]
    Instantiate(String),

    #[error("module call failed: {0}")]
    Trap(String),

    #[error("module ran out of fuel (limit {limit})")]
    FuelExhausted { limit: u64 },

    #[error("calling convention violated: {0}")]
    Abi(String),

    #[error("timeout")]
    Timeout,

    #[error("module execution panicked: {0}")]
    Panicked(String),
}

pub type SandboxResult<T> = Result<T, SandboxError>;
