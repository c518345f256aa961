use thiserror::Error;

/// Errors produced while parsing or converting foundation types.
///
/// A `TypeError` always indicates structurally broken input (a malformed
/// reference URI or digest) and is surfaced to the caller, never recovered.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("missing `hcs://` scheme in reference: {0}")]
    MissingScheme(String),

    #[error("invalid protocol id `{protocol}` in reference: {uri}")]
    InvalidProtocol { uri: String, protocol: String },

    #[error("empty reference in: {0}")]
    EmptyReference(String),

    #[error("registry reference must be `<registryId>/<entryName>`: {0}")]
    InvalidRegistryReference(String),
}

/// Faults raised by external collaborators (block loader, content resolver,
/// action registry, storage backend).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// The collaborator answered, but the requested item does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Transport or upstream failure.
    #[error("network error: {0}")]
    Network(String),

    /// The collaborator did not answer in time.
    #[error("timeout")]
    Timeout,

    #[error("{0}")]
    Other(String),
}
