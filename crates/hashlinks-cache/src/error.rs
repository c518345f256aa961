use hashlinks_crypto::IntegrityError;
use hashlinks_types::{CollaboratorError, ResourceKind};
use thiserror::Error;

/// Errors from resource loading.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("failed to fetch resource {id}: {source}")]
    Fetch {
        id: String,
        #[source]
        source: CollaboratorError,
    },

    #[error("resource {id} has content type `{content_type}`, which is not a {expected}")]
    ContentTypeMismatch {
        id: String,
        expected: ResourceKind,
        content_type: String,
    },

    #[error("resource {id} is {size} bytes, larger than the {max} byte limit")]
    TooLarge { id: String, size: usize, max: usize },

    /// The fetched bytes do not match the expected digest. The resource is
    /// never returned.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error("resource dependency cycle: {}", path.join(" -> "))]
    DependencyCycle { path: Vec<String> },

    #[error("resource {id} depends on {dependency}, which is not part of the load")]
    UnknownDependency { id: String, dependency: String },

    #[error("resource {0} is listed more than once")]
    DuplicateResource(String),
}

pub type CacheResult<T> = Result<T, CacheError>;
