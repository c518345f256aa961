use async_trait::async_trait;

use crate::block::LoadedBlock;
use crate::content::{ActionRegistration, ResolveOptions, ResolvedContent};
use crate::error::CollaboratorError;

/// Resolves a block id to its definition and template.
#[async_trait]
pub trait BlockLoader: Send + Sync {
    /// Returns `Ok(None)` when no block exists under `id`.
    async fn load_block(&self, id: &str) -> Result<Option<LoadedBlock>, CollaboratorError>;
}

/// Resolves a generic content reference (id or `hcs://` URI) to bytes.
#[async_trait]
pub trait ContentResolver: Send + Sync {
    async fn resolve(
        &self,
        reference: &str,
        options: &ResolveOptions,
    ) -> Result<ResolvedContent, CollaboratorError>;
}

/// Resolves an action reference to its executable module metadata.
#[async_trait]
pub trait ActionRegistry: Send + Sync {
    async fn get_action_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<ActionRegistration>, CollaboratorError>;
}
