//! In-memory collaborators for tests, the CLI, and embedding.
//!
//! Each collaborator keeps its data in a `HashMap` behind a `RwLock`, can be
//! told to fail for a given id, and records how often each id was requested.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::block::LoadedBlock;
use crate::content::{ActionRegistration, ResolveOptions, ResolvedContent};
use crate::error::CollaboratorError;
use crate::traits::{ActionRegistry, BlockLoader, ContentResolver};

/// Per-id request counters.
#[derive(Debug, Default)]
struct CallLog {
    calls: RwLock<HashMap<String, usize>>,
}

impl CallLog {
    fn record(&self, id: &str) {
        *self
            .calls
            .write()
            .expect("lock poisoned")
            .entry(id.to_string())
            .or_default() += 1;
    }

    fn count(&self, id: &str) -> usize {
        self.calls
            .read()
            .expect("lock poisoned")
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    fn total(&self) -> usize {
        self.calls.read().expect("lock poisoned").values().sum()
    }
}

// ---------------------------------------------------------------------------
// Block loader
// ---------------------------------------------------------------------------

/// `HashMap`-backed [`BlockLoader`].
#[derive(Debug, Default)]
pub struct InMemoryBlockLoader {
    blocks: RwLock<HashMap<String, LoadedBlock>>,
    failures: RwLock<HashMap<String, CollaboratorError>>,
    log: CallLog,
}

impl InMemoryBlockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, block: LoadedBlock) {
        self.blocks
            .write()
            .expect("lock poisoned")
            .insert(id.into(), block);
    }

    /// Make every subsequent load of `id` fail with `error`.
    pub fn fail_with(&self, id: impl Into<String>, error: CollaboratorError) {
        self.failures
            .write()
            .expect("lock poisoned")
            .insert(id.into(), error);
    }

    /// Number of `load_block` calls made for `id`.
    pub fn load_count(&self, id: &str) -> usize {
        self.log.count(id)
    }

    pub fn total_loads(&self) -> usize {
        self.log.total()
    }
}

#[async_trait]
impl BlockLoader for InMemoryBlockLoader {
    async fn load_block(&self, id: &str) -> Result<Option<LoadedBlock>, CollaboratorError> {
        self.log.record(id);
        if let Some(err) = self.failures.read().expect("lock poisoned").get(id) {
            return Err(err.clone());
        }
        Ok(self.blocks.read().expect("lock poisoned").get(id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Content resolver
// ---------------------------------------------------------------------------

/// `HashMap`-backed [`ContentResolver`].
#[derive(Debug, Default)]
pub struct InMemoryContentResolver {
    content: RwLock<HashMap<String, ResolvedContent>>,
    failures: RwLock<HashMap<String, CollaboratorError>>,
    log: CallLog,
}

impl InMemoryContentResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, content: ResolvedContent) {
        self.content
            .write()
            .expect("lock poisoned")
            .insert(id.into(), content);
    }

    /// Store UTF-8 text under `id`.
    pub fn insert_text(&self, id: &str, content_type: &str, text: &str) {
        self.insert(id, ResolvedContent::text(id, content_type, text));
    }

    /// Store binary data under `id`.
    pub fn insert_binary(&self, id: &str, content_type: &str, data: Vec<u8>) {
        self.insert(id, ResolvedContent::binary(id, content_type, data));
    }

    pub fn fail_with(&self, id: impl Into<String>, error: CollaboratorError) {
        self.failures
            .write()
            .expect("lock poisoned")
            .insert(id.into(), error);
    }

    pub fn resolve_count(&self, id: &str) -> usize {
        self.log.count(id)
    }

    pub fn total_resolves(&self) -> usize {
        self.log.total()
    }
}

#[async_trait]
impl ContentResolver for InMemoryContentResolver {
    async fn resolve(
        &self,
        reference: &str,
        _options: &ResolveOptions,
    ) -> Result<ResolvedContent, CollaboratorError> {
        self.log.record(reference);
        if let Some(err) = self.failures.read().expect("lock poisoned").get(reference) {
            return Err(err.clone());
        }
        self.content
            .read()
            .expect("lock poisoned")
            .get(reference)
            .cloned()
            .ok_or_else(|| CollaboratorError::NotFound(reference.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Action registry
// ---------------------------------------------------------------------------

/// `HashMap`-backed [`ActionRegistry`].
#[derive(Debug, Default)]
pub struct InMemoryActionRegistry {
    actions: RwLock<HashMap<String, ActionRegistration>>,
    log: CallLog,
}

impl InMemoryActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action under its own `reference`.
    pub fn register(&self, registration: ActionRegistration) {
        self.actions
            .write()
            .expect("lock poisoned")
            .insert(registration.reference.clone(), registration);
    }

    pub fn lookup_count(&self, reference: &str) -> usize {
        self.log.count(reference)
    }
}

#[async_trait]
impl ActionRegistry for InMemoryActionRegistry {
    async fn get_action_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<ActionRegistration>, CollaboratorError> {
        self.log.record(reference);
        Ok(self
            .actions
            .read()
            .expect("lock poisoned")
            .get(reference)
            .cloned())
    }
}
