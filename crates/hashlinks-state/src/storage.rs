use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use hashlinks_types::CollaboratorError;

/// Pluggable key-value backend for persisted block state.
///
/// Any call may fail; the state store logs and swallows those failures.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CollaboratorError>;
    async fn set(&self, key: &str, value: String) -> Result<(), CollaboratorError>;
    async fn remove(&self, key: &str) -> Result<(), CollaboratorError>;
}

/// `HashMap`-backed [`StorageBackend`] that can be switched into a failing
/// mode.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    data: RwLock<HashMap<String, String>>,
    failing: AtomicBool,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.data.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.read().expect("lock poisoned").contains_key(key)
    }

    fn check(&self) -> Result<(), CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(CollaboratorError::Other("storage unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StorageBackend for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, CollaboratorError> {
        self.check()?;
        Ok(self.data.read().expect("lock poisoned").get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), CollaboratorError> {
        self.check()?;
        self.data
            .write()
            .expect("lock poisoned")
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CollaboratorError> {
        self.check()?;
        self.data.write().expect("lock poisoned").remove(key);
        Ok(())
    }
}
