use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::schema::StateSchema;
use crate::state::BlockState;
use crate::storage::StorageBackend;

/// Error type returned by listeners and message handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Called after every committed mutation with `(new, old, block_id)`.
pub type StateListener =
    dyn Fn(&BlockState, Option<&BlockState>, &str) -> Result<(), HandlerError> + Send + Sync;

/// Called for every message addressed to the block it was registered for.
pub type MessageHandler = dyn Fn(&BlockMessage) -> Result<(), HandlerError> + Send + Sync;

/// Key prefix used for persisted state.
pub const STORAGE_PREFIX: &str = "hashlinks:state:";

/// Handle for removing a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A directed or broadcast message between block instances.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockMessage {
    pub from: String,
    pub to: String,
    pub kind: String,
    pub payload: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateStoreConfig {
    /// Upper bound on live block states.
    pub max_block_states: usize,
    /// Upper bound on nested message deliveries on one thread.
    pub max_message_hops: usize,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            max_block_states: 1000,
            max_message_hops: 16,
        }
    }
}

thread_local! {
    static MESSAGE_DEPTH: Cell<usize> = const { Cell::new(0) };
}

struct Entry {
    state: BlockState,
    seq: u64,
    persistent: bool,
    unused: bool,
}

#[derive(Default)]
struct Inner {
    states: HashMap<String, Entry>,
    listeners: HashMap<String, Vec<(ListenerId, Arc<StateListener>)>>,
    handlers: HashMap<String, Vec<Arc<MessageHandler>>>,
    schemas: HashMap<String, StateSchema>,
    /// Ids whose listener pass is running.
    in_flight: HashSet<String>,
    next_seq: u64,
    next_listener: u64,
}

impl Inner {
    fn remove_all(&mut self, id: &str) -> Option<Entry> {
        self.listeners.remove(id);
        self.handlers.remove(id);
        self.states.remove(id)
    }

    /// Make room for one more state.
    fn reserve_slot(&mut self, max: usize) -> StateResult<()> {
        if self.states.len() < max {
            return Ok(());
        }

        let unused: Vec<String> = self
            .states
            .iter()
            .filter(|(id, entry)| entry.unused && !self.in_flight.contains(*id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &unused {
            debug!(block = %id, "reclaiming unused block state");
            self.remove_all(id);
        }
        if self.states.len() < max {
            return Ok(());
        }

        let oldest = self
            .states
            .iter()
            .filter(|(id, entry)| !entry.persistent && !self.in_flight.contains(*id))
            .min_by_key(|(_, entry)| entry.seq)
            .map(|(id, _)| id.clone());
        match oldest {
            Some(id) => {
                warn!(block = %id, max, "block state capacity reached, evicting oldest state");
                self.remove_all(&id);
                Ok(())
            }
            None => Err(StateError::CapacityExceeded { max }),
        }
    }
}

/// Owner of every block instance's state, listeners and message handlers.
///
/// Mutations are synchronous. Listeners run in registration order after the
/// new state is committed and outside the store lock. A listener that
/// mutates the same id again is rejected with
/// [`StateError::MutationInProgress`]; mutating other ids is allowed.
pub struct BlockStateStore {
    config: StateStoreConfig,
    inner: Mutex<Inner>,
    storage: Option<Arc<dyn StorageBackend>>,
}

impl BlockStateStore {
    pub fn new(config: StateStoreConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::default()),
            storage: None,
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn config(&self) -> &StateStoreConfig {
        &self.config
    }

    pub fn has_storage(&self) -> bool {
        self.storage.is_some()
    }

    // -----------------------------------------------------------------------
    // CRUD
    // -----------------------------------------------------------------------

    /// Create or replace the state for `id`.
    pub fn create(&self, id: &str, initial: BlockState) -> StateResult<()> {
        self.commit(id, |_| Ok(initial)).map(|_| ())
    }

    /// Merge into existing state, or create it.
    pub fn set(&self, id: &str, state: BlockState) -> StateResult<BlockState> {
        self.commit(id, |old| {
            Ok(match old {
                Some(old) => old.clone().merged(&state),
                None => state,
            })
        })
    }

    /// Merge a partial update into existing state.
    pub fn update(&self, id: &str, patch: &BlockState) -> StateResult<BlockState> {
        self.commit(id, |old| {
            old.map(|old| old.clone().merged(patch))
                .ok_or_else(|| StateError::NotFound(id.to_string()))
        })
    }

    pub fn get(&self, id: &str) -> Option<BlockState> {
        self.lock().states.get(id).map(|entry| entry.state.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().states.contains_key(id)
    }

    /// Remove the state, listeners and message handlers for `id` together.
    pub fn destroy(&self, id: &str) -> StateResult<BlockState> {
        let mut inner = self.lock();
        if inner.in_flight.contains(id) {
            return Err(StateError::MutationInProgress(id.to_string()));
        }
        inner
            .remove_all(id)
            .map(|entry| entry.state)
            .ok_or_else(|| StateError::NotFound(id.to_string()))
    }

    fn commit<F>(&self, id: &str, next: F) -> StateResult<BlockState>
    where
        F: FnOnce(Option<&BlockState>) -> StateResult<BlockState>,
    {
        let (new_state, old_state, listeners) = {
            let mut inner = self.lock();
            if inner.in_flight.contains(id) {
                return Err(StateError::MutationInProgress(id.to_string()));
            }

            let old_state = inner.states.get(id).map(|entry| entry.state.clone());
            let new_state = next(old_state.as_ref())?;

            if let Some(schema) = inner.schemas.get(id) {
                schema
                    .validate(&new_state.to_value()?)
                    .map_err(|violations| StateError::Validation {
                        id: id.to_string(),
                        violations,
                    })?;
            }

            match inner.states.get_mut(id) {
                Some(entry) => {
                    entry.state = new_state.clone();
                    entry.unused = false;
                }
                None => {
                    inner.reserve_slot(self.config.max_block_states)?;
                    let seq = inner.next_seq;
                    inner.next_seq += 1;
                    inner.states.insert(
                        id.to_string(),
                        Entry {
                            state: new_state.clone(),
                            seq,
                            persistent: false,
                            unused: false,
                        },
                    );
                }
            }

            // Listeners only hear about commits that change something.
            let unchanged = old_state.as_ref() == Some(&new_state);
            let listeners: Vec<Arc<StateListener>> = inner
                .listeners
                .get(id)
                .filter(|_| !unchanged)
                .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
                .unwrap_or_default();
            if !listeners.is_empty() {
                inner.in_flight.insert(id.to_string());
            }
            (new_state, old_state, listeners)
        };

        if !listeners.is_empty() {
            for listener in &listeners {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    listener(&new_state, old_state.as_ref(), id)
                }));
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => warn!(block = %id, %error, "state listener failed"),
                    Err(_) => warn!(block = %id, "state listener panicked"),
                }
            }
            self.lock().in_flight.remove(id);
        }
        Ok(new_state)
    }

    // -----------------------------------------------------------------------
    // Schemas and housekeeping
    // -----------------------------------------------------------------------

    /// Validate every later create/update for `id` against `schema`.
    pub fn register_schema(&self, id: &str, schema: StateSchema) {
        self.lock().schemas.insert(id.to_string(), schema);
    }

    pub fn remove_schema(&self, id: &str) -> bool {
        self.lock().schemas.remove(id).is_some()
    }

    /// Allow `id` to be reclaimed first when capacity is reached.
    pub fn mark_unused(&self, id: &str) -> StateResult<()> {
        let mut inner = self.lock();
        let entry = inner
            .states
            .get_mut(id)
            .ok_or_else(|| StateError::NotFound(id.to_string()))?;
        entry.unused = true;
        Ok(())
    }

    /// Persistent states are never evicted.
    pub fn set_persistent(&self, id: &str, persistent: bool) -> StateResult<()> {
        let mut inner = self.lock();
        let entry = inner
            .states
            .get_mut(id)
            .ok_or_else(|| StateError::NotFound(id.to_string()))?;
        entry.persistent = persistent;
        Ok(())
    }

    /// Live ids, oldest first.
    pub fn block_ids(&self) -> Vec<String> {
        let inner = self.lock();
        let mut ids: Vec<(&String, u64)> = inner
            .states
            .iter()
            .map(|(id, entry)| (id, entry.seq))
            .collect();
        ids.sort_by_key(|(_, seq)| *seq);
        ids.into_iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // -----------------------------------------------------------------------
    // Listeners
    // -----------------------------------------------------------------------

    pub fn on_change<F>(&self, id: &str, listener: F) -> ListenerId
    where
        F: Fn(&BlockState, Option<&BlockState>, &str) -> Result<(), HandlerError>
            + Send
            + Sync
            + 'static,
    {
        let mut inner = self.lock();
        let handle = ListenerId(inner.next_listener);
        inner.next_listener += 1;
        inner
            .listeners
            .entry(id.to_string())
            .or_default()
            .push((handle, Arc::new(listener)));
        handle
    }

    pub fn remove_listener(&self, id: &str, handle: ListenerId) -> bool {
        let mut inner = self.lock();
        let Some(list) = inner.listeners.get_mut(id) else {
            return false;
        };
        let before = list.len();
        list.retain(|(h, _)| *h != handle);
        before != list.len()
    }

    pub fn listener_count(&self, id: &str) -> usize {
        self.lock().listeners.get(id).map_or(0, Vec::len)
    }

    // -----------------------------------------------------------------------
    // Messaging
    // -----------------------------------------------------------------------

    pub fn on_message<F>(&self, id: &str, handler: F)
    where
        F: Fn(&BlockMessage) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.lock()
            .handlers
            .entry(id.to_string())
            .or_default()
            .push(Arc::new(handler));
    }

    pub fn handler_count(&self, id: &str) -> usize {
        self.lock().handlers.get(id).map_or(0, Vec::len)
    }

    /// Deliver a message to every handler of `to`. Returns how many handlers
    /// ran. Handler faults are logged and do not stop delivery.
    pub fn send_message(
        &self,
        from: &str,
        to: &str,
        kind: &str,
        payload: Value,
    ) -> StateResult<usize> {
        let message = BlockMessage {
            from: from.to_string(),
            to: to.to_string(),
            kind: kind.to_string(),
            payload,
        };
        self.deliver(&message)
    }

    /// Deliver to every live block except the sender.
    pub fn broadcast(&self, from: &str, kind: &str, payload: Value) -> StateResult<usize> {
        let mut delivered = 0;
        for to in self.block_ids().into_iter().filter(|id| id != from) {
            let message = BlockMessage {
                from: from.to_string(),
                to,
                kind: kind.to_string(),
                payload: payload.clone(),
            };
            delivered += self.deliver(&message)?;
        }
        Ok(delivered)
    }

    fn deliver(&self, message: &BlockMessage) -> StateResult<usize> {
        let limit = self.config.max_message_hops;
        let depth = MESSAGE_DEPTH.with(Cell::get);
        if depth >= limit {
            warn!(from = %message.from, to = %message.to, limit, "message hop limit reached");
            return Err(StateError::MessageHopLimit { limit });
        }

        let handlers: Vec<Arc<MessageHandler>> = self
            .lock()
            .handlers
            .get(&message.to)
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            debug!(to = %message.to, kind = %message.kind, "no message handlers");
            return Ok(0);
        }

        MESSAGE_DEPTH.with(|d| d.set(depth + 1));
        for handler in &handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(message))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => warn!(to = %message.to, %error, "message handler failed"),
                Err(_) => warn!(to = %message.to, "message handler panicked"),
            }
        }
        MESSAGE_DEPTH.with(|d| d.set(depth));
        Ok(handlers.len())
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Write the current state of `id` to storage. Best-effort: returns
    /// whether it was written.
    pub async fn persist(&self, id: &str) -> bool {
        let Some(storage) = &self.storage else {
            return false;
        };
        let Some(state) = self.get(id) else {
            return false;
        };
        let encoded = match serde_json::to_string(&state) {
            Ok(encoded) => encoded,
            Err(error) => {
                warn!(block = %id, %error, "failed to encode state for persistence");
                return false;
            }
        };
        match storage.set(&storage_key(id), encoded).await {
            Ok(()) => true,
            Err(error) => {
                warn!(block = %id, %error, "failed to persist block state");
                false
            }
        }
    }

    /// Load a persisted state for `id` and install it. Best-effort.
    pub async fn restore(&self, id: &str) -> Option<BlockState> {
        let storage = self.storage.as_ref()?;
        let raw = match storage.get(&storage_key(id)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(error) => {
                warn!(block = %id, %error, "failed to read persisted block state");
                return None;
            }
        };
        let state: BlockState = match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(error) => {
                warn!(block = %id, %error, "discarding undecodable persisted state");
                return None;
            }
        };
        match self.create(id, state.clone()) {
            Ok(()) => Some(state),
            Err(error) => {
                warn!(block = %id, %error, "failed to install persisted block state");
                None
            }
        }
    }

    /// Delete any persisted state for `id`. Best-effort.
    pub async fn forget(&self, id: &str) -> bool {
        let Some(storage) = &self.storage else {
            return false;
        };
        match storage.remove(&storage_key(id)).await {
            Ok(()) => true,
            Err(error) => {
                warn!(block = %id, %error, "failed to remove persisted block state");
                false
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("lock poisoned")
    }
}

impl Default for BlockStateStore {
    fn default() -> Self {
        Self::new(StateStoreConfig::default())
    }
}

fn storage_key(id: &str) -> String {
    format!("{STORAGE_PREFIX}{id}")
}
