//! Per-instance block state for HashLinks.
//!
//! [`BlockStateStore`] owns every block instance's [`BlockState`] together
//! with its change listeners and message handlers. Mutations are validated
//! against an optional [`StateSchema`] before they are committed, the number
//! of live states is bounded, and states can be persisted through a
//! pluggable [`StorageBackend`].

pub mod error;
pub mod schema;
pub mod state;
pub mod storage;
pub mod store;

pub use error::{StateError, StateResult};
pub use schema::{SchemaType, StateSchema};
pub use state::BlockState;
pub use storage::{InMemoryStorage, StorageBackend};
pub use store::{
    BlockMessage, BlockStateStore, HandlerError, ListenerId, MessageHandler, StateListener,
    StateStoreConfig, STORAGE_PREFIX,
};
