//! Resource cache for HashLinks blocks.
//!
//! Styles, scripts, templates and images referenced by a block are fetched
//! once through a [`ContentResolver`](hashlinks_types::ContentResolver),
//! classified by content type, sanitized, and kept in a size-bounded cache
//! with a time-to-live. Dependency lists are validated for cycles and loaded
//! in dependency order.

pub mod cache;
pub mod config;
pub mod deps;
pub mod error;
pub mod sanitize;

pub use cache::{CacheStats, LoadedResource, ResourceCache};
pub use config::ResourceCacheConfig;
pub use deps::load_order;
pub use error::{CacheError, CacheResult};
pub use sanitize::{classify, sanitize, sanitize_script, sanitize_style};
