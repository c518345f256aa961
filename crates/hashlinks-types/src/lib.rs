//! Foundation types for HashLinks.
//!
//! This crate provides the reference grammar, the block data model, and the
//! collaborator boundaries shared by every other HashLinks crate.
//!
//! # Key Types
//!
//! - [`HashLinkUri`]: Parsed `hcs://<protocolId>/<reference>` pointer
//! - [`BlockReference`]: One embedded HashLink occurrence with its overrides
//! - [`ResolvedBlock`]: Outcome of resolving a reference
//! - [`RenderContext`]: Context passed down the render recursion
//! - [`ContentHash`]: BLAKE3 content hash
//!
//! # Collaborators
//!
//! [`BlockLoader`], [`ContentResolver`] and [`ActionRegistry`] are the
//! boundaries to the consensus log. In-memory implementations live in
//! [`memory`].

pub mod block;
pub mod content;
pub mod error;
pub mod hash;
pub mod memory;
pub mod traits;
pub mod uri;

pub use block::{
    merge_attributes, ActionMap, AttributeSpec, AttributeType, Attributes, BlockDefinition,
    BlockReference, LoadedBlock, LoadingMode, RenderContext, ResolvedBlock, ResourceDependency,
    ResourceKind, SourceSpan,
};
pub use content::{ActionRegistration, Network, ResolveOptions, ResolvedContent};
pub use error::{CollaboratorError, TypeError};
pub use hash::ContentHash;
pub use memory::{InMemoryActionRegistry, InMemoryBlockLoader, InMemoryContentResolver};
pub use traits::{ActionRegistry, BlockLoader, ContentResolver};
pub use uri::{HashLinkUri, Protocol, HASHLINK_SCHEME};
