//! Reference resolution for HashLinks.
//!
//! [`ReferenceResolver`] turns a [`BlockReference`](hashlinks_types::BlockReference)
//! into a [`ResolvedBlock`](hashlinks_types::ResolvedBlock) by dispatching on
//! the reference's protocol. Faults never escape: they come back as the
//! resolved block's `error`.

pub mod config;
pub mod resolver;

pub use config::ResolverConfig;
pub use resolver::{ActiveGuard, ReferenceResolver, CIRCULAR_REFERENCE};
