//! Block rendering for HashLinks.
//!
//! [`BlockRenderer`] resolves a block, renders its template against merged
//! attributes and stored state, then scans the output for embedded
//! HashLinks and renders each one in place, recursively. Nested faults are
//! rendered as inline markers so one broken reference never takes down the
//! page. Rendered instances can invoke sandboxed actions whose results are
//! folded back into their state.

pub mod config;
pub mod error;
pub mod markup;
pub mod renderer;

pub use config::RenderConfig;
pub use error::{RenderError, RenderResult};
pub use markup::{action_attributes, error_marker, lazy_container, template_context};
pub use renderer::{
    ActionOutcome, BlockRenderer, Collaborators, RenderOptions, RenderOutput, ResourceText,
};
