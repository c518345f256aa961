use hashlinks_state::StateError;
use hashlinks_template::TemplateError;
use thiserror::Error;

/// Errors surfaced to callers of the renderer.
///
/// Faults inside nested blocks never show up here; they are rendered in
/// place and listed in [`RenderOutput::errors`](crate::RenderOutput::errors).
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to resolve block {id}: {message}")]
    Resolution { id: String, message: String },

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("no rendered block instance {0}")]
    UnknownInstance(String),

    #[error("block instance {instance} has no action named {action}")]
    UnknownAction { instance: String, action: String },

    #[error("no action registry or sandbox configured")]
    ActionsUnavailable,

    #[error("sandbox setup failed: {0}")]
    Sandbox(String),
}

pub type RenderResult<T> = Result<T, RenderError>;
