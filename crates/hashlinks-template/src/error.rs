use hashlinks_types::{SourceSpan, TypeError};
use thiserror::Error;

/// Errors from template compilation and evaluation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TemplateError {
    /// Structurally broken template text. Never silently recovered.
    #[error("template syntax error at offset {offset}: {message}")]
    Syntax { message: String, offset: usize },

    #[error("unknown helper: {0}")]
    UnknownHelper(String),

    #[error("helper `{name}` failed: {message}")]
    Helper { name: String, message: String },

    #[error("unknown precompiled template: {0}")]
    UnknownTemplate(String),
}

impl TemplateError {
    pub(crate) fn syntax(message: impl Into<String>, offset: usize) -> Self {
        Self::Syntax {
            message: message.into(),
            offset,
        }
    }
}

pub type TemplateResult<T> = Result<T, TemplateError>;

/// A reference occurrence whose URI failed to parse.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("invalid HashLink at {}..{}: {error}", span.start, span.end)]
pub struct ScanError {
    pub span: SourceSpan,
    pub uri: String,
    pub error: TypeError,
}
