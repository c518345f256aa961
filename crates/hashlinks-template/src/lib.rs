//! Template language and reference scanning for HashLinks.
//!
//! Templates use a Handlebars subset: `{{path}}`, `{{{raw}}}`, helper calls,
//! `#if`/`#unless`/`#each`/`#with` blocks with `{{else}}`, and comments.
//! Text is parsed into a [`Node`] list once and evaluated by a tree-walking
//! interpreter. Escaped output is entity-encoded; raw output passes through
//! [`sanitize_html`].
//!
//! The [`HashLinkScanner`] finds embedded `data-hashlink` elements in
//! rendered output together with their inline overrides.

pub mod ast;
pub mod engine;
pub mod error;
pub mod eval;
pub mod helpers;
pub mod parser;
pub mod sanitize;
pub mod scan;

pub use ast::{Expression, Node, Operand, PathExpr};
pub use engine::{TemplateEngine, DEFAULT_TEMPLATE_CACHE_SIZE};
pub use error::{ScanError, TemplateError, TemplateResult};
pub use eval::{display, is_truthy, Template};
pub use helpers::{HelperFn, HelperRegistry};
pub use parser::parse;
pub use sanitize::{escape_html, sanitize_html};
pub use scan::{scan, splice, HashLinkScanner, ScanReport, DEFAULT_MARKER};
