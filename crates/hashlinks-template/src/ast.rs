//! Intermediate node list produced by the parser.

use serde_json::Value;

/// A dotted path such as `user.name`, `../title`, `this` or `@index`.
#[derive(Clone, Debug, PartialEq)]
pub struct PathExpr {
    /// Number of `../` prefixes.
    pub parent_depth: usize,
    /// Name of a `@data` variable (`index`, `key`, `first`, `last`, `root`).
    pub data: Option<String>,
    pub segments: Vec<String>,
}

impl PathExpr {
    /// `true` for a bare single-segment name, the only shape that can also
    /// name a helper.
    pub fn simple_name(&self) -> Option<&str> {
        match (self.parent_depth, &self.data, self.segments.as_slice()) {
            (0, None, [name]) => Some(name),
            _ => None,
        }
    }
}

/// One argument or the head of an expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Path(PathExpr),
    Literal(Value),
    /// Parenthesized helper call, e.g. `(eq status "on")`.
    SubExpr(Box<Expression>),
}

/// `head arg1 arg2 ...`. With no arguments this is either a path lookup or
/// a zero-argument helper call.
#[derive(Clone, Debug, PartialEq)]
pub struct Expression {
    pub head: Operand,
    pub args: Vec<Operand>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Text(String),
    /// `{{expr}}` (escaped) or `{{{expr}}}` (sanitized raw).
    Output { expr: Expression, escape: bool },
    /// `{{#if}}` / `{{#unless}}`.
    Conditional {
        condition: Expression,
        negate: bool,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
    /// `{{#each}}` over an array or an object used as a map.
    Each {
        target: Expression,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
    /// `{{#with}}`: evaluate `body` with `target` as the new context.
    With {
        target: Expression,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
}
