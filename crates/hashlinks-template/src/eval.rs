//! Tree-walking interpreter over the parsed node list.

use serde_json::{Map, Value};

use hashlinks_crypto::ContentHasher;
use hashlinks_types::ContentHash;

use crate::ast::{Expression, Node, Operand, PathExpr};
use crate::error::{TemplateError, TemplateResult};
use crate::helpers::HelperRegistry;
use crate::parser::parse;
use crate::sanitize::{escape_html, sanitize_html};

/// Truthiness used by `if`, `unless`, `with` and `not`.
///
/// Undefined, `null`, `false`, `0`, the empty string and the empty array are
/// false. Objects, including empty ones, are true.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(_)) => true,
    }
}

/// Text form of a value as it appears in rendered output.
pub fn display(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| display(Some(item)))
            .collect::<Vec<_>>()
            .join(","),
        Some(other) => other.to_string(),
    }
}

/// A parsed template, ready to render against any context.
#[derive(Clone, Debug)]
pub struct Template {
    hash: ContentHash,
    nodes: Vec<Node>,
}

impl Template {
    pub fn compile(source: &str) -> TemplateResult<Self> {
        Ok(Self {
            hash: ContentHasher::TEMPLATE.hash(source.as_bytes()),
            nodes: parse(source)?,
        })
    }

    /// Structural hash of the source text.
    pub fn hash(&self) -> ContentHash {
        self.hash
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn render(&self, context: &Value, helpers: &HelperRegistry) -> TemplateResult<String> {
        let mut evaluator = Evaluator {
            helpers,
            stack: vec![Scope {
                value: context.clone(),
                data: Map::new(),
            }],
        };
        let mut out = String::new();
        evaluator.render_nodes(&self.nodes, &mut out)?;
        Ok(out)
    }
}

struct Scope {
    value: Value,
    data: Map<String, Value>,
}

struct Evaluator<'h> {
    helpers: &'h HelperRegistry,
    stack: Vec<Scope>,
}

impl Evaluator<'_> {
    fn render_nodes(&mut self, nodes: &[Node], out: &mut String) -> TemplateResult<()> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Output { expr, escape } => {
                    let text = display(self.eval(expr)?.as_ref());
                    if *escape {
                        out.push_str(&escape_html(&text));
                    } else {
                        out.push_str(&sanitize_html(&text));
                    }
                }
                Node::Conditional {
                    condition,
                    negate,
                    then,
                    otherwise,
                } => {
                    let value = self.eval(condition)?;
                    if is_truthy(value.as_ref()) != *negate {
                        self.render_nodes(then, out)?;
                    } else {
                        self.render_nodes(otherwise, out)?;
                    }
                }
                Node::Each {
                    target,
                    body,
                    otherwise,
                } => self.render_each(self.eval(target)?, body, otherwise, out)?,
                Node::With {
                    target,
                    body,
                    otherwise,
                } => match self.eval(target)? {
                    Some(value) if is_truthy(Some(&value)) => {
                        let data = self.current_data();
                        self.scoped(value, data, |this| this.render_nodes(body, out))?;
                    }
                    _ => self.render_nodes(otherwise, out)?,
                },
            }
        }
        Ok(())
    }

    fn render_each(
        &mut self,
        target: Option<Value>,
        body: &[Node],
        otherwise: &[Node],
        out: &mut String,
    ) -> TemplateResult<()> {
        let entries: Vec<(Option<String>, Value)> = match target {
            Some(Value::Array(items)) => items.into_iter().map(|item| (None, item)).collect(),
            Some(Value::Object(map)) => map.into_iter().map(|(k, v)| (Some(k), v)).collect(),
            _ => Vec::new(),
        };
        if entries.is_empty() {
            return self.render_nodes(otherwise, out);
        }

        let last = entries.len() - 1;
        for (index, (key, value)) in entries.into_iter().enumerate() {
            let mut data = self.current_data();
            data.insert("index".into(), Value::from(index));
            data.insert("first".into(), Value::Bool(index == 0));
            data.insert("last".into(), Value::Bool(index == last));
            if let Some(key) = key {
                data.insert("key".into(), Value::String(key));
            }
            self.scoped(value, data, |this| this.render_nodes(body, out))?;
        }
        Ok(())
    }

    fn scoped<F>(&mut self, value: Value, data: Map<String, Value>, f: F) -> TemplateResult<()>
    where
        F: FnOnce(&mut Self) -> TemplateResult<()>,
    {
        self.stack.push(Scope { value, data });
        let result = f(self);
        self.stack.pop();
        result
    }

    fn current_data(&self) -> Map<String, Value> {
        self.stack
            .last()
            .map(|scope| scope.data.clone())
            .unwrap_or_default()
    }

    /// Evaluate an expression. `None` means undefined.
    fn eval(&self, expr: &Expression) -> TemplateResult<Option<Value>> {
        if !expr.args.is_empty() {
            let name = match &expr.head {
                Operand::Path(path) => path.simple_name(),
                _ => None,
            }
            .ok_or_else(|| TemplateError::UnknownHelper(format!("{:?}", expr.head)))?;
            return self.call_helper(name, &expr.args).map(Some);
        }
        if let Operand::Path(path) = &expr.head {
            if let Some(name) = path.simple_name() {
                if self.helpers.contains(name) {
                    return self.call_helper(name, &[]).map(Some);
                }
            }
        }
        self.eval_operand(&expr.head)
    }

    fn eval_operand(&self, operand: &Operand) -> TemplateResult<Option<Value>> {
        match operand {
            Operand::Literal(value) => Ok(Some(value.clone())),
            Operand::Path(path) => Ok(self.lookup(path)),
            Operand::SubExpr(expr) => self.eval(expr),
        }
    }

    fn call_helper(&self, name: &str, args: &[Operand]) -> TemplateResult<Value> {
        let helper = self
            .helpers
            .get(name)
            .ok_or_else(|| TemplateError::UnknownHelper(name.to_string()))?;
        let values = args
            .iter()
            .map(|arg| Ok(self.eval_operand(arg)?.unwrap_or(Value::Null)))
            .collect::<TemplateResult<Vec<_>>>()?;
        helper(&values).map_err(|message| TemplateError::Helper {
            name: name.to_string(),
            message,
        })
    }

    /// Walk a dotted path. A null or non-container value at any step yields
    /// undefined rather than an error.
    fn lookup(&self, path: &PathExpr) -> Option<Value> {
        let index = self.stack.len().saturating_sub(1 + path.parent_depth);
        let scope = &self.stack[index];
        let base = match path.data.as_deref() {
            Some("root") => &self.stack[0].value,
            Some(name) => scope.data.get(name)?,
            None => &scope.value,
        };
        let mut current = base;
        for segment in &path.segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }
}
