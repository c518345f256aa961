//! Tokenizer and parser: template text to a [`Node`] list.
//!
//! Validation happens here, before anything is evaluated: un-terminated or
//! doubly-opened tag markers and unbalanced block pairs are syntax errors.

use serde_json::{Number, Value};

use crate::ast::{Expression, Node, Operand, PathExpr};
use crate::error::{TemplateError, TemplateResult};

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Text(&'a str),
    Tag {
        body: &'a str,
        raw: bool,
        offset: usize,
    },
}

fn tokenize(src: &str) -> TemplateResult<Vec<Token<'_>>> {
    let mut tokens = Vec::new();
    let mut pos = 0;

    while let Some(rel) = src[pos..].find("{{") {
        let start = pos + rel;
        if start > pos {
            tokens.push(Token::Text(&src[pos..start]));
        }
        let rest = &src[start..];

        if rest.starts_with("{{!--") {
            let end = rest
                .find("--}}")
                .ok_or_else(|| TemplateError::syntax("unterminated comment", start))?;
            pos = start + end + 4;
            continue;
        }
        if rest.starts_with("{{!") {
            let end = rest
                .find("}}")
                .ok_or_else(|| TemplateError::syntax("unterminated comment", start))?;
            pos = start + end + 2;
            continue;
        }

        let (raw, open_len, close) = if rest.starts_with("{{{") {
            (true, 3, "}}}")
        } else {
            (false, 2, "}}")
        };
        let inner_start = start + open_len;
        let close_at = src[inner_start..]
            .find(close)
            .ok_or_else(|| TemplateError::syntax("unterminated tag", start))?;
        let body = &src[inner_start..inner_start + close_at];
        if let Some(nested) = body.find("{{") {
            return Err(TemplateError::syntax(
                "tag opened again before it was closed",
                inner_start + nested,
            ));
        }
        tokens.push(Token::Tag {
            body,
            raw,
            offset: start,
        });
        pos = inner_start + close_at + close.len();
    }

    if pos < src.len() {
        tokens.push(Token::Text(&src[pos..]));
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

fn split_operands(src: &str, offset: usize) -> TemplateResult<Vec<&str>> {
    let bytes = src.as_bytes();
    let mut parts = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i].is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        match bytes[i] {
            quote @ (b'"' | b'\'') => {
                let close = src[i + 1..].find(quote as char).ok_or_else(|| {
                    TemplateError::syntax("unterminated string literal", offset + i)
                })?;
                i += close + 2;
            }
            b'(' => {
                let mut depth = 0usize;
                let mut in_quote: Option<u8> = None;
                loop {
                    let Some(&b) = bytes.get(i) else {
                        return Err(TemplateError::syntax(
                            "unbalanced parenthesis",
                            offset + start,
                        ));
                    };
                    match (in_quote, b) {
                        (Some(q), b) if b == q => in_quote = None,
                        (Some(_), _) => {}
                        (None, b'"' | b'\'') => in_quote = Some(b),
                        (None, b'(') => depth += 1,
                        (None, b')') => {
                            depth -= 1;
                            if depth == 0 {
                                i += 1;
                                break;
                            }
                        }
                        _ => {}
                    }
                    i += 1;
                }
            }
            b')' => {
                return Err(TemplateError::syntax("unexpected `)`", offset + i));
            }
            _ => {
                while i < bytes.len()
                    && !bytes[i].is_ascii_whitespace()
                    && !matches!(bytes[i], b'(' | b')')
                {
                    i += 1;
                }
            }
        }
        parts.push(&src[start..i]);
    }
    Ok(parts)
}

fn parse_expression(src: &str, offset: usize) -> TemplateResult<Expression> {
    let parts = split_operands(src, offset)?;
    let mut operands = parts
        .into_iter()
        .map(|part| parse_operand(part, offset))
        .collect::<TemplateResult<Vec<_>>>()?
        .into_iter();
    let head = operands
        .next()
        .ok_or_else(|| TemplateError::syntax("empty expression", offset))?;
    Ok(Expression {
        head,
        args: operands.collect(),
    })
}

fn parse_operand(token: &str, offset: usize) -> TemplateResult<Operand> {
    let first = token.as_bytes()[0];
    if matches!(first, b'"' | b'\'') {
        return Ok(Operand::Literal(Value::String(
            token[1..token.len() - 1].to_string(),
        )));
    }
    if first == b'(' {
        let inner = &token[1..token.len() - 1];
        return Ok(Operand::SubExpr(Box::new(parse_expression(inner, offset)?)));
    }
    match token {
        "true" => return Ok(Operand::Literal(Value::Bool(true))),
        "false" => return Ok(Operand::Literal(Value::Bool(false))),
        "null" | "undefined" => return Ok(Operand::Literal(Value::Null)),
        _ => {}
    }
    if first.is_ascii_digit() || (first == b'-' && token.len() > 1) {
        if let Some(number) = parse_number(token) {
            return Ok(Operand::Literal(Value::Number(number)));
        }
    }
    if token.contains('=') {
        return Err(TemplateError::syntax(
            format!("hash arguments are not supported: {token}"),
            offset,
        ));
    }
    parse_path(token, offset).map(Operand::Path)
}

fn parse_number(token: &str) -> Option<Number> {
    if let Ok(i) = token.parse::<i64>() {
        return Some(Number::from(i));
    }
    token.parse::<f64>().ok().and_then(Number::from_f64)
}

pub(crate) fn parse_path(token: &str, offset: usize) -> TemplateResult<PathExpr> {
    let mut rest = token;
    let mut parent_depth = 0;
    while let Some(r) = rest.strip_prefix("../") {
        parent_depth += 1;
        rest = r;
    }
    if rest == ".." {
        parent_depth += 1;
        rest = "";
    }

    let mut data = None;
    if let Some(r) = rest.strip_prefix('@') {
        let (name, tail) = r.split_once('.').unwrap_or((r, ""));
        if name.is_empty() {
            return Err(TemplateError::syntax("empty data variable", offset));
        }
        data = Some(name.to_string());
        rest = tail;
    } else if rest == "this" || rest == "." {
        rest = "";
    } else if let Some(r) = rest
        .strip_prefix("this.")
        .or_else(|| rest.strip_prefix("this/"))
        .or_else(|| rest.strip_prefix("./"))
    {
        rest = r;
    }

    let segments: Vec<String> = rest
        .split(['.', '/'])
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if segments.iter().any(|s| s == "..") {
        return Err(TemplateError::syntax(
            format!("`..` is only allowed as a path prefix: {token}"),
            offset,
        ));
    }
    Ok(PathExpr {
        parent_depth,
        data,
        segments,
    })
}

// ---------------------------------------------------------------------------
// Block structure
// ---------------------------------------------------------------------------

struct OpenBlock {
    name: String,
    expr: Expression,
    offset: usize,
    body: Vec<Node>,
    inverse: Option<Vec<Node>>,
    /// Opened by `{{else if ...}}`; closed together with its parent.
    chained: bool,
}

impl OpenBlock {
    fn current(&mut self) -> &mut Vec<Node> {
        match &mut self.inverse {
            Some(inverse) => inverse,
            None => &mut self.body,
        }
    }

    fn into_node(self) -> Node {
        let otherwise = self.inverse.unwrap_or_default();
        match self.name.as_str() {
            "each" => Node::Each {
                target: self.expr,
                body: self.body,
                otherwise,
            },
            "with" => Node::With {
                target: self.expr,
                body: self.body,
                otherwise,
            },
            name => Node::Conditional {
                condition: self.expr,
                negate: name == "unless",
                then: self.body,
                otherwise,
            },
        }
    }
}

const BLOCK_HELPERS: &[&str] = &["if", "unless", "each", "with"];

fn open_block(src: &str, offset: usize, chained: bool) -> TemplateResult<OpenBlock> {
    let src = src.trim();
    let (name, args) = src.split_once(char::is_whitespace).unwrap_or((src, ""));
    if !BLOCK_HELPERS.contains(&name) {
        return Err(TemplateError::syntax(
            format!("unknown block helper `{name}`"),
            offset,
        ));
    }
    if args.trim().is_empty() {
        return Err(TemplateError::syntax(
            format!("`{{{{#{name}}}}}` needs an argument"),
            offset,
        ));
    }
    Ok(OpenBlock {
        name: name.to_string(),
        expr: parse_expression(args, offset)?,
        offset,
        body: Vec::new(),
        inverse: None,
        chained,
    })
}

fn current<'a>(stack: &'a mut [OpenBlock], root: &'a mut Vec<Node>) -> &'a mut Vec<Node> {
    match stack.last_mut() {
        Some(block) => block.current(),
        None => root,
    }
}

/// Parse template text into a node list.
pub fn parse(src: &str) -> TemplateResult<Vec<Node>> {
    let mut root = Vec::new();
    let mut stack: Vec<OpenBlock> = Vec::new();

    for token in tokenize(src)? {
        let (body, raw, offset) = match token {
            Token::Text(text) => {
                current(&mut stack, &mut root).push(Node::Text(text.to_string()));
                continue;
            }
            Token::Tag { body, raw, offset } => (body.trim(), raw, offset),
        };

        if body.is_empty() {
            return Err(TemplateError::syntax("empty tag", offset));
        }
        if raw {
            let expr = parse_expression(body, offset)?;
            current(&mut stack, &mut root).push(Node::Output {
                expr,
                escape: false,
            });
            continue;
        }

        if let Some(open) = body.strip_prefix('#') {
            stack.push(open_block(open, offset, false)?);
        } else if let Some(name) = body.strip_prefix('/') {
            close_block(name.trim(), offset, &mut stack, &mut root)?;
        } else if body == "else" || body.starts_with("else ") {
            let block = stack
                .last_mut()
                .ok_or_else(|| TemplateError::syntax("`{{else}}` outside of a block", offset))?;
            if block.inverse.is_some() {
                return Err(TemplateError::syntax("duplicate `{{else}}`", offset));
            }
            block.inverse = Some(Vec::new());
            let chain = body["else".len()..].trim();
            if !chain.is_empty() {
                stack.push(open_block(chain, offset, true)?);
            }
        } else if body.starts_with('>') {
            return Err(TemplateError::syntax("partials are not supported", offset));
        } else if let Some(unescaped) = body.strip_prefix('&') {
            let expr = parse_expression(unescaped, offset)?;
            current(&mut stack, &mut root).push(Node::Output {
                expr,
                escape: false,
            });
        } else {
            let expr = parse_expression(body, offset)?;
            current(&mut stack, &mut root).push(Node::Output { expr, escape: true });
        }
    }

    if let Some(block) = stack.last() {
        return Err(TemplateError::syntax(
            format!("unclosed `{{{{#{}}}}}`", block.name),
            block.offset,
        ));
    }
    Ok(root)
}

fn close_block(
    name: &str,
    offset: usize,
    stack: &mut Vec<OpenBlock>,
    root: &mut Vec<Node>,
) -> TemplateResult<()> {
    let mut block = stack
        .pop()
        .ok_or_else(|| TemplateError::syntax(format!("unexpected `{{{{/{name}}}}}`"), offset))?;
    if block.name != name {
        return Err(TemplateError::syntax(
            format!(
                "`{{{{/{name}}}}}` does not match `{{{{#{}}}}}`",
                block.name
            ),
            offset,
        ));
    }
    loop {
        let chained = block.chained;
        let node = block.into_node();
        if !chained {
            current(stack, root).push(node);
            return Ok(());
        }
        let mut parent = stack
            .pop()
            .ok_or_else(|| TemplateError::syntax("dangling `{{else if}}`", offset))?;
        parent.current().push(node);
        block = parent;
    }
}
