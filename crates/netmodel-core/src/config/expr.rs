//! Parametrized command and environment expressions.
//!
//! An expression is literal text with `%{name}` substitutions, evaluated
//! against the method call it is used for. `%%` stands for a literal `%`.
//!
//! Command expressions are evaluated with [`FormatExpr::evaluate_command`],
//! which shell-quotes every substituted value: call arguments end up in the
//! context verbatim and the result is run by `/bin/sh -c`.

use crate::ipc::MethodCall;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Expression syntax errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExprError {
    #[error("unterminated substitution at offset {0}")]
    Unterminated(usize),

    #[error("empty substitution at offset {0}")]
    EmptyName(usize),

    #[error("value of %{{{0}}} cannot be quoted for the shell")]
    Unquotable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(String),
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatExpr {
    source: String,
    segments: Vec<Segment>,
}

impl FormatExpr {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((offset, c)) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            match chars.peek() {
                Some((_, '%')) => {
                    chars.next();
                    literal.push('%');
                }
                Some((_, '{')) => {
                    chars.next();
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(ExprError::Unterminated(offset));
                    }
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(ExprError::EmptyName(offset));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Var(name.to_string()));
                }
                _ => literal.push('%'),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Original expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, context: &EvalContext) -> String {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Var(name) => match context.get(name) {
                    Some(value) => out.push_str(value),
                    None => debug!(variable = %name, expr = %self.source, "undefined expression variable"),
                },
            }
        }
        out
    }

    /// Evaluates a command line. Literal text is kept as written; each
    /// substituted value becomes a single shell word.
    pub fn evaluate_command(&self, context: &EvalContext) -> Result<String, ExprError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Var(name) => match context.get(name) {
                    Some(value) => {
                        let quoted = shlex::try_quote(value)
                            .map_err(|_| ExprError::Unquotable(name.clone()))?;
                        out.push_str(&quoted);
                    }
                    None => debug!(variable = %name, expr = %self.source, "undefined expression variable"),
                },
            }
        }
        Ok(out)
    }
}

impl FromStr for FormatExpr {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FormatExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Variables available while evaluating an expression.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    vars: HashMap<String, String>,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for a method call: `path`, `interface`, `method`, `name`
    /// and one `argN` per argument.
    pub fn for_call(call: &MethodCall) -> Self {
        let name = call.path.rsplit('/').next().unwrap_or_default();
        let mut context = Self::new()
            .with("path", &call.path)
            .with("interface", &call.interface)
            .with("method", &call.member)
            .with("name", name);
        for (i, arg) in call.args.iter().enumerate() {
            let value = match arg {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            context.set(format!("arg{i}"), value);
        }
        context
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}
