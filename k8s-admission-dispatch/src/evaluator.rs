// Copyright 2024 The Kubernetes Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Expression evaluation capability used by match conditions and policies.
//!
//! The dispatch core never interprets expressions itself; it hands them to an
//! [`Evaluator`] together with an [`Activation`] holding the request data.
//! [`SimpleEvaluator`] understands a small boolean language and is meant for
//! tests and bootstrapping.

use crate::admission::Attributes;
use serde_json::{json, Value};
use thiserror::Error;

/// Errors produced while compiling or evaluating an expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("compilation failed: {0}")]
    Compile(String),

    #[error("{0}")]
    Runtime(String),

    #[error("expression '{0}' did not evaluate to a boolean")]
    NotBoolean(String),
}

/// Variables visible to an expression.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Activation {
    pub object: Value,
    pub old_object: Value,
    pub request: Value,
    pub params: Value,
}

impl Activation {
    pub fn from_attributes(attr: &dyn Attributes) -> Self {
        let resource = attr.get_resource();
        let kind = attr.get_kind();
        let request = json!({
            "kind": {"group": kind.group, "version": kind.version, "kind": kind.kind},
            "resource": {"group": resource.group, "version": resource.version, "resource": resource.resource},
            "subResource": attr.get_subresource(),
            "name": attr.get_name(),
            "namespace": attr.get_namespace(),
            "operation": attr.get_operation().to_string(),
            "userInfo": attr.get_user_info(),
            "dryRun": attr.is_dry_run(),
            "options": attr.get_operation_options().cloned().unwrap_or(Value::Null),
        });
        Self {
            object: attr.get_object().cloned().unwrap_or(Value::Null),
            old_object: attr.get_old_object().cloned().unwrap_or(Value::Null),
            request,
            params: Value::Null,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    fn root(&self, name: &str) -> Option<&Value> {
        match name {
            "object" => Some(&self.object),
            "oldObject" => Some(&self.old_object),
            "request" => Some(&self.request),
            "params" => Some(&self.params),
            _ => None,
        }
    }

    /// Resolves a dotted path such as `object.metadata.name`.
    pub fn resolve(&self, path: &str) -> Result<&Value, EvaluationError> {
        let mut segments = path.split('.');
        let root = segments.next().unwrap_or_default();
        let mut current = self
            .root(root)
            .ok_or_else(|| EvaluationError::Compile(format!("undeclared reference to '{}'", root)))?;
        for segment in segments {
            current = current
                .get(segment)
                .filter(|v| !v.is_null())
                .ok_or_else(|| EvaluationError::Runtime(format!("no such key: {}", segment)))?;
        }
        Ok(current)
    }
}

/// Evaluator compiles and evaluates expressions against an activation.
pub trait Evaluator: Send + Sync {
    /// Checks an expression without evaluating it.
    fn compile(&self, expression: &str) -> Result<(), EvaluationError> {
        let _ = expression;
        Ok(())
    }

    fn evaluate(&self, expression: &str, activation: &Activation) -> Result<Value, EvaluationError>;

    fn evaluate_bool(&self, expression: &str, activation: &Activation) -> Result<bool, EvaluationError> {
        match self.evaluate(expression, activation)? {
            Value::Bool(b) => Ok(b),
            _ => Err(EvaluationError::NotBoolean(expression.to_string())),
        }
    }
}

// ============================================================================
// SimpleEvaluator
// ============================================================================

/// SimpleEvaluator supports boolean literals, `!`, `&&`, `||`, parentheses,
/// `has(path)` and `==`/`!=` between paths and literals.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleEvaluator;

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Path(String),
    Has(String),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Equals(Box<Expr>, Box<Expr>, bool),
}

impl Evaluator for SimpleEvaluator {
    fn compile(&self, expression: &str) -> Result<(), EvaluationError> {
        parse(expression).map(|_| ())
    }

    fn evaluate(&self, expression: &str, activation: &Activation) -> Result<Value, EvaluationError> {
        parse(expression)?.eval(activation)
    }
}

impl Expr {
    fn eval(&self, activation: &Activation) -> Result<Value, EvaluationError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Path(path) => activation.resolve(path).cloned(),
            Expr::Has(path) => match activation.resolve(path) {
                Ok(_) => Ok(Value::Bool(true)),
                Err(EvaluationError::Runtime(_)) => Ok(Value::Bool(false)),
                Err(err) => Err(err),
            },
            Expr::Not(inner) => Ok(Value::Bool(!inner.eval_bool(activation)?)),
            Expr::And(terms) => {
                for term in terms {
                    if !term.eval_bool(activation)? {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Expr::Or(terms) => {
                for term in terms {
                    if term.eval_bool(activation)? {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Expr::Equals(lhs, rhs, negate) => {
                let equal = lhs.eval(activation)? == rhs.eval(activation)?;
                Ok(Value::Bool(equal != *negate))
            }
        }
    }

    fn eval_bool(&self, activation: &Activation) -> Result<bool, EvaluationError> {
        match self.eval(activation)? {
            Value::Bool(b) => Ok(b),
            other => Err(EvaluationError::Runtime(format!(
                "no such overload: expected bool, got {}",
                other
            ))),
        }
    }
}

fn parse(expression: &str) -> Result<Expr, EvaluationError> {
    let expr = expression.trim();
    if expr.is_empty() {
        return Err(EvaluationError::Compile("empty expression".to_string()));
    }
    check_balanced(expr)?;

    let terms = split_top_level(expr, "||");
    if terms.len() > 1 {
        return Ok(Expr::Or(terms.into_iter().map(parse).collect::<Result<_, _>>()?));
    }
    let terms = split_top_level(expr, "&&");
    if terms.len() > 1 {
        return Ok(Expr::And(terms.into_iter().map(parse).collect::<Result<_, _>>()?));
    }
    for (op, negate) in [("==", false), ("!=", true)] {
        let sides = split_top_level(expr, op);
        if sides.len() == 2 {
            return Ok(Expr::Equals(
                Box::new(parse(sides[0])?),
                Box::new(parse(sides[1])?),
                negate,
            ));
        }
        if sides.len() > 2 {
            return Err(EvaluationError::Compile(format!("chained '{}' in '{}'", op, expr)));
        }
    }
    if let Some(rest) = expr.strip_prefix('!') {
        return Ok(Expr::Not(Box::new(parse(rest)?)));
    }
    if expr.starts_with('(') && expr.ends_with(')') && wraps_whole(expr) {
        return parse(&expr[1..expr.len() - 1]);
    }
    if let Some(inner) = expr.strip_prefix("has(").and_then(|s| s.strip_suffix(')')) {
        let path = inner.trim();
        validate_path(path)?;
        return Ok(Expr::Has(path.to_string()));
    }
    if let Some(literal) = parse_literal(expr) {
        return Ok(Expr::Literal(literal));
    }
    validate_path(expr)?;
    Ok(Expr::Path(expr.to_string()))
}

fn parse_literal(expr: &str) -> Option<Value> {
    match expr {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        "null" => return Some(Value::Null),
        _ => {}
    }
    for quote in ['\'', '"'] {
        if expr.len() >= 2 && expr.starts_with(quote) && expr.ends_with(quote) {
            return Some(Value::String(expr[1..expr.len() - 1].to_string()));
        }
    }
    if let Ok(i) = expr.parse::<i64>() {
        return Some(json!(i));
    }
    expr.parse::<f64>().ok().map(|f| json!(f))
}

fn validate_path(path: &str) -> Result<(), EvaluationError> {
    let valid_chars = path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if path.is_empty() || !valid_chars || path.split('.').any(str::is_empty) {
        return Err(EvaluationError::Compile(format!("syntax error in '{}'", path)));
    }
    let root = path.split('.').next().unwrap_or_default();
    match root {
        "object" | "oldObject" | "request" | "params" => Ok(()),
        _ => Err(EvaluationError::Compile(format!("undeclared reference to '{}'", root))),
    }
}

fn check_balanced(expr: &str) -> Result<(), EvaluationError> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for c in expr.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth -= 1;
                if depth < 0 {
                    break;
                }
            }
            _ => {}
        }
    }
    if depth != 0 || quote.is_some() {
        return Err(EvaluationError::Compile(format!("unbalanced expression '{}'", expr)));
    }
    Ok(())
}

/// True when the opening parenthesis at index 0 closes at the last byte.
fn wraps_whole(expr: &str) -> bool {
    let mut depth = 0;
    let mut quote: Option<char> = None;
    for (i, c) in expr.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth -= 1;
                if depth == 0 {
                    return i == expr.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

/// Splits on `op` outside quotes and parentheses.
fn split_top_level<'a>(expr: &'a str, op: &str) -> Vec<&'a str> {
    let bytes = expr.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'(' => depth += 1,
                b')' => depth -= 1,
                _ if depth == 0 && bytes[i..].starts_with(op.as_bytes()) => {
                    parts.push(expr[start..i].trim());
                    i += op.len();
                    start = i;
                    continue;
                }
                _ => {}
            },
        }
        i += 1;
    }
    parts.push(expr[start..].trim());
    parts
}
