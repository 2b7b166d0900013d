//! JMESPath-style path expressions and `{{ expr }}` template rendering used
//! throughout Meadow plans and mapping definitions.
//!
//! Expressions and templates are parsed once, at plan-/mapping-load time,
//! into a [`CompiledExpr`] / [`CompiledTemplate`] and then evaluated many
//! times against different [`serde_json::Value`] contexts.

mod ast;
mod error;
mod eval;
mod functions;
mod lexer;
mod parser;
mod template;

pub use error::ExprError;
pub use template::{render_template, CompiledTemplate};

use ast::Expr;
use parser::Parser;
use serde_json::Value;

/// A parsed path expression, ready to be evaluated against any number of
/// contexts without re-parsing.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    ast: Expr,
}

impl CompiledExpr {
    pub fn compile(src: &str) -> Result<Self, ExprError> {
        Ok(Self {
            ast: Parser::parse(src)?,
        })
    }

    pub fn evaluate(&self, ctx: &Value) -> Result<Value, ExprError> {
        eval::eval(&self.ast, ctx)
    }

    pub fn evaluate_bool(&self, ctx: &Value) -> Result<bool, ExprError> {
        self.evaluate(ctx).map(|v| eval::truthy(&v))
    }

    /// Evaluates the expression and coerces the result into a `Vec<Value>`:
    /// an array result is returned as-is; `null` or anything else that isn't
    /// an array becomes an empty vec. Used for fan-out sources, where a
    /// plan author's `iterate_over` is expected to resolve to a list.
    pub fn evaluate_slice(&self, ctx: &Value) -> Result<Vec<Value>, ExprError> {
        match self.evaluate(ctx)? {
            Value::Array(items) => Ok(items),
            _ => Ok(Vec::new()),
        }
    }
}

/// One-shot compile + evaluate, for call sites that don't reuse the
/// expression across invocations (prefer [`CompiledExpr::compile`] when the
/// expression is evaluated repeatedly, e.g. once per fan-out item).
pub fn evaluate(src: &str, ctx: &Value) -> Result<Value, ExprError> {
    CompiledExpr::compile(src)?.evaluate(ctx)
}

pub fn evaluate_bool(src: &str, ctx: &Value) -> Result<bool, ExprError> {
    CompiledExpr::compile(src)?.evaluate_bool(ctx)
}

pub fn evaluate_slice(src: &str, ctx: &Value) -> Result<Vec<Value>, ExprError> {
    CompiledExpr::compile(src)?.evaluate_slice(ctx)
}

/// Syntax-only validation, used at plan/mapping load time to reject bad
/// expressions before any job ever runs.
pub fn validate(src: &str) -> Result<(), ExprError> {
    CompiledExpr::compile(src).map(|_| ())
}
