//! Instrument condition and meter-value expressions.
//!
//! A small expression language over a captured [`ContextMap`]:
//!
//! ```text
//! count > 10 && name.startsWith('job-')
//! localVariables[items].size() >= 3 or fields[enabled]
//! #elapsed / 1000.0 > 1.5
//! ```
//!
//! Bare identifiers resolve as a local, then an instance field, then a static
//! field. `localVariables[x]`, `fields[x]` and `staticFields[x]` address one
//! scope and yield `null` when `x` was not captured. Property access reads an
//! instance field of the receiver through the [`Heap`].

mod eval;
mod lexer;
mod parser;

use crate::context::ContextMap;
use crate::heap::{Heap, HeapError};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConditionError {
    #[error("parse error at {position}: {message}")]
    Parse { position: usize, message: String },
    #[error("unknown variable {0:?}")]
    UnknownVariable(String),
    #[error("type error: {0}")]
    Type(String),
    #[error("division by zero")]
    DivideByZero,
    #[error(transparent)]
    Heap(#[from] HeapError),
}

impl ConditionError {
    pub(crate) fn parse(position: usize, message: impl Into<String>) -> Self {
        ConditionError::Parse { position, message: message.into() }
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        ConditionError::Type(message.into())
    }
}

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue<R> {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Object(R),
}

impl<R> ExprValue<R> {
    pub fn type_name(&self) -> &'static str {
        match self {
            ExprValue::Null => "null",
            ExprValue::Bool(_) => "boolean",
            ExprValue::Int(_) => "integer",
            ExprValue::Float(_) => "decimal",
            ExprValue::Str(_) => "string",
            ExprValue::Object(_) => "object",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ExprValue::Int(v) => Some(*v as f64),
            ExprValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

/// A parsed expression, kept together with its source text.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    root: parser::Expr,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let tokens = lexer::tokenize(source)?;
        let root = parser::Parser::new(&tokens, source.len()).parse()?;
        Ok(Expression { source: source.to_string(), root })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates as a condition; anything other than a boolean is an error.
    pub fn evaluate<H: Heap>(&self, context: &ContextMap<H::Ref>, heap: &H) -> Result<bool, ConditionError> {
        match self.evaluate_value(context, heap)? {
            ExprValue::Bool(b) => Ok(b),
            other => Err(ConditionError::type_error(format!(
                "condition must be boolean, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn evaluate_value<H: Heap>(
        &self,
        context: &ContextMap<H::Ref>,
        heap: &H,
    ) -> Result<ExprValue<H::Ref>, ConditionError> {
        eval::Evaluator { context, heap }.eval(&self.root)
    }

    /// Evaluates and renders the result the way `String.valueOf` would.
    pub fn evaluate_display<H: Heap>(&self, context: &ContextMap<H::Ref>, heap: &H) -> Result<String, ConditionError> {
        display_value(heap, &self.evaluate_value(context, heap)?)
    }
}

/// Renders an evaluation result the way `String.valueOf` would.
pub fn display_value<H: Heap>(heap: &H, value: &ExprValue<H::Ref>) -> Result<String, ConditionError> {
    eval::display(heap, value)
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
