// Operator code.
//
// Closures cannot be persisted, so an operator record stores an
// `ExecutableRef`: either the name of code registered in this process's
// `ExecutableRegistry`, or an `Expr` tree that can be evaluated anywhere.

use crate::error::BoxError;
use crate::types::{OperatorResult, Payload};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Code run for one operator, given its predecessors' results in dependency order
#[async_trait::async_trait]
pub trait Executable: Send + Sync {
    async fn call(&self, inputs: &[OperatorResult]) -> Result<Payload, BoxError>;
}

#[async_trait::async_trait]
impl<F> Executable for F
where
    F: Fn(&[OperatorResult]) -> Result<Payload, BoxError> + Send + Sync,
{
    async fn call(&self, inputs: &[OperatorResult]) -> Result<Payload, BoxError> {
        (self)(inputs)
    }
}

/// Persisted reference to an operator's code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutableRef {
    /// Code registered under `name` in the running process
    Registered { name: String },
    /// Self-contained expression evaluated over the inputs
    Expression { expr: Expr },
}

impl ExecutableRef {
    pub fn registered(name: impl Into<String>) -> Self {
        Self::Registered { name: name.into() }
    }

    pub fn expression(expr: Expr) -> Self {
        Self::Expression { expr }
    }
}

/// Process-local table of named executables
#[derive(Clone, Default)]
pub struct ExecutableRegistry {
    executables: Arc<RwLock<HashMap<String, Arc<dyn Executable>>>>,
}

impl ExecutableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the executable behind `name`
    pub fn register(&self, name: impl Into<String>, executable: Arc<dyn Executable>) {
        let name = name.into();
        tracing::debug!(name = %name, "Registered executable");
        self.executables
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name, executable);
    }

    /// Register a plain closure under `name`
    pub fn register_fn<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&[OperatorResult]) -> Result<Payload, BoxError> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Executable>> {
        self.executables
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// Errors raised while evaluating an [`Expr`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("Input {index} requested but only {available} inputs were supplied")]
    MissingInput { index: usize, available: usize },

    #[error("Expected a number, got {0}")]
    NotANumber(Value),

    #[error("Arithmetic overflow")]
    Overflow,
}

/// Arithmetic expression over an operator's inputs
///
/// Integers stay integers; any float operand makes the result a float.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// Literal value
    Const(Value),
    /// Payload of the input at this position
    Input(usize),
    /// Sum of every input payload
    SumInputs,
    Add(Vec<Expr>),
    Mul(Vec<Expr>),
    Sub(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn evaluate(&self, inputs: &[OperatorResult]) -> Result<Value, ExprError> {
        match self {
            Self::Const(value) => Ok(value.clone()),
            Self::Input(index) => inputs
                .get(*index)
                .map(|r| r.payload.clone())
                .ok_or(ExprError::MissingInput {
                    index: *index,
                    available: inputs.len(),
                }),
            Self::SumInputs => fold(inputs.iter().map(|r| Ok(r.payload.clone())), Number::add),
            Self::Add(terms) => fold(terms.iter().map(|t| t.evaluate(inputs)), Number::add),
            Self::Mul(factors) => fold_from(
                Number::Int(1),
                factors.iter().map(|f| f.evaluate(inputs)),
                Number::mul,
            ),
            Self::Sub(lhs, rhs) => {
                let lhs = Number::from_value(&lhs.evaluate(inputs)?)?;
                let rhs = Number::from_value(&rhs.evaluate(inputs)?)?;
                lhs.sub(rhs).and_then(Number::into_value)
            }
        }
    }
}

fn fold<I>(
    values: I,
    op: fn(Number, Number) -> Result<Number, ExprError>,
) -> Result<Value, ExprError>
where
    I: Iterator<Item = Result<Value, ExprError>>,
{
    fold_from(Number::Int(0), values, op)
}

fn fold_from<I>(
    init: Number,
    values: I,
    op: fn(Number, Number) -> Result<Number, ExprError>,
) -> Result<Value, ExprError>
where
    I: Iterator<Item = Result<Value, ExprError>>,
{
    let mut acc = init;
    for value in values {
        acc = op(acc, Number::from_value(&value?)?)?;
    }
    acc.into_value()
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn from_value(value: &Value) -> Result<Self, ExprError> {
        if let Some(i) = value.as_i64() {
            Ok(Self::Int(i))
        } else if let Some(f) = value.as_f64() {
            Ok(Self::Float(f))
        } else {
            Err(ExprError::NotANumber(value.clone()))
        }
    }

    fn into_value(self) -> Result<Value, ExprError> {
        match self {
            Self::Int(i) => Ok(Value::from(i)),
            Self::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .ok_or(ExprError::Overflow),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }

    fn add(self, other: Self) -> Result<Self, ExprError> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => {
                a.checked_add(b).map(Self::Int).ok_or(ExprError::Overflow)
            }
            (a, b) => Ok(Self::Float(a.as_f64() + b.as_f64())),
        }
    }

    fn sub(self, other: Self) -> Result<Self, ExprError> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => {
                a.checked_sub(b).map(Self::Int).ok_or(ExprError::Overflow)
            }
            (a, b) => Ok(Self::Float(a.as_f64() - b.as_f64())),
        }
    }

    fn mul(self, other: Self) -> Result<Self, ExprError> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => {
                a.checked_mul(b).map(Self::Int).ok_or(ExprError::Overflow)
            }
            (a, b) => Ok(Self::Float(a.as_f64() * b.as_f64())),
        }
    }
}
