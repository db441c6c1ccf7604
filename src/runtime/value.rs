//! Runtime values

use crate::error::{QuantError, Result};
use crate::module::ModuleId;
use crate::tensor::{DType, QTensor, Tensor};

/// A value bound to a graph value during interpretation
#[derive(Clone, Debug)]
pub enum Value {
    Tensor(Tensor),
    QTensor(QTensor),
    Float(f64),
    Int(i64),
    Bool(bool),
    IntList(Vec<i64>),
    DType(DType),
    None,
    /// Module instance in the model arena
    Module(ModuleId),
    /// Observer attribute `name` of `module`
    Observer { module: ModuleId, name: String },
}

impl Value {
    /// Kind name for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Tensor(_) => "Tensor",
            Value::QTensor(_) => "QTensor",
            Value::Float(_) => "float",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::IntList(_) => "int[]",
            Value::DType(_) => "ScalarType",
            Value::None => "None",
            Value::Module(_) => "Module",
            Value::Observer { .. } => "Observer",
        }
    }

    fn mismatch(&self, op: &str, expected: &str) -> QuantError {
        QuantError::execution(op, format!("expected {expected}, got {}", self.kind()))
    }

    pub fn as_tensor(&self, op: &str) -> Result<&Tensor> {
        match self {
            Value::Tensor(t) => Ok(t),
            other => Err(other.mismatch(op, "Tensor")),
        }
    }

    /// Tensor or `None` (optional bias)
    pub fn as_optional_tensor(&self, op: &str) -> Result<Option<&Tensor>> {
        match self {
            Value::Tensor(t) => Ok(Some(t)),
            Value::None => Ok(None),
            other => Err(other.mismatch(op, "Tensor or None")),
        }
    }

    pub fn as_qtensor(&self, op: &str) -> Result<&QTensor> {
        match self {
            Value::QTensor(q) => Ok(q),
            other => Err(other.mismatch(op, "QTensor")),
        }
    }

    pub fn as_float(&self, op: &str) -> Result<f64> {
        match self {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            other => Err(other.mismatch(op, "float")),
        }
    }

    pub fn as_int(&self, op: &str) -> Result<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(other.mismatch(op, "int")),
        }
    }

    pub fn as_bool(&self, op: &str) -> Result<bool> {
        match self {
            Value::Bool(v) => Ok(*v),
            other => Err(other.mismatch(op, "bool")),
        }
    }

    pub fn as_int_list(&self, op: &str) -> Result<&[i64]> {
        match self {
            Value::IntList(v) => Ok(v),
            other => Err(other.mismatch(op, "int[]")),
        }
    }

    pub fn as_dtype(&self, op: &str) -> Result<DType> {
        match self {
            Value::DType(d) => Ok(*d),
            other => Err(other.mismatch(op, "ScalarType")),
        }
    }

    /// Unwrap a float tensor result
    pub fn into_tensor(self, op: &str) -> Result<Tensor> {
        match self {
            Value::Tensor(t) => Ok(t),
            other => Err(other.mismatch(op, "Tensor")),
        }
    }
}

impl From<Tensor> for Value {
    fn from(t: Tensor) -> Self {
        Value::Tensor(t)
    }
}
