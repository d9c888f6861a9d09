//! A reference interpreter for expression DAGs.
//!
//! The interpreter evaluates an expression with `f64` arithmetic given values for its free
//! variables. It is not meant to be fast; it exists to check symbolic constructions
//! against hand-computed numbers. Each shared node is evaluated once.
use crate::expr::{Expr, Node};
use crate::ShapeError;
use nalgebra::storage::Storage;
use nalgebra::{DMatrix, Dim, Matrix};
use rustc_hash::FxHashMap;
use std::error::Error;
use std::fmt;
use std::fmt::Display;

/// A dense tensor of numbers, stored in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl Value {
    pub fn new(shape: &[usize], data: Vec<f64>) -> Result<Self, ShapeError> {
        let shape = shape.to_vec();
        let expected = shape.iter().product();
        if data.len() != expected {
            return Err(ShapeError::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn scalar(value: f64) -> Self {
        Self {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    /// A rank-1 value.
    pub fn from_slice(values: &[f64]) -> Self {
        Self {
            shape: vec![values.len()],
            data: values.to_vec(),
        }
    }

    /// A rank-2 value with the shape of the matrix.
    pub fn from_matrix<R, C, S>(matrix: &Matrix<f64, R, C, S>) -> Self
    where
        R: Dim,
        C: Dim,
        S: Storage<f64, R, C>,
    {
        let (nrows, ncols) = matrix.shape();
        let data = (0..nrows)
            .flat_map(|i| (0..ncols).map(move |j| matrix[(i, j)]))
            .collect();
        Self {
            shape: vec![nrows, ncols],
            data,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn as_scalar(&self) -> Option<f64> {
        self.shape.is_empty().then(|| self.data[0])
    }

    /// Converts a rank-2 value to a matrix. Returns `None` for any other rank.
    pub fn to_matrix(&self) -> Option<DMatrix<f64>> {
        match self.shape.as_slice() {
            &[nrows, ncols] => Some(DMatrix::from_row_slice(nrows, ncols, &self.data)),
            _ => None,
        }
    }

    fn component(&self, multiindex: &[usize]) -> f64 {
        let flat = multiindex
            .iter()
            .zip(&self.shape)
            .fold(0, |flat, (i, n)| flat * n + i);
        self.data[flat]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationError {
    /// The expression depends on a variable with no bound value.
    UnboundVariable(String),
    /// The bound value does not have the shape the variable was declared with.
    BindingShapeMismatch {
        name: String,
        declared: Vec<usize>,
        bound: Vec<usize>,
    },
}

impl Display for EvaluationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnboundVariable(name) => write!(f, "No value bound to variable {}", name),
            Self::BindingShapeMismatch { name, declared, bound } => {
                write!(
                    f,
                    "Variable {} is declared with shape {:?}, but the bound value has shape {:?}",
                    name, declared, bound
                )
            }
        }
    }
}

impl Error for EvaluationError {}

/// Evaluates expressions given values for their variables.
#[derive(Debug, Clone, Default)]
pub struct Interpreter {
    bindings: FxHashMap<String, Value>,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: impl Into<String>, value: Value) -> Self {
        self.bindings.insert(name.into(), value);
        self
    }

    pub fn evaluate(&self, expr: &Expr) -> Result<Value, EvaluationError> {
        let mut cache = FxHashMap::default();
        self.evaluate_cached(expr, &mut cache)
    }

    fn evaluate_cached(&self, expr: &Expr, cache: &mut FxHashMap<*const Node, Value>) -> Result<Value, EvaluationError> {
        if let Some(value) = cache.get(&expr.as_ptr()) {
            return Ok(value.clone());
        }

        let scalar = |e: &Expr, cache: &mut FxHashMap<*const Node, Value>| -> Result<f64, EvaluationError> {
            Ok(self.evaluate_cached(e, cache)?.data[0])
        };

        let value = match expr.node() {
            Node::Literal(value) => Value::scalar(value.into_inner()),
            Node::Variable { name, shape } => {
                let value = self
                    .bindings
                    .get(name)
                    .ok_or_else(|| EvaluationError::UnboundVariable(name.clone()))?;
                if value.shape() != shape.as_slice() {
                    return Err(EvaluationError::BindingShapeMismatch {
                        name: name.clone(),
                        declared: shape.clone(),
                        bound: value.shape().to_vec(),
                    });
                }
                value.clone()
            }
            Node::Indexed { tensor, multiindex } => {
                let tensor = self.evaluate_cached(tensor, cache)?;
                Value::scalar(tensor.component(multiindex))
            }
            Node::Sum(a, b) => Value::scalar(scalar(a, cache)? + scalar(b, cache)?),
            Node::Product(a, b) => Value::scalar(scalar(a, cache)? * scalar(b, cache)?),
            Node::Division(a, b) => Value::scalar(scalar(a, cache)? / scalar(b, cache)?),
            Node::Power { base, exponent } => Value::scalar(scalar(base, cache)?.powi(*exponent)),
            Node::ListTensor(array) => {
                let data = array
                    .iter()
                    .map(|element| scalar(element, cache))
                    .collect::<Result<Vec<_>, _>>()?;
                Value {
                    shape: array.shape().to_vec(),
                    data,
                }
            }
        };

        cache.insert(expr.as_ptr(), value.clone());
        Ok(value)
    }
}
