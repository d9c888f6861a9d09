//! Expression nodes and arrays of expressions.
use crate::ShapeError;
use itertools::Itertools;
use nalgebra::DMatrix;
use ordered_float::OrderedFloat;
use rustc_hash::FxHashSet;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Div, Mul};
use std::sync::Arc;

/// A handle to an immutable expression node.
///
/// Cloning an `Expr` only clones the handle, so subexpressions are freely shared between
/// many parents. Equality and hashing are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Expr(Arc<Node>);

/// The closed set of expression kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Node {
    /// A scalar constant.
    Literal(OrderedFloat<f64>),
    /// An opaque tensor supplied from outside the expression, identified by name.
    Variable { name: String, shape: Vec<usize> },
    /// A scalar component of a tensor-valued expression.
    Indexed { tensor: Expr, multiindex: Vec<usize> },
    Sum(Expr, Expr),
    Product(Expr, Expr),
    Division(Expr, Expr),
    Power { base: Expr, exponent: i32 },
    /// Scalar expressions packed into a single tensor-valued expression.
    ListTensor(ExprArray),
}

impl Expr {
    fn from_node(node: Node) -> Self {
        Self(Arc::new(node))
    }

    pub fn node(&self) -> &Node {
        &self.0
    }

    pub(crate) fn as_ptr(&self) -> *const Node {
        Arc::as_ptr(&self.0)
    }

    pub fn literal(value: f64) -> Self {
        Self::from_node(Node::Literal(OrderedFloat(value)))
    }

    pub fn zero() -> Self {
        Self::literal(0.0)
    }

    pub fn one() -> Self {
        Self::literal(1.0)
    }

    /// A named tensor whose values are only known to whoever evaluates the expression.
    pub fn variable(name: impl Into<String>, shape: &[usize]) -> Self {
        Self::from_node(Node::Variable {
            name: name.into(),
            shape: shape.to_vec(),
        })
    }

    /// Selects the scalar component of `tensor` at `multiindex`.
    ///
    /// The multi-index must have exactly one entry per tensor axis, each within the
    /// extent of its axis. Indexing a list tensor returns the stored element itself.
    pub fn indexed(tensor: &Expr, multiindex: &[usize]) -> Result<Self, ShapeError> {
        let shape = tensor.shape();
        check_multiindex(multiindex, shape)?;
        match tensor.node() {
            _ if shape.is_empty() => Ok(tensor.clone()),
            Node::ListTensor(array) => Ok(array.at(multiindex).clone()),
            _ => Ok(Self::from_node(Node::Indexed {
                tensor: tensor.clone(),
                multiindex: multiindex.to_vec(),
            })),
        }
    }

    /// # Panics
    ///
    /// Panics if either operand is not scalar.
    pub fn sum(a: Expr, b: Expr) -> Self {
        assert_scalar_operands("sum", &a, &b);
        if a.is_zero() {
            b
        } else if b.is_zero() {
            a
        } else {
            Self::from_node(Node::Sum(a, b))
        }
    }

    /// Sums all terms, starting from zero.
    pub fn sum_all(terms: impl IntoIterator<Item = Expr>) -> Self {
        terms.into_iter().fold(Self::zero(), Self::sum)
    }

    /// # Panics
    ///
    /// Panics if either operand is not scalar.
    pub fn product(a: Expr, b: Expr) -> Self {
        assert_scalar_operands("product", &a, &b);
        if a.is_zero() || b.is_zero() {
            Self::zero()
        } else if a.is_one() {
            b
        } else if b.is_one() {
            a
        } else {
            Self::from_node(Node::Product(a, b))
        }
    }

    /// The denominator is assumed to be nonzero and is not checked.
    ///
    /// # Panics
    ///
    /// Panics if either operand is not scalar.
    pub fn division(numerator: Expr, denominator: Expr) -> Self {
        assert_scalar_operands("division", &numerator, &denominator);
        if numerator.is_zero() || denominator.is_one() {
            numerator
        } else {
            Self::from_node(Node::Division(numerator, denominator))
        }
    }

    /// # Panics
    ///
    /// Panics if the base is not scalar.
    pub fn power(base: Expr, exponent: i32) -> Self {
        assert!(base.is_scalar(), "Base of power must be scalar, got shape {:?}", base.shape());
        match exponent {
            0 => Self::one(),
            1 => base,
            _ if base.is_one() => base,
            _ if base.is_zero() && exponent > 0 => base,
            _ => Self::from_node(Node::Power { base, exponent }),
        }
    }

    /// Packs an array of scalar expressions into a tensor-valued expression with the
    /// shape of the array.
    pub fn list_tensor(array: ExprArray) -> Self {
        Self::from_node(Node::ListTensor(array))
    }

    pub fn shape(&self) -> &[usize] {
        match self.node() {
            Node::Variable { shape, .. } => shape,
            Node::ListTensor(array) => array.shape(),
            _ => &[],
        }
    }

    pub fn is_scalar(&self) -> bool {
        self.shape().is_empty()
    }

    pub fn as_literal(&self) -> Option<f64> {
        match self.node() {
            Node::Literal(value) => Some(value.into_inner()),
            _ => None,
        }
    }

    pub fn as_list_tensor(&self) -> Option<&ExprArray> {
        match self.node() {
            Node::ListTensor(array) => Some(array),
            _ => None,
        }
    }

    fn is_zero(&self) -> bool {
        self.as_literal() == Some(0.0)
    }

    fn is_one(&self) -> bool {
        self.as_literal() == Some(1.0)
    }

    /// The direct operands of this node.
    pub fn children(&self) -> Vec<&Expr> {
        match self.node() {
            Node::Literal(_) | Node::Variable { .. } => Vec::new(),
            Node::Indexed { tensor, .. } => vec![tensor],
            Node::Sum(a, b) | Node::Product(a, b) | Node::Division(a, b) => vec![a, b],
            Node::Power { base, .. } => vec![base],
            Node::ListTensor(array) => array.iter().collect(),
        }
    }

    /// The number of distinct nodes reachable from this expression.
    ///
    /// Shared subexpressions are counted once, so this is the size of the DAG rather than
    /// the size of the equivalent expression tree.
    pub fn node_count(&self) -> usize {
        self.visit_unique(|_| ())
    }

    /// Names of all variables the expression depends on.
    pub fn free_variables(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.visit_unique(|expr| {
            if let Node::Variable { name, .. } = expr.node() {
                names.insert(name.clone());
            }
        });
        names
    }

    fn visit_unique<'a>(&'a self, mut visitor: impl FnMut(&'a Expr)) -> usize {
        let mut visited = FxHashSet::default();
        let mut stack = vec![self];
        while let Some(expr) = stack.pop() {
            if visited.insert(expr.as_ptr()) {
                visitor(expr);
                stack.extend(expr.children());
            }
        }
        visited.len()
    }
}

fn assert_scalar_operands(operation: &str, a: &Expr, b: &Expr) {
    assert!(
        a.is_scalar() && b.is_scalar(),
        "Operands of {} must be scalar, got shapes {:?} and {:?}",
        operation,
        a.shape(),
        b.shape()
    );
}

fn check_multiindex(multiindex: &[usize], shape: &[usize]) -> Result<(), ShapeError> {
    if multiindex.len() != shape.len() {
        return Err(ShapeError::RankMismatch {
            expected: shape.len(),
            actual: multiindex.len(),
        });
    }
    if multiindex.iter().zip(shape).any(|(i, n)| i >= n) {
        return Err(ShapeError::IndexOutOfBounds {
            multiindex: multiindex.to_vec(),
            shape: shape.to_vec(),
        });
    }
    Ok(())
}

impl Add for Expr {
    type Output = Expr;

    fn add(self, rhs: Expr) -> Expr {
        Expr::sum(self, rhs)
    }
}

impl Mul for Expr {
    type Output = Expr;

    fn mul(self, rhs: Expr) -> Expr {
        Expr::product(self, rhs)
    }
}

impl Div for Expr {
    type Output = Expr;

    fn div(self, rhs: Expr) -> Expr {
        Expr::division(self, rhs)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node() {
            Node::Literal(value) => write!(f, "{}", value),
            Node::Variable { name, .. } => write!(f, "{}", name),
            Node::Indexed { tensor, multiindex } => write!(f, "{}[{}]", tensor, multiindex.iter().format(", ")),
            Node::Sum(a, b) => write!(f, "({} + {})", a, b),
            Node::Product(a, b) => write!(f, "({} * {})", a, b),
            Node::Division(a, b) => write!(f, "({} / {})", a, b),
            Node::Power { base, exponent } => write!(f, "{}^{}", base, exponent),
            Node::ListTensor(array) => write!(f, "{}", array),
        }
    }
}

/// A dense n-dimensional array of scalar expressions.
///
/// Elements live in shared storage addressed through per-axis strides, so relabelings
/// such as [`ExprArray::transpose`] never copy elements. Equality and hashing only
/// consider the shape and the elements in logical (row-major) order.
#[derive(Debug, Clone)]
pub struct ExprArray {
    data: Arc<[Expr]>,
    shape: Vec<usize>,
    strides: Vec<usize>,
}

impl ExprArray {
    /// Creates an array from elements given in row-major order.
    pub fn new(shape: &[usize], data: Vec<Expr>) -> Result<Self, ShapeError> {
        let shape = shape.to_vec();
        let expected = shape.iter().product();
        if data.len() != expected {
            return Err(ShapeError::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }
        let strides = row_major_strides(&shape);
        Self::from_parts(data, shape, strides)
    }

    /// Creates an array by calling `f` with every multi-index in row-major order.
    pub fn from_fn(shape: &[usize], mut f: impl FnMut(&[usize]) -> Expr) -> Result<Self, ShapeError> {
        let len: usize = shape.iter().product();
        let data = (0..len).map(|flat| f(&unravel(flat, shape))).collect();
        Self::new(shape, data)
    }

    /// Adopts the column-major storage of the matrix without reordering it.
    pub fn from_matrix(matrix: &DMatrix<Expr>) -> Result<Self, ShapeError> {
        let (nrows, ncols) = matrix.shape();
        Self::from_parts(matrix.as_slice().to_vec(), vec![nrows, ncols], vec![1, nrows])
    }

    fn from_parts(data: Vec<Expr>, shape: Vec<usize>, strides: Vec<usize>) -> Result<Self, ShapeError> {
        if let Some(element) = data.iter().find(|e| !e.is_scalar()) {
            return Err(ShapeError::NonScalarElement {
                shape: element.shape().to_vec(),
            });
        }
        Ok(Self {
            data: data.into(),
            shape,
            strides,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, multiindex: &[usize]) -> Option<&Expr> {
        check_multiindex(multiindex, &self.shape).ok()?;
        Some(self.at(multiindex))
    }

    /// Unchecked access, for multi-indices already known to be in bounds.
    fn at(&self, multiindex: &[usize]) -> &Expr {
        let offset: usize = multiindex
            .iter()
            .zip(&self.strides)
            .map(|(i, stride)| i * stride)
            .sum();
        &self.data[offset]
    }

    /// Reverses the order of the axes. The returned array shares storage with `self`.
    pub fn transpose(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            shape: self.shape.iter().rev().copied().collect(),
            strides: self.strides.iter().rev().copied().collect(),
        }
    }

    pub fn shares_storage_with(&self, other: &ExprArray) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Iterates over the elements in row-major order of the logical shape.
    pub fn iter(&self) -> impl Iterator<Item = &Expr> + '_ {
        (0..self.len()).map(move |flat| self.at(&unravel(flat, &self.shape)))
    }

    fn fmt_block(&self, f: &mut fmt::Formatter<'_>, index: &mut Vec<usize>) -> fmt::Result {
        let axis = index.len();
        if axis == self.shape.len() {
            return write!(f, "{}", self.at(index));
        }
        write!(f, "[")?;
        for i in 0..self.shape[axis] {
            if i > 0 {
                write!(f, ", ")?;
            }
            index.push(i);
            self.fmt_block(f, index)?;
            index.pop();
        }
        write!(f, "]")
    }
}

fn row_major_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1];
    }
    strides
}

fn unravel(mut flat: usize, shape: &[usize]) -> Vec<usize> {
    let mut multiindex = vec![0; shape.len()];
    for (i, &n) in multiindex.iter_mut().zip(shape).rev() {
        *i = flat % n;
        flat /= n;
    }
    multiindex
}

impl PartialEq for ExprArray {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.iter().eq(other.iter())
    }
}

impl Eq for ExprArray {}

impl Hash for ExprArray {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.shape.hash(state);
        for element in self.iter() {
            element.hash(state);
        }
    }
}

impl Serialize for ExprArray {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ExprArray", 2)?;
        state.serialize_field("shape", &self.shape)?;
        state.serialize_field("elements", &self.iter().collect::<Vec<_>>())?;
        state.end()
    }
}

impl fmt::Display for ExprArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_block(f, &mut Vec::with_capacity(self.shape.len()))
    }
}
