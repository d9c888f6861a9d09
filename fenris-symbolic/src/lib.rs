//! Symbolic scalar and tensor expressions.
//!
//! Expressions form an immutable DAG of shared nodes. Nothing in this crate is evaluated
//! while an expression is being built: constructors only apply structural identities
//! such as `x * 1 = x` or `x + 0 = x`. Turning an expression into numbers is the job of a
//! downstream compiler, or of the reference [`interpret::Interpreter`] for verification.
use std::fmt;
use std::fmt::{Display, Formatter};

pub mod expr;
pub mod interpret;

pub use expr::{Expr, ExprArray, Node};

/// Error produced when an expression or array does not have the shape an operation requires.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ShapeError {
    /// A multi-index with the wrong number of entries was used to index a tensor.
    RankMismatch { expected: usize, actual: usize },
    /// A multi-index lies outside the declared extents of a tensor.
    IndexOutOfBounds { multiindex: Vec<usize>, shape: Vec<usize> },
    /// The number of elements does not match the requested shape.
    LengthMismatch { expected: usize, actual: usize },
    /// Arrays of expressions may only hold scalar expressions.
    NonScalarElement { shape: Vec<usize> },
}

impl Display for ShapeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::RankMismatch { expected, actual } => {
                write!(
                    f,
                    "Multi-index has {} entries, but the tensor has rank {}",
                    actual, expected
                )
            }
            Self::IndexOutOfBounds { multiindex, shape } => {
                write!(
                    f,
                    "Multi-index {:?} is out of bounds for tensor of shape {:?}",
                    multiindex, shape
                )
            }
            Self::LengthMismatch { expected, actual } => {
                write!(f, "Expected {} elements, but got {}", expected, actual)
            }
            Self::NonScalarElement { shape } => {
                write!(f, "Array elements must be scalar, got expression of shape {:?}", shape)
            }
        }
    }
}

impl std::error::Error for ShapeError {}
