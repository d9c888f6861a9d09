//! Errors raised while defining elements and building their transformations.
use crate::element::ReferenceCell;
use fenris_symbolic::ShapeError;
use std::error::Error;
use std::fmt;
use std::fmt::Display;

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ElementError {
    /// The element is not defined on the given reference cell.
    UnsupportedCell(ReferenceCell),
    /// The element only exists for a single polynomial degree.
    UnsupportedDegree { supported: usize, requested: usize },
    /// The raw reference element does not provide the expected number of basis functions.
    ReferenceDimensionMismatch { expected: usize, actual: usize },
    /// A geometric quantity did not have the shape required to index it.
    Shape(ShapeError),
}

impl Display for ElementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedCell(cell) => write!(f, "Element is not defined on {:?} cells", cell),
            Self::UnsupportedDegree { supported, requested } => {
                write!(
                    f,
                    "Element only supports degree {}, but degree {} was requested",
                    supported, requested
                )
            }
            Self::ReferenceDimensionMismatch { expected, actual } => {
                write!(
                    f,
                    "Reference element must have {} basis functions, but has {}",
                    expected, actual
                )
            }
            Self::Shape(err) => write!(f, "Malformed geometric quantity: {}", err),
        }
    }
}

impl Error for ElementError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Shape(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ShapeError> for ElementError {
    fn from(err: ShapeError) -> Self {
        Self::Shape(err)
    }
}
