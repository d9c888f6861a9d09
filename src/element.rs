//! Reference elements and the small capability interface shared by all of them.
//!
//! A reference element is described by what it can do rather than by what it inherits:
//! it lives on a [`ReferenceCell`], has a fixed number of basis functions laid out over the
//! cell's sub-entities ([`EntityDofs`]), declares how it is mapped to physical cells
//! ([`MappingKind`]) and can tabulate its basis. Physically mapped elements such as
//! [`BellElement`] wrap a raw reference element and only replace the pieces that differ.
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

mod bell;

pub use bell::*;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceCell {
    Interval,
    Triangle,
    Quadrilateral,
    Tetrahedron,
    Hexahedron,
}

impl ReferenceCell {
    /// Topological dimension of the cell.
    pub fn dim(&self) -> usize {
        match self {
            Self::Interval => 1,
            Self::Triangle | Self::Quadrilateral => 2,
            Self::Tetrahedron | Self::Hexahedron => 3,
        }
    }

    /// Number of sub-entities of the given topological dimension.
    pub fn num_entities(&self, dim: usize) -> usize {
        use ReferenceCell::*;
        match (self, dim) {
            (_, d) if d == self.dim() => 1,
            (Interval, 0) => 2,
            (Triangle, 0) | (Triangle, 1) => 3,
            (Quadrilateral, 0) | (Quadrilateral, 1) => 4,
            (Tetrahedron, 0) | (Tetrahedron, 2) => 4,
            (Tetrahedron, 1) => 6,
            (Hexahedron, 0) => 8,
            (Hexahedron, 1) => 12,
            (Hexahedron, 2) => 6,
            _ => 0,
        }
    }
}

/// Local vertices of each triangle edge. Edge `e` is opposite vertex `e`, and its
/// endpoints are listed in increasing order.
pub const TRIANGLE_EDGE_VERTICES: [[usize; 2]; 3] = [[1, 2], [0, 2], [0, 1]];

/// How basis functions are taken from the reference cell to a physical cell.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MappingKind {
    /// Plain pullback through the affine map.
    Affine,
    /// Pullback followed by a geometry-dependent change of basis.
    Physical,
}

/// Basis tabulations keyed by derivative multi-index.
///
/// Each table has one row per basis function and one column per point.
pub type Tabulation = BTreeMap<Vec<usize>, DMatrix<f64>>;

/// Degrees of freedom associated with each sub-entity of a cell.
///
/// Indexed first by topological dimension, then by entity number. Each entity holds its
/// degrees of freedom in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDofs {
    dofs: Vec<Vec<Vec<usize>>>,
}

impl EntityDofs {
    pub fn from_nested(dofs: Vec<Vec<Vec<usize>>>) -> Self {
        Self { dofs }
    }

    pub fn dofs(&self, dim: usize, entity: usize) -> Option<&[usize]> {
        self.dofs
            .get(dim)
            .and_then(|entities| entities.get(entity))
            .map(Vec::as_slice)
    }

    pub fn num_entities(&self, dim: usize) -> usize {
        self.dofs.get(dim).map(Vec::len).unwrap_or(0)
    }

    /// Total number of degrees of freedom over all entities.
    pub fn num_dofs(&self) -> usize {
        self.iter().map(|(_, _, dofs)| dofs.len()).sum()
    }

    /// Iterates over `(dim, entity, dofs)` triples.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &[usize])> {
        self.dofs.iter().enumerate().flat_map(|(dim, entities)| {
            entities
                .iter()
                .enumerate()
                .map(move |(entity, dofs)| (dim, entity, dofs.as_slice()))
        })
    }
}

pub trait ReferenceElement {
    fn cell(&self) -> ReferenceCell;

    fn degree(&self) -> usize;

    /// Number of basis functions.
    fn space_dimension(&self) -> usize;

    fn mapping(&self) -> MappingKind;

    fn entity_dofs(&self) -> EntityDofs;

    /// Tabulates the basis functions and all their derivatives up to the given order.
    ///
    /// `points` holds one reference point per column.
    fn tabulate(&self, order: usize, points: &DMatrix<f64>) -> eyre::Result<Tabulation>;
}
