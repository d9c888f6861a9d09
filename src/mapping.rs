//! Geometric quantities consumed by physically mapped elements.
//!
//! Every quantity is handed out as a symbolic tensor. A [`SymbolicCoordinateMapping`] leaves
//! them as named variables for a downstream compiler to bind, while a
//! [`LiteralCoordinateMapping`] packs known numbers into literal tensors.
use crate::element::TRIANGLE_EDGE_VERTICES;
use fenris_symbolic::{Expr, ExprArray};
use nalgebra::storage::Storage;
use nalgebra::{Dim, Matrix, Matrix2, Matrix3x2, Point2, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_1_SQRT_2;

pub const JACOBIAN: &str = "J";
pub const REFERENCE_NORMALS: &str = "reference_normals";
pub const PHYSICAL_TANGENTS: &str = "physical_tangents";
pub const PHYSICAL_EDGE_LENGTHS: &str = "physical_edge_lengths";
pub const CELL_SIZE: &str = "cell_size";

/// Queries for the geometry of a single triangle.
///
/// Implementations must be free of side effects: the same query always describes the same
/// cell.
pub trait CoordinateMapping {
    /// Jacobian `J[i, j] = dx_i / dxi_j` of the reference-to-physical map at a reference
    /// point. Shape `[2, 2]`.
    fn jacobian_at(&self, point: &Point2<f64>) -> Expr;

    /// Outward unit normals of the reference edges, one per row. Shape `[3, 2]`.
    fn reference_normals(&self) -> Expr;

    /// Unit tangents of the physical edges, one per row. Shape `[3, 2]`.
    fn physical_tangents(&self) -> Expr;

    /// Shape `[3]`.
    fn physical_edge_lengths(&self) -> Expr;

    /// A characteristic length per vertex, used to non-dimensionalize derivative degrees of
    /// freedom. Shape `[3]`.
    fn cell_size(&self) -> Expr;
}

/// A mapping whose quantities are free variables, to be bound per cell by whoever
/// evaluates the resulting expressions.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct SymbolicCoordinateMapping;

impl CoordinateMapping for SymbolicCoordinateMapping {
    fn jacobian_at(&self, _point: &Point2<f64>) -> Expr {
        Expr::variable(JACOBIAN, &[2, 2])
    }

    fn reference_normals(&self) -> Expr {
        Expr::variable(REFERENCE_NORMALS, &[3, 2])
    }

    fn physical_tangents(&self) -> Expr {
        Expr::variable(PHYSICAL_TANGENTS, &[3, 2])
    }

    fn physical_edge_lengths(&self) -> Expr {
        Expr::variable(PHYSICAL_EDGE_LENGTHS, &[3])
    }

    fn cell_size(&self) -> Expr {
        Expr::variable(CELL_SIZE, &[3])
    }
}

/// A mapping with known numerical geometry.
///
/// The Jacobian is taken to be constant over the cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiteralCoordinateMapping {
    pub jacobian: Matrix2<f64>,
    pub reference_normals: Matrix3x2<f64>,
    pub physical_tangents: Matrix3x2<f64>,
    pub physical_edge_lengths: Vector3<f64>,
    pub cell_size: Vector3<f64>,
}

impl LiteralCoordinateMapping {
    /// Geometry of the affine map from the reference triangle `(0, 0), (1, 0), (0, 1)` to
    /// the triangle with the given vertices.
    ///
    /// Tangents point from the lower to the higher numbered endpoint of each edge. The
    /// cell size at every vertex is the diameter of the triangle; use
    /// [`with_cell_size`](Self::with_cell_size) to supply e.g. mesh-averaged sizes instead.
    ///
    /// The triangle must not have coincident vertices, otherwise the tangents are not
    /// defined. This is only checked in debug builds.
    pub fn from_triangle_vertices(vertices: [Point2<f64>; 3]) -> Self {
        let [x0, x1, x2] = vertices;
        let jacobian = Matrix2::from_columns(&[x1 - x0, x2 - x0]);

        let mut physical_tangents = Matrix3x2::zeros();
        let mut physical_edge_lengths = Vector3::zeros();
        for (e, &[a, b]) in TRIANGLE_EDGE_VERTICES.iter().enumerate() {
            let edge = vertices[b] - vertices[a];
            let length = edge.norm();
            debug_assert!(length > 0.0, "Edge {} of the triangle has zero length", e);
            physical_edge_lengths[e] = length;
            physical_tangents.set_row(e, &(edge / length).transpose());
        }

        let diameter = physical_edge_lengths.max();
        Self {
            jacobian,
            reference_normals: reference_triangle_normals(),
            physical_tangents,
            physical_edge_lengths,
            cell_size: Vector3::repeat(diameter),
        }
    }

    pub fn with_cell_size(self, cell_size: Vector3<f64>) -> Self {
        Self { cell_size, ..self }
    }
}

/// Outward unit normals of the edges of the reference triangle.
pub fn reference_triangle_normals() -> Matrix3x2<f64> {
    let s = FRAC_1_SQRT_2;
    Matrix3x2::new(s, s, -1.0, 0.0, 0.0, -1.0)
}

impl CoordinateMapping for LiteralCoordinateMapping {
    fn jacobian_at(&self, _point: &Point2<f64>) -> Expr {
        literal_tensor(&self.jacobian)
    }

    fn reference_normals(&self) -> Expr {
        literal_tensor(&self.reference_normals)
    }

    fn physical_tangents(&self) -> Expr {
        literal_tensor(&self.physical_tangents)
    }

    fn physical_edge_lengths(&self) -> Expr {
        literal_vector(self.physical_edge_lengths.as_slice())
    }

    fn cell_size(&self) -> Expr {
        literal_vector(self.cell_size.as_slice())
    }
}

fn literal_tensor<R, C, S>(matrix: &Matrix<f64, R, C, S>) -> Expr
where
    R: Dim,
    C: Dim,
    S: Storage<f64, R, C>,
{
    let array = ExprArray::from_fn(&[matrix.nrows(), matrix.ncols()], |idx| {
        Expr::literal(matrix[(idx[0], idx[1])])
    })
    .expect("Internal error: literal arrays are always scalar and correctly sized");
    Expr::list_tensor(array)
}

fn literal_vector(values: &[f64]) -> Expr {
    let array = ExprArray::new(&[values.len()], values.iter().copied().map(Expr::literal).collect())
        .expect("Internal error: literal arrays are always scalar and correctly sized");
    Expr::list_tensor(array)
}
