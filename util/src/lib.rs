//! Test fixtures shared by the fenris-bell test suites.
use fenris_bell::element::{EntityDofs, MappingKind, ReferenceCell, ReferenceElement, Tabulation};
use fenris_bell::mapping::CoordinateMapping;
use fenris_bell::nalgebra::{DMatrix, Point2};
use fenris_bell::symbolic::interpret::Interpreter;
use fenris_bell::symbolic::Expr;
use std::cell::Cell;

#[macro_export]
macro_rules! assert_panics {
    ($e:expr) => {{
        use std::panic::catch_unwind;
        use std::stringify;
        let expr_string = stringify!($e);
        let result = catch_unwind(|| $e);
        if result.is_ok() {
            panic!("assert_panics!({}) failed.", expr_string);
        }
    }};
}

/// Evaluates a rank-2 expression without free variables.
///
/// Panics if the expression cannot be evaluated or is not a matrix.
pub fn evaluate_matrix(expr: &Expr) -> DMatrix<f64> {
    evaluate_matrix_with(&Interpreter::new(), expr)
}

pub fn evaluate_matrix_with(interpreter: &Interpreter, expr: &Expr) -> DMatrix<f64> {
    interpreter
        .evaluate(expr)
        .expect("Evaluation failure is a test failure")
        .to_matrix()
        .expect("Expression must be a matrix")
}

/// Wraps a mapping and counts how many geometric queries pass through it.
#[derive(Debug, Default)]
pub struct CountingMapping<M> {
    inner: M,
    calls: Cell<usize>,
}

impl<M> CountingMapping<M> {
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    fn record(&self) -> &M {
        self.calls.set(self.calls.get() + 1);
        &self.inner
    }
}

impl<M: CoordinateMapping> CoordinateMapping for CountingMapping<M> {
    fn jacobian_at(&self, point: &Point2<f64>) -> Expr {
        self.record().jacobian_at(point)
    }

    fn reference_normals(&self) -> Expr {
        self.record().reference_normals()
    }

    fn physical_tangents(&self) -> Expr {
        self.record().physical_tangents()
    }

    fn physical_edge_lengths(&self) -> Expr {
        self.record().physical_edge_lengths()
    }

    fn cell_size(&self) -> Expr {
        self.record().cell_size()
    }
}

/// Stand-in for the raw 21-function Bell reference element.
///
/// Tabulations are arbitrary but deterministic: they only need to exercise the
/// contraction with the basis transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBellStub {
    pub cell: ReferenceCell,
    pub degree: usize,
    pub space_dimension: usize,
}

impl Default for RawBellStub {
    fn default() -> Self {
        Self {
            cell: ReferenceCell::Triangle,
            degree: 5,
            space_dimension: 21,
        }
    }
}

impl ReferenceElement for RawBellStub {
    fn cell(&self) -> ReferenceCell {
        self.cell
    }

    fn degree(&self) -> usize {
        self.degree
    }

    fn space_dimension(&self) -> usize {
        self.space_dimension
    }

    fn mapping(&self) -> MappingKind {
        MappingKind::Affine
    }

    fn entity_dofs(&self) -> EntityDofs {
        let vertices: Vec<Vec<usize>> = (0..3).map(|v| (6 * v..6 * (v + 1)).collect()).collect();
        let edges: Vec<Vec<usize>> = (0..3).map(|e| vec![18 + e]).collect();
        EntityDofs::from_nested(vec![vertices, edges, vec![Vec::new()]])
    }

    fn tabulate(&self, order: usize, points: &DMatrix<f64>) -> eyre::Result<Tabulation> {
        eyre::ensure!(points.nrows() == 2, "Points must be two-dimensional");
        let mut tabulation = Tabulation::new();
        for total in 0..=order {
            for dx in (0..=total).rev() {
                let alpha = vec![dx, total - dx];
                let table = DMatrix::from_fn(self.space_dimension, points.ncols(), |k, p| {
                    let (x, y) = (points[(0, p)], points[(1, p)]);
                    (k as f64 + 1.0) * (1.0 + x) - (dx as f64 + 0.5) * y * (k % 4) as f64 + (total - dx) as f64
                });
                tabulation.insert(alpha, table);
            }
        }
        Ok(tabulation)
    }
}
