use crate::element::{EntityDofs, MappingKind, ReferenceCell, ReferenceElement, Tabulation, TRIANGLE_EDGE_VERTICES};
use crate::error::ElementError;
use crate::mapping::CoordinateMapping;
use eyre::bail;
use fenris_symbolic::{Expr, ExprArray};
use itertools::iproduct;
use log::{debug, trace};
use nalgebra::{DMatrix, Point2};
use std::collections::BTreeMap;

/// The only polynomial degree the Bell element exists for.
pub const BELL_DEGREE: usize = 5;

/// Number of basis functions of the raw reference element: six per vertex and one normal
/// derivative per edge.
pub const RAW_SPACE_DIMENSION: usize = 21;

/// Number of degrees of freedom of the Bell element.
pub const SPACE_DIMENSION: usize = 18;

/// Value, gradient and the `xx`, `xy`, `yy` second derivatives.
pub const DOFS_PER_VERTEX: usize = 6;

const NUM_VERTICES: usize = 3;

/// The $C^1$ quintic Bell triangle.
///
/// The raw reference element carries 21 basis functions. Constraining the normal
/// derivative along each edge to be cubic eliminates the three edge functions, which leaves
/// 18 vertex degrees of freedom. The edge functions remain in the raw basis only to express
/// that constraint under the geometric map.
///
/// Tabulation and the entity layout of the raw basis come from the wrapped reference
/// element. The Bell element replaces the layout with its own and supplies the
/// transformation from raw coefficients to physical degrees of freedom.
#[derive(Debug, Clone)]
pub struct BellElement<R> {
    reference: R,
}

impl<R> BellElement<R>
where
    R: ReferenceElement,
{
    /// Wraps the raw 21-function reference element.
    ///
    /// Fails if the reference element is not a degree 5 triangle element with 21 basis
    /// functions.
    pub fn new(reference: R) -> Result<Self, ElementError> {
        check_definition(reference.cell(), reference.degree())?;
        if reference.space_dimension() != RAW_SPACE_DIMENSION {
            return Err(ElementError::ReferenceDimensionMismatch {
                expected: RAW_SPACE_DIMENSION,
                actual: reference.space_dimension(),
            });
        }
        Ok(Self { reference })
    }

    pub fn reference(&self) -> &R {
        &self.reference
    }

    /// The shape of the free index of the basis.
    pub fn index_shape(&self) -> [usize; 1] {
        [SPACE_DIMENSION]
    }

    /// The `18 x 21` matrix taking raw basis coefficients to physical degrees of freedom.
    ///
    /// See [`bell_basis_transformation`].
    pub fn basis_transformation<M>(&self, mapping: &M) -> Result<Expr, ElementError>
    where
        M: CoordinateMapping + ?Sized,
    {
        bell_basis_transformation(self.reference.cell(), self.reference.degree(), mapping)
    }

    /// Evaluates the physical basis functions and their derivatives up to the given order.
    ///
    /// Every raw table is contracted with the basis transformation, giving one
    /// `18 x n_points` tensor per derivative multi-index. Derivatives are those of the
    /// raw table, i.e. with respect to reference coordinates.
    pub fn basis_evaluation<M>(
        &self,
        order: usize,
        points: &DMatrix<f64>,
        mapping: &M,
    ) -> eyre::Result<BTreeMap<Vec<usize>, Expr>>
    where
        M: CoordinateMapping + ?Sized,
    {
        let v = assemble_transformation(mapping)?;
        let raw = self.reference.tabulate(order, points)?;

        let mut evaluation = BTreeMap::new();
        for (alpha, table) in raw {
            if table.nrows() != RAW_SPACE_DIMENSION {
                bail!(
                    "Raw tabulation for derivative {:?} has {} rows, expected {}",
                    alpha,
                    table.nrows(),
                    RAW_SPACE_DIMENSION
                );
            }
            let mapped = ExprArray::from_fn(&[SPACE_DIMENSION, table.ncols()], |idx| {
                let (dof, point) = (idx[0], idx[1]);
                Expr::sum_all(
                    (0..RAW_SPACE_DIMENSION).map(|k| v[(k, dof)].clone() * Expr::literal(table[(k, point)])),
                )
            })?;
            evaluation.insert(alpha, Expr::list_tensor(mapped));
        }
        debug!(
            "Evaluated Bell basis for {} derivative multi-indices at {} points",
            evaluation.len(),
            points.ncols()
        );
        Ok(evaluation)
    }
}

impl<R> ReferenceElement for BellElement<R>
where
    R: ReferenceElement,
{
    fn cell(&self) -> ReferenceCell {
        ReferenceCell::Triangle
    }

    fn degree(&self) -> usize {
        BELL_DEGREE
    }

    fn space_dimension(&self) -> usize {
        SPACE_DIMENSION
    }

    fn mapping(&self) -> MappingKind {
        MappingKind::Physical
    }

    fn entity_dofs(&self) -> EntityDofs {
        bell_entity_dofs()
    }

    /// Tabulates the raw reference basis, with 21 rows per table.
    fn tabulate(&self, order: usize, points: &DMatrix<f64>) -> eyre::Result<Tabulation> {
        self.reference.tabulate(order, points)
    }
}

/// Degrees of freedom of the Bell element per entity.
///
/// Each vertex owns six contiguous degrees of freedom. Edges and the interior own none:
/// the three raw edge functions are eliminated by the edge constraint.
pub fn bell_entity_dofs() -> EntityDofs {
    let vertex_dofs: Vec<Vec<usize>> = (0..NUM_VERTICES)
        .map(|v| (DOFS_PER_VERTEX * v..DOFS_PER_VERTEX * (v + 1)).collect())
        .collect();
    EntityDofs::from_nested(vec![vertex_dofs, vec![Vec::new(); 3], vec![Vec::new()]])
}

/// Builds the transformation from the 21 raw Bell coefficients to the 18 physical degrees
/// of freedom, as an `18 x 21` list tensor.
///
/// `cell` and `degree` are validated before the mapping is queried. Any shape error raised
/// while indexing the geometric quantities is returned unchanged.
pub fn bell_basis_transformation<M>(cell: ReferenceCell, degree: usize, mapping: &M) -> Result<Expr, ElementError>
where
    M: CoordinateMapping + ?Sized,
{
    check_definition(cell, degree)?;
    let v = assemble_transformation(mapping)?;
    let array = ExprArray::from_matrix(&v)?;
    debug!(
        "Assembled {} x {} Bell basis transformation",
        SPACE_DIMENSION, RAW_SPACE_DIMENSION
    );
    Ok(Expr::list_tensor(array.transpose()))
}

fn check_definition(cell: ReferenceCell, degree: usize) -> Result<(), ElementError> {
    if cell != ReferenceCell::Triangle {
        return Err(ElementError::UnsupportedCell(cell));
    }
    if degree != BELL_DEGREE {
        return Err(ElementError::UnsupportedDegree {
            supported: BELL_DEGREE,
            requested: degree,
        });
    }
    Ok(())
}

/// Assembles the `21 x 18` matrix `V` whose transpose is the basis transformation.
fn assemble_transformation<M>(mapping: &M) -> Result<DMatrix<Expr>, ElementError>
where
    M: CoordinateMapping + ?Sized,
{
    let jacobian = mapping.jacobian_at(&Point2::new(1.0 / 3.0, 1.0 / 3.0));
    let j = [
        [Expr::indexed(&jacobian, &[0, 0])?, Expr::indexed(&jacobian, &[0, 1])?],
        [Expr::indexed(&jacobian, &[1, 0])?, Expr::indexed(&jacobian, &[1, 1])?],
    ];
    let normals = mapping.reference_normals();
    let tangents = mapping.physical_tangents();
    let lengths = mapping.physical_edge_lengths();

    let mut v = DMatrix::from_element(RAW_SPACE_DIMENSION, SPACE_DIMENSION, Expr::zero());

    let hessian = second_derivative_block(&j);
    for vertex in 0..NUM_VERTICES {
        let s = DOFS_PER_VERTEX * vertex;
        v[(s, s)] = Expr::one();
        for (i, k) in iproduct!(0..2, 0..2) {
            v[(s + 1 + i, s + 1 + k)] = j[k][i].clone();
        }
        for (i, k) in iproduct!(0..3, 0..3) {
            v[(s + 3 + i, s + 3 + k)] = hessian[i][k].clone();
        }
    }

    for (edge, &endpoints) in TRIANGLE_EDGE_VERTICES.iter().enumerate() {
        let n = [
            Expr::indexed(&normals, &[edge, 0])?,
            Expr::indexed(&normals, &[edge, 1])?,
        ];
        let t = [
            Expr::indexed(&tangents, &[edge, 0])?,
            Expr::indexed(&tangents, &[edge, 1])?,
        ];
        let length = Expr::indexed(&lengths, &[edge])?;

        // Reference normal paired with the physical tangent pulled back by J^T
        let flux = n[0].clone() * (j[0][0].clone() * t[0].clone() + j[1][0].clone() * t[1].clone())
            + n[1].clone() * (j[0][1].clone() * t[0].clone() + j[1][1].clone() * t[1].clone());
        trace!("Normal derivative flux on edge {}: {}", edge, flux);

        fill_edge_constraint(&mut v, edge, endpoints, &flux, &t, &length);
    }

    let h = mapping.cell_size();
    for vertex in 0..NUM_VERTICES {
        let s = DOFS_PER_VERTEX * vertex;
        let h_v = Expr::indexed(&h, &[vertex])?;
        let h_v_squared = Expr::power(h_v.clone(), 2);
        for k in 1..3 {
            v.column_mut(s + k)
                .apply(|entry| *entry = entry.clone() / h_v.clone());
        }
        for k in 3..6 {
            v.column_mut(s + k)
                .apply(|entry| *entry = entry.clone() / h_v_squared.clone());
        }
    }

    Ok(v)
}

/// How the coefficients of a quadratic form in `(xx, xy, yy)` transform under `x = J xi`.
fn second_derivative_block(j: &[[Expr; 2]; 2]) -> [[Expr; 3]; 3] {
    let two = || Expr::literal(2.0);
    let square = |x: &Expr| Expr::power(x.clone(), 2);
    let [[j00, j01], [j10, j11]] = j;
    [
        [
            square(j00),
            two() * (j00.clone() * j10.clone()),
            square(j10),
        ],
        [
            j00.clone() * j01.clone(),
            j00.clone() * j11.clone() + j10.clone() * j01.clone(),
            j10.clone() * j11.clone(),
        ],
        [
            square(j01),
            two() * (j01.clone() * j11.clone()),
            square(j11),
        ],
    ]
}

/// Fills the constraint row of `edge`, whose endpoints are `[v0, v1]`.
fn fill_edge_constraint(
    v: &mut DMatrix<Expr>,
    edge: usize,
    [v0, v1]: [usize; 2],
    flux: &Expr,
    tangent: &[Expr; 2],
    length: &Expr,
) {
    let row = SPACE_DIMENSION + edge;
    let minus_one = || Expr::literal(-1.0);
    let (c0, c1) = (DOFS_PER_VERTEX * v0, DOFS_PER_VERTEX * v1);

    v[(row, c0)] = minus_one() * flux.clone() / (Expr::literal(21.0) * length.clone());
    v[(row, c1)] = flux.clone() / (Expr::literal(21.0) * length.clone());

    for i in 0..2 {
        let derivative = minus_one() * (flux.clone() * tangent[i].clone()) / Expr::literal(42.0);
        // Same value at both endpoints, not opposite signs
        v[(row, c0 + 1 + i)] = derivative.clone();
        v[(row, c1 + 1 + i)] = derivative;
    }

    let [tx, ty] = tangent;
    let tau = [
        Expr::power(tx.clone(), 2),
        Expr::literal(2.0) * (tx.clone() * ty.clone()),
        Expr::power(ty.clone(), 2),
    ];
    for (i, tau_i) in tau.into_iter().enumerate() {
        let weighted = length.clone() * (flux.clone() * tau_i);
        v[(row, c0 + 3 + i)] = minus_one() * weighted.clone() / Expr::literal(252.0);
        v[(row, c1 + 3 + i)] = weighted / Expr::literal(252.0);
    }
}
