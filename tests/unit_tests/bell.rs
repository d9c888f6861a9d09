use crate::reference_vertices;
use fenris_bell::element::{
    bell_basis_transformation, BellElement, MappingKind, ReferenceCell, ReferenceElement, SPACE_DIMENSION,
    TRIANGLE_EDGE_VERTICES,
};
use fenris_bell::error::ElementError;
use fenris_bell::mapping::{
    reference_triangle_normals, CoordinateMapping, LiteralCoordinateMapping, SymbolicCoordinateMapping, CELL_SIZE,
    JACOBIAN, PHYSICAL_EDGE_LENGTHS, PHYSICAL_TANGENTS, REFERENCE_NORMALS,
};
use fenris_bell::nalgebra::{DMatrix, Matrix2, Point2, Vector2, Vector3};
use fenris_bell::symbolic::interpret::{Interpreter, Value};
use fenris_bell::symbolic::{Expr, ShapeError};
use insta::assert_snapshot;
use matrixcompare::{assert_matrix_eq, prop_assert_matrix_eq};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::f64::consts::FRAC_1_SQRT_2;
use util::{evaluate_matrix, evaluate_matrix_with, CountingMapping, RawBellStub};

fn skewed_vertices() -> [Point2<f64>; 3] {
    [Point2::new(0.2, -0.1), Point2::new(1.5, 0.2), Point2::new(0.3, 1.1)]
}

/// Reference geometry stretched by a factor two along `x`, with unit edge lengths and
/// unit cell sizes so that every entry can be computed by hand.
fn stretched_mapping() -> LiteralCoordinateMapping {
    let canonical = LiteralCoordinateMapping::from_triangle_vertices(reference_vertices());
    LiteralCoordinateMapping {
        jacobian: Matrix2::new(2.0, 0.0, 0.0, 1.0),
        reference_normals: reference_triangle_normals(),
        physical_tangents: canonical.physical_tangents,
        physical_edge_lengths: Vector3::repeat(1.0),
        cell_size: Vector3::repeat(1.0),
    }
}

/// Entry-by-entry numeric construction of the transformation, independent of the
/// expression algebra.
fn numeric_transformation(mapping: &LiteralCoordinateMapping) -> DMatrix<f64> {
    let j = &mapping.jacobian;
    let (j00, j01, j10, j11) = (j[(0, 0)], j[(0, 1)], j[(1, 0)], j[(1, 1)]);
    let hessian = [
        [j00 * j00, 2.0 * j00 * j10, j10 * j10],
        [j00 * j01, j00 * j11 + j10 * j01, j10 * j11],
        [j01 * j01, 2.0 * j01 * j11, j11 * j11],
    ];

    let mut v = DMatrix::<f64>::zeros(21, 18);
    for vertex in 0..3 {
        let s = 6 * vertex;
        v[(s, s)] = 1.0;
        for i in 0..2 {
            for k in 0..2 {
                v[(s + 1 + i, s + 1 + k)] = j[(k, i)];
            }
        }
        for i in 0..3 {
            for k in 0..3 {
                v[(s + 3 + i, s + 3 + k)] = hessian[i][k];
            }
        }
    }

    for (e, &[v0, v1]) in TRIANGLE_EDGE_VERTICES.iter().enumerate() {
        let n: Vector2<f64> = mapping.reference_normals.row(e).transpose();
        let t: Vector2<f64> = mapping.physical_tangents.row(e).transpose();
        let length = mapping.physical_edge_lengths[e];
        let flux = n.dot(&(j.transpose() * t));
        let tau = [t.x * t.x, 2.0 * t.x * t.y, t.y * t.y];
        let row = 18 + e;
        let (c0, c1) = (6 * v0, 6 * v1);

        v[(row, c0)] = -flux / (21.0 * length);
        v[(row, c1)] = flux / (21.0 * length);
        for i in 0..2 {
            v[(row, c0 + 1 + i)] = -flux * t[i] / 42.0;
            v[(row, c1 + 1 + i)] = -flux * t[i] / 42.0;
        }
        for i in 0..3 {
            v[(row, c0 + 3 + i)] = -length * flux * tau[i] / 252.0;
            v[(row, c1 + 3 + i)] = length * flux * tau[i] / 252.0;
        }
    }

    for vertex in 0..3 {
        let s = 6 * vertex;
        let h = mapping.cell_size[vertex];
        for k in 1..3 {
            v.column_mut(s + k).scale_mut(1.0 / h);
        }
        for k in 3..6 {
            v.column_mut(s + k).scale_mut(1.0 / (h * h));
        }
    }
    v.transpose()
}

fn transformation_matrix<M: CoordinateMapping>(mapping: &M) -> DMatrix<f64> {
    let transformation = bell_basis_transformation(ReferenceCell::Triangle, 5, mapping).unwrap();
    evaluate_matrix(&transformation)
}

/// A symbolic mapping with configurable shapes for the Jacobian and the edge lengths.
struct MalformedMapping {
    jacobian_shape: Vec<usize>,
    lengths_shape: Vec<usize>,
}

impl CoordinateMapping for MalformedMapping {
    fn jacobian_at(&self, _point: &Point2<f64>) -> Expr {
        Expr::variable(JACOBIAN, &self.jacobian_shape)
    }

    fn reference_normals(&self) -> Expr {
        SymbolicCoordinateMapping.reference_normals()
    }

    fn physical_tangents(&self) -> Expr {
        SymbolicCoordinateMapping.physical_tangents()
    }

    fn physical_edge_lengths(&self) -> Expr {
        Expr::variable(PHYSICAL_EDGE_LENGTHS, &self.lengths_shape)
    }

    fn cell_size(&self) -> Expr {
        SymbolicCoordinateMapping.cell_size()
    }
}

#[test]
fn unsupported_degree_is_rejected_without_querying_geometry() {
    let mapping = CountingMapping::new(SymbolicCoordinateMapping);
    for degree in [0, 3, 4, 6] {
        let result = bell_basis_transformation(ReferenceCell::Triangle, degree, &mapping);
        assert_eq!(
            result,
            Err(ElementError::UnsupportedDegree {
                supported: 5,
                requested: degree
            })
        );
    }
    assert_eq!(mapping.calls(), 0);
}

#[test]
fn unsupported_cell_is_rejected_before_degree() {
    let mapping = CountingMapping::new(SymbolicCoordinateMapping);
    let result = bell_basis_transformation(ReferenceCell::Quadrilateral, 3, &mapping);
    assert_eq!(result, Err(ElementError::UnsupportedCell(ReferenceCell::Quadrilateral)));
    let result = bell_basis_transformation(ReferenceCell::Tetrahedron, 5, &mapping);
    assert_eq!(result, Err(ElementError::UnsupportedCell(ReferenceCell::Tetrahedron)));
    assert_eq!(mapping.calls(), 0);
}

#[test]
fn every_geometric_quantity_is_queried_once() {
    let mapping = CountingMapping::new(SymbolicCoordinateMapping);
    bell_basis_transformation(ReferenceCell::Triangle, 5, &mapping).unwrap();
    assert_eq!(mapping.calls(), 5);
}

#[test]
fn element_rejects_unsuitable_reference_elements() {
    let wrong_degree = RawBellStub {
        degree: 4,
        ..Default::default()
    };
    assert_eq!(
        BellElement::new(wrong_degree).err(),
        Some(ElementError::UnsupportedDegree {
            supported: 5,
            requested: 4
        })
    );

    let wrong_cell = RawBellStub {
        cell: ReferenceCell::Interval,
        ..Default::default()
    };
    assert_eq!(
        BellElement::new(wrong_cell).err(),
        Some(ElementError::UnsupportedCell(ReferenceCell::Interval))
    );

    let wrong_dimension = RawBellStub {
        space_dimension: 20,
        ..Default::default()
    };
    assert_eq!(
        BellElement::new(wrong_dimension).err(),
        Some(ElementError::ReferenceDimensionMismatch {
            expected: 21,
            actual: 20
        })
    );
}

#[test]
fn symbolic_transformation_has_expected_shape_and_free_variables() {
    let transformation = bell_basis_transformation(ReferenceCell::Triangle, 5, &SymbolicCoordinateMapping).unwrap();
    assert_eq!(transformation.shape(), &[18, 21]);
    assert!(transformation.as_list_tensor().is_some());

    let expected: BTreeSet<String> = [
        JACOBIAN,
        REFERENCE_NORMALS,
        PHYSICAL_TANGENTS,
        PHYSICAL_EDGE_LENGTHS,
        CELL_SIZE,
    ]
    .iter()
    .map(|name| name.to_string())
    .collect();
    assert_eq!(transformation.free_variables(), expected);
}

#[test]
fn symbolic_entries_read_as_expected() {
    let transformation = bell_basis_transformation(ReferenceCell::Triangle, 5, &SymbolicCoordinateMapping).unwrap();
    let entry = |dof: usize, raw: usize| Expr::indexed(&transformation, &[dof, raw]).unwrap().to_string();

    assert_eq!(entry(0, 0), "1");
    assert_eq!(entry(0, 1), "0");
    assert_eq!(entry(7, 7), "(J[0, 0] / cell_size[1])");
    assert_eq!(entry(8, 7), "(J[1, 0] / cell_size[1])");
    assert_eq!(entry(9, 9), "(J[0, 0]^2 / cell_size[1]^2)");
    assert_snapshot!(entry(6, 18), @"((-1 * ((reference_normals[0, 0] * ((J[0, 0] * physical_tangents[0, 0]) + (J[1, 0] * physical_tangents[0, 1]))) + (reference_normals[0, 1] * ((J[0, 1] * physical_tangents[0, 0]) + (J[1, 1] * physical_tangents[0, 1]))))) / (21 * physical_edge_lengths[0]))");
}

#[test]
fn transformation_is_deterministic() {
    let first = bell_basis_transformation(ReferenceCell::Triangle, 5, &SymbolicCoordinateMapping).unwrap();
    let second = bell_basis_transformation(ReferenceCell::Triangle, 5, &SymbolicCoordinateMapping).unwrap();
    assert_eq!(first, second);

    let mapping = stretched_mapping();
    let first = bell_basis_transformation(ReferenceCell::Triangle, 5, &mapping).unwrap();
    let second = bell_basis_transformation(ReferenceCell::Triangle, 5, &mapping).unwrap();
    assert_eq!(first, second);
}

#[test]
fn element_layout() {
    let element = BellElement::new(RawBellStub::default()).unwrap();
    assert_eq!(element.cell(), ReferenceCell::Triangle);
    assert_eq!(element.degree(), 5);
    assert_eq!(element.space_dimension(), SPACE_DIMENSION);
    assert_eq!(element.index_shape(), [18]);
    assert_eq!(element.mapping(), MappingKind::Physical);
    assert_eq!(element.reference().entity_dofs().num_dofs(), 21);

    let dofs = element.entity_dofs();
    assert_eq!(dofs.num_dofs(), element.space_dimension());
    assert_eq!(dofs.dofs(0, 1), Some(&[6, 7, 8, 9, 10, 11][..]));
    for edge in 0..3 {
        assert_eq!(dofs.dofs(1, edge), Some(&[][..]));
    }
    assert_eq!(dofs.dofs(2, 0), Some(&[][..]));

    let mut vertex_dofs: Vec<usize> = (0..3)
        .flat_map(|vertex| dofs.dofs(0, vertex).unwrap().to_vec())
        .collect();
    vertex_dofs.sort_unstable();
    vertex_dofs.dedup();
    assert_eq!(vertex_dofs, (0..18).collect::<Vec<_>>());
}

#[test]
fn reference_geometry_gives_identity_on_vertex_dofs() {
    let mapping = LiteralCoordinateMapping::from_triangle_vertices(reference_vertices())
        .with_cell_size(Vector3::repeat(1.0));
    let m = transformation_matrix(&mapping);
    assert_eq!(m.shape(), (18, 21));
    assert_matrix_eq!(m.columns(0, 18), DMatrix::<f64>::identity(18, 18), comp = exact);
}

#[test]
fn stretched_geometry_matches_hand_computed_entries() {
    let m = transformation_matrix(&stretched_mapping());
    let s = FRAC_1_SQRT_2;

    let mut expected = DMatrix::zeros(18, 21);
    for vertex in 0..3 {
        let c = 6 * vertex;
        expected[(c, c)] = 1.0;
        expected[(c + 1, c + 1)] = 2.0;
        expected[(c + 2, c + 2)] = 1.0;
        expected[(c + 3, c + 3)] = 4.0;
        expected[(c + 4, c + 4)] = 2.0;
        expected[(c + 5, c + 5)] = 1.0;
    }

    // Edge 0 joins vertices 1 and 2 and carries flux -1/2, the other edges carry none
    expected[(6, 18)] = 1.0 / 42.0;
    expected[(12, 18)] = -1.0 / 42.0;
    for c in [6, 12] {
        expected[(c + 1, 18)] = -0.5 * s / 42.0;
        expected[(c + 2, 18)] = 0.5 * s / 42.0;
    }
    let second_derivatives = [1.0 / 1008.0, -1.0 / 504.0, 1.0 / 1008.0];
    for (i, value) in second_derivatives.into_iter().enumerate() {
        expected[(9 + i, 18)] = value;
        expected[(15 + i, 18)] = -value;
    }

    assert_matrix_eq!(m, expected, comp = abs, tol = 1e-14);
}

#[test]
fn malformed_geometry_surfaces_shape_errors() {
    let short_lengths = MalformedMapping {
        jacobian_shape: vec![2, 2],
        lengths_shape: vec![2],
    };
    assert_eq!(
        bell_basis_transformation(ReferenceCell::Triangle, 5, &short_lengths),
        Err(ElementError::Shape(ShapeError::IndexOutOfBounds {
            multiindex: vec![2],
            shape: vec![2]
        }))
    );

    let vector_jacobian = MalformedMapping {
        jacobian_shape: vec![4],
        lengths_shape: vec![3],
    };
    assert_eq!(
        bell_basis_transformation(ReferenceCell::Triangle, 5, &vector_jacobian),
        Err(ElementError::Shape(ShapeError::RankMismatch { expected: 1, actual: 2 }))
    );
}

#[test]
fn basis_evaluation_contracts_raw_tables() {
    let element = BellElement::new(RawBellStub::default()).unwrap();
    let mapping = LiteralCoordinateMapping::from_triangle_vertices(skewed_vertices());
    let points = DMatrix::from_column_slice(2, 3, &[0.2, 0.3, 0.5, 0.1, 0.0, 0.0]);

    let evaluation = element.basis_evaluation(1, &points, &mapping).unwrap();
    let raw = element.tabulate(1, &points).unwrap();
    let m = evaluate_matrix(&element.basis_transformation(&mapping).unwrap());

    let keys: Vec<_> = evaluation.keys().cloned().collect();
    assert_eq!(keys, vec![vec![0, 0], vec![0, 1], vec![1, 0]]);
    for (alpha, expr) in &evaluation {
        assert_eq!(expr.shape(), &[18, 3]);
        assert_eq!(raw[alpha].nrows(), 21);
        let expected = &m * &raw[alpha];
        assert_matrix_eq!(evaluate_matrix(expr), expected, comp = abs, tol = 1e-10);
    }
}

#[test]
fn skewed_geometry_matches_numeric_construction() {
    let mapping = LiteralCoordinateMapping::from_triangle_vertices(skewed_vertices())
        .with_cell_size(Vector3::new(0.7, 1.3, 0.9));
    assert_matrix_eq!(
        transformation_matrix(&mapping),
        numeric_transformation(&mapping),
        comp = abs,
        tol = 1e-12
    );
}

#[test]
fn basis_evaluation_queries_geometry_once_per_quantity() {
    let element = BellElement::new(RawBellStub::default()).unwrap();
    let mapping = CountingMapping::new(LiteralCoordinateMapping::from_triangle_vertices(skewed_vertices()));
    let points = DMatrix::from_column_slice(2, 1, &[0.25, 0.25]);
    let evaluation = element.basis_evaluation(0, &points, &mapping).unwrap();
    assert_eq!(evaluation.len(), 1);
    assert_eq!(mapping.calls(), 5);
}

#[test]
fn basis_evaluation_rejects_invalid_points() {
    let element = BellElement::new(RawBellStub::default()).unwrap();
    let points = DMatrix::zeros(3, 2);
    assert!(element
        .basis_evaluation(0, &points, &SymbolicCoordinateMapping)
        .is_err());
}

fn nondegenerate_triangle() -> impl Strategy<Value = [Point2<f64>; 3]> {
    let coord = -2.0..2.0f64;
    [
        coord.clone(),
        coord.clone(),
        coord.clone(),
        coord.clone(),
        coord.clone(),
        coord,
    ]
    .prop_map(|[a, b, c, d, e, f]| [Point2::new(a, b), Point2::new(c, d), Point2::new(e, f)])
    .prop_filter("Triangle must not be degenerate", |[x0, x1, x2]| {
        Matrix2::from_columns(&[x1 - x0, x2 - x0]).determinant().abs() > 0.1
    })
}

proptest! {
    #[test]
    fn symbolic_and_literal_mappings_agree(vertices in nondegenerate_triangle()) {
        let literal = LiteralCoordinateMapping::from_triangle_vertices(vertices);
        let interpreter = Interpreter::new()
            .bind(JACOBIAN, Value::from_matrix(&literal.jacobian))
            .bind(REFERENCE_NORMALS, Value::from_matrix(&literal.reference_normals))
            .bind(PHYSICAL_TANGENTS, Value::from_matrix(&literal.physical_tangents))
            .bind(PHYSICAL_EDGE_LENGTHS, Value::from_slice(literal.physical_edge_lengths.as_slice()))
            .bind(CELL_SIZE, Value::from_slice(literal.cell_size.as_slice()));

        let symbolic = bell_basis_transformation(ReferenceCell::Triangle, 5, &SymbolicCoordinateMapping).unwrap();
        let from_symbolic = evaluate_matrix_with(&interpreter, &symbolic);
        let from_literal = transformation_matrix(&literal);
        prop_assert_matrix_eq!(from_symbolic, from_literal, comp = abs, tol = 1e-10);
    }

    #[test]
    fn transformation_matches_numeric_construction(
        vertices in nondegenerate_triangle(),
        cell_size in [0.5..2.0f64, 0.5..2.0f64, 0.5..2.0f64]
    ) {
        let mapping = LiteralCoordinateMapping::from_triangle_vertices(vertices)
            .with_cell_size(Vector3::from(cell_size));
        prop_assert_matrix_eq!(
            transformation_matrix(&mapping),
            numeric_transformation(&mapping),
            comp = abs,
            tol = 1e-10
        );
    }

    #[test]
    fn cell_size_scales_derivative_rows(k in 0.1..10.0f64, vertex in 0..3usize) {
        let base = LiteralCoordinateMapping::from_triangle_vertices(skewed_vertices())
            .with_cell_size(Vector3::new(0.7, 1.3, 0.9));
        let mut cell_size = base.cell_size;
        cell_size[vertex] *= k;
        let scaled = base.clone().with_cell_size(cell_size);

        let a = transformation_matrix(&base);
        let b = transformation_matrix(&scaled);
        for row in 0..18usize {
            let factor = match row.checked_sub(6 * vertex) {
                Some(1 | 2) => k,
                Some(3..=5) => k * k,
                _ => 1.0,
            };
            prop_assert_matrix_eq!(b.row(row) * factor, a.row(row), comp = abs, tol = 1e-10);
        }
    }
}
