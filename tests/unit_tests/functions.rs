use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector};
use rbfe::basis::BasisFunctionsMatrix;
use rbfe::error::ReductionError;
use rbfe::functions::{FunctionsList, FunctionsMatrix};
use rbfe::parallel::IoProcess;
use rbfe::EuclideanInnerProduct;
use util::random_functions;

fn dense(functions: &[DVector<f64>]) -> DMatrix<f64> {
    DMatrix::from_columns(functions)
}

#[test]
fn enrich_with_weights_scales_copies() {
    let functions = random_functions(5, 3, 1);
    let mut list = FunctionsList::new();
    list.enrich(&functions, Some(&[1.0, 2.0, -1.0])).unwrap();

    assert_eq!(list.len(), 3);
    assert_matrix_eq!(list[0].clone(), functions[0].clone(), comp = exact);
    assert_matrix_eq!(list[1].clone(), &functions[1] * 2.0, comp = float);
    assert_matrix_eq!(list[2].clone(), -&functions[2], comp = float);
}

#[test]
fn enrich_rejects_inconsistent_dimensions() {
    let mut list = FunctionsList::new();
    list.enrich(&random_functions(4, 2, 2), None).unwrap();

    let err = list.enrich(&random_functions(5, 1, 3), None).unwrap_err();
    assert_eq!(err, ReductionError::DimensionMismatch { expected: 4, actual: 5 });
    let err = list
        .enrich_owned(random_functions(4, 2, 4), Some(&[1.0]))
        .unwrap_err();
    assert_eq!(err, ReductionError::DimensionMismatch { expected: 2, actual: 1 });
    assert_eq!(list.len(), 2);
}

#[test]
fn named_products_match_dense_algebra() {
    let functions = random_functions(7, 4, 5);
    let list = FunctionsList::from_functions(functions.clone()).unwrap();
    let z = dense(&functions);

    let coefficients = DMatrix::from_fn(4, 2, |i, j| (i + 2 * j) as f64 - 1.5);
    let product = list.multiply_by_dense_matrix(&coefficients).unwrap();
    assert_eq!(product.len(), 2);
    assert_matrix_eq!(dense(product.as_slice()), &z * &coefficients, comp = abs, tol = 1e-14);

    let v = DVector::from_vec(vec![0.5, -1.0, 2.0, 0.0]);
    assert_matrix_eq!(list.multiply_by_vector(&v).unwrap(), &z * &v, comp = abs, tol = 1e-14);

    let f = random_functions(7, 1, 6).remove(0);
    assert_matrix_eq!(list.project_linear(&f).unwrap(), z.transpose() * &f, comp = abs, tol = 1e-14);

    let a = DMatrix::from_fn(7, 7, |i, j| 1.0 / (1.0 + i as f64 + j as f64));
    let other = FunctionsList::from_functions(random_functions(7, 3, 7)).unwrap();
    let w = dense(other.as_slice());
    assert_matrix_eq!(
        list.project_bilinear(&a, &other).unwrap(),
        z.transpose() * &a * &w,
        comp = abs,
        tol = 1e-13
    );
    assert_matrix_eq!(
        list.gram_matrix(&EuclideanInnerProduct, &other).unwrap(),
        z.transpose() * &w,
        comp = abs,
        tol = 1e-13
    );
}

#[test]
fn named_products_validate_lengths() {
    let list = FunctionsList::from_functions(random_functions(3, 2, 8)).unwrap();
    let err = list.multiply_by_vector(&DVector::zeros(3)).unwrap_err();
    assert_eq!(err, ReductionError::DimensionMismatch { expected: 2, actual: 3 });
    let err = list.project_linear(&DVector::zeros(4)).unwrap_err();
    assert_eq!(err, ReductionError::DimensionMismatch { expected: 3, actual: 4 });
}

#[test]
fn slices_and_views_keep_order() {
    let functions = random_functions(3, 5, 9);
    let list = FunctionsList::from_functions(functions.clone()).unwrap();
    let view = list.slice(1..4).unwrap();
    assert_eq!(view.len(), 3);
    for (f, g) in view.iter().zip(&functions[1..4]) {
        assert_eq!(f, g);
    }
    assert!(list.slice(2..6).is_err());
}

#[test]
fn functions_list_save_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let io = IoProcess::serial();
    let list = FunctionsList::from_functions(random_functions(6, 3, 10)).unwrap();
    list.save(&io, dir.path(), "functions").unwrap();

    let mut loaded = FunctionsList::<f64>::new();
    assert!(loaded.load(&io, dir.path(), "functions").unwrap());
    assert_eq!(loaded, list);

    let mut missing = FunctionsList::<f64>::new();
    assert!(!missing.load(&io, dir.path(), "other").unwrap());
    assert!(missing.is_empty());
}

#[test]
fn basis_components_have_stable_indices() {
    let mut basis = BasisFunctionsMatrix::with_components(&["u", "p"]).unwrap();
    let u = random_functions(4, 3, 11);
    let p = random_functions(4, 2, 12);
    basis.enrich(&u[..2], Some("u"), None).unwrap();
    basis.enrich(&p, Some("p"), None).unwrap();
    basis.enrich(&u[2..], Some("u"), None).unwrap();

    assert_eq!(basis.len(), 5);
    assert_eq!(basis.component_range(Some("u")).unwrap(), 0..3);
    assert_eq!(basis.component_range(Some("p")).unwrap(), 3..5);
    assert_eq!(basis.get(2), Some(&u[2]));
    assert_eq!(basis.get(3), Some(&p[0]));

    let view = basis.slice_components(&[1, 2]).unwrap();
    let expected = [&u[0], &p[0], &p[1]];
    assert_eq!(view.len(), 3);
    for (f, g) in view.iter().zip(expected) {
        assert_eq!(f, g);
    }

    assert!(basis.enrich(&u, None, None).is_err());
    assert!(basis.enrich(&u, Some("q"), None).is_err());
    assert!(BasisFunctionsMatrix::<f64>::with_components(&["u", "u"]).is_err());
}

#[test]
fn basis_save_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let io = IoProcess::serial();
    let mut basis = BasisFunctionsMatrix::with_components(&["u", "p"]).unwrap();
    basis
        .enrich_owned(random_functions(5, 2, 13), Some("u"), None)
        .unwrap();
    basis
        .enrich_owned(random_functions(5, 1, 14), Some("p"), None)
        .unwrap();
    basis.save(&io, dir.path(), "basis").unwrap();

    let mut loaded = BasisFunctionsMatrix::with_components(&["u", "p"]).unwrap();
    assert!(loaded.load(&io, dir.path(), "basis").unwrap());
    assert_eq!(loaded, basis);

    let mut untouched = BasisFunctionsMatrix::<f64>::new();
    assert!(!untouched.load(&io, dir.path(), "missing").unwrap());
    assert!(untouched.is_empty());

    let mut mismatched = BasisFunctionsMatrix::<f64>::with_components(&["v"]).unwrap();
    assert!(mismatched.load(&io, dir.path(), "basis").is_err());
}
