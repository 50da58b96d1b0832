use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector};
use rbfe::error::ReductionError;
use rbfe::expansion::{AffineExpansionStorage, ExpansionType};
use rbfe::parallel::IoProcess;
use util::assert_panics;

#[test]
fn with_shape_accepts_orders_one_and_two() {
    let storage = AffineExpansionStorage::<DVector<f64>>::with_shape(&[3]).unwrap();
    assert_eq!(storage.order(), 1);
    assert_eq!(storage.len(), 3);
    assert!(!storage.is_complete());
    assert_eq!(storage.iter().count(), 0);

    let storage = AffineExpansionStorage::<DVector<f64>>::with_shape(&[2, 3]).unwrap();
    assert_eq!(storage.order(), 2);
    assert_eq!(storage.shape(), &[2, 3]);
    assert_eq!(storage.len(), 6);

    for shape in [&[][..], &[1, 2, 3][..]] {
        let err = AffineExpansionStorage::<DVector<f64>>::with_shape(shape).unwrap_err();
        assert_eq!(err, ReductionError::InvalidOperandCount(shape.len()));
    }
}

#[test]
fn order_two_entries_are_row_major() {
    let mut storage = AffineExpansionStorage::with_shape(&[2, 3]).unwrap();
    for i in 0..2 {
        for j in 0..3 {
            storage.set((i, j), 10 * i + j).unwrap();
        }
    }
    assert!(storage.is_complete());
    assert_eq!(storage.iter().copied().collect::<Vec<_>>(), vec![0, 1, 2, 10, 11, 12]);
    assert_eq!(storage[(1, 2)], 12);
    assert_eq!(storage.get((1, 0)), Some(&10));

    let grid = AffineExpansionStorage::from_grid(2, 3, vec![0, 1, 2, 10, 11, 12]).unwrap();
    assert_eq!(grid, storage);
}

#[test]
fn indices_are_validated_against_the_order() {
    let mut storage = AffineExpansionStorage::with_shape(&[2]).unwrap();
    assert_eq!(
        storage.set(2, 1.0).unwrap_err(),
        ReductionError::IndexOutOfBounds { index: 2, len: 2 }
    );
    assert_eq!(storage.set((0, 0), 1.0).unwrap_err(), ReductionError::InvalidOperandCount(2));
    assert_eq!(storage.get(1), None);

    let grid = AffineExpansionStorage::from_grid(1, 2, vec![1.0, 2.0]).unwrap();
    assert_eq!(grid.get(0), None);
    assert_eq!(grid.get((1, 0)), None);
    assert_panics!(grid[(0, 2)]);

    assert_eq!(
        AffineExpansionStorage::from_grid(2, 2, vec![1.0]).unwrap_err(),
        ReductionError::DimensionMismatch { expected: 4, actual: 1 }
    );
}

#[test]
fn try_map_keeps_shape_and_unset_entries() {
    let mut storage = AffineExpansionStorage::with_shape(&[3]).unwrap();
    storage.set(0, 1).unwrap();
    storage.set(2, 3).unwrap();

    let doubled = storage.try_map(|&x| Ok::<_, ReductionError>(2 * x)).unwrap();
    assert_eq!(doubled.shape(), &[3]);
    assert_eq!(doubled.get(0), Some(&2));
    assert_eq!(doubled.get(1), None);
    assert_eq!(doubled.get(2), Some(&6));

    let err = storage
        .try_map(|&x| if x > 2 { Err(x) } else { Ok(x) })
        .unwrap_err();
    assert_eq!(err, 3);
}

#[test]
fn save_and_load_online_expansions() {
    let dir = tempfile::tempdir().unwrap();
    let io = IoProcess::serial();

    let matrices = AffineExpansionStorage::from_grid(
        1,
        2,
        vec![
            DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]),
            DMatrix::from_row_slice(2, 2, &[-1.0, 0.5, 0.25, 8.0]),
        ],
    )
    .unwrap();
    matrices.save(&io, dir.path(), "a").unwrap();
    let loaded = AffineExpansionStorage::<DMatrix<f64>>::load(&io, dir.path(), "a")
        .unwrap()
        .unwrap();
    assert_eq!(loaded.shape(), &[1, 2]);
    assert_matrix_eq!(loaded[(0, 1)].clone(), matrices[(0, 1)].clone(), comp = exact);
    assert_eq!(loaded, matrices);

    let mut partial = AffineExpansionStorage::with_shape(&[2]).unwrap();
    partial.set(1, DVector::from_vec(vec![1.0, -2.0, 3.0])).unwrap();
    partial.save(&io, dir.path(), "f").unwrap();
    let loaded = AffineExpansionStorage::<DVector<f64>>::load(&io, dir.path(), "f")
        .unwrap()
        .unwrap();
    assert_eq!(loaded, partial);

    assert!(AffineExpansionStorage::<DVector<f64>>::load(&io, dir.path(), "missing")
        .unwrap()
        .is_none());
}

#[test]
fn expansion_type_tags() {
    for tag in [
        "operators",
        "error_estimation_operators_11",
        "error_estimation_operators_21",
        "error_estimation_operators_22",
    ] {
        let kind: ExpansionType = tag.parse().unwrap();
        assert_eq!(kind.to_string(), tag);
        assert_eq!(kind.is_error_estimation(), tag != "operators");
    }
    assert_eq!(
        "error_estimation_operators_12".parse::<ExpansionType>().unwrap_err(),
        ReductionError::InvalidExpansionType("error_estimation_operators_12".to_string())
    );
}
