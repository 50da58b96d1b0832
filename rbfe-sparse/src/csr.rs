//! Helpers for assembled truth operators stored as `CsrMatrix`.
use nalgebra::{DVector, DVectorViewMut, RealField, Scalar};
use nalgebra_sparse::{CsrMatrix, SparseFormatError};

/// Applies homogeneous Dirichlet conditions to the given degrees of freedom of a symmetric matrix.
///
/// Rows and columns of constrained dofs are zeroed and a representative scale is placed on the
/// diagonal. The sparsity pattern is left untouched.
pub fn apply_homogeneous_dirichlet_bc_csr<T>(matrix: &mut CsrMatrix<T>, dofs: &[usize])
where
    T: RealField + Copy,
{
    // Setting 1 on the diagonal would ignore the scaling of the remaining entries,
    // so we use the first non-zero diagonal entry instead
    let scale = matrix
        .row_iter()
        .enumerate()
        .filter_map(|(i, row)| row.get_entry(i).map(|entry| entry.into_value()))
        .find(|&x| x != T::zero())
        .map(|x| x.abs())
        .unwrap_or(T::one());

    // Visiting column j of a Dirichlet row i tells us (by symmetry) that row j
    // must be visited to zero out column i, so we never scan the full matrix
    let mut dirichlet_membership = vec![false; matrix.nrows()];
    let mut rows_to_visit = vec![false; matrix.nrows()];

    for &row_idx in dofs {
        dirichlet_membership[row_idx] = true;
        let mut row = matrix.row_mut(row_idx);
        let (cols, values) = row.cols_and_values_mut();

        for (&col_idx, val) in cols.iter().zip(values) {
            if col_idx == row_idx {
                *val = scale;
            } else {
                *val = T::zero();
                rows_to_visit[col_idx] = true;
            }
        }
    }

    let row_visit_iter = rows_to_visit
        .iter()
        .enumerate()
        .filter_map(|(index, &should_visit)| should_visit.then_some(index));
    for row_index in row_visit_iter {
        if !dirichlet_membership[row_index] {
            let mut row = matrix.row_mut(row_index);
            let (cols, values) = row.cols_and_values_mut();
            for (&global_idx, value) in cols.iter().zip(values) {
                if dirichlet_membership[global_idx] {
                    *value = T::zero();
                }
            }
        }
    }
}

pub fn apply_homogeneous_dirichlet_bc_rhs<'a, T>(rhs: impl Into<DVectorViewMut<'a, T>>, dofs: &[usize])
where
    T: RealField + Copy,
{
    let mut rhs = rhs.into();
    for &dof in dofs {
        rhs[dof] = T::zero();
    }
}

/// Multiplies all stored entries by `alpha` in place.
pub fn scale_csr<T>(matrix: &mut CsrMatrix<T>, alpha: T)
where
    T: RealField + Copy,
{
    for v in matrix.values_mut() {
        *v *= alpha;
    }
}

/// Computes `target <- target + alpha * other`.
///
/// When both matrices share the same sparsity pattern the update is done in place on the
/// values. Otherwise the result has the union of both patterns.
pub fn add_scaled_csr<T>(target: &mut CsrMatrix<T>, alpha: T, other: &CsrMatrix<T>)
where
    T: RealField + Copy,
{
    assert_eq!(target.nrows(), other.nrows(), "Matrices must have the same number of rows.");
    assert_eq!(target.ncols(), other.ncols(), "Matrices must have the same number of columns.");
    if target.pattern() == other.pattern() {
        for (t, o) in target.values_mut().iter_mut().zip(other.values()) {
            *t += alpha * *o;
        }
    } else {
        let mut scaled = other.clone();
        scale_csr(&mut scaled, alpha);
        *target = &*target + &scaled;
    }
}

/// The stored entries of the matrix as a vector, in CSR order.
pub fn csr_values_as_vector<T: Scalar>(matrix: &CsrMatrix<T>) -> DVector<T> {
    DVector::from_column_slice(matrix.values())
}

/// A matrix with the sparsity pattern of `template` and the given stored entries.
pub fn csr_with_values<T: Scalar>(template: &CsrMatrix<T>, values: Vec<T>) -> Result<CsrMatrix<T>, SparseFormatError> {
    CsrMatrix::try_from_pattern_and_values(template.pattern().clone(), values)
}
