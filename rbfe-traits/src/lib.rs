//! Core traits shared by the `rbfe` crates.
//!
//! These traits form the contract that the reduced order core requires from a
//! high-fidelity ("truth") backend: applying an operator to a vector and evaluating
//! an inner product between two vectors.
use nalgebra::{DMatrix, DVectorView, DVectorViewMut, RealField, Scalar};
use nalgebra_sparse::ops::serial::spmm_csr_dense;
use nalgebra_sparse::ops::Op;
use nalgebra_sparse::CsrMatrix;
use std::error::Error;

pub use nalgebra;
pub use nalgebra_sparse;

pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}

/// A linear map `y = A x` between truth vectors.
pub trait LinearOperator<T: Scalar> {
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>>;
}

impl<'a, T, A> LinearOperator<T> for &'a A
where
    T: Scalar,
    A: ?Sized + LinearOperator<T>,
{
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        <A as LinearOperator<T>>::apply(self, y, x)
    }
}

impl<T: Real> LinearOperator<T> for DMatrix<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        y.gemv(T::one(), self, &x, T::zero());
        Ok(())
    }
}

impl<T: Real> LinearOperator<T> for CsrMatrix<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        spmm_csr_dense(T::zero(), &mut y, T::one(), Op::NoOp(self), Op::NoOp(&x));
        Ok(())
    }
}

pub struct IdentityOperator;

impl<T: Scalar> LinearOperator<T> for IdentityOperator {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        y.copy_from(&x);
        Ok(())
    }
}

/// A symmetric positive (semi-)definite bilinear form on truth vectors.
///
/// The basis of a reduced order model is orthonormalized with respect to an inner product,
/// and the snapshot correlation matrix of POD is built from it.
pub trait InnerProduct<T: Real> {
    fn inner(&self, x: DVectorView<T>, y: DVectorView<T>) -> T;

    fn norm(&self, x: DVectorView<T>) -> T {
        self.inner(x, x).sqrt()
    }
}

impl<'a, T, P> InnerProduct<T> for &'a P
where
    T: Real,
    P: ?Sized + InnerProduct<T>,
{
    fn inner(&self, x: DVectorView<T>, y: DVectorView<T>) -> T {
        <P as InnerProduct<T>>::inner(self, x, y)
    }
}

/// The Euclidean inner product `xᵀ y` of the dof vectors.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct EuclideanInnerProduct;

impl<T: Real> InnerProduct<T> for EuclideanInnerProduct {
    fn inner(&self, x: DVectorView<T>, y: DVectorView<T>) -> T {
        assert_eq!(x.len(), y.len(), "Vectors must have the same length.");
        x.dot(&y)
    }
}

/// The inner product `xᵀ X y` induced by an assembled inner product matrix.
impl<T: Real> InnerProduct<T> for CsrMatrix<T> {
    fn inner(&self, x: DVectorView<T>, y: DVectorView<T>) -> T {
        assert_eq!(self.nrows(), x.len(), "Inner product matrix and x must be compatible.");
        assert_eq!(self.ncols(), y.len(), "Inner product matrix and y must be compatible.");
        let mut result = T::zero();
        for (i, row) in self.row_iter().enumerate() {
            let mut x_row = T::zero();
            for (j, v) in row.col_indices().iter().zip(row.values()) {
                x_row += *v * y[*j];
            }
            result += x[i] * x_row;
        }
        result
    }
}

impl<T: Real> InnerProduct<T> for DMatrix<T> {
    fn inner(&self, x: DVectorView<T>, y: DVectorView<T>) -> T {
        assert_eq!(self.nrows(), x.len(), "Inner product matrix and x must be compatible.");
        assert_eq!(self.ncols(), y.len(), "Inner product matrix and y must be compatible.");
        x.dot(&(self * y))
    }
}
