//! Persistence of truth tensors and online data.
use crate::util::{from_f64, vec_to_f64};
use crate::Real;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

pub mod petsc_binary;

mod permutation;
mod tensor_io;

pub use permutation::{DofMap, Permutation, PermutationRegistry};
pub use tensor_io::{tensor_load, tensor_save, TensorSignature};

/// Column-major dense matrix (or vector, or scalar) data in double precision, used to persist
/// online quantities as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseRecord {
    pub nrows: usize,
    pub ncols: usize,
    pub values: Vec<f64>,
}

impl DenseRecord {
    pub fn from_matrix<T: Real>(matrix: &DMatrix<T>) -> Self {
        Self {
            nrows: matrix.nrows(),
            ncols: matrix.ncols(),
            values: vec_to_f64(matrix.iter().copied()),
        }
    }

    pub fn from_vector<T: Real>(vector: &DVector<T>) -> Self {
        Self {
            nrows: vector.len(),
            ncols: 1,
            values: vec_to_f64(vector.iter().copied()),
        }
    }

    fn check_len(&self) -> eyre::Result<()> {
        if self.values.len() != self.nrows * self.ncols {
            eyre::bail!(
                "record of shape {}x{} holds {} values",
                self.nrows,
                self.ncols,
                self.values.len()
            );
        }
        Ok(())
    }

    pub fn to_matrix<T: Real>(&self) -> eyre::Result<DMatrix<T>> {
        self.check_len()?;
        Ok(DMatrix::from_iterator(
            self.nrows,
            self.ncols,
            self.values.iter().map(|&v| from_f64(v)),
        ))
    }

    pub fn to_vector<T: Real>(&self) -> eyre::Result<DVector<T>> {
        self.check_len()?;
        if self.ncols != 1 {
            eyre::bail!("expected a vector record, found {} columns", self.ncols);
        }
        Ok(DVector::from_iterator(self.nrows, self.values.iter().map(|&v| from_f64(v))))
    }
}
