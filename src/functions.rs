//! Ordered collections of truth functions and the products between them and online data.
use crate::error::{check_dimension, ReductionError};
use crate::io::petsc_binary::{read_vector, write_vector};
use crate::parallel::IoProcess;
use crate::util::from_f64;
use crate::{InnerProduct, LinearOperator, Real};
use eyre::{eyre, WrapErr};
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut, Scalar};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::{Index, Range};
use std::path::{Path, PathBuf};

/// A collection of truth functions `Z = [z_0, ..., z_{N-1}]` seen as the columns of a tall matrix.
///
/// Provides the named products between such collections, truth operators and online data.
pub trait FunctionsMatrix<T: Real> {
    fn num_functions(&self) -> usize;

    /// # Panics
    ///
    /// Panics if `index >= self.num_functions()`.
    fn function(&self, index: usize) -> &DVector<T>;

    /// The length of the dof vectors, or `None` for an empty collection.
    fn truth_dim(&self) -> Option<usize> {
        (self.num_functions() > 0).then(|| self.function(0).len())
    }

    /// Computes `Z C`, i.e. one function `Σ_i z_i C[i, j]` per column `j` of `C`.
    fn multiply_by_dense_matrix(&self, coefficients: &DMatrix<T>) -> Result<FunctionsList<T>, ReductionError> {
        check_dimension(self.num_functions(), coefficients.nrows())?;
        let mut output = FunctionsList::new();
        for column in coefficients.column_iter() {
            output.push(self.multiply_by_vector(column)?)?;
        }
        Ok(output)
    }

    /// Computes `Z c = Σ_i z_i c[i]`.
    fn multiply_by_vector<'a>(&self, coefficients: impl Into<DVectorView<'a, T>>) -> Result<DVector<T>, ReductionError> {
        let coefficients = coefficients.into();
        check_dimension(self.num_functions(), coefficients.len())?;
        let dim = self
            .truth_dim()
            .ok_or_else(|| ReductionError::InvalidArgument("cannot combine an empty set of functions".to_string()))?;
        let mut result = DVector::zeros(dim);
        for (i, &c) in coefficients.iter().enumerate() {
            result.axpy(c, self.function(i), T::one());
        }
        Ok(result)
    }

    /// Computes `Zᵀ f`.
    fn project_linear(&self, f: &DVector<T>) -> Result<DVector<T>, ReductionError> {
        if let Some(dim) = self.truth_dim() {
            check_dimension(dim, f.len())?;
        }
        Ok(DVector::from_fn(self.num_functions(), |i, _| self.function(i).dot(f)))
    }

    /// Computes `Zᵀ A W`.
    ///
    /// The products `A w_j` are computed in parallel.
    fn project_bilinear<A, W>(&self, operator: &A, other: &W) -> eyre::Result<DMatrix<T>>
    where
        Self: Sync,
        A: ?Sized + LinearOperator<T> + Sync,
        W: ?Sized + FunctionsMatrix<T> + Sync,
    {
        let (n, m) = (self.num_functions(), other.num_functions());
        let Some(dim) = self.truth_dim() else {
            return Ok(DMatrix::zeros(n, m));
        };
        let operator_times_other = (0..m)
            .into_par_iter()
            .map(|j| -> Result<DVector<T>, String> {
                let mut result = DVector::zeros(dim);
                operator
                    .apply(DVectorViewMut::from(&mut result), DVectorView::from(other.function(j)))
                    .map_err(|err| err.to_string())?;
                Ok(result)
            })
            .collect::<Result<Vec<_>, String>>()
            .map_err(|msg| eyre!("failed to apply truth operator: {}", msg))?;

        Ok(DMatrix::from_fn(n, m, |i, j| self.function(i).dot(&operator_times_other[j])))
    }

    /// Computes `(Zᵀ X W)_{ij} = ⟨z_i, w_j⟩_X` for the given inner product.
    fn gram_matrix<P, W>(&self, inner_product: &P, other: &W) -> Result<DMatrix<T>, ReductionError>
    where
        Self: Sync,
        P: ?Sized + InnerProduct<T> + Sync,
        W: ?Sized + FunctionsMatrix<T> + Sync,
    {
        if let (Some(a), Some(b)) = (self.truth_dim(), other.truth_dim()) {
            check_dimension(a, b)?;
        }
        let (n, m) = (self.num_functions(), other.num_functions());
        let rows: Vec<Vec<T>> = (0..n)
            .into_par_iter()
            .map(|i| {
                let z_i = DVectorView::from(self.function(i));
                (0..m)
                    .map(|j| inner_product.inner(z_i, DVectorView::from(other.function(j))))
                    .collect()
            })
            .collect();
        Ok(DMatrix::from_fn(n, m, |i, j| rows[i][j]))
    }
}

/// A growable, ordered list of truth functions sharing the same dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionsList<T: Scalar> {
    functions: Vec<DVector<T>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionsListMetadata {
    len: usize,
    dim: usize,
}

impl<T: Real> Default for FunctionsList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Real> FunctionsList<T> {
    pub fn new() -> Self {
        Self { functions: Vec::new() }
    }

    pub fn from_functions(functions: Vec<DVector<T>>) -> Result<Self, ReductionError> {
        let mut list = Self::new();
        list.enrich_owned(functions, None)?;
        Ok(list)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DVector<T>> {
        self.functions.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut DVector<T>> {
        self.functions.get_mut(index)
    }

    pub fn as_slice(&self) -> &[DVector<T>] {
        &self.functions
    }

    pub fn iter(&self) -> std::slice::Iter<DVector<T>> {
        self.functions.iter()
    }

    pub fn into_inner(self) -> Vec<DVector<T>> {
        self.functions
    }

    fn check_compatible<'a>(
        &self,
        functions: impl IntoIterator<Item = &'a DVector<T>>,
        weights: Option<&[T]>,
        count: usize,
    ) -> Result<(), ReductionError> {
        if let Some(weights) = weights {
            check_dimension(count, weights.len())?;
        }
        let mut dim = self.truth_dim();
        for f in functions {
            match dim {
                Some(d) => check_dimension(d, f.len())?,
                None => dim = Some(f.len()),
            }
        }
        Ok(())
    }

    pub(crate) fn push(&mut self, function: DVector<T>) -> Result<(), ReductionError> {
        if let Some(dim) = self.truth_dim() {
            check_dimension(dim, function.len())?;
        }
        self.functions.push(function);
        Ok(())
    }

    /// Appends copies of `functions`, each scaled by the corresponding weight if given.
    pub fn enrich(&mut self, functions: &[DVector<T>], weights: Option<&[T]>) -> Result<(), ReductionError> {
        self.check_compatible(functions, weights, functions.len())?;
        for (i, f) in functions.iter().enumerate() {
            let f = match weights {
                Some(w) => f * w[i],
                None => f.clone(),
            };
            self.functions.push(f);
        }
        Ok(())
    }

    /// Appends `functions` without copying their data.
    pub fn enrich_owned(&mut self, functions: Vec<DVector<T>>, weights: Option<&[T]>) -> Result<(), ReductionError> {
        self.check_compatible(&functions, weights, functions.len())?;
        for (i, mut f) in functions.into_iter().enumerate() {
            if let Some(w) = weights {
                f *= w[i];
            }
            self.functions.push(f);
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.functions.clear();
    }

    /// A view of the functions with indices in `range`.
    pub fn slice(&self, range: Range<usize>) -> Result<FunctionsView<T>, ReductionError> {
        if range.end > self.len() || range.start > range.end {
            return Err(ReductionError::IndexOutOfBounds {
                index: range.end,
                len: self.len(),
            });
        }
        Ok(FunctionsView {
            functions: self.functions[range].iter().collect(),
        })
    }

    pub fn as_view(&self) -> FunctionsView<T> {
        FunctionsView {
            functions: self.functions.iter().collect(),
        }
    }

    fn metadata_path(directory: &Path, filename: &str) -> PathBuf {
        directory.join(format!("{}.json", filename))
    }

    fn function_path(directory: &Path, filename: &str, index: usize) -> PathBuf {
        directory.join(format!("{}_{}.dat", filename, index))
    }

    pub fn save(&self, io: &IoProcess, directory: &Path, filename: &str) -> eyre::Result<()> {
        let metadata = FunctionsListMetadata {
            len: self.len(),
            dim: self.truth_dim().unwrap_or(0),
        };
        io.run(|| {
            fs::create_dir_all(directory)?;
            for (i, f) in self.functions.iter().enumerate() {
                write_vector(&Self::function_path(directory, filename, i), f)?;
            }
            let path = Self::metadata_path(directory, filename);
            fs::write(&path, serde_json::to_string_pretty(&metadata)?)
                .wrap_err_with(|| format!("failed to write {}", path.display()))
        })
    }

    /// Loads a previously saved list.
    ///
    /// Returns `Ok(false)` and leaves the list untouched if nothing was saved, or if the list
    /// already holds functions.
    pub fn load(&mut self, io: &IoProcess, directory: &Path, filename: &str) -> eyre::Result<bool> {
        if !self.is_empty() {
            return Ok(false);
        }
        let metadata_path = Self::metadata_path(directory, filename);
        if !io.file_exists(&metadata_path)? {
            return Ok(false);
        }
        let functions: Vec<Vec<f64>> = io.run(|| {
            let json = fs::read_to_string(&metadata_path)?;
            let metadata: FunctionsListMetadata = serde_json::from_str(&json)
                .wrap_err_with(|| format!("corrupt metadata {}", metadata_path.display()))?;
            (0..metadata.len)
                .map(|i| {
                    let f = read_vector::<f64>(&Self::function_path(directory, filename, i))?;
                    if f.len() != metadata.dim {
                        return Err(eyre!(
                            "function {} of {} has {} dofs, expected {}",
                            i,
                            filename,
                            f.len(),
                            metadata.dim
                        ));
                    }
                    Ok(f.as_slice().to_vec())
                })
                .collect()
        })?;
        self.functions = functions
            .into_iter()
            .map(|values| DVector::from_iterator(values.len(), values.into_iter().map(from_f64)))
            .collect();
        Ok(true)
    }
}

impl<T: Real> FunctionsMatrix<T> for FunctionsList<T> {
    fn num_functions(&self) -> usize {
        self.len()
    }

    fn function(&self, index: usize) -> &DVector<T> {
        &self.functions[index]
    }
}

impl<T: Scalar> Index<usize> for FunctionsList<T> {
    type Output = DVector<T>;

    fn index(&self, index: usize) -> &DVector<T> {
        &self.functions[index]
    }
}

impl<'a, T: Scalar> IntoIterator for &'a FunctionsList<T> {
    type Item = &'a DVector<T>;
    type IntoIter = std::slice::Iter<'a, DVector<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.functions.iter()
    }
}

/// Borrowed functions of a list or basis, valid while the owner is not modified.
#[derive(Debug, Clone)]
pub struct FunctionsView<'a, T: Scalar> {
    functions: Vec<&'a DVector<T>>,
}

impl<'a, T: Real> FunctionsView<'a, T> {
    pub(crate) fn from_refs(functions: Vec<&'a DVector<T>>) -> Self {
        Self { functions }
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a DVector<T>> + '_ {
        self.functions.iter().copied()
    }

    pub fn to_owned(&self) -> FunctionsList<T> {
        FunctionsList {
            functions: self.functions.iter().map(|&f| f.clone()).collect(),
        }
    }
}

impl<'a, T: Real> FunctionsMatrix<T> for FunctionsView<'a, T> {
    fn num_functions(&self) -> usize {
        self.functions.len()
    }

    fn function(&self, index: usize) -> &DVector<T> {
        self.functions[index]
    }
}
