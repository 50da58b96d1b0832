//! Projection of truth expansions onto a reduced basis.
use crate::basis::BasisFunctionsMatrix;
use crate::error::ReductionError;
use crate::expansion::AffineExpansionStorage;
use crate::functions::FunctionsMatrix;
use crate::parallel::IoProcess;
use crate::tensor::TruthTensor;
use crate::Real;
use eyre::{eyre, WrapErr};
use log::debug;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Reduced operators `Zᵀ A_q Z` and `Zᵀ F_q` of the terms of a problem.
///
/// Each term is projected at most once per basis size. When the basis has grown since the last
/// projection only the new rows and columns are computed. A basis of a different
/// [generation](BasisFunctionsMatrix::generation) discards every stored projection.
#[derive(Debug, Clone)]
pub struct ReducedOperators<T: Real> {
    bilinear: BTreeMap<String, AffineExpansionStorage<DMatrix<T>>>,
    linear: BTreeMap<String, AffineExpansionStorage<DVector<T>>>,
    basis_generation: Option<u64>,
}

impl<T: Real> PartialEq for ReducedOperators<T> {
    fn eq(&self, other: &Self) -> bool {
        self.bilinear == other.bilinear && self.linear == other.linear
    }
}

impl<T: Real> Default for ReducedOperators<T> {
    fn default() -> Self {
        Self {
            bilinear: BTreeMap::new(),
            linear: BTreeMap::new(),
            basis_generation: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ReducedOperatorsIndex {
    bilinear: Vec<String>,
    linear: Vec<String>,
}

fn truth_matrix<'a, T: Real>(
    term: &str,
    operator: &'a TruthTensor<T>,
) -> Result<&'a nalgebra_sparse::CsrMatrix<T>, ReductionError> {
    operator
        .as_matrix()
        .ok_or_else(|| ReductionError::Configuration(format!("term {} has a truth vector where a matrix is expected", term)))
}

fn truth_vector<'a, T: Real>(term: &str, operator: &'a TruthTensor<T>) -> Result<&'a DVector<T>, ReductionError> {
    operator
        .as_vector()
        .ok_or_else(|| ReductionError::Configuration(format!("term {} has a truth matrix where a vector is expected", term)))
}

impl<T: Real> ReducedOperators<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bilinear(&self, term: &str) -> Option<&AffineExpansionStorage<DMatrix<T>>> {
        self.bilinear.get(term)
    }

    pub fn linear(&self, term: &str) -> Option<&AffineExpansionStorage<DVector<T>>> {
        self.linear.get(term)
    }

    /// The basis size the operators of `term` were projected with.
    pub fn projected_len(&self, term: &str) -> Option<usize> {
        self.bilinear
            .get(term)
            .and_then(|storage| storage.iter().next().map(DMatrix::nrows))
            .or_else(|| {
                self.linear
                    .get(term)
                    .and_then(|storage| storage.iter().next().map(DVector::len))
            })
    }

    pub fn clear(&mut self) {
        self.bilinear.clear();
        self.linear.clear();
        self.basis_generation = None;
    }

    /// Declares the stored operators to be projections onto `basis`, as after loading both
    /// from the same folder.
    pub fn bind_to(&mut self, basis: &BasisFunctionsMatrix<T>) {
        self.basis_generation = Some(basis.generation());
    }

    fn sync_generation(&mut self, basis: &BasisFunctionsMatrix<T>) {
        if self.basis_generation != Some(basis.generation()) {
            if !self.bilinear.is_empty() || !self.linear.is_empty() {
                debug!("Basis was replaced, discarding all reduced operators");
            }
            self.clear();
            self.bind_to(basis);
        }
    }

    /// Projects the truth matrices of `term` onto `basis`.
    pub fn update_bilinear(
        &mut self,
        term: &str,
        operators: &AffineExpansionStorage<TruthTensor<T>>,
        basis: &BasisFunctionsMatrix<T>,
    ) -> eyre::Result<()> {
        self.sync_generation(basis);
        let n = basis.len();
        let previous = self
            .bilinear
            .remove(term)
            .filter(|storage| storage.shape() == operators.shape())
            .map(|storage| {
                let len = storage.iter().next().map_or(0, DMatrix::nrows);
                (storage, len)
            })
            .filter(|(_, len)| *len <= n);
        let (previous, old_n) = match previous {
            Some((storage, len)) if len == n => {
                debug!("Reduced operators of {} are up to date (N = {})", term, n);
                self.bilinear.insert(term.to_string(), storage);
                return Ok(());
            }
            Some((storage, len)) => (Some(storage), len),
            None => (None, 0),
        };

        let all = basis.slice(0..n)?;
        let old = basis.slice(0..old_n)?;
        let new = basis.slice(old_n..n)?;
        let mut old_blocks = previous.as_ref().filter(|_| old_n > 0).map(|previous| previous.iter());
        let projected = operators.try_map(|operator| -> eyre::Result<DMatrix<T>> {
            let a = truth_matrix(term, operator)?;
            let mut reduced = DMatrix::zeros(n, n);
            if let Some(blocks) = old_blocks.as_mut() {
                let old_block = blocks
                    .next()
                    .ok_or_else(|| eyre!("incomplete reduced operators of {}", term))?;
                reduced.view_mut((0, 0), (old_n, old_n)).copy_from(old_block);
            }
            // New rows against all functions, then new columns against the old functions
            let new_rows = new.project_bilinear(a, &all)?;
            let new_cols = old.project_bilinear(a, &new)?;
            reduced.view_mut((old_n, 0), (n - old_n, n)).copy_from(&new_rows);
            reduced.view_mut((0, old_n), (old_n, n - old_n)).copy_from(&new_cols);
            Ok(reduced)
        })?;
        debug!("Projected bilinear term {} from N = {} to N = {}", term, old_n, n);
        self.bilinear.insert(term.to_string(), projected);
        Ok(())
    }

    /// Projects the truth vectors of `term` onto `basis`.
    pub fn update_linear(
        &mut self,
        term: &str,
        operators: &AffineExpansionStorage<TruthTensor<T>>,
        basis: &BasisFunctionsMatrix<T>,
    ) -> eyre::Result<()> {
        self.sync_generation(basis);
        let n = basis.len();
        let previous = self
            .linear
            .remove(term)
            .filter(|storage| storage.shape() == operators.shape())
            .map(|storage| {
                let len = storage.iter().next().map_or(0, DVector::len);
                (storage, len)
            })
            .filter(|(_, len)| *len <= n);
        let (previous, old_n) = match previous {
            Some((storage, len)) if len == n => {
                debug!("Reduced operators of {} are up to date (N = {})", term, n);
                self.linear.insert(term.to_string(), storage);
                return Ok(());
            }
            Some((storage, len)) => (Some(storage), len),
            None => (None, 0),
        };

        let new = basis.slice(old_n..n)?;
        let mut old_blocks = previous.as_ref().filter(|_| old_n > 0).map(|previous| previous.iter());
        let projected = operators.try_map(|operator| -> eyre::Result<DVector<T>> {
            let f = truth_vector(term, operator)?;
            let mut reduced = DVector::zeros(n);
            if let Some(blocks) = old_blocks.as_mut() {
                let old_block = blocks
                    .next()
                    .ok_or_else(|| eyre!("incomplete reduced operators of {}", term))?;
                reduced.rows_mut(0, old_n).copy_from(old_block);
            }
            reduced.rows_mut(old_n, n - old_n).copy_from(&new.project_linear(f)?);
            Ok(reduced)
        })?;
        debug!("Projected linear term {} from N = {} to N = {}", term, old_n, n);
        self.linear.insert(term.to_string(), projected);
        Ok(())
    }

    pub fn save(&self, io: &IoProcess, directory: &Path) -> eyre::Result<()> {
        for (term, storage) in &self.bilinear {
            storage.save(io, directory, &format!("{}_bilinear", term))?;
        }
        for (term, storage) in &self.linear {
            storage.save(io, directory, &format!("{}_linear", term))?;
        }
        let index = ReducedOperatorsIndex {
            bilinear: self.bilinear.keys().cloned().collect(),
            linear: self.linear.keys().cloned().collect(),
        };
        let path = directory.join("reduced_operators.json");
        io.run(|| {
            fs::create_dir_all(directory)?;
            fs::write(&path, serde_json::to_string_pretty(&index)?).wrap_err_with(|| format!("failed to write {}", path.display()))
        })
    }

    /// Returns `Ok(false)` if no reduced operators were saved in `directory`.
    pub fn load(&mut self, io: &IoProcess, directory: &Path) -> eyre::Result<bool> {
        let path = directory.join("reduced_operators.json");
        if !io.file_exists(&path)? {
            return Ok(false);
        }
        let index: ReducedOperatorsIndex = io.run(|| {
            let json = fs::read_to_string(&path)?;
            serde_json::from_str(&json).wrap_err_with(|| format!("corrupt index {}", path.display()))
        })?;
        let mut loaded = Self::new();
        for term in index.bilinear {
            let storage = AffineExpansionStorage::load(io, directory, &format!("{}_bilinear", term))?
                .ok_or_else(|| eyre!("missing reduced bilinear operators of {}", term))?;
            loaded.bilinear.insert(term, storage);
        }
        for term in index.linear {
            let storage = AffineExpansionStorage::load(io, directory, &format!("{}_linear", term))?
                .ok_or_else(|| eyre!("missing reduced linear operators of {}", term))?;
            loaded.linear.insert(term, storage);
        }
        *self = loaded;
        Ok(true)
    }
}
