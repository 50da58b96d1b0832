//! Proper orthogonal decomposition of a set of snapshots.
use crate::eigen::{DenseEigenSolver, EigenSolver, EigenSolverParameters, Spectrum};
use crate::error::ReductionError;
use crate::functions::{FunctionsList, FunctionsMatrix};
use crate::parallel::IoProcess;
use crate::util::{from_f64, to_f64, vec_to_f64};
use crate::{InnerProduct, Real};
use eyre::WrapErr;
use log::{debug, info};
use nalgebra::{DMatrix, DVector, DVectorView};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::fs;
use std::path::Path;

/// Snapshots retained for POD, each with a weight.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotsList<T: Real> {
    snapshots: FunctionsList<T>,
    weights: Vec<T>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotWeights {
    weights: Vec<f64>,
}

impl<T: Real> Default for SnapshotsList<T> {
    fn default() -> Self {
        Self {
            snapshots: FunctionsList::new(),
            weights: Vec::new(),
        }
    }
}

impl<T: Real> SnapshotsList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn snapshots(&self) -> &FunctionsList<T> {
        &self.snapshots
    }

    pub fn weights(&self) -> &[T] {
        &self.weights
    }

    pub fn store_snapshot(&mut self, snapshot: &DVector<T>, weight: Option<T>) -> Result<(), ReductionError> {
        self.snapshots.enrich(std::slice::from_ref(snapshot), None)?;
        self.weights.push(weight.unwrap_or_else(T::one));
        Ok(())
    }

    pub fn store_snapshot_owned(&mut self, snapshot: DVector<T>, weight: Option<T>) -> Result<(), ReductionError> {
        self.snapshots.enrich_owned(vec![snapshot], None)?;
        self.weights.push(weight.unwrap_or_else(T::one));
        Ok(())
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.weights.clear();
    }

    /// The weighted correlation matrix `C_ij = w_i w_j ⟨s_i, s_j⟩`.
    pub fn correlation_matrix<P>(&self, inner_product: &P) -> Result<DMatrix<T>, ReductionError>
    where
        P: ?Sized + InnerProduct<T> + Sync,
    {
        let mut correlation = self.snapshots.gram_matrix(inner_product, &self.snapshots)?;
        for ((i, j), c) in (0..self.len())
            .flat_map(|j| (0..self.len()).map(move |i| (i, j)))
            .zip(correlation.iter_mut())
        {
            *c *= self.weights[i] * self.weights[j];
        }
        Ok(correlation)
    }

    pub fn save(&self, io: &IoProcess, directory: &Path, filename: &str) -> eyre::Result<()> {
        self.snapshots.save(io, directory, filename)?;
        let record = SnapshotWeights {
            weights: vec_to_f64(self.weights.iter().copied()),
        };
        let path = directory.join(format!("{}.weights.json", filename));
        io.run(|| {
            fs::write(&path, serde_json::to_string(&record)?).wrap_err_with(|| format!("failed to write {}", path.display()))
        })
    }

    pub fn load(&mut self, io: &IoProcess, directory: &Path, filename: &str) -> eyre::Result<bool> {
        if !self.is_empty() {
            return Ok(false);
        }
        let path = directory.join(format!("{}.weights.json", filename));
        if !io.file_exists(&path)? {
            return Ok(false);
        }
        let record: SnapshotWeights = io.run(|| {
            let json = fs::read_to_string(&path)?;
            serde_json::from_str(&json).wrap_err_with(|| format!("corrupt snapshot weights {}", path.display()))
        })?;
        let mut snapshots = FunctionsList::new();
        if !snapshots.load(io, directory, filename)? || snapshots.len() != record.weights.len() {
            eyre::bail!("snapshots of {} do not match their weights", filename);
        }
        self.snapshots = snapshots;
        self.weights = record.weights.into_iter().map(from_f64).collect();
        Ok(true)
    }
}

/// Result of a POD.
#[derive(Debug, Clone)]
pub struct PodOutput<T: Real> {
    /// All eigenvalues of the correlation matrix, in descending order.
    pub eigenvalues: Vec<T>,
    /// `retained_energy[k]` is the fraction of energy captured by the first `k + 1` modes.
    pub retained_energy: Vec<T>,
    /// The retained modes, orthonormal in the inner product of the decomposition.
    pub modes: FunctionsList<T>,
    pub n: usize,
}

impl<T: Real> PodOutput<T> {
    /// Writes eigenvalues and retained energy as text files, one value per line.
    pub fn save_eigenvalues(&self, io: &IoProcess, directory: &Path, filename: &str) -> eyre::Result<()> {
        let format = |values: &[T]| {
            let mut text = String::new();
            for &v in values {
                // Writing into a String cannot fail
                let _ = writeln!(text, "{:e}", to_f64(v));
            }
            text
        };
        let eigenvalues = format(&self.eigenvalues);
        let retained_energy = format(&self.retained_energy);
        io.run(|| {
            fs::create_dir_all(directory)?;
            fs::write(directory.join(format!("{}_eigenvalues.txt", filename)), eigenvalues)?;
            fs::write(directory.join(format!("{}_retained_energy.txt", filename)), retained_energy)?;
            Ok(())
        })
    }
}

#[derive(Debug, Clone)]
pub struct ProperOrthogonalDecomposition<T: Real, P> {
    inner_product: P,
    snapshots: SnapshotsList<T>,
}

impl<T, P> ProperOrthogonalDecomposition<T, P>
where
    T: Real,
    P: InnerProduct<T> + Sync,
{
    pub fn new(inner_product: P) -> Self {
        Self {
            inner_product,
            snapshots: SnapshotsList::new(),
        }
    }

    pub fn store_snapshot(&mut self, snapshot: &DVector<T>, weight: Option<T>) -> Result<(), ReductionError> {
        self.snapshots.store_snapshot(snapshot, weight)
    }

    pub fn snapshots(&self) -> &SnapshotsList<T> {
        &self.snapshots
    }

    pub fn snapshots_mut(&mut self) -> &mut SnapshotsList<T> {
        &mut self.snapshots
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }

    /// Computes at most `n_max` modes.
    ///
    /// Stops once the retained energy reaches `1 - tol`, or before an eigenvalue that is
    /// indistinguishable from round-off, i.e. not larger than `K d ε λ_max` for `K` snapshots of
    /// dimension `d`.
    pub fn apply(&self, n_max: usize, tol: T) -> Result<PodOutput<T>, ReductionError> {
        let k = self.snapshots.len();
        if k == 0 {
            return Ok(PodOutput {
                eigenvalues: Vec::new(),
                retained_energy: Vec::new(),
                modes: FunctionsList::new(),
                n: 0,
            });
        }

        let correlation = self.snapshots.correlation_matrix(&self.inner_product)?;
        let mut solver = DenseEigenSolver::new(correlation);
        solver.set_parameters(EigenSolverParameters::default().with_spectrum(Spectrum::LargestReal));
        let n_converged = solver.solve(k)?;
        let eigenvalues = (0..n_converged)
            .map(|i| solver.eigenvalue(i))
            .collect::<Result<Vec<_>, _>>()?;

        let lambda_max = eigenvalues[0].max(T::zero());
        let dim = self.snapshots.snapshots().truth_dim().unwrap_or(1);
        let noise = from_f64::<T>((k * dim) as f64 * f64::EPSILON) * lambda_max;
        let total_energy = eigenvalues
            .iter()
            .fold(T::zero(), |sum, &lambda| sum + lambda.max(T::zero()));

        let mut retained_energy = Vec::with_capacity(eigenvalues.len());
        let mut cumulative = T::zero();
        for &lambda in &eigenvalues {
            cumulative += lambda.max(T::zero());
            retained_energy.push(if total_energy > T::zero() {
                cumulative / total_energy
            } else {
                T::zero()
            });
        }

        let mut n = 0;
        while n < n_max.min(eigenvalues.len()) {
            if eigenvalues[n] <= noise || eigenvalues[n] <= T::zero() {
                debug!("POD: eigenvalue {} is at round-off level, stopping", n);
                break;
            }
            n += 1;
            if retained_energy[n - 1] >= T::one() - tol {
                break;
            }
        }

        let mut modes = FunctionsList::new();
        for i in 0..n {
            let v = solver.eigenvector(i)?;
            let coefficients = v.component_mul(&DVector::from_column_slice(self.snapshots.weights()));
            let mut mode = self.snapshots.snapshots().multiply_by_vector(&coefficients)?;
            let norm = self.inner_product.norm(DVectorView::from(&mode));
            mode.unscale_mut(norm);
            modes.push(mode)?;
        }

        info!(
            "POD retained {} modes of {} snapshots ({:.6e} of the energy)",
            n,
            k,
            n.checked_sub(1).map(|i| to_f64(retained_energy[i])).unwrap_or(0.0)
        );
        Ok(PodOutput {
            eigenvalues,
            retained_energy,
            modes,
            n,
        })
    }
}
