//! Symmetric (generalized) eigenvalue problems.
use crate::error::ReductionError;
use crate::util::from_f64;
use crate::Real;
use log::debug;
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Which end of the spectrum is returned first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Spectrum {
    LargestReal,
    SmallestReal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EigenSolverParameters {
    pub spectrum: Spectrum,
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for EigenSolverParameters {
    fn default() -> Self {
        Self {
            spectrum: Spectrum::LargestReal,
            tolerance: f64::EPSILON,
            max_iterations: 0,
        }
    }
}

impl EigenSolverParameters {
    pub fn with_spectrum(self, spectrum: Spectrum) -> Self {
        Self { spectrum, ..self }
    }

    pub fn with_tolerance(self, tolerance: f64) -> Self {
        Self { tolerance, ..self }
    }

    /// Maximum number of iterations of the eigensolver, `0` means unlimited.
    pub fn with_max_iterations(self, max_iterations: usize) -> Self {
        Self { max_iterations, ..self }
    }
}

/// An eigenvalue problem `A x = λ B x` with symmetric `A` and symmetric positive definite `B`.
///
/// Results are only available after a call to [`EigenSolver::solve`], and are ordered
/// according to the configured [`Spectrum`].
pub trait EigenSolver<T: Real> {
    fn set_parameters(&mut self, parameters: EigenSolverParameters);

    /// Computes `n_eigs` eigenpairs and returns the number of converged pairs.
    ///
    /// If fewer pairs converge, the converged ones remain accessible and
    /// [`ReductionError::Convergence`] is returned.
    fn solve(&mut self, n_eigs: usize) -> Result<usize, ReductionError>;

    fn num_converged(&self) -> Result<usize, ReductionError>;

    fn eigenvalue(&self, index: usize) -> Result<T, ReductionError>;

    fn eigenvector(&self, index: usize) -> Result<DVector<T>, ReductionError>;
}

#[derive(Debug, Clone)]
enum SolverState<T: Real> {
    Configured,
    Solved {
        eigenvalues: Vec<T>,
        eigenvectors: Vec<DVector<T>>,
    },
}

/// Dense eigensolver built on the symmetric QR algorithm of `nalgebra`.
///
/// Generalized problems are reduced to standard form with a Cholesky factorization of `B`.
/// Constrained (homogeneous Dirichlet) dofs are removed before solving and the eigenvectors
/// are zero on them.
#[derive(Debug, Clone)]
pub struct DenseEigenSolver<T: Real> {
    a: DMatrix<T>,
    b: Option<DMatrix<T>>,
    constrained_dofs: Vec<usize>,
    parameters: EigenSolverParameters,
    state: SolverState<T>,
}

impl<T: Real> DenseEigenSolver<T> {
    pub fn new(a: DMatrix<T>) -> Self {
        assert!(a.is_square(), "Eigenvalue problems require a square operator.");
        Self {
            a,
            b: None,
            constrained_dofs: Vec::new(),
            parameters: EigenSolverParameters::default(),
            state: SolverState::Configured,
        }
    }

    pub fn with_mass_matrix(self, b: DMatrix<T>) -> Self {
        assert_eq!(b.shape(), self.a.shape(), "Mass matrix must have the same shape as the operator.");
        Self { b: Some(b), ..self }
    }

    pub fn with_dirichlet_dofs(self, mut dofs: Vec<usize>) -> Self {
        dofs.sort_unstable();
        dofs.dedup();
        assert!(dofs.iter().all(|&d| d < self.a.nrows()), "Constrained dof out of bounds.");
        Self {
            constrained_dofs: dofs,
            ..self
        }
    }

    fn free_dofs(&self) -> Vec<usize> {
        (0..self.a.nrows())
            .filter(|d| self.constrained_dofs.binary_search(d).is_err())
            .collect()
    }

    fn solved(&self) -> Result<(&[T], &[DVector<T>]), ReductionError> {
        match &self.state {
            SolverState::Configured => Err(ReductionError::NotSolved),
            SolverState::Solved {
                eigenvalues,
                eigenvectors,
            } => Ok((eigenvalues, eigenvectors)),
        }
    }
}

impl<T: Real> EigenSolver<T> for DenseEigenSolver<T> {
    fn set_parameters(&mut self, parameters: EigenSolverParameters) {
        self.parameters = parameters;
        self.state = SolverState::Configured;
    }

    fn solve(&mut self, n_eigs: usize) -> Result<usize, ReductionError> {
        let free = self.free_dofs();
        let n_free = free.len();
        let a_ff = self.a.select_rows(&free).select_columns(&free);

        // Reduce A x = λ B x to C y = λ y with C = L⁻¹ A L⁻ᵀ, B = L Lᵀ and x = L⁻ᵀ y
        let cholesky_factor = match &self.b {
            Some(b) => {
                let b_ff = b.select_rows(&free).select_columns(&free);
                let cholesky = b_ff.cholesky().ok_or_else(|| {
                    ReductionError::Configuration("mass matrix is not symmetric positive definite".to_string())
                })?;
                Some(cholesky.l())
            }
            None => None,
        };
        let mut c = match &cholesky_factor {
            Some(l) => {
                let singular = || ReductionError::Configuration("singular Cholesky factor".to_string());
                let l_inv_a = l.solve_lower_triangular(&a_ff).ok_or_else(singular)?;
                l.solve_lower_triangular(&l_inv_a.transpose())
                    .ok_or_else(singular)?
            }
            None => a_ff,
        };
        let c_t = c.transpose();
        c += c_t;
        c.scale_mut(from_f64(0.5));

        let eigen = SymmetricEigen::try_new(c, from_f64(self.parameters.tolerance), self.parameters.max_iterations)
            .ok_or(ReductionError::Convergence {
                requested: n_eigs,
                converged: 0,
            })?;

        let mut order: Vec<usize> = (0..n_free).collect();
        let values = &eigen.eigenvalues;
        let compare = |i: &usize, j: &usize| values[*i].partial_cmp(&values[*j]).unwrap_or(Ordering::Equal);
        match self.parameters.spectrum {
            Spectrum::LargestReal => order.sort_by(|i, j| compare(j, i)),
            Spectrum::SmallestReal => order.sort_by(compare),
        }

        let n_converged = n_eigs.min(n_free);
        let mut eigenvalues = Vec::with_capacity(n_converged);
        let mut eigenvectors = Vec::with_capacity(n_converged);
        for &k in order.iter().take(n_converged) {
            let y = eigen.eigenvectors.column(k).clone_owned();
            let x_free = match &cholesky_factor {
                Some(l) => l
                    .tr_solve_lower_triangular(&y)
                    .ok_or_else(|| ReductionError::Configuration("singular Cholesky factor".to_string()))?,
                None => y,
            };
            let mut x = DVector::zeros(self.a.nrows());
            for (&dof, &value) in free.iter().zip(x_free.iter()) {
                x[dof] = value;
            }
            eigenvalues.push(values[k]);
            eigenvectors.push(x);
        }

        debug!("Dense eigensolver converged {} of {} requested eigenpairs", n_converged, n_eigs);
        self.state = SolverState::Solved {
            eigenvalues,
            eigenvectors,
        };

        if n_converged < n_eigs {
            Err(ReductionError::Convergence {
                requested: n_eigs,
                converged: n_converged,
            })
        } else {
            Ok(n_converged)
        }
    }

    fn num_converged(&self) -> Result<usize, ReductionError> {
        Ok(self.solved()?.0.len())
    }

    fn eigenvalue(&self, index: usize) -> Result<T, ReductionError> {
        let (eigenvalues, _) = self.solved()?;
        eigenvalues
            .get(index)
            .copied()
            .ok_or(ReductionError::IndexOutOfBounds {
                index,
                len: eigenvalues.len(),
            })
    }

    fn eigenvector(&self, index: usize) -> Result<DVector<T>, ReductionError> {
        let (_, eigenvectors) = self.solved()?;
        eigenvectors
            .get(index)
            .cloned()
            .ok_or(ReductionError::IndexOutOfBounds {
                index,
                len: eigenvectors.len(),
            })
    }
}
