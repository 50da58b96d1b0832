//! High fidelity ("truth") problems.
use crate::eigen::{DenseEigenSolver, EigenSolver, EigenSolverParameters, Spectrum};
use crate::error::{check_dimension, ReductionError};
use crate::expansion::AffineExpansionStorage;
use crate::parameter::Parameter;
use crate::product::product;
use crate::registry::kinds;
use crate::tensor::{AffineDecomposition, TruthTensor};
use crate::util::{from_f64, to_f64};
use crate::Real;
use eyre::eyre;
use log::debug;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;
use rbfe_sparse::cg::{ConjugateGradient, Preconditioner};
use rbfe_sparse::csr::{apply_homogeneous_dirichlet_bc_csr, apply_homogeneous_dirichlet_bc_rhs};
use serde::{Deserialize, Serialize};

/// The bilinear term of an elliptic problem.
pub const BILINEAR_TERM: &str = "a";
/// The linear term (right-hand side) of an elliptic problem.
pub const LINEAR_TERM: &str = "f";

/// A parametrized truth problem whose operators are affine expansions.
///
/// Terms are identified by name; unknown names fail with [`ReductionError::InvalidTerm`].
pub trait TruthProblem<T: Real> {
    fn name(&self) -> &str;

    /// The kind of problem, used to look up matching reduced problems in a
    /// [`ReducedProblemRegistry`](crate::registry::ReducedProblemRegistry).
    fn kind(&self) -> &'static str;

    fn terms(&self) -> &[&'static str];

    fn num_terms(&self, term: &str) -> Result<usize, ReductionError> {
        Ok(self.assemble_operator(term)?.len())
    }

    fn compute_theta(&self, term: &str, mu: &Parameter<T>) -> eyre::Result<DVector<T>>;

    /// The parameter-independent truth operators of `term`.
    fn assemble_operator(&self, term: &str) -> Result<&AffineExpansionStorage<TruthTensor<T>>, ReductionError>;

    /// The inner product matrix `X` of the solution space.
    fn inner_product(&self) -> &CsrMatrix<T>;

    /// Dofs with homogeneous Dirichlet conditions.
    fn dirichlet_dofs(&self) -> &[usize];

    fn solve(&self, mu: &Parameter<T>) -> eyre::Result<DVector<T>>;

    /// A lower bound of the coercivity constant at `mu`.
    fn stability_factor_lower_bound(&self, mu: &Parameter<T>) -> eyre::Result<T>;

    /// Solves `X r = g` on the space with homogeneous Dirichlet conditions.
    fn riesz_representer(&self, functional: &DVector<T>) -> eyre::Result<DVector<T>>;
}

/// How the coercivity constant of an elliptic problem is bounded from below.
#[derive(Debug, Clone, PartialEq)]
pub enum StabilityFactor<T> {
    /// The smallest eigenvalue of `A(μ) x = α X x`, computed with a dense eigensolver.
    Exact,
    /// `α(μ̄) min_q θ_q(μ) / θ_q(μ̄)`, valid for positive thetas and positive semi-definite
    /// `A_q`.
    MinTheta { mu_bar: Parameter<T>, alpha_bar: T },
}

/// Settings of the truth solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TruthSolverSettings {
    pub tolerance: f64,
    /// Maximum number of CG iterations, `None` means a multiple of the number of dofs.
    pub max_iterations: Option<usize>,
}

impl Default for TruthSolverSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-12,
            max_iterations: None,
        }
    }
}

impl TruthSolverSettings {
    pub fn with_tolerance(self, tolerance: f64) -> Self {
        Self { tolerance, ..self }
    }

    pub fn with_max_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations: Some(max_iterations),
            ..self
        }
    }
}

pub(crate) fn solve_spd<T: Real>(
    matrix: &CsrMatrix<T>,
    rhs: &DVector<T>,
    settings: &TruthSolverSettings,
) -> eyre::Result<DVector<T>> {
    let max_iter = settings.max_iterations.unwrap_or(10 * rhs.len() + 100);
    let preconditioner = Preconditioner::jacobi(matrix).map_err(|err| eyre!("truth solve failed: {}", err))?;
    let solution = ConjugateGradient::new(matrix)
        .with_preconditioner(preconditioner)
        .with_tolerance(from_f64(settings.tolerance))
        .with_max_iter(max_iter)
        .solve(rhs)
        .map_err(|err| eyre!("truth solve failed: {}", err))?;
    debug!("CG converged in {} iterations", solution.num_iterations);
    Ok(solution.x)
}

/// An elliptic coercive problem `a(u, v; μ) = f(v; μ)` with affine `a` and `f`, discretized
/// with homogeneous Dirichlet conditions on the given dofs.
#[derive(Debug, Clone)]
pub struct AffineEllipticProblem<T: Real> {
    name: String,
    a: AffineDecomposition<T>,
    f: AffineDecomposition<T>,
    inner_product: CsrMatrix<T>,
    dirichlet_dofs: Vec<usize>,
    stability_factor: StabilityFactor<T>,
    solver_settings: TruthSolverSettings,
}

impl<T: Real> AffineEllipticProblem<T> {
    /// Creates the problem from the decompositions of its bilinear and linear forms.
    ///
    /// Dirichlet conditions are imposed on the inner product matrix, which must be symmetric
    /// positive definite on the remaining dofs.
    pub fn new(
        name: impl Into<String>,
        a: AffineDecomposition<T>,
        f: AffineDecomposition<T>,
        mut inner_product: CsrMatrix<T>,
        dirichlet_dofs: Vec<usize>,
    ) -> Result<Self, ReductionError> {
        let name = name.into();
        if a.operators().iter().any(|op| op.as_matrix().is_none()) {
            return Err(ReductionError::Configuration(format!("bilinear form of {} must consist of matrices", name)));
        }
        if f.operators().iter().any(|op| op.as_vector().is_none()) {
            return Err(ReductionError::Configuration(format!("linear form of {} must consist of vectors", name)));
        }
        let n = inner_product.nrows();
        for op in a.operators().iter().chain(f.operators().iter()) {
            check_dimension(n, op.shape().0)?;
        }
        if let Some(&dof) = dirichlet_dofs.iter().find(|&&dof| dof >= n) {
            return Err(ReductionError::IndexOutOfBounds { index: dof, len: n });
        }
        apply_homogeneous_dirichlet_bc_csr(&mut inner_product, &dirichlet_dofs);
        Ok(Self {
            name,
            a,
            f,
            inner_product,
            dirichlet_dofs,
            stability_factor: StabilityFactor::Exact,
            solver_settings: TruthSolverSettings::default(),
        })
    }

    pub fn with_stability_factor(self, stability_factor: StabilityFactor<T>) -> Self {
        Self {
            stability_factor,
            ..self
        }
    }

    pub fn with_solver_settings(self, solver_settings: TruthSolverSettings) -> Self {
        Self {
            solver_settings,
            ..self
        }
    }

    fn decomposition(&self, term: &str) -> Result<&AffineDecomposition<T>, ReductionError> {
        match term {
            BILINEAR_TERM => Ok(&self.a),
            LINEAR_TERM => Ok(&self.f),
            _ => Err(ReductionError::InvalidTerm(term.to_string())),
        }
    }

    /// The operator `A(μ)` without boundary conditions.
    pub fn operator(&self, mu: &Parameter<T>) -> eyre::Result<CsrMatrix<T>> {
        let thetas = self.a.compute_thetas(mu)?;
        match product(thetas.as_slice(), self.a.operators(), None)? {
            TruthTensor::Matrix(matrix) => Ok(matrix),
            TruthTensor::Vector(_) => Err(eyre!("bilinear form of {} evaluated to a vector", self.name)),
        }
    }

    pub fn rhs(&self, mu: &Parameter<T>) -> eyre::Result<DVector<T>> {
        let thetas = self.f.compute_thetas(mu)?;
        match product(thetas.as_slice(), self.f.operators(), None)? {
            TruthTensor::Vector(vector) => Ok(vector),
            TruthTensor::Matrix(_) => Err(eyre!("linear form of {} evaluated to a matrix", self.name)),
        }
    }
}

impl<T: Real> TruthProblem<T> for AffineEllipticProblem<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        kinds::ELLIPTIC_COERCIVE_PROBLEM
    }

    fn terms(&self) -> &[&'static str] {
        &[BILINEAR_TERM, LINEAR_TERM]
    }

    fn compute_theta(&self, term: &str, mu: &Parameter<T>) -> eyre::Result<DVector<T>> {
        self.decomposition(term)?.compute_thetas(mu)
    }

    fn assemble_operator(&self, term: &str) -> Result<&AffineExpansionStorage<TruthTensor<T>>, ReductionError> {
        Ok(self.decomposition(term)?.operators())
    }

    fn inner_product(&self) -> &CsrMatrix<T> {
        &self.inner_product
    }

    fn dirichlet_dofs(&self) -> &[usize] {
        &self.dirichlet_dofs
    }

    fn solve(&self, mu: &Parameter<T>) -> eyre::Result<DVector<T>> {
        let mut a = self.operator(mu)?;
        let mut f = self.rhs(mu)?;
        apply_homogeneous_dirichlet_bc_csr(&mut a, &self.dirichlet_dofs);
        apply_homogeneous_dirichlet_bc_rhs(&mut f, &self.dirichlet_dofs);
        solve_spd(&a, &f, &self.solver_settings)
    }

    fn stability_factor_lower_bound(&self, mu: &Parameter<T>) -> eyre::Result<T> {
        match &self.stability_factor {
            StabilityFactor::Exact => {
                let a = DMatrix::from(&self.operator(mu)?);
                let x = DMatrix::from(&self.inner_product);
                let mut solver = DenseEigenSolver::new(a)
                    .with_mass_matrix(x)
                    .with_dirichlet_dofs(self.dirichlet_dofs.clone());
                solver.set_parameters(EigenSolverParameters::default().with_spectrum(Spectrum::SmallestReal));
                solver.solve(1)?;
                let alpha = solver.eigenvalue(0)?;
                debug!("Stability factor of {} at {:?}: {:e}", self.name, mu.as_slice(), to_f64(alpha));
                Ok(alpha)
            }
            StabilityFactor::MinTheta { mu_bar, alpha_bar } => {
                let thetas = self.a.compute_thetas(mu)?;
                let thetas_bar = self.a.compute_thetas(mu_bar)?;
                let ratio = thetas
                    .iter()
                    .zip(thetas_bar.iter())
                    .map(|(&theta, &theta_bar)| theta / theta_bar)
                    .fold(T::max_value().unwrap_or_else(T::one), |min, r| min.min(r));
                Ok(*alpha_bar * ratio)
            }
        }
    }

    fn riesz_representer(&self, functional: &DVector<T>) -> eyre::Result<DVector<T>> {
        let mut rhs = functional.clone();
        apply_homogeneous_dirichlet_bc_rhs(&mut rhs, &self.dirichlet_dofs);
        solve_spd(&self.inner_product, &rhs, &self.solver_settings)
    }
}
