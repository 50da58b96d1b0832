use super::ReducedProblem;
use crate::basis::BasisFunctionsMatrix;
use crate::error::ReductionError;
use crate::expansion::AffineExpansionStorage;
use crate::functions::{FunctionsList, FunctionsMatrix};
use crate::parallel::IoProcess;
use crate::parameter::Parameter;
use crate::problem::{TruthProblem, BILINEAR_TERM, LINEAR_TERM};
use crate::product::product;
use crate::projection::ReducedOperators;
use crate::util::to_f64;
use crate::Real;
use eyre::{bail, eyre};
use itertools::iproduct;
use log::{debug, trace};
use nalgebra::{DMatrix, DVector};
use numeric_literals::replace_float_literals;
use std::path::Path;

/// Offline data of the residual based error estimator.
///
/// With `R` the Riesz map of the inner product, the dual norm of the residual is
/// `‖Σ_q θ^f_q R F_q - Σ_q Σ_n θ^a_q u_n R(A_q z_n)‖`, which expands into the order-2
/// expansions `ff`, `af` and `aa` of Gram matrices of Riesz representers.
#[derive(Debug, Clone)]
struct ErrorEstimation<T: Real> {
    riesz_f: FunctionsList<T>,
    /// `riesz_a[q][n] = R(A_q z_n)`.
    riesz_a: Vec<FunctionsList<T>>,
    /// `(R F_q, R F_q')`, stored as 1x1 matrices.
    ff: Option<AffineExpansionStorage<DMatrix<T>>>,
    /// `(R(A_q z_n), R F_q')_n`.
    af: Option<AffineExpansionStorage<DVector<T>>>,
    /// `(R(A_q z_n), R(A_q' z_m))_nm`.
    aa: Option<AffineExpansionStorage<DMatrix<T>>>,
    /// Generation of the basis the `z_n` in `riesz_a` belong to.
    basis_generation: Option<u64>,
}

impl<T: Real> Default for ErrorEstimation<T> {
    fn default() -> Self {
        Self {
            riesz_f: FunctionsList::new(),
            riesz_a: Vec::new(),
            ff: None,
            af: None,
            aa: None,
            basis_generation: None,
        }
    }
}

impl<T: Real> ErrorEstimation<T> {
    fn len(&self) -> usize {
        self.riesz_a.first().map_or(0, FunctionsList::len)
    }
}

/// The Galerkin projection of an elliptic coercive [`TruthProblem`] with terms
/// [`BILINEAR_TERM`] and [`LINEAR_TERM`].
pub struct ReducedEllipticProblem<'p, T: Real> {
    truth: &'p dyn TruthProblem<T>,
    basis: BasisFunctionsMatrix<T>,
    operators: ReducedOperators<T>,
    error_estimation: Option<ErrorEstimation<T>>,
}

impl<'p, T: Real> std::fmt::Debug for ReducedEllipticProblem<'p, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReducedEllipticProblem")
            .field("truth", &self.truth.name())
            .field("basis_len", &self.basis.len())
            .field("error_estimation", &self.error_estimation.is_some())
            .finish()
    }
}

impl<'p, T: Real> ReducedEllipticProblem<'p, T> {
    pub fn new(truth: &'p dyn TruthProblem<T>) -> Result<Self, ReductionError> {
        for term in [BILINEAR_TERM, LINEAR_TERM] {
            if !truth.terms().contains(&term) {
                return Err(ReductionError::Configuration(format!(
                    "{} has no term {}, which an elliptic reduced problem requires",
                    truth.name(),
                    term
                )));
            }
        }
        Ok(Self {
            truth,
            basis: BasisFunctionsMatrix::new(),
            operators: ReducedOperators::new(),
            error_estimation: Some(ErrorEstimation::default()),
        })
    }

    /// Enables or disables the offline computations of the error estimator.
    pub fn with_error_estimation(self, enabled: bool) -> Self {
        Self {
            error_estimation: enabled.then(ErrorEstimation::default),
            ..self
        }
    }

    pub fn has_error_estimation(&self) -> bool {
        self.error_estimation.is_some()
    }

    pub fn operators(&self) -> &ReducedOperators<T> {
        &self.operators
    }

    /// The reduced operator `A_N(μ)` restricted to the first `n` basis functions.
    pub fn reduced_operator(&self, mu: &Parameter<T>, n: usize) -> eyre::Result<DMatrix<T>> {
        let storage = self
            .operators
            .bilinear(BILINEAR_TERM)
            .ok_or_else(|| self.not_assembled())?;
        let thetas = self.truth.compute_theta(BILINEAR_TERM, mu)?;
        let a = product(thetas.as_slice(), storage, None)?;
        check_block(n, a.nrows())?;
        Ok(a.view((0, 0), (n, n)).into_owned())
    }

    pub fn reduced_rhs(&self, mu: &Parameter<T>, n: usize) -> eyre::Result<DVector<T>> {
        let storage = self
            .operators
            .linear(LINEAR_TERM)
            .ok_or_else(|| self.not_assembled())?;
        let thetas = self.truth.compute_theta(LINEAR_TERM, mu)?;
        let f = product(thetas.as_slice(), storage, None)?;
        check_block(n, f.len())?;
        Ok(f.rows(0, n).into_owned())
    }

    fn not_assembled(&self) -> eyre::Report {
        ReductionError::Configuration(format!("reduced operators of {} are not assembled", self.truth.name())).into()
    }

    fn update_error_estimation(&mut self) -> eyre::Result<()> {
        let Some(estimation) = self.error_estimation.as_mut() else {
            return Ok(());
        };
        let n = self.basis.len();
        let a = self.truth.assemble_operator(BILINEAR_TERM)?;
        let f = self.truth.assemble_operator(LINEAR_TERM)?;
        let (qa, qf) = (a.len(), f.len());

        if estimation.riesz_f.len() != qf {
            let mut riesz_f = FunctionsList::new();
            for (q, operator) in f.iter().enumerate() {
                let f_q = operator
                    .as_vector()
                    .ok_or_else(|| eyre!("term {} has a truth matrix at {}", LINEAR_TERM, q))?;
                riesz_f.push(self.truth.riesz_representer(f_q)?)?;
            }
            estimation.riesz_f = riesz_f;
            estimation.ff = None;
        }
        let generation = self.basis.generation();
        if estimation.riesz_a.len() != qa || estimation.len() > n || estimation.basis_generation != Some(generation) {
            estimation.riesz_a = vec![FunctionsList::new(); qa];
            estimation.af = None;
            estimation.aa = None;
            estimation.basis_generation = Some(generation);
        }
        let old_n = estimation.len();
        if old_n == n && estimation.ff.is_some() && estimation.af.is_some() && estimation.aa.is_some() {
            return Ok(());
        }

        for (q, operator) in a.iter().enumerate() {
            let a_q = operator
                .as_matrix()
                .ok_or_else(|| eyre!("term {} has a truth vector at {}", BILINEAR_TERM, q))?;
            for z in self.basis.iter().skip(old_n) {
                let riesz = self.truth.riesz_representer(&(a_q * z))?;
                estimation.riesz_a[q].push(riesz)?;
            }
        }
        debug!(
            "Computed Riesz representers of {} for basis functions {}..{}",
            self.truth.name(),
            old_n,
            n
        );

        let x = self.truth.inner_product();
        if estimation.ff.is_none() {
            let gram = estimation.riesz_f.gram_matrix(x, &estimation.riesz_f)?;
            let entries = iproduct!(0..qf, 0..qf)
                .map(|(q, p)| DMatrix::from_element(1, 1, gram[(q, p)]))
                .collect();
            estimation.ff = Some(AffineExpansionStorage::from_grid(qf, qf, entries)?);
        }
        let mut af = Vec::with_capacity(qa * qf);
        let mut aa = Vec::with_capacity(qa * qa);
        for riesz_q in &estimation.riesz_a {
            let gram = riesz_q.gram_matrix(x, &estimation.riesz_f)?;
            af.extend(gram.column_iter().map(|column| column.into_owned()));
            for riesz_p in &estimation.riesz_a {
                aa.push(riesz_q.gram_matrix(x, riesz_p)?);
            }
        }
        estimation.af = Some(AffineExpansionStorage::from_grid(qa, qf, af)?);
        estimation.aa = Some(AffineExpansionStorage::from_grid(qa, qa, aa)?);
        Ok(())
    }

    fn error_estimation_names(q: usize) -> String {
        format!("error_estimation_riesz_a_{}", q)
    }

    fn load_error_estimation(&mut self, io: &IoProcess, directory: &Path) -> eyre::Result<bool> {
        let qa = self.truth.num_terms(BILINEAR_TERM)?;
        let mut loaded = ErrorEstimation::default();
        if !loaded.riesz_f.load(io, directory, "error_estimation_riesz_f")? {
            return Ok(false);
        }
        for q in 0..qa {
            let mut riesz = FunctionsList::new();
            if !riesz.load(io, directory, &Self::error_estimation_names(q))? {
                return Ok(false);
            }
            loaded.riesz_a.push(riesz);
        }
        loaded.ff = AffineExpansionStorage::load(io, directory, "error_estimation_ff")?;
        loaded.af = AffineExpansionStorage::load(io, directory, "error_estimation_af")?;
        loaded.aa = AffineExpansionStorage::load(io, directory, "error_estimation_aa")?;
        if loaded.ff.is_none() || loaded.af.is_none() || loaded.aa.is_none() {
            return Ok(false);
        }
        loaded.basis_generation = Some(self.basis.generation());
        self.error_estimation = Some(loaded);
        Ok(true)
    }
}

fn check_block(n: usize, len: usize) -> Result<(), ReductionError> {
    if n > len {
        Err(ReductionError::IndexOutOfBounds { index: n, len })
    } else {
        Ok(())
    }
}

impl<'p, T: Real> ReducedProblem<T> for ReducedEllipticProblem<'p, T> {
    fn name(&self) -> &str {
        self.truth.name()
    }

    fn truth_problem(&self) -> &dyn TruthProblem<T> {
        self.truth
    }

    fn basis(&self) -> &BasisFunctionsMatrix<T> {
        &self.basis
    }

    fn basis_mut(&mut self) -> &mut BasisFunctionsMatrix<T> {
        &mut self.basis
    }

    fn update_operators(&mut self) -> eyre::Result<()> {
        let a = self.truth.assemble_operator(BILINEAR_TERM)?;
        let f = self.truth.assemble_operator(LINEAR_TERM)?;
        self.operators.update_bilinear(BILINEAR_TERM, a, &self.basis)?;
        self.operators.update_linear(LINEAR_TERM, f, &self.basis)?;
        self.update_error_estimation()
    }

    fn solve(&self, mu: &Parameter<T>, n: Option<usize>) -> eyre::Result<DVector<T>> {
        let n = n.unwrap_or_else(|| self.basis.len());
        if n == 0 {
            bail!(ReductionError::Configuration(format!("the basis of {} is empty", self.name())));
        }
        check_block(n, self.basis.len())?;
        let a = self.reduced_operator(mu, n)?;
        let f = self.reduced_rhs(mu, n)?;
        trace!("Solving reduced system of {} with N = {}", self.name(), n);
        a.lu()
            .solve(&f)
            .ok_or_else(|| eyre!("reduced operator of {} is singular at {:?}", self.name(), mu.as_slice()))
    }

    fn reconstruct(&self, reduced_solution: &DVector<T>) -> eyre::Result<DVector<T>> {
        let n = reduced_solution.len();
        check_block(n, self.basis.len())?;
        Ok(self.basis.slice(0..n)?.multiply_by_vector(reduced_solution)?)
    }

    #[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
    fn estimate_error(&self, mu: &Parameter<T>, reduced_solution: &DVector<T>) -> eyre::Result<T> {
        let estimation = self.error_estimation.as_ref().ok_or_else(|| {
            ReductionError::Configuration(format!("error estimation of {} is disabled", self.name()))
        })?;
        let (Some(ff), Some(af), Some(aa)) = (&estimation.ff, &estimation.af, &estimation.aa) else {
            return Err(self.not_assembled());
        };
        let n = reduced_solution.len();
        check_block(n, estimation.len())?;

        let theta_a = self.truth.compute_theta(BILINEAR_TERM, mu)?;
        let theta_f = self.truth.compute_theta(LINEAR_TERM, mu)?;
        let ff = product(theta_f.as_slice(), ff, Some(theta_f.as_slice()))?[(0, 0)];
        let af = product(theta_a.as_slice(), af, Some(theta_f.as_slice()))?;
        let aa = product(theta_a.as_slice(), aa, Some(theta_a.as_slice()))?;
        let u = reduced_solution;
        let af_u = af.rows(0, n).dot(u);
        let aa_uu = u.dot(&(aa.view((0, 0), (n, n)) * u));
        let residual_norm = (ff - 2.0 * af_u + aa_uu).max(0.0).sqrt();

        let alpha = self.truth.stability_factor_lower_bound(mu)?;
        if alpha <= 0.0 {
            bail!(
                "stability factor lower bound of {} is not positive at {:?}: {:e}",
                self.name(),
                mu.as_slice(),
                to_f64(alpha)
            );
        }
        Ok(residual_norm / alpha)
    }

    fn save(&self, io: &IoProcess, directory: &Path) -> eyre::Result<()> {
        self.basis.save(io, directory, "basis")?;
        self.operators.save(io, directory)?;
        if let Some(estimation) = &self.error_estimation {
            estimation.riesz_f.save(io, directory, "error_estimation_riesz_f")?;
            for (q, riesz) in estimation.riesz_a.iter().enumerate() {
                riesz.save(io, directory, &Self::error_estimation_names(q))?;
            }
            if let (Some(ff), Some(af), Some(aa)) = (&estimation.ff, &estimation.af, &estimation.aa) {
                ff.save(io, directory, "error_estimation_ff")?;
                af.save(io, directory, "error_estimation_af")?;
                aa.save(io, directory, "error_estimation_aa")?;
            }
        }
        Ok(())
    }

    fn load(&mut self, io: &IoProcess, directory: &Path) -> eyre::Result<bool> {
        let mut basis = BasisFunctionsMatrix::new();
        if !basis.load(io, directory, "basis")? {
            return Ok(false);
        }
        let mut operators = ReducedOperators::new();
        if !operators.load(io, directory)? {
            return Ok(false);
        }
        operators.bind_to(&basis);
        self.basis = basis;
        self.operators = operators;
        if self.error_estimation.is_some() && !self.load_error_estimation(io, directory)? {
            debug!("No saved error estimation data for {}, recomputing", self.name());
            self.error_estimation = Some(ErrorEstimation::default());
            self.update_error_estimation()?;
        }
        Ok(true)
    }
}
