//! Preconditioned Conjugate Gradient for symmetric positive definite truth systems.
//!
//! In `rbfe` this is the reference solver for truth problems and for Riesz representers,
//! i.e. systems `X r = g` with the (SPD) inner product matrix `X`. Homogeneous Dirichlet rows
//! are expected to be decoupled (see [`apply_homogeneous_dirichlet_bc_csr`]), in which case
//! the constrained entries of the solution are exactly zero.
//!
//! [`apply_homogeneous_dirichlet_bc_csr`]: crate::csr::apply_homogeneous_dirichlet_bc_csr
use core::fmt;
use log::trace;
use nalgebra::{convert, DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::CsrMatrix;
use rbfe_traits::{LinearOperator, Real};
use std::error::Error;

/// The (diagonal) preconditioner `P ≈ A⁻¹` applied to residuals.
#[derive(Debug, Clone, PartialEq)]
pub enum Preconditioner<T: Real> {
    Identity,
    /// Stores the inverse of the diagonal of the operator.
    Jacobi(DVector<T>),
}

impl<T: Real> Default for Preconditioner<T> {
    fn default() -> Self {
        Self::Identity
    }
}

impl<T: Real> Preconditioner<T> {
    /// The Jacobi preconditioner of `matrix`. Fails if a diagonal entry is not positive.
    pub fn jacobi(matrix: &CsrMatrix<T>) -> Result<Self, SolveError<T>> {
        let mut inverse_diagonal = DVector::zeros(matrix.nrows());
        for (i, row) in matrix.row_iter().enumerate() {
            let diagonal = row.get_entry(i).map(|entry| entry.into_value()).unwrap_or_else(T::zero);
            if diagonal <= T::zero() {
                return Err(SolveError::new(0, SolveErrorKind::IndefinitePreconditioner));
            }
            inverse_diagonal[i] = T::one() / diagonal;
        }
        Ok(Self::Jacobi(inverse_diagonal))
    }

    fn apply(&self, z: &mut DVector<T>, r: &DVector<T>) {
        match self {
            Self::Identity => z.copy_from(r),
            Self::Jacobi(inverse_diagonal) => {
                for ((z_i, &r_i), &d_i) in z.iter_mut().zip(r.iter()).zip(inverse_diagonal.iter()) {
                    *z_i = r_i * d_i;
                }
            }
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum SolveErrorKind {
    OperatorError(Box<dyn Error>),
    DimensionMismatch { operator: usize, rhs: usize },
    IndefiniteOperator,
    IndefinitePreconditioner,
    MaxIterationsReached { max_iter: usize },
}

impl fmt::Display for SolveErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperatorError(err) => write!(f, "Error applying operator: {}", err),
            Self::DimensionMismatch { operator, rhs } => write!(
                f,
                "Preconditioner has dimension {}, but the right-hand side has dimension {}.",
                operator, rhs
            ),
            Self::IndefiniteOperator => write!(f, "Operator appears to be indefinite."),
            Self::IndefinitePreconditioner => write!(f, "Preconditioner is not positive definite."),
            Self::MaxIterationsReached { max_iter } => write!(f, "Max iterations ({}) reached.", max_iter),
        }
    }
}

#[derive(Debug)]
pub struct SolveError<T> {
    /// Number of iterations performed before the failure.
    pub num_iterations: usize,
    /// `‖r‖ / ‖b‖` of the last iterate, if any iteration was performed.
    pub relative_residual: Option<T>,
    pub kind: SolveErrorKind,
}

impl<T> SolveError<T> {
    fn new(num_iterations: usize, kind: SolveErrorKind) -> Self {
        Self {
            num_iterations,
            relative_residual: None,
            kind,
        }
    }
}

impl<T> fmt::Display for SolveError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CG solve failed after {} iterations. ", self.num_iterations)?;
        write!(f, "Error: {}", self.kind)
    }
}

impl<T: fmt::Debug> Error for SolveError<T> {}

/// The result of a successful solve.
#[derive(Debug, Clone, PartialEq)]
pub struct CgSolution<T: Real> {
    pub x: DVector<T>,
    pub num_iterations: usize,
    /// `‖r‖ / ‖b‖` of the recursively updated residual at termination.
    pub relative_residual: T,
}

/// CG with a relative residual stopping criterion `‖r‖ <= tol ‖b‖`.
///
/// The residual is the recursively updated residual of CG, which may drift away from the
/// true residual for ill-conditioned systems.
pub struct ConjugateGradient<'a, T: Real> {
    operator: &'a dyn LinearOperator<T>,
    preconditioner: Preconditioner<T>,
    tolerance: T,
    max_iter: Option<usize>,
}

impl<'a, T: Real> fmt::Debug for ConjugateGradient<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConjugateGradient")
            .field("preconditioner", &self.preconditioner)
            .field("tolerance", &self.tolerance)
            .field("max_iter", &self.max_iter)
            .finish()
    }
}

impl<'a, T: Real> ConjugateGradient<'a, T> {
    pub fn new(operator: &'a dyn LinearOperator<T>) -> Self {
        Self {
            operator,
            preconditioner: Preconditioner::Identity,
            tolerance: convert(1e-10),
            max_iter: None,
        }
    }

    pub fn with_preconditioner(self, preconditioner: Preconditioner<T>) -> Self {
        Self { preconditioner, ..self }
    }

    pub fn with_tolerance(self, tolerance: T) -> Self {
        Self { tolerance, ..self }
    }

    /// Limits the number of iterations. Without a limit, CG iterates until convergence or
    /// breakdown.
    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self {
            max_iter: Some(max_iter),
            ..self
        }
    }

    fn apply_operator(&self, y: &mut DVector<T>, x: &DVector<T>, iteration: usize) -> Result<(), SolveError<T>> {
        self.operator
            .apply(DVectorViewMut::from(y), DVectorView::from(x))
            .map_err(|err| SolveError::new(iteration, SolveErrorKind::OperatorError(err)))
    }

    /// Solves `A x = b` starting from a zero initial guess.
    pub fn solve(&self, b: &DVector<T>) -> Result<CgSolution<T>, SolveError<T>> {
        self.solve_with_guess(b, DVector::zeros(b.len()))
    }

    #[allow(non_snake_case)]
    pub fn solve_with_guess(&self, b: &DVector<T>, mut x: DVector<T>) -> Result<CgSolution<T>, SolveError<T>> {
        assert_eq!(b.len(), x.len(), "Initial guess and right-hand side must have the same length.");
        if let Preconditioner::Jacobi(inverse_diagonal) = &self.preconditioner {
            if inverse_diagonal.len() != b.len() {
                let kind = SolveErrorKind::DimensionMismatch {
                    operator: inverse_diagonal.len(),
                    rhs: b.len(),
                };
                return Err(SolveError::new(0, kind));
            }
        }

        let b_norm = b.norm();
        if b_norm == T::zero() {
            x.fill(T::zero());
            return Ok(CgSolution {
                x,
                num_iterations: 0,
                relative_residual: T::zero(),
            });
        }

        let n = b.len();
        let mut r = DVector::zeros(n);
        let mut z = DVector::zeros(n);
        let mut Ap = DVector::zeros(n);

        // r = b - Ax
        self.apply_operator(&mut r, &x, 0)?;
        r.axpy(T::one(), b, -T::one());
        self.preconditioner.apply(&mut z, &r);
        let mut p = z.clone();
        let mut zTr = z.dot(&r);

        let mut iteration = 0;
        loop {
            let relative_residual = r.norm() / b_norm;
            trace!("CG iteration {}: relative residual {:?}", iteration, relative_residual);
            if relative_residual <= self.tolerance {
                return Ok(CgSolution {
                    x,
                    num_iterations: iteration,
                    relative_residual,
                });
            }
            let fail = |kind| SolveError {
                num_iterations: iteration,
                relative_residual: Some(relative_residual),
                kind,
            };
            if let Some(max_iter) = self.max_iter {
                if iteration >= max_iter {
                    return Err(fail(SolveErrorKind::MaxIterationsReached { max_iter }));
                }
            }
            if zTr <= T::zero() {
                return Err(fail(SolveErrorKind::IndefinitePreconditioner));
            }

            self.apply_operator(&mut Ap, &p, iteration)?;
            let pAp = p.dot(&Ap);
            if pAp <= T::zero() {
                return Err(fail(SolveErrorKind::IndefiniteOperator));
            }

            let alpha = zTr / pAp;
            x.axpy(alpha, &p, T::one());
            r.axpy(-alpha, &Ap, T::one());
            iteration += 1;

            self.preconditioner.apply(&mut z, &r);
            let zTr_next = z.dot(&r);
            // p <- z + beta p
            p.axpy(T::one(), &z, zTr_next / zTr);
            zTr = zTr_next;
        }
    }
}
