//! Reduced problems and the reduction methods that build them.
use crate::basis::BasisFunctionsMatrix;
use crate::parallel::IoProcess;
use crate::parameter::{Parameter, ParameterSet};
use crate::problem::TruthProblem;
use crate::Real;
use nalgebra::DVector;
use std::path::Path;

mod elliptic;
mod pod_galerkin;
mod reduced_basis;

pub use elliptic::ReducedEllipticProblem;
pub use pod_galerkin::{PodGalerkin, PodGalerkinSettings};
pub use reduced_basis::{ReducedBasis, ReducedBasisSettings};

/// The reduced counterpart of a [`TruthProblem`].
pub trait ReducedProblem<T: Real> {
    fn name(&self) -> &str;

    fn truth_problem(&self) -> &dyn TruthProblem<T>;

    fn basis(&self) -> &BasisFunctionsMatrix<T>;

    fn basis_mut(&mut self) -> &mut BasisFunctionsMatrix<T>;

    /// Brings the reduced operators up to date with the current basis.
    fn update_operators(&mut self) -> eyre::Result<()>;

    /// Solves the reduced problem with the first `n` basis functions (all if `None`).
    fn solve(&self, mu: &Parameter<T>, n: Option<usize>) -> eyre::Result<DVector<T>>;

    /// The truth function `Σ_n u_n z_n` of a reduced solution.
    fn reconstruct(&self, reduced_solution: &DVector<T>) -> eyre::Result<DVector<T>>;

    /// An a posteriori bound of the error of a reduced solution in the norm of the inner
    /// product.
    fn estimate_error(&self, mu: &Parameter<T>, reduced_solution: &DVector<T>) -> eyre::Result<T>;

    fn save(&self, io: &IoProcess, directory: &Path) -> eyre::Result<()>;

    /// Returns `Ok(false)` if nothing was saved in `directory`.
    fn load(&mut self, io: &IoProcess, directory: &Path) -> eyre::Result<bool>;
}

/// Summary of an offline stage.
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineReport<T: Real> {
    pub basis_size: usize,
    /// Whether the offline stage started from previously saved data.
    pub resumed: bool,
    /// Parameters whose truth solutions were added to the basis, in order.
    pub selected_parameters: ParameterSet<T>,
    /// The error measure after each enrichment: the maximum estimated error over the training
    /// set for the greedy, the eigenvalues of the retained modes for POD.
    pub errors: Vec<T>,
}

/// An algorithm that builds the basis and operators of a reduced problem.
pub trait ReductionMethod<T: Real> {
    /// The kind of method, used to look up matching reduced problems in a
    /// [`ReducedProblemRegistry`](crate::registry::ReducedProblemRegistry).
    fn kind(&self) -> &'static str;

    fn offline(&mut self, io: &IoProcess, reduced_problem: &mut dyn ReducedProblem<T>) -> eyre::Result<OfflineReport<T>>;
}
