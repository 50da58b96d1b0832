use super::{OfflineReport, ReducedProblem, ReductionMethod};
use crate::error::ReductionError;
use crate::parallel::IoProcess;
use crate::parameter::ParameterSet;
use crate::pod::ProperOrthogonalDecomposition;
use crate::registry::kinds;
use crate::util::{from_f64, to_f64};
use crate::Real;
use log::Level;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const SNAPSHOTS: &str = "snapshots";
const EIGENVALUES: &str = "pod";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodGalerkinSettings {
    /// Maximum number of retained modes.
    pub n_max: usize,
    /// Modes are retained until the discarded energy fraction is below this tolerance.
    pub tolerance: f64,
    pub folder: PathBuf,
}

impl Default for PodGalerkinSettings {
    fn default() -> Self {
        Self {
            n_max: 10,
            tolerance: 1e-10,
            folder: PathBuf::from("pod_galerkin"),
        }
    }
}

impl PodGalerkinSettings {
    pub fn with_n_max(self, n_max: usize) -> Self {
        Self { n_max, ..self }
    }

    pub fn with_tolerance(self, tolerance: f64) -> Self {
        Self { tolerance, ..self }
    }

    pub fn with_folder(self, folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            ..self
        }
    }
}

/// POD-Galerkin reduction: the basis consists of the leading POD modes of the truth solutions
/// over the training set.
///
/// The weight `w_k` of the `k`-th training parameter enters the correlation matrix as
/// `w_k ⟨u_k, u_l⟩ w_l`, so quadrature weights should be passed as their square roots.
#[derive(Debug, Clone)]
pub struct PodGalerkin<T> {
    training_set: ParameterSet<T>,
    settings: PodGalerkinSettings,
}

impl<T: Real> PodGalerkin<T> {
    pub fn new(training_set: ParameterSet<T>, settings: PodGalerkinSettings) -> Self {
        Self { training_set, settings }
    }

    pub fn training_set(&self) -> &ParameterSet<T> {
        &self.training_set
    }

    pub fn settings(&self) -> &PodGalerkinSettings {
        &self.settings
    }
}

impl<T: Real> ReductionMethod<T> for PodGalerkin<T> {
    fn kind(&self) -> &'static str {
        kinds::POD_GALERKIN
    }

    fn offline(&mut self, io: &IoProcess, reduced_problem: &mut dyn ReducedProblem<T>) -> eyre::Result<OfflineReport<T>> {
        let folder = self.settings.folder.clone();
        if reduced_problem.load(io, &folder)? {
            io.log(
                Level::Info,
                format_args!(
                    "Loaded the POD-Galerkin reduced problem of {} with N = {}",
                    reduced_problem.name(),
                    reduced_problem.basis().len()
                ),
            );
            return Ok(OfflineReport {
                basis_size: reduced_problem.basis().len(),
                resumed: true,
                selected_parameters: self.training_set.clone(),
                errors: Vec::new(),
            });
        }
        if self.training_set.is_empty() {
            return Err(ReductionError::Configuration("POD requires a non-empty training set".to_string()).into());
        }

        let truth = reduced_problem.truth_problem();
        let mut pod = ProperOrthogonalDecomposition::new(truth.inner_product().clone());
        if pod.snapshots_mut().load(io, &folder, SNAPSHOTS)? {
            io.log(
                Level::Info,
                format_args!("Loaded {} snapshots of {}", pod.snapshots().len(), truth.name()),
            );
        } else {
            io.log(
                Level::Info,
                format_args!("Computing {} snapshots of {}", self.training_set.len(), truth.name()),
            );
            for (k, mu) in self.training_set.iter().enumerate() {
                let snapshot = truth.solve(mu)?;
                pod.snapshots_mut()
                    .store_snapshot_owned(snapshot, Some(self.training_set.weight(k).sqrt()))?;
            }
            pod.snapshots().save(io, &folder, SNAPSHOTS)?;
        }

        let output = pod.apply(self.settings.n_max, from_f64(self.settings.tolerance))?;
        output.save_eigenvalues(io, &folder, EIGENVALUES)?;
        io.log(
            Level::Info,
            format_args!(
                "POD retained {} modes, largest eigenvalue {:e}",
                output.n,
                output.eigenvalues.first().copied().map_or(0.0, to_f64)
            ),
        );

        let errors = output.eigenvalues[..output.n].to_vec();
        let basis = reduced_problem.basis_mut();
        basis.clear();
        basis.enrich_owned(output.modes.into_inner(), None, None)?;
        reduced_problem.update_operators()?;
        reduced_problem.save(io, &folder)?;

        Ok(OfflineReport {
            basis_size: reduced_problem.basis().len(),
            resumed: false,
            selected_parameters: self.training_set.clone(),
            errors,
        })
    }
}
