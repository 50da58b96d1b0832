use super::{OfflineReport, ReducedProblem, ReductionMethod};
use crate::error::ReductionError;
use crate::gram_schmidt::{GramSchmidt, GramSchmidtSettings};
use crate::parallel::IoProcess;
use crate::parameter::ParameterSet;
use crate::registry::kinds;
use crate::util::{from_f64, to_f64};
use crate::Real;
use log::{debug, Level};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const SELECTED_PARAMETERS: &str = "greedy_selected_parameters";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducedBasisSettings {
    /// Maximum dimension of the reduced basis.
    pub n_max: usize,
    /// The greedy stops once the maximum estimated error over the training set is below
    /// this tolerance.
    pub tolerance: f64,
    /// Where the reduced problem is saved after every enrichment, and resumed from.
    pub folder: PathBuf,
    pub gram_schmidt: GramSchmidtSettings,
}

impl Default for ReducedBasisSettings {
    fn default() -> Self {
        Self {
            n_max: 10,
            tolerance: 1e-6,
            folder: PathBuf::from("reduced_basis"),
            gram_schmidt: GramSchmidtSettings::default(),
        }
    }
}

impl ReducedBasisSettings {
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

    pub fn with_gram_schmidt(self, gram_schmidt: GramSchmidtSettings) -> Self {
        Self { gram_schmidt, ..self }
    }
}

/// The weak greedy reduced basis method.
///
/// Starting from the first parameter of the training set, the truth solution at the parameter
/// with the largest estimated error is orthonormalized and added to the basis until the error
/// bound drops below the tolerance or the basis reaches `n_max` functions.
#[derive(Debug, Clone)]
pub struct ReducedBasis<T> {
    training_set: ParameterSet<T>,
    settings: ReducedBasisSettings,
}

impl<T: Real> ReducedBasis<T> {
    pub fn new(training_set: ParameterSet<T>, settings: ReducedBasisSettings) -> Self {
        Self { training_set, settings }
    }

    pub fn training_set(&self) -> &ParameterSet<T> {
        &self.training_set
    }

    pub fn settings(&self) -> &ReducedBasisSettings {
        &self.settings
    }

    /// The maximum estimated error over the training set and the index of the first
    /// parameter attaining it.
    fn max_error(&self, reduced_problem: &dyn ReducedProblem<T>) -> eyre::Result<(T, usize)> {
        let mut max = (T::zero(), 0);
        for (i, mu) in self.training_set.iter().enumerate() {
            let reduced_solution = reduced_problem.solve(mu, None)?;
            let error = reduced_problem.estimate_error(mu, &reduced_solution)?;
            if error > max.0 {
                max = (error, i);
            }
        }
        Ok(max)
    }
}

impl<T: Real> ReductionMethod<T> for ReducedBasis<T> {
    fn kind(&self) -> &'static str {
        kinds::REDUCED_BASIS
    }

    fn offline(&mut self, io: &IoProcess, reduced_problem: &mut dyn ReducedProblem<T>) -> eyre::Result<OfflineReport<T>> {
        if self.training_set.is_empty() {
            return Err(ReductionError::Configuration("the greedy requires a non-empty training set".to_string()).into());
        }
        let folder = self.settings.folder.clone();
        let tolerance = from_f64::<T>(self.settings.tolerance);
        let gram_schmidt = GramSchmidt::new(reduced_problem.truth_problem().inner_product().clone())
            .with_settings(self.settings.gram_schmidt);

        let mut selected = ParameterSet::default();
        let resumed = reduced_problem.load(io, &folder)?;
        if resumed {
            selected.load(io, &folder, SELECTED_PARAMETERS)?;
            io.log(
                Level::Info,
                format_args!(
                    "Resuming the greedy of {} with N = {}",
                    reduced_problem.name(),
                    reduced_problem.basis().len()
                ),
            );
        } else {
            io.log(Level::Info, format_args!("Starting the greedy of {}", reduced_problem.name()));
        }

        let mut errors = Vec::new();
        let mut next = if reduced_problem.basis().is_empty() {
            Some(0)
        } else {
            let (error, index) = self.max_error(reduced_problem)?;
            errors.push(error);
            (error > tolerance).then_some(index)
        };

        while let Some(index) = next {
            if reduced_problem.basis().len() >= self.settings.n_max {
                io.log(
                    Level::Info,
                    format_args!("Greedy reached the maximum basis size {}", self.settings.n_max),
                );
                break;
            }
            let mu = self.training_set.get(index).ok_or(ReductionError::IndexOutOfBounds {
                index,
                len: self.training_set.len(),
            })?;
            debug!("Greedy selected parameter {} {:?}", index, mu.as_slice());

            let snapshot = reduced_problem.truth_problem().solve(mu)?;
            match gram_schmidt.apply(&snapshot, reduced_problem.basis()) {
                Ok(function) => reduced_problem.basis_mut().enrich_owned(vec![function], None, None)?,
                Err(err @ ReductionError::LinearDependence { .. }) => {
                    io.log(Level::Warn, format_args!("Discarding snapshot at {:?}: {}", mu.as_slice(), err));
                    break;
                }
                Err(err) => return Err(err.into()),
            }
            selected.push(mu.clone());

            reduced_problem.update_operators()?;
            reduced_problem.save(io, &folder)?;
            selected.save(io, &folder, SELECTED_PARAMETERS)?;

            let (error, index) = self.max_error(reduced_problem)?;
            io.log(
                Level::Info,
                format_args!(
                    "Greedy N = {}: maximum error estimate {:e}",
                    reduced_problem.basis().len(),
                    to_f64(error)
                ),
            );
            errors.push(error);
            next = (error > tolerance).then_some(index);
        }

        Ok(OfflineReport {
            basis_size: reduced_problem.basis().len(),
            resumed,
            selected_parameters: selected,
            errors,
        })
    }
}
