//! Empirical interpolation of parameter-dependent fields.
//!
//! Applied to coefficient fields this is the empirical interpolation method (EIM); applied to
//! the values of assembled tensors it is its discrete variant (DEIM).
use crate::error::{check_dimension, ReductionError};
use crate::functions::{FunctionsList, FunctionsMatrix};
use crate::util::{from_f64, to_f64};
use crate::Real;
use log::debug;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EimSettings {
    /// Maximum number of interpolation basis functions.
    pub n_max: usize,
    /// The greedy stops once the largest interpolation error over the snapshots is at most
    /// `tolerance`.
    pub tolerance: f64,
}

impl Default for EimSettings {
    fn default() -> Self {
        Self {
            n_max: 20,
            tolerance: 1e-10,
        }
    }
}

impl EimSettings {
    pub fn with_n_max(self, n_max: usize) -> Self {
        Self { n_max, ..self }
    }

    pub fn with_tolerance(self, tolerance: f64) -> Self {
        Self { tolerance, ..self }
    }
}

/// Interpolation basis functions `q_m` together with their magic points `p_m`.
///
/// The interpolation matrix `B_ij = q_j(p_i)` is lower triangular with unit diagonal.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolationBasis<T: Real> {
    basis: FunctionsList<T>,
    magic_points: Vec<usize>,
    interpolation_matrix: DMatrix<T>,
    error_history: Vec<T>,
}

impl<T: Real> InterpolationBasis<T> {
    fn empty() -> Self {
        Self {
            basis: FunctionsList::new(),
            magic_points: Vec::new(),
            interpolation_matrix: DMatrix::zeros(0, 0),
            error_history: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.basis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.basis.is_empty()
    }

    pub fn basis(&self) -> &FunctionsList<T> {
        &self.basis
    }

    pub fn magic_points(&self) -> &[usize] {
        &self.magic_points
    }

    pub fn interpolation_matrix(&self) -> &DMatrix<T> {
        &self.interpolation_matrix
    }

    /// The largest interpolation error over the snapshots before each greedy step, followed by
    /// the error of the final interpolant.
    pub fn error_history(&self) -> &[T] {
        &self.error_history
    }

    /// Samples `field` at the magic points.
    pub fn sample(&self, field: &DVector<T>) -> DVector<T> {
        DVector::from_iterator(self.magic_points.len(), self.magic_points.iter().map(|&p| field[p]))
    }

    /// The interpolation coefficients of a field with the given values at the magic points.
    pub fn coefficients(&self, values_at_points: &DVector<T>) -> Result<DVector<T>, ReductionError> {
        check_dimension(self.len(), values_at_points.len())?;
        if self.is_empty() {
            return Ok(DVector::zeros(0));
        }
        self.interpolation_matrix
            .solve_lower_triangular(values_at_points)
            .ok_or_else(|| ReductionError::Configuration("singular interpolation matrix".to_string()))
    }

    /// The interpolant `Σ_m c_m q_m` of `field`.
    pub fn interpolate(&self, field: &DVector<T>) -> Result<DVector<T>, ReductionError> {
        if self.is_empty() {
            return Ok(DVector::zeros(field.len()));
        }
        if let Some(dim) = self.basis.truth_dim() {
            check_dimension(dim, field.len())?;
        }
        let coefficients = self.coefficients(&self.sample(field))?;
        self.basis.multiply_by_vector(&coefficients)
    }

    fn push(&mut self, function: DVector<T>, magic_point: usize) -> Result<(), ReductionError> {
        let m = self.len();
        let mut matrix = DMatrix::zeros(m + 1, m + 1);
        matrix.view_mut((0, 0), (m, m)).copy_from(&self.interpolation_matrix);
        for (j, q) in self.basis.iter().enumerate() {
            matrix[(m, j)] = q[magic_point];
        }
        matrix[(m, m)] = function[magic_point];
        self.interpolation_matrix = matrix;
        self.magic_points.push(magic_point);
        self.basis.push(function)
    }
}

/// Index of the entry of largest magnitude, the lowest index among ties.
fn argmax_abs<T: Real>(values: &DVector<T>) -> Option<(usize, T)> {
    let mut best: Option<(usize, T)> = None;
    for (i, v) in values.iter().enumerate() {
        let v = v.abs();
        if best.map_or(true, |(_, b)| v > b) {
            best = Some((i, v));
        }
    }
    best
}

/// Greedy construction of an interpolation basis from snapshots.
#[derive(Debug, Clone, Default)]
pub struct EmpiricalInterpolation {
    settings: EimSettings,
}

impl EmpiricalInterpolation {
    pub fn new(settings: EimSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &EimSettings {
        &self.settings
    }

    /// Runs the greedy on the given snapshots.
    ///
    /// In each step the snapshot with the largest interpolation error (in the maximum norm) is
    /// selected, lowest index first among ties. Its residual is normalized to one at the point
    /// where it is largest, which becomes the next magic point. The greedy stops after
    /// `n_max` functions, once the error is at most `tolerance`, or when the residuals vanish.
    pub fn apply<T: Real>(&self, snapshots: &[DVector<T>]) -> Result<InterpolationBasis<T>, ReductionError> {
        let mut interpolation = InterpolationBasis::empty();
        let Some(dim) = snapshots.first().map(DVector::len) else {
            return Ok(interpolation);
        };
        for s in snapshots {
            check_dimension(dim, s.len())?;
        }

        let tolerance = from_f64::<T>(self.settings.tolerance);
        loop {
            let residuals = snapshots
                .par_iter()
                .map(|s| -> Result<DVector<T>, ReductionError> { Ok(s - interpolation.interpolate(s)?) })
                .collect::<Result<Vec<_>, ReductionError>>()?;

            let mut selected: Option<(usize, T)> = None;
            for (k, r) in residuals.iter().enumerate() {
                let error = argmax_abs(r).map_or(T::zero(), |(_, e)| e);
                if selected.map_or(true, |(_, e)| error > e) {
                    selected = Some((k, error));
                }
            }
            let Some((k, error)) = selected else {
                break;
            };
            interpolation.error_history.push(error);
            debug!(
                "EIM step {}: maximum interpolation error {:e} at snapshot {}",
                interpolation.len(),
                to_f64(error),
                k
            );

            if interpolation.len() >= self.settings.n_max || error <= tolerance || error == T::zero() {
                break;
            }

            let residual = &residuals[k];
            let Some((magic_point, _)) = argmax_abs(residual) else {
                break;
            };
            let function = residual.unscale(residual[magic_point]);
            interpolation.push(function, magic_point)?;
        }
        Ok(interpolation)
    }

    pub fn apply_to_list<T: Real>(&self, snapshots: &FunctionsList<T>) -> Result<InterpolationBasis<T>, ReductionError> {
        self.apply(snapshots.as_slice())
    }
}
