//! Parameters, parameter spaces and training/testing sets.
use crate::error::ReductionError;
use crate::parallel::IoProcess;
use crate::util::{from_f64, to_f64};
use crate::Real;
use eyre::WrapErr;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::Index;
use std::path::Path;

/// A point `μ` in parameter space.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter<T> {
    values: Vec<T>,
}

impl<T: Real> Parameter<T> {
    pub fn new(values: Vec<T>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.values
    }
}

impl<T> Index<usize> for Parameter<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.values[index]
    }
}

impl<T: Real> From<Vec<T>> for Parameter<T> {
    fn from(values: Vec<T>) -> Self {
        Self::new(values)
    }
}

/// The box `[a_1, b_1] x ... x [a_P, b_P]` of admissible parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpace<T> {
    ranges: Vec<(T, T)>,
}

impl<T: Real> ParameterSpace<T> {
    pub fn new(ranges: Vec<(T, T)>) -> Result<Self, ReductionError> {
        if let Some((a, b)) = ranges.iter().find(|(a, b)| a > b) {
            return Err(ReductionError::InvalidArgument(format!(
                "empty parameter range [{}, {}]",
                a, b
            )));
        }
        Ok(Self { ranges })
    }

    pub fn dim(&self) -> usize {
        self.ranges.len()
    }

    pub fn ranges(&self) -> &[(T, T)] {
        &self.ranges
    }

    pub fn contains(&self, mu: &Parameter<T>) -> bool {
        mu.len() == self.dim()
            && self
                .ranges
                .iter()
                .zip(mu.as_slice())
                .all(|((a, b), x)| a <= x && x <= b)
    }

    /// Draws `n` parameters uniformly distributed in the box.
    pub fn sample_uniform(&self, n: usize, rng: &mut impl Rng) -> ParameterSet<T> {
        let parameters = (0..n)
            .map(|_| {
                let values = self
                    .ranges
                    .iter()
                    .map(|&(a, b)| a + (b - a) * from_f64::<T>(rng.gen::<f64>()))
                    .collect();
                Parameter::new(values)
            })
            .collect();
        ParameterSet::new(parameters)
    }

    /// Draws `n` parameters whose logarithm is uniformly distributed.
    ///
    /// Requires strictly positive ranges.
    pub fn sample_log_uniform(&self, n: usize, rng: &mut impl Rng) -> Result<ParameterSet<T>, ReductionError> {
        if self.ranges.iter().any(|(a, _)| *a <= T::zero()) {
            return Err(ReductionError::InvalidArgument(
                "log-uniform sampling requires positive parameter ranges".to_string(),
            ));
        }
        let parameters = (0..n)
            .map(|_| {
                let values = self
                    .ranges
                    .iter()
                    .map(|&(a, b)| {
                        let (log_a, log_b) = (a.ln(), b.ln());
                        (log_a + (log_b - log_a) * from_f64::<T>(rng.gen::<f64>())).exp()
                    })
                    .collect();
                Parameter::new(values)
            })
            .collect();
        Ok(ParameterSet::new(parameters))
    }
}

/// An ordered, optionally weighted, set of parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSet<T> {
    parameters: Vec<Parameter<T>>,
    weights: Option<Vec<T>>,
}

#[derive(Serialize, Deserialize)]
struct ParameterSetRecord {
    parameters: Vec<Vec<f64>>,
    weights: Option<Vec<f64>>,
}

impl<T: Real> Default for ParameterSet<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T: Real> ParameterSet<T> {
    pub fn new(parameters: Vec<Parameter<T>>) -> Self {
        Self {
            parameters,
            weights: None,
        }
    }

    pub fn with_weights(self, weights: Vec<T>) -> Result<Self, ReductionError> {
        if weights.len() != self.parameters.len() {
            return Err(ReductionError::DimensionMismatch {
                expected: self.parameters.len(),
                actual: weights.len(),
            });
        }
        Ok(Self {
            weights: Some(weights),
            ..self
        })
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Parameter<T>> {
        self.parameters.get(index)
    }

    /// Appends a parameter, with weight one if the set is weighted.
    pub fn push(&mut self, mu: Parameter<T>) {
        self.parameters.push(mu);
        if let Some(weights) = &mut self.weights {
            weights.push(T::one());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter<T>> {
        self.parameters.iter()
    }

    /// The weight of the given parameter, `1` for unweighted sets.
    pub fn weight(&self, index: usize) -> T {
        self.weights
            .as_ref()
            .map(|w| w[index])
            .unwrap_or_else(T::one)
    }

    pub fn is_weighted(&self) -> bool {
        self.weights.is_some()
    }

    pub fn save(&self, io: &IoProcess, directory: &Path, filename: &str) -> eyre::Result<()> {
        let record = ParameterSetRecord {
            parameters: self
                .parameters
                .iter()
                .map(|mu| mu.as_slice().iter().copied().map(to_f64).collect())
                .collect(),
            weights: self
                .weights
                .as_ref()
                .map(|w| w.iter().copied().map(to_f64).collect()),
        };
        let path = directory.join(format!("{}.json", filename));
        io.run(|| {
            fs::create_dir_all(directory)?;
            let json = serde_json::to_string_pretty(&record)?;
            fs::write(&path, json).wrap_err_with(|| format!("failed to write {}", path.display()))
        })
    }

    /// Loads the set from disk. Returns `Ok(false)` if there is nothing to load.
    pub fn load(&mut self, io: &IoProcess, directory: &Path, filename: &str) -> eyre::Result<bool> {
        let path = directory.join(format!("{}.json", filename));
        if !io.file_exists(&path)? {
            return Ok(false);
        }
        let record: ParameterSetRecord = io.run(|| {
            let json = fs::read_to_string(&path)?;
            serde_json::from_str(&json).wrap_err_with(|| format!("corrupt parameter set {}", path.display()))
        })?;
        self.parameters = record
            .parameters
            .iter()
            .map(|mu| Parameter::new(mu.iter().map(|&x| from_f64(x)).collect()))
            .collect();
        self.weights = record
            .weights
            .map(|w| w.into_iter().map(from_f64).collect());
        Ok(true)
    }
}
