//! Errors raised by the reduced order components.
use std::error::Error;
use std::fmt;

/// Failures of the reduced order core.
///
/// Backend and persistence failures are reported through [`eyre::Report`] instead. A
/// `ReductionError` converts into a report with `?`.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ReductionError {
    InvalidArgument(String),
    DimensionMismatch { expected: usize, actual: usize },
    /// The candidate is (numerically) in the span of the current basis and must be discarded.
    LinearDependence { norm: f64, tolerance: f64 },
    Convergence { requested: usize, converged: usize },
    InvalidOperandCount(usize),
    InvalidExpansionType(String),
    InvalidTerm(String),
    Configuration(String),
    NotSolved,
    IndexOutOfBounds { index: usize, len: usize },
}

impl fmt::Display for ReductionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Self::DimensionMismatch { expected, actual } => {
                write!(f, "Dimension mismatch: expected {}, got {}.", expected, actual)
            }
            Self::LinearDependence { norm, tolerance } => write!(
                f,
                "Linearly dependent candidate: residual norm {:e} is below tolerance {:e}.",
                norm, tolerance
            ),
            Self::Convergence { requested, converged } => write!(
                f,
                "Eigensolver converged {} eigenpairs, but {} were requested.",
                converged, requested
            ),
            Self::InvalidOperandCount(count) => {
                write!(f, "Invalid operand count {}: expansions have order 1 or 2.", count)
            }
            Self::InvalidExpansionType(tag) => write!(f, "Invalid expansion type \"{}\".", tag),
            Self::InvalidTerm(term) => write!(f, "Invalid term \"{}\".", term),
            Self::Configuration(msg) => write!(f, "Invalid configuration: {}", msg),
            Self::NotSolved => write!(f, "Results requested before solve() was called."),
            Self::IndexOutOfBounds { index, len } => {
                write!(f, "Index {} is out of bounds for length {}.", index, len)
            }
        }
    }
}

impl Error for ReductionError {}

pub(crate) fn check_dimension(expected: usize, actual: usize) -> Result<(), ReductionError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ReductionError::DimensionMismatch { expected, actual })
    }
}
