//! Storage of affine expansions `Σ_i θ_i(μ) A_i` and `Σ_ij θ_i(μ) A_ij θ'_j(μ)`.
use crate::error::{check_dimension, ReductionError};
use crate::functions::{FunctionsList, FunctionsView};
use crate::io::DenseRecord;
use crate::parallel::IoProcess;
use crate::tensor::{ParametrizedTensorFactory, TruthTensor};
use crate::Real;
use eyre::WrapErr;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;
use rbfe_sparse::csr::{add_scaled_csr, scale_csr};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::ops::Index;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Operands that can be linearly combined by the product engine.
pub trait ExpansionOperand<T: Real>: Clone {
    fn scaled(&self, alpha: T) -> Self;

    /// Computes `self += alpha * other`.
    fn add_scaled(&mut self, alpha: T, other: &Self) -> Result<(), ReductionError>;
}

impl<T: Real> ExpansionOperand<T> for T {
    fn scaled(&self, alpha: T) -> Self {
        *self * alpha
    }

    fn add_scaled(&mut self, alpha: T, other: &Self) -> Result<(), ReductionError> {
        *self += alpha * *other;
        Ok(())
    }
}

impl<T: Real> ExpansionOperand<T> for DVector<T> {
    fn scaled(&self, alpha: T) -> Self {
        self * alpha
    }

    fn add_scaled(&mut self, alpha: T, other: &Self) -> Result<(), ReductionError> {
        check_dimension(self.len(), other.len())?;
        self.axpy(alpha, other, T::one());
        Ok(())
    }
}

impl<T: Real> ExpansionOperand<T> for DMatrix<T> {
    fn scaled(&self, alpha: T) -> Self {
        self * alpha
    }

    fn add_scaled(&mut self, alpha: T, other: &Self) -> Result<(), ReductionError> {
        check_dimension(self.nrows(), other.nrows())?;
        check_dimension(self.ncols(), other.ncols())?;
        self.zip_apply(other, |a, b| *a += alpha * b);
        Ok(())
    }
}

impl<T: Real> ExpansionOperand<T> for CsrMatrix<T> {
    fn scaled(&self, alpha: T) -> Self {
        let mut result = self.clone();
        scale_csr(&mut result, alpha);
        result
    }

    fn add_scaled(&mut self, alpha: T, other: &Self) -> Result<(), ReductionError> {
        check_dimension(self.nrows(), other.nrows())?;
        check_dimension(self.ncols(), other.ncols())?;
        add_scaled_csr(self, alpha, other);
        Ok(())
    }
}

impl<T: Real> ExpansionOperand<T> for TruthTensor<T> {
    fn scaled(&self, alpha: T) -> Self {
        match self {
            Self::Matrix(matrix) => Self::Matrix(matrix.scaled(alpha)),
            Self::Vector(vector) => Self::Vector(vector.scaled(alpha)),
        }
    }

    fn add_scaled(&mut self, alpha: T, other: &Self) -> Result<(), ReductionError> {
        match (self, other) {
            (Self::Matrix(a), Self::Matrix(b)) => a.add_scaled(alpha, b),
            (Self::Vector(a), Self::Vector(b)) => a.add_scaled(alpha, b),
            (a, b) => Err(ReductionError::InvalidArgument(format!(
                "cannot combine a truth {} with a truth {}",
                a.kind_name(),
                b.kind_name()
            ))),
        }
    }
}

/// Lists are combined function by function.
impl<T: Real> ExpansionOperand<T> for FunctionsList<T> {
    fn scaled(&self, alpha: T) -> Self {
        let mut result = self.clone();
        for i in 0..result.len() {
            if let Some(f) = result.get_mut(i) {
                *f *= alpha;
            }
        }
        result
    }

    fn add_scaled(&mut self, alpha: T, other: &Self) -> Result<(), ReductionError> {
        check_dimension(self.len(), other.len())?;
        for (i, g) in other.iter().enumerate() {
            if let Some(f) = self.get_mut(i) {
                f.add_scaled(alpha, g)?;
            }
        }
        Ok(())
    }
}

/// Small dense operands that can be persisted as [`DenseRecord`]s.
pub trait OnlineOperand: Sized {
    fn to_record(&self) -> DenseRecord;

    fn from_record(record: &DenseRecord) -> eyre::Result<Self>;
}

impl<T: Real> OnlineOperand for DVector<T> {
    fn to_record(&self) -> DenseRecord {
        DenseRecord::from_vector(self)
    }

    fn from_record(record: &DenseRecord) -> eyre::Result<Self> {
        record.to_vector()
    }
}

impl<T: Real> OnlineOperand for DMatrix<T> {
    fn to_record(&self) -> DenseRecord {
        DenseRecord::from_matrix(self)
    }

    fn from_record(record: &DenseRecord) -> eyre::Result<Self> {
        record.to_matrix()
    }
}

/// An index into an [`AffineExpansionStorage`] of matching order.
pub trait ExpansionIndex: Copy + fmt::Debug {
    fn flat_index(self, shape: &[usize]) -> Result<usize, ReductionError>;
}

impl ExpansionIndex for usize {
    fn flat_index(self, shape: &[usize]) -> Result<usize, ReductionError> {
        match shape {
            &[len] if self < len => Ok(self),
            &[len] => Err(ReductionError::IndexOutOfBounds { index: self, len }),
            _ => Err(ReductionError::InvalidOperandCount(1)),
        }
    }
}

impl ExpansionIndex for (usize, usize) {
    fn flat_index(self, shape: &[usize]) -> Result<usize, ReductionError> {
        let (i, j) = self;
        match shape {
            &[rows, cols] if i < rows && j < cols => Ok(i * cols + j),
            &[rows, cols] => Err(ReductionError::IndexOutOfBounds {
                index: i * cols + j,
                len: rows * cols,
            }),
            _ => Err(ReductionError::InvalidOperandCount(2)),
        }
    }
}

/// Operands of an affine expansion, indexed by one (order 1) or two (order 2) term indices.
///
/// Order-2 entries are stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct AffineExpansionStorage<O> {
    shape: Vec<usize>,
    entries: Vec<Option<O>>,
}

#[derive(Serialize, Deserialize)]
struct ExpansionRecord {
    shape: Vec<usize>,
    entries: Vec<Option<DenseRecord>>,
}

impl<O> AffineExpansionStorage<O> {
    /// Storage with all entries unset.
    pub fn with_shape(shape: &[usize]) -> Result<Self, ReductionError> {
        if !(1..=2).contains(&shape.len()) {
            return Err(ReductionError::InvalidOperandCount(shape.len()));
        }
        let len = shape.iter().product();
        Ok(Self {
            shape: shape.to_vec(),
            entries: (0..len).map(|_| None).collect(),
        })
    }

    pub fn from_vec(operands: Vec<O>) -> Self {
        Self {
            shape: vec![operands.len()],
            entries: operands.into_iter().map(Some).collect(),
        }
    }

    /// Order-2 storage from row-major operands.
    pub fn from_grid(rows: usize, cols: usize, operands: Vec<O>) -> Result<Self, ReductionError> {
        check_dimension(rows * cols, operands.len())?;
        Ok(Self {
            shape: vec![rows, cols],
            entries: operands.into_iter().map(Some).collect(),
        })
    }

    pub fn order(&self) -> usize {
        self.shape.len()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set(&mut self, index: impl ExpansionIndex, operand: O) -> Result<(), ReductionError> {
        let flat = index.flat_index(&self.shape)?;
        self.entries[flat] = Some(operand);
        Ok(())
    }

    pub fn get(&self, index: impl ExpansionIndex) -> Option<&O> {
        index
            .flat_index(&self.shape)
            .ok()
            .and_then(|flat| self.entries[flat].as_ref())
    }

    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(Option::is_some)
    }

    /// The set entries in storage order.
    pub fn iter(&self) -> impl Iterator<Item = &O> {
        self.entries.iter().flatten()
    }

    /// Applies `f` to every set entry, keeping the shape.
    pub fn try_map<U, E>(&self, mut f: impl FnMut(&O) -> Result<U, E>) -> Result<AffineExpansionStorage<U>, E> {
        let entries = self
            .entries
            .iter()
            .map(|entry| entry.as_ref().map(&mut f).transpose())
            .collect::<Result<_, E>>()?;
        Ok(AffineExpansionStorage {
            shape: self.shape.clone(),
            entries,
        })
    }
}

impl<O: OnlineOperand> AffineExpansionStorage<O> {
    pub fn save(&self, io: &IoProcess, directory: &Path, filename: &str) -> eyre::Result<()> {
        let record = ExpansionRecord {
            shape: self.shape.clone(),
            entries: self
                .entries
                .iter()
                .map(|entry| entry.as_ref().map(O::to_record))
                .collect(),
        };
        let path = directory.join(format!("{}.json", filename));
        io.run(|| {
            fs::create_dir_all(directory)?;
            fs::write(&path, serde_json::to_string(&record)?).wrap_err_with(|| format!("failed to write {}", path.display()))
        })
    }

    /// Loads a saved expansion, returning `Ok(None)` if nothing was saved.
    pub fn load(io: &IoProcess, directory: &Path, filename: &str) -> eyre::Result<Option<Self>> {
        let path = directory.join(format!("{}.json", filename));
        if !io.file_exists(&path)? {
            return Ok(None);
        }
        let record: ExpansionRecord = io.run(|| {
            let json = fs::read_to_string(&path)?;
            serde_json::from_str(&json).wrap_err_with(|| format!("corrupt expansion {}", path.display()))
        })?;
        let mut storage = Self::with_shape(&record.shape)?;
        check_dimension(storage.len(), record.entries.len())?;
        for (entry, saved) in storage.entries.iter_mut().zip(&record.entries) {
            *entry = saved.as_ref().map(O::from_record).transpose()?;
        }
        Ok(Some(storage))
    }
}

impl<O> Index<usize> for AffineExpansionStorage<O> {
    type Output = O;

    fn index(&self, index: usize) -> &O {
        match self.get(index) {
            Some(operand) => operand,
            None => panic!("no operand at index {} of expansion with shape {:?}", index, self.shape),
        }
    }
}

impl<O> Index<(usize, usize)> for AffineExpansionStorage<O> {
    type Output = O;

    fn index(&self, index: (usize, usize)) -> &O {
        match self.get(index) {
            Some(operand) => operand,
            None => panic!("no operand at index {:?} of expansion with shape {:?}", index, self.shape),
        }
    }
}

/// Tags of the non-affine expansion storages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpansionType {
    Operators,
    ErrorEstimationOperators11,
    ErrorEstimationOperators21,
    ErrorEstimationOperators22,
}

impl ExpansionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Operators => "operators",
            Self::ErrorEstimationOperators11 => "error_estimation_operators_11",
            Self::ErrorEstimationOperators21 => "error_estimation_operators_21",
            Self::ErrorEstimationOperators22 => "error_estimation_operators_22",
        }
    }

    pub fn is_error_estimation(&self) -> bool {
        !matches!(self, Self::Operators)
    }
}

impl FromStr for ExpansionType {
    type Err = ReductionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "operators" => Ok(Self::Operators),
            "error_estimation_operators_11" => Ok(Self::ErrorEstimationOperators11),
            "error_estimation_operators_21" => Ok(Self::ErrorEstimationOperators21),
            "error_estimation_operators_22" => Ok(Self::ErrorEstimationOperators22),
            _ => Err(ReductionError::InvalidExpansionType(s.to_string())),
        }
    }
}

impl fmt::Display for ExpansionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expansions whose operands are not available as assembled tensors.
///
/// `Operators` holds parametrized tensors that are only assembled once combined with the
/// thetas, and the basis functions (none, one or two) to project the result onto.
/// `ErrorEstimationOperators` holds two expansions of function lists that are combined with
/// the thetas before their Gram matrix in the inner product is computed.
#[derive(Debug, Clone)]
pub enum NonAffineExpansionStorage<'a, T: Real> {
    Operators {
        truth_operators: AffineExpansionStorage<Arc<ParametrizedTensorFactory<T>>>,
        basis_functions: Vec<FunctionsView<'a, T>>,
    },
    ErrorEstimationOperators {
        kind: ExpansionType,
        delayed_functions: [AffineExpansionStorage<FunctionsList<T>>; 2],
        inner_product_matrix: &'a CsrMatrix<T>,
    },
}

impl<'a, T: Real> NonAffineExpansionStorage<'a, T> {
    pub fn operators(
        truth_operators: AffineExpansionStorage<Arc<ParametrizedTensorFactory<T>>>,
        basis_functions: Vec<FunctionsView<'a, T>>,
    ) -> Result<Self, ReductionError> {
        if basis_functions.len() > 2 {
            return Err(ReductionError::InvalidOperandCount(basis_functions.len()));
        }
        Ok(Self::Operators {
            truth_operators,
            basis_functions,
        })
    }

    pub fn error_estimation_operators(
        kind: &str,
        delayed_functions: [AffineExpansionStorage<FunctionsList<T>>; 2],
        inner_product_matrix: &'a CsrMatrix<T>,
    ) -> Result<Self, ReductionError> {
        let kind: ExpansionType = kind.parse()?;
        if !kind.is_error_estimation() {
            return Err(ReductionError::InvalidExpansionType(kind.to_string()));
        }
        Ok(Self::ErrorEstimationOperators {
            kind,
            delayed_functions,
            inner_product_matrix,
        })
    }

    pub fn expansion_type(&self) -> ExpansionType {
        match self {
            Self::Operators { .. } => ExpansionType::Operators,
            Self::ErrorEstimationOperators { kind, .. } => *kind,
        }
    }
}
