//! Truth tensors, parametrized tensors and their affine decomposition.
use crate::eim::{EimSettings, EmpiricalInterpolation, InterpolationBasis};
use crate::error::{check_dimension, ReductionError};
use crate::expansion::{AffineExpansionStorage, ExpansionOperand};
use crate::form::{Coefficient, FieldFn, FormAssembler, FormTerm, ParametricFn, ParametrizedForm, SeparatedParametrizedForm};
use crate::functions::FunctionsList;
use crate::io::{tensor_load, tensor_save, DofMap, PermutationRegistry, TensorSignature};
use crate::parallel::IoProcess;
use crate::parameter::{Parameter, ParameterSet};
use crate::Real;
use eyre::{eyre, WrapErr};
use log::info;
use nalgebra::{DVector, Scalar};
use nalgebra_sparse::CsrMatrix;
use rbfe_sparse::csr::csr_with_values;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// An assembled high fidelity operator.
#[derive(Debug, Clone, PartialEq)]
pub enum TruthTensor<T: Scalar> {
    Matrix(CsrMatrix<T>),
    Vector(DVector<T>),
}

impl<T: Real> TruthTensor<T> {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Matrix(_) => "matrix",
            Self::Vector(_) => "vector",
        }
    }

    /// Vectors have shape `(n, 1)`.
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Self::Matrix(matrix) => (matrix.nrows(), matrix.ncols()),
            Self::Vector(vector) => (vector.len(), 1),
        }
    }

    pub fn as_matrix(&self) -> Option<&CsrMatrix<T>> {
        match self {
            Self::Matrix(matrix) => Some(matrix),
            Self::Vector(_) => None,
        }
    }

    pub fn as_vector(&self) -> Option<&DVector<T>> {
        match self {
            Self::Vector(vector) => Some(vector),
            Self::Matrix(_) => None,
        }
    }

    /// The stored values: the nonzeros of a matrix in CSR order, or the entries of a vector.
    pub fn values(&self) -> &[T] {
        match self {
            Self::Matrix(matrix) => matrix.values(),
            Self::Vector(vector) => vector.as_slice(),
        }
    }

    /// Whether both tensors are of the same kind and, for matrices, share the sparsity pattern.
    pub fn has_same_structure(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Matrix(a), Self::Matrix(b)) => a.pattern() == b.pattern(),
            (Self::Vector(a), Self::Vector(b)) => a.len() == b.len(),
            _ => false,
        }
    }

    /// A tensor with the structure of `self` and the given values.
    pub fn with_values(&self, values: Vec<T>) -> Result<Self, ReductionError> {
        check_dimension(self.values().len(), values.len())?;
        match self {
            Self::Matrix(matrix) => csr_with_values(matrix, values)
                .map(Self::Matrix)
                .map_err(|err| ReductionError::InvalidArgument(err.to_string())),
            Self::Vector(_) => Ok(Self::Vector(DVector::from_vec(values))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TensorStorageMetadata {
    kinds: Vec<String>,
}

/// The truth operators `A_0, ..., A_{K-1}` of one term of an affine expansion.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorStorage<T: Real> {
    name: String,
    operators: AffineExpansionStorage<TruthTensor<T>>,
}

impl<T: Real> TensorStorage<T> {
    pub fn new(name: impl Into<String>, operators: AffineExpansionStorage<TruthTensor<T>>) -> Self {
        Self {
            name: name.into(),
            operators,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operators(&self) -> &AffineExpansionStorage<TruthTensor<T>> {
        &self.operators
    }

    pub fn into_operators(self) -> AffineExpansionStorage<TruthTensor<T>> {
        self.operators
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    fn generator(&self, index: usize) -> String {
        format!("{}_{}", self.name, index)
    }

    /// Saves all operators, each under the generator `"{name}_{index}"`.
    ///
    /// Vectors are numbered by `test_space`; matrices have rows numbered by `test_space` and
    /// columns by `trial_space`.
    pub fn save(&self, io: &IoProcess, directory: &Path, test_space: &DofMap, trial_space: &DofMap) -> eyre::Result<()> {
        let mut kinds = Vec::with_capacity(self.len());
        for (i, operator) in self.operators.iter().enumerate() {
            let generator = self.generator(i);
            let signature = TensorSignature::new(&generator, test_space, trial_space);
            tensor_save(io, operator, &signature, directory, &generator)?;
            kinds.push(operator.kind_name().to_string());
        }
        let path = directory.join(format!("{}.tensors.json", self.name));
        let metadata = TensorStorageMetadata { kinds };
        io.run(|| fs::write(&path, serde_json::to_string(&metadata)?).wrap_err_with(|| format!("failed to write {}", path.display())))
    }

    /// Loads operators saved with [`TensorStorage::save`], possibly under another partitioning.
    ///
    /// Returns `Ok(None)` if the operators were not saved.
    pub fn load(
        io: &IoProcess,
        registry: &PermutationRegistry,
        directory: &Path,
        name: &str,
        test_space: &DofMap,
        trial_space: &DofMap,
    ) -> eyre::Result<Option<Self>> {
        let path = directory.join(format!("{}.tensors.json", name));
        if !io.file_exists(&path)? {
            return Ok(None);
        }
        let metadata: TensorStorageMetadata = io.run(|| {
            let json = fs::read_to_string(&path)?;
            serde_json::from_str(&json).wrap_err_with(|| format!("corrupt tensor metadata {}", path.display()))
        })?;

        let mut storage = Self {
            name: name.to_string(),
            operators: AffineExpansionStorage::with_shape(&[metadata.kinds.len()])?,
        };
        for (i, kind) in metadata.kinds.iter().enumerate() {
            let mut tensor = match kind.as_str() {
                "matrix" => TruthTensor::Matrix(CsrMatrix::zeros(0, 0)),
                "vector" => TruthTensor::Vector(DVector::zeros(0)),
                other => eyre::bail!("unknown tensor kind {} in {}", other, path.display()),
            };
            let generator = storage.generator(i);
            let signature = TensorSignature::new(&generator, test_space, trial_space);
            if !tensor_load(io, registry, &mut tensor, &signature, directory, &generator)? {
                eyre::bail!("operator {} of {} is missing", i, name);
            }
            storage.operators.set(i, tensor)?;
        }
        Ok(Some(storage))
    }
}

/// How a parametrized tensor is turned into an affine expansion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecompositionMethod {
    /// Only constant and parametric scalar coefficients are allowed.
    Exact,
    /// Empirical interpolation of every coefficient field.
    Eim(EimSettings),
    /// Discrete empirical interpolation of the assembled tensors.
    Deim(EimSettings),
}

impl DecompositionMethod {
    /// `"EIM"` or `"DEIM"` for interpolating methods.
    pub fn interpolation_name(&self) -> Option<&'static str> {
        match self {
            Self::Exact => None,
            Self::Eim(_) => Some("EIM"),
            Self::Deim(_) => Some("DEIM"),
        }
    }
}

#[derive(Clone)]
enum ThetaSource<T: Real> {
    One,
    Parametric(ParametricFn<T>),
    Field {
        field: FieldFn<T>,
        interpolation: Arc<InterpolationBasis<T>>,
    },
    Tensor {
        factory: ParametrizedTensorFactory<T>,
        interpolation: Arc<InterpolationBasis<T>>,
    },
}

impl<T: Real> ThetaSource<T> {
    fn len(&self) -> usize {
        match self {
            Self::One | Self::Parametric(_) => 1,
            Self::Field { interpolation, .. } | Self::Tensor { interpolation, .. } => interpolation.len(),
        }
    }
}

/// An affine expansion `Σ_i θ_i(μ) A_i` of a parametrized tensor, exact or interpolated.
#[derive(Clone)]
pub struct AffineDecomposition<T: Real> {
    operators: AffineExpansionStorage<TruthTensor<T>>,
    thetas: Vec<ThetaSource<T>>,
    interpolation_locations: Vec<Vec<usize>>,
    interpolation_method: Option<&'static str>,
}

impl<T: Real> fmt::Debug for AffineDecomposition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AffineDecomposition")
            .field("num_terms", &self.num_terms())
            .field("interpolation_locations", &self.interpolation_locations)
            .finish()
    }
}

impl<T: Real> AffineDecomposition<T> {
    pub fn num_terms(&self) -> usize {
        self.operators.len()
    }

    pub fn operators(&self) -> &AffineExpansionStorage<TruthTensor<T>> {
        &self.operators
    }

    /// `"EIM"` or `"DEIM"` if some part of the decomposition is interpolated.
    pub fn interpolation_method_name(&self) -> Option<&'static str> {
        self.interpolation_method
    }

    /// The magic points of every interpolated part of the decomposition.
    pub fn interpolation_locations(&self) -> &[Vec<usize>] {
        &self.interpolation_locations
    }

    /// Evaluates the coefficients `θ_i(μ)` of all terms.
    pub fn compute_thetas(&self, mu: &Parameter<T>) -> eyre::Result<DVector<T>> {
        let mut thetas = Vec::with_capacity(self.num_terms());
        for source in &self.thetas {
            match source {
                ThetaSource::One => thetas.push(T::one()),
                ThetaSource::Parametric(theta) => thetas.push(theta(mu)),
                ThetaSource::Field { field, interpolation } => {
                    let coefficients = interpolation.coefficients(&interpolation.sample(&field(mu)))?;
                    thetas.extend(coefficients.iter().copied());
                }
                ThetaSource::Tensor { factory, interpolation } => {
                    let tensor = factory.evaluate(mu)?;
                    let values = DVector::from_column_slice(tensor.values());
                    let coefficients = interpolation.coefficients(&interpolation.sample(&values))?;
                    thetas.extend(coefficients.iter().copied());
                }
            }
        }
        debug_assert_eq!(thetas.len(), self.num_terms());
        Ok(DVector::from_vec(thetas))
    }
}

/// A parametrized form bound to an assembler, i.e. a tensor that can be assembled for any
/// parameter.
#[derive(Clone)]
pub struct ParametrizedTensorFactory<T: Real> {
    form: SeparatedParametrizedForm<T>,
    assembler: Arc<dyn FormAssembler<T> + Send + Sync>,
    method: Option<DecompositionMethod>,
}

impl<T: Real> fmt::Debug for ParametrizedTensorFactory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParametrizedTensorFactory")
            .field("name", &self.name())
            .field("description", &self.description())
            .finish()
    }
}

impl<T: Real> ParametrizedTensorFactory<T> {
    pub fn new(form: ParametrizedForm<T>, assembler: Arc<dyn FormAssembler<T> + Send + Sync>) -> Self {
        let mut form = SeparatedParametrizedForm::new(form);
        form.separate();
        Self {
            form,
            assembler,
            method: None,
        }
    }

    /// Sets the method used by [`decompose`](Self::decompose).
    pub fn with_decomposition_method(self, method: DecompositionMethod) -> Self {
        Self {
            method: Some(method),
            ..self
        }
    }

    /// The configured decomposition method. Without configuration, forms with coefficient
    /// fields use EIM with default settings and all other forms are decomposed exactly.
    pub fn decomposition_method(&self) -> DecompositionMethod {
        match self.method {
            Some(method) => method,
            None if self.has_fields() => DecompositionMethod::Eim(EimSettings::default()),
            None => DecompositionMethod::Exact,
        }
    }

    pub fn name(&self) -> &str {
        self.form.name()
    }

    pub fn description(&self) -> String {
        let terms: Vec<String> = self
            .form
            .form()
            .terms()
            .iter()
            .map(|term| match &term.coefficient {
                Coefficient::Constant(c) => format!("{} * {}", c, term.form),
                Coefficient::Parametric(_) => format!("theta(mu) * {}", term.form),
                Coefficient::Field(_) => format!("g(x; mu) * {}", term.form),
            })
            .collect();
        format!("{} = {}", self.name(), terms.join(" + "))
    }

    pub fn is_parametrized(&self) -> bool {
        self.form.is_parametrized()
    }

    pub fn is_time_dependent(&self) -> bool {
        false
    }

    /// `"EIM"` or `"DEIM"` if the configured decomposition interpolates.
    pub fn interpolation_method_name(&self) -> Option<&'static str> {
        self.decomposition_method().interpolation_name()
    }

    pub fn separated_form(&self) -> &SeparatedParametrizedForm<T> {
        &self.form
    }

    fn has_fields(&self) -> bool {
        self.form
            .coefficients()
            .iter()
            .any(|c| matches!(c, Coefficient::Field(_)))
    }

    pub fn create_interpolation_locations_container(&self) -> Vec<usize> {
        Vec::new()
    }

    pub fn create_snapshots_container(&self) -> FunctionsList<T> {
        FunctionsList::new()
    }

    pub fn create_basis_container(&self) -> Vec<TruthTensor<T>> {
        Vec::new()
    }

    fn assemble_term(&self, term: &FormTerm<T>, mu: &Parameter<T>) -> eyre::Result<TruthTensor<T>> {
        match &term.coefficient {
            Coefficient::Constant(c) => Ok(self.assembler.assemble(&term.form, None)?.scaled(*c)),
            Coefficient::Parametric(theta) => Ok(self.assembler.assemble(&term.form, None)?.scaled(theta(mu))),
            Coefficient::Field(field) => {
                let values = field(mu);
                check_dimension(self.assembler.num_field_points(), values.len())?;
                self.assembler.assemble(&term.form, Some(&values))
            }
        }
    }

    /// Assembles the tensor for the parameter `mu`.
    pub fn evaluate(&self, mu: &Parameter<T>) -> eyre::Result<TruthTensor<T>> {
        let mut result: Option<TruthTensor<T>> = None;
        for term in self.form.form().terms() {
            let tensor = self.assemble_term(term, mu)?;
            result = Some(match result.take() {
                None => tensor,
                Some(mut sum) => {
                    sum.add_scaled(T::one(), &tensor)?;
                    sum
                }
            });
        }
        result.ok_or_else(|| eyre!("form {} has no terms", self.name()))
    }

    /// Computes an affine expansion of this tensor with the configured method.
    pub fn decompose(&self, training_set: &ParameterSet<T>) -> eyre::Result<AffineDecomposition<T>> {
        self.affine_decomposition(training_set, &self.decomposition_method())
    }

    /// Computes an affine expansion of this tensor.
    ///
    /// Constant terms are summed into a single operator with coefficient one. Parametric
    /// scalar coefficients give one operator each. Coefficient fields are interpolated from
    /// their values on `training_set` with EIM, or the whole tensor is interpolated from its
    /// assembled values with DEIM.
    pub fn affine_decomposition(
        &self,
        training_set: &ParameterSet<T>,
        method: &DecompositionMethod,
    ) -> eyre::Result<AffineDecomposition<T>> {
        if self.form.form().terms().is_empty() {
            return Err(ReductionError::Configuration(format!("form {} has no terms", self.name())).into());
        }
        let mut operators = Vec::new();
        let mut thetas = Vec::new();
        let mut interpolation_locations = Vec::new();

        match method {
            DecompositionMethod::Exact | DecompositionMethod::Eim(_) => {
                let origin = Parameter::new(Vec::new());
                let mut constant: Option<TruthTensor<T>> = None;
                for term in self.form.unchanged_forms() {
                    let tensor = self.assemble_term(term, &origin)?;
                    constant = Some(match constant.take() {
                        None => tensor,
                        Some(mut sum) => {
                            sum.add_scaled(T::one(), &tensor)?;
                            sum
                        }
                    });
                }
                if let Some(constant) = constant {
                    operators.push(constant);
                    thetas.push(ThetaSource::One);
                }

                for (i, coefficient) in self.form.coefficients().iter().enumerate() {
                    match (coefficient, method) {
                        (Coefficient::Parametric(theta), _) => {
                            let term = self.form.replace_placeholders(i, Coefficient::Constant(T::one()));
                            operators.push(self.assemble_term(&term, &origin)?);
                            thetas.push(ThetaSource::Parametric(Arc::clone(theta)));
                        }
                        (Coefficient::Field(field), DecompositionMethod::Eim(settings)) => {
                            let mut snapshots = self.create_snapshots_container();
                            for mu in training_set.iter() {
                                let values = field(mu);
                                check_dimension(self.assembler.num_field_points(), values.len())?;
                                snapshots.push(values)?;
                            }
                            let interpolation = EmpiricalInterpolation::new(*settings).apply_to_list(&snapshots)?;
                            info!(
                                "EIM of {} in {}: {} basis functions",
                                self.form.placeholders_names(i),
                                self.name(),
                                interpolation.len()
                            );
                            let mut basis = self.create_basis_container();
                            for q in interpolation.basis().iter() {
                                let q = q.clone();
                                let term = self.form.replace_placeholders(i, Coefficient::field(move |_| q.clone()));
                                basis.push(self.assemble_term(&term, &origin)?);
                            }
                            operators.extend(basis);
                            let mut locations = self.create_interpolation_locations_container();
                            locations.extend_from_slice(interpolation.magic_points());
                            interpolation_locations.push(locations);
                            thetas.push(ThetaSource::Field {
                                field: Arc::clone(field),
                                interpolation: Arc::new(interpolation),
                            });
                        }
                        (Coefficient::Field(_), _) => {
                            return Err(ReductionError::Configuration(format!(
                                "{} of {} is a coefficient field and requires interpolation",
                                self.form.placeholders_names(i),
                                self.name()
                            ))
                            .into());
                        }
                        (Coefficient::Constant(_), _) => unreachable!("constant coefficients are never placeholders"),
                    }
                }
            }
            DecompositionMethod::Deim(settings) => {
                let mut template: Option<TruthTensor<T>> = None;
                let mut snapshots = self.create_snapshots_container();
                for mu in training_set.iter() {
                    let tensor = self.evaluate(mu)?;
                    match &template {
                        Some(t) if !t.has_same_structure(&tensor) => {
                            return Err(ReductionError::Configuration(format!(
                                "DEIM of {} requires all snapshots to share the same sparsity pattern",
                                self.name()
                            ))
                            .into());
                        }
                        Some(_) => {}
                        None => template = Some(tensor.clone()),
                    }
                    snapshots.push(DVector::from_column_slice(tensor.values()))?;
                }
                let template = template.ok_or_else(|| {
                    ReductionError::Configuration(format!("DEIM of {} requires a non-empty training set", self.name()))
                })?;
                let interpolation = EmpiricalInterpolation::new(*settings).apply_to_list(&snapshots)?;
                info!("DEIM of {}: {} basis functions", self.name(), interpolation.len());
                let mut basis = self.create_basis_container();
                for q in interpolation.basis().iter() {
                    basis.push(template.with_values(q.as_slice().to_vec())?);
                }
                operators.extend(basis);
                let mut locations = self.create_interpolation_locations_container();
                locations.extend_from_slice(interpolation.magic_points());
                interpolation_locations.push(locations);
                thetas.push(ThetaSource::Tensor {
                    factory: self.clone(),
                    interpolation: Arc::new(interpolation),
                });
            }
        }

        debug_assert_eq!(operators.len(), thetas.iter().map(ThetaSource::len).sum::<usize>());
        let interpolation_method = method.interpolation_name().filter(|_| !interpolation_locations.is_empty());
        Ok(AffineDecomposition {
            operators: AffineExpansionStorage::from_vec(operators),
            thetas,
            interpolation_locations,
            interpolation_method,
        })
    }
}

/// A linear combination of parametrized tensors that is assembled only when needed.
#[derive(Debug, Clone)]
pub enum DeferredTensor<T: Real> {
    Pending {
        terms: Vec<(T, Arc<ParametrizedTensorFactory<T>>)>,
        mu: Parameter<T>,
    },
    Evaluated(TruthTensor<T>),
}

impl<T: Real> DeferredTensor<T> {
    pub fn pending(terms: Vec<(T, Arc<ParametrizedTensorFactory<T>>)>, mu: Parameter<T>) -> Self {
        Self::Pending { terms, mu }
    }

    pub fn is_evaluated(&self) -> bool {
        matches!(self, Self::Evaluated(_))
    }

    /// Assembles the combination if still pending.
    pub fn evaluate(&mut self) -> eyre::Result<&TruthTensor<T>> {
        if let Self::Pending { terms, mu } = self {
            let mut sum: Option<TruthTensor<T>> = None;
            for (coefficient, factory) in terms.iter() {
                let tensor = factory.evaluate(mu)?;
                sum = Some(match sum.take() {
                    None => tensor.scaled(*coefficient),
                    Some(mut sum) => {
                        sum.add_scaled(*coefficient, &tensor)?;
                        sum
                    }
                });
            }
            let tensor = sum.ok_or_else(|| eyre!("cannot evaluate an empty combination of tensors"))?;
            *self = Self::Evaluated(tensor);
        }
        match self {
            Self::Evaluated(tensor) => Ok(tensor),
            Self::Pending { .. } => unreachable!(),
        }
    }

    pub fn into_evaluated(mut self) -> eyre::Result<TruthTensor<T>> {
        self.evaluate()?;
        match self {
            Self::Evaluated(tensor) => Ok(tensor),
            Self::Pending { .. } => unreachable!(),
        }
    }
}
