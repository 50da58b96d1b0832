//! Linear combination of expansions with their thetas.
use crate::error::{check_dimension, ReductionError};
use crate::expansion::{AffineExpansionStorage, ExpansionOperand, ExpansionType, NonAffineExpansionStorage};
use crate::functions::{FunctionsList, FunctionsMatrix};
use crate::parameter::Parameter;
use crate::tensor::{DeferredTensor, TruthTensor};
use crate::Real;
use log::trace;
use nalgebra::{DMatrix, DVector};
use std::sync::Arc;

/// Computes `Σ_i θ_i A_i` for an expansion of order 1, or `Σ_ij θ_i A_ij θ'_j` for an
/// expansion of order 2.
///
/// Terms whose theta is exactly zero are skipped. The first term is always included, so that
/// the result has the shape of the operands even if all thetas vanish.
pub fn product<T, O>(thetas: &[T], operators: &AffineExpansionStorage<O>, thetas2: Option<&[T]>) -> Result<O, ReductionError>
where
    T: Real,
    O: ExpansionOperand<T>,
{
    match (operators.order(), thetas2) {
        (1, None) => product_order1(thetas, operators),
        (2, Some(thetas2)) => product_order2(thetas, operators, thetas2),
        (1, Some(_)) => Err(ReductionError::InvalidArgument(
            "an expansion of order 1 is combined with a single set of thetas".to_string(),
        )),
        (2, None) => Err(ReductionError::InvalidArgument(
            "an expansion of order 2 requires a second set of thetas".to_string(),
        )),
        (order, _) => Err(ReductionError::InvalidOperandCount(order)),
    }
}

fn missing_operand() -> ReductionError {
    ReductionError::InvalidArgument("cannot combine an expansion with unset operands".to_string())
}

/// `Σ_i θ_i A_i`, see [`product`].
pub fn product_order1<T, O>(thetas: &[T], operators: &AffineExpansionStorage<O>) -> Result<O, ReductionError>
where
    T: Real,
    O: ExpansionOperand<T>,
{
    if operators.order() != 1 {
        return Err(ReductionError::InvalidOperandCount(operators.order()));
    }
    check_dimension(operators.len(), thetas.len())?;
    if operators.is_empty() {
        return Err(ReductionError::InvalidArgument("cannot combine an empty expansion".to_string()));
    }
    let mut result = operators.get(0).ok_or_else(missing_operand)?.scaled(thetas[0]);
    for (i, &theta) in thetas.iter().enumerate().skip(1) {
        if theta == T::zero() {
            trace!("Skipping term {} with vanishing theta", i);
            continue;
        }
        result.add_scaled(theta, operators.get(i).ok_or_else(missing_operand)?)?;
    }
    Ok(result)
}

/// `Σ_ij θ_i A_ij θ'_j`, see [`product`].
pub fn product_order2<T, O>(thetas: &[T], operators: &AffineExpansionStorage<O>, thetas2: &[T]) -> Result<O, ReductionError>
where
    T: Real,
    O: ExpansionOperand<T>,
{
    let &[rows, cols] = operators.shape() else {
        return Err(ReductionError::InvalidOperandCount(operators.order()));
    };
    check_dimension(rows, thetas.len())?;
    check_dimension(cols, thetas2.len())?;
    if operators.is_empty() {
        return Err(ReductionError::InvalidArgument("cannot combine an empty expansion".to_string()));
    }
    let mut result = operators
        .get((0, 0))
        .ok_or_else(missing_operand)?
        .scaled(thetas[0] * thetas2[0]);
    for (i, &theta_i) in thetas.iter().enumerate() {
        if theta_i == T::zero() {
            continue;
        }
        for (j, &theta_j) in thetas2.iter().enumerate() {
            if (i, j) == (0, 0) || theta_j == T::zero() {
                continue;
            }
            result.add_scaled(theta_i * theta_j, operators.get((i, j)).ok_or_else(missing_operand)?)?;
        }
    }
    Ok(result)
}

/// The result of combining a non-affine expansion.
#[derive(Debug, Clone, PartialEq)]
pub enum ProductOutput<T: Real> {
    /// An assembled truth tensor, when no basis functions are involved.
    Tensor(TruthTensor<T>),
    /// The functions `A z_j` for a truth matrix `A` and one set of basis functions.
    Functions(FunctionsList<T>),
    Matrix(DMatrix<T>),
    Vector(DVector<T>),
    Scalar(T),
}

impl<T: Real> ProductOutput<T> {
    pub fn into_matrix(self) -> Option<DMatrix<T>> {
        match self {
            Self::Matrix(matrix) => Some(matrix),
            _ => None,
        }
    }

    pub fn into_vector(self) -> Option<DVector<T>> {
        match self {
            Self::Vector(vector) => Some(vector),
            _ => None,
        }
    }

    pub fn into_scalar(self) -> Option<T> {
        match self {
            Self::Scalar(value) => Some(value),
            _ => None,
        }
    }
}

/// Combines a non-affine expansion with its thetas.
///
/// For `operators`, the parametrized truth tensors are combined and assembled at `mu`, and the
/// result is projected onto the given basis functions. For error estimation operators, the two
/// expansions of functions are combined first and their Gram matrix in the inner product is
/// returned as a scalar (`11`), a vector (`21`) or a matrix (`22`).
pub fn product_non_affine<T: Real>(
    thetas: &[T],
    operators: &NonAffineExpansionStorage<T>,
    thetas2: Option<&[T]>,
    mu: &Parameter<T>,
) -> eyre::Result<ProductOutput<T>> {
    match operators {
        NonAffineExpansionStorage::Operators {
            truth_operators,
            basis_functions,
        } => {
            if truth_operators.order() != 1 {
                return Err(ReductionError::InvalidOperandCount(truth_operators.order()).into());
            }
            check_dimension(truth_operators.len(), thetas.len())?;
            let mut terms = Vec::with_capacity(thetas.len());
            for (i, &theta) in thetas.iter().enumerate() {
                if theta != T::zero() || i == 0 {
                    let factory = truth_operators.get(i).ok_or_else(missing_operand)?;
                    terms.push((theta, Arc::clone(factory)));
                }
            }
            let tensor = DeferredTensor::pending(terms, mu.clone()).into_evaluated()?;

            match (basis_functions.as_slice(), tensor) {
                ([], tensor) => Ok(ProductOutput::Tensor(tensor)),
                ([z], TruthTensor::Vector(f)) => Ok(ProductOutput::Vector(z.project_linear(&f)?)),
                ([z], TruthTensor::Matrix(a)) => {
                    let mut functions = FunctionsList::new();
                    for z_j in z.iter() {
                        functions.push(&a * z_j)?;
                    }
                    Ok(ProductOutput::Functions(functions))
                }
                ([z, w], TruthTensor::Matrix(a)) => Ok(ProductOutput::Matrix(z.project_bilinear(&a, w)?)),
                ([_, _], TruthTensor::Vector(_)) => Err(ReductionError::InvalidArgument(
                    "a truth vector cannot be projected onto two sets of basis functions".to_string(),
                )
                .into()),
                (functions, _) => Err(ReductionError::InvalidOperandCount(functions.len()).into()),
            }
        }
        NonAffineExpansionStorage::ErrorEstimationOperators {
            kind,
            delayed_functions: [phi, psi],
            inner_product_matrix,
        } => {
            let thetas2 = thetas2.ok_or_else(|| {
                ReductionError::InvalidArgument(format!("{} requires a second set of thetas", kind))
            })?;
            let phi = product(thetas, phi, None)?;
            let psi = product(thetas2, psi, None)?;
            let gram = phi.gram_matrix(*inner_product_matrix, &psi)?;
            match kind {
                ExpansionType::ErrorEstimationOperators11 => {
                    check_dimension(1, gram.len())?;
                    Ok(ProductOutput::Scalar(gram[(0, 0)]))
                }
                ExpansionType::ErrorEstimationOperators21 => {
                    check_dimension(1, gram.ncols())?;
                    Ok(ProductOutput::Vector(gram.column(0).into_owned()))
                }
                ExpansionType::ErrorEstimationOperators22 => Ok(ProductOutput::Matrix(gram)),
                ExpansionType::Operators => Err(ReductionError::InvalidExpansionType(kind.to_string()).into()),
            }
        }
    }
}
