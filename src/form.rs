//! Parametrized variational forms and their separation into parameter-dependent coefficients
//! and parameter-independent structural forms.
use crate::parameter::Parameter;
use crate::tensor::TruthTensor;
use crate::Real;
use nalgebra::DVector;
use std::fmt;
use std::sync::Arc;

/// Assembly of structural forms into truth tensors, provided by the finite element backend.
pub trait FormAssembler<T: Real> {
    /// Assembles the parameter-independent form with the given name.
    ///
    /// If `field` is given, the integrand is weighted by the coefficient field whose values at
    /// the [`num_field_points`](Self::num_field_points) sample points are stored in `field`.
    fn assemble(&self, form: &str, field: Option<&DVector<T>>) -> eyre::Result<TruthTensor<T>>;

    /// The number of points at which coefficient fields are sampled.
    fn num_field_points(&self) -> usize;
}

pub type ParametricFn<T> = Arc<dyn Fn(&Parameter<T>) -> T + Send + Sync>;
pub type FieldFn<T> = Arc<dyn Fn(&Parameter<T>) -> DVector<T> + Send + Sync>;

/// The coefficient multiplying a structural form.
#[derive(Clone)]
pub enum Coefficient<T> {
    Constant(T),
    /// A scalar function of the parameter, giving an affine term.
    Parametric(ParametricFn<T>),
    /// A spatially varying field depending on the parameter, which requires interpolation to
    /// obtain an affine expansion.
    Field(FieldFn<T>),
}

impl<T: Real> Coefficient<T> {
    pub fn parametric(f: impl Fn(&Parameter<T>) -> T + Send + Sync + 'static) -> Self {
        Self::Parametric(Arc::new(f))
    }

    pub fn field(f: impl Fn(&Parameter<T>) -> DVector<T> + Send + Sync + 'static) -> Self {
        Self::Field(Arc::new(f))
    }

    pub fn is_parametrized(&self) -> bool {
        !matches!(self, Self::Constant(_))
    }
}

impl<T: fmt::Debug> fmt::Debug for Coefficient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            Self::Parametric(_) => f.write_str("Parametric(..)"),
            Self::Field(_) => f.write_str("Field(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FormTerm<T> {
    pub coefficient: Coefficient<T>,
    pub form: String,
}

/// A form `Σ_k c_k(μ) a_k` given as a sum of coefficients times structural forms.
#[derive(Debug, Clone)]
pub struct ParametrizedForm<T> {
    name: String,
    terms: Vec<FormTerm<T>>,
}

impl<T: Real> ParametrizedForm<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            terms: Vec::new(),
        }
    }

    pub fn with_term(mut self, coefficient: Coefficient<T>, form: impl Into<String>) -> Self {
        self.terms.push(FormTerm {
            coefficient,
            form: form.into(),
        });
        self
    }

    pub fn with_constant_term(self, value: T, form: impl Into<String>) -> Self {
        self.with_term(Coefficient::Constant(value), form)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn terms(&self) -> &[FormTerm<T>] {
        &self.terms
    }
}

/// A parametrized form split into its parameter-dependent and parameter-independent parts.
///
/// The parameter-dependent coefficients are replaced by numbered placeholders, which can be
/// substituted one at a time (e.g. by basis functions of an interpolation) with
/// [`replace_placeholders`](Self::replace_placeholders).
#[derive(Debug, Clone)]
pub struct SeparatedParametrizedForm<T> {
    form: ParametrizedForm<T>,
    coefficients: Vec<Coefficient<T>>,
    placeholder_forms: Vec<String>,
    unchanged_forms: Vec<FormTerm<T>>,
}

impl<T: Real> SeparatedParametrizedForm<T> {
    pub fn new(form: ParametrizedForm<T>) -> Self {
        Self {
            form,
            coefficients: Vec::new(),
            placeholder_forms: Vec::new(),
            unchanged_forms: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.form.name()
    }

    pub fn form(&self) -> &ParametrizedForm<T> {
        &self.form
    }

    pub fn is_parametrized(&self) -> bool {
        self.form.terms.iter().any(|term| term.coefficient.is_parametrized())
    }

    /// Splits the terms of the form into parametrized coefficients and unchanged forms.
    ///
    /// Calling `separate` again recomputes the split from scratch.
    pub fn separate(&mut self) {
        self.coefficients.clear();
        self.placeholder_forms.clear();
        self.unchanged_forms.clear();
        for term in &self.form.terms {
            if term.coefficient.is_parametrized() {
                self.coefficients.push(term.coefficient.clone());
                self.placeholder_forms.push(term.form.clone());
            } else {
                self.unchanged_forms.push(term.clone());
            }
        }
    }

    /// The parameter-dependent coefficients, in the order of the terms of the form.
    pub fn coefficients(&self) -> &[Coefficient<T>] {
        &self.coefficients
    }

    /// The terms with constant coefficients.
    pub fn unchanged_forms(&self) -> &[FormTerm<T>] {
        &self.unchanged_forms
    }

    pub fn placeholders_names(&self, i: usize) -> String {
        format!("placeholder_{}", i)
    }

    /// The term of the `i`-th placeholder with its coefficient replaced by `coefficient`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is not smaller than the number of coefficients.
    pub fn replace_placeholders(&self, i: usize, coefficient: Coefficient<T>) -> FormTerm<T> {
        assert!(
            i < self.placeholder_forms.len(),
            "{} does not exist in form {}",
            self.placeholders_names(i),
            self.name()
        );
        FormTerm {
            coefficient,
            form: self.placeholder_forms[i].clone(),
        }
    }
}
