//! Orthonormalization of new basis functions against an existing basis.
use crate::basis::BasisFunctionsMatrix;
use crate::error::ReductionError;
use crate::functions::FunctionsMatrix;
use crate::util::{from_f64, to_f64};
use crate::{InnerProduct, Real};
use log::debug;
use nalgebra::{DVector, DVectorView};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GramSchmidtSettings {
    /// Candidates whose orthogonalized norm is at most `tolerance` times the norm of the
    /// first basis function are rejected as linearly dependent.
    pub tolerance: f64,
}

impl Default for GramSchmidtSettings {
    fn default() -> Self {
        Self { tolerance: 1e-12 }
    }
}

impl GramSchmidtSettings {
    pub fn with_tolerance(self, tolerance: f64) -> Self {
        Self { tolerance }
    }
}

/// Modified Gram–Schmidt with one round of re-orthogonalization.
#[derive(Debug, Clone)]
pub struct GramSchmidt<P> {
    inner_product: P,
    settings: GramSchmidtSettings,
}

impl<P> GramSchmidt<P> {
    pub fn new(inner_product: P) -> Self {
        Self {
            inner_product,
            settings: GramSchmidtSettings::default(),
        }
    }

    pub fn with_settings(self, settings: GramSchmidtSettings) -> Self {
        Self { settings, ..self }
    }

    pub fn inner_product(&self) -> &P {
        &self.inner_product
    }

    pub fn settings(&self) -> &GramSchmidtSettings {
        &self.settings
    }
}

impl<P> GramSchmidt<P> {
    /// Orthonormalizes `candidate` against the functions of `basis`, visited in increasing
    /// index order.
    ///
    /// The orthogonalization sweep is performed twice. Fails with
    /// [`ReductionError::LinearDependence`] if the remaining norm is below the tolerance, in
    /// which case the candidate should be discarded.
    pub fn apply<T, B>(&self, candidate: &DVector<T>, basis: &B) -> Result<DVector<T>, ReductionError>
    where
        T: Real,
        P: InnerProduct<T>,
        B: ?Sized + FunctionsMatrix<T>,
    {
        if let Some(dim) = basis.truth_dim() {
            crate::error::check_dimension(dim, candidate.len())?;
        }
        let inner = |x: &DVector<T>, y: &DVector<T>| self.inner_product.inner(DVectorView::from(x), DVectorView::from(y));

        let mut v = candidate.clone();
        for _ in 0..2 {
            for k in 0..basis.num_functions() {
                let b = basis.function(k);
                let coefficient = inner(&v, b) / inner(b, b);
                v.axpy(-coefficient, b, T::one());
            }
        }

        let norm = inner(&v, &v).max(T::zero()).sqrt();
        let reference = if basis.num_functions() > 0 {
            self.inner_product.norm(DVectorView::from(basis.function(0)))
        } else {
            T::one()
        };
        let threshold = from_f64::<T>(self.settings.tolerance) * reference;
        debug!(
            "Gram-Schmidt residual norm {:e} (threshold {:e}) against {} functions",
            to_f64(norm),
            to_f64(threshold),
            basis.num_functions()
        );
        if norm <= threshold || norm == T::zero() {
            return Err(ReductionError::LinearDependence {
                norm: to_f64(norm),
                tolerance: to_f64(threshold),
            });
        }
        v.unscale_mut(norm);
        Ok(v)
    }

    /// Orthonormalizes `candidate` against the given component of `basis` and appends it.
    pub fn enrich<T>(
        &self,
        basis: &mut BasisFunctionsMatrix<T>,
        candidate: &DVector<T>,
        component: Option<&str>,
    ) -> Result<(), ReductionError>
    where
        T: Real,
        P: InnerProduct<T>,
    {
        let orthonormalized = self.apply(candidate, basis.component(component)?)?;
        basis.enrich_owned(vec![orthonormalized], component, None)
    }
}
