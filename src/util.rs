use crate::Real;
use nalgebra::{convert, try_convert};

pub(crate) fn to_f64<T: Real>(x: T) -> f64 {
    try_convert(x).unwrap_or(f64::NAN)
}

pub(crate) fn from_f64<T: Real>(x: f64) -> T {
    convert(x)
}

pub(crate) fn vec_to_f64<T: Real>(values: impl IntoIterator<Item = T>) -> Vec<f64> {
    values.into_iter().map(to_f64).collect()
}
