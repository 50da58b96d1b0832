//! Reduced basis model order reduction for parametrized finite element problems.
//!
//! The crate implements the offline/online split of reduced order modelling: truth operators
//! are decomposed into affine expansions `Σ θ_i(μ) A_i`, projected onto a reduced basis
//! built by a greedy algorithm or by POD, and recombined at query time from the small
//! projected operators.
pub mod basis;
pub mod eigen;
pub mod eim;
pub mod error;
pub mod expansion;
pub mod form;
pub mod functions;
pub mod gram_schmidt;
pub mod io;
pub mod parallel;
pub mod parameter;
pub mod pod;
pub mod problem;
pub mod product;
pub mod projection;
pub mod reduction;
pub mod registry;
pub mod tensor;

pub(crate) mod util;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

pub use rbfe_sparse as sparse;
pub use rbfe_traits::{EuclideanInnerProduct, InnerProduct, LinearOperator, Real};
