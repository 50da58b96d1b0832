//! Sparse linear algebra used by the truth level of `rbfe`.
pub mod cg;
pub mod csr;

pub use nalgebra_sparse::{CooMatrix, CsrMatrix};
pub use rbfe_traits::{IdentityOperator, LinearOperator};
