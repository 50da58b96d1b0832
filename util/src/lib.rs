//! Support code shared by the tests and benchmarks of the `rbfe` workspace.
use nalgebra::DVector;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;

pub mod mesh;

/// Poor man's approx assertion for matrices
#[macro_export]
macro_rules! assert_approx_matrix_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let diff = $x - $y;

        let max_absdiff = diff.abs().max();
        let approx_eq = max_absdiff <= $tol;

        if !approx_eq {
            println!("abstol: {:e}", $tol);
            println!("left: {}", $x);
            println!("right: {}", $y);
            println!("diff: {:e}", diff);
        }
        assert!(approx_eq);
    }};
}

/// Entrywise relative comparison, `|x - y| <= reltol * max(|x|, |y|, 1e-300)`.
#[macro_export]
macro_rules! assert_relative_matrix_eq {
    ($x:expr, $y:expr, reltol = $tol:expr) => {{
        let x = &$x;
        let y = &$y;
        assert_eq!(x.shape(), y.shape(), "Matrices must have the same shape.");
        for (i, (a, b)) in x.iter().zip(y.iter()).enumerate() {
            let scale = a.abs().max(b.abs()).max(1e-300);
            let reldiff = (a - b).abs() / scale;
            if reldiff > $tol {
                panic!(
                    "entry {} differs: left = {:e}, right = {:e}, reldiff = {:e} > {:e}",
                    i, a, b, reldiff, $tol
                );
            }
        }
    }};
}

#[macro_export]
macro_rules! assert_panics {
    ($e:expr) => {{
        use std::panic::catch_unwind;
        use std::stringify;
        let expr_string = stringify!($e);
        let result = catch_unwind(|| $e);
        if result.is_ok() {
            panic!("assert_panics!({}) failed.", expr_string);
        }
    }};
}

/// A random finite element function with dof values uniformly distributed in `[-1, 1]`.
pub fn random_function(num_dofs: usize, rng: &mut StdRng) -> DVector<f64> {
    let distribution = Uniform::new_inclusive(-1.0, 1.0);
    DVector::from_fn(num_dofs, |_, _| distribution.sample(rng))
}

/// `count` random functions drawn from a generator seeded with `seed`.
pub fn random_functions(num_dofs: usize, count: usize, seed: u64) -> Vec<DVector<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| random_function(num_dofs, &mut rng))
        .collect()
}
