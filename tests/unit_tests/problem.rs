use crate::common::{thermal_block_bilinear_form, thermal_block_linear_form, thermal_block_problem, ThermalBlockAssembler};
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{DMatrix, DVector};
use rbfe::error::ReductionError;
use rbfe::form::FormAssembler;
use rbfe::parameter::{Parameter, ParameterSet};
use rbfe::problem::{
    AffineEllipticProblem, StabilityFactor, TruthProblem, TruthSolverSettings, BILINEAR_TERM, LINEAR_TERM,
};
use rbfe::registry::kinds;
use rbfe::tensor::{DecompositionMethod, ParametrizedTensorFactory};
use std::sync::Arc;

fn interior(values: &DVector<f64>, boundary: &[usize]) -> DVector<f64> {
    let mut values = values.clone();
    for &dof in boundary {
        values[dof] = 0.0;
    }
    values
}

#[test]
fn truth_solutions_satisfy_the_interior_equations() {
    let assembler = ThermalBlockAssembler::new(6, 2, 1);
    let problem = thermal_block_problem(&assembler);
    let boundary = assembler.boundary_dofs();
    let mu = Parameter::new(vec![0.3, 4.0]);

    let u = problem.solve(&mu).unwrap();
    assert!(boundary.iter().all(|&dof| u[dof] == 0.0));

    let a = 0.3 * assembler.dense_matrix("stiffness_0") + 4.0 * assembler.dense_matrix("stiffness_1");
    let f = assembler.vector("load");
    assert_matrix_eq!(interior(&(a * &u), &boundary), interior(&f, &boundary), comp = abs, tol = 1e-10);

    let operator = DMatrix::from(&problem.operator(&mu).unwrap());
    let expected = 0.3 * assembler.dense_matrix("stiffness_0") + 4.0 * assembler.dense_matrix("stiffness_1");
    assert_matrix_eq!(operator, expected, comp = abs, tol = 1e-14);
    assert_matrix_eq!(problem.rhs(&mu).unwrap(), f, comp = abs, tol = 1e-14);
}

#[test]
fn truth_solver_reports_failures() {
    let assembler = ThermalBlockAssembler::new(6, 2, 1);
    let problem = thermal_block_problem(&assembler)
        .with_solver_settings(TruthSolverSettings::default().with_tolerance(1e-14).with_max_iterations(1));
    assert!(problem.solve(&Parameter::new(vec![1.0, 1.0])).is_err());
}

#[test]
fn terms_are_looked_up_by_name() {
    let assembler = ThermalBlockAssembler::new(3, 3, 1);
    let problem = thermal_block_problem(&assembler);
    assert_eq!(problem.name(), "thermal_block");
    assert_eq!(problem.kind(), kinds::ELLIPTIC_COERCIVE_PROBLEM);
    assert_eq!(problem.terms(), &[BILINEAR_TERM, LINEAR_TERM]);
    assert_eq!(problem.num_terms(BILINEAR_TERM), Ok(3));
    assert_eq!(problem.num_terms(LINEAR_TERM), Ok(1));
    assert_eq!(problem.num_terms("m"), Err(ReductionError::InvalidTerm("m".to_string())));
    assert!(problem.assemble_operator("m").is_err());

    let mu = Parameter::new(vec![0.5, 2.0, 7.0]);
    assert_eq!(problem.compute_theta(BILINEAR_TERM, &mu).unwrap(), DVector::from_vec(vec![0.5, 2.0, 7.0]));
    assert_eq!(problem.compute_theta(LINEAR_TERM, &mu).unwrap(), DVector::from_vec(vec![1.0]));
    assert!(problem.compute_theta("m", &mu).is_err());
}

#[test]
fn inconsistent_problems_are_rejected() {
    let assembler = ThermalBlockAssembler::new(3, 2, 1);
    let backend = Arc::new(assembler.clone());
    let empty = ParameterSet::default();
    let f = ParametrizedTensorFactory::new(thermal_block_linear_form(), backend)
        .affine_decomposition(&empty, &DecompositionMethod::Exact)
        .unwrap();
    let x = assembler
        .assemble("stiffness", None)
        .unwrap()
        .as_matrix()
        .cloned()
        .unwrap();

    // The linear form in place of the bilinear one
    assert!(matches!(
        AffineEllipticProblem::new("swapped", f.clone(), f.clone(), x.clone(), vec![]),
        Err(ReductionError::Configuration(_))
    ));

    let n = assembler.num_dofs();
    let a = ParametrizedTensorFactory::new(thermal_block_bilinear_form(2), Arc::new(assembler.clone()))
        .affine_decomposition(&empty, &DecompositionMethod::Exact)
        .unwrap();
    assert!(matches!(
        AffineEllipticProblem::new("out_of_bounds", a, f, x, vec![0, n]),
        Err(ReductionError::IndexOutOfBounds { index, len }) if index == n && len == n
    ));
}

#[test]
fn min_theta_bounds_the_exact_stability_factor() {
    let assembler = ThermalBlockAssembler::new(4, 2, 1);
    let min_theta = thermal_block_problem(&assembler);
    let exact = min_theta
        .clone()
        .with_stability_factor(StabilityFactor::Exact);

    // The inner product is the energy product at μ̄ = (1, 1)
    let mu_bar = Parameter::new(vec![1.0, 1.0]);
    assert_scalar_eq!(exact.stability_factor_lower_bound(&mu_bar).unwrap(), 1.0, comp = abs, tol = 1e-10);
    assert_scalar_eq!(min_theta.stability_factor_lower_bound(&mu_bar).unwrap(), 1.0, comp = abs, tol = 1e-14);

    for mu in [vec![0.5, 4.0], vec![9.0, 0.2], vec![2.0, 3.0]] {
        let mu = Parameter::new(mu);
        let lower = min_theta.stability_factor_lower_bound(&mu).unwrap();
        let alpha = exact.stability_factor_lower_bound(&mu).unwrap();
        assert_scalar_eq!(lower, mu[0].min(mu[1]), comp = abs, tol = 1e-14);
        assert!(lower <= alpha + 1e-10);
        assert!(alpha <= mu[0].max(mu[1]) + 1e-10);
    }
}

#[test]
fn riesz_representers_invert_the_inner_product() {
    let assembler = ThermalBlockAssembler::new(5, 2, 1);
    let problem = thermal_block_problem(&assembler);
    let boundary = assembler.boundary_dofs();
    let g = assembler.vector("load").map(|v| 3.0 * v);

    let r = problem.riesz_representer(&g).unwrap();
    assert!(boundary.iter().all(|&dof| r[dof] == 0.0));
    let x = DMatrix::from(problem.inner_product());
    assert_matrix_eq!(x * &r, interior(&g, &boundary), comp = abs, tol = 1e-10);
    assert_eq!(problem.dirichlet_dofs(), boundary.as_slice());
}
