use crate::common::{thermal_block_problem, training_set, ThermalBlockAssembler};
use nalgebra::DVectorView;
use rbfe::parallel::IoProcess;
use rbfe::problem::TruthProblem;
use rbfe::reduction::{ReducedBasis, ReducedBasisSettings, ReducedEllipticProblem, ReducedProblem, ReductionMethod};
use rbfe::registry::ReducedProblemRegistry;
use rbfe::InnerProduct;

fn settings(folder: &std::path::Path) -> ReducedBasisSettings {
    ReducedBasisSettings::default()
        .with_n_max(6)
        .with_tolerance(1e-12)
        .with_folder(folder)
}

#[test]
fn greedy_error_bounds_hold_on_a_test_set() {
    let dir = tempfile::tempdir().unwrap();
    let io = IoProcess::serial();
    let assembler = ThermalBlockAssembler::new(8, 2, 1);
    let truth = thermal_block_problem(&assembler);

    let mut reduced = ReducedEllipticProblem::new(&truth).unwrap();
    let mut method = ReducedBasis::new(training_set(2, 30, 1), settings(dir.path()));
    let report = method.offline(&io, &mut reduced).unwrap();

    assert!(!report.resumed);
    assert!(report.basis_size >= 3);
    assert_eq!(report.basis_size, reduced.basis().len());
    assert_eq!(report.selected_parameters.len(), report.basis_size);
    assert_eq!(report.selected_parameters.get(0), method.training_set().get(0));
    assert!(report.errors.last().unwrap() < report.errors.first().unwrap());

    // The basis is orthonormal in the inner product
    let x = truth.inner_product();
    for (i, z_i) in reduced.basis().iter().enumerate() {
        for (j, z_j) in reduced.basis().iter().enumerate() {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert!((x.inner(DVectorView::from(z_i), DVectorView::from(z_j)) - expected).abs() <= 1e-10);
        }
    }

    for mu in training_set(2, 10, 2).iter() {
        let u = truth.solve(mu).unwrap();
        for n in 1..=3 {
            let u_n = reduced.solve(mu, Some(n)).unwrap();
            let error = u.clone() - reduced.reconstruct(&u_n).unwrap();
            let true_error = x.norm(DVectorView::from(&error));
            let estimate = reduced.estimate_error(mu, &u_n).unwrap();
            assert!(true_error <= estimate * (1.0 + 1e-8) + 1e-10, "{} > {}", true_error, estimate);
        }
        let u_n = reduced.solve(mu, None).unwrap();
        let error = u.clone() - reduced.reconstruct(&u_n).unwrap();
        assert!(x.norm(DVectorView::from(&error)) <= 1e-3 * x.norm(DVectorView::from(&u)));
    }

    let mu = training_set(2, 1, 3).get(0).unwrap().clone();
    assert!(reduced.solve(&mu, Some(report.basis_size + 1)).is_err());
}

#[test]
fn greedy_resumes_from_saved_data() {
    let dir = tempfile::tempdir().unwrap();
    let io = IoProcess::serial();
    let assembler = ThermalBlockAssembler::new(6, 2, 1);
    let truth = thermal_block_problem(&assembler);
    let registry = ReducedProblemRegistry::with_defaults();
    let mu = training_set(2, 1, 4).get(0).unwrap().clone();

    let mut method = ReducedBasis::new(training_set(2, 20, 5), settings(dir.path()));
    let mut first = registry.create(&truth, method.kind()).unwrap();
    let report = method.offline(&io, first.as_mut()).unwrap();
    let u_first = first.solve(&mu, None).unwrap();

    let mut resumed = registry.create(&truth, method.kind()).unwrap();
    let resumed_report = method.offline(&io, resumed.as_mut()).unwrap();
    assert!(resumed_report.resumed);
    assert_eq!(resumed_report.basis_size, report.basis_size);
    assert_eq!(resumed_report.selected_parameters.len(), report.selected_parameters.len());
    for (loaded, selected) in resumed_report
        .selected_parameters
        .iter()
        .zip(report.selected_parameters.iter())
    {
        assert!(loaded
            .as_slice()
            .iter()
            .zip(selected.as_slice())
            .all(|(a, b)| (a - b).abs() <= 1e-12 * b.abs()));
    }
    let u_resumed = resumed.solve(&mu, None).unwrap();
    assert!((u_first - u_resumed).amax() <= 1e-8);

    // A larger budget continues the greedy from the saved basis
    let mut extended = ReducedBasis::new(
        training_set(2, 20, 5),
        settings(dir.path()).with_n_max(report.basis_size + 1),
    );
    let mut grown = registry.create(&truth, extended.kind()).unwrap();
    let extended_report = extended.offline(&io, grown.as_mut()).unwrap();
    assert!(extended_report.resumed);
    assert!(extended_report.basis_size >= report.basis_size);
    assert!(extended_report.basis_size <= report.basis_size + 1);
}

#[test]
fn greedy_requires_a_training_set() {
    let dir = tempfile::tempdir().unwrap();
    let assembler = ThermalBlockAssembler::new(3, 2, 1);
    let truth = thermal_block_problem(&assembler);
    let mut reduced = ReducedEllipticProblem::new(&truth).unwrap();
    let mut method = ReducedBasis::new(training_set(2, 0, 1), settings(dir.path()));
    assert!(method.offline(&IoProcess::serial(), &mut reduced).is_err());
}
