use crate::common::{thermal_block_problem, ThermalBlockAssembler};
use eyre::bail;
use rbfe::error::ReductionError;
use rbfe::problem::TruthProblem;
use rbfe::reduction::ReducedProblem;
use rbfe::registry::{kinds, KindHierarchy, ReducedProblemRegistry};

fn specific(_: &dyn TruthProblem<f64>) -> eyre::Result<Box<dyn ReducedProblem<f64> + '_>> {
    bail!("specific")
}

fn generic(_: &dyn TruthProblem<f64>) -> eyre::Result<Box<dyn ReducedProblem<f64> + '_>> {
    bail!("generic")
}

/// Which of the marker constructors the registry resolves to.
fn resolved_marker(registry: &ReducedProblemRegistry<f64>, problem_kind: &str, method_kind: &str) -> String {
    let assembler = ThermalBlockAssembler::new(2, 2, 1);
    let problem = thermal_block_problem(&assembler);
    let constructor = registry.resolve(problem_kind, method_kind).unwrap();
    let created = constructor(&problem);
    match created {
        Ok(_) => "none".to_string(),
        Err(err) => err.to_string(),
    }
}

#[test]
fn kind_distances_follow_the_closest_path() {
    let mut hierarchy = KindHierarchy::new();
    hierarchy.declare("Base", &[]);
    hierarchy.declare("Left", &["Base"]);
    hierarchy.declare("Right", &["Base"]);
    hierarchy.declare("Middle", &["Right"]);
    hierarchy.declare("Leaf", &["Left", "Middle"]);

    assert!(hierarchy.contains("Leaf"));
    assert!(!hierarchy.contains("Other"));
    assert_eq!(hierarchy.parents("Leaf"), &["Left".to_string(), "Middle".to_string()]);
    assert!(hierarchy.parents("Other").is_empty());

    assert_eq!(hierarchy.distance("Leaf", "Leaf"), Some(0));
    assert_eq!(hierarchy.distance("Leaf", "Middle"), Some(1));
    assert_eq!(hierarchy.distance("Leaf", "Right"), Some(2));
    assert_eq!(hierarchy.distance("Leaf", "Base"), Some(2));
    assert_eq!(hierarchy.distance("Base", "Leaf"), None);
    assert_eq!(hierarchy.distance("Left", "Right"), None);
}

#[test]
fn default_registry_creates_elliptic_reduced_problems() {
    let registry = ReducedProblemRegistry::<f64>::with_defaults();
    assert_eq!(registry.len(), 2);

    let assembler = ThermalBlockAssembler::new(3, 2, 1);
    let problem = thermal_block_problem(&assembler);
    for method in [kinds::REDUCED_BASIS, kinds::POD_GALERKIN] {
        let reduced = registry.create(&problem, method).unwrap();
        assert_eq!(reduced.name(), "thermal_block");
        assert!(reduced.basis().is_empty());
        assert_eq!(reduced.truth_problem().kind(), kinds::ELLIPTIC_COERCIVE_PROBLEM);
    }

    assert!(matches!(
        registry.resolve(kinds::ELLIPTIC_COERCIVE_PROBLEM, "Unknown"),
        Err(ReductionError::Configuration(_))
    ));
    assert!(matches!(
        registry.resolve(kinds::PARAMETRIZED_PROBLEM, kinds::REDUCED_BASIS),
        Err(ReductionError::Configuration(_))
    ));
}

#[test]
fn descendant_kinds_use_the_most_specific_registration() {
    let mut registry = ReducedProblemRegistry::with_defaults();
    registry
        .method_kinds_mut()
        .declare("WeakGreedy", &[kinds::REDUCED_BASIS]);
    registry
        .problem_kinds_mut()
        .declare("ThermalBlock", &[kinds::ELLIPTIC_COERCIVE_PROBLEM]);
    registry.register(kinds::PARAMETRIZED_PROBLEM, kinds::REDUCTION_METHOD, generic);
    registry.register(kinds::ELLIPTIC_COERCIVE_PROBLEM, kinds::REDUCED_BASIS, specific);
    // Re-registering a pair replaces its constructor
    assert_eq!(registry.len(), 3);

    assert_eq!(resolved_marker(&registry, "ThermalBlock", "WeakGreedy"), "specific");
    assert_eq!(resolved_marker(&registry, kinds::ELLIPTIC_COERCIVE_PROBLEM, kinds::REDUCED_BASIS), "specific");
    assert_eq!(resolved_marker(&registry, kinds::PARAMETRIZED_PROBLEM, kinds::POD_GALERKIN), "generic");
    assert_eq!(resolved_marker(&registry, "ThermalBlock", kinds::POD_GALERKIN), "none");
}

#[test]
fn incomparable_registrations_are_ambiguous() {
    let mut registry = ReducedProblemRegistry::new();
    assert!(registry.is_empty());
    registry.problem_kinds_mut().declare("Problem", &[]);
    registry.problem_kinds_mut().declare("Elliptic", &["Problem"]);
    registry.method_kinds_mut().declare("Method", &[]);
    registry.method_kinds_mut().declare("Greedy", &["Method"]);
    registry.register("Elliptic", "Method", specific);
    registry.register("Problem", "Greedy", generic);

    assert!(matches!(
        registry.resolve("Elliptic", "Greedy"),
        Err(ReductionError::Configuration(message)) if message.contains("ambiguous")
    ));

    // An exact registration dominates both
    registry.register("Elliptic", "Greedy", generic);
    assert_eq!(resolved_marker(&registry, "Elliptic", "Greedy"), "generic");
}
