use rand::rngs::StdRng;
use rand::SeedableRng;
use rbfe::error::ReductionError;
use rbfe::parallel::IoProcess;
use rbfe::parameter::{Parameter, ParameterSet, ParameterSpace};

#[test]
fn parameter_spaces_reject_empty_ranges() {
    let space = ParameterSpace::new(vec![(0.0, 1.0), (-2.0, -2.0)]).unwrap();
    assert_eq!(space.dim(), 2);
    assert!(space.contains(&Parameter::new(vec![0.5, -2.0])));
    assert!(!space.contains(&Parameter::new(vec![1.5, -2.0])));
    assert!(!space.contains(&Parameter::new(vec![0.5])));

    assert!(matches!(
        ParameterSpace::new(vec![(1.0, 0.0)]),
        Err(ReductionError::InvalidArgument(_))
    ));
}

#[test]
fn samples_lie_in_the_space_and_are_reproducible() {
    let space = ParameterSpace::new(vec![(0.1, 10.0), (-1.0, 1.0)]).unwrap();
    let set = space.sample_uniform(50, &mut StdRng::seed_from_u64(1));
    assert_eq!(set.len(), 50);
    assert!(!set.is_weighted());
    assert!(set.iter().all(|mu| space.contains(mu)));
    assert_eq!(set, space.sample_uniform(50, &mut StdRng::seed_from_u64(1)));
    assert_ne!(set, space.sample_uniform(50, &mut StdRng::seed_from_u64(2)));

    assert!(matches!(
        space.sample_log_uniform(5, &mut StdRng::seed_from_u64(1)),
        Err(ReductionError::InvalidArgument(_))
    ));
    let positive = ParameterSpace::new(vec![(0.01, 100.0)]).unwrap();
    let set = positive
        .sample_log_uniform(200, &mut StdRng::seed_from_u64(3))
        .unwrap();
    assert!(set
        .iter()
        .all(|mu| mu[0] >= 0.01 * (1.0 - 1e-12) && mu[0] <= 100.0 * (1.0 + 1e-12)));
    // Log-uniform samples fall below the geometric mean about half of the time
    let below = set.iter().filter(|mu| mu[0] < 1.0).count();
    assert!((60..=140).contains(&below));
}

#[test]
fn weights_default_to_one() {
    let mut set = ParameterSet::new(vec![Parameter::new(vec![1.0]), Parameter::new(vec![2.0])]);
    assert_eq!(set.weight(1), 1.0);

    set.push(Parameter::new(vec![3.0]));
    assert_eq!(set.len(), 3);
    assert!(matches!(
        set.clone().with_weights(vec![1.0]),
        Err(ReductionError::DimensionMismatch { expected: 3, actual: 1 })
    ));

    let mut weighted = set.with_weights(vec![0.5, 0.25, 0.25]).unwrap();
    assert!(weighted.is_weighted());
    assert_eq!(weighted.weight(0), 0.5);
    weighted.push(Parameter::new(vec![4.0]));
    assert_eq!(weighted.weight(3), 1.0);
    assert_eq!(weighted.get(3).map(|mu| mu.as_slice()), Some(&[4.0][..]));
    assert_eq!(weighted.get(4), None);
}

#[test]
fn parameter_sets_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let io = IoProcess::serial();
    let set = ParameterSet::new(vec![Parameter::from(vec![0.5, 1.0]), Parameter::from(vec![-2.0, 8.0])])
        .with_weights(vec![0.75, 0.25])
        .unwrap();

    let mut loaded = ParameterSet::default();
    assert!(!loaded.load(&io, dir.path(), "training_set").unwrap());
    assert!(loaded.is_empty());

    set.save(&io, dir.path(), "training_set").unwrap();
    assert!(loaded.load(&io, dir.path(), "training_set").unwrap());
    assert_eq!(loaded, set);
}
