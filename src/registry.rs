//! Lookup of the reduced problem matching a truth problem and a reduction method.
//!
//! Problems and methods have kinds, and kinds may declare parent kinds. A constructor
//! registered for `(problem kind, method kind)` applies to every descendant pair. Among the
//! applicable constructors, the most specific one is chosen: the one whose kinds are closest to
//! the requested kinds in both hierarchies.
use crate::error::ReductionError;
use crate::problem::TruthProblem;
use crate::reduction::{ReducedEllipticProblem, ReducedProblem};
use crate::Real;
use log::debug;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::fmt;

/// Kinds of the problems and reduction methods provided by this crate.
pub mod kinds {
    pub const PARAMETRIZED_PROBLEM: &str = "ParametrizedProblem";
    pub const ELLIPTIC_COERCIVE_PROBLEM: &str = "EllipticCoerciveProblem";

    pub const REDUCTION_METHOD: &str = "ReductionMethod";
    pub const REDUCED_BASIS: &str = "ReducedBasis";
    pub const POD_GALERKIN: &str = "PodGalerkin";
}

/// A set of kinds with their declared parents.
#[derive(Debug, Clone, Default)]
pub struct KindHierarchy {
    parents: FxHashMap<String, Vec<String>>,
}

impl KindHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `kind` with the given parents, replacing a previous declaration.
    pub fn declare(&mut self, kind: impl Into<String>, parents: &[&str]) {
        self.parents
            .insert(kind.into(), parents.iter().map(|p| p.to_string()).collect());
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.parents.contains_key(kind)
    }

    pub fn parents(&self, kind: &str) -> &[String] {
        self.parents.get(kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The number of parent links from `kind` up to `ancestor`, `Some(0)` if they are equal and
    /// `None` if `ancestor` is not an ancestor of `kind`.
    pub fn distance(&self, kind: &str, ancestor: &str) -> Option<usize> {
        let mut queue = VecDeque::from([(kind, 0)]);
        let mut visited = vec![kind];
        while let Some((current, distance)) = queue.pop_front() {
            if current == ancestor {
                return Some(distance);
            }
            for parent in self.parents(current) {
                let parent = parent.as_str();
                if !visited.contains(&parent) {
                    visited.push(parent);
                    queue.push_back((parent, distance + 1));
                }
            }
        }
        None
    }
}

/// Creates the reduced problem of a truth problem.
pub type ReducedProblemConstructor<T> =
    for<'p> fn(&'p dyn TruthProblem<T>) -> eyre::Result<Box<dyn ReducedProblem<T> + 'p>>;

struct Entry<T: Real> {
    problem_kind: String,
    method_kind: String,
    constructor: ReducedProblemConstructor<T>,
}

/// Maps `(problem kind, reduction method kind)` to reduced problem constructors.
///
/// The registry is populated when it is set up and only read afterwards.
pub struct ReducedProblemRegistry<T: Real> {
    problem_kinds: KindHierarchy,
    method_kinds: KindHierarchy,
    entries: Vec<Entry<T>>,
}

impl<T: Real> fmt::Debug for ReducedProblemRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReducedProblemRegistry")
            .field("problem_kinds", &self.problem_kinds)
            .field("method_kinds", &self.method_kinds)
            .field(
                "entries",
                &self
                    .entries
                    .iter()
                    .map(|entry| (&entry.problem_kind, &entry.method_kind))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl<T: Real> Default for ReducedProblemRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn elliptic_reduced_basis<T: Real>(truth: &dyn TruthProblem<T>) -> eyre::Result<Box<dyn ReducedProblem<T> + '_>> {
    Ok(Box::new(ReducedEllipticProblem::new(truth)?))
}

fn elliptic_pod_galerkin<T: Real>(truth: &dyn TruthProblem<T>) -> eyre::Result<Box<dyn ReducedProblem<T> + '_>> {
    Ok(Box::new(ReducedEllipticProblem::new(truth)?.with_error_estimation(false)))
}

impl<T: Real> ReducedProblemRegistry<T> {
    /// An empty registry without any declared kinds.
    pub fn new() -> Self {
        Self {
            problem_kinds: KindHierarchy::new(),
            method_kinds: KindHierarchy::new(),
            entries: Vec::new(),
        }
    }

    /// A registry with the kinds and reduced problems of this crate.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.problem_kinds.declare(kinds::PARAMETRIZED_PROBLEM, &[]);
        registry
            .problem_kinds
            .declare(kinds::ELLIPTIC_COERCIVE_PROBLEM, &[kinds::PARAMETRIZED_PROBLEM]);
        registry.method_kinds.declare(kinds::REDUCTION_METHOD, &[]);
        registry
            .method_kinds
            .declare(kinds::REDUCED_BASIS, &[kinds::REDUCTION_METHOD]);
        registry
            .method_kinds
            .declare(kinds::POD_GALERKIN, &[kinds::REDUCTION_METHOD]);
        registry.register(
            kinds::ELLIPTIC_COERCIVE_PROBLEM,
            kinds::REDUCED_BASIS,
            elliptic_reduced_basis::<T>,
        );
        registry.register(
            kinds::ELLIPTIC_COERCIVE_PROBLEM,
            kinds::POD_GALERKIN,
            elliptic_pod_galerkin::<T>,
        );
        registry
    }

    pub fn problem_kinds(&self) -> &KindHierarchy {
        &self.problem_kinds
    }

    pub fn problem_kinds_mut(&mut self) -> &mut KindHierarchy {
        &mut self.problem_kinds
    }

    pub fn method_kinds(&self) -> &KindHierarchy {
        &self.method_kinds
    }

    pub fn method_kinds_mut(&mut self) -> &mut KindHierarchy {
        &mut self.method_kinds
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers `constructor` for the given kinds, replacing a previous registration of the
    /// same pair.
    pub fn register(
        &mut self,
        problem_kind: impl Into<String>,
        method_kind: impl Into<String>,
        constructor: ReducedProblemConstructor<T>,
    ) {
        let (problem_kind, method_kind) = (problem_kind.into(), method_kind.into());
        self.entries
            .retain(|entry| entry.problem_kind != problem_kind || entry.method_kind != method_kind);
        self.entries.push(Entry {
            problem_kind,
            method_kind,
            constructor,
        });
    }

    /// The most specific constructor applicable to the given kinds.
    ///
    /// Fails if no registered pair applies, or if several applicable pairs are equally specific
    /// and none of them is more specific than the others in both hierarchies.
    pub fn resolve(&self, problem_kind: &str, method_kind: &str) -> Result<ReducedProblemConstructor<T>, ReductionError> {
        let candidates: Vec<(usize, usize, &Entry<T>)> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let problem_distance = self.problem_kinds.distance(problem_kind, &entry.problem_kind)?;
                let method_distance = self.method_kinds.distance(method_kind, &entry.method_kind)?;
                Some((problem_distance, method_distance, entry))
            })
            .collect();

        let dominates = |a: &(usize, usize, &Entry<T>), b: &(usize, usize, &Entry<T>)| {
            a.0 <= b.0 && a.1 <= b.1 && (a.0 < b.0 || a.1 < b.1)
        };
        let minimal: Vec<_> = candidates
            .iter()
            .filter(|candidate| !candidates.iter().any(|other| dominates(other, *candidate)))
            .collect();

        match minimal.as_slice() {
            [] => Err(ReductionError::Configuration(format!(
                "no reduced problem is registered for problem kind {} and reduction method kind {}",
                problem_kind, method_kind
            ))),
            [(problem_distance, method_distance, entry)] => {
                debug!(
                    "Resolved ({}, {}) to ({}, {}) at distances ({}, {})",
                    problem_kind, method_kind, entry.problem_kind, entry.method_kind, problem_distance, method_distance
                );
                Ok(entry.constructor)
            }
            ambiguous => Err(ReductionError::Configuration(format!(
                "reduced problem for problem kind {} and reduction method kind {} is ambiguous between {}",
                problem_kind,
                method_kind,
                ambiguous
                    .iter()
                    .map(|(_, _, entry)| format!("({}, {})", entry.problem_kind, entry.method_kind))
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Creates the reduced problem of `truth` for a reduction method of kind `method_kind`.
    pub fn create<'p>(
        &self,
        truth: &'p dyn TruthProblem<T>,
        method_kind: &str,
    ) -> eyre::Result<Box<dyn ReducedProblem<T> + 'p>> {
        let constructor = self.resolve(truth.kind(), method_kind)?;
        constructor(truth)
    }
}
