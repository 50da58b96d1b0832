use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The degrees of freedom of each cell of a (possibly distributed) discretization.
///
/// A dof is identified independently of the partitioning by the pair (global cell index,
/// local dof of the cell), which allows data written under one partitioning to be read back
/// under another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DofMap {
    cell_dofs: Vec<Vec<usize>>,
    num_dofs: usize,
}

impl DofMap {
    pub fn new(cell_dofs: Vec<Vec<usize>>) -> Self {
        let num_dofs = cell_dofs
            .iter()
            .flat_map(|dofs| dofs.iter())
            .map(|&d| d + 1)
            .max()
            .unwrap_or(0);
        Self { cell_dofs, num_dofs }
    }

    pub fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    pub fn num_cells(&self) -> usize {
        self.cell_dofs.len()
    }

    pub fn cell_dofs(&self, cell: usize) -> &[usize] {
        &self.cell_dofs[cell]
    }

    /// For every dof, the first (global cell, local dof) pair referring to it.
    pub fn writer_mapping(&self) -> Vec<(usize, usize)> {
        let mut mapping = vec![(usize::MAX, usize::MAX); self.num_dofs];
        for (cell, dofs) in self.cell_dofs.iter().enumerate() {
            for (local, &dof) in dofs.iter().enumerate() {
                if mapping[dof].0 == usize::MAX {
                    mapping[dof] = (cell, local);
                }
            }
        }
        mapping
    }

    /// The dof of this map identified by the given (global cell, local dof) pair.
    pub fn reader_dof(&self, cell: usize, local: usize) -> Option<usize> {
        self.cell_dofs.get(cell).and_then(|dofs| dofs.get(local)).copied()
    }
}

/// Maps indices at the time of writing to the indices of the current discretization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permutation {
    Vector(Vec<usize>),
    Matrix { rows: Vec<usize>, cols: Vec<usize> },
}

/// Process-scoped cache of permutations, keyed by the signature `"{generator}_{writer mpi size}"`.
///
/// Entries are only ever added. Concurrent readers are allowed; an entry is inserted
/// atomically once computed.
#[derive(Debug, Default)]
pub struct PermutationRegistry {
    permutations: RwLock<FxHashMap<String, Arc<Permutation>>>,
}

impl PermutationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, signature: &str) -> Option<Arc<Permutation>> {
        self.permutations.read().get(signature).cloned()
    }

    pub fn len(&self) -> usize {
        self.permutations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.permutations.read().is_empty()
    }

    /// Returns the cached permutation, or computes and caches it.
    ///
    /// `compute` returning `Ok(None)` means that the permutation cannot be built, and nothing is
    /// cached.
    pub fn get_or_try_insert_with<F>(&self, signature: &str, compute: F) -> eyre::Result<Option<Arc<Permutation>>>
    where
        F: FnOnce() -> eyre::Result<Option<Permutation>>,
    {
        if let Some(permutation) = self.get(signature) {
            return Ok(Some(permutation));
        }
        let Some(permutation) = compute()? else {
            return Ok(None);
        };
        let mut permutations = self.permutations.write();
        let entry = permutations
            .entry(signature.to_string())
            .or_insert_with(|| Arc::new(permutation));
        Ok(Some(Arc::clone(entry)))
    }

    /// Drops all cached permutations.
    pub fn clear(&self) {
        self.permutations.write().clear();
    }
}
