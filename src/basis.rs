//! The reduced basis `Z`, optionally partitioned into named components.
use crate::error::{check_dimension, ReductionError};
use crate::functions::{FunctionsList, FunctionsMatrix, FunctionsView};
use crate::parallel::IoProcess;
use crate::Real;
use eyre::WrapErr;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::{Index, Range};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static GENERATIONS: AtomicU64 = AtomicU64::new(0);

fn next_generation() -> u64 {
    GENERATIONS.fetch_add(1, Ordering::Relaxed)
}

/// Ordered basis functions of a reduced order model.
///
/// A basis created with [`BasisFunctionsMatrix::with_components`] stores one list per
/// component, and global indices run over the components in declaration order. The pair
/// (component, local index) of a function never changes once assigned.
///
/// Every basis carries a [generation](BasisFunctionsMatrix::generation) that changes whenever
/// existing functions are replaced, so that data projected onto the leading functions can
/// detect that it is stale. Enrichment keeps the generation.
#[derive(Debug, Clone)]
pub struct BasisFunctionsMatrix<T: Real> {
    component_names: Vec<String>,
    components: Vec<FunctionsList<T>>,
    has_components: bool,
    generation: u64,
}

impl<T: Real> PartialEq for BasisFunctionsMatrix<T> {
    fn eq(&self, other: &Self) -> bool {
        self.has_components == other.has_components
            && self.component_names == other.component_names
            && self.components == other.components
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BasisMetadata {
    components: Vec<String>,
    has_components: bool,
}

impl<T: Real> Default for BasisFunctionsMatrix<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Real> BasisFunctionsMatrix<T> {
    /// A basis without component partitioning.
    pub fn new() -> Self {
        Self {
            component_names: vec![String::new()],
            components: vec![FunctionsList::new()],
            has_components: false,
            generation: next_generation(),
        }
    }

    pub fn with_components<S: AsRef<str>>(names: &[S]) -> Result<Self, ReductionError> {
        let component_names: Vec<String> = names.iter().map(|s| s.as_ref().to_string()).collect();
        if component_names.is_empty() {
            return Err(ReductionError::InvalidArgument("a basis needs at least one component".to_string()));
        }
        for (i, name) in component_names.iter().enumerate() {
            if component_names[..i].contains(name) {
                return Err(ReductionError::InvalidArgument(format!("duplicate component \"{}\"", name)));
            }
        }
        let components = component_names.iter().map(|_| FunctionsList::new()).collect();
        Ok(Self {
            component_names,
            components,
            has_components: true,
            generation: next_generation(),
        })
    }

    /// Identifies the current functions of the basis up to enrichment. Two bases with the same
    /// generation agree on their common leading functions.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_components(&self) -> bool {
        self.has_components
    }

    pub fn component_names(&self) -> impl Iterator<Item = &str> {
        self.component_names.iter().map(String::as_str)
    }

    fn component_index(&self, component: Option<&str>) -> Result<usize, ReductionError> {
        match (component, self.has_components) {
            (None, false) => Ok(0),
            (Some(name), true) => self
                .component_names
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| ReductionError::InvalidArgument(format!("unknown component \"{}\"", name))),
            (None, true) if self.components.len() == 1 => Ok(0),
            (None, true) => Err(ReductionError::InvalidArgument(
                "a component is required to enrich a basis with several components".to_string(),
            )),
            (Some(name), false) => Err(ReductionError::InvalidArgument(format!(
                "component \"{}\" given, but the basis has no components",
                name
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.components.iter().map(FunctionsList::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of functions of the given component.
    pub fn component_len(&self, component: Option<&str>) -> Result<usize, ReductionError> {
        Ok(self.components[self.component_index(component)?].len())
    }

    /// Global indices of the functions of the given component.
    pub fn component_range(&self, component: Option<&str>) -> Result<Range<usize>, ReductionError> {
        let c = self.component_index(component)?;
        let start: usize = self.components[..c].iter().map(FunctionsList::len).sum();
        Ok(start..start + self.components[c].len())
    }

    fn check_truth_dim(&self, functions: &[DVector<T>]) -> Result<(), ReductionError> {
        if let (Some(dim), Some(f)) = (self.truth_dim(), functions.first()) {
            check_dimension(dim, f.len())?;
        }
        Ok(())
    }

    /// Appends copies of `functions` to the given component, optionally scaled by `weights`.
    pub fn enrich(
        &mut self,
        functions: &[DVector<T>],
        component: Option<&str>,
        weights: Option<&[T]>,
    ) -> Result<(), ReductionError> {
        let c = self.component_index(component)?;
        self.check_truth_dim(functions)?;
        self.components[c].enrich(functions, weights)
    }

    /// Appends `functions` to the given component without copying them.
    pub fn enrich_owned(
        &mut self,
        functions: Vec<DVector<T>>,
        component: Option<&str>,
        weights: Option<&[T]>,
    ) -> Result<(), ReductionError> {
        let c = self.component_index(component)?;
        self.check_truth_dim(&functions)?;
        self.components[c].enrich_owned(functions, weights)
    }

    pub fn clear(&mut self) {
        for component in &mut self.components {
            component.clear();
        }
        self.generation = next_generation();
    }

    pub fn get(&self, index: usize) -> Option<&DVector<T>> {
        let mut index = index;
        for component in &self.components {
            if index < component.len() {
                return component.get(index);
            }
            index -= component.len();
        }
        None
    }

    pub fn iter(&self) -> impl Iterator<Item = &DVector<T>> {
        self.components.iter().flat_map(|c| c.iter())
    }

    /// A view of the functions with global indices in `range`.
    pub fn slice(&self, range: Range<usize>) -> Result<FunctionsView<T>, ReductionError> {
        if range.end > self.len() || range.start > range.end {
            return Err(ReductionError::IndexOutOfBounds {
                index: range.end,
                len: self.len(),
            });
        }
        Ok(FunctionsView::from_refs(
            self.iter().skip(range.start).take(range.len()).collect(),
        ))
    }

    /// A view of the leading `sizes[c]` functions of every component `c`.
    pub fn slice_components(&self, sizes: &[usize]) -> Result<FunctionsView<T>, ReductionError> {
        check_dimension(self.components.len(), sizes.len())?;
        let mut functions = Vec::with_capacity(sizes.iter().sum());
        for (component, &n) in self.components.iter().zip(sizes) {
            if n > component.len() {
                return Err(ReductionError::IndexOutOfBounds {
                    index: n,
                    len: component.len(),
                });
            }
            functions.extend(component.iter().take(n));
        }
        Ok(FunctionsView::from_refs(functions))
    }

    /// The functions of a single component.
    pub fn component(&self, component: Option<&str>) -> Result<&FunctionsList<T>, ReductionError> {
        Ok(&self.components[self.component_index(component)?])
    }

    fn metadata_path(directory: &Path, filename: &str) -> PathBuf {
        directory.join(format!("{}.basis.json", filename))
    }

    fn component_filename(&self, filename: &str, c: usize) -> String {
        if self.has_components {
            format!("{}_{}", filename, self.component_names[c])
        } else {
            filename.to_string()
        }
    }

    pub fn save(&self, io: &IoProcess, directory: &Path, filename: &str) -> eyre::Result<()> {
        for (c, component) in self.components.iter().enumerate() {
            component.save(io, directory, &self.component_filename(filename, c))?;
        }
        let metadata = BasisMetadata {
            components: self.component_names.clone(),
            has_components: self.has_components,
        };
        let path = Self::metadata_path(directory, filename);
        io.run(|| {
            fs::write(&path, serde_json::to_string_pretty(&metadata)?)
                .wrap_err_with(|| format!("failed to write {}", path.display()))
        })
    }

    /// Loads a previously saved basis.
    ///
    /// Returns `Ok(false)` without modifying the basis if nothing was saved or if the basis is
    /// not empty. Fails if the saved components differ from the components of this basis.
    pub fn load(&mut self, io: &IoProcess, directory: &Path, filename: &str) -> eyre::Result<bool> {
        if !self.is_empty() {
            return Ok(false);
        }
        let path = Self::metadata_path(directory, filename);
        if !io.file_exists(&path)? {
            return Ok(false);
        }
        let metadata: BasisMetadata = io.run(|| {
            let json = fs::read_to_string(&path)?;
            serde_json::from_str(&json).wrap_err_with(|| format!("corrupt basis metadata {}", path.display()))
        })?;
        if metadata.components != self.component_names || metadata.has_components != self.has_components {
            eyre::bail!(
                "saved basis has components {:?}, expected {:?}",
                metadata.components,
                self.component_names
            );
        }

        let mut components = self.components.clone();
        for (c, component) in components.iter_mut().enumerate() {
            let component_filename = self.component_filename(filename, c);
            if !component.load(io, directory, &component_filename)? {
                eyre::bail!("missing component {} of basis {}", self.component_names[c], filename);
            }
        }
        self.components = components;
        self.generation = next_generation();
        Ok(true)
    }
}

impl<T: Real> FunctionsMatrix<T> for BasisFunctionsMatrix<T> {
    fn num_functions(&self) -> usize {
        self.len()
    }

    fn function(&self, index: usize) -> &DVector<T> {
        match self.get(index) {
            Some(f) => f,
            None => panic!("basis function index {} out of bounds for length {}", index, self.len()),
        }
    }

    fn truth_dim(&self) -> Option<usize> {
        self.iter().next().map(|f| f.len())
    }
}

impl<T: Real> Index<usize> for BasisFunctionsMatrix<T> {
    type Output = DVector<T>;

    fn index(&self, index: usize) -> &DVector<T> {
        self.function(index)
    }
}
