//! Saving and loading of truth tensors across changes of the partitioning.
//!
//! A tensor `<f>` is stored as
//!
//! - `<f>.dat`: the values in the PETSc binary format, numbered as by the writer,
//! - `<f>.generator`: the name of the form that generated the tensor,
//! - `<f>.generator_mpi_size`: the number of processes of the writer,
//! - `.<generator>_<mpi size>`: the (global cell, cell dof) key of every dof of the writer,
//!   shared by all tensors of the same generator and writer size.
//!
//! On load the keys are matched against the dof map of the reader, which yields a permutation
//! from the writer's to the reader's numbering. Permutations are cached in a
//! [`PermutationRegistry`].
use super::permutation::{DofMap, Permutation, PermutationRegistry};
use super::petsc_binary::{decode_matrix, decode_vector, encode_matrix, encode_vector};
use crate::parallel::IoProcess;
use crate::tensor::TruthTensor;
use crate::Real;
use eyre::{bail, eyre, WrapErr};
use log::debug;
use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Identifies the form a tensor was generated from and the dof maps of its row (test) and
/// column (trial) spaces.
#[derive(Debug, Clone, Copy)]
pub struct TensorSignature<'a> {
    pub generator: &'a str,
    pub test_space: &'a DofMap,
    pub trial_space: &'a DofMap,
}

impl<'a> TensorSignature<'a> {
    pub fn new(generator: &'a str, test_space: &'a DofMap, trial_space: &'a DofMap) -> Self {
        Self {
            generator,
            test_space,
            trial_space,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WriterMapping {
    test: Vec<(usize, usize)>,
    trial: Vec<(usize, usize)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredTensor {
    generator: String,
    mpi_size: usize,
    data: Vec<u8>,
}

fn mapping_path(directory: &Path, generator: &str, mpi_size: usize) -> PathBuf {
    directory.join(format!(".{}_{}", generator, mpi_size))
}

fn with_extension(directory: &Path, filename: &str, extension: &str) -> PathBuf {
    directory.join(format!("{}.{}", filename, extension))
}

pub fn tensor_save<T: Real>(
    io: &IoProcess,
    tensor: &TruthTensor<T>,
    signature: &TensorSignature,
    directory: &Path,
    filename: &str,
) -> eyre::Result<()> {
    let mpi_size = io.communicator().size();
    let data = match tensor {
        TruthTensor::Matrix(matrix) => encode_matrix(matrix)?,
        TruthTensor::Vector(vector) => encode_vector(vector)?,
    };
    let mapping = WriterMapping {
        test: signature.test_space.writer_mapping(),
        trial: signature.trial_space.writer_mapping(),
    };
    io.run(|| {
        fs::create_dir_all(directory)?;
        fs::write(with_extension(directory, filename, "dat"), &data)
            .wrap_err_with(|| format!("failed to write tensor {}", filename))?;
        fs::write(with_extension(directory, filename, "generator"), signature.generator)?;
        fs::write(with_extension(directory, filename, "generator_mpi_size"), mpi_size.to_string())?;
        let path = mapping_path(directory, signature.generator, mpi_size);
        if !path.exists() {
            fs::write(&path, serde_json::to_string(&mapping)?)
                .wrap_err_with(|| format!("failed to write dof mapping {}", path.display()))?;
        }
        Ok(())
    })
}

fn permutation_of(keys: &[(usize, usize)], reader: &DofMap, space: &str) -> eyre::Result<Vec<usize>> {
    keys.iter()
        .enumerate()
        .map(|(dof, &(cell, local))| {
            reader
                .reader_dof(cell, local)
                .ok_or_else(|| eyre!("{} dof {} (cell {}, local dof {}) is unknown to the reader", space, dof, cell, local))
        })
        .collect()
}

/// Loads a tensor saved with [`tensor_save`] into `tensor`, renumbering it into the numbering
/// of the signature's dof maps.
///
/// Returns `Ok(false)` and leaves `tensor` untouched if no tensor was saved under `filename`.
/// The kind of the saved tensor must match the kind of `tensor`, and so must its shape unless
/// `tensor` is empty.
pub fn tensor_load<T: Real>(
    io: &IoProcess,
    registry: &PermutationRegistry,
    tensor: &mut TruthTensor<T>,
    signature: &TensorSignature,
    directory: &Path,
    filename: &str,
) -> eyre::Result<bool> {
    let data_path = with_extension(directory, filename, "dat");
    let generator_path = with_extension(directory, filename, "generator");
    let size_path = with_extension(directory, filename, "generator_mpi_size");
    let exists = io.run(|| Ok(data_path.exists() && generator_path.exists() && size_path.exists()))?;
    if !exists {
        return Ok(false);
    }

    let stored: StoredTensor = io.run(|| {
        let generator = fs::read_to_string(&generator_path)?.trim().to_string();
        let mpi_size = fs::read_to_string(&size_path)?
            .trim()
            .parse()
            .wrap_err_with(|| format!("corrupt {}", size_path.display()))?;
        let data = fs::read(&data_path).wrap_err_with(|| format!("failed to read {}", data_path.display()))?;
        Ok(StoredTensor {
            generator,
            mpi_size,
            data,
        })
    })?;
    if stored.generator != signature.generator {
        bail!(
            "tensor {} was generated by {}, expected {}",
            filename,
            stored.generator,
            signature.generator
        );
    }

    let key = format!("{}_{}", stored.generator, stored.mpi_size);
    let cached = registry.get(&key).is_some();
    let permutation = registry.get_or_try_insert_with(&key, || {
        let path = mapping_path(directory, &stored.generator, stored.mpi_size);
        if !io.file_exists(&path)? {
            return Ok(None);
        }
        let mapping: WriterMapping = io.run(|| {
            let json = fs::read_to_string(&path)?;
            serde_json::from_str(&json).wrap_err_with(|| format!("corrupt dof mapping {}", path.display()))
        })?;
        let rows = permutation_of(&mapping.test, signature.test_space, "test")?;
        Ok(Some(match &*tensor {
            TruthTensor::Vector(_) => Permutation::Vector(rows),
            TruthTensor::Matrix(_) => Permutation::Matrix {
                rows,
                cols: permutation_of(&mapping.trial, signature.trial_space, "trial")?,
            },
        }))
    })?;
    let Some(permutation) = permutation else {
        return Ok(false);
    };
    debug!(
        "Loading tensor {} with permutation {} ({})",
        filename,
        key,
        if cached { "cached" } else { "new" }
    );

    let loaded = match (&*tensor, permutation.as_ref()) {
        (TruthTensor::Vector(_), Permutation::Vector(rows)) => {
            let values = decode_vector::<T>(&stored.data)?;
            if values.len() != rows.len() {
                bail!("tensor {} has {} entries, but the dof mapping has {}", filename, values.len(), rows.len());
            }
            let mut vector = DVector::zeros(signature.test_space.num_dofs());
            for (&i, &v) in rows.iter().zip(values.iter()) {
                vector[i] = v;
            }
            TruthTensor::Vector(vector)
        }
        (TruthTensor::Matrix(_), Permutation::Matrix { rows, cols }) => {
            let matrix = decode_matrix::<T>(&stored.data)?;
            if matrix.nrows() != rows.len() || matrix.ncols() != cols.len() {
                bail!(
                    "tensor {} has shape {}x{}, but the dof mapping has shape {}x{}",
                    filename,
                    matrix.nrows(),
                    matrix.ncols(),
                    rows.len(),
                    cols.len()
                );
            }
            let mut coo = CooMatrix::new(signature.test_space.num_dofs(), signature.trial_space.num_dofs());
            for (i, j, &v) in matrix.triplet_iter() {
                coo.push(rows[i], cols[j], v);
            }
            TruthTensor::Matrix(CsrMatrix::from(&coo))
        }
        (current, _) => bail!(
            "tensor {} cannot be loaded into a truth {} with the cached permutation {}",
            filename,
            current.kind_name(),
            key
        ),
    };

    let expected = tensor.shape();
    if expected != (0, 0) && expected != (0, 1) && expected != loaded.shape() {
        bail!(
            "tensor {} has shape {:?}, expected {:?}",
            filename,
            loaded.shape(),
            expected
        );
    }
    *tensor = loaded;
    Ok(true)
}
