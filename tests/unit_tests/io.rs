use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;
use rbfe::io::petsc_binary::{
    decode_matrix, decode_vector, encode_matrix, encode_vector, read_matrix, read_vector, write_matrix, write_vector,
    MAT_FILE_CLASSID, VEC_FILE_CLASSID,
};
use rbfe::io::{tensor_load, tensor_save, DenseRecord, DofMap, Permutation, PermutationRegistry, TensorSignature};
use rbfe::parallel::{Communicator, IoProcess};
use rbfe::tensor::TruthTensor;
use std::fs;
use util::mesh::{DofNumbering, UnitSquareMesh};

/// The I/O rank of a process group of the given size, without any other processes.
struct SimulatedRoot {
    size: usize,
}

impl Communicator for SimulatedRoot {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        self.size
    }

    fn broadcast_bytes(&self, _root: usize, _bytes: &mut Vec<u8>) {}

    fn all_reduce_sum(&self, _values: &mut [f64]) {}

    fn barrier(&self) {}
}

fn small_matrix() -> CsrMatrix<f64> {
    let dense = DMatrix::from_row_slice(3, 4, &[1.0, 0.0, 2.5, 0.0, 0.0, 0.0, 0.0, 0.0, -3.0, 1e-8, 0.0, 4.0]);
    CsrMatrix::from(&dense)
}

#[test]
fn petsc_vector_layout_is_big_endian() {
    let vector = DVector::from_vec(vec![1.5, -2.0]);
    let bytes = encode_vector(&vector).unwrap();
    assert_eq!(bytes.len(), 4 + 4 + 2 * 8);
    assert_eq!(&bytes[..4], &VEC_FILE_CLASSID.to_be_bytes());
    assert_eq!(&bytes[4..8], &2i32.to_be_bytes());
    assert_eq!(&bytes[8..16], &1.5f64.to_be_bytes());
    assert_eq!(decode_vector::<f64>(&bytes).unwrap(), vector);
}

#[test]
fn petsc_matrix_round_trip_keeps_the_pattern() {
    let matrix = small_matrix();
    let bytes = encode_matrix(&matrix).unwrap();
    assert_eq!(&bytes[..4], &MAT_FILE_CLASSID.to_be_bytes());
    // Header, row lengths, column indices and values
    assert_eq!(bytes.len(), 16 + 4 * 3 + 4 * 5 + 8 * 5);

    let decoded = decode_matrix::<f64>(&bytes).unwrap();
    assert_eq!(decoded.pattern(), matrix.pattern());
    assert_eq!(decoded.values(), matrix.values());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.dat");
    write_matrix(&path, &matrix).unwrap();
    assert_eq!(read_matrix::<f64>(&path).unwrap(), matrix);
    let path = dir.path().join("f.dat");
    write_vector(&path, &DVector::from_vec(vec![3.0; 4])).unwrap();
    assert_eq!(read_vector::<f64>(&path).unwrap(), DVector::from_vec(vec![3.0; 4]));
}

#[test]
fn corrupt_petsc_data_is_rejected() {
    let vector_bytes = encode_vector(&DVector::from_vec(vec![1.0, 2.0, 3.0])).unwrap();
    assert!(decode_matrix::<f64>(&vector_bytes).is_err());
    assert!(decode_vector::<f64>(&vector_bytes[..vector_bytes.len() - 1]).is_err());

    let mut trailing = vector_bytes.clone();
    trailing.push(0);
    assert!(decode_vector::<f64>(&trailing).is_err());

    let mut bytes = encode_matrix(&small_matrix()).unwrap();
    // The row length of the first row
    bytes[16..20].copy_from_slice(&5i32.to_be_bytes());
    assert!(decode_matrix::<f64>(&bytes).is_err());

    let dir = tempfile::tempdir().unwrap();
    assert!(read_vector::<f64>(&dir.path().join("missing.dat")).is_err());
}

#[test]
fn oversized_petsc_headers_are_rejected_before_reading() {
    let header = |values: &[i32]| values.iter().flat_map(|v| v.to_be_bytes()).collect::<Vec<u8>>();

    let vector = header(&[VEC_FILE_CLASSID, i32::MAX]);
    let err = decode_vector::<f64>(&vector).unwrap_err();
    assert!(err.to_string().contains("announces"), "{}", err);

    let rows = header(&[MAT_FILE_CLASSID, i32::MAX, 3, 0]);
    let err = decode_matrix::<f64>(&rows).unwrap_err();
    assert!(err.to_string().contains("row lengths"), "{}", err);

    // Consistent row lengths, but far fewer entries than announced
    let mut nonzeros = header(&[MAT_FILE_CLASSID, 1, 1, i32::MAX, i32::MAX]);
    nonzeros.extend_from_slice(&[0u8; 12]);
    let err = decode_matrix::<f64>(&nonzeros).unwrap_err();
    assert!(err.to_string().contains("non-zeros"), "{}", err);
}

#[test]
fn dense_records_validate_their_shape() {
    let matrix = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let record = DenseRecord::from_matrix(&matrix);
    assert_eq!((record.nrows, record.ncols), (2, 3));
    assert_eq!(record.values, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    assert_eq!(record.to_matrix::<f64>().unwrap(), matrix);
    assert!(record.to_vector::<f64>().is_err());

    let vector = DVector::from_vec(vec![1.0, -1.0]);
    assert_eq!(DenseRecord::from_vector(&vector).to_vector::<f64>().unwrap(), vector);

    let broken = DenseRecord {
        nrows: 2,
        ncols: 2,
        values: vec![1.0],
    };
    assert!(broken.to_matrix::<f64>().is_err());
}

struct Partitioning {
    numbering: DofNumbering,
    dofs: DofMap,
}

fn partitioning(mesh: &UnitSquareMesh, num_partitions: usize) -> Partitioning {
    let numbering = mesh.dof_numbering(num_partitions);
    let dofs = DofMap::new(mesh.cell_dofs(&numbering));
    Partitioning { numbering, dofs }
}

#[test]
fn dof_maps_identify_dofs_by_cell() {
    let mesh = UnitSquareMesh::new(2);
    let Partitioning { dofs, .. } = partitioning(&mesh, 2);
    assert_eq!(dofs.num_dofs(), 9);
    assert_eq!(dofs.num_cells(), 8);

    let mapping = dofs.writer_mapping();
    assert_eq!(mapping.len(), 9);
    for (dof, &(cell, local)) in mapping.iter().enumerate() {
        assert_eq!(dofs.cell_dofs(cell)[local], dof);
        assert_eq!(dofs.reader_dof(cell, local), Some(dof));
    }
    assert_eq!(dofs.reader_dof(8, 0), None);
    assert_eq!(dofs.reader_dof(0, 3), None);
}

#[test]
fn tensors_reload_under_another_partitioning() {
    let dir = tempfile::tempdir().unwrap();
    let mesh = UnitSquareMesh::new(4);
    let writer = partitioning(&mesh, 1);
    let reader = partitioning(&mesh, 3);
    let f = |x: &nalgebra::Point2<f64>| x.x + 2.0 * x.y;
    let weights = vec![1.0; mesh.num_cells()];

    // Written by the I/O rank of two processes
    let comm = SimulatedRoot { size: 2 };
    let io = IoProcess::new(&comm, 0);
    let signature = TensorSignature::new("poisson", &writer.dofs, &writer.dofs);
    let u = TruthTensor::Vector(mesh.interpolate(&writer.numbering, f));
    tensor_save(&io, &u, &signature, dir.path(), "u").unwrap();
    let a = TruthTensor::Matrix(mesh.assemble_stiffness(&writer.numbering, &weights));
    tensor_save(&io, &a, &signature, dir.path(), "a").unwrap();

    assert_eq!(fs::read_to_string(dir.path().join("u.generator")).unwrap(), "poisson");
    assert_eq!(fs::read_to_string(dir.path().join("u.generator_mpi_size")).unwrap(), "2");
    assert!(dir.path().join(".poisson_2").exists());

    // Read back by a single process with another numbering
    let io = IoProcess::serial();
    let registry = PermutationRegistry::new();
    let signature = TensorSignature::new("poisson", &reader.dofs, &reader.dofs);

    let mut loaded = TruthTensor::Vector(DVector::<f64>::zeros(0));
    assert!(tensor_load(&io, &registry, &mut loaded, &signature, dir.path(), "u").unwrap());
    assert_eq!(loaded, TruthTensor::Vector(mesh.interpolate(&reader.numbering, f)));
    assert!(matches!(registry.get("poisson_2").as_deref(), Some(Permutation::Vector(_))));

    let mut loaded = TruthTensor::Matrix(CsrMatrix::<f64>::zeros(0, 0));
    let fresh = PermutationRegistry::new();
    assert!(tensor_load(&io, &fresh, &mut loaded, &signature, dir.path(), "a").unwrap());
    let expected = mesh.assemble_stiffness(&reader.numbering, &weights);
    assert_matrix_eq!(
        DMatrix::from(loaded.as_matrix().unwrap()),
        DMatrix::from(&expected),
        comp = abs,
        tol = 1e-14
    );
}

#[test]
fn cached_permutations_survive_removal_of_the_mapping() {
    let dir = tempfile::tempdir().unwrap();
    let io = IoProcess::serial();
    let mesh = UnitSquareMesh::new(3);
    let writer = partitioning(&mesh, 2);
    let reader = partitioning(&mesh, 1);

    let signature = TensorSignature::new("load", &writer.dofs, &writer.dofs);
    let u = TruthTensor::Vector(mesh.interpolate(&writer.numbering, |x| x.x * x.y));
    tensor_save(&io, &u, &signature, dir.path(), "u").unwrap();

    let registry = PermutationRegistry::new();
    let signature = TensorSignature::new("load", &reader.dofs, &reader.dofs);
    let mut loaded = TruthTensor::Vector(DVector::<f64>::zeros(0));
    assert!(tensor_load(&io, &registry, &mut loaded, &signature, dir.path(), "u").unwrap());
    assert_eq!(registry.len(), 1);

    fs::remove_file(dir.path().join(".load_1")).unwrap();
    let mut reloaded = TruthTensor::Vector(DVector::<f64>::zeros(0));
    assert!(tensor_load(&io, &registry, &mut reloaded, &signature, dir.path(), "u").unwrap());
    assert_eq!(reloaded, loaded);

    let mut untouched = TruthTensor::Vector(DVector::<f64>::zeros(0));
    assert!(!tensor_load(&io, &PermutationRegistry::new(), &mut untouched, &signature, dir.path(), "u").unwrap());
    assert_eq!(untouched, TruthTensor::Vector(DVector::<f64>::zeros(0)));

    // The cached permutation is for vectors
    let mut matrix = TruthTensor::Matrix(CsrMatrix::<f64>::zeros(0, 0));
    assert!(tensor_load(&io, &registry, &mut matrix, &signature, dir.path(), "u").is_err());

    registry.clear();
    assert!(registry.is_empty());
}

#[test]
fn tensor_load_checks_generator_and_existence() {
    let dir = tempfile::tempdir().unwrap();
    let io = IoProcess::serial();
    let mesh = UnitSquareMesh::new(2);
    let Partitioning { numbering, dofs } = partitioning(&mesh, 1);
    let signature = TensorSignature::new("f", &dofs, &dofs);
    let u = TruthTensor::Vector(mesh.interpolate(&numbering, |x| x.y));
    tensor_save(&io, &u, &signature, dir.path(), "u").unwrap();

    let registry = PermutationRegistry::new();
    let mut loaded = TruthTensor::Vector(DVector::<f64>::zeros(0));
    assert!(!tensor_load(&io, &registry, &mut loaded, &signature, dir.path(), "v").unwrap());

    let other = TensorSignature::new("g", &dofs, &dofs);
    assert!(tensor_load(&io, &registry, &mut loaded, &other, dir.path(), "u").is_err());

    let mut wrong_shape = TruthTensor::Vector(DVector::<f64>::zeros(3));
    assert!(tensor_load(&io, &registry, &mut wrong_shape, &signature, dir.path(), "u").is_err());
}

#[test]
fn registry_inserts_computed_permutations_once() {
    let registry = PermutationRegistry::new();
    let first = registry
        .get_or_try_insert_with("a_1", || Ok(Some(Permutation::Vector(vec![1, 0]))))
        .unwrap()
        .unwrap();
    let second = registry
        .get_or_try_insert_with("a_1", || panic!("cached permutations are not recomputed"))
        .unwrap()
        .unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));

    assert!(registry
        .get_or_try_insert_with("b_1", || Ok(None))
        .unwrap()
        .is_none());
    assert!(registry
        .get_or_try_insert_with("c_1", || Err(eyre::eyre!("unreadable mapping")))
        .is_err());
    assert_eq!(registry.len(), 1);
}
