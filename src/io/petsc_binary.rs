//! Reading and writing of truth tensors in the PETSc binary format.
//!
//! All integers are 32-bit and all values 64-bit floats, stored big-endian. Values are written
//! in the global numbering of the writing process group.
use crate::util::{from_f64, to_f64};
use crate::Real;
use eyre::{bail, eyre, WrapErr};
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

pub const VEC_FILE_CLASSID: i32 = 1211214;
pub const MAT_FILE_CLASSID: i32 = 1211216;

fn push_index(bytes: &mut Vec<u8>, value: usize) -> eyre::Result<()> {
    let value = i32::try_from(value).wrap_err("index does not fit into a 32-bit PETSc integer")?;
    bytes.extend_from_slice(&value.to_be_bytes());
    Ok(())
}

fn push_value<T: Real>(bytes: &mut Vec<u8>, value: T) {
    bytes.extend_from_slice(&to_f64(value).to_be_bytes());
}

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> eyre::Result<[u8; N]> {
        let end = self.position + N;
        let chunk = self
            .bytes
            .get(self.position..end)
            .ok_or_else(|| eyre!("unexpected end of PETSc binary data at byte {}", self.position))?;
        self.position = end;
        let mut array = [0u8; N];
        array.copy_from_slice(chunk);
        Ok(array)
    }

    fn read_i32(&mut self) -> eyre::Result<i32> {
        Ok(i32::from_be_bytes(self.take()?))
    }

    fn read_index(&mut self) -> eyre::Result<usize> {
        let value = self.read_i32()?;
        usize::try_from(value).map_err(|_| eyre!("negative index {} in PETSc binary data", value))
    }

    fn read_value<T: Real>(&mut self) -> eyre::Result<T> {
        Ok(from_f64(f64::from_be_bytes(self.take()?)))
    }

    /// Fails unless at least `count` items of `item_size` bytes remain.
    fn expect_remaining(&self, count: usize, item_size: usize, what: &str) -> eyre::Result<()> {
        let remaining = self.bytes.len() - self.position;
        match count.checked_mul(item_size) {
            Some(needed) if needed <= remaining => Ok(()),
            _ => bail!(
                "PETSc header announces {} {}, but only {} bytes of data remain",
                count,
                what,
                remaining
            ),
        }
    }

    fn expect_classid(&mut self, classid: i32) -> eyre::Result<()> {
        let found = self.read_i32()?;
        if found != classid {
            bail!("expected PETSc class id {}, found {}", classid, found);
        }
        Ok(())
    }

    fn finish(&self) -> eyre::Result<()> {
        if self.position != self.bytes.len() {
            bail!(
                "trailing data in PETSc binary file ({} of {} bytes consumed)",
                self.position,
                self.bytes.len()
            );
        }
        Ok(())
    }
}

pub fn encode_vector<T: Real>(vector: &DVector<T>) -> eyre::Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(8 + 8 * vector.len());
    bytes.extend_from_slice(&VEC_FILE_CLASSID.to_be_bytes());
    push_index(&mut bytes, vector.len())?;
    for &v in vector.iter() {
        push_value(&mut bytes, v);
    }
    Ok(bytes)
}

pub fn decode_vector<T: Real>(bytes: &[u8]) -> eyre::Result<DVector<T>> {
    let mut reader = Reader { bytes, position: 0 };
    reader.expect_classid(VEC_FILE_CLASSID)?;
    let n = reader.read_index()?;
    reader.expect_remaining(n, 8, "vector entries")?;
    let values = (0..n)
        .map(|_| reader.read_value())
        .collect::<eyre::Result<Vec<T>>>()?;
    reader.finish()?;
    Ok(DVector::from_vec(values))
}

pub fn encode_matrix<T: Real>(matrix: &CsrMatrix<T>) -> eyre::Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(16 + 4 * matrix.nrows() + 12 * matrix.nnz());
    bytes.extend_from_slice(&MAT_FILE_CLASSID.to_be_bytes());
    push_index(&mut bytes, matrix.nrows())?;
    push_index(&mut bytes, matrix.ncols())?;
    push_index(&mut bytes, matrix.nnz())?;
    for row in matrix.row_iter() {
        push_index(&mut bytes, row.nnz())?;
    }
    for &col in matrix.col_indices() {
        push_index(&mut bytes, col)?;
    }
    for &v in matrix.values() {
        push_value(&mut bytes, v);
    }
    Ok(bytes)
}

pub fn decode_matrix<T: Real>(bytes: &[u8]) -> eyre::Result<CsrMatrix<T>> {
    let mut reader = Reader { bytes, position: 0 };
    reader.expect_classid(MAT_FILE_CLASSID)?;
    let nrows = reader.read_index()?;
    let ncols = reader.read_index()?;
    let nnz = reader.read_index()?;
    reader.expect_remaining(nrows, 4, "row lengths")?;

    let mut row_offsets = Vec::with_capacity(nrows + 1);
    row_offsets.push(0);
    for _ in 0..nrows {
        let row_nnz = reader.read_index()?;
        let last = *row_offsets.last().unwrap_or(&0);
        row_offsets.push(last + row_nnz);
    }
    if row_offsets.last() != Some(&nnz) {
        bail!("row lengths of PETSc matrix do not sum to the number of non-zeros {}", nnz);
    }
    reader.expect_remaining(nnz, 12, "non-zeros")?;
    let col_indices = (0..nnz)
        .map(|_| reader.read_index())
        .collect::<eyre::Result<Vec<_>>>()?;
    let values = (0..nnz)
        .map(|_| reader.read_value())
        .collect::<eyre::Result<Vec<T>>>()?;
    reader.finish()?;

    CsrMatrix::try_from_csr_data(nrows, ncols, row_offsets, col_indices, values)
        .map_err(|err| eyre!("invalid CSR data in PETSc matrix: {}", err))
}

fn write_bytes(path: &Path, bytes: &[u8]) -> eyre::Result<()> {
    let file = fs::File::create(path).wrap_err_with(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(bytes)?;
    writer.flush()?;
    Ok(())
}

pub fn write_vector<T: Real>(path: &Path, vector: &DVector<T>) -> eyre::Result<()> {
    write_bytes(path, &encode_vector(vector)?)
}

pub fn read_vector<T: Real>(path: &Path) -> eyre::Result<DVector<T>> {
    let bytes = fs::read(path).wrap_err_with(|| format!("failed to read {}", path.display()))?;
    decode_vector(&bytes).wrap_err_with(|| format!("corrupt PETSc vector {}", path.display()))
}

pub fn write_matrix<T: Real>(path: &Path, matrix: &CsrMatrix<T>) -> eyre::Result<()> {
    write_bytes(path, &encode_matrix(matrix)?)
}

pub fn read_matrix<T: Real>(path: &Path) -> eyre::Result<CsrMatrix<T>> {
    let bytes = fs::read(path).wrap_err_with(|| format!("failed to read {}", path.display()))?;
    decode_matrix(&bytes).wrap_err_with(|| format!("corrupt PETSc matrix {}", path.display()))
}
