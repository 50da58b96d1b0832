//! A structured P1 triangle mesh of the unit square.
//!
//! The mesh plays the role of the external finite element backend in tests: it assembles
//! cell-wise weighted stiffness, mass and load tensors and can number its degrees of freedom
//! the way a distributed backend with a given number of processes would.
use nalgebra::{DVector, Matrix2, Matrix2x3, Point2};
use nalgebra_sparse::{CooMatrix, CsrMatrix};

#[derive(Debug, Clone)]
pub struct UnitSquareMesh {
    cells_per_dim: usize,
    vertices: Vec<Point2<f64>>,
    cells: Vec<[usize; 3]>,
}

/// Map from mesh vertices to degrees of freedom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DofNumbering {
    vertex_to_dof: Vec<usize>,
}

impl DofNumbering {
    pub fn num_dofs(&self) -> usize {
        self.vertex_to_dof.len()
    }

    pub fn dof(&self, vertex: usize) -> usize {
        self.vertex_to_dof[vertex]
    }
}

impl UnitSquareMesh {
    /// Creates a mesh with `n x n` squares, each split into two triangles.
    pub fn new(n: usize) -> Self {
        assert!(n > 0, "Mesh must have at least one cell per dimension.");
        let h = 1.0 / n as f64;
        let vertex = |i: usize, j: usize| j * (n + 1) + i;

        let mut vertices = Vec::with_capacity((n + 1) * (n + 1));
        for j in 0..=n {
            for i in 0..=n {
                vertices.push(Point2::new(i as f64 * h, j as f64 * h));
            }
        }

        let mut cells = Vec::with_capacity(2 * n * n);
        for j in 0..n {
            for i in 0..n {
                let (v00, v10, v01, v11) = (vertex(i, j), vertex(i + 1, j), vertex(i, j + 1), vertex(i + 1, j + 1));
                cells.push([v00, v10, v11]);
                cells.push([v00, v11, v01]);
            }
        }

        Self {
            cells_per_dim: n,
            vertices,
            cells,
        }
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn vertices(&self) -> &[Point2<f64>] {
        &self.vertices
    }

    pub fn cells(&self) -> &[[usize; 3]] {
        &self.cells
    }

    pub fn cell_centroids(&self) -> Vec<Point2<f64>> {
        self.cells
            .iter()
            .map(|cell| {
                let [a, b, c] = cell.map(|v| self.vertices[v].coords);
                Point2::from((a + b + c) / 3.0)
            })
            .collect()
    }

    /// Dof numbering of a backend that distributes the mesh over `num_partitions` processes.
    ///
    /// Each process owns a contiguous block of vertex rows and numbers its vertices column by
    /// column, so every partition count produces a different global numbering.
    pub fn dof_numbering(&self, num_partitions: usize) -> DofNumbering {
        assert!(num_partitions > 0);
        let n = self.cells_per_dim;
        let num_rows = n + 1;
        let mut vertex_to_dof = vec![usize::MAX; self.num_vertices()];
        let mut next_dof = 0;
        for p in 0..num_partitions {
            let row_begin = p * num_rows / num_partitions;
            let row_end = (p + 1) * num_rows / num_partitions;
            for i in 0..=n {
                for j in row_begin..row_end {
                    vertex_to_dof[j * (n + 1) + i] = next_dof;
                    next_dof += 1;
                }
            }
        }
        debug_assert_eq!(next_dof, self.num_vertices());
        DofNumbering { vertex_to_dof }
    }

    /// The dofs of each cell, in the local vertex order of the cell.
    pub fn cell_dofs(&self, numbering: &DofNumbering) -> Vec<Vec<usize>> {
        self.cells
            .iter()
            .map(|cell| cell.iter().map(|&v| numbering.dof(v)).collect())
            .collect()
    }

    pub fn boundary_dofs(&self, numbering: &DofNumbering) -> Vec<usize> {
        let n = self.cells_per_dim;
        let mut dofs: Vec<_> = (0..self.num_vertices())
            .filter(|&v| {
                let (i, j) = (v % (n + 1), v / (n + 1));
                i == 0 || j == 0 || i == n || j == n
            })
            .map(|v| numbering.dof(v))
            .collect();
        dofs.sort_unstable();
        dofs
    }

    /// Nodal interpolation of `f`.
    pub fn interpolate(&self, numbering: &DofNumbering, f: impl Fn(&Point2<f64>) -> f64) -> DVector<f64> {
        let mut result = DVector::zeros(self.num_vertices());
        for (v, x) in self.vertices.iter().enumerate() {
            result[numbering.dof(v)] = f(x);
        }
        result
    }

    fn cell_geometry(&self, cell: &[usize; 3]) -> (f64, Matrix2x3<f64>) {
        let [a, b, c] = cell.map(|v| self.vertices[v]);
        let jacobian = Matrix2::from_columns(&[b - a, c - a]);
        let area = 0.5 * jacobian.determinant().abs();
        let reference_gradients = Matrix2x3::new(-1.0, 1.0, 0.0, -1.0, 0.0, 1.0);
        // Degenerate cells cannot occur on a structured mesh
        let inverse_transpose = jacobian
            .try_inverse()
            .map(|inv| inv.transpose())
            .unwrap_or_else(Matrix2::zeros);
        (area, inverse_transpose * reference_gradients)
    }

    fn assemble_cellwise(
        &self,
        numbering: &DofNumbering,
        cell_weights: &[f64],
        local_matrix: impl Fn(f64, &Matrix2x3<f64>, usize, usize) -> f64,
    ) -> CsrMatrix<f64> {
        assert_eq!(cell_weights.len(), self.num_cells(), "Need exactly one weight per cell.");
        let n = self.num_vertices();
        let mut coo = CooMatrix::new(n, n);
        for (cell, &weight) in self.cells.iter().zip(cell_weights) {
            let (area, gradients) = self.cell_geometry(cell);
            for (a, &va) in cell.iter().enumerate() {
                for (b, &vb) in cell.iter().enumerate() {
                    let value = weight * local_matrix(area, &gradients, a, b);
                    coo.push(numbering.dof(va), numbering.dof(vb), value);
                }
            }
        }
        CsrMatrix::from(&coo)
    }

    /// Stiffness matrix of `-div(k grad u)` with `k` constant on each cell.
    pub fn assemble_stiffness(&self, numbering: &DofNumbering, cell_weights: &[f64]) -> CsrMatrix<f64> {
        self.assemble_cellwise(numbering, cell_weights, |area, gradients, a, b| {
            area * gradients.column(a).dot(&gradients.column(b))
        })
    }

    pub fn assemble_mass(&self, numbering: &DofNumbering, cell_weights: &[f64]) -> CsrMatrix<f64> {
        self.assemble_cellwise(numbering, cell_weights, |area, _, a, b| {
            if a == b {
                area / 6.0
            } else {
                area / 12.0
            }
        })
    }

    /// Load vector of a source that is constant on each cell.
    pub fn assemble_load(&self, numbering: &DofNumbering, cell_weights: &[f64]) -> DVector<f64> {
        assert_eq!(cell_weights.len(), self.num_cells(), "Need exactly one weight per cell.");
        let mut load = DVector::zeros(self.num_vertices());
        for (cell, &weight) in self.cells.iter().zip(cell_weights) {
            let (area, _) = self.cell_geometry(cell);
            for &v in cell {
                load[numbering.dof(v)] += weight * area / 3.0;
            }
        }
        load
    }
}
