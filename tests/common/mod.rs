//! Thermal block problems on the unit square, assembled with the P1 mesh of `util`.
#![allow(dead_code)]
use eyre::bail;
use nalgebra::{DMatrix, DVector};
use rbfe::form::{Coefficient, FormAssembler, ParametrizedForm};
use rbfe::io::DofMap;
use rbfe::parameter::{Parameter, ParameterSet, ParameterSpace};
use rbfe::problem::{AffineEllipticProblem, StabilityFactor};
use rbfe::tensor::{DecompositionMethod, ParametrizedTensorFactory, TruthTensor};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use util::mesh::{DofNumbering, UnitSquareMesh};

/// Assembles the forms `stiffness`, `stiffness_<k>` (restricted to the `k`-th vertical strip),
/// `mass` and `load`. Coefficient fields are sampled at cell centroids.
#[derive(Debug, Clone)]
pub struct ThermalBlockAssembler {
    mesh: UnitSquareMesh,
    numbering: DofNumbering,
    cell_blocks: Vec<usize>,
    num_blocks: usize,
}

impl ThermalBlockAssembler {
    pub fn new(cells_per_dim: usize, num_blocks: usize, num_partitions: usize) -> Self {
        let mesh = UnitSquareMesh::new(cells_per_dim);
        let numbering = mesh.dof_numbering(num_partitions);
        let cell_blocks = mesh
            .cell_centroids()
            .iter()
            .map(|x| ((x.x * num_blocks as f64) as usize).min(num_blocks - 1))
            .collect();
        Self {
            mesh,
            numbering,
            cell_blocks,
            num_blocks,
        }
    }

    pub fn mesh(&self) -> &UnitSquareMesh {
        &self.mesh
    }

    pub fn num_dofs(&self) -> usize {
        self.numbering.num_dofs()
    }

    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    pub fn dof_map(&self) -> DofMap {
        DofMap::new(self.mesh.cell_dofs(&self.numbering))
    }

    pub fn boundary_dofs(&self) -> Vec<usize> {
        self.mesh.boundary_dofs(&self.numbering)
    }

    pub fn cell_centroids_x(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.mesh.num_cells(),
            self.mesh.cell_centroids().iter().map(|x| x.x),
        )
    }

    /// The dense matrix of a structural form without coefficient field.
    pub fn dense_matrix(&self, form: &str) -> DMatrix<f64> {
        let tensor = self.assemble(form, None).expect("known form");
        DMatrix::from(tensor.as_matrix().expect("form assembles to a matrix"))
    }

    pub fn vector(&self, form: &str) -> DVector<f64> {
        let tensor = self.assemble(form, None).expect("known form");
        tensor.as_vector().cloned().expect("form assembles to a vector")
    }

    fn cell_weights(&self, field: Option<&DVector<f64>>) -> Vec<f64> {
        field.map_or_else(|| vec![1.0; self.mesh.num_cells()], |f| f.as_slice().to_vec())
    }
}

impl FormAssembler<f64> for ThermalBlockAssembler {
    fn assemble(&self, form: &str, field: Option<&DVector<f64>>) -> eyre::Result<TruthTensor<f64>> {
        let weights = self.cell_weights(field);
        match form {
            "stiffness" => Ok(TruthTensor::Matrix(self.mesh.assemble_stiffness(&self.numbering, &weights))),
            "mass" => Ok(TruthTensor::Matrix(self.mesh.assemble_mass(&self.numbering, &weights))),
            "load" => Ok(TruthTensor::Vector(self.mesh.assemble_load(&self.numbering, &weights))),
            _ => match form.strip_prefix("stiffness_").map(str::parse::<usize>) {
                Some(Ok(block)) if block < self.num_blocks => {
                    let weights: Vec<f64> = weights
                        .iter()
                        .zip(&self.cell_blocks)
                        .map(|(&w, &b)| if b == block { w } else { 0.0 })
                        .collect();
                    Ok(TruthTensor::Matrix(self.mesh.assemble_stiffness(&self.numbering, &weights)))
                }
                _ => bail!("unknown form {}", form),
            },
        }
    }

    fn num_field_points(&self) -> usize {
        self.mesh.num_cells()
    }
}

/// `a(u, v; μ) = Σ_k μ_k ∫_{Ω_k} ∇u·∇v`.
pub fn thermal_block_bilinear_form(num_blocks: usize) -> ParametrizedForm<f64> {
    (0..num_blocks).fold(ParametrizedForm::new("a"), |form, k| {
        form.with_term(Coefficient::parametric(move |mu: &Parameter<f64>| mu[k]), format!("stiffness_{}", k))
    })
}

/// `f(v) = ∫ v`.
pub fn thermal_block_linear_form() -> ParametrizedForm<f64> {
    ParametrizedForm::new("f").with_constant_term(1.0, "load")
}

pub fn thermal_block_space(num_blocks: usize) -> ParameterSpace<f64> {
    ParameterSpace::new(vec![(0.1, 10.0); num_blocks]).expect("valid ranges")
}

pub fn training_set(num_blocks: usize, size: usize, seed: u64) -> ParameterSet<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    thermal_block_space(num_blocks).sample_uniform(size, &mut rng)
}

/// The thermal block problem with homogeneous Dirichlet conditions on the whole boundary and
/// the energy inner product at `μ = (1, ..., 1)`.
pub fn thermal_block_problem(assembler: &ThermalBlockAssembler) -> AffineEllipticProblem<f64> {
    let backend = Arc::new(assembler.clone());
    let empty = ParameterSet::default();
    let a = ParametrizedTensorFactory::new(thermal_block_bilinear_form(assembler.num_blocks()), backend.clone())
        .affine_decomposition(&empty, &DecompositionMethod::Exact)
        .expect("thermal block is affine");
    let f = ParametrizedTensorFactory::new(thermal_block_linear_form(), backend)
        .affine_decomposition(&empty, &DecompositionMethod::Exact)
        .expect("load is affine");
    let inner_product = assembler
        .assemble("stiffness", None)
        .expect("stiffness is known")
        .as_matrix()
        .cloned()
        .expect("stiffness is a matrix");
    let stability_factor = StabilityFactor::MinTheta {
        mu_bar: Parameter::new(vec![1.0; assembler.num_blocks()]),
        alpha_bar: 1.0,
    };
    AffineEllipticProblem::new("thermal_block", a, f, inner_product, assembler.boundary_dofs())
        .expect("consistent thermal block")
        .with_stability_factor(stability_factor)
}
