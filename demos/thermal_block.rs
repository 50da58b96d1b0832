//! Reduced basis approximation of a thermal block with a moving heat source.
//!
//! The unit square is split into three vertical strips with conductivities `μ_0, μ_1, μ_2`.
//! The source is a Gaussian centered at `x = μ_3`, which is not affine in the parameter and
//! is interpolated with EIM before the greedy runs.
use eyre::bail;
use nalgebra::{DVector, DVectorView};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rbfe::eim::EimSettings;
use rbfe::form::{Coefficient, FormAssembler, ParametrizedForm};
use rbfe::parallel::IoProcess;
use rbfe::parameter::{Parameter, ParameterSpace};
use rbfe::problem::{AffineEllipticProblem, StabilityFactor, TruthProblem};
use rbfe::reduction::{ReducedBasis, ReducedBasisSettings, ReductionMethod};
use rbfe::registry::ReducedProblemRegistry;
use rbfe::tensor::{DecompositionMethod, ParametrizedTensorFactory, TruthTensor};
use rbfe::InnerProduct;
use std::sync::Arc;
use util::mesh::{DofNumbering, UnitSquareMesh};

const NUM_STRIPS: usize = 3;

struct StripAssembler {
    mesh: UnitSquareMesh,
    numbering: DofNumbering,
    strips: Vec<usize>,
}

impl StripAssembler {
    fn new(cells_per_dim: usize) -> Self {
        let mesh = UnitSquareMesh::new(cells_per_dim);
        let numbering = mesh.dof_numbering(1);
        let strips = mesh
            .cell_centroids()
            .iter()
            .map(|x| ((x.x * NUM_STRIPS as f64) as usize).min(NUM_STRIPS - 1))
            .collect();
        Self {
            mesh,
            numbering,
            strips,
        }
    }
}

impl FormAssembler<f64> for StripAssembler {
    fn assemble(&self, form: &str, field: Option<&DVector<f64>>) -> eyre::Result<TruthTensor<f64>> {
        let weights = field.map_or_else(|| vec![1.0; self.mesh.num_cells()], |f| f.as_slice().to_vec());
        match form {
            "stiffness" => Ok(TruthTensor::Matrix(self.mesh.assemble_stiffness(&self.numbering, &weights))),
            "source" => Ok(TruthTensor::Vector(self.mesh.assemble_load(&self.numbering, &weights))),
            _ => match form.strip_prefix("stiffness_").map(str::parse::<usize>) {
                Some(Ok(strip)) if strip < NUM_STRIPS => {
                    let weights: Vec<f64> = weights
                        .iter()
                        .zip(&self.strips)
                        .map(|(&w, &s)| if s == strip { w } else { 0.0 })
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

fn main() -> eyre::Result<()> {
    let assembler = Arc::new(StripAssembler::new(32));
    let space = ParameterSpace::new(vec![(0.1, 10.0), (0.1, 10.0), (0.1, 10.0), (0.2, 0.8)])?;
    let mut rng = StdRng::seed_from_u64(0);
    let training_set = space.sample_uniform(100, &mut rng);
    let testing_set = space.sample_uniform(10, &mut rng);

    let a = (0..NUM_STRIPS).fold(ParametrizedForm::new("a"), |form, k| {
        form.with_term(Coefficient::parametric(move |mu: &Parameter<f64>| mu[k]), format!("stiffness_{k}"))
    });
    let centroids_x = DVector::from_iterator(
        assembler.mesh.num_cells(),
        assembler.mesh.cell_centroids().iter().map(|x| x.x),
    );
    let f = ParametrizedForm::new("f").with_term(
        Coefficient::field(move |mu: &Parameter<f64>| centroids_x.map(|x| (-50.0 * (x - mu[3]).powi(2)).exp())),
        "source",
    );

    let a = ParametrizedTensorFactory::new(a, assembler.clone())
        .affine_decomposition(&training_set, &DecompositionMethod::Exact)?;
    let eim = EimSettings::default().with_n_max(30).with_tolerance(1e-8);
    let f = ParametrizedTensorFactory::new(f, assembler.clone())
        .affine_decomposition(&training_set, &DecompositionMethod::Eim(eim))?;
    println!("Source interpolated with {} terms", f.num_terms());

    let inner_product = assembler
        .assemble("stiffness", None)?
        .as_matrix()
        .cloned()
        .ok_or_else(|| eyre::eyre!("stiffness must be a matrix"))?;
    let boundary = assembler.mesh.boundary_dofs(&assembler.numbering);
    let truth = AffineEllipticProblem::new("thermal_block", a, f, inner_product, boundary)?.with_stability_factor(
        StabilityFactor::MinTheta {
            mu_bar: Parameter::new(vec![1.0, 1.0, 1.0, 0.5]),
            alpha_bar: 1.0,
        },
    );

    let io = IoProcess::serial();
    let settings = ReducedBasisSettings::default()
        .with_n_max(20)
        .with_tolerance(1e-5)
        .with_folder("data/demos/thermal_block");
    let mut method = ReducedBasis::new(training_set, settings);
    let registry = ReducedProblemRegistry::with_defaults();
    let mut reduced = registry.create(&truth, method.kind())?;
    let report = method.offline(&io, reduced.as_mut())?;
    if report.resumed {
        println!("Resumed from data/demos/thermal_block");
    }
    let first_n = report.basis_size + 1 - report.errors.len();
    for (n, error) in report.errors.iter().enumerate() {
        println!("N = {:2}: max error estimate {:e}", first_n + n, error);
    }

    let x = truth.inner_product();
    for mu in testing_set.iter() {
        let u = truth.solve(mu)?;
        let u_n = reduced.solve(mu, None)?;
        let error = &u - reduced.reconstruct(&u_n)?;
        let estimate = reduced.estimate_error(mu, &u_n)?;
        println!(
            "μ = {:.3?}: relative error {:.3e}, estimate {:.3e}",
            mu.as_slice(),
            x.norm(DVectorView::from(&error)) / x.norm(DVectorView::from(&u)),
            estimate / x.norm(DVectorView::from(&u))
        );
    }

    Ok(())
}
