//! The constraint bundle.
//!
//! Given a contact problem, the bundle represents the entire set of
//! constraints as a single one. Constraints are re-arranged according to the
//! problem's graph to exploit its structure, and the SAP solver only ever
//! operates on the bundle as a whole, agnostic of the concrete constraint
//! kinds.
//!
//! With `vᵢ`, `yᵢ`, `γᵢ` concatenated in graph order into `vc`, `y`, `γ`:
//!
//! 1. `J` maps generalized velocities to constraint velocities, `vc = J·v`.
//! 2. `R` and `v̂` concatenate the per-constraint regularization and bias;
//!    unprojected impulses are `y = −R⁻¹·(vc − v̂)`.
//! 3. The convex set is the Cartesian product `𝒞 = 𝒞₁ × 𝒞₂ × … × 𝒞ₙ`.
//! 4. The projection `γ = P(y)` is separable: `γ` concatenates the `Pᵢ(yᵢ)`.
//!
//! # Ordering
//!
//! Rows follow the graph's clusters: each cluster is a block row, and rows
//! within it follow the cluster's constraint order. Columns cover the
//! participating cliques only, one block column per clique in the order of
//! [`ContactProblemGraph::participating_cliques`](crate::ContactProblemGraph::participating_cliques).
//! The same constraint order is used for `R`, `R⁻¹`, `v̂` and every vector
//! passed to or returned from the bundle.
//!
//! # Example
//!
//! ```
//! use nalgebra::{DMatrix, DVector};
//! use sim_sap::{
//!     CliqueJacobian, ConstraintJacobian, FrictionConeConstraint, FrictionConeParameters,
//!     SapConstraintBundle, SapContactProblem, approximate_delassus_diagonal,
//! };
//!
//! // A unit point mass resting on the ground.
//! let mut problem =
//!     SapContactProblem::new(0.01, vec![DMatrix::identity(3, 3)], DVector::zeros(3))?;
//! let jacobian = ConstraintJacobian::single(CliqueJacobian::new(0, DMatrix::identity(3, 3)));
//! problem.add_constraint(Box::new(FrictionConeConstraint::new(
//!     jacobian,
//!     0.0,
//!     FrictionConeParameters::default(),
//! )?))?;
//!
//! let w = approximate_delassus_diagonal(&problem)?;
//! let bundle = SapConstraintBundle::new(&problem, &w)?;
//!
//! let vc = bundle.vhat().clone();
//! let mut y = DVector::zeros(bundle.num_constraint_equations());
//! bundle.calc_unprojected_impulses(&vc, &mut y)?;
//!
//! let mut gamma = DVector::zeros(bundle.num_constraint_equations());
//! bundle.project_impulses(&y, &mut gamma, None)?;
//! assert!(gamma.iter().all(|&g| g == 0.0));
//! # Ok::<(), sim_sap::SapError>(())
//! ```

use std::ops::Range;

use nalgebra::{DMatrix, DVector};
use tracing::{debug, trace, warn};

use crate::error::check_size;
use crate::{
    BlockSparseMatrix, BlockSparseMatrixBuilder, BundleConfig, ConstraintCluster,
    PartialPermutation, Result, SapConstraint, SapContactProblem, SapError,
};

/// Jacobian, regularization, bias and projection over all constraints of a
/// problem.
///
/// The bundle borrows the problem and its constraints; the borrow checker
/// guarantees the problem outlives it. All state is computed at
/// construction and read-only afterwards, so a bundle can be shared across
/// threads as long as each caller brings its own output buffers.
#[derive(Debug)]
pub struct SapConstraintBundle<'a> {
    problem: &'a SapContactProblem,
    config: BundleConfig,
    participating_cliques: PartialPermutation,
    /// Maps generalized velocities onto the columns of `j`.
    velocity_permutation: PartialPermutation,
    j: BlockSparseMatrix,
    r: DVector<f64>,
    r_inv: DVector<f64>,
    vhat: DVector<f64>,
    /// Constraints in graph order.
    constraints: Vec<&'a dyn SapConstraint>,
    /// Problem index of each bundle constraint.
    constraint_indices: Vec<usize>,
    /// First equation of each bundle constraint, plus the total at the end.
    equation_offsets: Vec<usize>,
}

impl<'a> SapConstraintBundle<'a> {
    /// Build the bundle for `problem` with the default configuration.
    ///
    /// `delassus_diagonal[i]` is the scaling passed to the regularization of
    /// constraint `i` of the problem (declaration order, not bundle order);
    /// see [`approximate_delassus_diagonal`](crate::approximate_delassus_diagonal).
    pub fn new(problem: &'a SapContactProblem, delassus_diagonal: &DVector<f64>) -> Result<Self> {
        Self::with_config(problem, delassus_diagonal, BundleConfig::default())
    }

    /// Build the bundle for `problem` with an explicit configuration.
    pub fn with_config(
        problem: &'a SapContactProblem,
        delassus_diagonal: &DVector<f64>,
        config: BundleConfig,
    ) -> Result<Self> {
        config.validate()?;
        let nc = problem.num_constraints();
        if delassus_diagonal.len() != nc {
            return Err(SapError::ConstraintCountMismatch {
                expected: nc,
                actual: delassus_diagonal.len(),
            });
        }
        if nc == 0 {
            warn!("building a constraint bundle for a problem without constraints");
        }
        if config.parallel_projection && !cfg!(feature = "parallel") {
            warn!("parallel projection requested without the `parallel` feature, projecting sequentially");
        }

        let graph = problem.graph();
        let j = make_constraint_bundle_jacobian(problem)?;

        let neq = problem.num_constraint_equations();
        let time_step = problem.time_step();
        let mut r = DVector::zeros(neq);
        let mut vhat = DVector::zeros(neq);
        let mut constraints = Vec::with_capacity(nc);
        let mut constraint_indices = Vec::with_capacity(nc);
        let mut equation_offsets = Vec::with_capacity(nc + 1);

        let mut offset = 0;
        for cluster in graph.clusters() {
            for &i in cluster.constraint_indices() {
                let constraint = problem_constraint(problem, i)?;
                let ni = constraint.num_constraint_equations();
                let wi = delassus_diagonal[i];

                let ri = constraint.calc_diagonal_regularization(time_step, wi);
                let vi = constraint.calc_bias_term(time_step, wi);
                check_size("regularization", ni, ri.len())?;
                check_size("bias", ni, vi.len())?;
                for (equation, &value) in ri.iter().enumerate() {
                    if !(value.is_finite() && value > config.min_regularization) {
                        return Err(SapError::NonPositiveRegularization {
                            constraint: i,
                            equation,
                            value,
                        });
                    }
                }

                r.rows_mut(offset, ni).copy_from(&ri);
                vhat.rows_mut(offset, ni).copy_from(&vi);
                constraints.push(constraint);
                constraint_indices.push(i);
                equation_offsets.push(offset);
                offset += ni;
            }
        }
        equation_offsets.push(offset);
        let r_inv = r.map(|ri| 1.0 / ri);

        let participating_cliques = graph.participating_cliques();
        let clique_sizes = (0..problem.num_cliques())
            .map(|c| problem.num_velocities_of(c))
            .collect::<Vec<_>>();
        let velocity_permutation = participating_cliques.expand(&clique_sizes)?;
        check_size("participating velocities", j.cols(), velocity_permutation.permuted_domain_size())?;

        debug!(
            constraints = nc,
            equations = neq,
            clusters = graph.num_clusters(),
            cliques = j.block_cols(),
            blocks = j.num_blocks(),
            "built SAP constraint bundle"
        );

        Ok(Self {
            problem,
            config,
            participating_cliques,
            velocity_permutation,
            j,
            r,
            r_inv,
            vhat,
            constraints,
            constraint_indices,
            equation_offsets,
        })
    }

    /// The problem this bundle was built from.
    #[must_use]
    pub fn problem(&self) -> &'a SapContactProblem {
        self.problem
    }

    /// Configuration used by this bundle.
    #[must_use]
    pub fn config(&self) -> &BundleConfig {
        &self.config
    }

    /// Number of constraints.
    #[must_use]
    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// Number of constraint equations, the number of rows of [`j`](Self::j).
    #[must_use]
    pub fn num_constraint_equations(&self) -> usize {
        self.r.len()
    }

    /// Bundle Jacobian.
    ///
    /// Block rows are the graph's clusters; block columns are the
    /// participating cliques.
    #[must_use]
    pub fn j(&self) -> &BlockSparseMatrix {
        &self.j
    }

    /// Diagonal of the regularization matrix R.
    #[must_use]
    pub fn r(&self) -> &DVector<f64> {
        &self.r
    }

    /// Diagonal of R⁻¹.
    #[must_use]
    pub fn r_inv(&self) -> &DVector<f64> {
        &self.r_inv
    }

    /// Bias v̂.
    #[must_use]
    pub fn vhat(&self) -> &DVector<f64> {
        &self.vhat
    }

    /// Constraints in bundle (graph) order.
    #[must_use]
    pub fn constraints(&self) -> &[&'a dyn SapConstraint] {
        &self.constraints
    }

    /// Problem index of each bundle constraint.
    #[must_use]
    pub fn constraint_indices(&self) -> &[usize] {
        &self.constraint_indices
    }

    /// First equation of each bundle constraint, followed by the total
    /// equation count.
    #[must_use]
    pub fn equation_offsets(&self) -> &[usize] {
        &self.equation_offsets
    }

    /// Equations of bundle constraint `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= num_constraints()`.
    #[must_use]
    pub fn equation_range(&self, i: usize) -> Range<usize> {
        self.equation_offsets[i]..self.equation_offsets[i + 1]
    }

    /// Participating cliques, the block columns of the Jacobian.
    #[must_use]
    pub fn participating_cliques(&self) -> &PartialPermutation {
        &self.participating_cliques
    }

    /// Participating generalized velocities, in Jacobian column order.
    #[must_use]
    pub fn velocity_permutation(&self) -> &PartialPermutation {
        &self.velocity_permutation
    }

    /// Unprojected impulses `y = −R⁻¹·(vc − v̂)`.
    ///
    /// `vc` and `y` must both have `num_constraint_equations()` entries.
    pub fn calc_unprojected_impulses(&self, vc: &DVector<f64>, y: &mut DVector<f64>) -> Result<()> {
        let neq = self.num_constraint_equations();
        check_size("vc", neq, vc.len())?;
        check_size("y", neq, y.len())?;
        for (((yk, vk), vhat_k), r_inv_k) in y
            .iter_mut()
            .zip(vc.iter())
            .zip(self.vhat.iter())
            .zip(self.r_inv.iter())
        {
            *yk = -r_inv_k * (vk - vhat_k);
        }
        Ok(())
    }

    /// Project `y` onto the bundle's convex set, `γ = P(y)`.
    ///
    /// When `dpdy` is given, `dpdy[i]` receives the derivative `dPᵢ/dyᵢ` of
    /// the i-th bundle constraint. `y` and `gamma` must have
    /// `num_constraint_equations()` entries and `dpdy` must have
    /// `num_constraints()` entries.
    ///
    /// Fails with [`SapError::DimensionMismatch`] if a constraint writes a
    /// derivative that is not `nᵢ x nᵢ`.
    pub fn project_impulses(
        &self,
        y: &DVector<f64>,
        gamma: &mut DVector<f64>,
        mut dpdy: Option<&mut [DMatrix<f64>]>,
    ) -> Result<()> {
        self.check_projection_sizes(y, gamma)?;
        if let Some(dpdy) = dpdy.as_deref() {
            check_size("dpdy", self.num_constraints(), dpdy.len())?;
        }
        self.project(y.as_slice(), gamma.as_mut_slice(), dpdy.as_deref_mut());
        match dpdy {
            Some(dpdy) => self.check_derivative_shapes(dpdy),
            None => Ok(()),
        }
    }

    /// Project `y` and compute the Hessian of the regularizer cost
    /// `ℓᵣ = ½·γᵀ·R·γ` with respect to `vc`.
    ///
    /// The Hessian is block diagonal; `g[i]` receives `Gᵢ = dPᵢ/dyᵢ · Rᵢ⁻¹`
    /// for the i-th bundle constraint. `g` must have `num_constraints()`
    /// entries. Derivative shapes are checked as in
    /// [`project_impulses`](Self::project_impulses) before any scaling.
    pub fn project_impulses_and_calc_constraints_hessian(
        &self,
        y: &DVector<f64>,
        gamma: &mut DVector<f64>,
        g: &mut [DMatrix<f64>],
    ) -> Result<()> {
        self.check_projection_sizes(y, gamma)?;
        check_size("g", self.num_constraints(), g.len())?;
        self.project(y.as_slice(), gamma.as_mut_slice(), Some(&mut *g));
        self.check_derivative_shapes(g)?;

        for (i, gi) in g.iter_mut().enumerate() {
            let offset = self.equation_offsets[i];
            for (k, mut column) in gi.column_iter_mut().enumerate() {
                column *= self.r_inv[offset + k];
            }
        }
        Ok(())
    }

    /// Constraint velocities `vc = J·v` for the full generalized velocities `v`
    /// of the problem.
    pub fn calc_constraint_velocities(&self, v: &DVector<f64>) -> Result<DVector<f64>> {
        check_size("v", self.problem.num_velocities(), v.len())?;
        let v_participating = self.velocity_permutation.apply(v)?;
        self.j.mul_vec(&v_participating)
    }

    /// Generalized impulses `Jᵀ·γ`, scattered over all velocities of the
    /// problem. Non-participating cliques receive zeros.
    pub fn calc_generalized_impulses(&self, gamma: &DVector<f64>) -> Result<DVector<f64>> {
        check_size("gamma", self.num_constraint_equations(), gamma.len())?;
        let tau_participating = self.j.mul_transpose_vec(gamma)?;
        let mut tau = DVector::zeros(self.problem.num_velocities());
        self.velocity_permutation
            .apply_transpose(&tau_participating, &mut tau)?;
        Ok(tau)
    }

    /// Every derivative block written by a constraint must be square with one
    /// row per equation of that constraint.
    fn check_derivative_shapes(&self, dpdy: &[DMatrix<f64>]) -> Result<()> {
        for (i, block) in dpdy.iter().enumerate() {
            let n = self.equation_range(i).len();
            if block.shape() != (n, n) {
                let actual = if block.nrows() == n { block.ncols() } else { block.nrows() };
                return Err(SapError::dimension("dpdy", n, actual));
            }
        }
        Ok(())
    }

    fn check_projection_sizes(&self, y: &DVector<f64>, gamma: &DVector<f64>) -> Result<()> {
        let neq = self.num_constraint_equations();
        check_size("y", neq, y.len())?;
        check_size("gamma", neq, gamma.len())
    }

    fn project(&self, y: &[f64], gamma: &mut [f64], dpdy: Option<&mut [DMatrix<f64>]>) {
        #[cfg(feature = "parallel")]
        {
            if self.config.use_parallel(self.num_constraints()) {
                self.project_parallel(y, gamma, dpdy);
                return;
            }
        }
        self.project_sequential(y, gamma, dpdy);
    }

    fn project_sequential(
        &self,
        y: &[f64],
        gamma: &mut [f64],
        mut dpdy: Option<&mut [DMatrix<f64>]>,
    ) {
        let r = self.r.as_slice();
        for (i, constraint) in self.constraints.iter().enumerate() {
            let range = self.equation_range(i);
            constraint.project(
                &y[range.clone()],
                &r[range.clone()],
                &mut gamma[range],
                dpdy.as_deref_mut().map(|d| &mut d[i]),
            );
        }
    }

    #[cfg(feature = "parallel")]
    fn project_parallel(&self, y: &[f64], gamma: &mut [f64], dpdy: Option<&mut [DMatrix<f64>]>) {
        use rayon::prelude::*;

        let r = self.r.as_slice();
        let segments = self.split_per_constraint(gamma);
        trace!(constraints = segments.len(), "projecting impulses in parallel");

        let project_one = |i: usize, gamma_i: &mut [f64], dpdy_i: Option<&mut DMatrix<f64>>| {
            let range = self.equation_range(i);
            self.constraints[i].project(&y[range.clone()], &r[range], gamma_i, dpdy_i);
        };

        match dpdy {
            Some(dpdy) => segments
                .into_par_iter()
                .zip(dpdy.par_iter_mut())
                .enumerate()
                .for_each(|(i, (gamma_i, dpdy_i))| project_one(i, gamma_i, Some(dpdy_i))),
            None => segments
                .into_par_iter()
                .enumerate()
                .for_each(|(i, gamma_i)| project_one(i, gamma_i, None)),
        }
    }

    /// Split `gamma` into one disjoint mutable segment per constraint.
    #[cfg(feature = "parallel")]
    fn split_per_constraint<'g>(&self, mut gamma: &'g mut [f64]) -> Vec<&'g mut [f64]> {
        let mut segments = Vec::with_capacity(self.num_constraints());
        for i in 0..self.num_constraints() {
            let (head, tail) = std::mem::take(&mut gamma).split_at_mut(self.equation_range(i).len());
            segments.push(head);
            gamma = tail;
        }
        segments
    }
}

fn problem_constraint(problem: &SapContactProblem, index: usize) -> Result<&dyn SapConstraint> {
    problem.get_constraint(index).ok_or_else(|| {
        SapError::invalid_parameter(format!(
            "graph references constraint {index}, problem has {}",
            problem.num_constraints()
        ))
    })
}

/// Assemble the bundle Jacobian from the problem graph.
///
/// Block row `r` stacks the Jacobians of cluster `r`'s constraints, in the
/// cluster's order; block column `k` is the k-th participating clique.
fn make_constraint_bundle_jacobian(problem: &SapContactProblem) -> Result<BlockSparseMatrix> {
    let graph = problem.graph();
    let cliques = graph.participating_cliques();
    let num_blocks = graph
        .clusters()
        .iter()
        .map(ConstraintCluster::num_cliques)
        .sum();
    let mut builder =
        BlockSparseMatrixBuilder::new(graph.num_clusters(), cliques.permuted_domain_size(), num_blocks);

    for (block_row, cluster) in graph.clusters().iter().enumerate() {
        let rows = cluster.num_total_constraint_equations();
        for clique in cluster.cliques().members() {
            let nv = problem.num_velocities_of(clique);
            let block_col = cliques.permuted_index(clique).ok_or(SapError::InvalidClique {
                clique,
                num_cliques: problem.num_cliques(),
            })?;

            let mut block = DMatrix::zeros(rows, nv);
            let mut row = 0;
            for &i in cluster.constraint_indices() {
                let constraint = problem_constraint(problem, i)?;
                let ni = constraint.num_constraint_equations();
                let ji = constraint
                    .jacobian()
                    .block_for(clique)
                    .filter(|ji| ji.shape() == (ni, nv))
                    .ok_or_else(|| SapError::JacobianShapeMismatch {
                        clique,
                        expected_rows: ni,
                        expected_cols: nv,
                        rows: constraint.jacobian().block_for(clique).map_or(0, DMatrix::nrows),
                        cols: constraint.jacobian().block_for(clique).map_or(0, DMatrix::ncols),
                    })?;
                block.rows_mut(row, ni).copy_from(ji);
                row += ni;
            }

            trace!(block_row, block_col, rows, cols = nv, "assembled Jacobian block");
            builder.push_block(block_row, block_col, block)?;
        }
    }

    builder.build()
}
