//! Delassus diagonal estimation.
//!
//! The bundle scales each constraint's regularization by a scalar estimate
//! `wᵢ` of its block of the Delassus operator `W = J·A⁻¹·Jᵀ`. Only the
//! diagonal blocks are needed:
//!
//! ```text
//! Wᵢᵢ = Σ_c Jᵢc · A_c⁻¹ · Jᵢcᵀ      (sum over the cliques of constraint i)
//! wᵢ  = ‖Wᵢᵢ‖_F / nᵢ               (RMS of the block)
//! ```
//!
//! Each clique's dynamics matrix is factored once with Cholesky.

use nalgebra::{DMatrix, DVector};

use crate::{Result, SapContactProblem, SapError};

/// Estimate the Delassus diagonal of every constraint in `problem`.
///
/// Entry `i` corresponds to constraint `i` in declaration order, which is the
/// layout [`SapConstraintBundle::new`](crate::SapConstraintBundle::new) expects.
pub fn approximate_delassus_diagonal(problem: &SapContactProblem) -> Result<DVector<f64>> {
    let participating = problem.graph().participating_cliques();

    // Only invert cliques some constraint touches.
    let mut inverses: Vec<Option<DMatrix<f64>>> = vec![None; problem.num_cliques()];
    for &clique in participating.participating() {
        let a = &problem.dynamics_matrices()[clique];
        let chol = a
            .clone()
            .cholesky()
            .ok_or(SapError::SingularDynamicsMatrix { clique })?;
        inverses[clique] = Some(chol.inverse());
    }

    let mut diagonal = DVector::zeros(problem.num_constraints());
    for (i, constraint) in problem.constraints().iter().enumerate() {
        let n = constraint.num_constraint_equations();
        let mut w = DMatrix::zeros(n, n);
        for block in constraint.jacobian().blocks() {
            let a_inv = inverses[block.clique]
                .as_ref()
                .ok_or(SapError::InvalidClique {
                    clique: block.clique,
                    num_cliques: problem.num_cliques(),
                })?;
            w += &block.matrix * a_inv * block.matrix.transpose();
        }
        #[allow(clippy::cast_precision_loss)]
        let rms = w.norm() / n as f64;
        diagonal[i] = rms;
    }

    tracing::trace!(
        constraints = problem.num_constraints(),
        cliques = participating.permuted_domain_size(),
        "estimated Delassus diagonal"
    );

    Ok(diagonal)
}
