//! The constraint capability interface consumed by the bundle.
//!
//! The i-th SAP constraint is defined by:
//!
//! 1. A Jacobian `Jᵢ` mapping generalized velocities to constraint
//!    velocities, `vᵢ = Jᵢ·v`, given per clique the constraint acts on.
//! 2. A diagonal regularization `Rᵢ` and a bias `v̂ᵢ`, both computed from a
//!    scalar estimate `wᵢ` of the constraint's Delassus operator.
//! 3. A convex set `𝒞ᵢ` and the projection `γᵢ = Pᵢ(yᵢ)` onto it, taken in
//!    the norm weighted by `Rᵢ`.
//!
//! The bundle never needs to know which concrete kind of constraint it is
//! handling; everything goes through [`SapConstraint`].

use std::fmt::Debug;

use nalgebra::{DMatrix, DVector};

use crate::{CliquePair, Result, SapError};

/// Jacobian block of a constraint with respect to one clique.
#[derive(Debug, Clone, PartialEq)]
pub struct CliqueJacobian {
    /// Clique the block acts on.
    pub clique: usize,
    /// Block of size `num_equations x clique_velocities`.
    pub matrix: DMatrix<f64>,
}

impl CliqueJacobian {
    /// Create a new block.
    #[must_use]
    pub fn new(clique: usize, matrix: DMatrix<f64>) -> Self {
        Self { clique, matrix }
    }
}

/// Jacobian of a constraint, split per clique.
///
/// A constraint acts on one or two distinct cliques.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintJacobian {
    first: CliqueJacobian,
    second: Option<CliqueJacobian>,
}

impl ConstraintJacobian {
    /// Jacobian of a constraint acting on a single clique.
    #[must_use]
    pub fn single(first: CliqueJacobian) -> Self {
        Self {
            first,
            second: None,
        }
    }

    /// Jacobian of a constraint acting on two distinct cliques.
    ///
    /// Both blocks must have the same number of rows.
    pub fn pair(first: CliqueJacobian, second: CliqueJacobian) -> Result<Self> {
        if first.clique == second.clique {
            return Err(SapError::invalid_parameter(format!(
                "both Jacobian blocks act on clique {}",
                first.clique
            )));
        }
        if first.matrix.nrows() != second.matrix.nrows() {
            return Err(SapError::JacobianShapeMismatch {
                clique: second.clique,
                expected_rows: first.matrix.nrows(),
                expected_cols: second.matrix.ncols(),
                rows: second.matrix.nrows(),
                cols: second.matrix.ncols(),
            });
        }
        Ok(Self {
            first,
            second: Some(second),
        })
    }

    /// Block of the first clique.
    #[must_use]
    pub fn first(&self) -> &CliqueJacobian {
        &self.first
    }

    /// Block of the second clique, if any.
    #[must_use]
    pub fn second(&self) -> Option<&CliqueJacobian> {
        self.second.as_ref()
    }

    /// Number of cliques (1 or 2).
    #[must_use]
    pub fn num_cliques(&self) -> usize {
        1 + usize::from(self.second.is_some())
    }

    /// Number of rows shared by all blocks.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.first.matrix.nrows()
    }

    /// Clique pair this Jacobian acts on.
    #[must_use]
    pub fn cliques(&self) -> CliquePair {
        match &self.second {
            Some(second) => CliquePair::new(self.first.clique, second.clique),
            None => CliquePair::single(self.first.clique),
        }
    }

    /// Blocks in declaration order.
    pub fn blocks(&self) -> impl Iterator<Item = &CliqueJacobian> {
        std::iter::once(&self.first).chain(self.second.as_ref())
    }

    /// Block acting on `clique`, if the constraint touches it.
    #[must_use]
    pub fn block_for(&self, clique: usize) -> Option<&DMatrix<f64>> {
        self.blocks()
            .find(|b| b.clique == clique)
            .map(|b| &b.matrix)
    }
}

/// A constraint as seen by the SAP formulation.
///
/// Implementations are immutable once added to a
/// [`SapContactProblem`](crate::SapContactProblem) and must be safe to share
/// across threads, since bundles may be evaluated concurrently.
pub trait SapConstraint: Debug + Send + Sync {
    /// Number of constraint equations (rows of the Jacobian).
    fn num_constraint_equations(&self) -> usize;

    /// Jacobian blocks per clique.
    fn jacobian(&self) -> &ConstraintJacobian;

    /// Diagonal regularization `Rᵢ`, of size `num_constraint_equations()`.
    ///
    /// `delassus_estimation` is a scalar estimate of the constraint's
    /// Delassus operator, used to scale the regularization.
    fn calc_diagonal_regularization(&self, time_step: f64, delassus_estimation: f64)
    -> DVector<f64>;

    /// Bias `v̂ᵢ`, of size `num_constraint_equations()`.
    fn calc_bias_term(&self, time_step: f64, delassus_estimation: f64) -> DVector<f64>;

    /// Project `y` onto the constraint's convex set, in the norm weighted by `r`.
    ///
    /// `y`, `r` and `gamma` all have `num_constraint_equations()` entries.
    /// When `dpdy` is given it is overwritten with the square derivative
    /// `dP/dy` evaluated at `y`.
    fn project(&self, y: &[f64], r: &[f64], gamma: &mut [f64], dpdy: Option<&mut DMatrix<f64>>);

    /// First clique the constraint acts on.
    fn first_clique(&self) -> usize {
        self.jacobian().first().clique
    }

    /// Second clique, for constraints coupling two cliques.
    fn second_clique(&self) -> Option<usize> {
        self.jacobian().second().map(|b| b.clique)
    }

    /// Number of cliques the constraint acts on (1 or 2).
    fn num_cliques(&self) -> usize {
        self.jacobian().num_cliques()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_single_clique_jacobian() {
        let j = ConstraintJacobian::single(CliqueJacobian::new(2, DMatrix::identity(3, 6)));
        assert_eq!(j.num_cliques(), 1);
        assert_eq!(j.rows(), 3);
        assert_eq!(j.cliques(), CliquePair::single(2));
        assert!(j.second().is_none());
        assert!(j.block_for(2).is_some());
        assert!(j.block_for(0).is_none());
    }

    #[test]
    fn test_pair_jacobian() {
        let j = ConstraintJacobian::pair(
            CliqueJacobian::new(3, DMatrix::identity(3, 6)),
            CliqueJacobian::new(1, -DMatrix::identity(3, 2)),
        )
        .unwrap();
        assert_eq!(j.num_cliques(), 2);
        assert_eq!(j.cliques(), CliquePair::new(1, 3));
        assert_eq!(j.block_for(1).unwrap().ncols(), 2);
        assert_eq!(j.blocks().count(), 2);
    }

    #[test]
    fn test_pair_jacobian_validation() {
        let same = ConstraintJacobian::pair(
            CliqueJacobian::new(0, DMatrix::zeros(3, 6)),
            CliqueJacobian::new(0, DMatrix::zeros(3, 6)),
        );
        assert!(same.is_err());

        let rows = ConstraintJacobian::pair(
            CliqueJacobian::new(0, DMatrix::zeros(3, 6)),
            CliqueJacobian::new(1, DMatrix::zeros(2, 6)),
        );
        assert!(matches!(
            rows.unwrap_err(),
            SapError::JacobianShapeMismatch { clique: 1, .. }
        ));
    }
}
