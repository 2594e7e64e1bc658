//! Rigid linear coupling between two generalized coordinates.
//!
//! Enforces `g = q₀ − ρ·q₁ − offset = 0` (gears, mimic joints). The impulse
//! is bilateral: the convex set is all of ℝ, so projection is the identity.
//! Both coordinates may live in the same clique or in two different ones.

use nalgebra::{DMatrix, DVector};

use super::{check_dof, check_positive, effective_dissipation_time_scale, near_rigid_regularization};
use crate::{CliqueJacobian, ConstraintJacobian, Result, SapConstraint, SapError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A coordinate taking part in a coupling.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CoupledDof {
    /// Clique owning the coordinate.
    pub clique: usize,
    /// Number of velocities of that clique.
    pub clique_nv: usize,
    /// Index of the coordinate within the clique.
    pub dof: usize,
    /// Coordinate value at the start of the step.
    pub q: f64,
}

impl CoupledDof {
    /// Create a coupled coordinate.
    #[must_use]
    pub fn new(clique: usize, clique_nv: usize, dof: usize, q: f64) -> Self {
        Self {
            clique,
            clique_nv,
            dof,
            q,
        }
    }
}

/// Coupling ratio, offset and regularization.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CouplerParameters {
    /// Gear ratio ρ.
    pub gear_ratio: f64,
    /// Constant offset.
    pub offset: f64,
    /// Near-rigid regularization factor.
    pub beta: f64,
}

impl Default for CouplerParameters {
    fn default() -> Self {
        Self {
            gear_ratio: 1.0,
            offset: 0.0,
            beta: 0.1,
        }
    }
}

impl CouplerParameters {
    /// Coupling with the given ratio and offset.
    #[must_use]
    pub fn new(gear_ratio: f64, offset: f64) -> Self {
        Self {
            gear_ratio,
            offset,
            ..Default::default()
        }
    }

    /// Validate the parameters.
    pub fn validate(&self) -> Result<()> {
        if !self.gear_ratio.is_finite() || !self.offset.is_finite() {
            return Err(SapError::invalid_parameter(format!(
                "gear ratio and offset must be finite, got {} and {}",
                self.gear_ratio, self.offset
            )));
        }
        check_positive("beta", self.beta)
    }
}

/// Rigid coupling `q₀ = ρ·q₁ + offset`.
#[derive(Debug, Clone)]
pub struct CouplerConstraint {
    jacobian: ConstraintJacobian,
    g0: f64,
    parameters: CouplerParameters,
}

impl CouplerConstraint {
    /// Couple coordinate `dof0` to `dof1`.
    pub fn new(dof0: CoupledDof, dof1: CoupledDof, parameters: CouplerParameters) -> Result<Self> {
        parameters.validate()?;
        check_dof(dof0.dof, dof0.clique_nv)?;
        check_dof(dof1.dof, dof1.clique_nv)?;
        let rho = parameters.gear_ratio;

        let jacobian = if dof0.clique == dof1.clique {
            if dof0.clique_nv != dof1.clique_nv {
                return Err(SapError::invalid_parameter(format!(
                    "clique {} declared with {} and {} velocities",
                    dof0.clique, dof0.clique_nv, dof1.clique_nv
                )));
            }
            if dof0.dof == dof1.dof {
                return Err(SapError::invalid_parameter(format!(
                    "dof {} coupled to itself",
                    dof0.dof
                )));
            }
            let mut j = DMatrix::zeros(1, dof0.clique_nv);
            j[(0, dof0.dof)] = 1.0;
            j[(0, dof1.dof)] = -rho;
            ConstraintJacobian::single(CliqueJacobian::new(dof0.clique, j))
        } else {
            let mut j0 = DMatrix::zeros(1, dof0.clique_nv);
            j0[(0, dof0.dof)] = 1.0;
            let mut j1 = DMatrix::zeros(1, dof1.clique_nv);
            j1[(0, dof1.dof)] = -rho;
            ConstraintJacobian::pair(
                CliqueJacobian::new(dof0.clique, j0),
                CliqueJacobian::new(dof1.clique, j1),
            )?
        };

        Ok(Self {
            jacobian,
            g0: dof0.q - rho * dof1.q - parameters.offset,
            parameters,
        })
    }

    /// Constraint function value at the start of the step.
    #[must_use]
    pub fn constraint_function(&self) -> f64 {
        self.g0
    }
}

impl SapConstraint for CouplerConstraint {
    fn num_constraint_equations(&self) -> usize {
        1
    }

    fn jacobian(&self) -> &ConstraintJacobian {
        &self.jacobian
    }

    fn calc_diagonal_regularization(
        &self,
        _time_step: f64,
        delassus_estimation: f64,
    ) -> DVector<f64> {
        DVector::from_element(
            1,
            near_rigid_regularization(self.parameters.beta, delassus_estimation),
        )
    }

    fn calc_bias_term(&self, time_step: f64, _delassus_estimation: f64) -> DVector<f64> {
        let tau =
            effective_dissipation_time_scale(time_step, f64::INFINITY, 0.0, self.parameters.beta);
        DVector::from_element(1, -self.g0 / (time_step + tau))
    }

    fn project(&self, y: &[f64], _r: &[f64], gamma: &mut [f64], dpdy: Option<&mut DMatrix<f64>>) {
        gamma[0] = y[0];
        if let Some(dpdy) = dpdy {
            *dpdy = DMatrix::identity(1, 1);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_same_clique_coupling() {
        let c = CouplerConstraint::new(
            CoupledDof::new(0, 3, 0, 1.0),
            CoupledDof::new(0, 3, 2, 0.25),
            CouplerParameters::new(2.0, 0.1),
        )
        .unwrap();
        assert_eq!(c.num_cliques(), 1);
        let j = &c.jacobian().first().matrix;
        assert_eq!(j.shape(), (1, 3));
        assert_relative_eq!(j[(0, 0)], 1.0);
        assert_relative_eq!(j[(0, 2)], -2.0);
        assert_relative_eq!(c.constraint_function(), 1.0 - 0.5 - 0.1, epsilon = 1e-15);
    }

    #[test]
    fn test_two_clique_coupling() {
        let c = CouplerConstraint::new(
            CoupledDof::new(2, 1, 0, 0.0),
            CoupledDof::new(0, 2, 1, 0.0),
            CouplerParameters::default(),
        )
        .unwrap();
        assert_eq!(c.num_cliques(), 2);
        assert_eq!(c.first_clique(), 2);
        assert_eq!(c.second_clique(), Some(0));
        assert_relative_eq!(c.jacobian().block_for(0).unwrap()[(0, 1)], -1.0);
    }

    #[test]
    fn test_invalid_coupling() {
        let self_coupled = CouplerConstraint::new(
            CoupledDof::new(0, 2, 1, 0.0),
            CoupledDof::new(0, 2, 1, 0.0),
            CouplerParameters::default(),
        );
        assert!(self_coupled.is_err());

        let out_of_range = CouplerConstraint::new(
            CoupledDof::new(0, 2, 2, 0.0),
            CoupledDof::new(1, 2, 0, 0.0),
            CouplerParameters::default(),
        );
        assert!(out_of_range.is_err());
    }

    #[test]
    fn test_bias_and_projection() {
        let dt = 0.002;
        let c = CouplerConstraint::new(
            CoupledDof::new(0, 1, 0, 0.3),
            CoupledDof::new(1, 1, 0, 0.1),
            CouplerParameters::new(1.0, 0.0),
        )
        .unwrap();
        let vhat = c.calc_bias_term(dt, 1.0);
        assert_relative_eq!(vhat[0], -0.2 / (dt + 0.1 * dt / PI), epsilon = 1e-12);

        let mut gamma = [0.0];
        let mut dpdy = DMatrix::zeros(0, 0);
        c.project(&[-4.0], &[1.0], &mut gamma, Some(&mut dpdy));
        assert_eq!(gamma, [-4.0]);
        assert_relative_eq!(dpdy[(0, 0)], 1.0);
    }
}
