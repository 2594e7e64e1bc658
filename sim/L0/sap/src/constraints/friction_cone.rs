//! Compliant point contact with a Coulomb friction cone.
//!
//! Constraint velocities are ordered `[vt₁, vt₂, vn]`: two tangential
//! components followed by the normal component. The feasible impulses form
//! the friction cone
//!
//! ```text
//! 𝒞 = { γ = [γt, γn] : ‖γt‖ ≤ μ·γn }
//! ```
//!
//! and projection is taken in the norm weighted by `R = diag(Rt, Rt, Rn)`.
//! With `μ̂ = μ·Rt/Rn` the projection has three regions:
//!
//! ```text
//! stiction    ‖yt‖ ≤ μ·yn             γ = y
//! sliding    -μ̂·‖yt‖ < yn < ‖yt‖/μ    γn = (yn + μ̂·‖yt‖)/(1 + μ·μ̂),  γt = μ·γn·t̂
//! separation  yn ≤ -μ̂·‖yt‖            γ = 0
//! ```

use nalgebra::{DMatrix, DVector, Matrix2, Vector2};

use super::{check_non_negative, check_positive, near_rigid_regularization};
use crate::{ConstraintJacobian, Result, SapConstraint, SapError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Parameters of a frictional contact.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FrictionConeParameters {
    /// Coulomb friction coefficient.
    pub mu: f64,
    /// Normal contact stiffness (N/m).
    pub stiffness: f64,
    /// Dissipation time scale of the normal response (s).
    pub dissipation_time_scale: f64,
    /// Near-rigid regularization factor.
    pub beta: f64,
    /// Tangential regularization relative to the Delassus estimation.
    /// Controls the amount of regularized stiction.
    pub sigma: f64,
}

impl Default for FrictionConeParameters {
    fn default() -> Self {
        Self {
            mu: 0.5,
            stiffness: 1.0e5,
            dissipation_time_scale: 0.0,
            beta: 1.0,
            sigma: 1.0e-3,
        }
    }
}

impl FrictionConeParameters {
    /// Parameters with the given friction, stiffness and dissipation time scale.
    #[must_use]
    pub fn new(mu: f64, stiffness: f64, dissipation_time_scale: f64) -> Self {
        Self {
            mu,
            stiffness,
            dissipation_time_scale,
            ..Default::default()
        }
    }

    /// Frictionless contact.
    #[must_use]
    pub fn frictionless(stiffness: f64) -> Self {
        Self {
            mu: 0.0,
            stiffness,
            ..Default::default()
        }
    }

    /// Set the near-rigid factor.
    #[must_use]
    pub fn with_beta(mut self, beta: f64) -> Self {
        self.beta = beta;
        self
    }

    /// Set the tangential regularization factor.
    #[must_use]
    pub fn with_sigma(mut self, sigma: f64) -> Self {
        self.sigma = sigma;
        self
    }

    /// Validate the parameters.
    pub fn validate(&self) -> Result<()> {
        check_non_negative("mu", self.mu)?;
        check_positive("stiffness", self.stiffness)?;
        check_non_negative("dissipation_time_scale", self.dissipation_time_scale)?;
        check_positive("beta", self.beta)?;
        check_positive("sigma", self.sigma)?;
        Ok(())
    }
}

/// Frictional point contact between one or two cliques.
#[derive(Debug, Clone)]
pub struct FrictionConeConstraint {
    jacobian: ConstraintJacobian,
    /// Signed distance at the start of the step (negative when penetrating).
    phi0: f64,
    parameters: FrictionConeParameters,
}

impl FrictionConeConstraint {
    /// Number of equations: two tangential and one normal.
    pub const NUM_EQUATIONS: usize = 3;

    /// Create a contact constraint.
    ///
    /// `jacobian` must have three rows, ordered `[t₁, t₂, n]`.
    pub fn new(
        jacobian: ConstraintJacobian,
        phi0: f64,
        parameters: FrictionConeParameters,
    ) -> Result<Self> {
        parameters.validate()?;
        if !phi0.is_finite() {
            return Err(SapError::invalid_parameter(format!(
                "signed distance must be finite, got {phi0}"
            )));
        }
        if jacobian.rows() != Self::NUM_EQUATIONS {
            let block = jacobian.first();
            return Err(SapError::JacobianShapeMismatch {
                clique: block.clique,
                expected_rows: Self::NUM_EQUATIONS,
                expected_cols: block.matrix.ncols(),
                rows: block.matrix.nrows(),
                cols: block.matrix.ncols(),
            });
        }
        Ok(Self {
            jacobian,
            phi0,
            parameters,
        })
    }

    /// Contact parameters.
    #[must_use]
    pub fn parameters(&self) -> &FrictionConeParameters {
        &self.parameters
    }

    /// Signed distance at the start of the step.
    #[must_use]
    pub fn phi0(&self) -> f64 {
        self.phi0
    }
}

impl SapConstraint for FrictionConeConstraint {
    fn num_constraint_equations(&self) -> usize {
        Self::NUM_EQUATIONS
    }

    fn jacobian(&self) -> &ConstraintJacobian {
        &self.jacobian
    }

    fn calc_diagonal_regularization(
        &self,
        time_step: f64,
        delassus_estimation: f64,
    ) -> DVector<f64> {
        let p = &self.parameters;
        let rt = p.sigma * delassus_estimation;
        let rn = near_rigid_regularization(p.beta, delassus_estimation).max(
            1.0 / (time_step * p.stiffness * (time_step + p.dissipation_time_scale)),
        );
        DVector::from_vec(vec![rt, rt, rn])
    }

    fn calc_bias_term(&self, time_step: f64, _delassus_estimation: f64) -> DVector<f64> {
        let vn_hat = -self.phi0 / (time_step + self.parameters.dissipation_time_scale);
        DVector::from_vec(vec![0.0, 0.0, vn_hat])
    }

    fn project(&self, y: &[f64], r: &[f64], gamma: &mut [f64], dpdy: Option<&mut DMatrix<f64>>) {
        let mu = self.parameters.mu;
        let (rt, rn) = (r[0], r[2]);
        let mu_hat = mu * rt / rn;

        let yt = Vector2::new(y[0], y[1]);
        let yn = y[2];
        let yr = yt.norm();

        if yn >= 0.0 && yr <= mu * yn {
            // Stiction: y already lies in the cone.
            gamma.copy_from_slice(&y[..3]);
            if let Some(dpdy) = dpdy {
                *dpdy = DMatrix::identity(3, 3);
            }
        } else if -mu_hat * yr < yn {
            // Sliding. yr > 0 here, the two regions above and below cover yr = 0.
            let that = yt / yr;
            let denom = 1.0 + mu * mu_hat;
            let gn = (yn + mu_hat * yr) / denom;
            let gt = that * (mu * gn);
            gamma[0] = gt.x;
            gamma[1] = gt.y;
            gamma[2] = gn;

            if let Some(dpdy) = dpdy {
                let p = that * that.transpose();
                let p_perp = Matrix2::identity() - p;
                let dgt_dyt = p_perp * (mu * gn / yr) + p * (mu * mu_hat / denom);
                let dgt_dyn = that * (mu / denom);
                let dgn_dyt = that * (mu_hat / denom);
                let dgn_dyn = 1.0 / denom;

                let mut m = DMatrix::zeros(3, 3);
                m.fixed_view_mut::<2, 2>(0, 0).copy_from(&dgt_dyt);
                m.fixed_view_mut::<2, 1>(0, 2).copy_from(&dgt_dyn);
                m[(2, 0)] = dgn_dyt.x;
                m[(2, 1)] = dgn_dyt.y;
                m[(2, 2)] = dgn_dyn;
                *dpdy = m;
            }
        } else {
            // Separation.
            gamma[..3].fill(0.0);
            if let Some(dpdy) = dpdy {
                *dpdy = DMatrix::zeros(3, 3);
            }
        }
    }
}
