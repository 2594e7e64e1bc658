//! Position limits on a single generalized coordinate.
//!
//! For a coordinate `q` with limits `ql ≤ q ≤ qu` the constraint functions are
//!
//! ```text
//! gₗ = q − ql ≥ 0        gᵤ = qu − q ≥ 0
//! ```
//!
//! One equation is emitted per finite limit, lower first. Impulses are
//! unilateral, `γ ≥ 0`, so the projection is `max(0, y)` component-wise.

use nalgebra::{DMatrix, DVector};

use super::{
    check_dof, check_non_negative, check_positive, compliant_regularization,
    effective_dissipation_time_scale,
};
use crate::{CliqueJacobian, ConstraintJacobian, Result, SapConstraint, SapError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Limit bounds and compliance.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LimitParameters {
    /// Lower limit, `-∞` when absent.
    pub lower: f64,
    /// Upper limit, `+∞` when absent.
    pub upper: f64,
    /// Limit stiffness, `+∞` for a rigid limit.
    pub stiffness: f64,
    /// Dissipation time scale (s). Ignored for rigid limits.
    pub dissipation_time_scale: f64,
    /// Near-rigid regularization factor.
    pub beta: f64,
}

impl Default for LimitParameters {
    fn default() -> Self {
        Self {
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
            stiffness: f64::INFINITY,
            dissipation_time_scale: 0.0,
            beta: 0.1,
        }
    }
}

impl LimitParameters {
    /// Rigid limits `[lower, upper]`.
    #[must_use]
    pub fn new(lower: f64, upper: f64) -> Self {
        Self {
            lower,
            upper,
            ..Default::default()
        }
    }

    /// Make the limit compliant.
    #[must_use]
    pub fn with_compliance(mut self, stiffness: f64, dissipation_time_scale: f64) -> Self {
        self.stiffness = stiffness;
        self.dissipation_time_scale = dissipation_time_scale;
        self
    }

    /// Validate the parameters.
    pub fn validate(&self) -> Result<()> {
        if self.lower.is_nan() || self.upper.is_nan() || self.lower > self.upper {
            return Err(SapError::invalid_parameter(format!(
                "invalid limit range [{}, {}]",
                self.lower, self.upper
            )));
        }
        if self.lower.is_infinite() && self.upper.is_infinite() {
            return Err(SapError::invalid_parameter(
                "limit constraint needs at least one finite bound",
            ));
        }
        check_positive("stiffness", self.stiffness)?;
        check_non_negative("dissipation_time_scale", self.dissipation_time_scale)?;
        check_positive("beta", self.beta)?;
        Ok(())
    }
}

/// Lower/upper limit on one dof of a clique.
#[derive(Debug, Clone)]
pub struct LimitConstraint {
    jacobian: ConstraintJacobian,
    /// Constraint function value per equation at the start of the step.
    g0: Vec<f64>,
    parameters: LimitParameters,
}

impl LimitConstraint {
    /// Create a limit on coordinate `dof` of `clique`, which has `clique_nv`
    /// velocities. `q0` is the coordinate value at the start of the step.
    pub fn new(
        clique: usize,
        clique_nv: usize,
        dof: usize,
        q0: f64,
        parameters: LimitParameters,
    ) -> Result<Self> {
        parameters.validate()?;
        check_dof(dof, clique_nv)?;

        let mut g0 = Vec::with_capacity(2);
        let mut signs = Vec::with_capacity(2);
        if parameters.lower.is_finite() {
            g0.push(q0 - parameters.lower);
            signs.push(1.0);
        }
        if parameters.upper.is_finite() {
            g0.push(parameters.upper - q0);
            signs.push(-1.0);
        }

        let mut j = DMatrix::zeros(signs.len(), clique_nv);
        for (row, sign) in signs.into_iter().enumerate() {
            j[(row, dof)] = sign;
        }

        Ok(Self {
            jacobian: ConstraintJacobian::single(CliqueJacobian::new(clique, j)),
            g0,
            parameters,
        })
    }

    /// Constraint function values at the start of the step.
    #[must_use]
    pub fn constraint_function(&self) -> &[f64] {
        &self.g0
    }

    /// Limit parameters.
    #[must_use]
    pub fn parameters(&self) -> &LimitParameters {
        &self.parameters
    }
}

impl SapConstraint for LimitConstraint {
    fn num_constraint_equations(&self) -> usize {
        self.g0.len()
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
        let r = compliant_regularization(
            time_step,
            p.stiffness,
            p.dissipation_time_scale,
            p.beta,
            delassus_estimation,
        );
        DVector::from_element(self.g0.len(), r)
    }

    fn calc_bias_term(&self, time_step: f64, _delassus_estimation: f64) -> DVector<f64> {
        let p = &self.parameters;
        let tau =
            effective_dissipation_time_scale(time_step, p.stiffness, p.dissipation_time_scale, p.beta);
        DVector::from_iterator(self.g0.len(), self.g0.iter().map(|g| -g / (time_step + tau)))
    }

    fn project(&self, y: &[f64], _r: &[f64], gamma: &mut [f64], dpdy: Option<&mut DMatrix<f64>>) {
        let n = self.g0.len();
        for (g, &yi) in gamma.iter_mut().zip(y).take(n) {
            *g = yi.max(0.0);
        }
        if let Some(dpdy) = dpdy {
            *dpdy = DMatrix::from_fn(n, n, |i, j| {
                if i == j && y[i] > 0.0 { 1.0 } else { 0.0 }
            });
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
    fn test_both_limits() {
        let c = LimitConstraint::new(1, 4, 2, 0.25, LimitParameters::new(-0.5, 0.5)).unwrap();
        assert_eq!(c.num_constraint_equations(), 2);
        assert_eq!(c.first_clique(), 1);
        assert_eq!(c.second_clique(), None);
        assert_eq!(c.constraint_function(), &[0.75, 0.25]);

        let j = &c.jacobian().first().matrix;
        assert_eq!(j.shape(), (2, 4));
        assert_relative_eq!(j[(0, 2)], 1.0);
        assert_relative_eq!(j[(1, 2)], -1.0);
        assert_relative_eq!(j.abs().sum(), 2.0);
    }

    #[test]
    fn test_single_sided() {
        let upper_only = LimitParameters {
            upper: 1.0,
            ..Default::default()
        };
        let c = LimitConstraint::new(0, 1, 0, 2.0, upper_only).unwrap();
        assert_eq!(c.num_constraint_equations(), 1);
        assert_eq!(c.constraint_function(), &[-1.0]);
        assert_relative_eq!(c.jacobian().first().matrix[(0, 0)], -1.0);
    }

    #[test]
    fn test_invalid_limits() {
        assert!(LimitConstraint::new(0, 2, 0, 0.0, LimitParameters::default()).is_err());
        assert!(LimitConstraint::new(0, 2, 0, 0.0, LimitParameters::new(1.0, -1.0)).is_err());
        assert!(LimitConstraint::new(0, 2, 2, 0.0, LimitParameters::new(-1.0, 1.0)).is_err());
    }

    #[test]
    fn test_rigid_regularization_and_bias() {
        let dt = 0.01;
        let w = 3.0;
        let c = LimitConstraint::new(0, 1, 0, -0.6, LimitParameters::new(-0.5, 0.5)).unwrap();

        let r = c.calc_diagonal_regularization(dt, w);
        let expected = 0.1 * 0.1 / (4.0 * PI * PI) * w;
        assert_relative_eq!(r[0], expected, epsilon = 1e-15);
        assert_relative_eq!(r[1], expected, epsilon = 1e-15);

        // Lower limit violated by 0.1: the bias pushes the coordinate back.
        let vhat = c.calc_bias_term(dt, w);
        let tau = 0.1 * dt / PI;
        assert_relative_eq!(vhat[0], 0.1 / (dt + tau), epsilon = 1e-12);
        assert_relative_eq!(vhat[1], -1.1 / (dt + tau), epsilon = 1e-12);
    }

    #[test]
    fn test_projection() {
        let c = LimitConstraint::new(0, 1, 0, 0.0, LimitParameters::new(-1.0, 1.0)).unwrap();
        let mut gamma = [0.0; 2];
        let mut dpdy = DMatrix::zeros(0, 0);
        c.project(&[2.0, -3.0], &[1.0, 1.0], &mut gamma, Some(&mut dpdy));
        assert_eq!(gamma, [2.0, 0.0]);
        assert_relative_eq!(dpdy, DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 0.0]));

        // Feasible impulses are left untouched.
        c.project(&[0.5, 0.0], &[1.0, 1.0], &mut gamma, None);
        assert_eq!(gamma, [0.5, 0.0]);
    }
}
