//! Reference constraint kinds.
//!
//! - [`FrictionConeConstraint`]: compliant point contact with Coulomb friction
//! - [`LimitConstraint`]: lower/upper position limits on a single dof
//! - [`CouplerConstraint`]: rigid linear coupling `q₀ = ρ·q₁ + offset`
//!
//! # Regularization
//!
//! All kinds share the SAP regularization model. A constraint with stiffness
//! `k` and dissipation time scale `τd` is regularized with
//!
//! ```text
//! R = max(β²/(4π²)·w, 1/(δt·k·(δt + τd)))
//! ```
//!
//! where `w` is the Delassus estimation supplied by the bundle and `β`
//! controls how close to rigid the "near-rigid" floor is. An infinitely stiff
//! constraint (`k = ∞`) is regularized by the floor alone and dissipates
//! over `τd = β·δt/π`.

mod coupler;
mod friction_cone;
mod limit;

pub use coupler::{CoupledDof, CouplerConstraint, CouplerParameters};
pub use friction_cone::{FrictionConeConstraint, FrictionConeParameters};
pub use limit::{LimitConstraint, LimitParameters};

use std::f64::consts::PI;

use crate::{Result, SapError};

/// Near-rigid regularization `β²/(4π²)·w`.
#[must_use]
pub fn near_rigid_regularization(beta: f64, delassus_estimation: f64) -> f64 {
    beta * beta / (4.0 * PI * PI) * delassus_estimation
}

/// Regularization of a compliant constraint, bounded below by the
/// near-rigid regularization.
#[must_use]
pub fn compliant_regularization(
    time_step: f64,
    stiffness: f64,
    dissipation_time_scale: f64,
    beta: f64,
    delassus_estimation: f64,
) -> f64 {
    let compliant = 1.0 / (time_step * stiffness * (time_step + dissipation_time_scale));
    near_rigid_regularization(beta, delassus_estimation).max(compliant)
}

/// Dissipation time scale actually used for the bias term.
///
/// Infinitely stiff constraints use the near-rigid time scale `β·δt/π`.
#[must_use]
pub fn effective_dissipation_time_scale(
    time_step: f64,
    stiffness: f64,
    dissipation_time_scale: f64,
    beta: f64,
) -> f64 {
    if stiffness.is_infinite() {
        beta * time_step / PI
    } else {
        dissipation_time_scale
    }
}

pub(crate) fn check_positive(name: &str, value: f64) -> Result<()> {
    // Infinity is accepted: rigid constraints use infinite stiffness.
    if value > 0.0 {
        Ok(())
    } else {
        Err(SapError::invalid_parameter(format!(
            "{name} must be positive, got {value}"
        )))
    }
}

pub(crate) fn check_non_negative(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(SapError::invalid_parameter(format!(
            "{name} must be finite and non-negative, got {value}"
        )))
    }
}

pub(crate) fn check_dof(dof: usize, clique_nv: usize) -> Result<()> {
    if dof < clique_nv {
        Ok(())
    } else {
        Err(SapError::invalid_parameter(format!(
            "dof {dof} outside clique with {clique_nv} velocities"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_near_rigid_floor() {
        let r = near_rigid_regularization(1.0, 4.0 * PI * PI);
        assert_relative_eq!(r, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_compliant_regularization() {
        // Soft constraint: compliance dominates.
        let r = compliant_regularization(0.01, 100.0, 0.0, 1.0, 1.0);
        assert_relative_eq!(r, 1.0 / (0.01 * 100.0 * 0.01), epsilon = 1e-9);

        // Rigid constraint: only the floor remains.
        let r = compliant_regularization(0.01, f64::INFINITY, 0.0, 1.0, 2.0);
        assert_relative_eq!(r, near_rigid_regularization(1.0, 2.0), epsilon = 1e-15);
    }

    #[test]
    fn test_effective_dissipation_time_scale() {
        assert_relative_eq!(effective_dissipation_time_scale(0.01, 1e4, 0.1, 1.0), 0.1);
        assert_relative_eq!(
            effective_dissipation_time_scale(0.01, f64::INFINITY, 0.1, 1.0),
            0.01 / PI,
            epsilon = 1e-15
        );
    }

    #[test]
    fn test_checks() {
        assert!(check_positive("k", f64::INFINITY).is_ok());
        assert!(check_positive("k", 0.0).is_err());
        assert!(check_positive("k", f64::NAN).is_err());
        assert!(check_non_negative("tau", 0.0).is_ok());
        assert!(check_non_negative("tau", -1.0).is_err());
        assert!(check_dof(2, 3).is_ok());
        assert!(check_dof(3, 3).is_err());
    }
}
