//! Configuration for bundle construction and evaluation.

use crate::{Result, SapError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for [`SapConstraintBundle`](crate::SapConstraintBundle).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BundleConfig {
    /// Regularization floor. Every entry of R must be finite and strictly
    /// greater than this value, otherwise construction fails.
    pub min_regularization: f64,

    /// Project impulses on the rayon thread pool.
    ///
    /// Only honored when the crate is built with the `parallel` feature.
    pub parallel_projection: bool,

    /// Minimum number of constraints before parallel projection is used.
    /// Small bundles are always projected sequentially.
    pub min_constraints_for_parallel: usize,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            min_regularization: 0.0,
            parallel_projection: false,
            min_constraints_for_parallel: 64,
        }
    }
}

impl BundleConfig {
    /// Configuration for large scenes: parallel projection enabled.
    #[must_use]
    pub fn large_scene() -> Self {
        Self {
            parallel_projection: true,
            min_constraints_for_parallel: 256,
            ..Default::default()
        }
    }

    /// Set the regularization floor.
    #[must_use]
    pub fn with_min_regularization(mut self, min_regularization: f64) -> Self {
        self.min_regularization = min_regularization;
        self
    }

    /// Enable parallel projection above the given constraint count.
    #[must_use]
    pub fn with_parallel_projection(mut self, min_constraints: usize) -> Self {
        self.parallel_projection = true;
        self.min_constraints_for_parallel = min_constraints;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.min_regularization.is_finite() || self.min_regularization < 0.0 {
            return Err(SapError::invalid_parameter(format!(
                "min_regularization must be finite and non-negative, got {}",
                self.min_regularization
            )));
        }
        Ok(())
    }

    /// Whether a bundle with `num_constraints` constraints should be
    /// projected in parallel under this configuration.
    #[must_use]
    pub fn use_parallel(&self, num_constraints: usize) -> bool {
        cfg!(feature = "parallel")
            && self.parallel_projection
            && num_constraints >= self.min_constraints_for_parallel
    }
}
