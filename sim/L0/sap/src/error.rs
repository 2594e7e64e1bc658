//! Error types for constraint bundle assembly and evaluation.
//!
//! Every variant is a contract violation on the caller's side: wrong buffer
//! sizes, a malformed problem, or constraint parameters that cannot produce a
//! valid regularization. None of them is transient, so nothing here is meant
//! to be retried.

use thiserror::Error;

/// Errors reported by the SAP constraint bundle and its collaborators.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SapError {
    /// The scaling vector does not have one entry per constraint.
    #[error("expected {expected} Delassus diagonal entries (one per constraint), got {actual}")]
    ConstraintCountMismatch {
        /// Number of constraints in the problem.
        expected: usize,
        /// Length of the supplied vector.
        actual: usize,
    },

    /// A caller-supplied vector or buffer has the wrong size.
    #[error("{what} has size {actual}, expected {expected}")]
    DimensionMismatch {
        /// Name of the offending argument.
        what: &'static str,
        /// Required size.
        expected: usize,
        /// Supplied size.
        actual: usize,
    },

    /// A constraint references a clique the problem does not have.
    #[error("clique {clique} out of range (problem has {num_cliques} cliques)")]
    InvalidClique {
        /// The referenced clique.
        clique: usize,
        /// Number of cliques in the problem.
        num_cliques: usize,
    },

    /// A constraint Jacobian block disagrees with its clique or equation count.
    #[error(
        "Jacobian block for clique {clique} is {rows}x{cols}, expected {expected_rows}x{expected_cols}"
    )]
    JacobianShapeMismatch {
        /// Clique the block acts on.
        clique: usize,
        /// Required number of rows (constraint equations).
        expected_rows: usize,
        /// Required number of columns (clique velocities).
        expected_cols: usize,
        /// Actual rows.
        rows: usize,
        /// Actual columns.
        cols: usize,
    },

    /// A block pushed into a block-sparse builder conflicts with the sizes
    /// already recorded for its block row or block column.
    #[error("block ({block_row}, {block_col}) has {actual} along a dimension recorded as {expected}")]
    BlockShapeMismatch {
        /// Block row index.
        block_row: usize,
        /// Block column index.
        block_col: usize,
        /// Size recorded by an earlier block.
        expected: usize,
        /// Size of the offending block.
        actual: usize,
    },

    /// A block index lies outside the block-sparse layout.
    #[error("block ({block_row}, {block_col}) outside a {block_rows}x{block_cols} block layout")]
    BlockOutOfRange {
        /// Block row index.
        block_row: usize,
        /// Block column index.
        block_col: usize,
        /// Number of block rows.
        block_rows: usize,
        /// Number of block columns.
        block_cols: usize,
    },

    /// The same block was pushed twice.
    #[error("block ({block_row}, {block_col}) pushed more than once")]
    DuplicateBlock {
        /// Block row index.
        block_row: usize,
        /// Block column index.
        block_col: usize,
    },

    /// A block row or block column never received a block, so its size is unknown.
    #[error("block {kind} {index} has no blocks, its size cannot be determined")]
    EmptyBlockLine {
        /// Either "row" or "column".
        kind: &'static str,
        /// Index of the empty block row/column.
        index: usize,
    },

    /// A constraint produced a regularization entry that is not strictly
    /// positive and finite.
    #[error("constraint {constraint} equation {equation} has non-positive regularization {value}")]
    NonPositiveRegularization {
        /// Index of the constraint in the problem.
        constraint: usize,
        /// Equation index local to the constraint.
        equation: usize,
        /// Offending value.
        value: f64,
    },

    /// Invalid constraint parameter or configuration value.
    #[error("invalid parameter: {reason}")]
    InvalidParameter {
        /// Description of the problem.
        reason: String,
    },

    /// Invalid time step.
    #[error("invalid time step: {0} (must be positive and finite)")]
    InvalidTimestep(f64),

    /// A clique dynamics matrix could not be factored.
    #[error("dynamics matrix of clique {clique} is not symmetric positive definite")]
    SingularDynamicsMatrix {
        /// The clique whose matrix failed to factor.
        clique: usize,
    },
}

impl SapError {
    /// Create a dimension mismatch error.
    #[must_use]
    pub fn dimension(what: &'static str, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            what,
            expected,
            actual,
        }
    }

    /// Create an invalid parameter error.
    #[must_use]
    pub fn invalid_parameter(reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            reason: reason.into(),
        }
    }

    /// Check if this error is a size mismatch on a caller buffer.
    #[must_use]
    pub fn is_dimension_mismatch(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. } | Self::ConstraintCountMismatch { .. }
        )
    }

    /// Check if this error describes a malformed problem or Jacobian layout.
    #[must_use]
    pub fn is_layout_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidClique { .. }
                | Self::JacobianShapeMismatch { .. }
                | Self::BlockShapeMismatch { .. }
                | Self::BlockOutOfRange { .. }
                | Self::DuplicateBlock { .. }
                | Self::EmptyBlockLine { .. }
        )
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SapError>;

/// Check that a caller-supplied length matches the expected one.
pub(crate) fn check_size(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(SapError::dimension(what, expected, actual))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SapError::ConstraintCountMismatch {
            expected: 3,
            actual: 2,
        };
        assert!(err.to_string().contains("expected 3"));

        let err = SapError::dimension("vc", 6, 5);
        assert_eq!(err.to_string(), "vc has size 5, expected 6");

        let err = SapError::NonPositiveRegularization {
            constraint: 4,
            equation: 2,
            value: -1.0,
        };
        assert!(err.to_string().contains("constraint 4"));
    }

    #[test]
    fn test_error_predicates() {
        assert!(SapError::dimension("y", 1, 2).is_dimension_mismatch());
        assert!(!SapError::dimension("y", 1, 2).is_layout_error());

        let err = SapError::InvalidClique {
            clique: 7,
            num_cliques: 2,
        };
        assert!(err.is_layout_error());
        assert!(!err.is_dimension_mismatch());
    }

    #[test]
    fn test_check_size() {
        assert!(check_size("gamma", 3, 3).is_ok());
        assert_eq!(
            check_size("gamma", 3, 4).unwrap_err(),
            SapError::dimension("gamma", 3, 4)
        );
    }
}
