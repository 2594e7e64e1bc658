//! The SAP contact problem.
//!
//! A contact problem is defined by:
//!
//! - A time step `δt`.
//! - A set of cliques, each with its own block of generalized velocities and
//!   its dynamics matrix `A_c` (mass matrix plus implicit terms).
//! - The free-motion velocities `v*`, concatenated over cliques.
//! - A set of constraints, each acting on one or two cliques.
//!
//! The problem owns its constraints. Constraints are validated against the
//! clique layout when added and registered in the [`ContactProblemGraph`],
//! which fixes the ordering used by the bundle.

use nalgebra::{DMatrix, DVector};

use crate::error::check_size;
use crate::{ContactProblemGraph, Result, SapConstraint, SapError};

/// Contact problem over a set of cliques.
#[derive(Debug)]
pub struct SapContactProblem {
    time_step: f64,
    dynamics_matrices: Vec<DMatrix<f64>>,
    /// Scalar offset of each clique's velocities, plus the total at the end.
    velocity_offsets: Vec<usize>,
    v_star: DVector<f64>,
    constraints: Vec<Box<dyn SapConstraint>>,
    graph: ContactProblemGraph,
}

impl SapContactProblem {
    /// Create a problem with no constraints.
    ///
    /// `dynamics_matrices[c]` is the square dynamics matrix of clique `c`;
    /// `v_star` concatenates the free-motion velocities of all cliques.
    pub fn new(
        time_step: f64,
        dynamics_matrices: Vec<DMatrix<f64>>,
        v_star: DVector<f64>,
    ) -> Result<Self> {
        if !time_step.is_finite() || time_step <= 0.0 {
            return Err(SapError::InvalidTimestep(time_step));
        }

        let mut velocity_offsets = Vec::with_capacity(dynamics_matrices.len() + 1);
        let mut nv = 0;
        velocity_offsets.push(0);
        for (clique, a) in dynamics_matrices.iter().enumerate() {
            if !a.is_square() {
                return Err(SapError::invalid_parameter(format!(
                    "dynamics matrix of clique {clique} is {}x{}, expected square",
                    a.nrows(),
                    a.ncols()
                )));
            }
            nv += a.nrows();
            velocity_offsets.push(nv);
        }
        check_size("v_star", nv, v_star.len())?;

        let num_cliques = dynamics_matrices.len();
        Ok(Self {
            time_step,
            dynamics_matrices,
            velocity_offsets,
            v_star,
            constraints: Vec::new(),
            graph: ContactProblemGraph::new(num_cliques),
        })
    }

    /// Add a constraint and return its index in the problem.
    ///
    /// The constraint's cliques must exist and each Jacobian block must be
    /// `num_constraint_equations() x num_velocities_of(clique)`.
    pub fn add_constraint(&mut self, constraint: Box<dyn SapConstraint>) -> Result<usize> {
        let num_equations = constraint.num_constraint_equations();
        if num_equations == 0 {
            return Err(SapError::invalid_parameter(
                "constraint has no equations",
            ));
        }

        let jacobian = constraint.jacobian();
        for block in jacobian.blocks() {
            let nv = self.checked_velocities(block.clique)?;
            if block.matrix.nrows() != num_equations || block.matrix.ncols() != nv {
                return Err(SapError::JacobianShapeMismatch {
                    clique: block.clique,
                    expected_rows: num_equations,
                    expected_cols: nv,
                    rows: block.matrix.nrows(),
                    cols: block.matrix.ncols(),
                });
            }
        }

        let index = self.constraints.len();
        self.graph
            .add_constraint(index, jacobian.cliques(), num_equations)?;
        self.constraints.push(constraint);
        Ok(index)
    }

    fn checked_velocities(&self, clique: usize) -> Result<usize> {
        if clique < self.num_cliques() {
            Ok(self.num_velocities_of(clique))
        } else {
            Err(SapError::InvalidClique {
                clique,
                num_cliques: self.num_cliques(),
            })
        }
    }

    /// Time step of the problem.
    #[must_use]
    pub fn time_step(&self) -> f64 {
        self.time_step
    }

    /// Number of cliques.
    #[must_use]
    pub fn num_cliques(&self) -> usize {
        self.dynamics_matrices.len()
    }

    /// Total number of generalized velocities.
    #[must_use]
    pub fn num_velocities(&self) -> usize {
        self.v_star.len()
    }

    /// Number of velocities of `clique`.
    ///
    /// # Panics
    ///
    /// Panics if `clique` is out of range.
    #[must_use]
    pub fn num_velocities_of(&self, clique: usize) -> usize {
        self.dynamics_matrices[clique].nrows()
    }

    /// Offset of `clique`'s velocities within the full velocity vector.
    ///
    /// # Panics
    ///
    /// Panics if `clique` is out of range.
    #[must_use]
    pub fn velocity_offset(&self, clique: usize) -> usize {
        self.velocity_offsets[clique]
    }

    /// Per-clique dynamics matrices.
    #[must_use]
    pub fn dynamics_matrices(&self) -> &[DMatrix<f64>] {
        &self.dynamics_matrices
    }

    /// Free-motion velocities.
    #[must_use]
    pub fn v_star(&self) -> &DVector<f64> {
        &self.v_star
    }

    /// Number of constraints.
    #[must_use]
    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// Total number of constraint equations.
    #[must_use]
    pub fn num_constraint_equations(&self) -> usize {
        self.graph.num_constraint_equations()
    }

    /// Constraint `index`, in declaration order.
    #[must_use]
    pub fn get_constraint(&self, index: usize) -> Option<&dyn SapConstraint> {
        self.constraints.get(index).map(AsRef::as_ref)
    }

    /// All constraints, in declaration order.
    #[must_use]
    pub fn constraints(&self) -> &[Box<dyn SapConstraint>] {
        &self.constraints
    }

    /// Graph of cliques and constraint clusters.
    #[must_use]
    pub fn graph(&self) -> &ContactProblemGraph {
        &self.graph
    }
}
