//! Constraint bundle for the SAP (Semi-Analytic Primal) contact formulation.
//!
//! SAP solves one convex optimization per time step over the generalized
//! velocities of all cliques (groups of coupled degrees of freedom). Every
//! constraint in the problem contributes a Jacobian block, a diagonal
//! regularization, a bias velocity and a projection onto its convex set. This
//! crate assembles those contributions into a single [`SapConstraintBundle`]
//! so that the solver can treat all constraints as one.
//!
//! # Building Blocks
//!
//! - [`SapContactProblem`]: time step, per-clique dynamics matrices,
//!   free-motion velocities and the constraints themselves
//! - [`ContactProblemGraph`]: cliques as nodes, constraints grouped into
//!   clusters by the pair of cliques they couple
//! - [`SapConstraint`]: the interface every constraint kind implements
//! - [`BlockSparseMatrix`]: the block-sparse bundle Jacobian
//! - [`PartialPermutation`]: maps cliques to the participating subset
//!
//! # Constraint Kinds
//!
//! - [`FrictionConeConstraint`]: compliant point contact with regularized
//!   Coulomb friction
//! - [`LimitConstraint`]: lower/upper position limits on a single dof
//! - [`CouplerConstraint`]: rigid linear coupling between two dofs
//!
//! # Bundle Formulation
//!
//! ```text
//! vc = J·v                    constraint velocities
//! y  = −R⁻¹·(vc − v̂)          unprojected impulses
//! γ  = P(y)                   projection onto 𝒞 = 𝒞₁ × … × 𝒞ₙ
//! G  = dP/dy · R⁻¹            Hessian of the regularizer cost, block diagonal
//! ```
//!
//! # Example
//!
//! ```
//! use nalgebra::{DMatrix, DVector};
//! use sim_sap::{
//!     CliqueJacobian, ConstraintJacobian, LimitConstraint, LimitParameters,
//!     SapConstraintBundle, SapContactProblem, approximate_delassus_diagonal,
//! };
//!
//! // A single slider of mass 2 with limits at ±0.5, currently at 0.6.
//! let mut problem =
//!     SapContactProblem::new(1e-3, vec![DMatrix::identity(1, 1) * 2.0], DVector::zeros(1))?;
//! let limit = LimitConstraint::new(0, 1, 0, 0.6, LimitParameters::new(-0.5, 0.5))?;
//! problem.add_constraint(Box::new(limit))?;
//!
//! let w = approximate_delassus_diagonal(&problem)?;
//! let bundle = SapConstraintBundle::new(&problem, &w)?;
//! assert_eq!(bundle.num_constraint_equations(), 2);
//!
//! // At rest the violated upper limit produces a positive impulse.
//! let vc = bundle.calc_constraint_velocities(&DVector::zeros(1))?;
//! let mut y = DVector::zeros(2);
//! bundle.calc_unprojected_impulses(&vc, &mut y)?;
//! let mut gamma = DVector::zeros(2);
//! bundle.project_impulses(&y, &mut gamma, None)?;
//! assert_eq!(gamma[0], 0.0);
//! assert!(gamma[1] > 0.0);
//! # Ok::<(), sim_sap::SapError>(())
//! ```
//!
//! # Features
//!
//! - `parallel`: project impulses on the rayon thread pool, see
//!   [`BundleConfig::with_parallel_projection`]
//! - `serde`: serialization of parameter and configuration types
//!
//! # Layer 0 Crate
//!
//! This is a Layer 0 crate with **zero Bevy dependencies**. It only depends on
//! nalgebra for its math and can be embedded in any time stepper.

#![doc(html_root_url = "https://docs.rs/sim-sap/0.1.0")]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn)]

mod block_sparse;
mod bundle;
mod config;
mod constraint;
pub mod constraints;
mod delassus;
mod error;
mod graph;
mod permutation;
mod problem;

pub use block_sparse::{BlockSparseMatrix, BlockSparseMatrixBuilder, BlockTriplet};
pub use bundle::SapConstraintBundle;
pub use config::BundleConfig;
pub use constraint::{CliqueJacobian, ConstraintJacobian, SapConstraint};
pub use constraints::{
    CoupledDof, CouplerConstraint, CouplerParameters, FrictionConeConstraint,
    FrictionConeParameters, LimitConstraint, LimitParameters,
};
pub use delassus::approximate_delassus_diagonal;
pub use error::{Result, SapError};
pub use graph::{CliqueIsland, CliquePair, ConstraintCluster, ContactProblemGraph};
pub use permutation::PartialPermutation;
pub use problem::SapContactProblem;

// Re-export nalgebra so callers build matrices against the same version.
pub use nalgebra;
