//! Explicit elimination and hybrid Jacobian reduction.
//!
//! This crate turns constraints of the form `q_out = g⁻¹(f(q_in))` into a
//! change of variables. The eliminated variables are computed in closed form
//! and every remaining implicit constraint is differentiated with respect to
//! the free variables only.
//!
//! # Modules
//!
//! - [`outer_map`]: Identity and generic maps `g` applied to the outputs
//! - [`explicit`]: A single explicit function and its index sets
//! - [`explicit_system`]: Ordered set of explicit functions and their
//!   chained Jacobian
//! - [`hybrid`]: Stack of implicit constraints reduced over the free
//!   variables
//!
//! # Example
//!
//! ```
//! use kinsolve_core::prelude::*;
//! use kinsolve_solver::prelude::*;
//!
//! # fn main() -> kinsolve_core::Result<()> {
//! // q1 = 2 q0, subject to q0 + q1 = 3
//! let space: SpacePtr<f64> = VectorSpace::shared(2);
//! let double = AffineFunction::linear("double", DMatrix::from_element(1, 1, 2.0));
//! let explicit = ExplicitFunction::new(
//!     "q1 = 2 q0",
//!     space.clone(),
//!     Box::new(double),
//!     ExplicitIndices::flat(BlockIndices::range(0, 1), BlockIndices::range(1, 1)),
//! )?;
//! let sum = AffineFunction::new(
//!     "sum",
//!     DMatrix::from_row_slice(1, 2, &[1.0, 1.0]),
//!     DVector::from_vec(vec![-3.0]),
//! )?;
//!
//! let mut solver = HybridSolver::new(space, HybridSolverConfig::default());
//! solver.add_implicit(Box::new(sum))?;
//! solver.add_explicit(explicit)?;
//! solver.explicit_solver_has_changed()?;
//!
//! let mut ctx = EvalContext::detached();
//! let q = DVector::from_vec(vec![1.0, 2.0]);
//! solver.update_jacobian(&mut ctx, &q)?;
//! assert_eq!(solver.stacked_reduced_jacobian()[(0, 0)], 3.0);
//! # Ok(())
//! # }
//! ```

pub mod explicit;
pub mod explicit_system;
pub mod hybrid;
pub mod outer_map;

pub use explicit::{ExplicitFunction, ExplicitIndices};
pub use explicit_system::ExplicitSystem;
pub use hybrid::{HybridSolver, StackEntry};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::explicit::{ExplicitFunction, ExplicitIndices};
    pub use crate::explicit_system::ExplicitSystem;
    pub use crate::hybrid::{HybridSolver, StackEntry};
    pub use crate::outer_map::{BoxedOuterMap, GenericMap, IdentityMap, OuterMap};
}
