//! # kinsolve
//!
//! Hybrid explicit/implicit kinematic constraint engine.
//!
//! Robot motion constraints (a foot on the ground, a hand on a handle, the
//! center of mass above the support polygon) are written as differentiable
//! functions of the configuration. Some of them can be solved in closed form
//! for part of the variables: those are explicit and eliminate variables.
//! The others stay implicit and are differentiated only with respect to the
//! free variables that remain.
//!
//! This crate re-exports the three layers:
//!
//! - [`kinsolve_core`]: configuration spaces, index views, the function contract and
//!   the kinematics seam
//! - [`kinsolve_expr`]: composite kinematic expressions and symbolic functions
//! - [`kinsolve_solver`]: explicit functions, explicit systems and the hybrid solver
//!
//! # Example
//!
//! ```
//! use kinsolve::prelude::*;
//!
//! # fn main() -> kinsolve::Result<()> {
//! let mut chain = PlanarChain::<f64>::new(vec![1.0, 0.5]);
//! let reach = PointPosition::build::<f64, _>(
//!     "tip",
//!     &chain,
//!     chain.tip_frame(),
//!     Vector3::zeros(),
//!     Vector3::new(1.0, 0.5, 0.0),
//!     &Mask::new(vec![true, true, false]),
//! )?;
//!
//! let mut solver = HybridSolver::new(chain.config_space(), HybridSolverConfig::default());
//! solver.add_implicit(Box::new(reach))?;
//! solver.explicit_solver_has_changed()?;
//!
//! let q = chain.configuration(None, &[0.2, 0.4])?;
//! let mut ctx = EvalContext::new(&mut chain);
//! solver.update_jacobian(&mut ctx, &q)?;
//! assert_eq!(solver.stacked_reduced_jacobian().shape(), (2, 2));
//! # Ok(())
//! # }
//! ```

pub use kinsolve_core;
pub use kinsolve_expr;
pub use kinsolve_solver;
pub use nalgebra;

pub use kinsolve_core::{ConstraintError, KinematicsError, LieGroupError, Result};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use kinsolve_core::prelude::*;
    pub use kinsolve_expr::prelude::*;
    pub use kinsolve_solver::prelude::*;
}
