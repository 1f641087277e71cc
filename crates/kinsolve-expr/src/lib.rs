//! Composite kinematic expressions for constraint functions.
//!
//! This crate builds kinematic quantities (points attached to frames, the
//! center of mass, their sums, cross products, rotations...) as nodes of an
//! [`ExpressionGraph`](expression::ExpressionGraph). Values and Jacobians
//! are combined by the chain rule and cached per evaluation round, so that
//! a sub-expression shared by several parents is computed once.
//!
//! A [`SymbolicFunction`](symbolic::SymbolicFunction) wraps a graph and a
//! row mask into a differentiable function of the robot configuration.
//!
//! # Example
//!
//! ```
//! use kinsolve_core::prelude::*;
//! use kinsolve_expr::prelude::*;
//!
//! # fn main() -> kinsolve_core::Result<()> {
//! let mut chain = PlanarChain::<f64>::new(vec![1.0, 0.5]);
//! let tip = chain.tip_frame();
//! let mut f = PointPosition::build::<f64, _>(
//!     "tip on target",
//!     &chain,
//!     tip,
//!     Vector3::zeros(),
//!     Vector3::new(1.0, 0.5, 0.0),
//!     &Mask::all(3),
//! )?;
//!
//! let q = chain.configuration(None, &[0.3, 0.2])?;
//! let mut ctx = EvalContext::new(&mut chain);
//! let mut residual = f.new_output();
//! f.value(&mut ctx, &q, &mut residual)?;
//! # Ok(())
//! # }
//! ```

pub mod com_between_feet;
pub mod expression;
pub mod position;
pub mod symbolic;

pub use expression::{ExpressionGraph, NodeId, NodeKind};
pub use symbolic::SymbolicFunction;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::com_between_feet::{ComBetweenFeet, FramePoint};
    pub use crate::expression::{ExpressionGraph, NodeId, NodeKind};
    pub use crate::position::PointPosition;
    pub use crate::symbolic::SymbolicFunction;
}
