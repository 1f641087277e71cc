//! Core traits and types for kinematic constraint solving.
//!
//! This crate provides the foundations shared by the expression framework
//! and the hybrid solver: the scalar trait, configuration spaces with
//! Lie-group structure, the kinematics provider seam, and the contract of a
//! differentiable function of a robot configuration.
//!
//! # Key Concepts
//!
//! - **Configuration space**: a possibly non-flat space; configurations have
//!   `nq` coordinates and velocities `nv`
//! - **Differentiable function**: maps a configuration to a value and gives
//!   its Jacobian with respect to the velocity
//! - **Index views**: ordered disjoint segments selecting sub-vectors and
//!   sub-blocks without dense copies
//! - **Masks**: row selections exposing part of a function output
//!
//! # Modules
//!
//! - [`config`]: Solver and finite-difference configuration
//! - [`configuration_constraint`]: Weighted distance to a goal configuration
//! - [`derivative_check`]: Finite-difference verification of Jacobians
//! - [`error`]: Error types
//! - [`function`]: Differentiable function contract and evaluation context
//! - [`kinematics`]: Kinematics provider trait and planar reference chain
//! - [`liegroup`]: Configuration spaces
//! - [`mask`]: Row masks
//! - [`segments`]: Index views over configuration and velocity vectors
//! - [`types`]: Type aliases and numerical constants

pub mod config;
pub mod configuration_constraint;
pub mod derivative_check;
pub mod error;
pub mod function;
pub mod kinematics;
pub mod liegroup;
pub mod mask;
pub mod segments;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export commonly used items at the crate root
pub use error::{ConstraintError, KinematicsError, LieGroupError, Result};

/// Prelude module for convenient imports.
///
/// # Example
/// ```
/// use kinsolve_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{FiniteDifferenceConfig, HybridSolverConfig, HybridSolverConfigBuilder};
    pub use crate::configuration_constraint::ConfigurationConstraint;
    pub use crate::derivative_check::DerivativeChecker;
    pub use crate::error::{ConstraintError, KinematicsError, LieGroupError, Result};
    pub use crate::function::{
        AffineFunction, BoxedFunction, ConstantFunction, DifferentiableFunction, EvalContext,
    };
    pub use crate::kinematics::{KinematicsProvider, PlanarChain};
    pub use crate::liegroup::{
        DifferenceArg, LieGroupSpace, ProductSpace, SpacePtr, SpecialOrthogonal2, VectorSpace,
    };
    pub use crate::mask::Mask;
    pub use crate::segments::{BlockIndices, Segment};
    pub use crate::types::{
        constants, Configuration, DMatrix, DVector, FrameId, Matrix3, Scalar, TangentVector,
        Vector3,
    };
}
