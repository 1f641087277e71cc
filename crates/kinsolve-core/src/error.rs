//! Error types for constraint evaluation and hybrid solving.
//!
//! This module defines the engine error type together with the error types
//! of the two external collaborators (kinematics provider and Lie-group
//! primitives). Collaborator errors are wrapped transparently so that they
//! reach the caller unchanged.

use thiserror::Error;

/// Errors raised by a kinematics provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KinematicsError {
    /// The configuration handed to the provider is malformed.
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Description of why the configuration is invalid
        reason: String,
    },

    /// A frame index does not exist in the model.
    #[error("Unknown frame {frame} (model has {num_frames} frames)")]
    UnknownFrame {
        /// Requested frame
        frame: usize,
        /// Number of frames of the model
        num_frames: usize,
    },

    /// A placement or Jacobian was queried before forward kinematics ran.
    #[error("Forward kinematics has not been computed for the current configuration")]
    NotComputed,
}

impl KinematicsError {
    /// Create an InvalidConfiguration error with a custom reason.
    pub fn invalid_configuration<S: Into<String>>(reason: S) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }
}

/// Errors raised by Lie-group primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LieGroupError {
    /// An element does not belong to the space.
    #[error("Element is not in {space}: {reason}")]
    InvalidElement {
        /// Name of the space
        space: String,
        /// Description of the violation
        reason: String,
    },

    /// Argument sizes do not match the space.
    #[error("Size mismatch in {space}: expected {expected}, got {actual}")]
    SizeMismatch {
        /// Name of the space
        space: String,
        /// Expected size
        expected: usize,
        /// Actual size
        actual: usize,
    },
}

/// Errors that can occur while building or evaluating constraints.
#[derive(Debug, Clone, Error)]
pub enum ConstraintError {
    /// Dimension mismatch between a declared size and an argument or buffer.
    ///
    /// This is a construction error when detected while assembling functions
    /// or stacks, and a caller error when a buffer of the wrong shape is
    /// handed to an evaluation.
    #[error("Dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Where the mismatch was detected
        context: String,
        /// Expected dimensions
        expected: String,
        /// Actual dimensions
        actual: String,
    },

    /// A row mask does not fit the output it selects from.
    #[error("Invalid mask: {reason}")]
    InvalidMask {
        /// Description of the problem
        reason: String,
    },

    /// An index set is malformed or out of bounds.
    #[error("Invalid index set: {reason}")]
    InvalidIndexSet {
        /// Description of the problem
        reason: String,
    },

    /// Two index sets that must be disjoint share indices.
    #[error("Overlapping indices between {first} and {second}")]
    OverlappingIndices {
        /// Description of the first set
        first: String,
        /// Description of the second set
        second: String,
    },

    /// A node id does not belong to the expression graph it is used with.
    #[error("Unknown expression node {node} (graph has {len} nodes)")]
    UnknownNode {
        /// Requested node
        node: usize,
        /// Number of nodes of the graph
        len: usize,
    },

    /// The explicit functions feed each other in a cycle.
    #[error("Explicit functions form an elimination cycle: {}", .functions.join(" -> "))]
    EliminationCycle {
        /// Names of the functions involved in the cycle
        functions: Vec<String>,
    },

    /// The explicit partition changed since the reduction was last rebuilt.
    #[error("Explicit system changed (revision {current}) since the reduction was built (revision {built}); call explicit_solver_has_changed")]
    StaleReduction {
        /// Revision the reduction was built for
        built: u64,
        /// Current revision of the explicit system
        current: u64,
    },

    /// The Jacobian of an outer map cannot be inverted.
    #[error("Outer map Jacobian of {function} is singular (pivot {pivot:e})")]
    SingularOuterMap {
        /// Name of the explicit function
        function: String,
        /// Smallest pivot magnitude encountered
        pivot: f64,
    },

    /// A kinematic function was evaluated without a kinematics provider.
    #[error("Function {function} needs a kinematics provider but the evaluation context has none")]
    MissingKinematics {
        /// Name of the function
        function: String,
    },

    /// Method or feature not available for this function.
    #[error("Feature not implemented: {feature}")]
    NotImplemented {
        /// Name of the unimplemented feature
        feature: String,
    },

    /// Propagated kinematics provider error.
    #[error(transparent)]
    Kinematics(#[from] KinematicsError),

    /// Propagated Lie-group error.
    #[error(transparent)]
    LieGroup(#[from] LieGroupError),
}

impl ConstraintError {
    /// Create a DimensionMismatch error.
    pub fn dimension_mismatch<C, S1, S2>(context: C, expected: S1, actual: S2) -> Self
    where
        C: Into<String>,
        S1: std::fmt::Display,
        S2: std::fmt::Display,
    {
        Self::DimensionMismatch {
            context: context.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create an InvalidMask error.
    pub fn invalid_mask<S: Into<String>>(reason: S) -> Self {
        Self::InvalidMask {
            reason: reason.into(),
        }
    }

    /// Create an InvalidIndexSet error.
    pub fn invalid_index_set<S: Into<String>>(reason: S) -> Self {
        Self::InvalidIndexSet {
            reason: reason.into(),
        }
    }

    /// Create an OverlappingIndices error.
    pub fn overlapping<S1: Into<String>, S2: Into<String>>(first: S1, second: S2) -> Self {
        Self::OverlappingIndices {
            first: first.into(),
            second: second.into(),
        }
    }

    /// Create a MissingKinematics error for a function.
    pub fn missing_kinematics<S: Into<String>>(function: S) -> Self {
        Self::MissingKinematics {
            function: function.into(),
        }
    }

    /// Create a NotImplemented error for a specific feature.
    pub fn not_implemented<S: Into<String>>(feature: S) -> Self {
        Self::NotImplemented {
            feature: feature.into(),
        }
    }
}

/// Result type alias for constraint operations.
pub type Result<T> = std::result::Result<T, ConstraintError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = ConstraintError::dimension_mismatch("jacobian", "(3, 4)", "(3, 5)");
        assert!(matches!(err, ConstraintError::DimensionMismatch { .. }));
        assert_eq!(
            err.to_string(),
            "Dimension mismatch in jacobian: expected (3, 4), got (3, 5)"
        );

        let err = ConstraintError::invalid_mask("length 2 for 3 rows");
        assert_eq!(err.to_string(), "Invalid mask: length 2 for 3 rows");
    }

    #[test]
    fn test_cycle_message_lists_functions() {
        let err = ConstraintError::EliminationCycle {
            functions: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(
            err.to_string(),
            "Explicit functions form an elimination cycle: a -> b -> a"
        );
    }

    #[test]
    fn test_collaborator_errors_are_transparent() {
        let inner = KinematicsError::invalid_configuration("joint 2 is not a unit complex");
        let err: ConstraintError = inner.clone().into();
        assert_eq!(err.to_string(), inner.to_string());
        match err {
            ConstraintError::Kinematics(e) => assert_eq!(e, inner),
            other => panic!("unexpected variant {other:?}"),
        }

        let inner = LieGroupError::SizeMismatch {
            space: "R^3".into(),
            expected: 3,
            actual: 2,
        };
        let err: ConstraintError = inner.clone().into();
        assert_eq!(err.to_string(), "Size mismatch in R^3: expected 3, got 2");
    }

    #[test]
    fn test_error_display() {
        let errors = vec![
            ConstraintError::invalid_index_set("index 7 out of bounds for dimension 5"),
            ConstraintError::overlapping("input velocity", "output velocity"),
            ConstraintError::StaleReduction { built: 1, current: 2 },
            ConstraintError::SingularOuterMap {
                function: "g".into(),
                pivot: 1e-20,
            },
            ConstraintError::missing_kinematics("com"),
            ConstraintError::UnknownNode { node: 4, len: 2 },
            ConstraintError::not_implemented("inverse outer map"),
            KinematicsError::NotComputed.into(),
            KinematicsError::UnknownFrame {
                frame: 9,
                num_frames: 3,
            }
            .into(),
        ];

        for err in errors {
            assert!(!err.to_string().is_empty());
        }
    }
}
