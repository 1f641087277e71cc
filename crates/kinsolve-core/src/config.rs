//! Runtime configuration of the solver and of derivative checks.

use crate::types::Scalar;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration of a hybrid solver.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HybridSolverConfig<T: Scalar> {
    /// Emit `trace` events with the compressed explicit Jacobian and every
    /// reduced Jacobian on each update.
    pub trace_jacobians: bool,
    /// Pivot magnitude below which the Jacobian of an outer map is
    /// considered singular.
    pub singularity_tolerance: T,
}

impl<T: Scalar> Default for HybridSolverConfig<T> {
    fn default() -> Self {
        Self {
            trace_jacobians: false,
            singularity_tolerance: T::SINGULARITY_TOLERANCE,
        }
    }
}

impl<T: Scalar> HybridSolverConfig<T> {
    /// Start building a configuration from the defaults.
    pub fn builder() -> HybridSolverConfigBuilder<T> {
        HybridSolverConfigBuilder::new()
    }
}

/// Builder for [`HybridSolverConfig`].
#[derive(Debug, Clone)]
pub struct HybridSolverConfigBuilder<T: Scalar> {
    config: HybridSolverConfig<T>,
}

impl<T: Scalar> HybridSolverConfigBuilder<T> {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: HybridSolverConfig::default(),
        }
    }

    /// Enable or disable Jacobian tracing.
    pub fn trace_jacobians(mut self, enabled: bool) -> Self {
        self.config.trace_jacobians = enabled;
        self
    }

    /// Set the singularity threshold of outer maps.
    pub fn singularity_tolerance(mut self, tolerance: T) -> Self {
        self.config.singularity_tolerance = tolerance;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> HybridSolverConfig<T> {
        self.config
    }
}

impl<T: Scalar> Default for HybridSolverConfigBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration of central finite-difference checks.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FiniteDifferenceConfig<T: Scalar> {
    /// Step along each tangent direction.
    pub step: T,
    /// Largest accepted relative error.
    pub tolerance: T,
}

impl<T: Scalar> Default for FiniteDifferenceConfig<T> {
    fn default() -> Self {
        Self {
            step: T::FINITE_DIFFERENCE_STEP,
            tolerance: T::DEFAULT_TOLERANCE,
        }
    }
}

impl<T: Scalar> FiniteDifferenceConfig<T> {
    /// Set the step.
    pub fn with_step(mut self, step: T) -> Self {
        self.step = step;
        self
    }

    /// Set the tolerance.
    pub fn with_tolerance(mut self, tolerance: T) -> Self {
        self.tolerance = tolerance;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = HybridSolverConfig::<f64>::builder()
            .trace_jacobians(true)
            .singularity_tolerance(1e-9)
            .build();
        assert!(config.trace_jacobians);
        assert_eq!(config.singularity_tolerance, 1e-9);
        assert!(!HybridSolverConfig::<f64>::default().trace_jacobians);
    }

    #[test]
    fn test_finite_difference_defaults() {
        let config = FiniteDifferenceConfig::<f64>::default().with_tolerance(1e-5);
        assert_eq!(config.step, f64::FINITE_DIFFERENCE_STEP);
        assert_eq!(config.tolerance, 1e-5);
    }
}
