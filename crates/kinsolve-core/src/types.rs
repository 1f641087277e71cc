//! Type definitions and aliases for kinematic constraint solving.
//!
//! This module provides the scalar trait shared by every crate of the
//! workspace, the nalgebra aliases used for configurations, tangent vectors
//! and Jacobians, and a handful of small 3D helpers.

use nalgebra::{OMatrix, OVector, RealField, Scalar as NalgebraScalar, Dyn};
use num_traits::{Float, FromPrimitive};
use std::fmt::{Debug, Display};

/// Trait for scalar types used by constraint functions (f32 or f64).
///
/// This trait combines all the numeric traits required to evaluate
/// residuals and Jacobians, and carries the tolerances used throughout the
/// engine.
pub trait Scalar:
    NalgebraScalar
    + RealField
    + Float
    + FromPrimitive
    + Display
    + Debug
    + Default
    + Copy
    + Send
    + Sync
    + 'static
{
    /// Machine epsilon for this scalar type.
    const EPSILON: Self;

    /// Default relative tolerance for comparisons.
    const DEFAULT_TOLERANCE: Self;

    /// Step used by central finite differences.
    const FINITE_DIFFERENCE_STEP: Self;

    /// Pivot magnitude below which a Jacobian is treated as singular.
    const SINGULARITY_TOLERANCE: Self;

    /// Tolerance on the norm of unit elements (rotations).
    const UNIT_NORM_TOLERANCE: Self;

    /// Convert from f64 (for constants).
    ///
    /// # Panics
    ///
    /// Panics if the conversion fails. Use `try_from_f64` for a non-panicking version.
    fn from_f64(v: f64) -> Self {
        <Self as FromPrimitive>::from_f64(v).expect("Failed to convert from f64")
    }

    /// Try to convert from f64.
    fn try_from_f64(v: f64) -> Option<Self> {
        <Self as FromPrimitive>::from_f64(v)
    }

    /// Convert to f64 (for logging/display).
    ///
    /// # Panics
    ///
    /// Panics if the conversion fails.
    fn to_f64(self) -> f64 {
        num_traits::cast(self).expect("Failed to convert to f64")
    }
}

impl Scalar for f32 {
    const EPSILON: Self = f32::EPSILON;
    const DEFAULT_TOLERANCE: Self = 1e-4;
    const FINITE_DIFFERENCE_STEP: Self = 1e-3;
    const SINGULARITY_TOLERANCE: Self = 1e-6;
    const UNIT_NORM_TOLERANCE: Self = 1e-4;
}

impl Scalar for f64 {
    const EPSILON: Self = f64::EPSILON;
    const DEFAULT_TOLERANCE: Self = 1e-6;
    const FINITE_DIFFERENCE_STEP: Self = 1e-6;
    const SINGULARITY_TOLERANCE: Self = 1e-12;
    const UNIT_NORM_TOLERANCE: Self = 1e-8;
}

/// Type alias for a dynamically-sized matrix (Jacobians).
pub type DMatrix<T> = OMatrix<T, Dyn, Dyn>;

/// Type alias for a dynamically-sized vector (configurations, residuals).
pub type DVector<T> = OVector<T, Dyn>;

/// A configuration of the robot (`nq` coordinates).
pub type Configuration<T> = DVector<T>;

/// A tangent (velocity) vector (`nv` coordinates).
pub type TangentVector<T> = DVector<T>;

/// 3D vector.
pub type Vector3<T> = nalgebra::Vector3<T>;

/// 3x3 matrix.
pub type Matrix3<T> = nalgebra::Matrix3<T>;

/// Index of a frame known to a kinematics provider.
pub type FrameId = usize;

/// Returns the skew-symmetric matrix `[v]×` such that `[v]× w = v × w`.
pub fn skew<T: Scalar>(v: &Vector3<T>) -> Matrix3<T> {
    Matrix3::new(
        T::zero(),
        -v.z,
        v.y,
        v.z,
        T::zero(),
        -v.x,
        -v.y,
        v.x,
        T::zero(),
    )
}

/// Reads rows `row..row + 3` of column `col` as a 3D vector.
#[inline]
pub fn column3<T: Scalar>(m: &DMatrix<T>, row: usize, col: usize) -> Vector3<T> {
    Vector3::new(m[(row, col)], m[(row + 1, col)], m[(row + 2, col)])
}

/// Writes a 3D vector into rows `row..row + 3` of column `col`.
#[inline]
pub fn set_column3<T: Scalar>(m: &mut DMatrix<T>, row: usize, col: usize, v: &Vector3<T>) {
    m[(row, col)] = v.x;
    m[(row + 1, col)] = v.y;
    m[(row + 2, col)] = v.z;
}

/// Reads the first three entries of a vector.
#[inline]
pub fn vector3<T: Scalar>(v: &DVector<T>) -> Vector3<T> {
    Vector3::new(v[0], v[1], v[2])
}

/// Largest absolute entry of a matrix, zero when empty.
pub fn max_abs<T: Scalar>(m: &DMatrix<T>) -> T {
    m.iter()
        .map(|x| <T as Float>::abs(*x))
        .fold(T::zero(), |a, b| <T as Float>::max(a, b))
}

/// Numerical constants for different precision levels.
pub mod constants {
    use super::Scalar;

    /// Get machine epsilon for the given scalar type.
    pub fn epsilon<T: Scalar>() -> T {
        T::EPSILON
    }

    /// Get default comparison tolerance.
    pub fn default_tolerance<T: Scalar>() -> T {
        T::DEFAULT_TOLERANCE
    }

    /// Get the central finite-difference step.
    pub fn finite_difference_step<T: Scalar>() -> T {
        T::FINITE_DIFFERENCE_STEP
    }

    /// Get the singularity threshold.
    pub fn singularity_tolerance<T: Scalar>() -> T {
        T::SINGULARITY_TOLERANCE
    }

    /// Pi constant.
    pub fn pi<T: Scalar>() -> T {
        <T as Scalar>::from_f64(std::f64::consts::PI)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_scalar_trait_f64() {
        assert_eq!(<f64 as Scalar>::EPSILON, f64::EPSILON);
        assert!(f64::DEFAULT_TOLERANCE > 0.0);
        assert!(f64::SINGULARITY_TOLERANCE < f64::DEFAULT_TOLERANCE);
        assert!(f64::FINITE_DIFFERENCE_STEP > f64::EPSILON);
    }

    #[test]
    fn test_scalar_conversions() {
        let val_f32 = <f32 as Scalar>::from_f64(3.14159);
        assert_relative_eq!(f64::from(val_f32), 3.14159, epsilon = 1e-6);
        assert_relative_eq!(val_f32.to_f64(), f64::from(val_f32));
    }

    #[test]
    fn test_skew_matches_cross_product() {
        let a = Vector3::new(1.0, -2.0, 0.5);
        let b = Vector3::new(0.3, 4.0, -1.0);
        assert_relative_eq!(skew(&a) * b, a.cross(&b), epsilon = 1e-14);
        assert_relative_eq!(skew(&a).transpose(), -skew(&a));
    }

    #[test]
    fn test_column_helpers() {
        let mut m = DMatrix::<f64>::zeros(6, 2);
        set_column3(&mut m, 3, 1, &Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(column3(&m, 3, 1), Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(column3(&m, 0, 1), Vector3::zeros());
        assert_relative_eq!(max_abs(&m), 3.0);
    }
}
