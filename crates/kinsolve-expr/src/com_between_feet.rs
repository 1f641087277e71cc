//! Keeps the center of mass between two contact points.

use crate::{expression::ExpressionGraph, symbolic::SymbolicFunction};
use kinsolve_core::{
    error::Result,
    kinematics::KinematicsProvider,
    mask::Mask,
    types::{FrameId, Scalar, Vector3},
};

/// A point attached to a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePoint<T: Scalar> {
    /// Frame the point is attached to
    pub frame: FrameId,
    /// Coordinates in the frame
    pub local: Vector3<T>,
}

impl<T: Scalar> FramePoint<T> {
    /// Point with coordinates `local` in `frame`.
    pub fn new(frame: FrameId, local: Vector3<T>) -> Self {
        Self { frame, local }
    }

    /// Origin of `frame`.
    pub fn origin(frame: FrameId) -> Self {
        Self::new(frame, Vector3::zeros())
    }
}

/// Builder of the center-of-mass-between-feet constraint.
///
/// With `x` the center of mass, `x_L` and `x_R` the left and right contact
/// points, `u = x_L - x_R` and `e = x - (x_L + x_R) / 2`, the rows are:
///
/// 1. `(R_refᵀ (e × u))_z`: the center of mass lies in the vertical plane
///    containing both feet, measured in the reference frame
/// 2. `(x - x_R) · u`: positive when the center of mass is past the right foot
/// 3. `-(x - x_L) · u`: positive when the center of mass is before the left foot
///
/// The first row is meant as an equality, the other two as inequalities.
/// `mask` selects which of the three rows are exposed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComBetweenFeet;

impl ComBetweenFeet {
    /// Builds the constraint for the model of `kinematics`.
    pub fn build<T: Scalar, S: Into<String>>(
        name: S,
        kinematics: &dyn KinematicsProvider<T>,
        left: FramePoint<T>,
        right: FramePoint<T>,
        reference: FrameId,
        mask: &Mask,
    ) -> Result<SymbolicFunction<T>> {
        mask.check_length(3)?;
        let half = <T as Scalar>::from_f64(0.5);

        let mut g = ExpressionGraph::for_model(kinematics);
        let x = g.center_of_mass();
        let x_l = g.point_in_frame(left.frame, left.local)?;
        let x_r = g.point_in_frame(right.frame, right.local)?;

        let u = g.difference(x_l, x_r)?;
        let feet = g.sum(x_l, x_r)?;
        let middle = g.scalar_multiply(half, feet)?;
        let e = g.difference(x, middle)?;
        let e_cross_u = g.cross(e, u)?;
        let in_reference = g.rotate_transpose(reference, e_cross_u)?;

        let from_right = g.difference(x, x_r)?;
        let past_right = g.dot(from_right, u)?;
        let from_left = g.difference(x, x_l)?;
        let along_left = g.dot(from_left, u)?;
        let before_left = g.scalar_multiply(-T::one(), along_left)?;

        // Rows 0 and 1 of the rotated cross product are never exposed.
        let root = g.stack(&[in_reference, past_right, before_left])?;
        let mut bits = vec![false, false];
        bits.extend_from_slice(mask.bits());

        SymbolicFunction::new(name, kinematics.nq(), g, root, Mask::new(bits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use kinsolve_core::{
        function::{DifferentiableFunction, EvalContext},
        test_utils::FixedFrameKinematics,
        types::{DMatrix, DVector},
    };
    use nalgebra::Isometry3;

    #[test]
    fn test_rows_for_centered_com() {
        let mut kin = FixedFrameKinematics::<f64>::new(1);
        let root = kin.add_frame(Isometry3::identity());
        let left = kin.add_frame(Isometry3::translation(0.0, 0.1, 0.0));
        let right = kin.add_frame(Isometry3::translation(0.0, -0.1, 0.0));
        kin.set_center_of_mass(Vector3::new(0.0, 0.05, 0.8), DMatrix::zeros(3, 1));

        let mut f = ComBetweenFeet::build::<f64, _>(
            "com between feet",
            &kin,
            FramePoint::origin(left),
            FramePoint::origin(right),
            root,
            &Mask::all(3),
        )
        .unwrap();
        assert_eq!(f.output_size(), 3);

        let mut value = f.new_output();
        f.value(&mut EvalContext::new(&mut kin), &DVector::zeros(1), &mut value)
            .unwrap();
        // u = (0, 0.2, 0), e = (0, 0.05, 0.8), e × u has no z component.
        assert_relative_eq!(value[0], 0.0, epsilon = 1e-14);
        assert_relative_eq!(value[1], 0.15 * 0.2, epsilon = 1e-14);
        assert_relative_eq!(value[2], 0.05 * 0.2, epsilon = 1e-14);
    }

    #[test]
    fn test_mask_selects_rows() {
        let mut kin = FixedFrameKinematics::<f64>::new(1);
        let frame = kin.add_frame(Isometry3::identity());
        let f = ComBetweenFeet::build::<f64, _>(
            "inequalities",
            &kin,
            FramePoint::origin(frame),
            FramePoint::origin(frame),
            frame,
            &Mask::new(vec![false, true, true]),
        )
        .unwrap();
        assert_eq!(f.output_size(), 2);
        assert_eq!(f.mask().len(), 5);

        let bad = ComBetweenFeet::build::<f64, _>(
            "bad",
            &kin,
            FramePoint::origin(0),
            FramePoint::origin(0),
            0,
            &Mask::all(2),
        );
        assert!(matches!(bad, Err(kinsolve_core::ConstraintError::InvalidMask { .. })));
    }
}
