//! Position of a point attached to a frame, relative to a target.

use crate::{expression::ExpressionGraph, symbolic::SymbolicFunction};
use kinsolve_core::{
    error::Result,
    kinematics::KinematicsProvider,
    mask::Mask,
    types::{FrameId, Scalar, Vector3},
};

/// Builder of the point-position constraint `M_f · local - target`.
///
/// The value is expressed in world coordinates and the Jacobian is
/// `J_lin - (R_f · local) × J_ω`. `mask` selects the exposed axes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PointPosition;

impl PointPosition {
    /// Builds the constraint for the model of `kinematics`.
    pub fn build<T: Scalar, S: Into<String>>(
        name: S,
        kinematics: &dyn KinematicsProvider<T>,
        frame: FrameId,
        local: Vector3<T>,
        target: Vector3<T>,
        mask: &Mask,
    ) -> Result<SymbolicFunction<T>> {
        mask.check_length(3)?;
        let mut g = ExpressionGraph::for_model(kinematics);
        let point = g.point_in_frame(frame, local)?;
        let target = g.constant3(target);
        let root = g.difference(point, target)?;
        SymbolicFunction::new(name, kinematics.nq(), g, root, mask.clone())
    }
}
