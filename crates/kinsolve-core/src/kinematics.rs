//! Kinematics provider seam and a planar reference chain.
//!
//! The constraint engine never computes forward kinematics itself. It asks
//! a [`KinematicsProvider`] to refresh its state for a configuration and then
//! reads frame placements, frame Jacobians and the center of mass from it.
//!
//! # Jacobian convention
//!
//! A frame Jacobian is a `6 × nv` matrix. Rows `0..3` hold the linear
//! velocity of the frame origin and rows `3..6` the angular velocity of the
//! frame, both expressed in world coordinates. The center-of-mass Jacobian
//! is `3 × nv`.

use crate::{
    error::KinematicsError,
    liegroup::{ProductSpace, SpacePtr, SpecialOrthogonal2, VectorSpace},
    types::{set_column3, Configuration, DMatrix, FrameId, Scalar, Vector3},
};
use nalgebra::{Isometry3, Translation3, UnitQuaternion};
use num_traits::Float;

/// Result type for kinematics queries.
pub type KinematicsResult<T> = std::result::Result<T, KinematicsError>;

/// Supplies placements and Jacobians of a kinematic model.
pub trait KinematicsProvider<T: Scalar> {
    /// Size of a configuration.
    fn nq(&self) -> usize;

    /// Size of a velocity.
    fn nv(&self) -> usize;

    /// Number of frames that can be queried.
    fn num_frames(&self) -> usize;

    /// Stores the configuration used by the next forward kinematics pass.
    fn set_configuration(&mut self, q: &Configuration<T>) -> KinematicsResult<()>;

    /// Computes placements and Jacobians for the stored configuration.
    fn compute_forward_kinematics(&mut self) -> KinematicsResult<()>;

    /// Placement of a frame in the world.
    fn frame_placement(&self, frame: FrameId) -> KinematicsResult<Isometry3<T>>;

    /// World-aligned `6 × nv` Jacobian of a frame.
    fn frame_jacobian(&self, frame: FrameId) -> KinematicsResult<&DMatrix<T>>;

    /// Center of mass in the world.
    fn center_of_mass(&self) -> KinematicsResult<Vector3<T>>;

    /// `3 × nv` Jacobian of the center of mass.
    fn center_of_mass_jacobian(&self) -> KinematicsResult<&DMatrix<T>>;

    /// Checks that `frame` exists.
    fn check_frame(&self, frame: FrameId) -> KinematicsResult<()> {
        if frame < self.num_frames() {
            Ok(())
        } else {
            Err(KinematicsError::UnknownFrame {
                frame,
                num_frames: self.num_frames(),
            })
        }
    }
}

/// Forward kinematics results of a [`PlanarChain`].
#[derive(Debug, Clone)]
struct ChainState<T: Scalar> {
    placements: Vec<Isometry3<T>>,
    jacobians: Vec<DMatrix<T>>,
    com: Vector3<T>,
    com_jacobian: DMatrix<T>,
}

/// Serial chain of revolute joints rotating about the world z axis.
///
/// The chain is optionally mounted on a base translating in the xy plane.
/// Its configuration space is `R^2 x SO(2) x ... x SO(2)` with a base, and
/// `SO(2) x ... x SO(2)` without.
///
/// Frames are numbered `0..=n`: frame `k < n` sits on joint `k` and turns
/// with it, frame `n` is the tip of the last link. Each link carries a
/// point mass at its midpoint.
#[derive(Debug, Clone)]
pub struct PlanarChain<T: Scalar> {
    link_lengths: Vec<T>,
    masses: Vec<T>,
    floating_base: bool,
    space: SpacePtr<T>,
    q: Configuration<T>,
    state: Option<ChainState<T>>,
}

impl<T: Scalar> PlanarChain<T> {
    /// Creates a fixed-base chain with unit link masses.
    pub fn new(link_lengths: Vec<T>) -> Self {
        let masses = vec![T::one(); link_lengths.len()];
        Self::build(link_lengths, masses, false)
    }

    /// Creates a chain on a planar translating base with unit link masses.
    pub fn with_floating_base(link_lengths: Vec<T>) -> Self {
        let masses = vec![T::one(); link_lengths.len()];
        Self::build(link_lengths, masses, true)
    }

    /// Replaces the link masses.
    pub fn with_masses(self, masses: Vec<T>) -> KinematicsResult<Self> {
        if masses.len() != self.link_lengths.len() {
            return Err(KinematicsError::invalid_configuration(format!(
                "{} masses given for {} links",
                masses.len(),
                self.link_lengths.len()
            )));
        }
        if masses.iter().any(|m| *m <= T::zero()) {
            return Err(KinematicsError::invalid_configuration(
                "link masses must be positive",
            ));
        }
        Ok(Self::build(self.link_lengths, masses, self.floating_base))
    }

    fn build(link_lengths: Vec<T>, masses: Vec<T>, floating_base: bool) -> Self {
        let mut components = Vec::with_capacity(link_lengths.len() + 1);
        if floating_base {
            components.push(VectorSpace::shared::<T>(2));
        }
        components.extend(link_lengths.iter().map(|_| SpecialOrthogonal2::shared::<T>()));
        let space = ProductSpace::shared(components);
        let q = space.neutral();
        Self {
            link_lengths,
            masses,
            floating_base,
            space,
            q,
            state: None,
        }
    }

    /// Configuration space of the chain.
    pub fn config_space(&self) -> SpacePtr<T> {
        self.space.clone()
    }

    /// Number of revolute joints.
    pub fn num_joints(&self) -> usize {
        self.link_lengths.len()
    }

    /// Frame attached to the end of the last link.
    pub fn tip_frame(&self) -> FrameId {
        self.link_lengths.len()
    }

    /// Velocity index of joint `k`.
    pub fn joint_velocity_index(&self, k: usize) -> usize {
        self.base_dofs() + k
    }

    /// Configuration with the given joint angles and base position.
    pub fn configuration(&self, base: Option<(T, T)>, angles: &[T]) -> KinematicsResult<Configuration<T>> {
        if angles.len() != self.num_joints() {
            return Err(KinematicsError::invalid_configuration(format!(
                "{} angles given for {} joints",
                angles.len(),
                self.num_joints()
            )));
        }
        let mut q = Configuration::zeros(self.space.nq());
        if self.floating_base {
            let (x, y) = base.unwrap_or((T::zero(), T::zero()));
            q[0] = x;
            q[1] = y;
        }
        let offset = self.base_dofs();
        for (k, &a) in angles.iter().enumerate() {
            q[offset + 2 * k] = Float::cos(a);
            q[offset + 2 * k + 1] = Float::sin(a);
        }
        Ok(q)
    }

    fn base_dofs(&self) -> usize {
        if self.floating_base {
            2
        } else {
            0
        }
    }

    fn state(&self) -> KinematicsResult<&ChainState<T>> {
        self.state.as_ref().ok_or(KinematicsError::NotComputed)
    }
}

impl<T: Scalar> KinematicsProvider<T> for PlanarChain<T> {
    fn nq(&self) -> usize {
        self.space.nq()
    }

    fn nv(&self) -> usize {
        self.space.nv()
    }

    fn num_frames(&self) -> usize {
        self.link_lengths.len() + 1
    }

    fn set_configuration(&mut self, q: &Configuration<T>) -> KinematicsResult<()> {
        self.space
            .check_element(q.as_slice())
            .map_err(|e| KinematicsError::invalid_configuration(e.to_string()))?;
        if self.state.is_some() && self.q == *q {
            return Ok(());
        }
        self.q.copy_from(q);
        self.state = None;
        Ok(())
    }

    fn compute_forward_kinematics(&mut self) -> KinematicsResult<()> {
        if self.state.is_some() {
            return Ok(());
        }
        let n = self.num_joints();
        let nv = self.space.nv();
        let offset = self.base_dofs();

        let mut origin = if self.floating_base {
            Vector3::new(self.q[0], self.q[1], T::zero())
        } else {
            Vector3::zeros()
        };
        let mut theta = T::zero();
        let mut positions = Vec::with_capacity(n + 1);
        let mut angles = Vec::with_capacity(n + 1);
        for k in 0..n {
            theta += SpecialOrthogonal2::angle(&self.q.as_slice()[offset + 2 * k..offset + 2 * k + 2]);
            positions.push(origin);
            angles.push(theta);
            let l = self.link_lengths[k];
            origin += Vector3::new(l * Float::cos(theta), l * Float::sin(theta), T::zero());
        }
        positions.push(origin);
        angles.push(theta);

        let z = Vector3::z();
        let mut jacobians = Vec::with_capacity(n + 1);
        for (i, p_i) in positions.iter().enumerate() {
            let mut j = DMatrix::zeros(6, nv);
            if self.floating_base {
                j[(0, 0)] = T::one();
                j[(1, 1)] = T::one();
            }
            // Joint k moves frame i when k <= i, the tip is moved by every joint.
            for (k, p_k) in positions.iter().enumerate().take((i + 1).min(n)) {
                set_column3(&mut j, 0, offset + k, &z.cross(&(p_i - p_k)));
                set_column3(&mut j, 3, offset + k, &z);
            }
            jacobians.push(j);
        }

        let placements = positions
            .iter()
            .zip(&angles)
            .map(|(p, &a)| {
                Isometry3::from_parts(
                    Translation3::from(*p),
                    UnitQuaternion::from_axis_angle(&Vector3::z_axis(), a),
                )
            })
            .collect();

        let total_mass = self.masses.iter().fold(T::zero(), |acc, m| acc + *m);
        let half = <T as Scalar>::from_f64(0.5);
        let mut com = Vector3::zeros();
        let mut com_jacobian = DMatrix::zeros(3, nv);
        if total_mass > T::zero() {
            for (k, &m) in self.masses.iter().enumerate() {
                let w = m / total_mass;
                com += (positions[k] + positions[k + 1]) * (w * half);
                com_jacobian += (jacobians[k].rows(0, 3) + jacobians[k + 1].rows(0, 3)) * (w * half);
            }
        } else {
            com = positions[0];
            com_jacobian.copy_from(&jacobians[0].rows(0, 3));
        }

        self.state = Some(ChainState {
            placements,
            jacobians,
            com,
            com_jacobian,
        });
        Ok(())
    }

    fn frame_placement(&self, frame: FrameId) -> KinematicsResult<Isometry3<T>> {
        self.check_frame(frame)?;
        Ok(self.state()?.placements[frame])
    }

    fn frame_jacobian(&self, frame: FrameId) -> KinematicsResult<&DMatrix<T>> {
        self.check_frame(frame)?;
        Ok(&self.state()?.jacobians[frame])
    }

    fn center_of_mass(&self) -> KinematicsResult<Vector3<T>> {
        Ok(self.state()?.com)
    }

    fn center_of_mass_jacobian(&self) -> KinematicsResult<&DMatrix<T>> {
        Ok(&self.state()?.com_jacobian)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn evaluated(chain: &mut PlanarChain<f64>, base: Option<(f64, f64)>, angles: &[f64]) {
        let q = chain.configuration(base, angles).unwrap();
        chain.set_configuration(&q).unwrap();
        chain.compute_forward_kinematics().unwrap();
    }

    #[test]
    fn test_dimensions() {
        let chain = PlanarChain::<f64>::with_floating_base(vec![1.0, 0.5]);
        assert_eq!(chain.nq(), 6);
        assert_eq!(chain.nv(), 4);
        assert_eq!(chain.num_frames(), 3);
        assert_eq!(chain.tip_frame(), 2);
        assert_eq!(chain.joint_velocity_index(1), 3);
    }

    #[test]
    fn test_queries_before_forward_kinematics_fail() {
        let chain = PlanarChain::<f64>::new(vec![1.0]);
        assert_eq!(chain.frame_placement(0).unwrap_err(), KinematicsError::NotComputed);
        assert_eq!(
            chain.frame_jacobian(5).unwrap_err(),
            KinematicsError::UnknownFrame { frame: 5, num_frames: 2 }
        );
    }

    #[test]
    fn test_invalid_configuration_is_rejected() {
        let mut chain = PlanarChain::<f64>::new(vec![1.0]);
        let err = chain
            .set_configuration(&Configuration::from_vec(vec![2.0, 0.0]))
            .unwrap_err();
        assert!(matches!(err, KinematicsError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_tip_placement() {
        let mut chain = PlanarChain::with_floating_base(vec![1.0, 1.0]);
        evaluated(&mut chain, Some((0.5, 0.0)), &[FRAC_PI_2, -FRAC_PI_2]);
        let tip = chain.frame_placement(chain.tip_frame()).unwrap();
        assert_relative_eq!(tip.translation.vector, Vector3::new(1.5, 1.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(tip.rotation.angle(), 0.0, epsilon = 1e-12);

        let joint1 = chain.frame_placement(1).unwrap();
        assert_relative_eq!(joint1.translation.vector, Vector3::new(0.5, 1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_tip_jacobian_columns() {
        let mut chain = PlanarChain::new(vec![1.0, 1.0]);
        evaluated(&mut chain, None, &[0.0, 0.0]);
        let j = chain.frame_jacobian(chain.tip_frame()).unwrap();
        // Rotating joint 0 moves the tip (2, 0) along +y at rate 2.
        assert_relative_eq!(j[(1, 0)], 2.0);
        assert_relative_eq!(j[(1, 1)], 1.0);
        assert_relative_eq!(j[(5, 0)], 1.0);
        assert_relative_eq!(j[(5, 1)], 1.0);

        // Joint 1 does not move frame 0.
        let j0 = chain.frame_jacobian(0).unwrap();
        assert_relative_eq!(j0.column(1).norm(), 0.0);
    }

    #[test]
    fn test_center_of_mass() {
        let mut chain = PlanarChain::new(vec![2.0, 2.0])
            .with_masses(vec![1.0, 3.0])
            .unwrap();
        evaluated(&mut chain, None, &[0.0, 0.0]);
        // Midpoints at x = 1 and x = 3, weights 1/4 and 3/4.
        assert_relative_eq!(chain.center_of_mass().unwrap(), Vector3::new(2.5, 0.0, 0.0), epsilon = 1e-12);
        let jc = chain.center_of_mass_jacobian().unwrap();
        assert_relative_eq!(jc[(1, 0)], 2.5, epsilon = 1e-12);
        assert_relative_eq!(jc[(1, 1)], 0.75, epsilon = 1e-12);
    }

    #[test]
    fn test_bad_masses() {
        let chain = PlanarChain::<f64>::new(vec![1.0, 1.0]);
        assert!(chain.clone().with_masses(vec![1.0]).is_err());
        assert!(chain.with_masses(vec![1.0, 0.0]).is_err());
    }
}
