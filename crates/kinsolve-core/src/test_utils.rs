//! Shared test utilities: a hand-driven kinematics provider and random
//! configurations.

#![cfg(any(test, feature = "test-utils"))]

use crate::{
    error::KinematicsError,
    kinematics::{KinematicsProvider, KinematicsResult},
    liegroup::LieGroupSpace,
    types::{Configuration, DMatrix, DVector, FrameId, Scalar, Vector3},
};
use nalgebra::Isometry3;
use rand::prelude::*;

/// Kinematics provider whose placements and Jacobians are set by hand.
///
/// The configuration space is ℝⁿ and the stored quantities do not depend
/// on the configuration, which makes it convenient for checking caching
/// behavior: change a placement between two evaluations and see whether a
/// cache picks it up.
#[derive(Debug, Clone)]
pub struct FixedFrameKinematics<T: Scalar> {
    nv: usize,
    placements: Vec<Isometry3<T>>,
    jacobians: Vec<DMatrix<T>>,
    com: Vector3<T>,
    com_jacobian: DMatrix<T>,
    q: Configuration<T>,
    forward_kinematics_calls: usize,
}

impl<T: Scalar> FixedFrameKinematics<T> {
    /// Provider over ℝⁿ with no frames and a zero center of mass.
    pub fn new(nv: usize) -> Self {
        Self {
            nv,
            placements: Vec::new(),
            jacobians: Vec::new(),
            com: Vector3::zeros(),
            com_jacobian: DMatrix::zeros(3, nv),
            q: Configuration::zeros(nv),
            forward_kinematics_calls: 0,
        }
    }

    /// Adds a frame with zero Jacobian.
    pub fn add_frame(&mut self, placement: Isometry3<T>) -> FrameId {
        self.placements.push(placement);
        self.jacobians.push(DMatrix::zeros(6, self.nv));
        self.placements.len() - 1
    }

    /// Replaces the placement of a frame.
    pub fn set_placement(&mut self, frame: FrameId, placement: Isometry3<T>) {
        self.placements[frame] = placement;
    }

    /// Replaces the Jacobian of a frame.
    pub fn set_jacobian(&mut self, frame: FrameId, jacobian: DMatrix<T>) {
        assert_eq!(jacobian.shape(), (6, self.nv));
        self.jacobians[frame] = jacobian;
    }

    /// Replaces the center of mass and its Jacobian.
    pub fn set_center_of_mass(&mut self, com: Vector3<T>, jacobian: DMatrix<T>) {
        assert_eq!(jacobian.shape(), (3, self.nv));
        self.com = com;
        self.com_jacobian = jacobian;
    }

    /// Last configuration received.
    pub fn configuration(&self) -> &Configuration<T> {
        &self.q
    }

    /// Number of forward kinematics passes requested so far.
    pub fn forward_kinematics_calls(&self) -> usize {
        self.forward_kinematics_calls
    }
}

impl<T: Scalar> KinematicsProvider<T> for FixedFrameKinematics<T> {
    fn nq(&self) -> usize {
        self.nv
    }

    fn nv(&self) -> usize {
        self.nv
    }

    fn num_frames(&self) -> usize {
        self.placements.len()
    }

    fn set_configuration(&mut self, q: &Configuration<T>) -> KinematicsResult<()> {
        if q.len() != self.nv {
            return Err(KinematicsError::invalid_configuration(format!(
                "expected {} coordinates, got {}",
                self.nv,
                q.len()
            )));
        }
        self.q.copy_from(q);
        Ok(())
    }

    fn compute_forward_kinematics(&mut self) -> KinematicsResult<()> {
        self.forward_kinematics_calls += 1;
        Ok(())
    }

    fn frame_placement(&self, frame: FrameId) -> KinematicsResult<Isometry3<T>> {
        self.check_frame(frame)?;
        Ok(self.placements[frame])
    }

    fn frame_jacobian(&self, frame: FrameId) -> KinematicsResult<&DMatrix<T>> {
        self.check_frame(frame)?;
        Ok(&self.jacobians[frame])
    }

    fn center_of_mass(&self) -> KinematicsResult<Vector3<T>> {
        Ok(self.com)
    }

    fn center_of_mass_jacobian(&self) -> KinematicsResult<&DMatrix<T>> {
        Ok(&self.com_jacobian)
    }
}

/// Random element of `space`, reached from the neutral element along a
/// tangent vector with entries in `[-scale, scale]`.
pub fn random_configuration<T: Scalar, R: Rng>(
    space: &dyn LieGroupSpace<T>,
    rng: &mut R,
    scale: f64,
) -> Configuration<T> {
    let neutral = space.neutral();
    let v = random_vector::<T, R>(space.nv(), rng, scale);
    let mut q = neutral.clone();
    match space.integrate(neutral.as_slice(), v.as_slice(), q.as_mut_slice()) {
        Ok(()) => q,
        Err(e) => panic!("integration failed in {}: {e}", space.name()),
    }
}

/// Random vector with entries in `[-scale, scale]`.
pub fn random_vector<T: Scalar, R: Rng>(n: usize, rng: &mut R, scale: f64) -> DVector<T> {
    DVector::from_fn(n, |_, _| <T as Scalar>::from_f64(rng.gen_range(-scale..=scale)))
}

/// Deterministic generator for reproducible tests.
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liegroup::{ProductSpace, SpecialOrthogonal2, VectorSpace};

    #[test]
    fn test_random_configuration_is_valid() {
        let space = ProductSpace::<f64>::new(vec![VectorSpace::shared(2), SpecialOrthogonal2::shared()]);
        let mut rng = seeded_rng(7);
        for _ in 0..10 {
            let q = random_configuration(&space, &mut rng, 3.0);
            assert!(space.is_valid(q.as_slice(), 1e-12));
        }
    }

    #[test]
    fn test_fixed_frames() {
        let mut kin = FixedFrameKinematics::<f64>::new(2);
        let frame = kin.add_frame(Isometry3::identity());
        assert_eq!(kin.num_frames(), 1);
        kin.set_configuration(&DVector::from_vec(vec![1.0, 2.0])).unwrap();
        kin.compute_forward_kinematics().unwrap();
        assert_eq!(kin.forward_kinematics_calls(), 1);
        assert_eq!(kin.frame_jacobian(frame).unwrap().shape(), (6, 2));
        assert!(kin.set_configuration(&DVector::zeros(3)).is_err());
    }
}
