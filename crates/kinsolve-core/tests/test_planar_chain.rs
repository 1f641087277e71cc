//! Checks the planar reference chain against finite differences.
//!
//! The frame and center-of-mass Jacobians of the chain are exposed through
//! small differentiable functions so that the generic derivative checker
//! can compare them with differences taken on the configuration manifold.

use kinsolve_core::{
    prelude::*,
    test_utils::{random_configuration, seeded_rng},
};
use proptest::prelude::*;

/// Position and rotation angle of a frame, or the center of mass.
#[derive(Debug)]
struct Probe {
    frame: Option<FrameId>,
    nq: usize,
    nv: usize,
    output_space: SpacePtr<f64>,
}

impl Probe {
    fn new(chain: &PlanarChain<f64>, frame: Option<FrameId>) -> Self {
        Self {
            frame,
            nq: chain.nq(),
            nv: chain.nv(),
            output_space: VectorSpace::shared(if frame.is_some() { 4 } else { 3 }),
        }
    }
}

impl DifferentiableFunction<f64> for Probe {
    fn name(&self) -> &str {
        "probe"
    }

    fn input_size(&self) -> usize {
        self.nq
    }

    fn input_derivative_size(&self) -> usize {
        self.nv
    }

    fn output_space(&self) -> &SpacePtr<f64> {
        &self.output_space
    }

    fn impl_compute(
        &mut self,
        ctx: &mut EvalContext<'_, f64>,
        q: &Configuration<f64>,
        result: &mut DVector<f64>,
    ) -> Result<()> {
        let kin = ctx.update_kinematics("probe", q)?;
        match self.frame {
            Some(frame) => {
                let m = kin.frame_placement(frame)?;
                result.rows_mut(0, 3).copy_from(&m.translation.vector);
                result[3] = m.rotation.scaled_axis().z;
            }
            None => result.copy_from(&kin.center_of_mass()?),
        }
        Ok(())
    }

    fn impl_jacobian(
        &mut self,
        ctx: &mut EvalContext<'_, f64>,
        q: &Configuration<f64>,
        jacobian: &mut DMatrix<f64>,
    ) -> Result<()> {
        let kin = ctx.update_kinematics("probe", q)?;
        match self.frame {
            Some(frame) => {
                let j = kin.frame_jacobian(frame)?;
                jacobian.rows_mut(0, 3).copy_from(&j.rows(0, 3));
                jacobian.row_mut(3).copy_from(&j.row(5));
            }
            None => jacobian.copy_from(kin.center_of_mass_jacobian()?),
        }
        Ok(())
    }
}

fn check(chain: &mut PlanarChain<f64>, frame: Option<FrameId>, q: &Configuration<f64>) -> f64 {
    let space = chain.config_space();
    let mut probe = Probe::new(chain, frame);
    let mut ctx = EvalContext::new(chain);
    let (passes, error) = DerivativeChecker::check_jacobian(
        &mut probe,
        &mut ctx,
        space.as_ref(),
        q,
        &FiniteDifferenceConfig::default(),
    )
    .unwrap();
    assert!(passes, "frame {frame:?}: error {error}");
    error
}

#[test]
fn test_frame_jacobians_match_finite_differences() {
    let mut chain = PlanarChain::with_floating_base(vec![1.0, 0.7, 0.4]);
    let space = chain.config_space();
    let mut rng = seeded_rng(42);
    for _ in 0..5 {
        // Keep angles away from ±π where the rotation angle probe wraps.
        let q = random_configuration(space.as_ref(), &mut rng, 0.8);
        for frame in 0..chain.num_frames() {
            check(&mut chain, Some(frame), &q);
        }
        check(&mut chain, None, &q);
    }
}

#[test]
fn test_forward_kinematics_is_cached_per_configuration() {
    let mut chain = PlanarChain::new(vec![1.0, 1.0]);
    let q0 = chain.configuration(None, &[0.1, 0.2]).unwrap();
    let q1 = chain.configuration(None, &[0.3, 0.2]).unwrap();

    chain.set_configuration(&q0).unwrap();
    chain.compute_forward_kinematics().unwrap();
    let first = chain.frame_placement(2).unwrap();

    chain.set_configuration(&q0).unwrap();
    assert_eq!(chain.frame_placement(2).unwrap(), first);

    chain.set_configuration(&q1).unwrap();
    assert_eq!(
        chain.frame_placement(2).unwrap_err(),
        KinematicsError::NotComputed
    );
}

proptest! {
    #[test]
    fn prop_tip_distance_is_bounded_by_reach(angles in proptest::collection::vec(-3.0f64..3.0, 3)) {
        let mut chain = PlanarChain::new(vec![1.0, 0.5, 0.25]);
        let q = chain.configuration(None, &angles).unwrap();
        chain.set_configuration(&q).unwrap();
        chain.compute_forward_kinematics().unwrap();
        let tip = chain.frame_placement(chain.tip_frame()).unwrap();
        prop_assert!(tip.translation.vector.norm() <= 1.75 + 1e-12);
    }
}
