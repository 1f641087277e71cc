//! Full pipeline on a floating-base planar chain: the base is pinned and
//! the wrist copies the elbow explicitly, while the tip reaches a target
//! implicitly. A damped Gauss-Newton loop runs on the free variables only.

use approx::assert_relative_eq;
use kinsolve::prelude::*;
use kinsolve_core::test_utils::{random_configuration, seeded_rng};
use pretty_assertions::assert_eq;

#[derive(Debug)]
struct SameAngle {
    space: SpacePtr<f64>,
}

impl DifferentiableFunction<f64> for SameAngle {
    fn name(&self) -> &str {
        "same angle"
    }

    fn input_size(&self) -> usize {
        2
    }

    fn input_derivative_size(&self) -> usize {
        1
    }

    fn output_space(&self) -> &SpacePtr<f64> {
        &self.space
    }

    fn impl_compute(
        &mut self,
        _ctx: &mut EvalContext<'_, f64>,
        q: &Configuration<f64>,
        result: &mut DVector<f64>,
    ) -> Result<()> {
        result.copy_from(q);
        Ok(())
    }

    fn impl_jacobian(
        &mut self,
        _ctx: &mut EvalContext<'_, f64>,
        _q: &Configuration<f64>,
        jacobian: &mut DMatrix<f64>,
    ) -> Result<()> {
        jacobian.fill(1.0);
        Ok(())
    }
}

const BASE: [f64; 2] = [0.5, 0.0];
const TARGET: [f64; 2] = [1.6, 0.9];

fn assemble(chain: &PlanarChain<f64>) -> HybridSolver<f64> {
    let space = chain.config_space();
    let mut solver = HybridSolver::new(space.clone(), HybridSolverConfig::default());

    let reach = PointPosition::build::<f64, _>(
        "tip reaches target",
        chain,
        chain.tip_frame(),
        Vector3::zeros(),
        Vector3::new(TARGET[0], TARGET[1], 0.0),
        &Mask::new(vec![true, true, false]),
    )
    .unwrap();
    solver.add_implicit(Box::new(reach)).unwrap();

    let pin = ExplicitFunction::<f64>::new(
        "pinned base",
        space.clone(),
        Box::new(ConstantFunction::vector("base", DVector::from_row_slice(&BASE), 0)),
        ExplicitIndices::flat(BlockIndices::empty(), BlockIndices::range(0, 2)),
    )
    .unwrap();
    solver.add_explicit(pin).unwrap();

    // Velocity layout: base x, base y, shoulder, elbow, wrist.
    let follow = ExplicitFunction::<f64>::new(
        "wrist follows elbow",
        space,
        Box::new(SameAngle {
            space: SpecialOrthogonal2::shared(),
        }),
        ExplicitIndices::new(
            BlockIndices::range(4, 2),
            BlockIndices::range(3, 1),
            BlockIndices::range(6, 2),
            BlockIndices::range(4, 1),
        ),
    )
    .unwrap();
    solver.add_explicit(follow).unwrap();
    solver.explicit_solver_has_changed().unwrap();
    solver
}

#[test]
fn test_gauss_newton_on_free_variables_reaches_target() {
    let mut chain = PlanarChain::<f64>::with_floating_base(vec![1.0, 0.8, 0.5])
        .with_masses(vec![3.0, 2.0, 1.0])
        .unwrap();
    let space = chain.config_space();
    let tip = chain.tip_frame();
    let mut solver = assemble(&chain);
    assert_eq!(solver.free_derivatives().to_vec(), vec![2, 3]);
    assert_eq!(solver.output_derivatives().to_vec(), vec![0, 1, 4]);

    let mut q = chain.configuration(Some((0.0, 0.0)), &[0.3, 0.3, 0.3]).unwrap();
    let mut ctx = EvalContext::new(&mut chain);
    let mut converged = false;
    for _ in 0..100 {
        solver.solve_explicit(&mut ctx, &mut q).unwrap();
        solver.compute_values(&mut ctx, &q).unwrap();
        let r = solver.stacked_residual();
        if r.norm() < 1e-10 {
            converged = true;
            break;
        }

        solver.update_jacobian(&mut ctx, &q).unwrap();
        let j = solver.stacked_reduced_jacobian();
        let lhs = j.tr_mul(&j) + DMatrix::identity(2, 2) * 1e-9;
        let mut step = lhs.lu().solve(&(-j.tr_mul(&r))).unwrap();
        let norm = step.norm();
        if norm > 0.5 {
            step *= 0.5 / norm;
        }

        let mut dq = DVector::zeros(5);
        solver.expand_free_step(&step, &mut dq).unwrap();
        let mut next = q.clone();
        space
            .integrate(q.as_slice(), dq.as_slice(), next.as_mut_slice())
            .unwrap();
        q = next;
    }
    assert!(converged, "residual still {}", solver.stacked_residual().norm());

    assert_relative_eq!(q[0], BASE[0], epsilon = 1e-12);
    assert_relative_eq!(q[1], BASE[1], epsilon = 1e-12);
    assert_relative_eq!(q[6], q[4], epsilon = 1e-12);
    assert_relative_eq!(q[7], q[5], epsilon = 1e-12);

    let kin = ctx.update_kinematics("check", &q).unwrap();
    let reached = kin.frame_placement(tip).unwrap().translation.vector;
    assert_relative_eq!(reached.x, TARGET[0], epsilon = 1e-9);
    assert_relative_eq!(reached.y, TARGET[1], epsilon = 1e-9);
}

#[test]
fn test_explicit_system_residual_matches_finite_differences() {
    let mut chain = PlanarChain::<f64>::with_floating_base(vec![1.0, 0.8, 0.5]);
    let space = chain.config_space();
    let mut solver = assemble(&chain);
    let mut rng = seeded_rng(5);
    let mut ctx = EvalContext::new(&mut chain);

    for _ in 0..3 {
        let q = random_configuration(space.as_ref(), &mut rng, 1.5);
        let system = solver.explicit_system_mut();
        let (passes, error) = DerivativeChecker::check_jacobian(
            system,
            &mut ctx,
            space.as_ref(),
            &q,
            &FiniteDifferenceConfig::default(),
        )
        .unwrap();
        assert!(passes, "explicit system jacobian error {error}");
    }
}
