//! Explicit functions: closed-form elimination of configuration variables.
//!
//! An [`ExplicitFunction`] states that the configuration variables selected
//! by its output index sets are determined by the ones selected by its input
//! index sets, through `g(q_out) = f(q_in)`. Seen as a differentiable
//! function of the whole configuration it is the residual
//! `g(q_out) ⊖ f(q_in)`, computed in the value space of `f`.
//!
//! Index sets are [`BlockIndices`]: every copy between the full vectors and
//! the compressed ones is a handful of block copies, and the columns of the
//! Jacobian that belong to neither side are zeroed segment by segment.

use crate::outer_map::{BoxedOuterMap, IdentityMap, OuterMap};
use kinsolve_core::{
    error::{ConstraintError, Result},
    function::{BoxedFunction, DifferentiableFunction, EvalContext},
    liegroup::{DifferenceArg, SpacePtr, VectorSpace},
    segments::BlockIndices,
    types::{Configuration, DMatrix, DVector, Scalar},
};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The four index sets of an explicit function.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExplicitIndices {
    /// Configuration variables read by `f`
    pub input_conf: BlockIndices,
    /// Velocity variables of the inputs
    pub input_vel: BlockIndices,
    /// Configuration variables eliminated
    pub output_conf: BlockIndices,
    /// Velocity variables eliminated
    pub output_vel: BlockIndices,
}

impl ExplicitIndices {
    /// Index sets for configuration and velocity sides.
    pub fn new(
        input_conf: BlockIndices,
        input_vel: BlockIndices,
        output_conf: BlockIndices,
        output_vel: BlockIndices,
    ) -> Self {
        Self {
            input_conf,
            input_vel,
            output_conf,
            output_vel,
        }
    }

    /// Same indices on the configuration and velocity sides, for vector spaces.
    pub fn flat(input: BlockIndices, output: BlockIndices) -> Self {
        Self::new(input.clone(), input, output.clone(), output)
    }

    fn validate(&self, name: &str, nq: usize, nv: usize) -> Result<()> {
        self.input_conf.check_bounds(nq, &format!("{name} input configuration"))?;
        self.output_conf.check_bounds(nq, &format!("{name} output configuration"))?;
        self.input_vel.check_bounds(nv, &format!("{name} input velocity"))?;
        self.output_vel.check_bounds(nv, &format!("{name} output velocity"))?;
        if self.input_conf.intersects(&self.output_conf) {
            return Err(ConstraintError::overlapping(
                format!("{name} input configuration {}", self.input_conf),
                format!("output configuration {}", self.output_conf),
            ));
        }
        if self.input_vel.intersects(&self.output_vel) {
            return Err(ConstraintError::overlapping(
                format!("{name} input velocity {}", self.input_vel),
                format!("output velocity {}", self.output_vel),
            ));
        }
        Ok(())
    }
}

/// Residual `g(q_out) ⊖ f(q_in)` eliminating `q_out`.
#[derive(Debug)]
pub struct ExplicitFunction<T: Scalar> {
    name: String,
    config_space: SpacePtr<T>,
    inner: BoxedFunction<T>,
    outer: BoxedOuterMap<T>,
    indices: ExplicitIndices,
    passive_vel: BlockIndices,
    output_space: SpacePtr<T>,
    q_in: Configuration<T>,
    q_out: Configuration<T>,
    f_value: DVector<T>,
    g_value: DVector<T>,
    jf: DMatrix<T>,
    d_first: DMatrix<T>,
    d_second: DMatrix<T>,
    input_block: DMatrix<T>,
    output_block: DMatrix<T>,
}

impl<T: Scalar> ExplicitFunction<T> {
    /// `q_out = f(q_in)` on `config_space`.
    ///
    /// # Errors
    ///
    /// - `InvalidIndexSet` if an index set is out of bounds
    /// - `OverlappingIndices` if inputs and outputs share a variable
    /// - `DimensionMismatch` if the index sets do not match the sizes of `f`
    pub fn new<S: Into<String>>(
        name: S,
        config_space: SpacePtr<T>,
        inner: BoxedFunction<T>,
        indices: ExplicitIndices,
    ) -> Result<Self> {
        Self::with_outer_map(name, config_space, inner, indices, Box::new(IdentityMap))
    }

    /// `g(q_out) = f(q_in)` on `config_space`.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new), plus `DimensionMismatch` if `g` does not
    /// map the outputs to the value space of `f` with a square Jacobian.
    pub fn with_outer_map<S: Into<String>>(
        name: S,
        config_space: SpacePtr<T>,
        inner: BoxedFunction<T>,
        indices: ExplicitIndices,
        outer: BoxedOuterMap<T>,
    ) -> Result<Self> {
        let name = name.into();
        let nq = config_space.nq();
        let nv = config_space.nv();
        indices.validate(&name, nq, nv)?;

        let checks = [
            ("input configuration", inner.input_size(), indices.input_conf.len()),
            ("input velocity", inner.input_derivative_size(), indices.input_vel.len()),
        ];
        for (what, expected, actual) in checks {
            if expected != actual {
                return Err(ConstraintError::dimension_mismatch(
                    format!("{name} {what}"),
                    expected,
                    actual,
                ));
            }
        }
        outer.validate(inner.as_ref(), indices.output_conf.len(), indices.output_vel.len())?;

        let passive_vel = indices.input_vel.union(&indices.output_vel)?.complement(nv);
        let n_in = indices.input_vel.len();
        let n_out = indices.output_vel.len();
        let m = inner.output_derivative_size();

        Ok(Self {
            output_space: VectorSpace::shared(n_out),
            q_in: Configuration::zeros(indices.input_conf.len()),
            q_out: Configuration::zeros(indices.output_conf.len()),
            f_value: inner.new_output(),
            g_value: inner.new_output(),
            jf: inner.new_jacobian(),
            d_first: DMatrix::zeros(m, m),
            d_second: DMatrix::zeros(m, m),
            input_block: DMatrix::zeros(m, n_in),
            output_block: DMatrix::zeros(m, n_out),
            name,
            config_space,
            inner,
            outer,
            indices,
            passive_vel,
        })
    }

    /// The configuration space.
    pub fn config_space(&self) -> &SpacePtr<T> {
        &self.config_space
    }

    /// The index sets.
    pub fn indices(&self) -> &ExplicitIndices {
        &self.indices
    }

    /// Configuration variables read by `f`.
    pub fn input_conf(&self) -> &BlockIndices {
        &self.indices.input_conf
    }

    /// Velocity variables of the inputs.
    pub fn input_vel(&self) -> &BlockIndices {
        &self.indices.input_vel
    }

    /// Eliminated configuration variables.
    pub fn output_conf(&self) -> &BlockIndices {
        &self.indices.output_conf
    }

    /// Eliminated velocity variables.
    pub fn output_vel(&self) -> &BlockIndices {
        &self.indices.output_vel
    }

    /// Velocity variables that do not take part in the relation.
    pub fn passive_vel(&self) -> &BlockIndices {
        &self.passive_vel
    }

    /// Whether the outer map is the identity.
    pub fn has_identity_outer_map(&self) -> bool {
        self.outer.is_identity()
    }

    /// The inner function `f`.
    pub fn input_to_output(&self) -> &dyn DifferentiableFunction<T> {
        self.inner.as_ref()
    }

    /// The inner function `f`, for direct evaluation.
    pub fn input_to_output_mut(&mut self) -> &mut dyn DifferentiableFunction<T> {
        self.inner.as_mut()
    }

    /// Sets the pivot threshold of a generic outer map.
    pub fn set_singularity_tolerance(&mut self, tolerance: T) {
        self.outer.set_singularity_tolerance(tolerance);
    }

    fn check_configuration(&self, q: &Configuration<T>) -> Result<()> {
        let nq = self.config_space.nq();
        if q.len() == nq {
            Ok(())
        } else {
            Err(ConstraintError::dimension_mismatch(
                format!("{} configuration", self.name),
                nq,
                q.len(),
            ))
        }
    }

    fn load(&mut self, q: &Configuration<T>) {
        self.indices.input_conf.gather(q, &mut self.q_in);
        self.indices.output_conf.gather(q, &mut self.q_out);
    }

    /// Derivative of the eliminated variables with respect to the inputs,
    /// `Jg⁻¹ · Jf`, at a configuration satisfying the relation.
    ///
    /// `result` has one row per eliminated velocity variable and one column
    /// per input velocity variable.
    pub fn elimination_jacobian(
        &mut self,
        ctx: &mut EvalContext<'_, T>,
        q: &Configuration<T>,
        result: &mut DMatrix<T>,
    ) -> Result<()> {
        self.check_configuration(q)?;
        let expected = (self.indices.output_vel.len(), self.indices.input_vel.len());
        if result.shape() != expected {
            return Err(ConstraintError::dimension_mismatch(
                format!("{} elimination jacobian buffer", self.name),
                format!("{expected:?}"),
                format!("{:?}", result.shape()),
            ));
        }
        self.load(q);
        self.inner.jacobian(ctx, &self.q_in, &mut self.jf)?;
        result.copy_from(&self.jf);
        self.outer.solve_jacobian(ctx, &self.q_out, result)
    }

    /// Overwrites the eliminated variables of `q` with `g⁻¹(f(q_in))`.
    pub fn propagate(&mut self, ctx: &mut EvalContext<'_, T>, q: &mut Configuration<T>) -> Result<()> {
        self.check_configuration(q)?;
        self.indices.input_conf.gather(q, &mut self.q_in);
        self.inner.value(ctx, &self.q_in, &mut self.f_value)?;
        self.outer.invert(ctx, &self.f_value, &mut self.q_out)?;
        self.indices.output_conf.scatter(&self.q_out, q);
        Ok(())
    }
}

impl<T: Scalar> DifferentiableFunction<T> for ExplicitFunction<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_size(&self) -> usize {
        self.config_space.nq()
    }

    fn input_derivative_size(&self) -> usize {
        self.config_space.nv()
    }

    fn output_space(&self) -> &SpacePtr<T> {
        &self.output_space
    }

    fn impl_compute(
        &mut self,
        ctx: &mut EvalContext<'_, T>,
        q: &Configuration<T>,
        result: &mut DVector<T>,
    ) -> Result<()> {
        self.load(q);
        self.inner.value(ctx, &self.q_in, &mut self.f_value)?;
        self.outer.value(ctx, &self.q_out, &mut self.g_value)?;
        self.inner.output_space().difference(
            self.f_value.as_slice(),
            self.g_value.as_slice(),
            result.as_mut_slice(),
        )?;
        Ok(())
    }

    fn impl_jacobian(
        &mut self,
        ctx: &mut EvalContext<'_, T>,
        q: &Configuration<T>,
        jacobian: &mut DMatrix<T>,
    ) -> Result<()> {
        self.load(q);
        self.inner.value(ctx, &self.q_in, &mut self.f_value)?;
        self.inner.jacobian(ctx, &self.q_in, &mut self.jf)?;
        self.outer.value(ctx, &self.q_out, &mut self.g_value)?;

        let space = self.inner.output_space().clone();
        let m = self.d_first.nrows();
        for (arg, d) in [
            (DifferenceArg::First, &mut self.d_first),
            (DifferenceArg::Second, &mut self.d_second),
        ] {
            space.difference_jacobian(
                self.f_value.as_slice(),
                self.g_value.as_slice(),
                arg,
                d.view_mut((0, 0), (m, m)),
            )?;
        }

        self.input_block.gemm(T::one(), &self.d_first, &self.jf, T::zero());
        self.outer
            .residual_jacobian(ctx, &self.q_out, &self.d_second, &mut self.output_block)?;

        self.passive_vel.zero_columns(jacobian);
        self.indices.input_vel.scatter_columns(&self.input_block, jacobian);
        self.indices.output_vel.scatter_columns(&self.output_block, jacobian);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outer_map::GenericMap;
    use approx::assert_relative_eq;
    use kinsolve_core::{
        function::AffineFunction,
        liegroup::{ProductSpace, SpecialOrthogonal2},
        derivative_check::DerivativeChecker,
        config::FiniteDifferenceConfig,
    };
    use pretty_assertions::assert_eq;

    fn indices(input: &[usize], output: &[usize]) -> ExplicitIndices {
        ExplicitIndices::flat(
            BlockIndices::from_indices(input).unwrap(),
            BlockIndices::from_indices(output).unwrap(),
        )
    }

    /// `q[2] = q[0] + 2 q[1]` on R^4.
    fn linear() -> ExplicitFunction<f64> {
        let f = AffineFunction::linear("f", DMatrix::from_row_slice(1, 2, &[1.0, 2.0]));
        ExplicitFunction::<f64>::new("linear", VectorSpace::shared(4), Box::new(f), indices(&[0, 1], &[2])).unwrap()
    }

    #[test]
    fn test_residual_and_jacobian() {
        let mut e = linear();
        let mut ctx = EvalContext::detached();
        let q = DVector::from_vec(vec![1.0, 2.0, 4.0, 9.0]);

        let mut value = e.new_output();
        e.value(&mut ctx, &q, &mut value).unwrap();
        assert_relative_eq!(value[0], 4.0 - 5.0);

        let mut jacobian = DMatrix::from_element(1, 4, 7.0);
        e.jacobian(&mut ctx, &q, &mut jacobian).unwrap();
        assert_eq!(jacobian, DMatrix::from_row_slice(1, 4, &[-1.0, -2.0, 1.0, 0.0]));
        assert_eq!(e.passive_vel().to_vec(), vec![3]);
    }

    #[test]
    fn test_propagate_and_elimination_jacobian() {
        let mut e = linear();
        let mut ctx = EvalContext::detached();
        let mut q = DVector::from_vec(vec![1.0, 2.0, 0.0, 9.0]);
        e.propagate(&mut ctx, &mut q).unwrap();
        assert_eq!(q.as_slice(), &[1.0, 2.0, 5.0, 9.0]);

        let mut elimination = DMatrix::zeros(1, 2);
        e.elimination_jacobian(&mut ctx, &q, &mut elimination).unwrap();
        assert_eq!(elimination, DMatrix::from_row_slice(1, 2, &[1.0, 2.0]));
        assert!(e.elimination_jacobian(&mut ctx, &q, &mut DMatrix::zeros(2, 2)).is_err());
    }

    #[test]
    fn test_generic_outer_map() {
        // 4 q[2] = q[0] + 2 q[1]
        let f = AffineFunction::linear("f", DMatrix::from_row_slice(1, 2, &[1.0, 2.0]));
        let g = AffineFunction::linear("g", DMatrix::from_element(1, 1, 4.0));
        let g_inv = AffineFunction::linear("g inverse", DMatrix::from_element(1, 1, 0.25));
        let outer = GenericMap::<f64>::new(Box::new(g)).with_inverse(Box::new(g_inv));
        let mut e = ExplicitFunction::<f64>::with_outer_map(
            "scaled",
            VectorSpace::shared(3),
            Box::new(f),
            indices(&[0, 1], &[2]),
            Box::new(outer),
        )
        .unwrap();
        assert!(!e.has_identity_outer_map());

        let mut ctx = EvalContext::detached();
        let mut q = DVector::from_vec(vec![1.0, 1.0, 0.0]);
        e.propagate(&mut ctx, &mut q).unwrap();
        assert_relative_eq!(q[2], 0.75);

        let mut value = e.new_output();
        e.value(&mut ctx, &q, &mut value).unwrap();
        assert_relative_eq!(value[0], 0.0, epsilon = 1e-15);

        let mut jacobian = e.new_jacobian();
        e.jacobian(&mut ctx, &q, &mut jacobian).unwrap();
        assert_eq!(jacobian, DMatrix::from_row_slice(1, 3, &[-1.0, -2.0, 4.0]));

        let mut elimination = DMatrix::zeros(1, 2);
        e.elimination_jacobian(&mut ctx, &q, &mut elimination).unwrap();
        assert_relative_eq!(elimination, DMatrix::from_row_slice(1, 2, &[0.25, 0.5]));
    }

    #[test]
    fn test_construction_errors() {
        let f = || Box::new(AffineFunction::linear("f", DMatrix::from_element(1, 2, 1.0))) as BoxedFunction<f64>;
        let space = VectorSpace::shared::<f64>(3);

        let err = ExplicitFunction::<f64>::new("overlap", space.clone(), f(), indices(&[0, 1], &[1])).unwrap_err();
        assert!(matches!(err, ConstraintError::OverlappingIndices { .. }));

        let err = ExplicitFunction::<f64>::new("bounds", space.clone(), f(), indices(&[0, 1], &[5])).unwrap_err();
        assert!(matches!(err, ConstraintError::InvalidIndexSet { .. }));

        let err = ExplicitFunction::<f64>::new("inputs", space.clone(), f(), indices(&[0], &[2])).unwrap_err();
        assert!(matches!(err, ConstraintError::DimensionMismatch { .. }));

        let err = ExplicitFunction::<f64>::new("outputs", space, f(), indices(&[0, 1], &[])).unwrap_err();
        assert!(matches!(err, ConstraintError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_rotation_output_matches_finite_differences() {
        // q = (x, cos θ, sin θ) with θ = 2x; velocities (x, θ).
        #[derive(Debug)]
        struct Angle {
            space: SpacePtr<f64>,
        }
        impl DifferentiableFunction<f64> for Angle {
            fn name(&self) -> &str {
                "angle"
            }
            fn input_size(&self) -> usize {
                1
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
                result.copy_from(&SpecialOrthogonal2::from_angle(2.0 * q[0]));
                Ok(())
            }
            fn impl_jacobian(
                &mut self,
                _ctx: &mut EvalContext<'_, f64>,
                _q: &Configuration<f64>,
                jacobian: &mut DMatrix<f64>,
            ) -> Result<()> {
                jacobian[(0, 0)] = 2.0;
                Ok(())
            }
        }

        let space: SpacePtr<f64> = ProductSpace::shared(vec![VectorSpace::shared(1), SpecialOrthogonal2::shared()]);
        let idx = ExplicitIndices::new(
            BlockIndices::range(0, 1),
            BlockIndices::range(0, 1),
            BlockIndices::range(1, 2),
            BlockIndices::range(1, 1),
        );
        let angle = Angle {
            space: SpecialOrthogonal2::shared(),
        };
        let mut e = ExplicitFunction::<f64>::new("rotation", space.clone(), Box::new(angle), idx).unwrap();

        let mut q = DVector::from_vec(vec![0.4, 1.0, 0.0]);
        let mut ctx = EvalContext::detached();
        let mut value = e.new_output();
        e.value(&mut ctx, &q, &mut value).unwrap();
        assert_relative_eq!(value[0], -0.8, epsilon = 1e-12);

        let (passes, error) =
            DerivativeChecker::check_jacobian(&mut e, &mut ctx, space.as_ref(), &q, &FiniteDifferenceConfig::default())
                .unwrap();
        assert!(passes, "relative error {error}");

        e.propagate(&mut ctx, &mut q).unwrap();
        assert_relative_eq!(SpecialOrthogonal2::angle(&q.as_slice()[1..]), 0.8, epsilon = 1e-12);
        let mut elimination = DMatrix::zeros(1, 1);
        e.elimination_jacobian(&mut ctx, &q, &mut elimination).unwrap();
        assert_relative_eq!(elimination[(0, 0)], 2.0);
    }
}
