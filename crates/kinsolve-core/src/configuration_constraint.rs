//! Weighted squared distance to a goal configuration.

use crate::{
    error::{ConstraintError, Result},
    function::{DifferentiableFunction, EvalContext},
    liegroup::{DifferenceArg, SpacePtr, VectorSpace},
    mask::Mask,
    types::{Configuration, DMatrix, DVector, Scalar},
};

/// Scalar constraint `½ Σᵢ wᵢ dᵢ²` with `d = goal ⊖ q`.
///
/// The difference is taken in the configuration space, so the distance
/// behaves correctly on rotational joints. The Jacobian is the single row
/// `(w ⊙ d)ᵀ · ∂(goal ⊖ q)/∂q`.
#[derive(Debug, Clone)]
pub struct ConfigurationConstraint<T: Scalar> {
    name: String,
    config_space: SpacePtr<T>,
    goal: Configuration<T>,
    weights: DVector<T>,
    output_space: SpacePtr<T>,
    diff: DVector<T>,
    diff_jacobian: DMatrix<T>,
}

impl<T: Scalar> ConfigurationConstraint<T> {
    /// Creates the constraint with one weight per velocity coordinate.
    pub fn new<S: Into<String>>(
        name: S,
        config_space: SpacePtr<T>,
        goal: Configuration<T>,
        weights: DVector<T>,
    ) -> Result<Self> {
        let name = name.into();
        let nv = config_space.nv();
        config_space.check_element(goal.as_slice())?;
        if weights.len() != nv {
            return Err(ConstraintError::dimension_mismatch(
                format!("{name} weights"),
                nv,
                weights.len(),
            ));
        }
        Ok(Self {
            name,
            config_space,
            goal,
            weights,
            output_space: VectorSpace::shared(1),
            diff: DVector::zeros(nv),
            diff_jacobian: DMatrix::zeros(nv, nv),
        })
    }

    /// Weights 1 on the velocity coordinates selected by `mask`, 0 elsewhere.
    pub fn with_mask<S: Into<String>>(
        name: S,
        config_space: SpacePtr<T>,
        goal: Configuration<T>,
        mask: &Mask,
    ) -> Result<Self> {
        mask.check_length(config_space.nv())?;
        let weights = DVector::from_iterator(
            mask.len(),
            mask.bits().iter().map(|&b| if b { T::one() } else { T::zero() }),
        );
        Self::new(name, config_space, goal, weights)
    }

    /// Equal unit weights.
    pub fn unweighted<S: Into<String>>(name: S, config_space: SpacePtr<T>, goal: Configuration<T>) -> Result<Self> {
        let weights = DVector::from_element(config_space.nv(), T::one());
        Self::new(name, config_space, goal, weights)
    }

    /// The goal configuration.
    pub fn goal(&self) -> &Configuration<T> {
        &self.goal
    }

    /// The weights.
    pub fn weights(&self) -> &DVector<T> {
        &self.weights
    }
}

impl<T: Scalar> DifferentiableFunction<T> for ConfigurationConstraint<T> {
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
        _ctx: &mut EvalContext<'_, T>,
        q: &Configuration<T>,
        result: &mut DVector<T>,
    ) -> Result<()> {
        self.config_space
            .difference(q.as_slice(), self.goal.as_slice(), self.diff.as_mut_slice())?;
        let half = <T as Scalar>::from_f64(0.5);
        result[0] = half * self.diff.component_mul(&self.diff).dot(&self.weights);
        Ok(())
    }

    fn impl_jacobian(
        &mut self,
        _ctx: &mut EvalContext<'_, T>,
        q: &Configuration<T>,
        jacobian: &mut DMatrix<T>,
    ) -> Result<()> {
        let nv = self.config_space.nv();
        self.config_space
            .difference(q.as_slice(), self.goal.as_slice(), self.diff.as_mut_slice())?;
        self.config_space.difference_jacobian(
            q.as_slice(),
            self.goal.as_slice(),
            DifferenceArg::First,
            self.diff_jacobian.view_mut((0, 0), (nv, nv)),
        )?;
        self.diff.component_mul_assign(&self.weights);
        jacobian.gemm_tr(T::one(), &self.diff, &self.diff_jacobian, T::zero());
        Ok(())
    }
}
