//! Differentiable functions of a configuration.
//!
//! A differentiable function maps a configuration `q` (an element of the
//! robot's configuration space, `nq` coordinates) to a value in an output
//! space and provides the Jacobian of that value with respect to the
//! tangent (velocity) space of the input, `nv` columns.
//!
//! # Evaluation context
//!
//! Evaluation takes `&mut self`: functions own their scratch buffers, so
//! an instance must not be shared across threads during evaluation. The
//! kinematic model is not owned by functions. It is handed to every call
//! through an [`EvalContext`], which a kinematic function uses to refresh
//! the model for the configuration it evaluates.
//!
//! # Example
//!
//! ```rust,ignore
//! use kinsolve_core::prelude::*;
//!
//! let mut f = AffineFunction::new("sum", DMatrix::from_row_slice(1, 2, &[1.0, 1.0]), DVector::from_element(1, -3.0))?;
//! let mut value = f.new_output();
//! f.value(&mut EvalContext::detached(), &DVector::from_vec(vec![1.0, 2.0]), &mut value)?;
//! assert_eq!(value[0], 0.0);
//! ```

use crate::{
    error::{ConstraintError, Result},
    kinematics::KinematicsProvider,
    liegroup::{SpacePtr, VectorSpace},
    types::{Configuration, DMatrix, DVector, Scalar},
};
use std::fmt::Debug;

/// Per-call evaluation state shared by the functions of a problem.
pub struct EvalContext<'a, T: Scalar> {
    kinematics: Option<&'a mut dyn KinematicsProvider<T>>,
}

impl<'a, T: Scalar> EvalContext<'a, T> {
    /// Context backed by a kinematic model.
    pub fn new(kinematics: &'a mut dyn KinematicsProvider<T>) -> Self {
        Self {
            kinematics: Some(kinematics),
        }
    }

    /// Context without kinematic model, for purely algebraic functions.
    pub fn detached() -> Self {
        Self { kinematics: None }
    }

    /// Whether a kinematic model is attached.
    pub fn has_kinematics(&self) -> bool {
        self.kinematics.is_some()
    }

    /// Refreshes the kinematic model for `q` on behalf of `function`.
    ///
    /// # Errors
    ///
    /// `MissingKinematics` if no model is attached, provider errors otherwise.
    pub fn update_kinematics(
        &mut self,
        function: &str,
        q: &Configuration<T>,
    ) -> Result<&dyn KinematicsProvider<T>> {
        let kinematics = self
            .kinematics
            .as_deref_mut()
            .ok_or_else(|| ConstraintError::missing_kinematics(function))?;
        kinematics.set_configuration(q)?;
        kinematics.compute_forward_kinematics()?;
        Ok(kinematics)
    }

    /// The attached model, as last refreshed.
    pub fn kinematics(&self, function: &str) -> Result<&dyn KinematicsProvider<T>> {
        self.kinematics
            .as_deref()
            .ok_or_else(|| ConstraintError::missing_kinematics(function))
    }
}

impl<T: Scalar> Default for EvalContext<'_, T> {
    fn default() -> Self {
        Self::detached()
    }
}

/// Contract of a differentiable function of a configuration.
///
/// Implementors provide `impl_compute` and `impl_jacobian`. Callers use
/// [`value`](Self::value) and [`jacobian`](Self::jacobian), which check
/// argument and buffer sizes before delegating. Both may be called in any
/// order and any number of times.
pub trait DifferentiableFunction<T: Scalar>: Debug {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Size of the argument (`nq`).
    fn input_size(&self) -> usize;

    /// Size of the argument tangent space (`nv`), number of Jacobian columns.
    fn input_derivative_size(&self) -> usize;

    /// Space the value lives in.
    fn output_space(&self) -> &SpacePtr<T>;

    /// Size of the value.
    fn output_size(&self) -> usize {
        self.output_space().nq()
    }

    /// Number of Jacobian rows.
    fn output_derivative_size(&self) -> usize {
        self.output_space().nv()
    }

    /// Writes the value at `q` into `result`. Sizes are already checked.
    fn impl_compute(
        &mut self,
        ctx: &mut EvalContext<'_, T>,
        q: &Configuration<T>,
        result: &mut DVector<T>,
    ) -> Result<()>;

    /// Writes the Jacobian at `q` into `jacobian`. Sizes are already checked.
    fn impl_jacobian(
        &mut self,
        ctx: &mut EvalContext<'_, T>,
        q: &Configuration<T>,
        jacobian: &mut DMatrix<T>,
    ) -> Result<()>;

    /// Evaluates the function at `q`.
    fn value(
        &mut self,
        ctx: &mut EvalContext<'_, T>,
        q: &Configuration<T>,
        result: &mut DVector<T>,
    ) -> Result<()> {
        check_argument(self.name(), self.input_size(), q)?;
        if result.len() != self.output_size() {
            return Err(ConstraintError::dimension_mismatch(
                format!("{} value buffer", self.name()),
                self.output_size(),
                result.len(),
            ));
        }
        self.impl_compute(ctx, q, result)
    }

    /// Evaluates the Jacobian at `q`.
    fn jacobian(
        &mut self,
        ctx: &mut EvalContext<'_, T>,
        q: &Configuration<T>,
        jacobian: &mut DMatrix<T>,
    ) -> Result<()> {
        check_argument(self.name(), self.input_size(), q)?;
        let expected = (self.output_derivative_size(), self.input_derivative_size());
        if jacobian.shape() != expected {
            return Err(ConstraintError::dimension_mismatch(
                format!("{} jacobian buffer", self.name()),
                format!("{expected:?}"),
                format!("{:?}", jacobian.shape()),
            ));
        }
        self.impl_jacobian(ctx, q, jacobian)
    }

    /// A zero value buffer of the right size.
    fn new_output(&self) -> DVector<T> {
        DVector::zeros(self.output_size())
    }

    /// A zero Jacobian buffer of the right shape.
    fn new_jacobian(&self) -> DMatrix<T> {
        DMatrix::zeros(self.output_derivative_size(), self.input_derivative_size())
    }
}

/// Owned, type-erased differentiable function.
pub type BoxedFunction<T> = Box<dyn DifferentiableFunction<T>>;

fn check_argument<T: Scalar>(name: &str, expected: usize, q: &Configuration<T>) -> Result<()> {
    if q.len() == expected {
        Ok(())
    } else {
        Err(ConstraintError::dimension_mismatch(
            format!("{name} argument"),
            expected,
            q.len(),
        ))
    }
}

/// `x ↦ A·x + b` on vector spaces.
#[derive(Debug, Clone)]
pub struct AffineFunction<T: Scalar> {
    name: String,
    a: DMatrix<T>,
    b: DVector<T>,
    output_space: SpacePtr<T>,
}

impl<T: Scalar> AffineFunction<T> {
    /// Creates the function from its matrix and offset.
    pub fn new<S: Into<String>>(name: S, a: DMatrix<T>, b: DVector<T>) -> Result<Self> {
        let name = name.into();
        if a.nrows() != b.len() {
            return Err(ConstraintError::dimension_mismatch(
                format!("{name} offset"),
                a.nrows(),
                b.len(),
            ));
        }
        Ok(Self {
            output_space: VectorSpace::shared(a.nrows()),
            name,
            a,
            b,
        })
    }

    /// The linear map `x ↦ A·x`.
    pub fn linear<S: Into<String>>(name: S, a: DMatrix<T>) -> Self {
        let b = DVector::zeros(a.nrows());
        Self {
            output_space: VectorSpace::shared(a.nrows()),
            name: name.into(),
            a,
            b,
        }
    }

    /// The matrix.
    pub fn matrix(&self) -> &DMatrix<T> {
        &self.a
    }

    /// The offset.
    pub fn offset(&self) -> &DVector<T> {
        &self.b
    }
}

impl<T: Scalar> DifferentiableFunction<T> for AffineFunction<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_size(&self) -> usize {
        self.a.ncols()
    }

    fn input_derivative_size(&self) -> usize {
        self.a.ncols()
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
        result.copy_from(&self.b);
        result.gemv(T::one(), &self.a, q, T::one());
        Ok(())
    }

    fn impl_jacobian(
        &mut self,
        _ctx: &mut EvalContext<'_, T>,
        _q: &Configuration<T>,
        jacobian: &mut DMatrix<T>,
    ) -> Result<()> {
        jacobian.copy_from(&self.a);
        Ok(())
    }
}

/// A function returning the same element whatever the argument.
#[derive(Debug, Clone)]
pub struct ConstantFunction<T: Scalar> {
    name: String,
    value: DVector<T>,
    input_size: usize,
    input_derivative_size: usize,
    output_space: SpacePtr<T>,
}

impl<T: Scalar> ConstantFunction<T> {
    /// Constant `value` in `output_space`, for arguments of the given sizes.
    pub fn new<S: Into<String>>(
        name: S,
        value: DVector<T>,
        output_space: SpacePtr<T>,
        input_size: usize,
        input_derivative_size: usize,
    ) -> Result<Self> {
        output_space.check_element(value.as_slice())?;
        Ok(Self {
            name: name.into(),
            value,
            input_size,
            input_derivative_size,
            output_space,
        })
    }

    /// Constant vector of ℝᵐ.
    pub fn vector<S: Into<String>>(name: S, value: DVector<T>, input_size: usize) -> Self {
        Self {
            output_space: VectorSpace::shared(value.len()),
            name: name.into(),
            value,
            input_size,
            input_derivative_size: input_size,
        }
    }
}

impl<T: Scalar> DifferentiableFunction<T> for ConstantFunction<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_size(&self) -> usize {
        self.input_size
    }

    fn input_derivative_size(&self) -> usize {
        self.input_derivative_size
    }

    fn output_space(&self) -> &SpacePtr<T> {
        &self.output_space
    }

    fn impl_compute(
        &mut self,
        _ctx: &mut EvalContext<'_, T>,
        _q: &Configuration<T>,
        result: &mut DVector<T>,
    ) -> Result<()> {
        result.copy_from(&self.value);
        Ok(())
    }

    fn impl_jacobian(
        &mut self,
        _ctx: &mut EvalContext<'_, T>,
        _q: &Configuration<T>,
        jacobian: &mut DMatrix<T>,
    ) -> Result<()> {
        jacobian.fill(T::zero());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{kinematics::PlanarChain, liegroup::SpecialOrthogonal2};
    use approx::assert_relative_eq;

    #[test]
    fn test_affine_value_and_jacobian() {
        let a = DMatrix::from_row_slice(2, 3, &[1.0, 0.0, 2.0, 0.0, -1.0, 1.0]);
        let b = DVector::from_vec(vec![0.5, -0.5]);
        let mut f = AffineFunction::new("affine", a.clone(), b).unwrap();
        let mut ctx = EvalContext::detached();
        let q = DVector::from_vec(vec![1.0, 2.0, 3.0]);

        let mut value = f.new_output();
        f.value(&mut ctx, &q, &mut value).unwrap();
        assert_relative_eq!(value, DVector::from_vec(vec![7.5, 0.5]));

        let mut jacobian = f.new_jacobian();
        f.jacobian(&mut ctx, &q, &mut jacobian).unwrap();
        assert_relative_eq!(jacobian, a);
    }

    #[test]
    fn test_size_checks() {
        let mut f = AffineFunction::linear("linear", DMatrix::<f64>::identity(2, 2));
        let mut ctx = EvalContext::detached();

        let mut value = DVector::zeros(2);
        let err = f
            .value(&mut ctx, &DVector::zeros(3), &mut value)
            .unwrap_err();
        assert!(matches!(err, ConstraintError::DimensionMismatch { .. }));

        let mut jacobian = DMatrix::zeros(2, 3);
        let err = f
            .jacobian(&mut ctx, &DVector::zeros(2), &mut jacobian)
            .unwrap_err();
        assert!(matches!(err, ConstraintError::DimensionMismatch { .. }));

        assert!(AffineFunction::new("bad", DMatrix::<f64>::zeros(2, 2), DVector::zeros(3)).is_err());
    }

    #[test]
    fn test_constant_function() {
        let space = SpecialOrthogonal2::shared::<f64>();
        let mut f = ConstantFunction::new("goal", SpecialOrthogonal2::from_angle(0.2), space, 4, 3).unwrap();
        assert_eq!(f.output_size(), 2);
        assert_eq!(f.output_derivative_size(), 1);

        let mut ctx = EvalContext::detached();
        let mut jacobian = DMatrix::from_element(1, 3, 4.0);
        f.jacobian(&mut ctx, &DVector::zeros(4), &mut jacobian).unwrap();
        assert_eq!(jacobian, DMatrix::zeros(1, 3));

        let bad = ConstantFunction::new(
            "bad",
            DVector::from_vec(vec![3.0, 0.0]),
            SpecialOrthogonal2::shared::<f64>(),
            1,
            1,
        );
        assert!(matches!(bad.unwrap_err(), ConstraintError::LieGroup(_)));
    }

    #[test]
    fn test_context_kinematics() {
        let mut ctx = EvalContext::<f64>::detached();
        assert!(!ctx.has_kinematics());
        let err = ctx
            .update_kinematics("com", &DVector::zeros(2))
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, ConstraintError::MissingKinematics { .. }));

        let mut chain = PlanarChain::new(vec![1.0]);
        let q = chain.configuration(None, &[0.0]).unwrap();
        let mut ctx = EvalContext::new(&mut chain);
        let tip = ctx.update_kinematics("tip", &q).unwrap().frame_placement(1).unwrap();
        assert_relative_eq!(tip.translation.x, 1.0);

        let err = ctx
            .update_kinematics("tip", &DVector::from_vec(vec![0.0, 0.0]))
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, ConstraintError::Kinematics(_)));
    }
}
