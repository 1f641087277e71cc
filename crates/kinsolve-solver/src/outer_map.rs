//! Outer maps of explicit functions.
//!
//! An explicit function enforces `g(q_out) = f(q_in)`. The outer map `g` is
//! chosen once, when the explicit function is built: either the identity
//! ([`IdentityMap`], every operation is a plain copy) or an arbitrary
//! differentiable function ([`GenericMap`]) whose Jacobian is inverted to
//! obtain the elimination Jacobian.

use kinsolve_core::{
    error::{ConstraintError, Result},
    function::{BoxedFunction, DifferentiableFunction, EvalContext},
    types::{Configuration, DMatrix, DVector, Scalar},
};
use num_traits::Float;
use std::fmt::Debug;
use tracing::warn;

/// Pivots within this factor of the singularity tolerance trigger a warning.
const NEAR_SINGULAR_FACTOR: f64 = 1e3;

/// The `g` side of an explicit function `g(q_out) = f(q_in)`.
pub trait OuterMap<T: Scalar>: Debug {
    /// Whether `g` is the identity.
    fn is_identity(&self) -> bool;

    /// Checks that `g` maps the output variables into the value space of `f`.
    ///
    /// `output_size` and `output_derivative_size` are the numbers of
    /// eliminated configuration and velocity variables.
    fn validate(
        &self,
        inner: &dyn DifferentiableFunction<T>,
        output_size: usize,
        output_derivative_size: usize,
    ) -> Result<()>;

    /// Writes `g(q_out)` into `result`.
    fn value(
        &mut self,
        ctx: &mut EvalContext<'_, T>,
        q_out: &Configuration<T>,
        result: &mut DVector<T>,
    ) -> Result<()>;

    /// Writes `d_second · Jg(q_out)` into `result`.
    ///
    /// `d_second` is the derivative of the residual difference with respect
    /// to its second argument.
    fn residual_jacobian(
        &mut self,
        ctx: &mut EvalContext<'_, T>,
        q_out: &Configuration<T>,
        d_second: &DMatrix<T>,
        result: &mut DMatrix<T>,
    ) -> Result<()>;

    /// Replaces `rhs` by `Jg(q_out)⁻¹ · rhs`.
    fn solve_jacobian(
        &mut self,
        ctx: &mut EvalContext<'_, T>,
        q_out: &Configuration<T>,
        rhs: &mut DMatrix<T>,
    ) -> Result<()>;

    /// Writes `g⁻¹(y)` into `q_out`.
    fn invert(
        &mut self,
        ctx: &mut EvalContext<'_, T>,
        y: &DVector<T>,
        q_out: &mut Configuration<T>,
    ) -> Result<()>;

    /// Sets the pivot magnitude below which `Jg` is treated as singular.
    fn set_singularity_tolerance(&mut self, _tolerance: T) {}
}

/// Owned, type-erased outer map.
pub type BoxedOuterMap<T> = Box<dyn OuterMap<T>>;

/// `g = id`: the eliminated variables equal `f(q_in)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityMap;

impl<T: Scalar> OuterMap<T> for IdentityMap {
    fn is_identity(&self) -> bool {
        true
    }

    fn validate(
        &self,
        inner: &dyn DifferentiableFunction<T>,
        output_size: usize,
        output_derivative_size: usize,
    ) -> Result<()> {
        if inner.output_size() != output_size {
            return Err(ConstraintError::dimension_mismatch(
                format!("{} output configuration", inner.name()),
                inner.output_size(),
                output_size,
            ));
        }
        if inner.output_derivative_size() != output_derivative_size {
            return Err(ConstraintError::dimension_mismatch(
                format!("{} output velocity", inner.name()),
                inner.output_derivative_size(),
                output_derivative_size,
            ));
        }
        Ok(())
    }

    fn value(
        &mut self,
        _ctx: &mut EvalContext<'_, T>,
        q_out: &Configuration<T>,
        result: &mut DVector<T>,
    ) -> Result<()> {
        result.copy_from(q_out);
        Ok(())
    }

    fn residual_jacobian(
        &mut self,
        _ctx: &mut EvalContext<'_, T>,
        _q_out: &Configuration<T>,
        d_second: &DMatrix<T>,
        result: &mut DMatrix<T>,
    ) -> Result<()> {
        result.copy_from(d_second);
        Ok(())
    }

    fn solve_jacobian(
        &mut self,
        _ctx: &mut EvalContext<'_, T>,
        _q_out: &Configuration<T>,
        _rhs: &mut DMatrix<T>,
    ) -> Result<()> {
        Ok(())
    }

    fn invert(
        &mut self,
        _ctx: &mut EvalContext<'_, T>,
        y: &DVector<T>,
        q_out: &mut Configuration<T>,
    ) -> Result<()> {
        q_out.copy_from(y);
        Ok(())
    }
}

/// An arbitrary outer map with an optional closed-form inverse.
///
/// `g` takes the eliminated configuration variables and returns an element
/// of the value space of `f`. Its Jacobian must be square and invertible
/// wherever the elimination Jacobian is requested; the inverse is only
/// needed to propagate solutions forward.
#[derive(Debug)]
pub struct GenericMap<T: Scalar> {
    g: BoxedFunction<T>,
    inverse: Option<BoxedFunction<T>>,
    singularity_tolerance: T,
    jacobian: DMatrix<T>,
}

impl<T: Scalar> GenericMap<T> {
    /// Outer map `g` without inverse.
    pub fn new(g: BoxedFunction<T>) -> Self {
        let jacobian = g.new_jacobian();
        Self {
            g,
            inverse: None,
            singularity_tolerance: T::SINGULARITY_TOLERANCE,
            jacobian,
        }
    }

    /// Sets the closed-form inverse of `g`.
    pub fn with_inverse(mut self, inverse: BoxedFunction<T>) -> Self {
        self.inverse = Some(inverse);
        self
    }

    /// Sets the pivot magnitude below which `Jg` is treated as singular.
    pub fn with_singularity_tolerance(mut self, tolerance: T) -> Self {
        self.singularity_tolerance = tolerance;
        self
    }

    /// The outer function.
    pub fn function(&self) -> &dyn DifferentiableFunction<T> {
        self.g.as_ref()
    }

    /// Whether a closed-form inverse is available.
    pub fn has_inverse(&self) -> bool {
        self.inverse.is_some()
    }
}

impl<T: Scalar> OuterMap<T> for GenericMap<T> {
    fn is_identity(&self) -> bool {
        false
    }

    fn validate(
        &self,
        inner: &dyn DifferentiableFunction<T>,
        output_size: usize,
        output_derivative_size: usize,
    ) -> Result<()> {
        let g = self.g.as_ref();
        let context = |what: &str| format!("outer map {} {what}", g.name());
        let checks = [
            ("argument", output_size, g.input_size()),
            ("argument derivative", output_derivative_size, g.input_derivative_size()),
            ("value", inner.output_size(), g.output_size()),
            ("value derivative", inner.output_derivative_size(), g.output_derivative_size()),
            // Jg has to be square to be inverted.
            ("jacobian rows", output_derivative_size, g.output_derivative_size()),
        ];
        for (what, expected, actual) in checks {
            if expected != actual {
                return Err(ConstraintError::dimension_mismatch(context(what), expected, actual));
            }
        }
        if let Some(inverse) = &self.inverse {
            if inverse.input_size() != g.output_size() || inverse.output_size() != output_size {
                return Err(ConstraintError::dimension_mismatch(
                    format!("inverse of outer map {}", g.name()),
                    format!("{} -> {}", g.output_size(), output_size),
                    format!("{} -> {}", inverse.input_size(), inverse.output_size()),
                ));
            }
        }
        Ok(())
    }

    fn value(
        &mut self,
        ctx: &mut EvalContext<'_, T>,
        q_out: &Configuration<T>,
        result: &mut DVector<T>,
    ) -> Result<()> {
        self.g.value(ctx, q_out, result)
    }

    fn residual_jacobian(
        &mut self,
        ctx: &mut EvalContext<'_, T>,
        q_out: &Configuration<T>,
        d_second: &DMatrix<T>,
        result: &mut DMatrix<T>,
    ) -> Result<()> {
        self.g.jacobian(ctx, q_out, &mut self.jacobian)?;
        result.gemm(T::one(), d_second, &self.jacobian, T::zero());
        Ok(())
    }

    fn solve_jacobian(
        &mut self,
        ctx: &mut EvalContext<'_, T>,
        q_out: &Configuration<T>,
        rhs: &mut DMatrix<T>,
    ) -> Result<()> {
        self.g.jacobian(ctx, q_out, &mut self.jacobian)?;
        let lu = self.jacobian.clone().lu();
        let pivot = lu
            .u()
            .diagonal()
            .iter()
            .map(|p| <T as Float>::abs(*p))
            .fold(<T as Float>::infinity(), |a, b| <T as Float>::min(a, b));

        if pivot <= self.singularity_tolerance || !lu.solve_mut(rhs) {
            return Err(ConstraintError::SingularOuterMap {
                function: self.g.name().to_string(),
                pivot: Scalar::to_f64(pivot),
            });
        }
        if pivot <= self.singularity_tolerance * <T as Scalar>::from_f64(NEAR_SINGULAR_FACTOR) {
            warn!(
                function = self.g.name(),
                pivot = Scalar::to_f64(pivot),
                tolerance = Scalar::to_f64(self.singularity_tolerance),
                "outer map jacobian is close to singular"
            );
        }
        Ok(())
    }

    fn set_singularity_tolerance(&mut self, tolerance: T) {
        self.singularity_tolerance = tolerance;
    }

    fn invert(
        &mut self,
        ctx: &mut EvalContext<'_, T>,
        y: &DVector<T>,
        q_out: &mut Configuration<T>,
    ) -> Result<()> {
        match self.inverse.as_mut() {
            Some(inverse) => inverse.value(ctx, y, q_out),
            None => Err(ConstraintError::not_implemented(format!(
                "inverse of outer map {}",
                self.g.name()
            ))),
        }
    }
}
