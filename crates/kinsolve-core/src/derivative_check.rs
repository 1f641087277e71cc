//! Finite-difference verification of analytic Jacobians.
//!
//! The reference Jacobian is computed by central differences on the
//! manifold: the argument is moved with `q ⊕ (±h eᵢ)` in the input space
//! and the two values are compared with `⊖` in the output space, so the
//! check is meaningful for functions of rotations as well.

use crate::{
    config::FiniteDifferenceConfig,
    error::Result,
    function::{DifferentiableFunction, EvalContext},
    liegroup::LieGroupSpace,
    types::{Configuration, DMatrix, DVector, Scalar},
};
use num_traits::Float;
use tracing::debug;

/// Compares analytic Jacobians against central finite differences.
#[derive(Debug, Clone, Copy, Default)]
pub struct DerivativeChecker;

impl DerivativeChecker {
    /// Central finite-difference Jacobian of `f` at `q`.
    ///
    /// `input_space` is the space `q` lives in. Its sizes must match the
    /// sizes declared by `f`.
    pub fn finite_difference_jacobian<T, F>(
        f: &mut F,
        ctx: &mut EvalContext<'_, T>,
        input_space: &dyn LieGroupSpace<T>,
        q: &Configuration<T>,
        step: T,
    ) -> Result<DMatrix<T>>
    where
        T: Scalar,
        F: DifferentiableFunction<T> + ?Sized,
    {
        let nv = f.input_derivative_size();
        let output_space = f.output_space().clone();
        let mut jacobian = DMatrix::zeros(f.output_derivative_size(), nv);

        let mut direction = DVector::zeros(nv);
        let mut q_plus = q.clone();
        let mut q_minus = q.clone();
        let mut y_plus = f.new_output();
        let mut y_minus = f.new_output();
        let mut column = DVector::zeros(f.output_derivative_size());
        let inv_two_h = T::one() / (step + step);

        for i in 0..nv {
            direction.fill(T::zero());
            direction[i] = step;
            input_space.integrate(q.as_slice(), direction.as_slice(), q_plus.as_mut_slice())?;
            direction[i] = -step;
            input_space.integrate(q.as_slice(), direction.as_slice(), q_minus.as_mut_slice())?;

            f.value(ctx, &q_plus, &mut y_plus)?;
            f.value(ctx, &q_minus, &mut y_minus)?;
            output_space.difference(y_minus.as_slice(), y_plus.as_slice(), column.as_mut_slice())?;
            jacobian.set_column(i, &(&column * inv_two_h));
        }
        Ok(jacobian)
    }

    /// Largest entry-wise relative error between two Jacobians.
    ///
    /// Entries are compared as `|a - b| / max(1, |b|)`.
    pub fn relative_error<T: Scalar>(analytic: &DMatrix<T>, reference: &DMatrix<T>) -> T {
        analytic
            .iter()
            .zip(reference.iter())
            .map(|(a, b)| <T as Float>::abs(*a - *b) / <T as Float>::max(T::one(), <T as Float>::abs(*b)))
            .fold(T::zero(), |acc, e| <T as Float>::max(acc, e))
    }

    /// Checks the analytic Jacobian of `f` at `q`.
    ///
    /// # Returns
    ///
    /// A tuple of (passes, max_error) where passes indicates if the
    /// Jacobian matches finite differences within `config.tolerance`.
    pub fn check_jacobian<T, F>(
        f: &mut F,
        ctx: &mut EvalContext<'_, T>,
        input_space: &dyn LieGroupSpace<T>,
        q: &Configuration<T>,
        config: &FiniteDifferenceConfig<T>,
    ) -> Result<(bool, T)>
    where
        T: Scalar,
        F: DifferentiableFunction<T> + ?Sized,
    {
        let mut analytic = f.new_jacobian();
        f.jacobian(ctx, q, &mut analytic)?;
        let reference = Self::finite_difference_jacobian(f, ctx, input_space, q, config.step)?;
        let error = Self::relative_error(&analytic, &reference);
        debug!(
            function = f.name(),
            error = Scalar::to_f64(error),
            tolerance = Scalar::to_f64(config.tolerance),
            "finite-difference jacobian check"
        );
        Ok((error <= config.tolerance, error))
    }
}
