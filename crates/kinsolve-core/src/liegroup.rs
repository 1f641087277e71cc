//! Lie-group configuration spaces.
//!
//! Configurations of a robot do not live in a flat vector space as soon as
//! the model has rotational joints. This module provides the small set of
//! Lie-group primitives the constraint engine consumes:
//!
//! - **integrate**: q ⊕ v, move along a tangent vector
//! - **difference**: q₁ ⊖ q₀, the tangent vector at q₀ that reaches q₁
//! - **difference_jacobian**: derivative of q₁ ⊖ q₀ with respect to either
//!   argument, expressed in tangent coordinates
//!
//! Elements are stored as flat `nq`-vectors and tangent vectors as flat
//! `nv`-vectors. All operations write into caller-provided buffers.
//!
//! # Spaces
//!
//! - [`VectorSpace`]: ℝⁿ, where ⊕ and ⊖ are plain addition and subtraction
//! - [`SpecialOrthogonal2`]: planar rotations stored as unit complex numbers
//!   `(cos θ, sin θ)`, with nq = 2 and nv = 1
//! - [`ProductSpace`]: Cartesian product, operations act component-wise and
//!   derivatives are block diagonal

use crate::{
    error::LieGroupError,
    types::{Configuration, Scalar},
};
use nalgebra::DMatrixViewMut;
use num_traits::Float;
use std::{fmt::Debug, sync::Arc};

/// Result type for Lie-group primitives.
pub type LieResult<T> = std::result::Result<T, LieGroupError>;

/// Argument of `q1 ⊖ q0` a difference Jacobian is taken with respect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DifferenceArg {
    /// Derivative with respect to `q0`
    First,
    /// Derivative with respect to `q1`
    Second,
}

/// A configuration space with Lie-group structure.
pub trait LieGroupSpace<T: Scalar>: Debug + Send + Sync {
    /// Human readable name of the space.
    fn name(&self) -> &str;

    /// Size of an element.
    fn nq(&self) -> usize;

    /// Size of a tangent vector.
    fn nv(&self) -> usize;

    /// The neutral element.
    fn neutral(&self) -> Configuration<T>;

    /// Whether `q` is an element of the space, within `tol`.
    fn is_valid(&self, q: &[T], tol: T) -> bool;

    /// Writes `q ⊕ v` into `out`.
    fn integrate(&self, q: &[T], v: &[T], out: &mut [T]) -> LieResult<()>;

    /// Writes `q1 ⊖ q0` into `out`.
    fn difference(&self, q0: &[T], q1: &[T], out: &mut [T]) -> LieResult<()>;

    /// Writes the nv × nv derivative of `q1 ⊖ q0` with respect to `arg` into `out`.
    fn difference_jacobian(
        &self,
        q0: &[T],
        q1: &[T],
        arg: DifferenceArg,
        out: DMatrixViewMut<'_, T>,
    ) -> LieResult<()>;

    /// Checks the size of an element and its membership.
    fn check_element(&self, q: &[T]) -> LieResult<()> {
        check_len(self.name(), self.nq(), q.len())?;
        if self.is_valid(q, T::UNIT_NORM_TOLERANCE) {
            Ok(())
        } else {
            Err(LieGroupError::InvalidElement {
                space: self.name().to_string(),
                reason: "element violates the space constraints".to_string(),
            })
        }
    }
}

/// Shared handle to a configuration space.
pub type SpacePtr<T> = Arc<dyn LieGroupSpace<T>>;

fn check_len(space: &str, expected: usize, actual: usize) -> LieResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(LieGroupError::SizeMismatch {
            space: space.to_string(),
            expected,
            actual,
        })
    }
}

fn check_jacobian_shape<T: Scalar>(space: &str, nv: usize, out: &DMatrixViewMut<'_, T>) -> LieResult<()> {
    check_len(space, nv, out.nrows())?;
    check_len(space, nv, out.ncols())
}

/// The flat space ℝⁿ.
#[derive(Debug, Clone)]
pub struct VectorSpace {
    dim: usize,
    name: String,
}

impl VectorSpace {
    /// Creates ℝⁿ.
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            name: format!("R^{dim}"),
        }
    }

    /// Creates ℝⁿ behind a shared handle.
    pub fn shared<T: Scalar>(dim: usize) -> SpacePtr<T> {
        Arc::new(Self::new(dim))
    }
}

impl<T: Scalar> LieGroupSpace<T> for VectorSpace {
    fn name(&self) -> &str {
        &self.name
    }

    fn nq(&self) -> usize {
        self.dim
    }

    fn nv(&self) -> usize {
        self.dim
    }

    fn neutral(&self) -> Configuration<T> {
        Configuration::zeros(self.dim)
    }

    fn is_valid(&self, q: &[T], _tol: T) -> bool {
        q.len() == self.dim && q.iter().all(|x| Float::is_finite(*x))
    }

    fn integrate(&self, q: &[T], v: &[T], out: &mut [T]) -> LieResult<()> {
        check_len(&self.name, self.dim, q.len())?;
        check_len(&self.name, self.dim, v.len())?;
        check_len(&self.name, self.dim, out.len())?;
        for ((o, &a), &b) in out.iter_mut().zip(q).zip(v) {
            *o = a + b;
        }
        Ok(())
    }

    fn difference(&self, q0: &[T], q1: &[T], out: &mut [T]) -> LieResult<()> {
        check_len(&self.name, self.dim, q0.len())?;
        check_len(&self.name, self.dim, q1.len())?;
        check_len(&self.name, self.dim, out.len())?;
        for ((o, &a), &b) in out.iter_mut().zip(q0).zip(q1) {
            *o = b - a;
        }
        Ok(())
    }

    fn difference_jacobian(
        &self,
        q0: &[T],
        q1: &[T],
        arg: DifferenceArg,
        mut out: DMatrixViewMut<'_, T>,
    ) -> LieResult<()> {
        check_len(&self.name, self.dim, q0.len())?;
        check_len(&self.name, self.dim, q1.len())?;
        check_jacobian_shape(&self.name, self.dim, &out)?;
        out.fill(T::zero());
        let diag = match arg {
            DifferenceArg::First => -T::one(),
            DifferenceArg::Second => T::one(),
        };
        out.fill_diagonal(diag);
        Ok(())
    }
}

/// Planar rotations SO(2), stored as `(cos θ, sin θ)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpecialOrthogonal2;

impl SpecialOrthogonal2 {
    const NAME: &'static str = "SO(2)";

    /// Creates SO(2) behind a shared handle.
    pub fn shared<T: Scalar>() -> SpacePtr<T> {
        Arc::new(Self)
    }

    /// Element representing the angle `theta`.
    pub fn from_angle<T: Scalar>(theta: T) -> Configuration<T> {
        Configuration::from_vec(vec![Float::cos(theta), Float::sin(theta)])
    }

    /// Angle in `(-π, π]` of an element.
    pub fn angle<T: Scalar>(q: &[T]) -> T {
        Float::atan2(q[1], q[0])
    }
}

impl<T: Scalar> LieGroupSpace<T> for SpecialOrthogonal2 {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn nq(&self) -> usize {
        2
    }

    fn nv(&self) -> usize {
        1
    }

    fn neutral(&self) -> Configuration<T> {
        Configuration::from_vec(vec![T::one(), T::zero()])
    }

    fn is_valid(&self, q: &[T], tol: T) -> bool {
        q.len() == 2 && Float::abs(q[0] * q[0] + q[1] * q[1] - T::one()) <= tol
    }

    fn integrate(&self, q: &[T], v: &[T], out: &mut [T]) -> LieResult<()> {
        check_len(Self::NAME, 2, q.len())?;
        check_len(Self::NAME, 1, v.len())?;
        check_len(Self::NAME, 2, out.len())?;
        let (c, s) = (q[0], q[1]);
        let (cv, sv) = (Float::cos(v[0]), Float::sin(v[0]));
        out[0] = c * cv - s * sv;
        out[1] = s * cv + c * sv;
        Ok(())
    }

    fn difference(&self, q0: &[T], q1: &[T], out: &mut [T]) -> LieResult<()> {
        check_len(Self::NAME, 2, q0.len())?;
        check_len(Self::NAME, 2, q1.len())?;
        check_len(Self::NAME, 1, out.len())?;
        // Angle of conj(q0) * q1.
        let c = q0[0] * q1[0] + q0[1] * q1[1];
        let s = q0[0] * q1[1] - q0[1] * q1[0];
        out[0] = Float::atan2(s, c);
        Ok(())
    }

    fn difference_jacobian(
        &self,
        q0: &[T],
        q1: &[T],
        arg: DifferenceArg,
        mut out: DMatrixViewMut<'_, T>,
    ) -> LieResult<()> {
        check_len(Self::NAME, 2, q0.len())?;
        check_len(Self::NAME, 2, q1.len())?;
        check_jacobian_shape(Self::NAME, 1, &out)?;
        out[(0, 0)] = match arg {
            DifferenceArg::First => -T::one(),
            DifferenceArg::Second => T::one(),
        };
        Ok(())
    }
}

/// Cartesian product of spaces.
#[derive(Debug, Clone)]
pub struct ProductSpace<T: Scalar> {
    components: Vec<SpacePtr<T>>,
    q_offsets: Vec<usize>,
    v_offsets: Vec<usize>,
    nq: usize,
    nv: usize,
    name: String,
}

impl<T: Scalar> ProductSpace<T> {
    /// Creates the product of `components`, in order.
    pub fn new(components: Vec<SpacePtr<T>>) -> Self {
        let mut q_offsets = Vec::with_capacity(components.len());
        let mut v_offsets = Vec::with_capacity(components.len());
        let (mut nq, mut nv) = (0, 0);
        for c in &components {
            q_offsets.push(nq);
            v_offsets.push(nv);
            nq += c.nq();
            nv += c.nv();
        }
        let name = if components.is_empty() {
            "R^0".to_string()
        } else {
            components
                .iter()
                .map(|c| c.name().to_string())
                .collect::<Vec<_>>()
                .join(" x ")
        };
        Self {
            components,
            q_offsets,
            v_offsets,
            nq,
            nv,
            name,
        }
    }

    /// Creates the product behind a shared handle.
    pub fn shared(components: Vec<SpacePtr<T>>) -> SpacePtr<T> {
        Arc::new(Self::new(components))
    }

    /// The component spaces.
    pub fn components(&self) -> &[SpacePtr<T>] {
        &self.components
    }

    fn check_sizes(&self, q: &[T], v: Option<&[T]>) -> LieResult<()> {
        check_len(&self.name, self.nq, q.len())?;
        if let Some(v) = v {
            check_len(&self.name, self.nv, v.len())?;
        }
        Ok(())
    }

    fn q_range(&self, i: usize) -> std::ops::Range<usize> {
        self.q_offsets[i]..self.q_offsets[i] + self.components[i].nq()
    }

    fn v_range(&self, i: usize) -> std::ops::Range<usize> {
        self.v_offsets[i]..self.v_offsets[i] + self.components[i].nv()
    }
}

impl<T: Scalar> LieGroupSpace<T> for ProductSpace<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn nq(&self) -> usize {
        self.nq
    }

    fn nv(&self) -> usize {
        self.nv
    }

    fn neutral(&self) -> Configuration<T> {
        let mut q = Configuration::zeros(self.nq);
        for (i, c) in self.components.iter().enumerate() {
            q.rows_mut(self.q_offsets[i], c.nq()).copy_from(&c.neutral());
        }
        q
    }

    fn is_valid(&self, q: &[T], tol: T) -> bool {
        q.len() == self.nq
            && self
                .components
                .iter()
                .enumerate()
                .all(|(i, c)| c.is_valid(&q[self.q_range(i)], tol))
    }

    fn integrate(&self, q: &[T], v: &[T], out: &mut [T]) -> LieResult<()> {
        self.check_sizes(q, Some(v))?;
        check_len(&self.name, self.nq, out.len())?;
        for (i, c) in self.components.iter().enumerate() {
            let (qr, vr) = (self.q_range(i), self.v_range(i));
            c.integrate(&q[qr.clone()], &v[vr], &mut out[qr])?;
        }
        Ok(())
    }

    fn difference(&self, q0: &[T], q1: &[T], out: &mut [T]) -> LieResult<()> {
        self.check_sizes(q0, None)?;
        self.check_sizes(q1, Some(&*out))?;
        for (i, c) in self.components.iter().enumerate() {
            let (qr, vr) = (self.q_range(i), self.v_range(i));
            c.difference(&q0[qr.clone()], &q1[qr], &mut out[vr])?;
        }
        Ok(())
    }

    fn difference_jacobian(
        &self,
        q0: &[T],
        q1: &[T],
        arg: DifferenceArg,
        mut out: DMatrixViewMut<'_, T>,
    ) -> LieResult<()> {
        self.check_sizes(q0, None)?;
        self.check_sizes(q1, None)?;
        check_jacobian_shape(&self.name, self.nv, &out)?;
        out.fill(T::zero());
        for (i, c) in self.components.iter().enumerate() {
            let (qr, off, n) = (self.q_range(i), self.v_offsets[i], c.nv());
            c.difference_jacobian(
                &q0[qr.clone()],
                &q1[qr],
                arg,
                out.view_mut((off, off), (n, n)),
            )?;
        }
        Ok(())
    }
}
