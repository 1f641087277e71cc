//! Differentiable functions defined by an expression graph.

use crate::expression::{ExpressionGraph, NodeId};
use kinsolve_core::{
    error::Result,
    function::{DifferentiableFunction, EvalContext},
    liegroup::{SpacePtr, VectorSpace},
    mask::Mask,
    types::{Configuration, DMatrix, DVector, Scalar},
};
use tracing::trace;

/// A differentiable function whose value is a masked expression.
///
/// Each evaluation refreshes the kinematic model for the argument,
/// invalidates the graph and computes the root node. Only the rows
/// selected by the mask are exposed, in order.
#[derive(Debug, Clone)]
pub struct SymbolicFunction<T: Scalar> {
    name: String,
    input_size: usize,
    graph: ExpressionGraph<T>,
    root: NodeId,
    mask: Mask,
    output_space: SpacePtr<T>,
}

impl<T: Scalar> SymbolicFunction<T> {
    /// Creates the function exposing the rows of `root` selected by `mask`.
    ///
    /// `input_size` is the configuration size of the model; the velocity
    /// size is the column count of the graph.
    ///
    /// # Errors
    ///
    /// `InvalidMask` if the mask length differs from the row count of `root`.
    pub fn new<S: Into<String>>(
        name: S,
        input_size: usize,
        graph: ExpressionGraph<T>,
        root: NodeId,
        mask: Mask,
    ) -> Result<Self> {
        mask.check_length(graph.rows(root)?)?;
        Ok(Self {
            name: name.into(),
            input_size,
            output_space: VectorSpace::shared(mask.count()),
            graph,
            root,
            mask,
        })
    }

    /// Creates the function exposing every row of `root`.
    pub fn unmasked<S: Into<String>>(
        name: S,
        input_size: usize,
        graph: ExpressionGraph<T>,
        root: NodeId,
    ) -> Result<Self> {
        let mask = Mask::all(graph.rows(root)?);
        Self::new(name, input_size, graph, root, mask)
    }

    /// The expression graph.
    pub fn graph(&self) -> &ExpressionGraph<T> {
        &self.graph
    }

    /// The root node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The row mask.
    pub fn mask(&self) -> &Mask {
        &self.mask
    }
}

impl<T: Scalar> DifferentiableFunction<T> for SymbolicFunction<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_size(&self) -> usize {
        self.input_size
    }

    fn input_derivative_size(&self) -> usize {
        self.graph.nv()
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
        let kin = if self.graph.uses_kinematics() {
            Some(ctx.update_kinematics(&self.name, q)?)
        } else {
            None
        };
        self.graph.invalidate();
        trace!(
            function = %self.name,
            generation = self.graph.generation(),
            nodes = self.graph.len(),
            "evaluating expression"
        );
        let value = self.graph.compute_value(self.root, kin)?;
        self.mask.select(value, result);
        Ok(())
    }

    fn impl_jacobian(
        &mut self,
        ctx: &mut EvalContext<'_, T>,
        q: &Configuration<T>,
        jacobian: &mut DMatrix<T>,
    ) -> Result<()> {
        let kin = if self.graph.uses_kinematics() {
            Some(ctx.update_kinematics(&self.name, q)?)
        } else {
            None
        };
        self.graph.invalidate();
        let full = self.graph.compute_jacobian(self.root, kin)?;
        self.mask.select_rows(full, jacobian);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinsolve_core::{error::ConstraintError, test_utils::FixedFrameKinematics};
    use nalgebra::{Isometry3, Vector3};
    use proptest::prelude::*;

    fn frame_function(mask: Mask) -> (FixedFrameKinematics<f64>, SymbolicFunction<f64>) {
        let mut kin = FixedFrameKinematics::new(2);
        let frame = kin.add_frame(Isometry3::translation(1.0, 2.0, 3.0));
        let mut jacobian = DMatrix::zeros(6, 2);
        jacobian[(0, 0)] = 1.0;
        jacobian[(2, 1)] = -1.0;
        kin.set_jacobian(frame, jacobian);

        let mut graph = ExpressionGraph::<f64>::for_model(&kin);
        let p = graph.point_in_frame(frame, Vector3::new(0.0, 1.0, 0.0)).unwrap();
        let f = SymbolicFunction::new("point", 2, graph, p, mask).unwrap();
        (kin, f)
    }

    #[test]
    fn test_masked_value_and_jacobian() {
        let (mut kin, mut f) = frame_function(Mask::new(vec![true, false, true]));
        assert_eq!(f.output_size(), 2);
        let q = DVector::zeros(2);
        let mut ctx = EvalContext::new(&mut kin);

        let mut value = f.new_output();
        f.value(&mut ctx, &q, &mut value).unwrap();
        assert_eq!(value, DVector::from_vec(vec![1.0, 3.0]));

        let mut jacobian = f.new_jacobian();
        f.jacobian(&mut ctx, &q, &mut jacobian).unwrap();
        assert_eq!(jacobian, DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -1.0]));
    }

    #[test]
    fn test_mask_length_is_checked() {
        let mut kin = FixedFrameKinematics::<f64>::new(1);
        let frame = kin.add_frame(Isometry3::identity());
        let mut graph = ExpressionGraph::<f64>::for_model(&kin);
        let p = graph.frame_origin(frame).unwrap();
        let err = SymbolicFunction::new("bad", 1, graph, p, Mask::all(2)).unwrap_err();
        assert!(matches!(err, ConstraintError::InvalidMask { .. }));
    }

    #[test]
    fn test_evaluation_refreshes_kinematics() {
        let (mut kin, mut f) = frame_function(Mask::all(3));
        let q = DVector::from_vec(vec![0.5, 0.25]);
        {
            let mut ctx = EvalContext::new(&mut kin);
            let mut value = f.new_output();
            f.value(&mut ctx, &q, &mut value).unwrap();
        }
        assert_eq!(kin.forward_kinematics_calls(), 1);
        assert_eq!(kin.configuration(), &q);
    }

    #[test]
    fn test_detached_context_is_rejected() {
        let (_, mut f) = frame_function(Mask::all(3));
        let mut value = f.new_output();
        let err = f
            .value(&mut EvalContext::detached(), &DVector::zeros(2), &mut value)
            .unwrap_err();
        assert!(matches!(err, ConstraintError::MissingKinematics { .. }));
    }

    proptest! {
        #[test]
        fn prop_mask_exposes_true_rows(bits in proptest::collection::vec(any::<bool>(), 5)) {
            let mut graph = ExpressionGraph::<f64>::new(2);
            let values = DVector::from_vec(vec![1.0, -2.0, 3.0, -4.0, 5.0]);
            let root = graph.constant(values.clone());
            let mask = Mask::new(bits.clone());
            let mut f = SymbolicFunction::new("masked", 2, graph, root, mask).unwrap();

            let mut value = f.new_output();
            f.value(&mut EvalContext::detached(), &DVector::zeros(2), &mut value).unwrap();
            let expected: Vec<f64> = bits.iter().zip(values.iter()).filter(|(b, _)| **b).map(|(_, v)| *v).collect();
            prop_assert_eq!(value.len(), bits.iter().filter(|b| **b).count());
            prop_assert_eq!(value.as_slice(), expected.as_slice());

            let mut jacobian = f.new_jacobian();
            f.jacobian(&mut EvalContext::detached(), &DVector::zeros(2), &mut jacobian).unwrap();
            prop_assert_eq!(jacobian.shape(), (expected.len(), 2));
        }
    }
}
