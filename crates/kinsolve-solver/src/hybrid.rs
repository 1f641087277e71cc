//! Hybrid explicit/implicit solver.
//!
//! The solver owns a stack of implicit constraints and an
//! [`ExplicitSystem`]. Explicit functions eliminate part of the velocity
//! variables in closed form; the remaining ones are free. For each implicit
//! constraint `F_i`, [`HybridSolver::update_jacobian`] computes the reduced
//! Jacobian over the free variables only:
//!
//! ```text
//! J_i,red = J_i[:, free] + J_i[:, out] · Je
//! ```
//!
//! where `Je = ∂q_out/∂q_free` is the compressed Jacobian of the explicit
//! system. An outer iterative solver then works on the free variables and
//! lifts its steps back with [`HybridSolver::expand_free_step`].

use crate::{explicit::ExplicitFunction, explicit_system::ExplicitSystem};
use kinsolve_core::{
    config::HybridSolverConfig,
    error::{ConstraintError, Result},
    function::{BoxedFunction, DifferentiableFunction, EvalContext},
    liegroup::SpacePtr,
    segments::BlockIndices,
    types::{Configuration, DMatrix, DVector, Scalar, TangentVector},
};
use tracing::{debug, trace};

/// An implicit constraint of the stack with its buffers.
#[derive(Debug)]
pub struct StackEntry<T: Scalar> {
    function: BoxedFunction<T>,
    slot: usize,
    residual: DVector<T>,
    jacobian: DMatrix<T>,
    reduced: DMatrix<T>,
    eliminated_columns: DMatrix<T>,
}

impl<T: Scalar> StackEntry<T> {
    fn resize(&mut self, free: usize, eliminated: usize) {
        let rows = self.jacobian.nrows();
        self.reduced = DMatrix::zeros(rows, free);
        self.eliminated_columns = DMatrix::zeros(rows, eliminated);
    }

    /// Name of the constraint.
    pub fn name(&self) -> &str {
        self.function.name()
    }

    /// Position in the stack.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// The constraint.
    pub fn function(&self) -> &dyn DifferentiableFunction<T> {
        self.function.as_ref()
    }

    /// Residual at the last [`HybridSolver::compute_values`].
    pub fn residual(&self) -> &DVector<T> {
        &self.residual
    }

    /// Full Jacobian at the last [`HybridSolver::update_jacobian`].
    pub fn jacobian(&self) -> &DMatrix<T> {
        &self.jacobian
    }

    /// Jacobian over the free variables at the last
    /// [`HybridSolver::update_jacobian`].
    pub fn reduced_jacobian(&self) -> &DMatrix<T> {
        &self.reduced
    }
}

/// Stack of implicit constraints reduced through explicit eliminations.
#[derive(Debug)]
pub struct HybridSolver<T: Scalar> {
    config_space: SpacePtr<T>,
    config: HybridSolverConfig<T>,
    stack: Vec<StackEntry<T>>,
    explicit: ExplicitSystem<T>,
    built_revision: u64,
    free_vel: BlockIndices,
    output_vel: BlockIndices,
    expanded: DMatrix<T>,
    explicit_jacobian: DMatrix<T>,
}

impl<T: Scalar> HybridSolver<T> {
    /// Solver on `config_space` with no constraint and no elimination.
    pub fn new(config_space: SpacePtr<T>, config: HybridSolverConfig<T>) -> Self {
        let nv = config_space.nv();
        let explicit = ExplicitSystem::new(config_space.clone());
        Self {
            built_revision: explicit.revision(),
            free_vel: BlockIndices::range(0, nv),
            output_vel: BlockIndices::empty(),
            expanded: DMatrix::zeros(nv, nv),
            explicit_jacobian: DMatrix::zeros(0, nv),
            stack: Vec::new(),
            config_space,
            config,
            explicit,
        }
    }

    /// The configuration space.
    pub fn config_space(&self) -> &SpacePtr<T> {
        &self.config_space
    }

    /// The configuration.
    pub fn config(&self) -> &HybridSolverConfig<T> {
        &self.config
    }

    /// Appends an implicit constraint and returns its slot.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if `function` is not a function of the
    /// configuration space.
    pub fn add_implicit(&mut self, function: BoxedFunction<T>) -> Result<usize> {
        let expected = (self.config_space.nq(), self.config_space.nv());
        let actual = (function.input_size(), function.input_derivative_size());
        if expected != actual {
            return Err(ConstraintError::dimension_mismatch(
                format!("{} input (nq, nv)", function.name()),
                format!("{expected:?}"),
                format!("{actual:?}"),
            ));
        }

        let slot = self.stack.len();
        let rows = function.output_derivative_size();
        debug!(function = function.name(), slot, rows, "implicit constraint added");
        self.stack.push(StackEntry {
            residual: function.new_output(),
            jacobian: function.new_jacobian(),
            reduced: DMatrix::zeros(rows, self.free_vel.len()),
            eliminated_columns: DMatrix::zeros(rows, self.output_vel.len()),
            function,
            slot,
        });
        Ok(slot)
    }

    /// Adds an explicit function to the explicit system.
    ///
    /// The reduction is stale until
    /// [`explicit_solver_has_changed`](Self::explicit_solver_has_changed)
    /// is called.
    pub fn add_explicit(&mut self, mut function: ExplicitFunction<T>) -> Result<usize> {
        function.set_singularity_tolerance(self.config.singularity_tolerance);
        self.explicit.add(function)
    }

    /// The explicit system.
    pub fn explicit_system(&self) -> &ExplicitSystem<T> {
        &self.explicit
    }

    /// The explicit system, for structural changes.
    pub fn explicit_system_mut(&mut self) -> &mut ExplicitSystem<T> {
        &mut self.explicit
    }

    /// Re-derives the free/eliminated partition after explicit functions
    /// were added or removed, and resets every reduced Jacobian.
    ///
    /// # Errors
    ///
    /// `EliminationCycle` if the explicit functions depend on each other
    /// in a cycle.
    pub fn explicit_solver_has_changed(&mut self) -> Result<()> {
        self.explicit.update_structure()?;
        self.free_vel = self.explicit.free_derivatives().clone();
        self.output_vel = self.explicit.output_derivatives().clone();

        let free = self.free_vel.len();
        let eliminated = self.output_vel.len();
        for entry in &mut self.stack {
            entry.resize(free, eliminated);
        }
        self.expanded.fill(T::zero());
        self.explicit_jacobian = DMatrix::zeros(eliminated, free);
        self.built_revision = self.explicit.revision();

        debug!(
            free,
            eliminated,
            constraints = self.stack.len(),
            revision = self.built_revision,
            "reduction rebuilt"
        );
        Ok(())
    }

    fn check_reduction(&self) -> Result<()> {
        let current = self.explicit.revision();
        if current == self.built_revision {
            Ok(())
        } else {
            Err(ConstraintError::StaleReduction {
                built: self.built_revision,
                current,
            })
        }
    }

    /// Computes every Jacobian of the stack and its reduction at `q`.
    ///
    /// The compressed explicit Jacobian is complete before the first
    /// constraint is reduced.
    ///
    /// # Errors
    ///
    /// `StaleReduction` if the explicit system changed since the last
    /// [`explicit_solver_has_changed`](Self::explicit_solver_has_changed);
    /// errors of the constraints and explicit functions otherwise.
    pub fn update_jacobian(&mut self, ctx: &mut EvalContext<'_, T>, q: &Configuration<T>) -> Result<()> {
        self.check_reduction()?;
        let reduce = !self.output_vel.is_empty();

        if reduce {
            self.explicit.jacobian(ctx, q, &mut self.expanded)?;
            self.explicit.view_jacobian(&self.expanded, &mut self.explicit_jacobian)?;
            if self.config.trace_jacobians {
                trace!(jacobian = %self.explicit_jacobian, "compressed explicit jacobian");
            }
        }

        for entry in &mut self.stack {
            entry.function.jacobian(ctx, q, &mut entry.jacobian)?;
            self.free_vel.gather_columns(&entry.jacobian, &mut entry.reduced);
            if !reduce {
                continue;
            }
            if self.config.trace_jacobians {
                trace!(function = entry.function.name(), jacobian = %entry.reduced, "reduced jacobian before substitution");
            }
            self.output_vel.gather_columns(&entry.jacobian, &mut entry.eliminated_columns);
            entry
                .reduced
                .gemm(T::one(), &entry.eliminated_columns, &self.explicit_jacobian, T::one());
            if self.config.trace_jacobians {
                trace!(function = entry.function.name(), jacobian = %entry.reduced, "reduced jacobian after substitution");
            }
        }
        Ok(())
    }

    /// Computes the residual of every constraint of the stack at `q`.
    pub fn compute_values(&mut self, ctx: &mut EvalContext<'_, T>, q: &Configuration<T>) -> Result<()> {
        for entry in &mut self.stack {
            entry.function.value(ctx, q, &mut entry.residual)?;
        }
        Ok(())
    }

    /// Overwrites the eliminated variables of `q` from the free ones.
    pub fn solve_explicit(&mut self, ctx: &mut EvalContext<'_, T>, q: &mut Configuration<T>) -> Result<()> {
        self.check_reduction()?;
        self.explicit.solve(ctx, q)
    }

    /// Number of implicit constraints.
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Whether the stack is empty.
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// The constraint at `slot`.
    pub fn entry(&self, slot: usize) -> Option<&StackEntry<T>> {
        self.stack.get(slot)
    }

    /// The constraints in stack order.
    pub fn entries(&self) -> &[StackEntry<T>] {
        &self.stack
    }

    /// Free velocity variables.
    pub fn free_derivatives(&self) -> &BlockIndices {
        &self.free_vel
    }

    /// Eliminated velocity variables.
    pub fn output_derivatives(&self) -> &BlockIndices {
        &self.output_vel
    }

    /// Compressed explicit Jacobian `Je` (eliminated × free).
    pub fn explicit_jacobian(&self) -> &DMatrix<T> {
        &self.explicit_jacobian
    }

    /// Number of residual rows of the whole stack.
    pub fn residual_size(&self) -> usize {
        self.stack.iter().map(|e| e.residual.len()).sum()
    }

    /// Number of Jacobian rows of the whole stack.
    pub fn jacobian_rows(&self) -> usize {
        self.stack.iter().map(|e| e.reduced.nrows()).sum()
    }

    /// Residuals of the stack, concatenated in stack order.
    pub fn stacked_residual(&self) -> DVector<T> {
        let mut out = DVector::zeros(self.residual_size());
        let mut row = 0;
        for e in &self.stack {
            out.rows_mut(row, e.residual.len()).copy_from(&e.residual);
            row += e.residual.len();
        }
        out
    }

    /// Reduced Jacobians of the stack, concatenated in stack order.
    pub fn stacked_reduced_jacobian(&self) -> DMatrix<T> {
        let mut out = DMatrix::zeros(self.jacobian_rows(), self.free_vel.len());
        let mut row = 0;
        for e in &self.stack {
            out.rows_mut(row, e.reduced.nrows()).copy_from(&e.reduced);
            row += e.reduced.nrows();
        }
        out
    }

    /// Lifts a step on the free variables to the whole velocity space:
    /// `dq[free] = dq_free` and `dq[out] = Je · dq_free`.
    pub fn expand_free_step(&self, dq_free: &TangentVector<T>, dq: &mut TangentVector<T>) -> Result<()> {
        if dq_free.len() != self.free_vel.len() {
            return Err(ConstraintError::dimension_mismatch(
                "free step",
                self.free_vel.len(),
                dq_free.len(),
            ));
        }
        if dq.len() != self.config_space.nv() {
            return Err(ConstraintError::dimension_mismatch(
                "expanded step",
                self.config_space.nv(),
                dq.len(),
            ));
        }
        self.free_vel.scatter(dq_free, dq);
        if !self.output_vel.is_empty() {
            let eliminated = &self.explicit_jacobian * dq_free;
            self.output_vel.scatter(&eliminated, dq);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explicit::ExplicitIndices;
    use approx::assert_relative_eq;
    use kinsolve_core::{function::AffineFunction, liegroup::VectorSpace};
    use pretty_assertions::assert_eq;

    fn doubling(n: usize) -> ExplicitFunction<f64> {
        // q1 = 2 q0
        let f = AffineFunction::linear("double", DMatrix::from_element(1, 1, 2.0));
        ExplicitFunction::<f64>::new(
            "q1 = 2 q0",
            VectorSpace::shared(n),
            Box::new(f),
            ExplicitIndices::flat(BlockIndices::range(0, 1), BlockIndices::range(1, 1)),
        )
        .unwrap()
    }

    fn sum_constraint() -> BoxedFunction<f64> {
        // q0 + q1 - 3
        Box::new(
            AffineFunction::new(
                "q0 + q1 - 3",
                DMatrix::from_row_slice(1, 2, &[1.0, 1.0]),
                DVector::from_vec(vec![-3.0]),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_reduced_jacobian_of_doubling() {
        let mut solver = HybridSolver::new(VectorSpace::shared(2), HybridSolverConfig::default());
        let slot = solver.add_implicit(sum_constraint()).unwrap();
        solver.add_explicit(doubling(2)).unwrap();
        solver.explicit_solver_has_changed().unwrap();

        let mut ctx = EvalContext::detached();
        let mut q = DVector::from_vec(vec![1.0, 0.0]);
        solver.solve_explicit(&mut ctx, &mut q).unwrap();
        solver.update_jacobian(&mut ctx, &q).unwrap();
        solver.compute_values(&mut ctx, &q).unwrap();

        let entry = solver.entry(slot).unwrap();
        assert_eq!(entry.reduced_jacobian().shape(), (1, 1));
        assert_relative_eq!(entry.reduced_jacobian()[(0, 0)], 3.0);
        assert_relative_eq!(entry.residual()[0], 0.0);
        assert_eq!(solver.explicit_jacobian(), &DMatrix::from_element(1, 1, 2.0));

        let mut dq = DVector::zeros(2);
        solver
            .expand_free_step(&DVector::from_vec(vec![0.5]), &mut dq)
            .unwrap();
        assert_eq!(dq.as_slice(), &[0.5, 1.0]);
    }

    #[test]
    fn test_stale_reduction_is_reported() {
        let mut solver = HybridSolver::new(VectorSpace::shared(2), HybridSolverConfig::default());
        solver.add_implicit(sum_constraint()).unwrap();
        solver.add_explicit(doubling(2)).unwrap();

        let mut ctx = EvalContext::detached();
        let q = DVector::zeros(2);
        let err = solver.update_jacobian(&mut ctx, &q).unwrap_err();
        assert!(matches!(err, ConstraintError::StaleReduction { built: 0, current: 1 }));

        solver.explicit_solver_has_changed().unwrap();
        solver.update_jacobian(&mut ctx, &q).unwrap();

        solver.explicit_system_mut().remove(0).unwrap();
        assert!(solver.update_jacobian(&mut ctx, &q).is_err());
        solver.explicit_solver_has_changed().unwrap();
        solver.update_jacobian(&mut ctx, &q).unwrap();
        assert_eq!(
            solver.stacked_reduced_jacobian(),
            DMatrix::from_row_slice(1, 2, &[1.0, 1.0])
        );
    }

    #[test]
    fn test_constraint_sizes_are_checked() {
        let mut solver = HybridSolver::new(VectorSpace::shared(3), HybridSolverConfig::default());
        let err = solver.add_implicit(sum_constraint()).unwrap_err();
        assert!(matches!(err, ConstraintError::DimensionMismatch { .. }));
        assert!(solver.is_empty());

        let mut dq = DVector::zeros(3);
        assert!(solver.expand_free_step(&DVector::zeros(2), &mut dq).is_err());
    }
}
