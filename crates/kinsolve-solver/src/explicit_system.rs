//! Aggregate of explicit functions sharing one configuration space.
//!
//! The system owns explicit functions in insertion order. Outputs of
//! different functions never overlap, but the outputs of one function may
//! feed the inputs of another. [`ExplicitSystem::update_structure`] orders
//! the functions so that every function comes after the ones it depends on
//! and derives the partition of the velocity space into free and eliminated
//! variables.
//!
//! The system is itself a differentiable function: its residual stacks the
//! residuals of its functions in insertion order.

use crate::explicit::ExplicitFunction;
use kinsolve_core::{
    error::{ConstraintError, Result},
    function::{DifferentiableFunction, EvalContext},
    liegroup::{SpacePtr, VectorSpace},
    segments::BlockIndices,
    types::{Configuration, DMatrix, DVector, Scalar},
};
use tracing::debug;

#[derive(Debug)]
struct Entry<T: Scalar> {
    function: ExplicitFunction<T>,
    residual: DVector<T>,
    jacobian: DMatrix<T>,
    /// ∂q_out/∂q_in of the function
    local: DMatrix<T>,
    /// ∂q_in/∂q_free, one row per input velocity variable
    dependencies: DMatrix<T>,
    /// ∂q_out/∂q_free
    rows: DMatrix<T>,
}

impl<T: Scalar> Entry<T> {
    fn new(function: ExplicitFunction<T>) -> Self {
        let nv = function.input_derivative_size();
        let n_in = function.input_vel().len();
        let n_out = function.output_vel().len();
        Self {
            residual: function.new_output(),
            jacobian: function.new_jacobian(),
            local: DMatrix::zeros(n_out, n_in),
            dependencies: DMatrix::zeros(n_in, nv),
            rows: DMatrix::zeros(n_out, nv),
            function,
        }
    }

    fn feeds(&self, other: &Self) -> bool {
        self.function.output_vel().intersects(other.function.input_vel())
            || self.function.output_conf().intersects(other.function.input_conf())
    }
}

/// Ordered set of explicit functions with disjoint outputs.
#[derive(Debug)]
pub struct ExplicitSystem<T: Scalar> {
    config_space: SpacePtr<T>,
    entries: Vec<Entry<T>>,
    revision: u64,
    structure_revision: u64,
    order: Vec<usize>,
    output_conf: BlockIndices,
    output_vel: BlockIndices,
    free_vel: BlockIndices,
    output_space: SpacePtr<T>,
    /// ∂q/∂q_free over the full velocity space: unit rows for free
    /// variables, elimination rows for the others
    chain: DMatrix<T>,
}

impl<T: Scalar> ExplicitSystem<T> {
    /// Empty system: every variable is free.
    pub fn new(config_space: SpacePtr<T>) -> Self {
        let nv = config_space.nv();
        Self {
            entries: Vec::new(),
            revision: 0,
            structure_revision: 0,
            order: Vec::new(),
            output_conf: BlockIndices::empty(),
            output_vel: BlockIndices::empty(),
            free_vel: BlockIndices::range(0, nv),
            output_space: VectorSpace::shared(0),
            chain: DMatrix::identity(nv, nv),
            config_space,
        }
    }

    /// The configuration space.
    pub fn config_space(&self) -> &SpacePtr<T> {
        &self.config_space
    }

    /// Number of explicit functions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the system has no function.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The function at `index`, in insertion order.
    pub fn get(&self, index: usize) -> Option<&ExplicitFunction<T>> {
        self.entries.get(index).map(|e| &e.function)
    }

    /// The functions in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ExplicitFunction<T>> + '_ {
        self.entries.iter().map(|e| &e.function)
    }

    /// Counter bumped by every structural change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether the partition matches the current set of functions.
    pub fn is_up_to_date(&self) -> bool {
        self.structure_revision == self.revision
    }

    /// Indices of the functions in elimination order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Eliminated configuration variables, in increasing order.
    pub fn output_configuration(&self) -> &BlockIndices {
        &self.output_conf
    }

    /// Eliminated velocity variables, in increasing order.
    pub fn output_derivatives(&self) -> &BlockIndices {
        &self.output_vel
    }

    /// Free velocity variables, in increasing order.
    pub fn free_derivatives(&self) -> &BlockIndices {
        &self.free_vel
    }

    /// Adds `function` and returns its index.
    ///
    /// # Errors
    ///
    /// - `DimensionMismatch` if `function` lives on another configuration space
    /// - `OverlappingIndices` if it eliminates a variable already eliminated
    pub fn add(&mut self, function: ExplicitFunction<T>) -> Result<usize> {
        let space = function.config_space();
        if (space.nq(), space.nv()) != (self.config_space.nq(), self.config_space.nv()) {
            return Err(ConstraintError::dimension_mismatch(
                format!("configuration space of {}", function.name()),
                format!("{} (nq, nv) = ({}, {})", self.config_space.name(), self.config_space.nq(), self.config_space.nv()),
                format!("{} (nq, nv) = ({}, {})", space.name(), space.nq(), space.nv()),
            ));
        }
        for e in &self.entries {
            let other = &e.function;
            if function.output_vel().intersects(other.output_vel())
                || function.output_conf().intersects(other.output_conf())
            {
                return Err(ConstraintError::overlapping(
                    format!("outputs of {} {}", function.name(), function.output_vel()),
                    format!("outputs of {} {}", other.name(), other.output_vel()),
                ));
            }
        }

        debug!(
            function = function.name(),
            inputs = function.input_vel().len(),
            outputs = function.output_vel().len(),
            "explicit function added"
        );
        self.entries.push(Entry::new(function));
        self.structure_changed();
        Ok(self.entries.len() - 1)
    }

    /// Removes and returns the function at `index`.
    pub fn remove(&mut self, index: usize) -> Option<ExplicitFunction<T>> {
        if index >= self.entries.len() {
            return None;
        }
        let entry = self.entries.remove(index);
        debug!(function = entry.function.name(), "explicit function removed");
        self.structure_changed();
        Some(entry.function)
    }

    fn structure_changed(&mut self) {
        self.revision += 1;
        let rows = self.entries.iter().map(|e| e.function.output_size()).sum();
        self.output_space = VectorSpace::shared(rows);
    }

    /// Recomputes the elimination order and the free/eliminated partition.
    ///
    /// # Errors
    ///
    /// `EliminationCycle` if the outputs of a function feed, possibly
    /// through other functions, its own inputs.
    pub fn update_structure(&mut self) -> Result<()> {
        let n = self.entries.len();
        let feeds: Vec<Vec<bool>> = (0..n)
            .map(|j| (0..n).map(|k| j != k && self.entries[j].feeds(&self.entries[k])).collect())
            .collect();

        let mut in_degree: Vec<usize> = (0..n).map(|k| (0..n).filter(|&j| feeds[j][k]).count()).collect();
        let mut placed = vec![false; n];
        let mut order = Vec::with_capacity(n);
        // Kahn's algorithm, lowest index first among the ready functions.
        while let Some(j) = (0..n).find(|&j| !placed[j] && in_degree[j] == 0) {
            placed[j] = true;
            order.push(j);
            for k in 0..n {
                if feeds[j][k] {
                    in_degree[k] -= 1;
                }
            }
        }
        if order.len() < n {
            return Err(ConstraintError::EliminationCycle {
                functions: self.find_cycle(&feeds, &placed),
            });
        }

        let mut output_conf = BlockIndices::empty();
        let mut output_vel = BlockIndices::empty();
        for e in &self.entries {
            output_conf = output_conf.union(e.function.output_conf())?;
            output_vel = output_vel.union(e.function.output_vel())?;
        }
        let nv = self.config_space.nv();
        self.output_conf = output_conf.sorted();
        self.output_vel = output_vel.sorted();
        self.free_vel = self.output_vel.complement(nv);
        self.chain = DMatrix::identity(nv, nv);
        self.output_vel.zero_rows(&mut self.chain);
        self.order = order;
        self.structure_revision = self.revision;

        debug!(
            functions = n,
            free = self.free_vel.len(),
            eliminated = self.output_vel.len(),
            order = ?self.order.iter().map(|&k| self.entries[k].function.name()).collect::<Vec<_>>(),
            "explicit partition updated"
        );
        Ok(())
    }

    /// Names along one cycle among the functions Kahn's algorithm left out.
    ///
    /// Every unplaced function has an unplaced predecessor, so walking
    /// predecessors from any of them eventually revisits a function.
    fn find_cycle(&self, feeds: &[Vec<bool>], placed: &[bool]) -> Vec<String> {
        let n = placed.len();
        let Some(start) = (0..n).find(|&k| !placed[k]) else {
            return Vec::new();
        };
        let mut path = vec![start];
        let mut current = start;
        loop {
            let Some(pred) = (0..n).find(|&j| !placed[j] && feeds[j][current]) else {
                break;
            };
            if let Some(pos) = path.iter().position(|&p| p == pred) {
                path.drain(..pos);
                path.push(pred);
                break;
            }
            path.push(pred);
            current = pred;
        }
        // The walk followed edges backwards.
        path.iter()
            .rev()
            .map(|&k| self.entries[k].function.name().to_string())
            .collect()
    }

    fn check_structure(&self) -> Result<()> {
        if self.is_up_to_date() {
            Ok(())
        } else {
            Err(ConstraintError::StaleReduction {
                built: self.structure_revision,
                current: self.revision,
            })
        }
    }

    /// Writes the rows of `∂q/∂q_free` belonging to eliminated variables.
    ///
    /// `expanded` is `nv × nv`. Only its eliminated rows are written; the
    /// meaningful entries are the free columns of those rows.
    ///
    /// # Errors
    ///
    /// `StaleReduction` if functions were added or removed since the last
    /// [`update_structure`](Self::update_structure).
    pub fn jacobian(
        &mut self,
        ctx: &mut EvalContext<'_, T>,
        q: &Configuration<T>,
        expanded: &mut DMatrix<T>,
    ) -> Result<()> {
        self.check_structure()?;
        let nv = self.config_space.nv();
        if expanded.shape() != (nv, nv) {
            return Err(ConstraintError::dimension_mismatch(
                "expanded explicit jacobian",
                format!("{:?}", (nv, nv)),
                format!("{:?}", expanded.shape()),
            ));
        }
        for &k in &self.order {
            let e = &mut self.entries[k];
            e.function.elimination_jacobian(ctx, q, &mut e.local)?;
            e.function.input_vel().gather_rows(&self.chain, &mut e.dependencies);
            e.rows.gemm(T::one(), &e.local, &e.dependencies, T::zero());
            e.function.output_vel().scatter_rows(&e.rows, &mut self.chain);
        }
        self.output_vel.zero_rows(expanded);
        self.output_vel.copy_rows(&self.chain, expanded);
        Ok(())
    }

    /// Compresses `expanded` to eliminated rows × free columns.
    pub fn view_jacobian(&self, expanded: &DMatrix<T>, compressed: &mut DMatrix<T>) -> Result<()> {
        let expected = (self.output_vel.len(), self.free_vel.len());
        if compressed.shape() != expected {
            return Err(ConstraintError::dimension_mismatch(
                "compressed explicit jacobian",
                format!("{expected:?}"),
                format!("{:?}", compressed.shape()),
            ));
        }
        self.output_vel.gather_block(&self.free_vel, expanded, compressed);
        Ok(())
    }

    /// Overwrites every eliminated variable of `q`, in elimination order.
    pub fn solve(&mut self, ctx: &mut EvalContext<'_, T>, q: &mut Configuration<T>) -> Result<()> {
        self.check_structure()?;
        for &k in &self.order {
            self.entries[k].function.propagate(ctx, q)?;
        }
        Ok(())
    }
}

impl<T: Scalar> DifferentiableFunction<T> for ExplicitSystem<T> {
    fn name(&self) -> &str {
        "explicit system"
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
        let mut row = 0;
        for e in &mut self.entries {
            e.function.value(ctx, q, &mut e.residual)?;
            let rows = e.residual.len();
            result.rows_mut(row, rows).copy_from(&e.residual);
            row += rows;
        }
        Ok(())
    }

    fn impl_jacobian(
        &mut self,
        ctx: &mut EvalContext<'_, T>,
        q: &Configuration<T>,
        jacobian: &mut DMatrix<T>,
    ) -> Result<()> {
        let mut row = 0;
        for e in &mut self.entries {
            e.function.jacobian(ctx, q, &mut e.jacobian)?;
            let rows = e.jacobian.nrows();
            jacobian.rows_mut(row, rows).copy_from(&e.jacobian);
            row += rows;
        }
        Ok(())
    }
}
