//! Composite kinematic expressions with cached values and Jacobians.
//!
//! An [`ExpressionGraph`] is an arena of nodes. Leaves read quantities from
//! a kinematics provider (points attached to frames, the center of mass) or
//! hold constants; combinators build new quantities from their children and
//! combine the children's Jacobians by the chain rule.
//!
//! Nodes are only created through the graph builders, which take the ids of
//! existing nodes as children. Children therefore always have smaller ids
//! than their parents and the arena is in topological order.
//!
//! # Caching
//!
//! The graph owns a generation counter. Each node records the generation at
//! which its value and its Jacobian were last computed. [`invalidate`]
//! bumps the counter in O(1); the next [`compute_value`] or
//! [`compute_jacobian`] recomputes a node only if its record is older than
//! the current generation. A sub-expression shared by several parents is
//! therefore computed once per generation.
//!
//! Until `invalidate` is called, cached results are returned as they are,
//! even if the kinematic model has moved in the meantime.
//!
//! [`invalidate`]: ExpressionGraph::invalidate
//! [`compute_value`]: ExpressionGraph::compute_value
//! [`compute_jacobian`]: ExpressionGraph::compute_jacobian

use kinsolve_core::{
    error::{ConstraintError, Result},
    kinematics::KinematicsProvider,
    types::{column3, set_column3, vector3, DMatrix, DVector, FrameId, Matrix3, Scalar, Vector3},
};
use std::fmt;

/// Identifier of a node inside an [`ExpressionGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Position of the node in the arena.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node{}", self.0)
    }
}

/// Operation performed by a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind<T: Scalar> {
    /// A constant vector, zero Jacobian.
    Constant,
    /// A point given in the coordinates of a frame, expressed in the world.
    PointInFrame {
        /// Frame the point is attached to
        frame: FrameId,
        /// Coordinates of the point in the frame
        local: Vector3<T>,
    },
    /// Center of mass of the model.
    CenterOfMass,
    /// `a + b`
    Sum(NodeId, NodeId),
    /// `a - b`
    Difference(NodeId, NodeId),
    /// `s · a`
    ScalarMultiply(T, NodeId),
    /// `a × b` on 3-vectors
    CrossProduct(NodeId, NodeId),
    /// `a · b`
    Dot(NodeId, NodeId),
    /// `R · v` where `R` is the rotation of a frame, or its transpose.
    RotationMultiply {
        /// Frame providing the rotation
        frame: FrameId,
        /// Rotated 3-vector
        child: NodeId,
        /// Use the transpose of the frame rotation (world to frame)
        transpose: bool,
    },
    /// Row-wise concatenation.
    Stack(Vec<NodeId>),
}

impl<T: Scalar> NodeKind<T> {
    fn label(&self) -> &'static str {
        match self {
            Self::Constant => "constant",
            Self::PointInFrame { .. } => "point in frame",
            Self::CenterOfMass => "center of mass",
            Self::Sum(..) => "sum",
            Self::Difference(..) => "difference",
            Self::ScalarMultiply(..) => "scalar multiply",
            Self::CrossProduct(..) => "cross product",
            Self::Dot(..) => "dot",
            Self::RotationMultiply { .. } => "rotation multiply",
            Self::Stack(_) => "stack",
        }
    }

    fn children(&self) -> Vec<NodeId> {
        match self {
            Self::Constant | Self::PointInFrame { .. } | Self::CenterOfMass => Vec::new(),
            Self::Sum(a, b) | Self::Difference(a, b) | Self::CrossProduct(a, b) | Self::Dot(a, b) => {
                vec![*a, *b]
            }
            Self::ScalarMultiply(_, a) => vec![*a],
            Self::RotationMultiply { child, .. } => vec![*child],
            Self::Stack(children) => children.clone(),
        }
    }

    fn is_kinematic(&self) -> bool {
        matches!(
            self,
            Self::PointInFrame { .. } | Self::CenterOfMass | Self::RotationMultiply { .. }
        )
    }
}

#[derive(Debug, Clone)]
struct Node<T: Scalar> {
    kind: NodeKind<T>,
    children: Vec<NodeId>,
    value: DVector<T>,
    jacobian: DMatrix<T>,
    value_generation: u64,
    jacobian_generation: u64,
    value_evaluations: usize,
    jacobian_evaluations: usize,
}

type Kinematics<'k, T> = Option<&'k dyn KinematicsProvider<T>>;

impl<T: Scalar> Node<T> {
    fn provider<'k>(&self, index: usize, kin: Kinematics<'k, T>) -> Result<&'k dyn KinematicsProvider<T>> {
        kin.ok_or_else(|| ConstraintError::missing_kinematics(format!("{} node {index}", self.kind.label())))
    }

    fn combine_value(&mut self, index: usize, done: &[Self], kin: Kinematics<'_, T>) -> Result<()> {
        let kin = if self.kind.is_kinematic() {
            Some(self.provider(index, kin)?)
        } else {
            None
        };
        let Self { kind, value, .. } = self;
        match kind {
            NodeKind::Constant => {}
            NodeKind::PointInFrame { frame, local } => {
                if let Some(kin) = kin {
                    let m = kin.frame_placement(*frame)?;
                    value.copy_from(&(m.translation.vector + m.rotation * *local));
                }
            }
            NodeKind::CenterOfMass => {
                if let Some(kin) = kin {
                    value.copy_from(&kin.center_of_mass()?);
                }
            }
            NodeKind::Sum(a, b) => {
                value.copy_from(&done[a.0].value);
                *value += &done[b.0].value;
            }
            NodeKind::Difference(a, b) => {
                value.copy_from(&done[a.0].value);
                *value -= &done[b.0].value;
            }
            NodeKind::ScalarMultiply(s, a) => {
                value.copy_from(&done[a.0].value);
                *value *= *s;
            }
            NodeKind::CrossProduct(a, b) => {
                let a = vector3(&done[a.0].value);
                let b = vector3(&done[b.0].value);
                value.copy_from(&a.cross(&b));
            }
            NodeKind::Dot(a, b) => {
                value[0] = done[a.0].value.dot(&done[b.0].value);
            }
            NodeKind::RotationMultiply {
                frame,
                child,
                transpose,
            } => {
                if let Some(kin) = kin {
                    let r = rotation(kin, *frame, *transpose)?;
                    value.copy_from(&(r * vector3(&done[child.0].value)));
                }
            }
            NodeKind::Stack(children) => {
                let mut offset = 0;
                for c in children.iter() {
                    let rows = done[c.0].value.len();
                    value.rows_mut(offset, rows).copy_from(&done[c.0].value);
                    offset += rows;
                }
            }
        }
        Ok(())
    }

    fn combine_jacobian(&mut self, index: usize, done: &[Self], kin: Kinematics<'_, T>) -> Result<()> {
        let kin = if self.kind.is_kinematic() {
            Some(self.provider(index, kin)?)
        } else {
            None
        };
        let Self {
            kind,
            value,
            jacobian,
            ..
        } = self;
        let nv = jacobian.ncols();
        match kind {
            NodeKind::Constant => {}
            NodeKind::PointInFrame { frame, local } => {
                if let Some(kin) = kin {
                    let m = kin.frame_placement(*frame)?;
                    let jf = frame_jacobian(kin, *frame, nv)?;
                    let rp = m.rotation * *local;
                    for c in 0..nv {
                        let v = column3(jf, 0, c) - rp.cross(&column3(jf, 3, c));
                        set_column3(jacobian, 0, c, &v);
                    }
                }
            }
            NodeKind::CenterOfMass => {
                if let Some(kin) = kin {
                    let jc = kin.center_of_mass_jacobian()?;
                    if jc.shape() != (3, nv) {
                        return Err(ConstraintError::dimension_mismatch(
                            "center of mass jacobian",
                            format!("(3, {nv})"),
                            format!("{:?}", jc.shape()),
                        ));
                    }
                    jacobian.copy_from(jc);
                }
            }
            NodeKind::Sum(a, b) => {
                jacobian.copy_from(&done[a.0].jacobian);
                *jacobian += &done[b.0].jacobian;
            }
            NodeKind::Difference(a, b) => {
                jacobian.copy_from(&done[a.0].jacobian);
                *jacobian -= &done[b.0].jacobian;
            }
            NodeKind::ScalarMultiply(s, a) => {
                jacobian.copy_from(&done[a.0].jacobian);
                *jacobian *= *s;
            }
            NodeKind::CrossProduct(a, b) => {
                let (na, nb) = (&done[a.0], &done[b.0]);
                let (va, vb) = (vector3(&na.value), vector3(&nb.value));
                for c in 0..nv {
                    let col = va.cross(&column3(&nb.jacobian, 0, c)) - vb.cross(&column3(&na.jacobian, 0, c));
                    set_column3(jacobian, 0, c, &col);
                }
            }
            NodeKind::Dot(a, b) => {
                let (na, nb) = (&done[a.0], &done[b.0]);
                jacobian.gemm_tr(T::one(), &na.value, &nb.jacobian, T::zero());
                jacobian.gemm_tr(T::one(), &nb.value, &na.jacobian, T::one());
            }
            NodeKind::RotationMultiply {
                frame,
                child,
                transpose,
            } => {
                if let Some(kin) = kin {
                    let r = rotation(kin, *frame, *transpose)?;
                    let jf = frame_jacobian(kin, *frame, nv)?;
                    let child = &done[child.0];
                    let v = vector3(&child.value);
                    let rotated = vector3(value);
                    for c in 0..nv {
                        let jv = column3(&child.jacobian, 0, c);
                        let omega = column3(jf, 3, c);
                        // d(R_fᵀ v) = R_fᵀ (dv + v × ω), d(R_f v) = R_f dv - (R_f v) × ω
                        let col = if *transpose {
                            r * (jv + v.cross(&omega))
                        } else {
                            r * jv - rotated.cross(&omega)
                        };
                        set_column3(jacobian, 0, c, &col);
                    }
                }
            }
            NodeKind::Stack(children) => {
                let mut offset = 0;
                for c in children.iter() {
                    let rows = done[c.0].jacobian.nrows();
                    jacobian.rows_mut(offset, rows).copy_from(&done[c.0].jacobian);
                    offset += rows;
                }
            }
        }
        Ok(())
    }
}

fn rotation<T: Scalar>(kin: &dyn KinematicsProvider<T>, frame: FrameId, transpose: bool) -> Result<Matrix3<T>> {
    let r = kin.frame_placement(frame)?.rotation.to_rotation_matrix().into_inner();
    Ok(if transpose { r.transpose() } else { r })
}

fn frame_jacobian<T: Scalar>(kin: &dyn KinematicsProvider<T>, frame: FrameId, nv: usize) -> Result<&DMatrix<T>> {
    let jf = kin.frame_jacobian(frame)?;
    if jf.shape() == (6, nv) {
        Ok(jf)
    } else {
        Err(ConstraintError::dimension_mismatch(
            format!("jacobian of frame {frame}"),
            format!("(6, {nv})"),
            format!("{:?}", jf.shape()),
        ))
    }
}

/// Arena of expression nodes sharing one velocity space.
#[derive(Debug, Clone)]
pub struct ExpressionGraph<T: Scalar> {
    nodes: Vec<Node<T>>,
    nv: usize,
    num_frames: Option<usize>,
    generation: u64,
}

impl<T: Scalar> ExpressionGraph<T> {
    /// Empty graph whose Jacobians have `nv` columns.
    ///
    /// Frame indices are not validated at construction; an unknown frame is
    /// reported by the provider at evaluation.
    pub fn new(nv: usize) -> Self {
        Self {
            nodes: Vec::new(),
            nv,
            num_frames: None,
            generation: 1,
        }
    }

    /// Empty graph for the model of `kinematics`, with frame validation.
    pub fn for_model(kinematics: &dyn KinematicsProvider<T>) -> Self {
        Self {
            num_frames: Some(kinematics.num_frames()),
            ..Self::new(kinematics.nv())
        }
    }

    /// Number of Jacobian columns.
    pub fn nv(&self) -> usize {
        self.nv
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no node.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether any node reads from a kinematics provider.
    pub fn uses_kinematics(&self) -> bool {
        self.nodes.iter().any(|n| n.kind.is_kinematic())
    }

    /// Operation of a node.
    pub fn kind(&self, id: NodeId) -> Result<&NodeKind<T>> {
        Ok(&self.node(id)?.kind)
    }

    /// Number of rows of a node value.
    pub fn rows(&self, id: NodeId) -> Result<usize> {
        Ok(self.node(id)?.value.len())
    }

    fn node(&self, id: NodeId) -> Result<&Node<T>> {
        self.nodes.get(id.0).ok_or(ConstraintError::UnknownNode {
            node: id.0,
            len: self.nodes.len(),
        })
    }

    fn push(&mut self, kind: NodeKind<T>, value: DVector<T>) -> NodeId {
        let rows = value.len();
        let children = kind.children();
        self.nodes.push(Node {
            kind,
            children,
            value,
            jacobian: DMatrix::zeros(rows, self.nv),
            value_generation: 0,
            jacobian_generation: 0,
            value_evaluations: 0,
            jacobian_evaluations: 0,
        });
        NodeId(self.nodes.len() - 1)
    }

    fn check_frame(&self, frame: FrameId) -> Result<()> {
        match self.num_frames {
            Some(n) if frame >= n => Err(ConstraintError::Kinematics(
                kinsolve_core::KinematicsError::UnknownFrame {
                    frame,
                    num_frames: n,
                },
            )),
            _ => Ok(()),
        }
    }

    fn check_rows(&self, id: NodeId, rows: usize, context: &str) -> Result<()> {
        let actual = self.rows(id)?;
        if actual == rows {
            Ok(())
        } else {
            Err(ConstraintError::dimension_mismatch(
                format!("{context} operand {id}"),
                rows,
                actual,
            ))
        }
    }

    fn check_same_rows(&self, a: NodeId, b: NodeId, context: &str) -> Result<usize> {
        let rows = self.rows(a)?;
        self.check_rows(b, rows, context)?;
        Ok(rows)
    }

    /// A constant vector.
    pub fn constant(&mut self, value: DVector<T>) -> NodeId {
        self.push(NodeKind::Constant, value)
    }

    /// A constant 3-vector.
    pub fn constant3(&mut self, value: Vector3<T>) -> NodeId {
        self.constant(DVector::from_column_slice(value.as_slice()))
    }

    /// World position of the point with coordinates `local` in `frame`.
    pub fn point_in_frame(&mut self, frame: FrameId, local: Vector3<T>) -> Result<NodeId> {
        self.check_frame(frame)?;
        Ok(self.push(NodeKind::PointInFrame { frame, local }, DVector::zeros(3)))
    }

    /// World position of the origin of `frame`.
    pub fn frame_origin(&mut self, frame: FrameId) -> Result<NodeId> {
        self.point_in_frame(frame, Vector3::zeros())
    }

    /// Center of mass of the model.
    pub fn center_of_mass(&mut self) -> NodeId {
        self.push(NodeKind::CenterOfMass, DVector::zeros(3))
    }

    /// `a + b`.
    pub fn sum(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        let rows = self.check_same_rows(a, b, "sum")?;
        Ok(self.push(NodeKind::Sum(a, b), DVector::zeros(rows)))
    }

    /// `a - b`.
    pub fn difference(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        let rows = self.check_same_rows(a, b, "difference")?;
        Ok(self.push(NodeKind::Difference(a, b), DVector::zeros(rows)))
    }

    /// `s · a`.
    pub fn scalar_multiply(&mut self, s: T, a: NodeId) -> Result<NodeId> {
        let rows = self.rows(a)?;
        Ok(self.push(NodeKind::ScalarMultiply(s, a), DVector::zeros(rows)))
    }

    /// `a × b`, both operands being 3-vectors.
    pub fn cross(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.check_rows(a, 3, "cross product")?;
        self.check_rows(b, 3, "cross product")?;
        Ok(self.push(NodeKind::CrossProduct(a, b), DVector::zeros(3)))
    }

    /// `a · b`, a single row.
    pub fn dot(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.check_same_rows(a, b, "dot")?;
        Ok(self.push(NodeKind::Dot(a, b), DVector::zeros(1)))
    }

    /// `R · v` with `R` the rotation of `frame`: a frame vector expressed in the world.
    pub fn rotate(&mut self, frame: FrameId, v: NodeId) -> Result<NodeId> {
        self.rotation_multiply(frame, v, false)
    }

    /// `Rᵀ · v` with `R` the rotation of `frame`: a world vector expressed in the frame.
    pub fn rotate_transpose(&mut self, frame: FrameId, v: NodeId) -> Result<NodeId> {
        self.rotation_multiply(frame, v, true)
    }

    fn rotation_multiply(&mut self, frame: FrameId, child: NodeId, transpose: bool) -> Result<NodeId> {
        self.check_frame(frame)?;
        self.check_rows(child, 3, "rotation multiply")?;
        Ok(self.push(
            NodeKind::RotationMultiply {
                frame,
                child,
                transpose,
            },
            DVector::zeros(3),
        ))
    }

    /// Concatenation of the rows of `children`, in order.
    pub fn stack(&mut self, children: &[NodeId]) -> Result<NodeId> {
        let mut rows = 0;
        for c in children {
            rows += self.rows(*c)?;
        }
        Ok(self.push(NodeKind::Stack(children.to_vec()), DVector::zeros(rows)))
    }

    /// Marks every cached value and Jacobian as outdated.
    pub fn invalidate(&mut self) {
        self.generation += 1;
    }

    /// Value of `id`, recomputed if outdated.
    pub fn compute_value(
        &mut self,
        id: NodeId,
        kinematics: Option<&dyn KinematicsProvider<T>>,
    ) -> Result<&DVector<T>> {
        self.node(id)?;
        self.ensure_value(id.0, kinematics)?;
        Ok(&self.nodes[id.0].value)
    }

    /// Jacobian of `id`, recomputed if outdated.
    pub fn compute_jacobian(
        &mut self,
        id: NodeId,
        kinematics: Option<&dyn KinematicsProvider<T>>,
    ) -> Result<&DMatrix<T>> {
        self.node(id)?;
        self.ensure_jacobian(id.0, kinematics)?;
        Ok(&self.nodes[id.0].jacobian)
    }

    /// Cached value of `id`, whatever its generation.
    pub fn value(&self, id: NodeId) -> Result<&DVector<T>> {
        Ok(&self.node(id)?.value)
    }

    /// Cached Jacobian of `id`, whatever its generation.
    pub fn jacobian(&self, id: NodeId) -> Result<&DMatrix<T>> {
        Ok(&self.node(id)?.jacobian)
    }

    /// Whether the cached value of `id` belongs to the current generation.
    pub fn is_value_current(&self, id: NodeId) -> Result<bool> {
        Ok(self.node(id)?.value_generation == self.generation)
    }

    /// Number of times the value of `id` has been recomputed.
    pub fn evaluation_count(&self, id: NodeId) -> Result<usize> {
        Ok(self.node(id)?.value_evaluations)
    }

    /// Number of times the Jacobian of `id` has been recomputed.
    pub fn jacobian_evaluation_count(&self, id: NodeId) -> Result<usize> {
        Ok(self.node(id)?.jacobian_evaluations)
    }

    fn ensure_value(&mut self, i: usize, kin: Kinematics<'_, T>) -> Result<()> {
        if self.nodes[i].value_generation == self.generation {
            return Ok(());
        }
        for k in 0..self.nodes[i].children.len() {
            let child = self.nodes[i].children[k];
            self.ensure_value(child.0, kin)?;
        }
        let generation = self.generation;
        let (done, rest) = self.nodes.split_at_mut(i);
        let node = &mut rest[0];
        node.combine_value(i, done, kin)?;
        node.value_generation = generation;
        node.value_evaluations += 1;
        Ok(())
    }

    fn ensure_jacobian(&mut self, i: usize, kin: Kinematics<'_, T>) -> Result<()> {
        if self.nodes[i].jacobian_generation == self.generation {
            return Ok(());
        }
        self.ensure_value(i, kin)?;
        for k in 0..self.nodes[i].children.len() {
            let child = self.nodes[i].children[k];
            self.ensure_jacobian(child.0, kin)?;
        }
        let generation = self.generation;
        let (done, rest) = self.nodes.split_at_mut(i);
        let node = &mut rest[0];
        node.combine_jacobian(i, done, kin)?;
        node.jacobian_generation = generation;
        node.jacobian_evaluations += 1;
        Ok(())
    }
}
