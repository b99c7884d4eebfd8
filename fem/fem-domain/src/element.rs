//! Element capability interface.
//!
//! Element formulations are collaborators of the kernel: the domain only
//! needs each element to report its nodes, keep a trial / committed state
//! and return a tangent matrix and a resisting-force vector. That contract
//! is the [`Element`] trait. The kinds shipped with the kernel form the
//! closed enum [`ElementKind`]; registries store `ElementKind` and never
//! downcast.
//!
//! # Local DOF layout
//!
//! Element vectors and matrices concatenate the full DOF set of each
//! connected node in [`Element::connected_nodes`] order. A truss attached
//! to two nodes with 3 DOFs each therefore has 6 local DOFs, of which the
//! rotational ones carry zero stiffness.
//!
//! # Evaluation context
//!
//! [`ElementContext`] gives read access to the node registry during
//! [`Element::attach`] and [`Element::update`], and owns a scratch buffer
//! reused across every element of one sweep.

use hashbrown::HashMap;
use nalgebra::{DMatrix, DVector};

use fem_types::{ElementTag, FemError, NodeTag};

use crate::node::Node;
use crate::truss::{CorotTruss, Truss};
use crate::zero_length::ZeroLength;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Read-only node access plus per-sweep scratch storage.
#[derive(Debug)]
pub struct ElementContext<'a> {
    nodes: &'a HashMap<NodeTag, Node>,
    buffer: Vec<f64>,
}

impl<'a> ElementContext<'a> {
    /// Wrap a node registry.
    #[must_use]
    pub fn new(nodes: &'a HashMap<NodeTag, Node>) -> Self {
        Self {
            nodes,
            buffer: Vec::with_capacity(6),
        }
    }

    /// Look up a node.
    pub fn node(&self, tag: NodeTag) -> fem_types::Result<&'a Node> {
        self.nodes.get(&tag).ok_or(FemError::NodeNotFound(tag))
    }

    /// Trial displacement of `to` minus that of `from`, first `dims`
    /// components.
    ///
    /// The returned slice borrows the context's scratch buffer and is
    /// overwritten by the next call.
    pub fn relative_trial_disp(
        &mut self,
        from: NodeTag,
        to: NodeTag,
        dims: usize,
    ) -> fem_types::Result<&[f64]> {
        let a = self.node(from)?.trial_disp();
        let b = self.node(to)?.trial_disp();
        if a.len() < dims || b.len() < dims {
            return Err(FemError::DimensionMismatch {
                context: "element displacement gather",
                expected: dims,
                actual: a.len().min(b.len()),
            });
        }
        self.buffer.clear();
        self.buffer.extend((0..dims).map(|i| b[i] - a[i]));
        Ok(&self.buffer)
    }
}

/// Distributed or initial-strain load applied to an element.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ElementLoadKind {
    /// Uniform load per unit length along the element axis, positive from
    /// the first node towards the second.
    UniformAxial(f64),
    /// Imposed axial strain (for example thermal expansion).
    InitialStrain(f64),
}

/// Capability interface required from every element kind.
pub trait Element {
    /// Element tag.
    fn tag(&self) -> ElementTag;

    /// Nodes the element connects, in local DOF order.
    fn connected_nodes(&self) -> &[NodeTag];

    /// Size of the local DOF vector. Zero before [`Self::attach`].
    fn num_dof(&self) -> usize;

    /// Resolve geometry from the node registry.
    ///
    /// Fails if a connected node is missing or the geometry is degenerate.
    fn attach(&mut self, ctx: &ElementContext<'_>) -> fem_types::Result<()>;

    /// Recompute the trial state from the trial displacements of the nodes.
    fn update(&mut self, ctx: &mut ElementContext<'_>) -> fem_types::Result<()>;

    /// Tangent stiffness at the trial state.
    fn tangent_stiff(&self) -> DMatrix<f64>;

    /// Resisting force at the trial state, net of element loads.
    fn resisting_force(&self) -> DVector<f64>;

    /// Resisting force including inertia. Static kinds carry no mass.
    fn resisting_force_inc_inertia(&self) -> DVector<f64> {
        self.resisting_force()
    }

    /// Accept the trial state.
    fn commit_state(&mut self);

    /// Discard the trial state.
    fn revert_to_last_commit(&mut self);

    /// Return to the undeformed state.
    fn revert_to_start(&mut self);

    /// Clear accumulated element loads.
    fn zero_load(&mut self);

    /// Accumulate `factor * load`.
    fn add_load(&mut self, load: &ElementLoadKind, factor: f64) -> fem_types::Result<()>;

    /// Centroid of the reference geometry, padded to three dimensions.
    fn centroid(&self) -> [f64; 3];
}

/// Closed set of element kinds the kernel ships.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ElementKind {
    /// Small-displacement elastic truss.
    Truss(Truss),
    /// Corotational (large-displacement) elastic truss.
    CorotTruss(CorotTruss),
    /// Uncoupled springs between two nodes.
    ZeroLength(ZeroLength),
}

impl From<Truss> for ElementKind {
    fn from(e: Truss) -> Self {
        Self::Truss(e)
    }
}

impl From<CorotTruss> for ElementKind {
    fn from(e: CorotTruss) -> Self {
        Self::CorotTruss(e)
    }
}

impl From<ZeroLength> for ElementKind {
    fn from(e: ZeroLength) -> Self {
        Self::ZeroLength(e)
    }
}

impl ElementKind {
    fn inner(&self) -> &dyn Element {
        match self {
            Self::Truss(e) => e,
            Self::CorotTruss(e) => e,
            Self::ZeroLength(e) => e,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Element {
        match self {
            Self::Truss(e) => e,
            Self::CorotTruss(e) => e,
            Self::ZeroLength(e) => e,
        }
    }

    /// Short kind name for logging.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Truss(_) => "truss",
            Self::CorotTruss(_) => "corot-truss",
            Self::ZeroLength(_) => "zero-length",
        }
    }
}

impl Element for ElementKind {
    fn tag(&self) -> ElementTag {
        self.inner().tag()
    }

    fn connected_nodes(&self) -> &[NodeTag] {
        match self {
            Self::Truss(e) => e.connected_nodes(),
            Self::CorotTruss(e) => e.connected_nodes(),
            Self::ZeroLength(e) => e.connected_nodes(),
        }
    }

    fn num_dof(&self) -> usize {
        self.inner().num_dof()
    }

    fn attach(&mut self, ctx: &ElementContext<'_>) -> fem_types::Result<()> {
        self.inner_mut().attach(ctx)
    }

    fn update(&mut self, ctx: &mut ElementContext<'_>) -> fem_types::Result<()> {
        self.inner_mut().update(ctx)
    }

    fn tangent_stiff(&self) -> DMatrix<f64> {
        self.inner().tangent_stiff()
    }

    fn resisting_force(&self) -> DVector<f64> {
        self.inner().resisting_force()
    }

    fn resisting_force_inc_inertia(&self) -> DVector<f64> {
        self.inner().resisting_force_inc_inertia()
    }

    fn commit_state(&mut self) {
        self.inner_mut().commit_state();
    }

    fn revert_to_last_commit(&mut self) {
        self.inner_mut().revert_to_last_commit();
    }

    fn revert_to_start(&mut self) {
        self.inner_mut().revert_to_start();
    }

    fn zero_load(&mut self) {
        self.inner_mut().zero_load();
    }

    fn add_load(&mut self, load: &ElementLoadKind, factor: f64) -> fem_types::Result<()> {
        self.inner_mut().add_load(load, factor)
    }

    fn centroid(&self) -> [f64; 3] {
        self.inner().centroid()
    }
}

/// Geometry shared by two-node elements acting on translational DOFs.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub(crate) struct TwoNodeLayout {
    /// Spatial dimension (translational DOFs used per node).
    pub ndm: usize,
    /// DOFs per connected node.
    pub ndf: [usize; 2],
}

impl TwoNodeLayout {
    /// Resolve and validate the layout of a two-node element.
    pub fn resolve(
        tag: ElementTag,
        nodes: [NodeTag; 2],
        ctx: &ElementContext<'_>,
    ) -> fem_types::Result<(Self, [f64; 3], [f64; 3])> {
        let a = ctx.node(nodes[0])?;
        let b = ctx.node(nodes[1])?;
        let ndm = a.coords().len();
        if b.coords().len() != ndm {
            return Err(FemError::invalid_config(format!(
                "{tag} connects nodes of different dimension"
            )));
        }
        if a.ndf() < ndm || b.ndf() < ndm {
            return Err(FemError::invalid_config(format!(
                "{tag} needs {ndm} translational dofs per node"
            )));
        }
        let layout = Self {
            ndm,
            ndf: [a.ndf(), b.ndf()],
        };
        Ok((layout, a.point(), b.point()))
    }

    pub fn size(&self) -> usize {
        self.ndf[0] + self.ndf[1]
    }

    /// Local index of translational component `i` of node `n`.
    pub fn index(&self, n: usize, i: usize) -> usize {
        if n == 0 { i } else { self.ndf[0] + i }
    }

    /// Two-node vector with `-v` on the first node and `+v` on the second.
    pub fn antisymmetric(&self, v: &[f64]) -> DVector<f64> {
        let mut f = DVector::zeros(self.size());
        for (i, &vi) in v.iter().enumerate().take(self.ndm) {
            f[self.index(0, i)] = -vi;
            f[self.index(1, i)] = vi;
        }
        f
    }

    /// Two-node vector with `v` on both nodes.
    pub fn symmetric(&self, v: &[f64]) -> DVector<f64> {
        let mut f = DVector::zeros(self.size());
        for (i, &vi) in v.iter().enumerate().take(self.ndm) {
            f[self.index(0, i)] = vi;
            f[self.index(1, i)] = vi;
        }
        f
    }

    /// Stiffness `[k, -k; -k, k]` from an `ndm × ndm` block.
    pub fn block_stiffness(&self, k: &DMatrix<f64>) -> DMatrix<f64> {
        let mut out = DMatrix::zeros(self.size(), self.size());
        for i in 0..self.ndm {
            for j in 0..self.ndm {
                let kij = k[(i, j)];
                out[(self.index(0, i), self.index(0, j))] = kij;
                out[(self.index(1, i), self.index(1, j))] = kij;
                out[(self.index(0, i), self.index(1, j))] = -kij;
                out[(self.index(1, i), self.index(0, j))] = -kij;
            }
        }
        out
    }
}
