//! The domain state container.
//!
//! A [`Domain`] owns one [`Mesh`] and one [`ConstraintContainer`] and runs
//! the change-tracking protocol consumers use to decide when derived data
//! (DOF numbering, reference load vectors, graphs) must be rebuilt:
//!
//! 1. Every topology- or constraint-affecting mutation calls
//!    [`Domain::domain_change`], which only raises a pending flag.
//! 2. [`Domain::has_domain_changed`] is edge-triggered: if the flag is
//!    raised it increments the change stamp, clears the flag, drops cached
//!    graphs and returns the new stamp. Otherwise it returns the stamp
//!    unchanged.
//!
//! A consumer stores the stamp it built against and rebuilds whenever the
//! returned stamp differs.
//!
//! # Example
//!
//! ```
//! use fem_domain::{Domain, Node};
//! use fem_types::NodeTag;
//!
//! let mut domain = Domain::new();
//! let before = domain.has_domain_changed();
//! domain.add_node(Node::new(NodeTag::new(1), &[0.0, 0.0], 2).unwrap()).unwrap();
//!
//! let after = domain.has_domain_changed();
//! assert_eq!(after, before + 1);
//! assert_eq!(domain.has_domain_changed(), after);
//! ```

use hashbrown::HashSet;
use nalgebra::DVector;
use tracing::{debug, warn};

use fem_constraint::{FreedomCoupling, MultiFreedom, SingleFreedomConstraint};
use fem_types::{
    ConstraintTag, ElementTag, FemError, LockerTag, NodeTag, PatternTag, Registry,
};

use crate::container::ConstraintContainer;
use crate::element::ElementKind;
use crate::graph::Graph;
use crate::load::{ElementalLoad, LoadPattern, NodalLoad, NodeLocker};
use crate::mesh::Mesh;
use crate::node::Node;

/// An entity removed from the domain and the number of dependent
/// constraints purged with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Removed<T> {
    /// The removed entity.
    pub item: T,
    /// Number of constraints removed as a side effect.
    pub purged_constraints: usize,
}

impl<T> Removed<T> {
    fn alone(item: T) -> Self {
        Self {
            item,
            purged_constraints: 0,
        }
    }
}

/// Evolving model state: mesh, constraints, loads and the change stamp.
#[derive(Debug, Clone, Default)]
pub struct Domain {
    pub(crate) mesh: Mesh,
    pub(crate) constraints: ConstraintContainer,
    pub(crate) stamp: u64,
    pending: bool,
    pub(crate) commit_tag: i32,
    pub(crate) current_time: f64,
    pub(crate) committed_time: f64,
    pub(crate) eigenvalues: Vec<f64>,
    pub(crate) modal_participation: Vec<f64>,
    pub(crate) last_sent_stamp: Option<u64>,
    pub(crate) last_received_stamp: Option<u64>,
    /// Load edits since the last send; they do not move the stamp.
    pub(crate) loads_edited: bool,
}

impl Domain {
    /// Create an empty domain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Access
    // ========================================================================

    /// The mesh.
    #[must_use]
    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// The constraint and load container.
    #[must_use]
    pub fn constraints(&self) -> &ConstraintContainer {
        &self.constraints
    }

    /// Look up a node.
    #[must_use]
    pub fn node(&self, tag: NodeTag) -> Option<&Node> {
        self.mesh.node(tag)
    }

    /// Mutable node access for state updates.
    pub fn node_mut(&mut self, tag: NodeTag) -> Option<&mut Node> {
        self.mesh.node_mut(tag)
    }

    /// Look up an element.
    #[must_use]
    pub fn element(&self, tag: ElementTag) -> Option<&ElementKind> {
        self.mesh.element(tag)
    }

    // ========================================================================
    // Change tracking
    // ========================================================================

    /// Record that topology or constraints changed.
    pub fn domain_change(&mut self) {
        self.pending = true;
    }

    /// Edge-triggered change query. See the module docs.
    pub fn has_domain_changed(&mut self) -> u64 {
        if self.pending {
            self.stamp += 1;
            self.pending = false;
            self.mesh.set_graph_built_flags(false);
            debug!(stamp = self.stamp, "domain changed");
        }
        self.stamp
    }

    /// Current change stamp, without consuming a pending change.
    #[must_use]
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    /// Whether a change is pending.
    #[must_use]
    pub fn is_change_pending(&self) -> bool {
        self.pending
    }

    // ========================================================================
    // Additions
    // ========================================================================

    fn check_node_dof(&self, node: NodeTag, dof: usize) -> fem_types::Result<()> {
        let n = self.mesh.node(node).ok_or(FemError::NodeNotFound(node))?;
        if dof >= n.ndf() {
            return Err(FemError::InvalidDof {
                node,
                dof,
                ndf: n.ndf(),
            });
        }
        Ok(())
    }

    fn check_sp(&self, sp: &SingleFreedomConstraint) -> fem_types::Result<()> {
        self.check_node_dof(sp.node(), sp.dof())
    }

    /// Add a node.
    pub fn add_node(&mut self, node: Node) -> fem_types::Result<()> {
        self.mesh.add_node(node)?;
        self.domain_change();
        Ok(())
    }

    /// Add an element. Its nodes must exist.
    pub fn add_element(&mut self, element: impl Into<ElementKind>) -> fem_types::Result<()> {
        self.mesh.add_element(element)?;
        self.domain_change();
        Ok(())
    }

    /// Add a standalone single-freedom constraint.
    pub fn add_sp(&mut self, sp: SingleFreedomConstraint) -> fem_types::Result<()> {
        self.check_sp(&sp)?;
        self.constraints.add_sp(sp)?;
        self.domain_change();
        Ok(())
    }

    /// Add a multi-freedom constraint. Both nodes and all DOFs must exist.
    pub fn add_mp(&mut self, mp: impl Into<MultiFreedom>) -> fem_types::Result<()> {
        let mp = mp.into();
        for &dof in mp.constrained_dofs() {
            self.check_node_dof(mp.constrained_node(), dof)?;
        }
        for &dof in mp.retained_dofs() {
            self.check_node_dof(mp.retained_node(), dof)?;
        }
        self.constraints.add_mp(mp)?;
        self.domain_change();
        Ok(())
    }

    /// Add a load pattern and the constraints it owns.
    pub fn add_load_pattern(&mut self, pattern: LoadPattern) -> fem_types::Result<()> {
        for sp in pattern.constraints() {
            self.check_sp(sp)?;
        }
        self.constraints.add_pattern(pattern)?;
        self.domain_change();
        Ok(())
    }

    /// Add a node locker and the constraints it owns.
    pub fn add_node_locker(&mut self, locker: NodeLocker) -> fem_types::Result<()> {
        for sp in locker.constraints() {
            self.check_sp(sp)?;
        }
        self.constraints.add_locker(locker)?;
        self.domain_change();
        Ok(())
    }

    /// Add a single-freedom constraint owned by a load pattern.
    pub fn add_sp_to_pattern(
        &mut self,
        pattern: PatternTag,
        sp: SingleFreedomConstraint,
    ) -> fem_types::Result<()> {
        self.check_sp(&sp)?;
        self.constraints.add_sp_to_pattern(pattern, sp)?;
        self.domain_change();
        Ok(())
    }

    /// Add a single-freedom constraint owned by a node locker.
    pub fn add_sp_to_locker(
        &mut self,
        locker: LockerTag,
        sp: SingleFreedomConstraint,
    ) -> fem_types::Result<()> {
        self.check_sp(&sp)?;
        self.constraints.add_sp_to_locker(locker, sp)?;
        self.domain_change();
        Ok(())
    }

    /// Add a nodal load to a pattern.
    ///
    /// Loads are not topology, so the change stamp is left alone. The next
    /// [`Self::send_self`] still carries the edited pattern.
    pub fn add_nodal_load(&mut self, pattern: PatternTag, load: NodalLoad) -> fem_types::Result<()> {
        let node = self
            .mesh
            .node(load.node)
            .ok_or(FemError::NodeNotFound(load.node))?;
        if load.values.len() != node.ndf() {
            return Err(FemError::DimensionMismatch {
                context: "nodal load",
                expected: node.ndf(),
                actual: load.values.len(),
            });
        }
        self.constraints.add_nodal_load(pattern, load)?;
        self.loads_edited = true;
        Ok(())
    }

    /// Add an elemental load to a pattern. Like nodal loads, it leaves the
    /// change stamp alone.
    pub fn add_elemental_load(
        &mut self,
        pattern: PatternTag,
        load: ElementalLoad,
    ) -> fem_types::Result<()> {
        if let Some(missing) = load.elements.iter().find(|e| self.mesh.element(**e).is_none()) {
            return Err(FemError::not_found(Registry::Element, missing.raw()));
        }
        self.constraints.add_elemental_load(pattern, load)?;
        self.loads_edited = true;
        Ok(())
    }

    // ========================================================================
    // Removals
    // ========================================================================

    /// Remove a node and every constraint referencing it.
    pub fn remove_node(&mut self, tag: NodeTag) -> fem_types::Result<Removed<Node>> {
        let item = self.mesh.remove_node(tag)?;
        let purged_constraints = self.constraints.purge_node(tag);
        if purged_constraints > 0 {
            debug!(node = tag.raw(), purged_constraints, "purged constraints of removed node");
        }
        self.domain_change();
        Ok(Removed {
            item,
            purged_constraints,
        })
    }

    /// Remove an element.
    pub fn remove_element(&mut self, tag: ElementTag) -> fem_types::Result<Removed<ElementKind>> {
        let item = self.mesh.remove_element(tag)?;
        self.constraints.purge_element(tag);
        self.domain_change();
        Ok(Removed::alone(item))
    }

    /// Remove a single-freedom constraint from whichever owner holds it.
    pub fn remove_sp(
        &mut self,
        tag: ConstraintTag,
    ) -> fem_types::Result<Removed<SingleFreedomConstraint>> {
        let item = self
            .constraints
            .remove_sp(tag)
            .ok_or_else(|| FemError::not_found(Registry::SingleFreedom, tag.raw()))?;
        self.domain_change();
        Ok(Removed::alone(item))
    }

    /// Remove a multi-freedom constraint.
    pub fn remove_mp(&mut self, tag: ConstraintTag) -> fem_types::Result<Removed<MultiFreedom>> {
        let item = self
            .constraints
            .remove_mp(tag)
            .ok_or_else(|| FemError::not_found(Registry::MultiFreedom, tag.raw()))?;
        self.domain_change();
        Ok(Removed::alone(item))
    }

    /// Remove a load pattern. The domain is marked changed only if the
    /// pattern owned constraints.
    pub fn remove_load_pattern(
        &mut self,
        tag: PatternTag,
    ) -> fem_types::Result<Removed<LoadPattern>> {
        let (item, purged_constraints) = self
            .constraints
            .remove_pattern(tag)
            .ok_or_else(|| FemError::not_found(Registry::LoadPattern, tag.raw()))?;
        if purged_constraints > 0 {
            self.domain_change();
        }
        self.loads_edited = true;
        Ok(Removed {
            item,
            purged_constraints,
        })
    }

    /// Remove a node locker. The domain is marked changed only if the
    /// locker owned constraints.
    pub fn remove_node_locker(&mut self, tag: LockerTag) -> fem_types::Result<Removed<NodeLocker>> {
        let (item, purged_constraints) = self
            .constraints
            .remove_locker(tag)
            .ok_or_else(|| FemError::not_found(Registry::NodeLocker, tag.raw()))?;
        if purged_constraints > 0 {
            self.domain_change();
        }
        Ok(Removed {
            item,
            purged_constraints,
        })
    }

    // ========================================================================
    // State protocol
    // ========================================================================

    /// Pseudo-time of the trial state.
    #[must_use]
    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    /// Pseudo-time of the last committed state.
    #[must_use]
    pub fn committed_time(&self) -> f64 {
        self.committed_time
    }

    /// Number of commits since the start.
    #[must_use]
    pub fn commit_tag(&self) -> i32 {
        self.commit_tag
    }

    /// Accept the trial state everywhere.
    pub fn commit(&mut self) {
        self.mesh.commit();
        self.constraints.commit();
        self.committed_time = self.current_time;
        self.commit_tag += 1;
    }

    /// Discard the trial state everywhere.
    pub fn revert_to_last_commit(&mut self) {
        self.mesh.revert_to_last_commit();
        self.constraints.revert_to_last_commit();
        self.current_time = self.committed_time;
    }

    /// Return to the undeformed state at pseudo-time zero.
    pub fn revert_to_start(&mut self) {
        self.mesh.revert_to_start();
        self.constraints.revert_to_start();
        self.current_time = 0.0;
        self.committed_time = 0.0;
        self.commit_tag = 0;
    }

    /// Apply the loads of every pattern at pseudo-time `t`.
    ///
    /// Nodal and element loads are zeroed, every pattern adds its loads
    /// scaled to `t`, then prescribed single-freedom values are written into
    /// the node trial displacements. Constraints on missing nodes are logged
    /// and skipped.
    pub fn apply_load(&mut self, t: f64) -> fem_types::Result<()> {
        self.current_time = t;
        self.mesh.zero_loads();
        let (nodes, elements) = self.mesh.parts_mut();
        self.constraints.apply_loads(t, nodes, elements)?;

        for sp in self.constraints.sp_constraints() {
            let imposed = match nodes.get_mut(&sp.node()) {
                Some(node) => node.set_trial_disp_dof(sp.dof(), sp.value()),
                None => Err(FemError::NodeNotFound(sp.node())),
            };
            if let Err(err) = imposed {
                warn!(constraint = sp.tag().raw(), %err, "constraint skipped");
            }
        }
        Ok(())
    }

    /// Recompute element trial state from node trial displacements.
    pub fn update(&mut self) -> fem_types::Result<()> {
        self.mesh.update()
    }

    // ========================================================================
    // Eigen results
    // ========================================================================

    /// Store eigenvalues from a modal analysis.
    pub fn set_eigenvalues(&mut self, values: Vec<f64>) {
        self.eigenvalues = values;
    }

    /// Stored eigenvalues.
    #[must_use]
    pub fn eigenvalues(&self) -> &[f64] {
        &self.eigenvalues
    }

    /// Store modal participation factors.
    pub fn set_modal_participation(&mut self, factors: Vec<f64>) {
        self.modal_participation = factors;
    }

    /// Stored modal participation factors.
    #[must_use]
    pub fn modal_participation(&self) -> &[f64] {
        &self.modal_participation
    }

    // ========================================================================
    // Reactions
    // ========================================================================

    /// Nodes exempt from the equilibrium self-check: nodes carrying a
    /// single-freedom constraint and both nodes of every multi-freedom
    /// constraint.
    #[must_use]
    pub fn reaction_exceptions(&self) -> HashSet<NodeTag> {
        let mut set: HashSet<NodeTag> = self.constraints.sp_constraints().map(|sp| sp.node()).collect();
        for mp in self.constraints.mp_constraints() {
            set.insert(mp.constrained_node());
            set.insert(mp.retained_node());
        }
        set
    }

    /// Recover nodal reactions and run the equilibrium self-check.
    ///
    /// Reactions start at minus the applied load, element resisting forces
    /// are added, then every multi-freedom constraint moves `-Cᵀ·Rm` from
    /// its constrained node to its retained node.
    pub fn calculate_nodal_reactions(
        &mut self,
        include_inertia: bool,
        tolerance: f64,
    ) -> fem_types::Result<()> {
        self.mesh.assemble_nodal_reactions(include_inertia)?;
        for mp in self.constraints.mp_constraints() {
            if let Err(err) = add_mp_reaction(&mut self.mesh, mp) {
                warn!(constraint = mp.tag().raw(), %err, "reaction transfer skipped");
            }
        }
        let exceptions = self.reaction_exceptions();
        self.mesh.check_equilibrium(tolerance, &exceptions)
    }

    // ========================================================================
    // Graphs and spatial queries
    // ========================================================================

    /// Element adjacency graph.
    pub fn element_graph(&mut self) -> &Graph {
        self.mesh.element_graph()
    }

    /// Node adjacency graph.
    pub fn node_graph(&mut self) -> &Graph {
        self.mesh.node_graph()
    }

    /// Node closest to `point`.
    pub fn nearest_node(&mut self, point: [f64; 3]) -> Option<NodeTag> {
        self.mesh.nearest_node(point)
    }

    /// Element whose centroid is closest to `point`.
    pub fn nearest_element(&mut self, point: [f64; 3]) -> Option<ElementTag> {
        self.mesh.nearest_element(point)
    }
}

fn add_mp_reaction(mesh: &mut Mesh, mp: &MultiFreedom) -> fem_types::Result<()> {
    let constrained = mesh
        .node(mp.constrained_node())
        .ok_or(FemError::NodeNotFound(mp.constrained_node()))?;
    let rm = DVector::from_iterator(
        mp.constrained_dofs().len(),
        mp.constrained_dofs().iter().map(|&d| constrained.reaction()[d]),
    );
    let rn = mp.retained_reaction(&rm)?;
    let retained = mesh
        .node_mut(mp.retained_node())
        .ok_or(FemError::NodeNotFound(mp.retained_node()))?;
    for (&dof, value) in mp.retained_dofs().iter().zip(rn.iter()) {
        retained.add_reaction_dof(dof, *value)?;
    }
    Ok(())
}
