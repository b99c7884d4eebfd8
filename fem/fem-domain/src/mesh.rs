//! Node and element registries.
//!
//! The [`Mesh`] is the authoritative registry of nodes and elements. Besides
//! keyed storage it maintains three derived structures, each rebuilt lazily
//! when the mesh revision moves past the one it was built at:
//!
//! - the element graph (elements adjacent when they share a node)
//! - the node graph (nodes adjacent when they share an element)
//! - the [`SpatialIndex`] over node positions and element centroids
//!
//! It also performs reaction recovery and the equilibrium self-check.

use hashbrown::{HashMap, HashSet};
use nalgebra::DVector;
use smallvec::SmallVec;
use tracing::{debug, warn};

use fem_types::{ElementTag, FemError, NodeTag, Registry};

use crate::element::{Element, ElementContext, ElementKind};
use crate::graph::{Graph, GraphCache};
use crate::node::Node;
use crate::spatial::SpatialIndex;

/// Keyed node and element storage with derived graphs and spatial index.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    nodes: HashMap<NodeTag, Node>,
    elements: HashMap<ElementTag, ElementKind>,
    revision: u64,
    element_graph: GraphCache,
    node_graph: GraphCache,
    spatial: Option<(u64, SpatialIndex)>,
}

impl Mesh {
    /// Create an empty mesh.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter advanced by every node or element addition and removal.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    // ========================================================================
    // Registries
    // ========================================================================

    /// Add a node. Duplicate tags are rejected without mutation.
    pub fn add_node(&mut self, node: Node) -> fem_types::Result<()> {
        if self.nodes.contains_key(&node.tag()) {
            return Err(FemError::duplicate(Registry::Node, node.tag().raw()));
        }
        self.nodes.insert(node.tag(), node);
        self.revision += 1;
        Ok(())
    }

    /// Add an element, resolving its geometry against the node registry.
    pub fn add_element(&mut self, element: impl Into<ElementKind>) -> fem_types::Result<()> {
        let mut element = element.into();
        if self.elements.contains_key(&element.tag()) {
            return Err(FemError::duplicate(Registry::Element, element.tag().raw()));
        }
        element.attach(&ElementContext::new(&self.nodes))?;
        self.elements.insert(element.tag(), element);
        self.revision += 1;
        Ok(())
    }

    /// Remove a node that no element references.
    pub fn remove_node(&mut self, tag: NodeTag) -> fem_types::Result<Node> {
        if !self.nodes.contains_key(&tag) {
            return Err(FemError::NodeNotFound(tag));
        }
        if let Some(element) = self
            .elements
            .values()
            .find(|e| e.connected_nodes().contains(&tag))
        {
            return Err(FemError::invalid_state(format!(
                "{tag} is still connected to {}",
                element.tag()
            )));
        }
        let node = self.nodes.remove(&tag).ok_or(FemError::NodeNotFound(tag))?;
        self.revision += 1;
        Ok(node)
    }

    /// Remove an element.
    pub fn remove_element(&mut self, tag: ElementTag) -> fem_types::Result<ElementKind> {
        let element = self
            .elements
            .remove(&tag)
            .ok_or_else(|| FemError::not_found(Registry::Element, tag.raw()))?;
        self.revision += 1;
        Ok(element)
    }

    /// Look up a node.
    #[must_use]
    pub fn node(&self, tag: NodeTag) -> Option<&Node> {
        self.nodes.get(&tag)
    }

    /// Mutable node access. Changes node state only, never topology.
    pub fn node_mut(&mut self, tag: NodeTag) -> Option<&mut Node> {
        self.nodes.get_mut(&tag)
    }

    /// Look up an element.
    #[must_use]
    pub fn element(&self, tag: ElementTag) -> Option<&ElementKind> {
        self.elements.get(&tag)
    }

    /// Nodes in unspecified order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Elements in unspecified order.
    pub fn elements(&self) -> impl Iterator<Item = &ElementKind> {
        self.elements.values()
    }

    /// Node tags in ascending order.
    #[must_use]
    pub fn node_tags(&self) -> Vec<NodeTag> {
        let mut tags: Vec<_> = self.nodes.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    /// Element tags in ascending order.
    #[must_use]
    pub fn element_tags(&self) -> Vec<ElementTag> {
        let mut tags: Vec<_> = self.elements.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    /// Number of nodes.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of elements.
    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    pub(crate) fn parts_mut(
        &mut self,
    ) -> (
        &mut HashMap<NodeTag, Node>,
        &mut HashMap<ElementTag, ElementKind>,
    ) {
        (&mut self.nodes, &mut self.elements)
    }

    // ========================================================================
    // State protocol
    // ========================================================================

    /// Recompute every element's trial state from node trial displacements.
    pub fn update(&mut self) -> fem_types::Result<()> {
        let mut ctx = ElementContext::new(&self.nodes);
        for element in self.elements.values_mut() {
            element.update(&mut ctx)?;
        }
        Ok(())
    }

    /// Clear applied nodal loads and element loads.
    pub fn zero_loads(&mut self) {
        self.nodes.values_mut().for_each(Node::zero_unbalanced_load);
        self.elements.values_mut().for_each(Element::zero_load);
    }

    /// Accept the trial state of every node and element.
    pub fn commit(&mut self) {
        self.nodes.values_mut().for_each(Node::commit_state);
        self.elements.values_mut().for_each(Element::commit_state);
    }

    /// Discard the trial state of every node and element.
    pub fn revert_to_last_commit(&mut self) {
        self.nodes.values_mut().for_each(Node::revert_to_last_commit);
        self.elements
            .values_mut()
            .for_each(Element::revert_to_last_commit);
    }

    /// Return every node and element to the undeformed state.
    pub fn revert_to_start(&mut self) {
        self.nodes.values_mut().for_each(Node::revert_to_start);
        self.elements.values_mut().for_each(Element::revert_to_start);
    }

    // ========================================================================
    // Graphs
    // ========================================================================

    /// Drop (`false`) cached graphs. Passing `true` is a no-op; graphs are
    /// built on demand.
    pub fn set_graph_built_flags(&mut self, built: bool) {
        if !built {
            self.element_graph.clear();
            self.node_graph.clear();
        }
    }

    /// Whether a graph is currently cached, as `(element, node)`.
    #[must_use]
    pub fn graphs_built(&self) -> (bool, bool) {
        (self.element_graph.is_built(), self.node_graph.is_built())
    }

    /// Element adjacency graph: two elements are adjacent when they share a
    /// node.
    pub fn element_graph(&mut self) -> &Graph {
        let (elements, revision) = (&self.elements, self.revision);
        self.element_graph
            .get_or_build(revision, || build_element_graph(elements))
    }

    /// Node adjacency graph: two nodes are adjacent when an element connects
    /// both.
    pub fn node_graph(&mut self) -> &Graph {
        let (nodes, elements, revision) = (&self.nodes, &self.elements, self.revision);
        self.node_graph
            .get_or_build(revision, || build_node_graph(nodes, elements))
    }

    // ========================================================================
    // Spatial queries
    // ========================================================================

    fn spatial_index(&mut self) -> &SpatialIndex {
        let revision = self.revision;
        if !matches!(&self.spatial, Some((built, _)) if *built == revision) {
            self.spatial = None;
        }
        let (nodes, elements) = (&self.nodes, &self.elements);
        let (_, index) = self.spatial.get_or_insert_with(|| {
            (
                revision,
                SpatialIndex::build(
                    nodes.values().map(|n| (n.tag(), n.point())),
                    elements.values().map(|e| (e.tag(), e.centroid())),
                ),
            )
        });
        index
    }

    /// Node closest to `point` (padded to three coordinates).
    pub fn nearest_node(&mut self, point: [f64; 3]) -> Option<NodeTag> {
        self.spatial_index().nearest_node(point)
    }

    /// Element whose centroid is closest to `point`.
    pub fn nearest_element(&mut self, point: [f64; 3]) -> Option<ElementTag> {
        self.spatial_index().nearest_element(point)
    }

    /// Nodes within `radius` of `point`, nearest first.
    pub fn nodes_within(&mut self, point: [f64; 3], radius: f64) -> Vec<NodeTag> {
        self.spatial_index().nodes_within(point, radius)
    }

    // ========================================================================
    // Reactions
    // ========================================================================

    /// Reset every reaction to minus the applied load, then add the
    /// resisting force of every element.
    pub fn assemble_nodal_reactions(&mut self, include_inertia: bool) -> fem_types::Result<()> {
        self.nodes.values_mut().for_each(Node::reset_reaction);
        for element in self.elements.values() {
            let force = if include_inertia {
                element.resisting_force_inc_inertia()
            } else {
                element.resisting_force()
            };
            scatter(&mut self.nodes, element, &force)?;
        }
        Ok(())
    }

    /// Check that every node outside `exceptions` carries a reaction no
    /// larger than `tolerance` times the largest reaction in the mesh.
    ///
    /// The first violation in ascending tag order is returned; every
    /// violation is logged.
    pub fn check_equilibrium(
        &self,
        tolerance: f64,
        exceptions: &HashSet<NodeTag>,
    ) -> fem_types::Result<()> {
        let max = self
            .nodes
            .values()
            .map(|n| n.reaction().norm())
            .fold(0.0, f64::max);
        let limit = tolerance * max;
        let mut first = None;
        for tag in self.node_tags() {
            if exceptions.contains(&tag) {
                continue;
            }
            let Some(node) = self.nodes.get(&tag) else {
                continue;
            };
            let magnitude = node.reaction().norm();
            if magnitude > limit {
                warn!(
                    node = tag.raw(),
                    magnitude, limit, "equilibrium self-check failed"
                );
                first.get_or_insert(FemError::Unbalanced {
                    node: tag,
                    magnitude,
                    limit,
                });
            }
        }
        match first {
            Some(err) => Err(err),
            None => {
                debug!(max_reaction = max, "equilibrium self-check passed");
                Ok(())
            }
        }
    }

    /// Reaction recovery followed by the equilibrium self-check.
    pub fn calculate_nodal_reactions(
        &mut self,
        include_inertia: bool,
        tolerance: f64,
        exceptions: &HashSet<NodeTag>,
    ) -> fem_types::Result<()> {
        self.assemble_nodal_reactions(include_inertia)?;
        self.check_equilibrium(tolerance, exceptions)
    }
}

/// Add an element vector into the reactions of its nodes.
fn scatter(
    nodes: &mut HashMap<NodeTag, Node>,
    element: &ElementKind,
    force: &DVector<f64>,
) -> fem_types::Result<()> {
    let mut offset = 0;
    for &tag in element.connected_nodes() {
        let node = nodes.get_mut(&tag).ok_or(FemError::NodeNotFound(tag))?;
        let ndf = node.ndf();
        if offset + ndf > force.len() {
            return Err(FemError::DimensionMismatch {
                context: "element resisting force",
                expected: offset + ndf,
                actual: force.len(),
            });
        }
        node.add_reaction(&force.rows(offset, ndf).into_owned())?;
        offset += ndf;
    }
    Ok(())
}

fn build_element_graph(elements: &HashMap<ElementTag, ElementKind>) -> Graph {
    let mut tags: Vec<_> = elements.keys().copied().collect();
    tags.sort_unstable();

    let mut graph = Graph::new();
    let mut touching: HashMap<NodeTag, SmallVec<[usize; 4]>> = HashMap::new();
    for tag in &tags {
        let vertex = graph.add_vertex(tag.raw());
        if let Some(element) = elements.get(tag) {
            for node in element.connected_nodes() {
                let list = touching.entry(*node).or_default();
                if !list.contains(&vertex) {
                    list.push(vertex);
                }
            }
        }
    }
    for list in touching.values() {
        for (i, &a) in list.iter().enumerate() {
            for &b in &list[i + 1..] {
                graph.add_edge(a, b);
            }
        }
    }
    graph
}

fn build_node_graph(
    nodes: &HashMap<NodeTag, Node>,
    elements: &HashMap<ElementTag, ElementKind>,
) -> Graph {
    let mut tags: Vec<_> = nodes.keys().copied().collect();
    tags.sort_unstable();

    let mut graph = Graph::new();
    for tag in &tags {
        graph.add_vertex(tag.raw());
    }
    for element in elements.values() {
        let ids: SmallVec<[usize; 4]> = element
            .connected_nodes()
            .iter()
            .filter_map(|n| graph.vertex_id(n.raw()))
            .collect();
        for (i, &a) in ids.iter().enumerate() {
            for &b in &ids[i + 1..] {
                graph.add_edge(a, b);
            }
        }
    }
    graph
}
