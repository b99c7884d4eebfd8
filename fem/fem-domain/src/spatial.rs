//! Spatial index over node positions and element centroids.
//!
//! Built on an R-tree ([`rstar`]) bulk-loaded from the mesh and padded to
//! three dimensions so 1D, 2D and 3D meshes share one index type.

use rstar::{AABB, PointDistance, RTree, RTreeObject};

use fem_types::{ElementTag, NodeTag};

/// A tagged point stored in the R-tree.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TaggedPoint {
    point: [f64; 3],
    tag: i32,
}

impl RTreeObject for TaggedPoint {
    type Envelope = AABB<[f64; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.point)
    }
}

impl PointDistance for TaggedPoint {
    fn distance_2(&self, point: &[f64; 3]) -> f64 {
        (0..3).map(|i| (self.point[i] - point[i]).powi(2)).sum()
    }
}

/// Nearest-node and nearest-element lookup.
#[derive(Debug, Clone, Default)]
pub struct SpatialIndex {
    nodes: RTree<TaggedPoint>,
    elements: RTree<TaggedPoint>,
}

impl SpatialIndex {
    /// Bulk-load from node positions and element centroids.
    pub fn build(
        nodes: impl IntoIterator<Item = (NodeTag, [f64; 3])>,
        elements: impl IntoIterator<Item = (ElementTag, [f64; 3])>,
    ) -> Self {
        let nodes = nodes
            .into_iter()
            .map(|(tag, point)| TaggedPoint {
                point,
                tag: tag.raw(),
            })
            .collect();
        let elements = elements
            .into_iter()
            .map(|(tag, point)| TaggedPoint {
                point,
                tag: tag.raw(),
            })
            .collect();
        Self {
            nodes: RTree::bulk_load(nodes),
            elements: RTree::bulk_load(elements),
        }
    }

    /// Node closest to `point`.
    #[must_use]
    pub fn nearest_node(&self, point: [f64; 3]) -> Option<NodeTag> {
        self.nodes.nearest_neighbor(&point).map(|p| NodeTag(p.tag))
    }

    /// Element whose centroid is closest to `point`.
    #[must_use]
    pub fn nearest_element(&self, point: [f64; 3]) -> Option<ElementTag> {
        self.elements
            .nearest_neighbor(&point)
            .map(|p| ElementTag(p.tag))
    }

    /// Nodes within `radius` of `point`, nearest first.
    #[must_use]
    pub fn nodes_within(&self, point: [f64; 3], radius: f64) -> Vec<NodeTag> {
        let mut hits: Vec<(f64, i32)> = self
            .nodes
            .locate_within_distance(point, radius * radius)
            .map(|p| (p.distance_2(&point), p.tag))
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        hits.into_iter().map(|(_, tag)| NodeTag(tag)).collect()
    }

    /// Number of indexed nodes.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.nodes.size()
    }
}
