//! Undirected adjacency graphs over mesh entities.
//!
//! Vertices are dense ids starting at [`START_VERTEX_NUM`], assigned in
//! ascending entity-tag order, and each vertex remembers the tag it was
//! built from. Edges are stored symmetrically and deduplicated.
//!
//! [`GraphCache`] pairs a built graph with the mesh revision it was built
//! at, so a stale graph is detected by comparing revisions instead of
//! tracking a separate "built" flag.

use std::collections::BTreeSet;

use hashbrown::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Id of the first vertex of every graph.
pub const START_VERTEX_NUM: usize = 0;

/// One graph vertex.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Vertex {
    tag: i32,
    adjacency: BTreeSet<usize>,
}

impl Vertex {
    /// Tag of the entity this vertex stands for.
    #[must_use]
    pub fn tag(&self) -> i32 {
        self.tag
    }

    /// Adjacent vertex ids in ascending order.
    pub fn adjacency(&self) -> impl Iterator<Item = usize> + '_ {
        self.adjacency.iter().copied()
    }

    /// Number of adjacent vertices.
    #[must_use]
    pub fn degree(&self) -> usize {
        self.adjacency.len()
    }
}

/// Undirected graph with dense vertex ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Graph {
    vertices: Vec<Vertex>,
    by_tag: HashMap<i32, usize>,
    num_edges: usize,
}

impl Graph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vertex for `tag` and return its id. Adding a tag twice returns
    /// the existing id.
    pub fn add_vertex(&mut self, tag: i32) -> usize {
        if let Some(&id) = self.by_tag.get(&tag) {
            return id;
        }
        let id = START_VERTEX_NUM + self.vertices.len();
        self.vertices.push(Vertex {
            tag,
            adjacency: BTreeSet::new(),
        });
        self.by_tag.insert(tag, id);
        id
    }

    /// Add the undirected edge `a - b`.
    ///
    /// Returns `false` if the edge already exists, is a self loop, or names
    /// an unknown vertex.
    pub fn add_edge(&mut self, a: usize, b: usize) -> bool {
        if a == b || self.vertex(a).is_none() || self.vertex(b).is_none() {
            return false;
        }
        let (ia, ib) = (a - START_VERTEX_NUM, b - START_VERTEX_NUM);
        if !self.vertices[ia].adjacency.insert(b) {
            return false;
        }
        self.vertices[ib].adjacency.insert(a);
        self.num_edges += 1;
        true
    }

    /// Vertex by id.
    #[must_use]
    pub fn vertex(&self, id: usize) -> Option<&Vertex> {
        id.checked_sub(START_VERTEX_NUM)
            .and_then(|i| self.vertices.get(i))
    }

    /// Vertex id for an entity tag.
    #[must_use]
    pub fn vertex_id(&self, tag: i32) -> Option<usize> {
        self.by_tag.get(&tag).copied()
    }

    /// Iterate `(id, vertex)` in id order.
    pub fn vertices(&self) -> impl Iterator<Item = (usize, &Vertex)> {
        self.vertices
            .iter()
            .enumerate()
            .map(|(i, v)| (START_VERTEX_NUM + i, v))
    }

    /// Number of vertices.
    #[must_use]
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Number of undirected edges.
    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.num_edges
    }

    /// Whether `a - b` is an edge.
    #[must_use]
    pub fn has_edge(&self, a: usize, b: usize) -> bool {
        self.vertex(a).is_some_and(|v| v.adjacency.contains(&b))
    }
}

/// A graph together with the mesh revision it was built at.
#[derive(Debug, Clone, Default)]
pub struct GraphCache {
    entry: Option<(u64, Graph)>,
}

impl GraphCache {
    /// Return the cached graph if it was built at `revision`.
    #[must_use]
    pub fn get(&self, revision: u64) -> Option<&Graph> {
        match &self.entry {
            Some((built, graph)) if *built == revision => Some(graph),
            _ => None,
        }
    }

    /// Return the cached graph, rebuilding it with `build` if it is stale.
    pub fn get_or_build(&mut self, revision: u64, build: impl FnOnce() -> Graph) -> &Graph {
        if !matches!(&self.entry, Some((built, _)) if *built == revision) {
            self.entry = None;
        }
        let (_, graph) = self.entry.get_or_insert_with(|| (revision, build()));
        graph
    }

    /// Drop the cached graph.
    pub fn clear(&mut self) {
        self.entry = None;
    }

    /// Whether a graph is cached, whatever its revision.
    #[must_use]
    pub fn is_built(&self) -> bool {
        self.entry.is_some()
    }
}
