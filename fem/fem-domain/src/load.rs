//! Loads, time series, load patterns and node lockers.
//!
//! A [`LoadPattern`] groups nodal loads, elemental loads and single-freedom
//! constraints under one [`TimeSeries`]. On every `apply_load(t)` the
//! pattern evaluates its load factor `scale · series(t)` and adds the scaled
//! loads to nodes and elements. A [`NodeLocker`] is a group of
//! single-freedom constraints without a time series.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use nalgebra::DVector;
use tracing::warn;

use fem_constraint::{ConstraintOwner, SingleFreedomConstraint};
use fem_types::{
    ConstraintTag, ElementTag, FemError, LoadTag, LockerTag, NodeTag, PatternTag, Registry,
};

use crate::element::{Element, ElementKind, ElementLoadKind};
use crate::node::Node;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// ============================================================================
// Time series
// ============================================================================

/// Load factor as a function of pseudo-time.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TimeSeries {
    /// `f(t) = factor`.
    Constant {
        /// Constant factor.
        factor: f64,
    },
    /// `f(t) = factor · t`.
    Linear {
        /// Slope.
        factor: f64,
    },
    /// Piecewise-linear path through `(times[i], values[i])`, holding the
    /// end values outside the covered range.
    PiecewiseLinear {
        /// Strictly increasing abscissae.
        times: Vec<f64>,
        /// Factors at `times`.
        values: Vec<f64>,
    },
}

impl Default for TimeSeries {
    fn default() -> Self {
        Self::Linear { factor: 1.0 }
    }
}

impl TimeSeries {
    /// Piecewise-linear series with validated points.
    pub fn path(times: Vec<f64>, values: Vec<f64>) -> fem_types::Result<Self> {
        if times.is_empty() || times.len() != values.len() {
            return Err(FemError::invalid_config(
                "path series needs matching, non-empty times and values",
            ));
        }
        if times.windows(2).any(|w| w[1] <= w[0]) {
            return Err(FemError::invalid_config(
                "path series times must be strictly increasing",
            ));
        }
        Ok(Self::PiecewiseLinear { times, values })
    }

    /// Evaluate the factor at pseudo-time `t`.
    #[must_use]
    pub fn factor(&self, t: f64) -> f64 {
        match self {
            Self::Constant { factor } => *factor,
            Self::Linear { factor } => factor * t,
            Self::PiecewiseLinear { times, values } => {
                let (Some(&first), Some(&last)) = (times.first(), times.last()) else {
                    return 0.0;
                };
                if t <= first {
                    return values[0];
                }
                if t >= last {
                    return values[values.len() - 1];
                }
                let i = times.partition_point(|&x| x <= t);
                let (t0, t1) = (times[i - 1], times[i]);
                let (v0, v1) = (values[i - 1], values[i]);
                v0 + (v1 - v0) * (t - t0) / (t1 - t0)
            }
        }
    }
}

// ============================================================================
// Loads
// ============================================================================

/// Reference load applied to one node.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NodalLoad {
    /// Load tag, unique within the owning pattern.
    pub tag: LoadTag,
    /// Loaded node.
    pub node: NodeTag,
    /// Reference load, one entry per node DOF.
    pub values: DVector<f64>,
}

impl NodalLoad {
    /// Create a nodal load.
    #[must_use]
    pub fn new(tag: LoadTag, node: NodeTag, values: Vec<f64>) -> Self {
        Self {
            tag,
            node,
            values: DVector::from_vec(values),
        }
    }
}

/// Reference load applied to a set of elements.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ElementalLoad {
    /// Load tag, unique within the owning pattern.
    pub tag: LoadTag,
    /// Loaded elements.
    pub elements: Vec<ElementTag>,
    /// Load kind and reference magnitude.
    pub kind: ElementLoadKind,
}

impl ElementalLoad {
    /// Create an elemental load.
    #[must_use]
    pub fn new(tag: LoadTag, elements: Vec<ElementTag>, kind: ElementLoadKind) -> Self {
        Self {
            tag,
            elements,
            kind,
        }
    }
}

// ============================================================================
// Load pattern
// ============================================================================

/// Nodal loads, elemental loads and constraints sharing one time series.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LoadPattern {
    tag: PatternTag,
    series: TimeSeries,
    scale: f64,
    nodal_loads: BTreeMap<LoadTag, NodalLoad>,
    elemental_loads: BTreeMap<LoadTag, ElementalLoad>,
    constraints: BTreeMap<ConstraintTag, SingleFreedomConstraint>,
    load_factor: f64,
    committed_load_factor: f64,
}

impl LoadPattern {
    /// Create an empty pattern.
    #[must_use]
    pub fn new(tag: PatternTag, series: TimeSeries) -> Self {
        Self {
            tag,
            series,
            scale: 1.0,
            nodal_loads: BTreeMap::new(),
            elemental_loads: BTreeMap::new(),
            constraints: BTreeMap::new(),
            load_factor: 0.0,
            committed_load_factor: 0.0,
        }
    }

    /// Constant multiplier on top of the time series.
    #[must_use]
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Pattern tag.
    #[must_use]
    pub fn tag(&self) -> PatternTag {
        self.tag
    }

    /// Time series.
    #[must_use]
    pub fn series(&self) -> &TimeSeries {
        &self.series
    }

    /// Factor used by the last `apply_load`.
    #[must_use]
    pub fn load_factor(&self) -> f64 {
        self.load_factor
    }

    /// Nodal loads in tag order.
    pub fn nodal_loads(&self) -> impl Iterator<Item = &NodalLoad> {
        self.nodal_loads.values()
    }

    /// Elemental loads in tag order.
    pub fn elemental_loads(&self) -> impl Iterator<Item = &ElementalLoad> {
        self.elemental_loads.values()
    }

    /// Single-freedom constraints owned by the pattern.
    pub fn constraints(&self) -> impl Iterator<Item = &SingleFreedomConstraint> {
        self.constraints.values()
    }

    /// Number of owned single-freedom constraints.
    #[must_use]
    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub(crate) fn constraints_mut(
        &mut self,
    ) -> &mut BTreeMap<ConstraintTag, SingleFreedomConstraint> {
        &mut self.constraints
    }

    /// Add a nodal load. Duplicate tags are rejected.
    pub fn add_nodal_load(&mut self, load: NodalLoad) -> fem_types::Result<()> {
        if self.nodal_loads.contains_key(&load.tag) {
            return Err(FemError::duplicate(Registry::NodalLoad, load.tag.raw()));
        }
        self.nodal_loads.insert(load.tag, load);
        Ok(())
    }

    /// Add an elemental load. Duplicate tags are rejected.
    pub fn add_elemental_load(&mut self, load: ElementalLoad) -> fem_types::Result<()> {
        if self.elemental_loads.contains_key(&load.tag) {
            return Err(FemError::duplicate(Registry::ElementalLoad, load.tag.raw()));
        }
        self.elemental_loads.insert(load.tag, load);
        Ok(())
    }

    /// Add a single-freedom constraint and record the pattern as its owner.
    ///
    /// Global tag uniqueness is the container's job.
    pub(crate) fn add_constraint(&mut self, mut sp: SingleFreedomConstraint) {
        sp.set_owner(ConstraintOwner::Pattern(self.tag));
        self.constraints.insert(sp.tag(), sp);
    }

    /// Remove a nodal load.
    pub fn remove_nodal_load(&mut self, tag: LoadTag) -> Option<NodalLoad> {
        self.nodal_loads.remove(&tag)
    }

    /// Remove an elemental load.
    pub fn remove_elemental_load(&mut self, tag: LoadTag) -> Option<ElementalLoad> {
        self.elemental_loads.remove(&tag)
    }

    /// Drop everything attached to `node`. Returns the number of purged
    /// constraints.
    pub(crate) fn purge_node(&mut self, node: NodeTag) -> usize {
        self.nodal_loads.retain(|_, l| l.node != node);
        let before = self.constraints.len();
        self.constraints.retain(|_, sp| sp.node() != node);
        before - self.constraints.len()
    }

    /// Drop references to `element`.
    pub(crate) fn purge_element(&mut self, element: ElementTag) {
        for load in self.elemental_loads.values_mut() {
            load.elements.retain(|&e| e != element);
        }
        self.elemental_loads.retain(|_, l| !l.elements.is_empty());
    }

    /// Add the loads scaled to pseudo-time `t` and update owned constraints.
    ///
    /// Loads referencing a missing node or element are logged and skipped.
    pub fn apply_load(
        &mut self,
        t: f64,
        nodes: &mut HashMap<NodeTag, Node>,
        elements: &mut HashMap<ElementTag, ElementKind>,
    ) -> fem_types::Result<()> {
        let factor = self.scale * self.series.factor(t);
        if !factor.is_finite() {
            return Err(FemError::NonFinite {
                context: "load pattern factor",
            });
        }
        self.load_factor = factor;

        for load in self.nodal_loads.values() {
            match nodes.get_mut(&load.node) {
                Some(node) => node.add_unbalanced_load(&load.values, factor)?,
                None => warn!(
                    pattern = self.tag.raw(),
                    load = load.tag.raw(),
                    node = load.node.raw(),
                    "nodal load references a missing node, skipped"
                ),
            }
        }
        for load in self.elemental_loads.values() {
            for tag in &load.elements {
                match elements.get_mut(tag) {
                    Some(element) => element.add_load(&load.kind, factor)?,
                    None => warn!(
                        pattern = self.tag.raw(),
                        load = load.tag.raw(),
                        element = tag.raw(),
                        "elemental load references a missing element, skipped"
                    ),
                }
            }
        }
        for sp in self.constraints.values_mut() {
            sp.apply_constraint(factor);
        }
        Ok(())
    }

    /// Accept the current load factor.
    pub fn commit(&mut self) {
        self.committed_load_factor = self.load_factor;
    }

    /// Restore the last committed load factor.
    pub fn revert_to_last_commit(&mut self) {
        self.load_factor = self.committed_load_factor;
    }

    /// Reset the load factor.
    pub fn revert_to_start(&mut self) {
        self.load_factor = 0.0;
        self.committed_load_factor = 0.0;
    }
}

// ============================================================================
// Node locker
// ============================================================================

/// Group of single-freedom constraints holding node DOFs at fixed values.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NodeLocker {
    tag: LockerTag,
    constraints: BTreeMap<ConstraintTag, SingleFreedomConstraint>,
}

impl NodeLocker {
    /// Create an empty locker.
    #[must_use]
    pub fn new(tag: LockerTag) -> Self {
        Self {
            tag,
            constraints: BTreeMap::new(),
        }
    }

    /// Locker tag.
    #[must_use]
    pub fn tag(&self) -> LockerTag {
        self.tag
    }

    /// Owned constraints.
    pub fn constraints(&self) -> impl Iterator<Item = &SingleFreedomConstraint> {
        self.constraints.values()
    }

    /// Number of owned constraints.
    #[must_use]
    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub(crate) fn constraints_mut(
        &mut self,
    ) -> &mut BTreeMap<ConstraintTag, SingleFreedomConstraint> {
        &mut self.constraints
    }

    pub(crate) fn add_constraint(&mut self, mut sp: SingleFreedomConstraint) {
        sp.set_owner(ConstraintOwner::Locker(self.tag));
        self.constraints.insert(sp.tag(), sp);
    }

    pub(crate) fn purge_node(&mut self, node: NodeTag) -> usize {
        let before = self.constraints.len();
        self.constraints.retain(|_, sp| sp.node() != node);
        before - self.constraints.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_time_series() {
        assert_eq!(TimeSeries::Constant { factor: 2.0 }.factor(10.0), 2.0);
        assert_eq!(TimeSeries::default().factor(0.25), 0.25);

        let path = TimeSeries::path(vec![0.0, 1.0, 3.0], vec![0.0, 2.0, 0.0]).unwrap();
        assert_eq!(path.factor(-1.0), 0.0);
        assert_relative_eq!(path.factor(0.5), 1.0);
        assert_relative_eq!(path.factor(2.0), 1.0);
        assert_eq!(path.factor(1.0), 2.0);
        assert_eq!(path.factor(9.0), 0.0);

        assert!(TimeSeries::path(vec![0.0, 0.0], vec![1.0, 1.0]).is_err());
        assert!(TimeSeries::path(vec![], vec![]).is_err());
    }

    #[test]
    fn test_pattern_applies_scaled_loads() {
        let mut nodes = HashMap::new();
        nodes.insert(NodeTag(2), Node::new(NodeTag(2), &[1.0], 1).unwrap());
        let mut elements = HashMap::new();

        let mut pattern = LoadPattern::new(PatternTag(1), TimeSeries::default()).with_scale(2.0);
        pattern
            .add_nodal_load(NodalLoad::new(LoadTag(1), NodeTag(2), vec![100.0]))
            .unwrap();
        // Dangling load is skipped, not fatal
        pattern
            .add_nodal_load(NodalLoad::new(LoadTag(2), NodeTag(7), vec![1.0]))
            .unwrap();
        assert!(
            pattern
                .add_nodal_load(NodalLoad::new(LoadTag(1), NodeTag(2), vec![1.0]))
                .is_err()
        );
        pattern.add_constraint(
            SingleFreedomConstraint::prescribed(ConstraintTag(5), NodeTag(2), 0, 0.1)
                .with_load_scaling(true),
        );

        pattern.apply_load(0.5, &mut nodes, &mut elements).unwrap();
        assert_eq!(pattern.load_factor(), 1.0);
        assert_eq!(nodes[&NodeTag(2)].unbalanced_load()[0], 100.0);
        let sp = pattern.constraints().next().unwrap();
        assert_eq!(sp.owner(), ConstraintOwner::Pattern(PatternTag(1)));
        assert_relative_eq!(sp.value(), 0.1);
    }

    #[test]
    fn test_pattern_commit_revert() {
        let mut pattern = LoadPattern::new(PatternTag(1), TimeSeries::default());
        let mut nodes = HashMap::new();
        let mut elements = HashMap::new();
        pattern.apply_load(1.0, &mut nodes, &mut elements).unwrap();
        pattern.commit();
        pattern.apply_load(2.0, &mut nodes, &mut elements).unwrap();
        pattern.revert_to_last_commit();
        assert_eq!(pattern.load_factor(), 1.0);
        pattern.revert_to_start();
        assert_eq!(pattern.load_factor(), 0.0);
    }

    #[test]
    fn test_purge_node() {
        let mut pattern = LoadPattern::new(PatternTag(1), TimeSeries::default());
        pattern
            .add_nodal_load(NodalLoad::new(LoadTag(1), NodeTag(2), vec![1.0]))
            .unwrap();
        pattern.add_constraint(SingleFreedomConstraint::fixed(ConstraintTag(1), NodeTag(2), 0));
        pattern.add_constraint(SingleFreedomConstraint::fixed(ConstraintTag(2), NodeTag(3), 0));
        assert_eq!(pattern.purge_node(NodeTag(2)), 1);
        assert_eq!(pattern.nodal_loads().count(), 0);

        let mut locker = NodeLocker::new(LockerTag(4));
        locker.add_constraint(SingleFreedomConstraint::fixed(ConstraintTag(9), NodeTag(3), 1));
        assert_eq!(
            locker.constraints().next().unwrap().owner(),
            ConstraintOwner::Locker(LockerTag(4))
        );
        assert_eq!(locker.purge_node(NodeTag(3)), 1);
    }
}
